use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

use maplabel_core::model::{Layer, Map};
use tracing::{debug, info};

use crate::deserializer::{BinaryDeserializer, Deserializer};
use crate::format::{Bookmark, FormatVersion};
use crate::persist::{
    CHAPTER_LAYERS, FeatureHeader, Persist, ReadContext, read_layer_body, read_layer_name,
    read_map_header,
};
use crate::serializer::BinarySerializer;
use crate::{Result, SerializationError};

/// 读取要素时的淘汰判定：在读到身份字段之后、读取几何之前调用，
/// 返回 `true` 的要素被整体跳过。
pub trait FeatureReadingEliminator {
    fn eliminate(&self, header: &FeatureHeader) -> bool;
}

impl<F> FeatureReadingEliminator for F
where
    F: Fn(&FeatureHeader) -> bool,
{
    fn eliminate(&self, header: &FeatureHeader) -> bool {
        self(header)
    }
}

/// 按要素类别淘汰。
#[derive(Debug, Clone, Default)]
pub struct ClassEliminator {
    classes: Vec<String>,
}

impl ClassEliminator {
    pub fn new<I, S>(classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            classes: classes.into_iter().map(Into::into).collect(),
        }
    }
}

impl FeatureReadingEliminator for ClassEliminator {
    fn eliminate(&self, header: &FeatureHeader) -> bool {
        self.classes
            .iter()
            .any(|class| class.as_str() == header.class.as_ref())
    }
}

pub trait MapLoader {
    fn load(&self, path: &Path) -> Result<Map>;
}

pub trait MapSaver {
    fn save(&self, map: &Map, path: &Path) -> Result<()>;
}

/// 写入时如何完成块头回填。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkMode {
    /// 直接在文件上回写块头。
    #[default]
    Seekable,
    /// 先写入内存，完成后整体写出。
    Buffered,
}

/// `.bin` 地图文件的读写入口。
#[derive(Debug, Clone, Copy)]
pub struct MapFile {
    version: FormatVersion,
    sink: SinkMode,
}

impl Default for MapFile {
    fn default() -> Self {
        Self::new(FormatVersion::CURRENT)
    }
}

impl MapFile {
    pub const EXTENSION: &'static str = "bin";

    pub fn new(version: FormatVersion) -> Self {
        Self {
            version,
            sink: SinkMode::default(),
        }
    }

    pub fn with_sink(mut self, sink: SinkMode) -> Self {
        self.sink = sink;
        self
    }

    #[inline]
    pub fn version(&self) -> FormatVersion {
        self.version
    }

    #[inline]
    pub fn sink(&self) -> SinkMode {
        self.sink
    }

    pub fn check_extension(path: &Path) -> Result<()> {
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(Self::EXTENSION));
        if matches {
            Ok(())
        } else {
            Err(SerializationError::UnsupportedExtension(path.to_path_buf()))
        }
    }

    /// 写入可寻址的输出。
    pub fn write_to<W: Write + Seek>(&self, map: &Map, sink: W) -> Result<W> {
        let mut serializer = BinarySerializer::new(sink, self.version)?;
        map.serialize(&mut serializer)?;
        serializer.finish()
    }

    /// 写入任意输出：先在内存中完成回填，再整体写出。
    pub fn write_buffered<W: Write>(&self, map: &Map, sink: W) -> Result<W> {
        let mut serializer = BinarySerializer::in_memory(self.version)?;
        map.serialize(&mut serializer)?;
        serializer.finish_into(sink)
    }

    pub fn read_from<R: Read + Seek>(&self, source: R) -> Result<Map> {
        let mut deserializer = BinaryDeserializer::open(source)?;
        let mut context = ReadContext::new();
        Map::deserialize_new(&mut deserializer, &mut context)
    }

    /// 带淘汰器读取，返回地图和被跳过的要素个数。
    pub fn read_filtered<R: Read + Seek>(
        &self,
        source: R,
        eliminator: &dyn FeatureReadingEliminator,
    ) -> Result<(Map, usize)> {
        let mut deserializer = BinaryDeserializer::open(source)?;
        let mut context = ReadContext::with_eliminator(eliminator);
        let map = Map::deserialize_new(&mut deserializer, &mut context)?;
        Ok((map, context.eliminated()))
    }

    pub fn load_filtered(
        &self,
        path: &Path,
        eliminator: &dyn FeatureReadingEliminator,
    ) -> Result<(Map, usize)> {
        let (map, eliminated) = self.read_filtered(open_reader(path)?, eliminator)?;
        info!(
            path = %path.display(),
            layers = map.layers().len(),
            eliminated,
            "按条件载入地图"
        );
        Ok((map, eliminated))
    }
}

fn open_reader(path: &Path) -> Result<BufReader<File>> {
    MapFile::check_extension(path)?;
    let file = File::open(path).map_err(|source| SerializationError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file))
}

impl MapSaver for MapFile {
    fn save(&self, map: &Map, path: &Path) -> Result<()> {
        Self::check_extension(path)?;
        let file = File::create(path).map_err(|source| SerializationError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        match self.sink {
            SinkMode::Seekable => {
                self.write_to(map, BufWriter::new(file))?;
            }
            SinkMode::Buffered => {
                self.write_buffered(map, file)?;
            }
        }
        info!(
            path = %path.display(),
            version = %self.version,
            layers = map.layers().len(),
            labels = map.labels().len(),
            "保存地图"
        );
        Ok(())
    }
}

impl MapLoader for MapFile {
    fn load(&self, path: &Path) -> Result<Map> {
        let map = self.read_from(open_reader(path)?)?;
        info!(
            path = %path.display(),
            layers = map.layers().len(),
            labels = map.labels().len(),
            "载入地图"
        );
        Ok(map)
    }
}

/// 目录中的一个图层：名字与其在文件中的书签。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerEntry {
    pub name: String,
    pub bookmark: Bookmark,
}

/// 按需载入图层的地图目录。
///
/// 打开时只读取地图头、样式与规则，并扫描 `layers` 章节记下每个图层的
/// 书签；之后 [`MapCatalog::load_layer`] 直接跳到对应图层读取。
pub struct MapCatalog<R: Read + Seek> {
    deserializer: BinaryDeserializer<R>,
    context: ReadContext<'static>,
    map: Map,
    entries: Vec<LayerEntry>,
}

impl MapCatalog<BufReader<File>> {
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(open_reader(path)?)
    }
}

impl<R: Read + Seek> MapCatalog<R> {
    pub fn open(source: R) -> Result<Self> {
        let mut deserializer = BinaryDeserializer::open(source)?;
        let mut context = ReadContext::new();
        let map = read_map_header(&mut deserializer, &mut context)?;

        deserializer.enter_chapter(CHAPTER_LAYERS)?;
        let mut entries = Vec::new();
        loop {
            let bookmark = deserializer.bookmark()?;
            if deserializer.enter_first_nested_object()?.is_none() {
                break;
            }
            let name = read_layer_name(&mut deserializer)?;
            deserializer.leave_nested_object()?;
            entries.push(LayerEntry { name, bookmark });
        }
        debug!(layers = entries.len(), "扫描图层目录");
        Ok(Self {
            deserializer,
            context,
            map,
            entries,
        })
    }

    pub fn version(&self) -> FormatVersion {
        self.deserializer.version()
    }

    /// 不含图层与注记的地图骨架（名字、范围、样式、规则）。
    pub fn map(&self) -> &Map {
        &self.map
    }

    pub fn entries(&self) -> &[LayerEntry] {
        &self.entries
    }

    pub fn layer_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    /// 跳到图层书签处读取单个图层；找不到名字时返回 `Ok(None)`。
    pub fn load_layer(&mut self, name: &str) -> Result<Option<Layer>> {
        let Some(entry) = self.entries.iter().find(|entry| entry.name == name) else {
            return Ok(None);
        };
        self.deserializer.jump_to_bookmark(entry.bookmark)?;
        if self.deserializer.enter_first_nested_object()?.is_none() {
            return Err(SerializationError::InvalidBookmark(format!(
                "no layer at bookmark for {name}"
            )));
        }
        let layer = read_layer_body(&mut self.deserializer, &mut self.context)?;
        self.deserializer.leave_nested_object()?;
        debug!(layer = name, features = layer.features.len(), "按需载入图层");
        Ok(Some(layer))
    }

    /// 载入全部图层，得到完整的地图（不含注记）。
    pub fn load_all(mut self) -> Result<Map> {
        let names: Vec<String> = self.entries.iter().map(|entry| entry.name.clone()).collect();
        let mut map = std::mem::replace(&mut self.map, Map::new("", Default::default()));
        for name in names {
            if let Some(layer) = self.load_layer(&name)? {
                map.push_layer(layer);
            }
        }
        Ok(map)
    }
}

impl<R: Read + Seek> std::fmt::Debug for MapCatalog<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapCatalog")
            .field("map", &self.map.name)
            .field("entries", &self.entries)
            .finish()
    }
}

/// 按扩展名补全地图文件路径。
pub fn with_map_extension(path: impl Into<PathBuf>) -> PathBuf {
    let mut path = path.into();
    if path.extension().is_none() {
        path.set_extension(MapFile::EXTENSION);
    }
    path
}
