use std::collections::HashMap;
use std::io::{Cursor, Seek, SeekFrom, Write};

use byteorder::{NativeEndian, WriteBytesExt};
use tracing::trace;

use crate::format::{
    Bookmark, ComplexType, ContainerHeader, ContainerType, FormatVersion, ScalarValue,
};
use crate::{Result, SerializationError};

/// 写入侧协议。标量按位置写入，`name` 只在容器上落盘。
pub trait Serializer {
    fn version(&self) -> FormatVersion;

    fn serialize_value(&mut self, value: ScalarValue, name: &str) -> Result<()>;
    fn serialize_string(&mut self, value: &str, name: &str) -> Result<()>;
    fn serialize_bytes(&mut self, value: &[u8], name: &str) -> Result<()>;
    fn save_null(&mut self, name: &str) -> Result<()>;

    /// 顶层命名章节，不能嵌套。
    fn start_chapter(&mut self, name: &str) -> Result<()>;
    fn end_chapter(&mut self) -> Result<()>;
    fn start_container(&mut self, name: &str) -> Result<()>;
    fn end_container(&mut self) -> Result<()>;
    fn start_list(&mut self, name: &str, count: usize) -> Result<()>;
    fn end_list(&mut self) -> Result<()>;

    /// 下一个块的位置。只有当前打开的块全是章节时才有效。
    fn bookmark(&mut self) -> Result<Bookmark>;

    fn serialize_bool(&mut self, value: bool, name: &str) -> Result<()> {
        self.serialize_value(ScalarValue::Bool(value), name)
    }

    fn serialize_u8(&mut self, value: u8, name: &str) -> Result<()> {
        self.serialize_value(ScalarValue::UnsignedChar(value), name)
    }

    fn serialize_i32(&mut self, value: i32, name: &str) -> Result<()> {
        self.serialize_value(ScalarValue::Int(value), name)
    }

    fn serialize_u32(&mut self, value: u32, name: &str) -> Result<()> {
        self.serialize_value(ScalarValue::UnsignedInt(value), name)
    }

    fn serialize_i64(&mut self, value: i64, name: &str) -> Result<()> {
        self.serialize_value(ScalarValue::LongLong(value), name)
    }

    fn serialize_u64(&mut self, value: u64, name: &str) -> Result<()> {
        self.serialize_value(ScalarValue::UnsignedLongLong(value), name)
    }

    fn serialize_f32(&mut self, value: f32, name: &str) -> Result<()> {
        self.serialize_value(ScalarValue::Float(value), name)
    }

    fn serialize_f64(&mut self, value: f64, name: &str) -> Result<()> {
        self.serialize_value(ScalarValue::Double(value), name)
    }
}

#[derive(Debug, Clone, Copy)]
struct OpenBlock {
    kind: ContainerType,
    start: u64,
}

/// 回填式二进制写入器。
///
/// 容器开始时写一个占位块头并记下偏移，结束时回到块头写入真实的
/// `block_size`。因此要求输出介质可寻址；不可寻址的目标使用
/// [`BinarySerializer::in_memory`] 先写入内存再整体拷出。
pub struct BinarySerializer<W: Write + Seek> {
    sink: W,
    version: FormatVersion,
    origin: u64,
    open: Vec<OpenBlock>,
    dictionary: HashMap<String, i32>,
    strings: Vec<String>,
}

impl<W: Write + Seek> BinarySerializer<W> {
    /// 写入文件头，字典偏移先占位。
    pub fn new(mut sink: W, version: FormatVersion) -> Result<Self> {
        let origin = sink.stream_position().map_err(SerializationError::write)?;
        sink.write_f32::<NativeEndian>(version.as_f32())
            .map_err(SerializationError::write)?;
        sink.write_u64::<NativeEndian>(0)
            .map_err(SerializationError::write)?;
        Ok(Self {
            sink,
            version,
            origin,
            open: Vec::new(),
            dictionary: HashMap::new(),
            strings: Vec::new(),
        })
    }

    /// 写出字符串字典并回填其偏移，返回底层输出。
    pub fn finish(mut self) -> Result<W> {
        if let Some(block) = self.open.last() {
            return Err(SerializationError::SerializationFailed(format!(
                "{:?} block left open at offset {}",
                block.kind, block.start
            )));
        }
        let dictionary_offset = self.position()? - self.origin;
        self.sink
            .write_u32::<NativeEndian>(self.strings.len() as u32)
            .map_err(SerializationError::write)?;
        for value in &self.strings {
            self.sink
                .write_u32::<NativeEndian>(value.len() as u32)
                .map_err(SerializationError::write)?;
            self.sink
                .write_all(value.as_bytes())
                .map_err(SerializationError::write)?;
        }
        let end = self.position()?;
        self.seek(self.origin + 4)?;
        self.sink
            .write_u64::<NativeEndian>(dictionary_offset)
            .map_err(SerializationError::write)?;
        self.seek(end)?;
        self.sink.flush().map_err(SerializationError::write)?;
        trace!(
            strings = self.strings.len(),
            bytes = end - self.origin,
            "二进制写入完成"
        );
        Ok(self.sink)
    }

    /// 当前嵌套深度。
    #[inline]
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    fn position(&mut self) -> Result<u64> {
        self.sink
            .stream_position()
            .map_err(SerializationError::write)
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.sink
            .seek(SeekFrom::Start(offset))
            .map_err(SerializationError::write)?;
        Ok(())
    }

    fn intern(&mut self, value: &str) -> Result<i32> {
        if let Some(id) = self.dictionary.get(value) {
            return Ok(*id);
        }
        let id = i32::try_from(self.strings.len()).map_err(|_| {
            SerializationError::SerializationFailed("string dictionary overflow".into())
        })?;
        self.strings.push(value.to_owned());
        self.dictionary.insert(value.to_owned(), id);
        Ok(id)
    }

    fn write_tag(&mut self, kind: ContainerType) -> Result<()> {
        self.sink
            .write_u8(kind as u8)
            .map_err(SerializationError::write)
    }

    fn open_block(&mut self, header: ContainerHeader, name: &str) -> Result<()> {
        let id = self.intern(name)?;
        let start = self.position()?;
        self.write_tag(header.kind)?;
        self.sink
            .write_i32::<NativeEndian>(header.block_size)
            .map_err(SerializationError::write)?;
        self.sink
            .write_i32::<NativeEndian>(header.list_count)
            .map_err(SerializationError::write)?;
        self.sink
            .write_i32::<NativeEndian>(id)
            .map_err(SerializationError::write)?;
        self.open.push(OpenBlock {
            kind: header.kind,
            start,
        });
        Ok(())
    }

    /// 弹出与 `kind` 匹配的块，回填其 `block_size` 后回到块尾。
    fn close_block(&mut self, kind: ContainerType) -> Result<()> {
        let block = match self.open.last() {
            Some(block) if block.kind == kind => *block,
            Some(block) => {
                return Err(SerializationError::SerializationFailed(format!(
                    "closing {kind:?} while {:?} is open",
                    block.kind
                )));
            }
            None => {
                return Err(SerializationError::SerializationFailed(format!(
                    "closing {kind:?} with no open block"
                )));
            }
        };
        self.open.pop();
        let end = self.position()?;
        let block_size = i32::try_from(end - (block.start + ContainerHeader::SIZE))
            .map_err(|_| SerializationError::SerializationFailed("block too large".into()))?;
        self.seek(block.start + 1)?;
        self.sink
            .write_i32::<NativeEndian>(block_size)
            .map_err(SerializationError::write)?;
        self.seek(end)?;
        Ok(())
    }

    fn write_complex(&mut self, kind: ComplexType, payload: &[u8]) -> Result<()> {
        let size = i32::try_from(payload.len())
            .map_err(|_| SerializationError::SerializationFailed("blob too large".into()))?;
        self.write_tag(ContainerType::Complex)?;
        self.sink
            .write_u8(kind as u8)
            .map_err(SerializationError::write)?;
        self.sink
            .write_i32::<NativeEndian>(size)
            .map_err(SerializationError::write)?;
        self.sink
            .write_all(payload)
            .map_err(SerializationError::write)
    }
}

impl BinarySerializer<Cursor<Vec<u8>>> {
    /// 写入内存缓冲，适用于不可寻址的输出。
    pub fn in_memory(version: FormatVersion) -> Result<Self> {
        Self::new(Cursor::new(Vec::new()), version)
    }

    /// 完成写入并把整个缓冲一次性拷到 `sink`。
    pub fn finish_into<S: Write>(self, mut sink: S) -> Result<S> {
        let buffer = self.finish()?.into_inner();
        sink.write_all(&buffer).map_err(SerializationError::write)?;
        sink.flush().map_err(SerializationError::write)?;
        Ok(sink)
    }
}

impl<W: Write + Seek> Serializer for BinarySerializer<W> {
    #[inline]
    fn version(&self) -> FormatVersion {
        self.version
    }

    fn serialize_value(&mut self, value: ScalarValue, _name: &str) -> Result<()> {
        self.write_tag(value.kind())?;
        let sink = &mut self.sink;
        let written = match value {
            ScalarValue::Bool(v) => sink.write_u8(u8::from(v)),
            ScalarValue::Int(v) | ScalarValue::Long(v) => sink.write_i32::<NativeEndian>(v),
            ScalarValue::UnsignedInt(v) | ScalarValue::UnsignedLong(v) => {
                sink.write_u32::<NativeEndian>(v)
            }
            ScalarValue::Short(v) => sink.write_i16::<NativeEndian>(v),
            ScalarValue::UnsignedShort(v) => sink.write_u16::<NativeEndian>(v),
            ScalarValue::LongLong(v) => sink.write_i64::<NativeEndian>(v),
            ScalarValue::UnsignedLongLong(v) => sink.write_u64::<NativeEndian>(v),
            ScalarValue::Float(v) => sink.write_f32::<NativeEndian>(v),
            ScalarValue::Double(v) => sink.write_f64::<NativeEndian>(v),
            ScalarValue::UnsignedChar(v) => sink.write_u8(v),
            ScalarValue::Char(v) => sink.write_i8(v),
        };
        written.map_err(SerializationError::write)
    }

    fn serialize_string(&mut self, value: &str, _name: &str) -> Result<()> {
        let id = self.intern(value)?;
        self.write_complex(ComplexType::String, &id.to_ne_bytes())
    }

    fn serialize_bytes(&mut self, value: &[u8], _name: &str) -> Result<()> {
        self.write_complex(ComplexType::Bytes, value)
    }

    fn save_null(&mut self, _name: &str) -> Result<()> {
        self.write_tag(ContainerType::Null)
    }

    fn start_chapter(&mut self, name: &str) -> Result<()> {
        if !self.open.is_empty() {
            return Err(SerializationError::SerializationFailed(format!(
                "chapter {name} must be top level"
            )));
        }
        trace!(chapter = name, "开始写章节");
        self.open_block(ContainerHeader::new(ContainerType::Chapter, 0), name)
    }

    fn end_chapter(&mut self) -> Result<()> {
        self.close_block(ContainerType::Chapter)
    }

    fn start_container(&mut self, name: &str) -> Result<()> {
        self.open_block(ContainerHeader::new(ContainerType::Object, 0), name)
    }

    fn end_container(&mut self) -> Result<()> {
        self.close_block(ContainerType::Object)
    }

    fn start_list(&mut self, name: &str, count: usize) -> Result<()> {
        let count = i32::try_from(count)
            .map_err(|_| SerializationError::SerializationFailed(format!("list {name} too long")))?;
        self.open_block(ContainerHeader::new(ContainerType::List, count), name)
    }

    fn end_list(&mut self) -> Result<()> {
        self.close_block(ContainerType::List)
    }

    fn bookmark(&mut self) -> Result<Bookmark> {
        if self
            .open
            .iter()
            .any(|block| block.kind != ContainerType::Chapter)
        {
            return Err(SerializationError::InvalidBookmark(
                "bookmarks are only taken between top-level blocks".into(),
            ));
        }
        Ok(Bookmark(self.position()? - self.origin))
    }
}

impl<W: Write + Seek> std::fmt::Debug for BinarySerializer<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinarySerializer")
            .field("version", &self.version)
            .field("depth", &self.open.len())
            .field("strings", &self.strings.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FILE_HEADER_SIZE;

    fn read_i32(bytes: &[u8], at: usize) -> i32 {
        i32::from_ne_bytes(bytes[at..at + 4].try_into().unwrap())
    }

    #[test]
    fn header_and_block_size_are_backpatched() {
        let mut writer = BinarySerializer::in_memory(FormatVersion::V2_3).unwrap();
        writer.start_chapter("map").unwrap();
        writer.serialize_i32(7, "value").unwrap();
        writer.end_chapter().unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let version = f32::from_ne_bytes(bytes[0..4].try_into().unwrap());
        assert!((version - 2.3).abs() < 1e-6);
        let start = FILE_HEADER_SIZE as usize;
        assert_eq!(bytes[start], ContainerType::Chapter as u8);
        // 名称编号 4 字节 + Int 标量 5 字节
        assert_eq!(read_i32(&bytes, start + 1), 9);
        let dictionary = u64::from_ne_bytes(bytes[4..12].try_into().unwrap()) as usize;
        assert_eq!(dictionary, start + 9 + 9);
    }

    #[test]
    fn repeated_strings_share_one_dictionary_entry() {
        let mut writer = BinarySerializer::in_memory(FormatVersion::V2_3).unwrap();
        writer.start_chapter("names").unwrap();
        for _ in 0..5 {
            writer.serialize_string("roads", "layer").unwrap();
        }
        writer.end_chapter().unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        let dictionary = u64::from_ne_bytes(bytes[4..12].try_into().unwrap()) as usize;
        assert_eq!(read_i32(&bytes, dictionary), 2);
    }

    #[test]
    fn mismatched_and_unclosed_blocks_fail() {
        let mut writer = BinarySerializer::in_memory(FormatVersion::V2_0).unwrap();
        writer.start_chapter("a").unwrap();
        assert!(writer.start_chapter("b").is_err());
        writer.start_list("items", 0).unwrap();
        assert!(matches!(
            writer.end_container(),
            Err(SerializationError::SerializationFailed(_))
        ));
        assert!(matches!(
            writer.bookmark(),
            Err(SerializationError::InvalidBookmark(_))
        ));
        assert!(writer.finish().is_err());
    }
}
