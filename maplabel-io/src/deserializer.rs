use std::io::{Read, Seek, SeekFrom};

use byteorder::{NativeEndian, ReadBytesExt};
use tracing::debug;

use crate::format::{
    Bookmark, ComplexType, ComplexTypeHeader, ContainerHeader, ContainerType, FILE_HEADER_SIZE,
    FormatVersion, ScalarValue,
};
use crate::{Result, SerializationError};

/// 读取侧协议，与 [`crate::Serializer`] 对称。
///
/// 按名字进入对象时会跳过名字不符的块，旧版本读取器因此能越过
/// 新版本写入的未知对象。
pub trait Deserializer {
    fn version(&self) -> FormatVersion;

    /// 读取下一个标量。类型标记必须与 `expected` 一致；
    /// 文件中存的是可扩展的较窄类型时返回 `NotImplemented`。
    fn deserialize_value(&mut self, expected: ContainerType, name: &str) -> Result<ScalarValue>;
    fn deserialize_string(&mut self, name: &str) -> Result<String>;
    fn deserialize_bytes(&mut self, name: &str) -> Result<Vec<u8>>;
    /// 下一个块是否为空值，不移动读取位置。
    fn is_null(&mut self) -> Result<bool>;
    fn read_null(&mut self, name: &str) -> Result<()>;

    fn enter_chapter(&mut self, name: &str) -> Result<()>;
    fn leave_chapter(&mut self) -> Result<()>;

    fn enter_nested_object(&mut self, name: &str) -> Result<()>;
    fn leave_nested_object(&mut self) -> Result<()>;
    /// 进入当前位置之后的第一个对象并返回其名字；没有更多对象时返回 `None`。
    fn enter_first_nested_object(&mut self) -> Result<Option<String>>;
    /// 离开由上一次迭代进入的对象，再进入下一个。
    fn enter_next_nested_object(&mut self) -> Result<Option<String>>;
    /// 跳过下一个对象块，返回其名字。
    fn skip_nested_object(&mut self) -> Result<String>;

    /// 进入列表并返回元素个数。
    fn enter_list(&mut self, name: &str) -> Result<usize>;
    fn enter_first_list_item(&mut self) -> Result<bool>;
    fn enter_next_list_item(&mut self) -> Result<bool>;
    fn leave_list(&mut self) -> Result<()>;
    /// 跳过下一个列表块，返回其名字。
    fn skip_list(&mut self) -> Result<String>;

    fn bookmark(&mut self) -> Result<Bookmark>;
    /// 只能在顶层（打开的块全是章节）跳转，且目标必须落在当前章节内。
    fn jump_to_bookmark(&mut self, bookmark: Bookmark) -> Result<()>;

    fn deserialize_bool(&mut self, name: &str) -> Result<bool> {
        match self.deserialize_value(ContainerType::Bool, name)? {
            ScalarValue::Bool(value) => Ok(value),
            other => Err(unexpected(name, other)),
        }
    }

    fn deserialize_u8(&mut self, name: &str) -> Result<u8> {
        match self.deserialize_value(ContainerType::UnsignedChar, name)? {
            ScalarValue::UnsignedChar(value) => Ok(value),
            other => Err(unexpected(name, other)),
        }
    }

    fn deserialize_i32(&mut self, name: &str) -> Result<i32> {
        match self.deserialize_value(ContainerType::Int, name)? {
            ScalarValue::Int(value) => Ok(value),
            other => Err(unexpected(name, other)),
        }
    }

    fn deserialize_u32(&mut self, name: &str) -> Result<u32> {
        match self.deserialize_value(ContainerType::UnsignedInt, name)? {
            ScalarValue::UnsignedInt(value) => Ok(value),
            other => Err(unexpected(name, other)),
        }
    }

    fn deserialize_i64(&mut self, name: &str) -> Result<i64> {
        match self.deserialize_value(ContainerType::LongLong, name)? {
            ScalarValue::LongLong(value) => Ok(value),
            other => Err(unexpected(name, other)),
        }
    }

    fn deserialize_u64(&mut self, name: &str) -> Result<u64> {
        match self.deserialize_value(ContainerType::UnsignedLongLong, name)? {
            ScalarValue::UnsignedLongLong(value) => Ok(value),
            other => Err(unexpected(name, other)),
        }
    }

    fn deserialize_f32(&mut self, name: &str) -> Result<f32> {
        match self.deserialize_value(ContainerType::Float, name)? {
            ScalarValue::Float(value) => Ok(value),
            other => Err(unexpected(name, other)),
        }
    }

    fn deserialize_f64(&mut self, name: &str) -> Result<f64> {
        match self.deserialize_value(ContainerType::Double, name)? {
            ScalarValue::Double(value) => Ok(value),
            other => Err(unexpected(name, other)),
        }
    }
}

fn unexpected(name: &str, value: ScalarValue) -> SerializationError {
    SerializationError::corrupt(format!("{name}: unexpected {:?}", value.kind()))
}

#[derive(Debug, Clone)]
struct Frame {
    kind: ContainerType,
    name: String,
    body_start: u64,
    end: u64,
    /// 由 `enter_first_*`/`enter_next_*` 进入。
    iterated: bool,
}

/// 二进制读取器。打开时先校验版本并载入字符串字典，再定位到正文。
pub struct BinaryDeserializer<R: Read + Seek> {
    source: R,
    version: FormatVersion,
    origin: u64,
    body_end: u64,
    strings: Vec<String>,
    frames: Vec<Frame>,
}

struct BlockStart {
    header: ContainerHeader,
    name: String,
    body_start: u64,
    end: u64,
}

impl<R: Read + Seek> BinaryDeserializer<R> {
    pub fn open(mut source: R) -> Result<Self> {
        let origin = source.stream_position().map_err(SerializationError::read)?;
        let file_end = source
            .seek(SeekFrom::End(0))
            .map_err(SerializationError::read)?;
        source
            .seek(SeekFrom::Start(origin))
            .map_err(SerializationError::read)?;

        let raw_version = source
            .read_f32::<NativeEndian>()
            .map_err(SerializationError::read)?;
        let version = FormatVersion::from_f32(raw_version)?;
        let dictionary_offset = source
            .read_u64::<NativeEndian>()
            .map_err(SerializationError::read)?;
        let body_end = origin + dictionary_offset;
        if dictionary_offset < FILE_HEADER_SIZE || body_end > file_end {
            return Err(SerializationError::corrupt(format!(
                "dictionary offset {dictionary_offset} outside file"
            )));
        }

        source
            .seek(SeekFrom::Start(body_end))
            .map_err(SerializationError::read)?;
        let count = source
            .read_u32::<NativeEndian>()
            .map_err(SerializationError::read)?;
        let mut strings = Vec::new();
        for _ in 0..count {
            let len = source
                .read_u32::<NativeEndian>()
                .map_err(SerializationError::read)? as u64;
            let position = source.stream_position().map_err(SerializationError::read)?;
            if position + len > file_end {
                return Err(SerializationError::corrupt("dictionary entry past end of file"));
            }
            let mut bytes = vec![0; len as usize];
            source
                .read_exact(&mut bytes)
                .map_err(SerializationError::read)?;
            let value = String::from_utf8(bytes)
                .map_err(|_| SerializationError::corrupt("dictionary entry is not utf-8"))?;
            strings.push(value);
        }

        source
            .seek(SeekFrom::Start(origin + FILE_HEADER_SIZE))
            .map_err(SerializationError::read)?;
        debug!(
            version = %version,
            strings = strings.len(),
            "打开二进制地图"
        );
        Ok(Self {
            source,
            version,
            origin,
            body_end,
            strings,
            frames: Vec::new(),
        })
    }

    pub fn into_inner(self) -> R {
        self.source
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// 当前所在块的名字，顶层时为 `None`。
    pub fn current_block(&self) -> Option<&str> {
        self.frames.last().map(|frame| frame.name.as_str())
    }

    fn position(&mut self) -> Result<u64> {
        self.source
            .stream_position()
            .map_err(SerializationError::read)
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.source
            .seek(SeekFrom::Start(offset))
            .map_err(SerializationError::read)?;
        Ok(())
    }

    fn current_end(&self) -> u64 {
        self.frames
            .last()
            .map(|frame| frame.end)
            .unwrap_or(self.body_end)
    }

    fn current_start(&self) -> u64 {
        self.frames
            .last()
            .map(|frame| frame.body_start)
            .unwrap_or(self.origin + FILE_HEADER_SIZE)
    }

    fn string(&self, id: i32) -> Result<String> {
        usize::try_from(id)
            .ok()
            .and_then(|index| self.strings.get(index))
            .cloned()
            .ok_or_else(|| SerializationError::corrupt(format!("unknown string id {id}")))
    }

    fn read_tag(&mut self) -> Result<ContainerType> {
        let tag = self.source.read_u8().map_err(SerializationError::read)?;
        ContainerType::from_u8(tag)
            .ok_or_else(|| SerializationError::corrupt(format!("unknown block tag {tag}")))
    }

    /// 查看下一个块的类型；已到当前块末尾时返回 `None`。
    fn peek_tag(&mut self) -> Result<Option<ContainerType>> {
        let position = self.position()?;
        if position >= self.current_end() {
            return Ok(None);
        }
        let tag = self.read_tag()?;
        self.seek(position)?;
        Ok(Some(tag))
    }

    /// 读完整个容器块头（含名称编号），并校验块尾不越过外层块。
    fn read_block_start(&mut self) -> Result<BlockStart> {
        let start = self.position()?;
        let kind = self.read_tag()?;
        if !kind.is_container() {
            return Err(SerializationError::corrupt(format!(
                "expected container, found {kind:?}"
            )));
        }
        let block_size = self
            .source
            .read_i32::<NativeEndian>()
            .map_err(SerializationError::read)?;
        let list_count = self
            .source
            .read_i32::<NativeEndian>()
            .map_err(SerializationError::read)?;
        if block_size < 4 || list_count < 0 {
            return Err(SerializationError::corrupt(format!(
                "bad container header at {start}"
            )));
        }
        let end = start + ContainerHeader::SIZE + block_size as u64;
        if end > self.current_end() {
            return Err(SerializationError::corrupt(format!(
                "container at {start} overruns its parent"
            )));
        }
        let id = self
            .source
            .read_i32::<NativeEndian>()
            .map_err(SerializationError::read)?;
        let name = self.string(id)?;
        Ok(BlockStart {
            header: ContainerHeader {
                kind,
                block_size,
                list_count,
            },
            name,
            body_start: start + ContainerHeader::SIZE + 4,
            end,
        })
    }

    fn push(&mut self, block: BlockStart, iterated: bool) {
        self.frames.push(Frame {
            kind: block.header.kind,
            name: block.name,
            body_start: block.body_start,
            end: block.end,
            iterated,
        });
    }

    /// 跳过当前位置的一个完整块（任意类型）。
    fn skip_block(&mut self) -> Result<()> {
        let start = self.position()?;
        let kind = self.read_tag()?;
        let end = if kind.is_container() {
            let block_size = self
                .source
                .read_i32::<NativeEndian>()
                .map_err(SerializationError::read)?;
            if block_size < 0 {
                return Err(SerializationError::corrupt("negative block size"));
            }
            start + ContainerHeader::SIZE + block_size as u64
        } else if kind == ContainerType::Complex {
            let header = self.read_complex_header()?;
            start + 1 + ComplexTypeHeader::SIZE + header.size as u64
        } else {
            start + 1 + kind.scalar_size().unwrap_or(0) as u64
        };
        if end > self.current_end() {
            return Err(SerializationError::corrupt(format!(
                "block at {start} overruns its parent"
            )));
        }
        self.seek(end)
    }

    fn read_complex_header(&mut self) -> Result<ComplexTypeHeader> {
        let tag = self.source.read_u8().map_err(SerializationError::read)?;
        let kind = ComplexType::from_u8(tag)
            .ok_or_else(|| SerializationError::corrupt(format!("unknown complex type {tag}")))?;
        let size = self
            .source
            .read_i32::<NativeEndian>()
            .map_err(SerializationError::read)?;
        if size < 0 {
            return Err(SerializationError::corrupt("negative blob size"));
        }
        Ok(ComplexTypeHeader { kind, size })
    }

    fn read_complex(&mut self, expected: ComplexType, name: &str) -> Result<Vec<u8>> {
        self.ensure_remaining(name)?;
        let kind = self.read_tag()?;
        if kind != ContainerType::Complex {
            return Err(SerializationError::corrupt(format!(
                "{name}: expected {expected:?}, found {kind:?}"
            )));
        }
        let header = self.read_complex_header()?;
        if header.kind != expected {
            return Err(SerializationError::corrupt(format!(
                "{name}: expected {expected:?}, found {:?}",
                header.kind
            )));
        }
        let position = self.position()?;
        if position + header.size as u64 > self.current_end() {
            return Err(SerializationError::corrupt(format!("{name}: blob overruns block")));
        }
        let mut bytes = vec![0; header.size as usize];
        self.source
            .read_exact(&mut bytes)
            .map_err(SerializationError::read)?;
        Ok(bytes)
    }

    fn ensure_remaining(&mut self, name: &str) -> Result<()> {
        if self.position()? >= self.current_end() {
            return Err(SerializationError::corrupt(format!(
                "{name}: no more values in block"
            )));
        }
        Ok(())
    }

    /// 在当前块内向前找下一个对象，途中跳过其它块。
    fn enter_next_object_here(
        &mut self,
        wanted: Option<&str>,
        iterated: bool,
    ) -> Result<Option<String>> {
        while let Some(kind) = self.peek_tag()? {
            if kind != ContainerType::Object {
                self.skip_block()?;
                continue;
            }
            let block = self.read_block_start()?;
            if wanted.is_none_or(|wanted| wanted == block.name) {
                let name = block.name.clone();
                self.push(block, iterated);
                return Ok(Some(name));
            }
            debug!(object = %block.name, "跳过未识别的对象块");
            self.seek(block.end)?;
        }
        Ok(None)
    }

    fn leave(&mut self, kind: ContainerType) -> Result<()> {
        match self.frames.last() {
            Some(frame) if frame.kind == kind => {
                let end = frame.end;
                self.frames.pop();
                self.seek(end)
            }
            Some(frame) => Err(SerializationError::corrupt(format!(
                "leaving {kind:?} while inside {:?} {}",
                frame.kind, frame.name
            ))),
            None => Err(SerializationError::corrupt(format!(
                "leaving {kind:?} at top level"
            ))),
        }
    }

    fn skip_next(&mut self, kind: ContainerType) -> Result<String> {
        match self.peek_tag()? {
            Some(found) if found == kind => {
                let block = self.read_block_start()?;
                self.seek(block.end)?;
                Ok(block.name)
            }
            Some(found) => Err(SerializationError::corrupt(format!(
                "expected {kind:?} to skip, found {found:?}"
            ))),
            None => Err(SerializationError::corrupt(format!(
                "no {kind:?} left to skip"
            ))),
        }
    }

    fn at_top_level(&self) -> bool {
        self.frames
            .iter()
            .all(|frame| frame.kind == ContainerType::Chapter)
    }
}

impl<R: Read + Seek> Deserializer for BinaryDeserializer<R> {
    #[inline]
    fn version(&self) -> FormatVersion {
        self.version
    }

    fn deserialize_value(&mut self, expected: ContainerType, name: &str) -> Result<ScalarValue> {
        self.ensure_remaining(name)?;
        let found = self.read_tag()?;
        if found != expected {
            return Err(if found.widens_to(expected) {
                SerializationError::NotImplemented(format!(
                    "{name}: widening {found:?} to {expected:?}"
                ))
            } else {
                SerializationError::corrupt(format!(
                    "{name}: expected {expected:?}, found {found:?}"
                ))
            });
        }
        let source = &mut self.source;
        let value = match expected {
            ContainerType::Bool => source.read_u8().map(|v| ScalarValue::Bool(v != 0)),
            ContainerType::Int => source.read_i32::<NativeEndian>().map(ScalarValue::Int),
            ContainerType::UnsignedInt => source
                .read_u32::<NativeEndian>()
                .map(ScalarValue::UnsignedInt),
            ContainerType::Short => source.read_i16::<NativeEndian>().map(ScalarValue::Short),
            ContainerType::UnsignedShort => source
                .read_u16::<NativeEndian>()
                .map(ScalarValue::UnsignedShort),
            ContainerType::Long => source.read_i32::<NativeEndian>().map(ScalarValue::Long),
            ContainerType::UnsignedLong => source
                .read_u32::<NativeEndian>()
                .map(ScalarValue::UnsignedLong),
            ContainerType::LongLong => source.read_i64::<NativeEndian>().map(ScalarValue::LongLong),
            ContainerType::UnsignedLongLong => source
                .read_u64::<NativeEndian>()
                .map(ScalarValue::UnsignedLongLong),
            ContainerType::Float => source.read_f32::<NativeEndian>().map(ScalarValue::Float),
            ContainerType::Double => source.read_f64::<NativeEndian>().map(ScalarValue::Double),
            ContainerType::UnsignedChar => source.read_u8().map(ScalarValue::UnsignedChar),
            ContainerType::Char => source.read_i8().map(ScalarValue::Char),
            other => {
                return Err(SerializationError::corrupt(format!(
                    "{name}: {other:?} is not a scalar"
                )));
            }
        };
        value.map_err(SerializationError::read)
    }

    fn deserialize_string(&mut self, name: &str) -> Result<String> {
        let bytes = self.read_complex(ComplexType::String, name)?;
        let id: [u8; 4] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| SerializationError::corrupt(format!("{name}: bad string reference")))?;
        self.string(i32::from_ne_bytes(id))
    }

    fn deserialize_bytes(&mut self, name: &str) -> Result<Vec<u8>> {
        self.read_complex(ComplexType::Bytes, name)
    }

    fn is_null(&mut self) -> Result<bool> {
        Ok(self.peek_tag()? == Some(ContainerType::Null))
    }

    fn read_null(&mut self, name: &str) -> Result<()> {
        self.ensure_remaining(name)?;
        match self.read_tag()? {
            ContainerType::Null => Ok(()),
            other => Err(SerializationError::corrupt(format!(
                "{name}: expected null, found {other:?}"
            ))),
        }
    }

    fn enter_chapter(&mut self, name: &str) -> Result<()> {
        if !self.frames.is_empty() {
            return Err(SerializationError::corrupt(format!(
                "chapter {name} requested inside {}",
                self.frames.iter().map(|f| f.name.as_str()).collect::<Vec<_>>().join("/")
            )));
        }
        let resume = self.position()?;
        // 从当前位置向后找，到正文末尾后回绕一次。
        for (from, until) in [
            (resume, self.body_end),
            (self.origin + FILE_HEADER_SIZE, resume),
        ] {
            self.seek(from)?;
            while self.position()? < until {
                let block = self.read_block_start()?;
                if block.header.kind == ContainerType::Chapter && block.name == name {
                    self.push(block, false);
                    return Ok(());
                }
                self.seek(block.end)?;
            }
        }
        self.seek(resume)?;
        Err(SerializationError::corrupt(format!("chapter {name} not found")))
    }

    fn leave_chapter(&mut self) -> Result<()> {
        self.leave(ContainerType::Chapter)
    }

    fn enter_nested_object(&mut self, name: &str) -> Result<()> {
        match self.enter_next_object_here(Some(name), false)? {
            Some(_) => Ok(()),
            None => Err(SerializationError::corrupt(format!("object {name} not found"))),
        }
    }

    fn leave_nested_object(&mut self) -> Result<()> {
        self.leave(ContainerType::Object)
    }

    fn enter_first_nested_object(&mut self) -> Result<Option<String>> {
        self.enter_next_object_here(None, true)
    }

    fn enter_next_nested_object(&mut self) -> Result<Option<String>> {
        match self.frames.last() {
            Some(frame) if frame.kind == ContainerType::Object && frame.iterated => {
                self.leave(ContainerType::Object)?;
                self.enter_next_object_here(None, true)
            }
            _ => Err(SerializationError::corrupt(
                "enter_next_nested_object without a current object",
            )),
        }
    }

    fn skip_nested_object(&mut self) -> Result<String> {
        self.skip_next(ContainerType::Object)
    }

    fn enter_list(&mut self, name: &str) -> Result<usize> {
        while let Some(kind) = self.peek_tag()? {
            if kind != ContainerType::List {
                return Err(SerializationError::corrupt(format!(
                    "list {name}: found {kind:?}"
                )));
            }
            let block = self.read_block_start()?;
            if block.name == name {
                let count = block.header.list_count as usize;
                self.push(block, false);
                return Ok(count);
            }
            debug!(list = %block.name, "跳过未识别的列表块");
            self.seek(block.end)?;
        }
        Err(SerializationError::corrupt(format!("list {name} not found")))
    }

    fn enter_first_list_item(&mut self) -> Result<bool> {
        match self.frames.last() {
            Some(frame) if frame.kind == ContainerType::List => {
                Ok(self.enter_next_object_here(None, true)?.is_some())
            }
            _ => Err(SerializationError::corrupt("list item requested outside a list")),
        }
    }

    fn enter_next_list_item(&mut self) -> Result<bool> {
        let in_item = self.frames.len() >= 2
            && self.frames[self.frames.len() - 1].iterated
            && self.frames[self.frames.len() - 2].kind == ContainerType::List;
        if !in_item {
            return Err(SerializationError::corrupt(
                "enter_next_list_item without a current item",
            ));
        }
        self.leave(ContainerType::Object)?;
        Ok(self.enter_next_object_here(None, true)?.is_some())
    }

    fn leave_list(&mut self) -> Result<()> {
        let in_item = self
            .frames
            .last()
            .is_some_and(|frame| frame.kind == ContainerType::Object && frame.iterated);
        if in_item {
            self.leave(ContainerType::Object)?;
        }
        self.leave(ContainerType::List)
    }

    fn skip_list(&mut self) -> Result<String> {
        self.skip_next(ContainerType::List)
    }

    fn bookmark(&mut self) -> Result<Bookmark> {
        if !self.at_top_level() {
            return Err(SerializationError::InvalidBookmark(
                "bookmarks are only taken between top-level blocks".into(),
            ));
        }
        Ok(Bookmark(self.position()? - self.origin))
    }

    fn jump_to_bookmark(&mut self, bookmark: Bookmark) -> Result<()> {
        if !self.at_top_level() {
            return Err(SerializationError::InvalidBookmark(format!(
                "jump to {} from inside an object",
                bookmark.offset()
            )));
        }
        let target = self.origin + bookmark.offset();
        if target < self.current_start() || target > self.current_end() {
            return Err(SerializationError::InvalidBookmark(format!(
                "offset {} outside the current chapter",
                bookmark.offset()
            )));
        }
        let resume = self.position()?;
        self.seek(target)?;
        if target < self.current_end() {
            let tag = self.source.read_u8().map_err(SerializationError::read)?;
            if ContainerType::from_u8(tag).is_none() {
                self.seek(resume)?;
                return Err(SerializationError::InvalidBookmark(format!(
                    "offset {} is not a block boundary",
                    bookmark.offset()
                )));
            }
            self.seek(target)?;
        }
        Ok(())
    }
}

impl<R: Read + Seek> std::fmt::Debug for BinaryDeserializer<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryDeserializer")
            .field("version", &self.version)
            .field("depth", &self.frames.len())
            .field("strings", &self.strings.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::serializer::{BinarySerializer, Serializer};

    fn sample(version: FormatVersion) -> Vec<u8> {
        let mut w = BinarySerializer::in_memory(version).unwrap();
        w.start_chapter("first").unwrap();
        w.serialize_f32(1.5, "value").unwrap();
        w.start_container("future").unwrap();
        w.serialize_i32(99, "unknown").unwrap();
        w.end_container().unwrap();
        w.start_container("known").unwrap();
        w.serialize_string("hello", "text").unwrap();
        w.save_null("nothing").unwrap();
        w.end_container().unwrap();
        w.end_chapter().unwrap();
        w.start_chapter("second").unwrap();
        w.start_list("numbers", 3).unwrap();
        for value in [1i64, 2, 3] {
            w.serialize_i64(value, "n").unwrap();
        }
        w.end_list().unwrap();
        w.end_chapter().unwrap();
        w.finish().unwrap().into_inner()
    }

    #[test]
    fn reads_chapters_out_of_order_and_skips_unknown_objects() {
        let mut r = BinaryDeserializer::open(Cursor::new(sample(FormatVersion::V2_2))).unwrap();
        assert_eq!(r.version(), FormatVersion::V2_2);

        r.enter_chapter("second").unwrap();
        assert_eq!(r.enter_list("numbers").unwrap(), 3);
        let values: Vec<i64> = (0..3).map(|_| r.deserialize_i64("n").unwrap()).collect();
        assert_eq!(values, vec![1, 2, 3]);
        r.leave_list().unwrap();
        r.leave_chapter().unwrap();

        r.enter_chapter("first").unwrap();
        assert_eq!(r.deserialize_f32("value").unwrap(), 1.5);
        r.enter_nested_object("known").unwrap();
        assert_eq!(r.deserialize_string("text").unwrap(), "hello");
        assert!(r.is_null().unwrap());
        r.read_null("nothing").unwrap();
        r.leave_nested_object().unwrap();
        r.leave_chapter().unwrap();
        assert!(r.enter_chapter("missing").is_err());
    }

    #[test]
    fn iterates_nested_objects_by_name() {
        let mut r = BinaryDeserializer::open(Cursor::new(sample(FormatVersion::V2_3))).unwrap();
        r.enter_chapter("first").unwrap();
        assert_eq!(r.enter_first_nested_object().unwrap().as_deref(), Some("future"));
        assert_eq!(r.enter_next_nested_object().unwrap().as_deref(), Some("known"));
        assert_eq!(r.enter_next_nested_object().unwrap(), None);
        assert_eq!(r.depth(), 1);
        r.leave_chapter().unwrap();
    }

    #[test]
    fn widening_is_not_implemented_and_mismatch_fails() {
        let mut r = BinaryDeserializer::open(Cursor::new(sample(FormatVersion::V2_3))).unwrap();
        r.enter_chapter("first").unwrap();
        assert!(matches!(
            r.deserialize_f64("value"),
            Err(SerializationError::NotImplemented(_))
        ));

        let mut r = BinaryDeserializer::open(Cursor::new(sample(FormatVersion::V2_3))).unwrap();
        r.enter_chapter("first").unwrap();
        assert!(matches!(
            r.deserialize_bool("value"),
            Err(SerializationError::DeserializationFailed(_))
        ));
    }

    #[test]
    fn rejects_unknown_versions_and_truncation() {
        let mut bytes = sample(FormatVersion::V2_3);
        bytes[0..4].copy_from_slice(&1.5f32.to_ne_bytes());
        assert!(matches!(
            BinaryDeserializer::open(Cursor::new(bytes)),
            Err(SerializationError::VersionInvalid(_))
        ));

        let bytes = sample(FormatVersion::V2_3);
        let truncated = bytes[..bytes.len() - 3].to_vec();
        assert!(BinaryDeserializer::open(Cursor::new(truncated)).is_err());
        assert!(matches!(
            BinaryDeserializer::open(Cursor::new(vec![0u8; 2])),
            Err(SerializationError::DeserializationFailed(_))
        ));
    }

    #[test]
    fn older_reader_skips_newer_blocks_and_reads_blobs() {
        let mut w = BinarySerializer::in_memory(FormatVersion::V2_3).unwrap();
        w.start_chapter("data").unwrap();
        w.start_container("newer").unwrap();
        w.serialize_f64(2.5, "weight").unwrap();
        w.start_list("parts", 1).unwrap();
        w.serialize_u8(4, "part").unwrap();
        w.end_list().unwrap();
        w.end_container().unwrap();
        w.start_list("newer_list", 2).unwrap();
        for index in 0..2 {
            w.start_container("item").unwrap();
            w.serialize_i32(index, "index").unwrap();
            w.end_container().unwrap();
        }
        w.end_list().unwrap();
        w.serialize_bytes(&[1, 2, 3], "payload").unwrap();
        w.serialize_i32(7, "after").unwrap();
        w.end_chapter().unwrap();
        let bytes = w.finish().unwrap().into_inner();

        let mut r = BinaryDeserializer::open(Cursor::new(bytes)).unwrap();
        r.enter_chapter("data").unwrap();
        assert!(r.skip_list().is_err());
        assert_eq!(r.skip_nested_object().unwrap(), "newer");
        assert!(r.skip_nested_object().is_err());
        assert_eq!(r.skip_list().unwrap(), "newer_list");
        assert_eq!(r.deserialize_bytes("payload").unwrap(), vec![1, 2, 3]);
        assert_eq!(r.deserialize_i32("after").unwrap(), 7);
        assert_eq!(r.depth(), 1);
        r.leave_chapter().unwrap();
    }

    #[test]
    fn bookmarks_only_at_top_level() {
        let mut w = BinarySerializer::in_memory(FormatVersion::V2_3).unwrap();
        w.start_chapter("objects").unwrap();
        let mut marks = Vec::new();
        for index in 0..3 {
            marks.push(w.bookmark().unwrap());
            w.start_container("object").unwrap();
            w.serialize_i32(index, "index").unwrap();
            w.end_container().unwrap();
        }
        w.end_chapter().unwrap();
        let bytes = w.finish().unwrap().into_inner();

        let mut r = BinaryDeserializer::open(Cursor::new(bytes)).unwrap();
        r.enter_chapter("objects").unwrap();
        let mut read_marks = Vec::new();
        loop {
            let mark = r.bookmark().unwrap();
            if r.enter_first_nested_object().unwrap().is_none() {
                break;
            }
            read_marks.push(mark);
            assert!(matches!(r.bookmark(), Err(SerializationError::InvalidBookmark(_))));
            assert!(r.jump_to_bookmark(marks[0]).is_err());
            r.leave_nested_object().unwrap();
        }
        assert_eq!(read_marks, marks);

        r.jump_to_bookmark(marks[2]).unwrap();
        r.enter_nested_object("object").unwrap();
        assert_eq!(r.deserialize_i32("index").unwrap(), 2);
        r.leave_nested_object().unwrap();
        assert!(matches!(
            r.jump_to_bookmark(Bookmark(2)),
            Err(SerializationError::InvalidBookmark(_))
        ));
    }
}
