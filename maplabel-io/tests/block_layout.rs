//! 顺序扫描文件、独立推算每个容器的结尾，并与回填的块大小对照。

mod common;

use std::io::Cursor;

use maplabel_io::{
    BinarySerializer, ComplexTypeHeader, ContainerHeader, ContainerType, FormatVersion, MapFile,
    Serializer,
};

struct Scanner<'a> {
    bytes: &'a [u8],
    at: usize,
    checked: usize,
}

impl Scanner<'_> {
    fn u8(&mut self) -> u8 {
        let value = self.bytes[self.at];
        self.at += 1;
        value
    }

    fn i32(&mut self) -> i32 {
        let value = i32::from_ne_bytes(self.bytes[self.at..self.at + 4].try_into().unwrap());
        self.at += 4;
        value
    }

    fn expect_tag(&mut self, kind: ContainerType) {
        assert_eq!(self.u8(), kind as u8, "tag at {}", self.at - 1);
    }

    fn scalar(&mut self, kind: ContainerType) {
        self.expect_tag(kind);
        self.at += kind.scalar_size().unwrap();
    }

    fn string(&mut self) {
        self.expect_tag(ContainerType::Complex);
        let _kind = self.u8();
        let size = self.i32() as usize;
        self.at += size;
    }

    /// 读块头，返回 (起点, 回填的块大小, 列表个数)。
    fn open(&mut self, kind: ContainerType) -> (usize, i32, i32) {
        let start = self.at;
        self.expect_tag(kind);
        let block_size = self.i32();
        let list_count = self.i32();
        let _name = self.i32();
        (start, block_size, list_count)
    }

    /// 按内容推算出的块尾必须与块头中的大小一致。
    fn close(&mut self, start: usize, block_size: i32) {
        let recomputed = self.at - (start + ContainerHeader::SIZE as usize);
        assert_eq!(block_size as usize, recomputed, "block at {start}");
        self.checked += 1;
    }
}

fn write_items(count: usize) -> Vec<u8> {
    let mut writer = BinarySerializer::in_memory(FormatVersion::CURRENT).unwrap();
    writer.start_chapter("items").unwrap();
    writer.start_list("items", count).unwrap();
    for index in 0..count {
        writer.start_container("item").unwrap();
        writer.serialize_i32(index as i32, "index").unwrap();
        writer
            .serialize_string(&format!("item-{}", index % 3), "label")
            .unwrap();
        writer.start_container("position").unwrap();
        writer.serialize_f32(index as f32, "x").unwrap();
        writer.serialize_f32(-(index as f32), "y").unwrap();
        writer.end_container().unwrap();
        writer.start_list("tags", index % 4).unwrap();
        for tag in 0..index % 4 {
            writer.serialize_u8(tag as u8, "tag").unwrap();
        }
        writer.end_list().unwrap();
        if index % 2 == 0 {
            writer.save_null("extra").unwrap();
        } else {
            writer.serialize_f64(index as f64 * 0.5, "extra").unwrap();
        }
        writer.end_container().unwrap();
    }
    writer.end_list().unwrap();
    writer.end_chapter().unwrap();
    writer.finish().unwrap().into_inner()
}

#[test]
fn block_sizes_match_sequential_scan() {
    const N: usize = 25;
    let bytes = write_items(N);
    let mut scan = Scanner {
        bytes: &bytes,
        at: 12,
        checked: 0,
    };

    let (chapter, chapter_size, _) = scan.open(ContainerType::Chapter);
    let (list, list_size, count) = scan.open(ContainerType::List);
    assert_eq!(count as usize, N);
    for index in 0..N {
        let (item, item_size, _) = scan.open(ContainerType::Object);
        scan.scalar(ContainerType::Int);
        scan.string();
        let (position, position_size, _) = scan.open(ContainerType::Object);
        scan.scalar(ContainerType::Float);
        scan.scalar(ContainerType::Float);
        scan.close(position, position_size);
        let (tags, tags_size, tag_count) = scan.open(ContainerType::List);
        assert_eq!(tag_count as usize, index % 4);
        for _ in 0..tag_count {
            scan.scalar(ContainerType::UnsignedChar);
        }
        scan.close(tags, tags_size);
        if index % 2 == 0 {
            scan.expect_tag(ContainerType::Null);
        } else {
            scan.scalar(ContainerType::Double);
        }
        scan.close(item, item_size);
    }
    scan.close(list, list_size);
    scan.close(chapter, chapter_size);
    assert_eq!(scan.checked, 3 * N + 2);

    let dictionary = u64::from_ne_bytes(bytes[4..12].try_into().unwrap()) as usize;
    assert_eq!(scan.at, dictionary);
}

#[test]
fn string_payload_is_a_dictionary_reference() {
    let bytes = write_items(1);
    // 章节头 13 + 列表头 13 + 对象头 13 + Int 5
    let at = 12 + 13 + 13 + 13 + 5;
    assert_eq!(bytes[at], ContainerType::Complex as u8);
    let size = i32::from_ne_bytes(bytes[at + 2..at + 6].try_into().unwrap());
    assert_eq!(size, 4);
    assert_eq!(ComplexTypeHeader::SIZE, 5);
}

#[test]
fn whole_map_chapters_end_at_the_dictionary() {
    let map = common::sample_map();
    let bytes = MapFile::default()
        .write_to(&map, Cursor::new(Vec::new()))
        .unwrap()
        .into_inner();
    let dictionary = u64::from_ne_bytes(bytes[4..12].try_into().unwrap()) as usize;
    let mut at = 12;
    let mut chapters = 0;
    while at < dictionary {
        assert_eq!(bytes[at], ContainerType::Chapter as u8);
        let size = i32::from_ne_bytes(bytes[at + 1..at + 5].try_into().unwrap()) as usize;
        at += ContainerHeader::SIZE as usize + size;
        chapters += 1;
    }
    assert_eq!(at, dictionary);
    assert_eq!(chapters, 5);
}
