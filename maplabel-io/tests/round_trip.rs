mod common;

use std::io::Cursor;

use maplabel_core::model::{Map, Shape};
use maplabel_io::{FormatVersion, MapFile, MapLoader, MapSaver, SerializationError, SinkMode};
use serde_json::Value;

use common::{expected_at, feature_count, sample_map};

fn as_json(map: &Map) -> Value {
    serde_json::to_value(map).expect("serialize to json")
}

#[test]
fn sample_map_is_representative() {
    let map = sample_map();
    assert!(map.layers().len() >= 2);
    assert!(feature_count(&map) >= 10);
    let kinds: std::collections::HashSet<_> = map
        .features()
        .filter_map(|(_, feature)| feature.shape.as_ref().map(Shape::kind_name))
        .collect();
    assert_eq!(kinds.len(), 3);
}

#[test]
fn map_round_trips_at_every_supported_version() {
    let map = sample_map();
    for version in FormatVersion::SUPPORTED_WRITE {
        let file = MapFile::new(version);
        let bytes = file
            .write_to(&map, Cursor::new(Vec::new()))
            .unwrap()
            .into_inner();
        let restored = file.read_from(Cursor::new(bytes)).unwrap();
        assert_eq!(
            as_json(&restored),
            as_json(&expected_at(&map, version)),
            "round trip at {version}"
        );
    }
}

#[test]
fn older_versions_drop_newer_fields() {
    let map = sample_map();
    let bytes = MapFile::new(FormatVersion::V2_0)
        .write_to(&map, Cursor::new(Vec::new()))
        .unwrap()
        .into_inner();
    let restored = MapFile::default().read_from(Cursor::new(bytes)).unwrap();
    assert!(restored.features().all(|(_, feature)| feature.attributes.is_empty()));
    assert!(restored.features().all(|(_, feature)| feature.location.is_none()));
    assert!(restored.layers().iter().all(|layer| layer.min_scale.is_none()));
    assert!(restored
        .labels()
        .iter()
        .all(|label| label.symbol_components.is_empty()));
}

#[test]
fn buffered_sink_writes_identical_bytes() {
    let map = sample_map();
    let file = MapFile::new(FormatVersion::V2_3);
    let seekable = file
        .write_to(&map, Cursor::new(Vec::new()))
        .unwrap()
        .into_inner();
    let buffered = file.write_buffered(&map, Vec::new()).unwrap();
    assert_eq!(seekable, buffered);
}

#[test]
fn saves_and_loads_through_the_file_system() {
    let dir = tempfile::tempdir().unwrap();
    let map = sample_map();
    for sink in [SinkMode::Seekable, SinkMode::Buffered] {
        let path = dir.path().join(format!("{sink:?}.bin"));
        let file = MapFile::default().with_sink(sink);
        file.save(&map, &path).unwrap();
        let restored = file.load(&path).unwrap();
        assert_eq!(as_json(&restored), as_json(&map));
    }
}

#[test]
fn rejects_wrong_extension_and_missing_files() {
    let dir = tempfile::tempdir().unwrap();
    let map = sample_map();
    let wrong = dir.path().join("map.json");
    assert!(matches!(
        MapFile::default().save(&map, &wrong),
        Err(SerializationError::UnsupportedExtension(_))
    ));
    assert!(matches!(
        MapFile::default().load(&dir.path().join("missing.bin")),
        Err(SerializationError::Open { .. })
    ));
}

#[test]
fn unsupported_version_is_rejected() {
    let mut bytes = MapFile::default()
        .write_to(&sample_map(), Cursor::new(Vec::new()))
        .unwrap()
        .into_inner();
    bytes[0..4].copy_from_slice(&3.0f32.to_ne_bytes());
    assert!(matches!(
        MapFile::default().read_from(Cursor::new(bytes)),
        Err(SerializationError::VersionInvalid(v)) if (v - 3.0).abs() < 1e-6
    ));
}

#[test]
fn truncated_body_fails_to_deserialize() {
    let bytes = MapFile::default()
        .write_to(&sample_map(), Cursor::new(Vec::new()))
        .unwrap()
        .into_inner();
    let dictionary = u64::from_ne_bytes(bytes[4..12].try_into().unwrap()) as usize;
    // 保留字典，只截掉正文末尾的注记章节
    let mut damaged = bytes[..dictionary - 40].to_vec();
    damaged.extend_from_slice(&bytes[dictionary..]);
    let offset = (dictionary - 40) as u64;
    damaged[4..12].copy_from_slice(&offset.to_ne_bytes());
    assert!(MapFile::default().read_from(Cursor::new(damaged)).is_err());
}
