#![allow(dead_code)]

use std::sync::Arc;

use maplabel_core::geometry::{DoublePoint, Point, Polygon, Polyline, Rectangle, UprightRectangle};
use maplabel_core::model::{
    Attribute, AttributeValue, Color, FeatureStyle, Leader, Map, PlacementRule, Shape,
    StringInterner, Stroke, SymbolComponent, TextPart,
};
use maplabel_io::FormatVersion;

/// 两个以上图层、十个以上混合类型要素、带嵌套符号化样式的地图。
pub fn sample_map() -> Map {
    let mut interner = StringInterner::new();
    let mut map = Map::new(
        "harbour",
        UprightRectangle::from_coords(-50.0, -50.0, 250.0, 150.0),
    );

    map.styles.insert(
        "roads".into(),
        FeatureStyle::Line {
            stroke: Stroke {
                color: Color::rgb(240, 200, 80),
                width: 2.5,
            },
            casing: Some(Stroke {
                color: Color::BLACK,
                width: 3.5,
            }),
            dash: vec![6.0, 2.0, 1.0, 2.0],
        },
    );
    map.styles.insert(
        "water".into(),
        FeatureStyle::Area {
            fill: Color {
                r: 80,
                g: 140,
                b: 220,
                a: 180,
            },
            outline: Some(Stroke {
                color: Color::rgb(20, 60, 120),
                width: 0.5,
            }),
            opaque: true,
        },
    );
    map.styles.insert(
        "pois".into(),
        FeatureStyle::Point {
            symbol: "anchor".into(),
            size: 4.0,
            color: Color::rgb(200, 30, 30),
            halo: 1.0,
        },
    );

    let mut roads_rule = PlacementRule::new("road-names");
    roads_rule.overlap_buffer = 0.5;
    roads_rule.proximity_buffer = 2.0;
    roads_rule.allow_leader = true;
    roads_rule
        .allowed_crossing_classes
        .push(interner.intern("water"));
    map.placement_rules.push(roads_rule);
    map.placement_rules.push(PlacementRule::new("poi-names"));

    let road = interner.intern("road");
    let mut road_ids = Vec::new();
    for index in 0..5 {
        let y = index as f32 * 20.0;
        let mut vertices = vec![Point::new(0.0, y), Point::new(60.0, y + 5.0)];
        vertices.push(Point::new(120.0, y - 3.0));
        let id = map.add_feature(
            "roads",
            Arc::clone(&road),
            format!("Road {index}"),
            Some(Shape::Polyline(Polyline::new(vertices).unwrap())),
        );
        road_ids.push(id);
    }
    map.add_feature("roads", Arc::clone(&road), "Unbuilt", None);

    let water = interner.intern("water");
    let lake = Polygon::with_holes(
        vec![
            Point::new(150.0, 0.0),
            Point::new(150.0, 80.0),
            Point::new(230.0, 80.0),
            Point::new(230.0, 0.0),
        ],
        vec![vec![
            Point::new(180.0, 30.0),
            Point::new(200.0, 30.0),
            Point::new(190.0, 50.0),
        ]],
    )
    .unwrap();
    let lake_id = map.add_feature("water", Arc::clone(&water), "Lake", Some(Shape::Polygon(lake)));
    let pond = Polygon::new(vec![
        Point::new(-40.0, -40.0),
        Point::new(-40.0, -20.0),
        Point::new(-20.0, -20.0),
    ])
    .unwrap();
    map.add_feature("water", Arc::clone(&water), "Pond", Some(Shape::Polygon(pond)));

    let poi = interner.intern("poi");
    let mut poi_ids = Vec::new();
    for index in 0..4 {
        let id = map.add_feature(
            "pois",
            Arc::clone(&poi),
            format!("Pier {index}"),
            Some(Shape::Point(Point::new(140.0 + index as f32 * 3.0, 90.0))),
        );
        poi_ids.push(id);
    }

    {
        let layer = map.ensure_layer("pois");
        layer.min_scale = Some(500.0);
        layer.max_scale = Some(25_000.0);
        layer.style = "pois".into();
    }
    map.ensure_layer("water").visible = false;

    if let Some(feature) = map.feature_mut(lake_id) {
        feature.location = Some(DoublePoint::new(10.123456789, 53.987654321));
        feature.attributes = vec![
            Attribute::new("depth", AttributeValue::Double(12.5)),
            Attribute::new("named", AttributeValue::Bool(true)),
        ];
    }
    if let Some(feature) = map.feature_mut(road_ids[0]) {
        feature.attributes = vec![
            Attribute::new("lanes", AttributeValue::Int(4)),
            Attribute::new("surface", AttributeValue::Text("asphalt".into())),
        ];
    }

    for (index, id) in road_ids.iter().enumerate() {
        let y = index as f32 * 20.0;
        let label = map.add_label(
            *id,
            "road-names",
            vec![TextPart {
                text: format!("Road {index}"),
                frame: Rectangle::from_center(Point::new(60.0, y + 8.0), 30.0, 6.0, 0.08),
            }],
        );
        if index == 2 {
            if let Some(label) = map.label_mut(label) {
                label.leader = Some(Leader {
                    anchor: Point::new(60.0, y + 5.0),
                    end: Point::new(70.0, y + 15.0),
                    width: 0.4,
                });
            }
        }
    }
    let pier_label = map.add_label(
        poi_ids[0],
        "poi-names",
        vec![
            TextPart {
                text: "Pier".into(),
                frame: Rectangle::from_upright(&UprightRectangle::from_coords(
                    142.0, 92.0, 150.0, 96.0,
                )),
            },
            TextPart {
                text: "0".into(),
                frame: Rectangle::from_upright(&UprightRectangle::from_coords(
                    151.0, 92.0, 153.0, 96.0,
                )),
            },
        ],
    );
    if let Some(label) = map.label_mut(pier_label) {
        label.symbol_components.push(SymbolComponent {
            symbol: "anchor".into(),
            frame: Rectangle::from_center(Point::new(138.0, 94.0), 3.0, 3.0, 0.0),
        });
    }
    map
}

/// 以旧版本写出时会丢失的字段清零后的期望结果。
pub fn expected_at(map: &Map, version: FormatVersion) -> Map {
    let mut expected = map.clone();
    for layer in expected.layers_mut() {
        if !version.gte(FormatVersion::V2_2) {
            layer.min_scale = None;
            layer.max_scale = None;
        }
        for feature in &mut layer.features {
            if !version.gte(FormatVersion::V2_1) {
                feature.attributes.clear();
            }
            if !version.gte(FormatVersion::V2_3) {
                feature.location = None;
            }
        }
    }
    if !version.gte(FormatVersion::V2_2) {
        for rule in &mut expected.placement_rules {
            rule.proximity_buffer = 0.0;
        }
    }
    if !version.gte(FormatVersion::V2_3) {
        let ids: Vec<_> = expected.labels().iter().map(|label| label.id).collect();
        for id in ids {
            if let Some(label) = expected.label_mut(id) {
                label.symbol_components.clear();
            }
        }
    }
    expected
}

pub fn feature_count(map: &Map) -> usize {
    map.layers().iter().map(|layer| layer.features.len()).sum()
}
