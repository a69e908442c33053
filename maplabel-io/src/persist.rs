//! 地图对象模型的持久化。
//!
//! 每个类型写入自己命名的对象块；新字段按格式版本门控，
//! 写旧版本时直接省略，读旧版本时取默认值。

use std::sync::Arc;

use maplabel_core::geometry::{DoublePoint, Point, Polygon, Polyline, Rectangle, UprightRectangle};
use maplabel_core::model::{
    Attribute, AttributeValue, Color, Feature, FeatureId, FeatureStyle, Label, LabelId, Layer,
    Leader, Map, PlacementRule, Shape, StringInterner, Stroke, SymbolComponent, TextPart,
};

use crate::deserializer::Deserializer;
use crate::format::FormatVersion;
use crate::map_file::FeatureReadingEliminator;
use crate::serializer::Serializer;
use crate::{Result, SerializationError};

/// 可写入、可从读取器重建的类型。
pub trait Persist: Sized {
    fn serialize(&self, serializer: &mut dyn Serializer) -> Result<()>;
    fn deserialize_new(
        deserializer: &mut dyn Deserializer,
        context: &mut ReadContext<'_>,
    ) -> Result<Self>;
}

/// 一次读取过程的共享状态：类别字符串驻留表与可选的要素淘汰器。
pub struct ReadContext<'a> {
    pub interner: StringInterner,
    eliminator: Option<&'a dyn FeatureReadingEliminator>,
    eliminated: usize,
}

impl<'a> ReadContext<'a> {
    pub fn new() -> Self {
        Self {
            interner: StringInterner::new(),
            eliminator: None,
            eliminated: 0,
        }
    }

    pub fn with_eliminator(eliminator: &'a dyn FeatureReadingEliminator) -> Self {
        Self {
            eliminator: Some(eliminator),
            ..Self::new()
        }
    }

    /// 被淘汰器丢弃的要素个数。
    #[inline]
    pub fn eliminated(&self) -> usize {
        self.eliminated
    }

    fn should_eliminate(&mut self, header: &FeatureHeader) -> bool {
        let eliminate = self
            .eliminator
            .is_some_and(|eliminator| eliminator.eliminate(header));
        if eliminate {
            self.eliminated += 1;
        }
        eliminate
    }
}

impl Default for ReadContext<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// 要素的身份部分，读完它之后才决定是否读取几何。
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureHeader {
    pub layer: String,
    pub id: FeatureId,
    pub class: Arc<str>,
    pub name: String,
}

const FEATURE: &str = "feature";
const SHAPE: &str = "shape";

fn pack_color(color: Color) -> u32 {
    u32::from_be_bytes([color.r, color.g, color.b, color.a])
}

fn unpack_color(value: u32) -> Color {
    let [r, g, b, a] = value.to_be_bytes();
    Color { r, g, b, a }
}

fn write_point(serializer: &mut dyn Serializer, point: Point) -> Result<()> {
    serializer.serialize_f32(point.x(), "x")?;
    serializer.serialize_f32(point.y(), "y")
}

fn read_point(deserializer: &mut dyn Deserializer) -> Result<Point> {
    let x = deserializer.deserialize_f32("x")?;
    let y = deserializer.deserialize_f32("y")?;
    Ok(Point::new(x, y))
}

fn write_points(serializer: &mut dyn Serializer, name: &str, points: &[Point]) -> Result<()> {
    serializer.start_list(name, points.len())?;
    for point in points {
        write_point(serializer, *point)?;
    }
    serializer.end_list()
}

fn read_points(deserializer: &mut dyn Deserializer, name: &str) -> Result<Vec<Point>> {
    let count = deserializer.enter_list(name)?;
    let mut points = Vec::new();
    points
        .try_reserve(count)
        .map_err(|err| SerializationError::corrupt(format!("{name}: {err}")))?;
    for _ in 0..count {
        points.push(read_point(deserializer)?);
    }
    deserializer.leave_list()?;
    Ok(points)
}

fn write_rectangle(serializer: &mut dyn Serializer, frame: &Rectangle) -> Result<()> {
    for corner in frame.corners() {
        write_point(serializer, *corner)?;
    }
    Ok(())
}

fn read_rectangle(deserializer: &mut dyn Deserializer) -> Result<Rectangle> {
    let mut corners = [Point::ORIGIN; 4];
    for corner in &mut corners {
        *corner = read_point(deserializer)?;
    }
    Ok(Rectangle::from_corners(corners))
}

fn write_optional_f64(serializer: &mut dyn Serializer, value: Option<f64>, name: &str) -> Result<()> {
    match value {
        Some(value) => serializer.serialize_f64(value, name),
        None => serializer.save_null(name),
    }
}

fn read_optional_f64(deserializer: &mut dyn Deserializer, name: &str) -> Result<Option<f64>> {
    if deserializer.is_null()? {
        deserializer.read_null(name)?;
        Ok(None)
    } else {
        deserializer.deserialize_f64(name).map(Some)
    }
}

/// 空值或一个对象。
fn write_optional<T: Persist>(
    serializer: &mut dyn Serializer,
    value: Option<&T>,
    name: &str,
) -> Result<()> {
    match value {
        Some(value) => value.serialize(serializer),
        None => serializer.save_null(name),
    }
}

fn read_optional<T: Persist>(
    deserializer: &mut dyn Deserializer,
    context: &mut ReadContext<'_>,
    name: &str,
) -> Result<Option<T>> {
    if deserializer.is_null()? {
        deserializer.read_null(name)?;
        Ok(None)
    } else {
        T::deserialize_new(deserializer, context).map(Some)
    }
}

fn write_list<T: Persist>(serializer: &mut dyn Serializer, name: &str, items: &[T]) -> Result<()> {
    serializer.start_list(name, items.len())?;
    for item in items {
        item.serialize(serializer)?;
    }
    serializer.end_list()
}

fn read_list<T: Persist>(
    deserializer: &mut dyn Deserializer,
    context: &mut ReadContext<'_>,
    name: &str,
) -> Result<Vec<T>> {
    let count = deserializer.enter_list(name)?;
    let mut items = Vec::new();
    items
        .try_reserve(count)
        .map_err(|err| SerializationError::corrupt(format!("{name}: {err}")))?;
    for _ in 0..count {
        items.push(T::deserialize_new(deserializer, context)?);
    }
    deserializer.leave_list()?;
    Ok(items)
}

impl Persist for UprightRectangle {
    fn serialize(&self, serializer: &mut dyn Serializer) -> Result<()> {
        serializer.start_container("extent")?;
        write_point(serializer, self.lower_left())?;
        write_point(serializer, self.upper_right())?;
        serializer.end_container()
    }

    fn deserialize_new(deserializer: &mut dyn Deserializer, _: &mut ReadContext<'_>) -> Result<Self> {
        deserializer.enter_nested_object("extent")?;
        let lower_left = read_point(deserializer)?;
        let upper_right = read_point(deserializer)?;
        deserializer.leave_nested_object()?;
        Ok(UprightRectangle::new(lower_left, upper_right))
    }
}

impl Persist for DoublePoint {
    fn serialize(&self, serializer: &mut dyn Serializer) -> Result<()> {
        serializer.start_container("location")?;
        serializer.serialize_f64(self.longitude, "longitude")?;
        serializer.serialize_f64(self.latitude, "latitude")?;
        serializer.end_container()
    }

    fn deserialize_new(deserializer: &mut dyn Deserializer, _: &mut ReadContext<'_>) -> Result<Self> {
        deserializer.enter_nested_object("location")?;
        let longitude = deserializer.deserialize_f64("longitude")?;
        let latitude = deserializer.deserialize_f64("latitude")?;
        deserializer.leave_nested_object()?;
        Ok(DoublePoint::new(longitude, latitude))
    }
}

impl Persist for Stroke {
    fn serialize(&self, serializer: &mut dyn Serializer) -> Result<()> {
        serializer.start_container("stroke")?;
        serializer.serialize_u32(pack_color(self.color), "color")?;
        serializer.serialize_f32(self.width, "width")?;
        serializer.end_container()
    }

    fn deserialize_new(deserializer: &mut dyn Deserializer, _: &mut ReadContext<'_>) -> Result<Self> {
        deserializer.enter_nested_object("stroke")?;
        let color = unpack_color(deserializer.deserialize_u32("color")?);
        let width = deserializer.deserialize_f32("width")?;
        deserializer.leave_nested_object()?;
        Ok(Stroke { color, width })
    }
}

const STYLE_AREA: u8 = 0;
const STYLE_LINE: u8 = 1;
const STYLE_POINT: u8 = 2;

impl Persist for FeatureStyle {
    fn serialize(&self, serializer: &mut dyn Serializer) -> Result<()> {
        serializer.start_container("symbology")?;
        match self {
            FeatureStyle::Area {
                fill,
                outline,
                opaque,
            } => {
                serializer.serialize_u8(STYLE_AREA, "kind")?;
                serializer.serialize_u32(pack_color(*fill), "fill")?;
                write_optional(serializer, outline.as_ref(), "outline")?;
                serializer.serialize_bool(*opaque, "opaque")?;
            }
            FeatureStyle::Line {
                stroke,
                casing,
                dash,
            } => {
                serializer.serialize_u8(STYLE_LINE, "kind")?;
                stroke.serialize(serializer)?;
                write_optional(serializer, casing.as_ref(), "casing")?;
                serializer.start_list("dash", dash.len())?;
                for length in dash {
                    serializer.serialize_f32(*length, "length")?;
                }
                serializer.end_list()?;
            }
            FeatureStyle::Point {
                symbol,
                size,
                color,
                halo,
            } => {
                serializer.serialize_u8(STYLE_POINT, "kind")?;
                serializer.serialize_string(symbol, "symbol")?;
                serializer.serialize_f32(*size, "size")?;
                serializer.serialize_u32(pack_color(*color), "color")?;
                serializer.serialize_f32(*halo, "halo")?;
            }
        }
        serializer.end_container()
    }

    fn deserialize_new(
        deserializer: &mut dyn Deserializer,
        context: &mut ReadContext<'_>,
    ) -> Result<Self> {
        deserializer.enter_nested_object("symbology")?;
        let style = match deserializer.deserialize_u8("kind")? {
            STYLE_AREA => FeatureStyle::Area {
                fill: unpack_color(deserializer.deserialize_u32("fill")?),
                outline: read_optional(deserializer, context, "outline")?,
                opaque: deserializer.deserialize_bool("opaque")?,
            },
            STYLE_LINE => {
                let stroke = Stroke::deserialize_new(deserializer, context)?;
                let casing = read_optional(deserializer, context, "casing")?;
                let count = deserializer.enter_list("dash")?;
                let mut dash = Vec::with_capacity(count.min(64));
                for _ in 0..count {
                    dash.push(deserializer.deserialize_f32("length")?);
                }
                deserializer.leave_list()?;
                FeatureStyle::Line {
                    stroke,
                    casing,
                    dash,
                }
            }
            STYLE_POINT => FeatureStyle::Point {
                symbol: deserializer.deserialize_string("symbol")?,
                size: deserializer.deserialize_f32("size")?,
                color: unpack_color(deserializer.deserialize_u32("color")?),
                halo: deserializer.deserialize_f32("halo")?,
            },
            other => {
                return Err(SerializationError::corrupt(format!(
                    "unknown style kind {other}"
                )));
            }
        };
        deserializer.leave_nested_object()?;
        Ok(style)
    }
}

/// 带名字的样式，作为 `styles` 章节的列表元素。
struct NamedStyle {
    name: String,
    style: FeatureStyle,
}

impl NamedStyle {
    fn write(serializer: &mut dyn Serializer, name: &str, style: &FeatureStyle) -> Result<()> {
        serializer.start_container("style")?;
        serializer.serialize_string(name, "name")?;
        style.serialize(serializer)?;
        serializer.end_container()
    }
}

impl Persist for NamedStyle {
    fn serialize(&self, serializer: &mut dyn Serializer) -> Result<()> {
        NamedStyle::write(serializer, &self.name, &self.style)
    }

    fn deserialize_new(
        deserializer: &mut dyn Deserializer,
        context: &mut ReadContext<'_>,
    ) -> Result<Self> {
        deserializer.enter_nested_object("style")?;
        let name = deserializer.deserialize_string("name")?;
        let style = FeatureStyle::deserialize_new(deserializer, context)?;
        deserializer.leave_nested_object()?;
        Ok(NamedStyle { name, style })
    }
}

impl Persist for PlacementRule {
    fn serialize(&self, serializer: &mut dyn Serializer) -> Result<()> {
        serializer.start_container("rule")?;
        serializer.serialize_string(&self.name, "name")?;
        serializer.start_list("allowed_classes", self.allowed_crossing_classes.len())?;
        for class in &self.allowed_crossing_classes {
            serializer.serialize_string(class, "class")?;
        }
        serializer.end_list()?;
        serializer.serialize_f32(self.overlap_buffer, "overlap_buffer")?;
        if serializer.version().gte(FormatVersion::V2_2) {
            serializer.serialize_f32(self.proximity_buffer, "proximity_buffer")?;
        }
        serializer.serialize_bool(self.allow_leader, "allow_leader")?;
        serializer.end_container()
    }

    fn deserialize_new(
        deserializer: &mut dyn Deserializer,
        context: &mut ReadContext<'_>,
    ) -> Result<Self> {
        deserializer.enter_nested_object("rule")?;
        let mut rule = PlacementRule::new(deserializer.deserialize_string("name")?);
        let count = deserializer.enter_list("allowed_classes")?;
        for _ in 0..count {
            let class = deserializer.deserialize_string("class")?;
            let class = context.interner.intern(&class);
            rule.allowed_crossing_classes.push(class);
        }
        deserializer.leave_list()?;
        rule.overlap_buffer = deserializer.deserialize_f32("overlap_buffer")?;
        if deserializer.version().gte(FormatVersion::V2_2) {
            rule.proximity_buffer = deserializer.deserialize_f32("proximity_buffer")?;
        }
        rule.allow_leader = deserializer.deserialize_bool("allow_leader")?;
        deserializer.leave_nested_object()?;
        Ok(rule)
    }
}

const SHAPE_POINT: u8 = 0;
const SHAPE_POLYLINE: u8 = 1;
const SHAPE_POLYGON: u8 = 2;

/// 多边形的一个环。
struct Ring(Vec<Point>);

impl Persist for Ring {
    fn serialize(&self, serializer: &mut dyn Serializer) -> Result<()> {
        serializer.start_container("ring")?;
        write_points(serializer, "vertices", &self.0)?;
        serializer.end_container()
    }

    fn deserialize_new(deserializer: &mut dyn Deserializer, _: &mut ReadContext<'_>) -> Result<Self> {
        deserializer.enter_nested_object("ring")?;
        let vertices = read_points(deserializer, "vertices")?;
        deserializer.leave_nested_object()?;
        Ok(Ring(vertices))
    }
}

impl Persist for Shape {
    fn serialize(&self, serializer: &mut dyn Serializer) -> Result<()> {
        serializer.start_container(SHAPE)?;
        match self {
            Shape::Point(point) => {
                serializer.serialize_u8(SHAPE_POINT, "kind")?;
                write_point(serializer, *point)?;
            }
            Shape::Polyline(polyline) => {
                serializer.serialize_u8(SHAPE_POLYLINE, "kind")?;
                serializer.serialize_bool(polyline.closed(), "closed")?;
                write_points(serializer, "vertices", polyline.vertices())?;
            }
            Shape::Polygon(polygon) => {
                serializer.serialize_u8(SHAPE_POLYGON, "kind")?;
                Ring(polygon.boundary().vertices().to_vec()).serialize(serializer)?;
                serializer.start_list("holes", polygon.holes().len())?;
                for hole in polygon.holes() {
                    Ring(hole.vertices().to_vec()).serialize(serializer)?;
                }
                serializer.end_list()?;
            }
        }
        serializer.end_container()
    }

    fn deserialize_new(
        deserializer: &mut dyn Deserializer,
        context: &mut ReadContext<'_>,
    ) -> Result<Self> {
        deserializer.enter_nested_object(SHAPE)?;
        let shape = match deserializer.deserialize_u8("kind")? {
            SHAPE_POINT => Shape::Point(read_point(deserializer)?),
            SHAPE_POLYLINE => {
                let closed = deserializer.deserialize_bool("closed")?;
                let vertices = read_points(deserializer, "vertices")?;
                Shape::Polyline(Polyline::with_closed(vertices, closed)?)
            }
            SHAPE_POLYGON => {
                let Ring(boundary) = Ring::deserialize_new(deserializer, context)?;
                let holes: Vec<Ring> = read_list(deserializer, context, "holes")?;
                Shape::Polygon(Polygon::with_holes(
                    boundary,
                    holes.into_iter().map(|Ring(hole)| hole).collect(),
                )?)
            }
            other => {
                return Err(SerializationError::corrupt(format!(
                    "unknown shape kind {other}"
                )));
            }
        };
        deserializer.leave_nested_object()?;
        Ok(shape)
    }
}

const VALUE_INT: u8 = 0;
const VALUE_DOUBLE: u8 = 1;
const VALUE_TEXT: u8 = 2;
const VALUE_BOOL: u8 = 3;

impl Persist for Attribute {
    fn serialize(&self, serializer: &mut dyn Serializer) -> Result<()> {
        serializer.start_container("attribute")?;
        serializer.serialize_string(&self.name, "name")?;
        match &self.value {
            AttributeValue::Int(value) => {
                serializer.serialize_u8(VALUE_INT, "kind")?;
                serializer.serialize_i64(*value, "value")?;
            }
            AttributeValue::Double(value) => {
                serializer.serialize_u8(VALUE_DOUBLE, "kind")?;
                serializer.serialize_f64(*value, "value")?;
            }
            AttributeValue::Text(value) => {
                serializer.serialize_u8(VALUE_TEXT, "kind")?;
                serializer.serialize_string(value, "value")?;
            }
            AttributeValue::Bool(value) => {
                serializer.serialize_u8(VALUE_BOOL, "kind")?;
                serializer.serialize_bool(*value, "value")?;
            }
        }
        serializer.end_container()
    }

    fn deserialize_new(deserializer: &mut dyn Deserializer, _: &mut ReadContext<'_>) -> Result<Self> {
        deserializer.enter_nested_object("attribute")?;
        let name = deserializer.deserialize_string("name")?;
        let value = match deserializer.deserialize_u8("kind")? {
            VALUE_INT => AttributeValue::Int(deserializer.deserialize_i64("value")?),
            VALUE_DOUBLE => AttributeValue::Double(deserializer.deserialize_f64("value")?),
            VALUE_TEXT => AttributeValue::Text(deserializer.deserialize_string("value")?),
            VALUE_BOOL => AttributeValue::Bool(deserializer.deserialize_bool("value")?),
            other => {
                return Err(SerializationError::corrupt(format!(
                    "unknown attribute kind {other}"
                )));
            }
        };
        deserializer.leave_nested_object()?;
        Ok(Attribute { name, value })
    }
}

fn write_feature_body(serializer: &mut dyn Serializer, feature: &Feature) -> Result<()> {
    serializer.serialize_u64(feature.id.0, "id")?;
    serializer.serialize_string(&feature.class, "class")?;
    serializer.serialize_string(&feature.name, "name")?;
    write_optional(serializer, feature.shape.as_ref(), SHAPE)?;
    let version = serializer.version();
    if version.gte(FormatVersion::V2_3) {
        write_optional(serializer, feature.location.as_ref(), "location")?;
    }
    if version.gte(FormatVersion::V2_1) {
        write_list(serializer, "attributes", &feature.attributes)?;
    }
    Ok(())
}

impl FeatureHeader {
    /// 读取要素块开头的身份字段，读取位置停在几何之前。
    fn read(
        deserializer: &mut dyn Deserializer,
        context: &mut ReadContext<'_>,
        layer: &str,
    ) -> Result<Self> {
        let id = FeatureId(deserializer.deserialize_u64("id")?);
        let class = context
            .interner
            .intern(&deserializer.deserialize_string("class")?);
        let name = deserializer.deserialize_string("name")?;
        Ok(FeatureHeader {
            layer: layer.to_owned(),
            id,
            class,
            name,
        })
    }

    fn into_feature(
        self,
        deserializer: &mut dyn Deserializer,
        context: &mut ReadContext<'_>,
    ) -> Result<Feature> {
        let shape = read_optional(deserializer, context, SHAPE)?;
        let version = deserializer.version();
        let location = if version.gte(FormatVersion::V2_3) {
            read_optional(deserializer, context, "location")?
        } else {
            None
        };
        let attributes = if version.gte(FormatVersion::V2_1) {
            read_list(deserializer, context, "attributes")?
        } else {
            Vec::new()
        };
        Ok(Feature {
            id: self.id,
            class: self.class,
            name: self.name,
            shape,
            location,
            attributes,
        })
    }
}

impl Persist for Feature {
    fn serialize(&self, serializer: &mut dyn Serializer) -> Result<()> {
        serializer.start_container(FEATURE)?;
        write_feature_body(serializer, self)?;
        serializer.end_container()
    }

    /// 单独读取时不经过淘汰器。
    fn deserialize_new(
        deserializer: &mut dyn Deserializer,
        context: &mut ReadContext<'_>,
    ) -> Result<Self> {
        deserializer.enter_nested_object(FEATURE)?;
        let feature = FeatureHeader::read(deserializer, context, "")?
            .into_feature(deserializer, context)?;
        deserializer.leave_nested_object()?;
        Ok(feature)
    }
}

impl Persist for Layer {
    fn serialize(&self, serializer: &mut dyn Serializer) -> Result<()> {
        serializer.start_container("layer")?;
        serializer.serialize_string(&self.name, "name")?;
        serializer.serialize_bool(self.visible, "visible")?;
        serializer.serialize_string(&self.style, "style")?;
        if serializer.version().gte(FormatVersion::V2_2) {
            write_optional_f64(serializer, self.min_scale, "min_scale")?;
            write_optional_f64(serializer, self.max_scale, "max_scale")?;
        }
        write_list(serializer, "features", &self.features)?;
        serializer.end_container()
    }

    fn deserialize_new(
        deserializer: &mut dyn Deserializer,
        context: &mut ReadContext<'_>,
    ) -> Result<Self> {
        deserializer.enter_nested_object("layer")?;
        let layer = read_layer_body(deserializer, context)?;
        deserializer.leave_nested_object()?;
        Ok(layer)
    }
}

/// 读取图层对象的内容。要素逐个经过淘汰器，被淘汰的要素不读几何。
pub(crate) fn read_layer_body(
    deserializer: &mut dyn Deserializer,
    context: &mut ReadContext<'_>,
) -> Result<Layer> {
    let mut layer = Layer::new(
        deserializer.deserialize_string("name")?,
        String::new(),
    );
    layer.visible = deserializer.deserialize_bool("visible")?;
    layer.style = deserializer.deserialize_string("style")?;
    if deserializer.version().gte(FormatVersion::V2_2) {
        layer.min_scale = read_optional_f64(deserializer, "min_scale")?;
        layer.max_scale = read_optional_f64(deserializer, "max_scale")?;
    }

    deserializer.enter_list("features")?;
    let mut more = deserializer.enter_first_list_item()?;
    while more {
        let header = FeatureHeader::read(deserializer, context, &layer.name)?;
        if !context.should_eliminate(&header) {
            layer
                .features
                .try_reserve(1)
                .map_err(|err| SerializationError::corrupt(err.to_string()))?;
            layer.features.push(header.into_feature(deserializer, context)?);
        }
        more = deserializer.enter_next_list_item()?;
    }
    deserializer.leave_list()?;
    Ok(layer)
}

/// 只读图层名，用于目录扫描。读取位置停在图层对象内部。
pub(crate) fn read_layer_name(deserializer: &mut dyn Deserializer) -> Result<String> {
    deserializer.deserialize_string("name")
}

impl Persist for TextPart {
    fn serialize(&self, serializer: &mut dyn Serializer) -> Result<()> {
        serializer.start_container("text_part")?;
        serializer.serialize_string(&self.text, "text")?;
        write_rectangle(serializer, &self.frame)?;
        serializer.end_container()
    }

    fn deserialize_new(deserializer: &mut dyn Deserializer, _: &mut ReadContext<'_>) -> Result<Self> {
        deserializer.enter_nested_object("text_part")?;
        let text = deserializer.deserialize_string("text")?;
        let frame = read_rectangle(deserializer)?;
        deserializer.leave_nested_object()?;
        Ok(TextPart { text, frame })
    }
}

impl Persist for SymbolComponent {
    fn serialize(&self, serializer: &mut dyn Serializer) -> Result<()> {
        serializer.start_container("symbol")?;
        serializer.serialize_string(&self.symbol, "symbol")?;
        write_rectangle(serializer, &self.frame)?;
        serializer.end_container()
    }

    fn deserialize_new(deserializer: &mut dyn Deserializer, _: &mut ReadContext<'_>) -> Result<Self> {
        deserializer.enter_nested_object("symbol")?;
        let symbol = deserializer.deserialize_string("symbol")?;
        let frame = read_rectangle(deserializer)?;
        deserializer.leave_nested_object()?;
        Ok(SymbolComponent { symbol, frame })
    }
}

impl Persist for Leader {
    fn serialize(&self, serializer: &mut dyn Serializer) -> Result<()> {
        serializer.start_container("leader")?;
        write_point(serializer, self.anchor)?;
        write_point(serializer, self.end)?;
        serializer.serialize_f32(self.width, "width")?;
        serializer.end_container()
    }

    fn deserialize_new(deserializer: &mut dyn Deserializer, _: &mut ReadContext<'_>) -> Result<Self> {
        deserializer.enter_nested_object("leader")?;
        let anchor = read_point(deserializer)?;
        let end = read_point(deserializer)?;
        let width = deserializer.deserialize_f32("width")?;
        deserializer.leave_nested_object()?;
        Ok(Leader { anchor, end, width })
    }
}

impl Persist for Label {
    fn serialize(&self, serializer: &mut dyn Serializer) -> Result<()> {
        serializer.start_container("label")?;
        serializer.serialize_u64(self.id.0, "id")?;
        serializer.serialize_u64(self.feature.0, "feature")?;
        serializer.serialize_string(&self.rule, "rule")?;
        write_list(serializer, "text_parts", &self.text_parts)?;
        write_optional(serializer, self.leader.as_ref(), "leader")?;
        if serializer.version().gte(FormatVersion::V2_3) {
            write_list(serializer, "symbols", &self.symbol_components)?;
        }
        serializer.end_container()
    }

    fn deserialize_new(
        deserializer: &mut dyn Deserializer,
        context: &mut ReadContext<'_>,
    ) -> Result<Self> {
        deserializer.enter_nested_object("label")?;
        let id = LabelId(deserializer.deserialize_u64("id")?);
        let feature = FeatureId(deserializer.deserialize_u64("feature")?);
        let rule = deserializer.deserialize_string("rule")?;
        let text_parts = read_list(deserializer, context, "text_parts")?;
        let leader = read_optional(deserializer, context, "leader")?;
        let symbol_components = if deserializer.version().gte(FormatVersion::V2_3) {
            read_list(deserializer, context, "symbols")?
        } else {
            Vec::new()
        };
        deserializer.leave_nested_object()?;
        Ok(Label {
            id,
            feature,
            rule,
            text_parts,
            leader,
            symbol_components,
        })
    }
}

pub(crate) const CHAPTER_MAP: &str = "map";
pub(crate) const CHAPTER_STYLES: &str = "styles";
pub(crate) const CHAPTER_RULES: &str = "rules";
pub(crate) const CHAPTER_LAYERS: &str = "layers";
pub(crate) const CHAPTER_LABELS: &str = "labels";

/// 整张地图按章节写出；图层直接放在 `layers` 章节中，可以用书签单独定位。
impl Persist for Map {
    fn serialize(&self, serializer: &mut dyn Serializer) -> Result<()> {
        serializer.start_chapter(CHAPTER_MAP)?;
        serializer.serialize_string(&self.name, "name")?;
        self.extent.serialize(serializer)?;
        serializer.end_chapter()?;

        serializer.start_chapter(CHAPTER_STYLES)?;
        serializer.start_list("styles", self.styles.len())?;
        for (name, style) in &self.styles {
            NamedStyle::write(serializer, name, style)?;
        }
        serializer.end_list()?;
        serializer.end_chapter()?;

        serializer.start_chapter(CHAPTER_RULES)?;
        write_list(serializer, "rules", &self.placement_rules)?;
        serializer.end_chapter()?;

        serializer.start_chapter(CHAPTER_LAYERS)?;
        for layer in self.layers() {
            layer.serialize(serializer)?;
        }
        serializer.end_chapter()?;

        serializer.start_chapter(CHAPTER_LABELS)?;
        write_list(serializer, "labels", self.labels())?;
        serializer.end_chapter()
    }

    fn deserialize_new(
        deserializer: &mut dyn Deserializer,
        context: &mut ReadContext<'_>,
    ) -> Result<Self> {
        let mut map = read_map_header(deserializer, context)?;

        deserializer.enter_chapter(CHAPTER_LAYERS)?;
        while deserializer.enter_first_nested_object()?.is_some() {
            let layer = read_layer_body(deserializer, context)?;
            map.push_layer(layer);
            deserializer.leave_nested_object()?;
        }
        deserializer.leave_chapter()?;

        deserializer.enter_chapter(CHAPTER_LABELS)?;
        let labels: Vec<Label> = read_list(deserializer, context, "labels")?;
        deserializer.leave_chapter()?;
        for label in labels {
            map.push_label(label);
        }
        Ok(map)
    }
}

/// 读取 `map`、`styles`、`rules` 三个章节，得到不含图层与注记的地图。
pub(crate) fn read_map_header(
    deserializer: &mut dyn Deserializer,
    context: &mut ReadContext<'_>,
) -> Result<Map> {
    deserializer.enter_chapter(CHAPTER_MAP)?;
    let name = deserializer.deserialize_string("name")?;
    let extent = UprightRectangle::deserialize_new(deserializer, context)?;
    deserializer.leave_chapter()?;
    let mut map = Map::new(name, extent);

    deserializer.enter_chapter(CHAPTER_STYLES)?;
    let styles: Vec<NamedStyle> = read_list(deserializer, context, "styles")?;
    deserializer.leave_chapter()?;
    for NamedStyle { name, style } in styles {
        map.styles.insert(name, style);
    }

    deserializer.enter_chapter(CHAPTER_RULES)?;
    map.placement_rules = read_list(deserializer, context, "rules")?;
    deserializer.leave_chapter()?;
    Ok(map)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::deserializer::BinaryDeserializer;
    use crate::serializer::BinarySerializer;

    fn round_trip<T: Persist>(value: &T, version: FormatVersion) -> T {
        let mut writer = BinarySerializer::in_memory(version).unwrap();
        writer.start_chapter("test").unwrap();
        value.serialize(&mut writer).unwrap();
        writer.end_chapter().unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        let mut reader = BinaryDeserializer::open(Cursor::new(bytes)).unwrap();
        reader.enter_chapter("test").unwrap();
        let mut context = ReadContext::new();
        let value = T::deserialize_new(&mut reader, &mut context).unwrap();
        reader.leave_chapter().unwrap();
        value
    }

    #[test]
    fn colors_pack_into_one_word() {
        let color = Color {
            r: 1,
            g: 2,
            b: 3,
            a: 4,
        };
        assert_eq!(pack_color(color), 0x0102_0304);
        assert_eq!(unpack_color(pack_color(color)), color);
    }

    #[test]
    fn polygon_with_hole_survives() {
        let polygon = Polygon::with_holes(
            vec![
                Point::new(0.0, 0.0),
                Point::new(0.0, 10.0),
                Point::new(10.0, 10.0),
                Point::new(10.0, 0.0),
            ],
            vec![vec![
                Point::new(2.0, 2.0),
                Point::new(4.0, 2.0),
                Point::new(4.0, 4.0),
            ]],
        )
        .unwrap();
        let shape = Shape::Polygon(polygon);
        assert_eq!(round_trip(&shape, FormatVersion::V2_0), shape);
    }

    #[test]
    fn rule_proximity_buffer_is_gated_by_version() {
        let mut rule = PlacementRule::new("roads");
        rule.proximity_buffer = 3.0;
        rule.overlap_buffer = 1.0;
        rule.allow_leader = true;
        rule.allowed_crossing_classes.push(Arc::from("water"));

        assert_eq!(round_trip(&rule, FormatVersion::V2_2), rule);
        let old = round_trip(&rule, FormatVersion::V2_1);
        assert_eq!(old.proximity_buffer, 0.0);
        assert_eq!(old.overlap_buffer, 1.0);
        assert!(old.allow_leader);
    }

    #[test]
    fn styles_nest_strokes() {
        let style = FeatureStyle::Line {
            stroke: Stroke {
                color: Color::rgb(200, 10, 10),
                width: 2.0,
            },
            casing: Some(Stroke {
                color: Color::BLACK,
                width: 3.5,
            }),
            dash: vec![4.0, 2.0],
        };
        assert_eq!(round_trip(&style, FormatVersion::V2_3), style);
    }
}
