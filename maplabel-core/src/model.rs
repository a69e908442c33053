//! 地图对象模型：图层、要素、符号化样式、注记与放置规则。
//!
//! 要素与注记之间只通过 [`FeatureId`] / [`LabelId`] 互相引用，
//! 所有权统一归 [`Map`]，避免引用计数环。

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::GeometryError;
use crate::geometry::{
    DoublePoint, LineSegment, Point, Polygon, Polyline, PolylineView, Rectangle,
    UprightRectangle,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeatureId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LabelId(pub u64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Int(i64),
    Double(f64),
    Text(String),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: AttributeValue,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: AttributeValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// 要素几何。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    Point(Point),
    Polyline(Polyline),
    Polygon(Polygon),
}

impl Shape {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Shape::Point(_) => "point",
            Shape::Polyline(_) => "polyline",
            Shape::Polygon(_) => "polygon",
        }
    }

    pub fn bounding_box(&self) -> UprightRectangle {
        match self {
            Shape::Point(point) => UprightRectangle::new(*point, *point),
            Shape::Polyline(polyline) => polyline.bounding_box(),
            Shape::Polygon(polygon) => polygon.bounding_box(),
        }
    }

    /// 按需调用的有效性检查：坐标有限、线至少有一段非零长度、面有面积。
    pub fn validate(&self, tolerance: f32) -> Result<(), GeometryError> {
        let finite = |p: &Point| p.x().is_finite() && p.y().is_finite();
        match self {
            Shape::Point(point) => {
                if finite(point) {
                    Ok(())
                } else {
                    Err(GeometryError::DegenerateGeometry(
                        "point has non-finite coordinates".into(),
                    ))
                }
            }
            Shape::Polyline(polyline) => {
                if !polyline.vertices().iter().all(finite) {
                    return Err(GeometryError::DegenerateGeometry(
                        "polyline has non-finite coordinates".into(),
                    ));
                }
                if polyline
                    .segments()
                    .all(|segment: LineSegment| segment.is_zero_length(tolerance))
                {
                    return Err(GeometryError::ZeroLengthSegment);
                }
                Ok(())
            }
            Shape::Polygon(polygon) => {
                for ring in polygon.rings() {
                    if !ring.vertices().iter().all(finite) {
                        return Err(GeometryError::DegenerateGeometry(
                            "polygon has non-finite coordinates".into(),
                        ));
                    }
                }
                if polygon.area() <= tolerance * tolerance {
                    return Err(GeometryError::DegenerateGeometry(
                        "polygon has no area".into(),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// 地图要素。`class` 为驻留字符串，用于放置规则中的“允许压盖类别”匹配。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: FeatureId,
    pub class: Arc<str>,
    pub name: String,
    pub shape: Option<Shape>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<DoublePoint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<Attribute>,
}

impl Feature {
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes
            .iter()
            .find(|attribute| attribute.name == name)
            .map(|attribute| &attribute.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub color: Color,
    pub width: f32,
}

/// 图层符号化样式。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureStyle {
    /// 面填充；`opaque` 的面会完全遮挡其下方的注记。
    Area {
        fill: Color,
        outline: Option<Stroke>,
        opaque: bool,
    },
    Line {
        stroke: Stroke,
        casing: Option<Stroke>,
        dash: Vec<f32>,
    },
    Point {
        symbol: String,
        size: f32,
        color: Color,
        halo: f32,
    },
}

impl FeatureStyle {
    /// 样式在地图上占据的线宽（含外框）。
    pub fn stroke_width(&self) -> f32 {
        match self {
            FeatureStyle::Area { outline, .. } => outline.map(|s| s.width).unwrap_or(0.0),
            FeatureStyle::Line { stroke, casing, .. } => casing
                .map(|casing| casing.width.max(stroke.width))
                .unwrap_or(stroke.width),
            FeatureStyle::Point { size, halo, .. } => size + halo * 2.0,
        }
    }
}

/// 注记放置规则。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementRule {
    pub name: String,
    /// 注记或引线允许压盖的要素类别。
    pub allowed_crossing_classes: Vec<Arc<str>>,
    pub overlap_buffer: f32,
    #[serde(default)]
    pub proximity_buffer: f32,
    pub allow_leader: bool,
}

impl PlacementRule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            allowed_crossing_classes: Vec::new(),
            overlap_buffer: 0.0,
            proximity_buffer: 0.0,
            allow_leader: false,
        }
    }

    pub fn allows_crossing(&self, class: &str) -> bool {
        self.allowed_crossing_classes
            .iter()
            .any(|allowed| allowed.as_ref() == class)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPart {
    pub text: String,
    pub frame: Rectangle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolComponent {
    pub symbol: String,
    pub frame: Rectangle,
}

/// 引线：从要素锚点指向注记的线段。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Leader {
    pub anchor: Point,
    pub end: Point,
    pub width: f32,
}

impl Leader {
    #[inline]
    pub fn segment(&self) -> LineSegment {
        LineSegment::new(self.anchor, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub id: LabelId,
    pub feature: FeatureId,
    /// 放置规则名。
    pub rule: String,
    pub text_parts: Vec<TextPart>,
    pub leader: Option<Leader>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symbol_components: Vec<SymbolComponent>,
}

impl Label {
    pub fn bounding_box(&self) -> UprightRectangle {
        let mut bounds = UprightRectangle::empty();
        for part in &self.text_parts {
            bounds.include_rect(&part.frame.bounding_box());
        }
        for symbol in &self.symbol_components {
            bounds.include_rect(&symbol.frame.bounding_box());
        }
        bounds
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    pub visible: bool,
    /// 样式名，对应 [`Map::styles`] 的键。
    pub style: String,
    #[serde(default)]
    pub min_scale: Option<f64>,
    #[serde(default)]
    pub max_scale: Option<f64>,
    pub features: Vec<Feature>,
}

impl Layer {
    pub fn new(name: impl Into<String>, style: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            visible: true,
            style: style.into(),
            min_scale: None,
            max_scale: None,
            features: Vec::new(),
        }
    }

    /// 比例尺分母是否落在图层的显示范围内。
    pub fn is_visible_at(&self, scale: f64) -> bool {
        self.visible
            && self.min_scale.is_none_or(|min| scale >= min)
            && self.max_scale.is_none_or(|max| scale <= max)
    }
}

/// 整张地图：拥有所有图层、要素、样式、规则与注记。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Map {
    pub name: String,
    pub extent: UprightRectangle,
    pub styles: BTreeMap<String, FeatureStyle>,
    pub placement_rules: Vec<PlacementRule>,
    layers: Vec<Layer>,
    labels: Vec<Label>,
    #[serde(skip)]
    next_feature_id: u64,
    #[serde(skip)]
    next_label_id: u64,
}

impl Map {
    pub fn new(name: impl Into<String>, extent: UprightRectangle) -> Self {
        Self {
            name: name.into(),
            extent,
            styles: BTreeMap::new(),
            placement_rules: Vec::new(),
            layers: Vec::new(),
            labels: Vec::new(),
            next_feature_id: 1,
            next_label_id: 1,
        }
    }

    pub fn ensure_layer(&mut self, name: &str) -> &mut Layer {
        let index = match self.layers.iter().position(|layer| layer.name == name) {
            Some(index) => index,
            None => {
                self.layers.push(Layer::new(name, name));
                self.layers.len() - 1
            }
        };
        &mut self.layers[index]
    }

    /// 追加一个已构造好的图层（如反序列化结果），同步 id 计数器。
    pub fn push_layer(&mut self, layer: Layer) {
        if let Some(max) = layer.features.iter().map(|feature| feature.id.0).max() {
            self.next_feature_id = self.next_feature_id.max(max.saturating_add(1));
        }
        self.layers.push(layer);
    }

    pub fn push_label(&mut self, label: Label) {
        self.next_label_id = self.next_label_id.max(label.id.0.saturating_add(1));
        self.labels.push(label);
    }

    pub fn add_feature(
        &mut self,
        layer: &str,
        class: Arc<str>,
        name: impl Into<String>,
        shape: Option<Shape>,
    ) -> FeatureId {
        let id = FeatureId(self.next_feature_id.max(1));
        self.next_feature_id = id.0.saturating_add(1);
        self.ensure_layer(layer).features.push(Feature {
            id,
            class,
            name: name.into(),
            shape,
            location: None,
            attributes: Vec::new(),
        });
        id
    }

    pub fn add_label(
        &mut self,
        feature: FeatureId,
        rule: impl Into<String>,
        text_parts: Vec<TextPart>,
    ) -> LabelId {
        let id = LabelId(self.next_label_id.max(1));
        self.next_label_id = id.0.saturating_add(1);
        self.labels.push(Label {
            id,
            feature,
            rule: rule.into(),
            text_parts,
            leader: None,
            symbol_components: Vec::new(),
        });
        id
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [Layer] {
        &mut self.layers
    }

    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.name == name)
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn label(&self, id: LabelId) -> Option<&Label> {
        self.labels.iter().find(|label| label.id == id)
    }

    pub fn label_mut(&mut self, id: LabelId) -> Option<&mut Label> {
        self.labels.iter_mut().find(|label| label.id == id)
    }

    pub fn features(&self) -> impl Iterator<Item = (&Layer, &Feature)> {
        self.layers
            .iter()
            .flat_map(|layer| layer.features.iter().map(move |feature| (layer, feature)))
    }

    pub fn feature(&self, id: FeatureId) -> Option<&Feature> {
        self.features()
            .find(|(_, feature)| feature.id == id)
            .map(|(_, feature)| feature)
    }

    pub fn feature_mut(&mut self, id: FeatureId) -> Option<&mut Feature> {
        self.layers
            .iter_mut()
            .flat_map(|layer| layer.features.iter_mut())
            .find(|feature| feature.id == id)
    }

    pub fn layer_of(&self, id: FeatureId) -> Option<&Layer> {
        self.features()
            .find(|(_, feature)| feature.id == id)
            .map(|(layer, _)| layer)
    }

    pub fn style(&self, name: &str) -> Option<&FeatureStyle> {
        self.styles.get(name)
    }

    pub fn rule(&self, name: &str) -> Option<&PlacementRule> {
        self.placement_rules.iter().find(|rule| rule.name == name)
    }
}

/// 显式的字符串驻留表，相同内容的字符串共享同一个 `Arc<str>`。
#[derive(Debug, Default, Clone)]
pub struct StringInterner {
    strings: HashSet<Arc<str>>,
}

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, value: &str) -> Arc<str> {
        if let Some(existing) = self.strings.get(value) {
            return Arc::clone(existing);
        }
        let interned: Arc<str> = Arc::from(value);
        self.strings.insert(Arc::clone(&interned));
        interned
    }

    pub fn get(&self, value: &str) -> Option<Arc<str>> {
        self.strings.get(value).cloned()
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interner_shares_allocations() {
        let mut interner = StringInterner::new();
        let a = interner.intern("road");
        let b = interner.intern("road");
        let c = interner.intern("river");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn map_assigns_ids_and_resolves_lookups() {
        let mut interner = StringInterner::new();
        let mut map = Map::new("test", UprightRectangle::from_coords(0.0, 0.0, 100.0, 100.0));
        let road = map.add_feature(
            "roads",
            interner.intern("road"),
            "Main St",
            Some(Shape::Point(Point::new(1.0, 2.0))),
        );
        let river = map.add_feature("water", interner.intern("river"), "Blue", None);
        assert_ne!(road, river);
        assert_eq!(map.layer_of(river).map(|l| l.name.as_str()), Some("water"));
        assert_eq!(map.feature(road).map(|f| f.name.as_str()), Some("Main St"));

        let label = map.add_label(road, "default", Vec::new());
        assert_eq!(map.label(label).map(|l| l.feature), Some(road));

        let mut restored = Map::new("copy", map.extent);
        restored.push_layer(map.layers()[0].clone());
        let next = restored.add_feature("roads", interner.intern("road"), "Side St", None);
        assert!(next.0 > road.0);
    }

    #[test]
    fn restored_ids_at_the_top_of_the_range() {
        let mut map = Map::new("edge", UprightRectangle::from_coords(0.0, 0.0, 10.0, 10.0));
        let mut layer = Layer::new("roads", "road");
        layer.features.push(Feature {
            id: FeatureId(u64::MAX),
            class: Arc::from("road"),
            name: "Last".into(),
            shape: None,
            location: None,
            attributes: Vec::new(),
        });
        map.push_layer(layer);
        map.push_label(Label {
            id: LabelId(u64::MAX),
            feature: FeatureId(u64::MAX),
            rule: String::new(),
            text_parts: Vec::new(),
            leader: None,
            symbol_components: Vec::new(),
        });
        assert_eq!(map.add_label(FeatureId(u64::MAX), "", Vec::new()), LabelId(u64::MAX));
        assert_eq!(map.labels().len(), 2);
        let feature = map.add_feature("roads", Arc::from("road"), "Again", None);
        assert_eq!(feature, FeatureId(u64::MAX));
    }

    #[test]
    fn validation_flags_degenerate_shapes() {
        let flat = Polyline::new(vec![Point::new(1.0, 1.0), Point::new(1.0, 1.0)]).unwrap();
        assert_eq!(
            Shape::Polyline(flat).validate(1e-4),
            Err(GeometryError::ZeroLengthSegment)
        );
        let sliver = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(2.0, 0.0),
        ])
        .unwrap();
        assert!(Shape::Polygon(sliver).validate(1e-4).is_err());
        assert!(Shape::Point(Point::new(f32::NAN, 0.0)).validate(1e-4).is_err());
    }

    #[test]
    fn layer_scale_range() {
        let mut layer = Layer::new("roads", "road");
        layer.min_scale = Some(1_000.0);
        layer.max_scale = Some(50_000.0);
        assert!(layer.is_visible_at(10_000.0));
        assert!(!layer.is_visible_at(100_000.0));
        layer.visible = false;
        assert!(!layer.is_visible_at(10_000.0));
    }
}
