//! 空间索引：把要素线段、不透明面、注记文本块、引线与符号组件登记到网格单元，
//! 供障碍检测按查询矩形取出候选。

use std::collections::HashMap;
use std::sync::Arc;

use maplabel_core::geometry::{
    LineSegment, Point, Polygon, Polyline, PolylineView, Rectangle, UprightRectangle,
};
use maplabel_core::model::{FeatureId, FeatureStyle, Label, LabelId, Layer, Leader, Map, Shape};
use tracing::debug;

use crate::errors::EngineError;

/// 索引条目在所属索引中的下标；仅在本次重建期间有效。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub usize);

/// 索引条目。要素几何在插入时已按索引范围裁剪并由条目持有；
/// 注记相关条目只保存 `LabelId` 与部件下标，注记本身归 [`Map`] 所有。
#[derive(Debug, Clone)]
pub enum IndexEntry {
    FeaturePolyline {
        feature: FeatureId,
        class: Arc<str>,
        geometry: Polyline,
        stroke_width: f32,
    },
    OpaquePolygon {
        feature: FeatureId,
        class: Arc<str>,
        polygon: Polygon,
    },
    TextPart {
        label: LabelId,
        part: usize,
        frame: Rectangle,
    },
    Leader {
        label: LabelId,
        leader: Leader,
    },
    SymbolComponent {
        label: LabelId,
        part: usize,
        frame: Rectangle,
    },
}

impl IndexEntry {
    pub fn feature(&self) -> Option<FeatureId> {
        match self {
            IndexEntry::FeaturePolyline { feature, .. }
            | IndexEntry::OpaquePolygon { feature, .. } => Some(*feature),
            _ => None,
        }
    }

    pub fn label(&self) -> Option<LabelId> {
        match self {
            IndexEntry::TextPart { label, .. }
            | IndexEntry::Leader { label, .. }
            | IndexEntry::SymbolComponent { label, .. } => Some(*label),
            _ => None,
        }
    }

    /// 条目在地图上占据的区域，按部件拆分。线条目每段一个描边盒。
    pub fn footprints(&self) -> Vec<(usize, Rectangle)> {
        match self {
            IndexEntry::FeaturePolyline {
                geometry,
                stroke_width,
                ..
            } => geometry
                .segments()
                .enumerate()
                .map(|(i, segment)| (i, segment.stroke_box(*stroke_width)))
                .collect(),
            IndexEntry::OpaquePolygon { polygon, .. } => {
                vec![(0, Rectangle::from_upright(&polygon.bounding_box()))]
            }
            IndexEntry::TextPart { frame, .. } | IndexEntry::SymbolComponent { frame, .. } => {
                vec![(0, *frame)]
            }
            IndexEntry::Leader { leader, .. } => {
                vec![(0, leader.segment().stroke_box(leader.width))]
            }
        }
    }

    /// 按索引范围裁剪要素几何。完全落在范围外时返回空。
    pub fn clip_to_extent(self, extent: &UprightRectangle) -> Result<Vec<IndexEntry>, EngineError> {
        match self {
            IndexEntry::FeaturePolyline {
                feature,
                class,
                mut geometry,
                stroke_width,
            } => {
                if extent.contains_rect(&geometry.bounding_box()) {
                    return Ok(vec![IndexEntry::FeaturePolyline {
                        feature,
                        class,
                        geometry,
                        stroke_width,
                    }]);
                }
                // 裁剪不接受零长度线段。
                geometry.remove_duplicate_vertices(1e-5);
                if geometry.bounding_box().width().max(geometry.bounding_box().height()) <= 1e-5 {
                    return Ok(Vec::new());
                }
                let window = Rectangle::from_upright(extent);
                let mut pieces = Vec::new();
                for clipped in geometry.clip_to_rectangle(&window)? {
                    pieces.push(IndexEntry::FeaturePolyline {
                        feature,
                        class: Arc::clone(&class),
                        geometry: clipped.to_polyline()?,
                        stroke_width,
                    });
                }
                Ok(pieces)
            }
            IndexEntry::OpaquePolygon {
                feature,
                class,
                polygon,
            } => {
                if extent.contains_rect(&polygon.bounding_box()) {
                    return Ok(vec![IndexEntry::OpaquePolygon {
                        feature,
                        class,
                        polygon,
                    }]);
                }
                let window = Rectangle::from_upright(extent);
                let boundary = clip_ring_to_rectangle(polygon.boundary().vertices(), &window);
                if boundary.len() < 3 {
                    return Ok(Vec::new());
                }
                let mut clipped = Polygon::new(boundary)?;
                for hole in polygon.holes() {
                    let ring = clip_ring_to_rectangle(hole.vertices(), &window);
                    if ring.len() >= 3 {
                        clipped.add_hole(ring)?;
                    }
                }
                Ok(vec![IndexEntry::OpaquePolygon {
                    feature,
                    class,
                    polygon: clipped,
                }])
            }
            other => Ok(vec![other]),
        }
    }
}

/// Sutherland–Hodgman：把闭合环裁剪到（可旋转的）矩形内。
pub(crate) fn clip_ring_to_rectangle(vertices: &[Point], rect: &Rectangle) -> Vec<Point> {
    let local_box = rect.local_box();
    let ll = local_box.lower_left();
    let ur = local_box.upper_right();
    let mut ring: Vec<Point> = vertices.iter().map(|p| rect.to_local(*p)).collect();

    let planes: [(fn(Point) -> f32, f32, bool); 4] = [
        (|p: Point| p.x(), ll.x(), true),
        (|p: Point| p.x(), ur.x(), false),
        (|p: Point| p.y(), ll.y(), true),
        (|p: Point| p.y(), ur.y(), false),
    ];
    for (coord, limit, keep_above) in planes {
        if ring.is_empty() {
            break;
        }
        let inside = |p: Point| {
            if keep_above {
                coord(p) >= limit
            } else {
                coord(p) <= limit
            }
        };
        let mut output = Vec::with_capacity(ring.len() + 4);
        for i in 0..ring.len() {
            let current = ring[i];
            let previous = ring[(i + ring.len() - 1) % ring.len()];
            let crossing = || {
                let (a, b) = (coord(previous), coord(current));
                let t = if (b - a).abs() <= f32::EPSILON {
                    0.0
                } else {
                    (limit - a) / (b - a)
                };
                previous.lerp(current, t)
            };
            match (inside(previous), inside(current)) {
                (true, true) => output.push(current),
                (true, false) => output.push(crossing()),
                (false, true) => {
                    output.push(crossing());
                    output.push(current);
                }
                (false, false) => {}
            }
        }
        ring = output;
    }
    ring.into_iter().map(|p| rect.from_local(p)).collect()
}

/// 单元内登记的条目部件。线条目的 `part` 为线段下标。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellItem {
    pub entry: EntryId,
    pub part: usize,
}

#[derive(Debug, Default, Clone)]
pub struct CellCollection {
    items: Vec<CellItem>,
}

impl CellCollection {
    #[inline]
    pub fn items(&self) -> &[CellItem] {
        &self.items
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn push(&mut self, item: CellItem) -> Result<(), EngineError> {
        self.items
            .try_reserve(1)
            .map_err(|_| EngineError::Allocation {
                context: "growing a cell collection",
            })?;
        self.items.push(item);
        Ok(())
    }
}

/// 空间索引接口。查询返回的单元之间可能包含重复条目，由调用方去重。
pub trait SpatialIndex: Send + Sync {
    fn identity(&self) -> &'static str;

    /// 插入条目。要素几何会先按索引范围裁剪，因此可能产生零个或多个条目。
    fn insert(&mut self, entry: IndexEntry) -> Result<Vec<EntryId>, EngineError>;

    fn potential_overlaps(&self, query: &Rectangle) -> Result<Vec<&CellCollection>, EngineError>;

    fn entry(&self, id: EntryId) -> Option<&IndexEntry>;

    /// 用新条目替换已登记的条目，并同步单元中的登记。新条目不再按范围裁剪。
    fn replace(&mut self, id: EntryId, entry: IndexEntry) -> Result<(), EngineError>;

    fn clear(&mut self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 注记引线对应的条目。
    fn leader_entry(&self, label: LabelId) -> Option<EntryId> {
        (0..self.len()).map(EntryId).find(|id| {
            matches!(self.entry(*id), Some(IndexEntry::Leader { label: owner, .. }) if *owner == label)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexOptions {
    pub cell_size: f32,
    pub extent: Option<UprightRectangle>,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            cell_size: 16.0,
            extent: None,
        }
    }
}

/// 均匀网格索引，只为实际占用的单元分配集合。单元边界是闭区间。
#[derive(Debug)]
pub struct GridSpatialIndex {
    cell_size: f32,
    extent: Option<UprightRectangle>,
    cells: HashMap<(i32, i32), CellCollection>,
    entries: Vec<IndexEntry>,
}

impl GridSpatialIndex {
    pub const IDENTITY: &'static str = "grid";

    pub fn new(options: IndexOptions) -> Self {
        Self {
            cell_size: if options.cell_size > 0.0 {
                options.cell_size
            } else {
                IndexOptions::default().cell_size
            },
            extent: options.extent,
            cells: HashMap::new(),
            entries: Vec::new(),
        }
    }

    #[inline]
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    #[inline]
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    fn cell_of(&self, value: f32) -> i32 {
        (value / self.cell_size).floor() as i32
    }

    fn cell_rect(&self, key: (i32, i32)) -> Rectangle {
        let x0 = key.0 as f32 * self.cell_size;
        let y0 = key.1 as f32 * self.cell_size;
        Rectangle::from_upright(&UprightRectangle::from_coords(
            x0,
            y0,
            x0 + self.cell_size,
            y0 + self.cell_size,
        ))
    }

    fn cell_range(&self, bounds: &UprightRectangle) -> ((i32, i32), (i32, i32)) {
        let ll = bounds.lower_left();
        let ur = bounds.upper_right();
        (
            (self.cell_of(ll.x()), self.cell_of(ll.y())),
            (self.cell_of(ur.x()), self.cell_of(ur.y())),
        )
    }

    /// 与矩形接触的全部单元。轴对齐矩形直接取包围范围，旋转矩形再逐个做分离轴判定。
    fn touched_cells(&self, footprint: &Rectangle) -> Vec<(i32, i32)> {
        let bounds = footprint.bounding_box();
        if bounds.is_empty() {
            return Vec::new();
        }
        let ((x0, y0), (x1, y1)) = self.cell_range(&bounds);
        let axis_aligned = footprint.sin().abs() <= f32::EPSILON || footprint.cos().abs() <= f32::EPSILON;
        let mut cells = Vec::new();
        for x in x0..=x1 {
            for y in y0..=y1 {
                if axis_aligned || footprint.overlaps(&self.cell_rect((x, y)), -f32::EPSILON) {
                    cells.push((x, y));
                }
            }
        }
        cells
    }
}

impl SpatialIndex for GridSpatialIndex {
    fn identity(&self) -> &'static str {
        Self::IDENTITY
    }

    fn insert(&mut self, entry: IndexEntry) -> Result<Vec<EntryId>, EngineError> {
        let entries = match &self.extent {
            Some(extent) => entry.clip_to_extent(extent)?,
            None => vec![entry],
        };
        let mut ids = Vec::with_capacity(entries.len());
        for entry in entries {
            let id = EntryId(self.entries.len());
            for (part, footprint) in entry.footprints() {
                for key in self.touched_cells(&footprint) {
                    self.cells
                        .entry(key)
                        .or_default()
                        .push(CellItem { entry: id, part })?;
                }
            }
            self.entries
                .try_reserve(1)
                .map_err(|_| EngineError::Allocation {
                    context: "storing an index entry",
                })?;
            self.entries.push(entry);
            ids.push(id);
        }
        Ok(ids)
    }

    fn potential_overlaps(&self, query: &Rectangle) -> Result<Vec<&CellCollection>, EngineError> {
        let bounds = query.bounding_box();
        if bounds.is_empty() || self.cells.is_empty() {
            return Ok(Vec::new());
        }
        let ((x0, y0), (x1, y1)) = self.cell_range(&bounds);
        let span = (i64::from(x1) - i64::from(x0) + 1) * (i64::from(y1) - i64::from(y0) + 1);
        let mut hits = Vec::new();
        if span > self.cells.len() as i64 {
            for (key, cell) in &self.cells {
                if (x0..=x1).contains(&key.0) && (y0..=y1).contains(&key.1) {
                    hits.push(cell);
                }
            }
        } else {
            for x in x0..=x1 {
                for y in y0..=y1 {
                    if let Some(cell) = self.cells.get(&(x, y)) {
                        hits.push(cell);
                    }
                }
            }
        }
        Ok(hits)
    }

    fn entry(&self, id: EntryId) -> Option<&IndexEntry> {
        self.entries.get(id.0)
    }

    fn replace(&mut self, id: EntryId, entry: IndexEntry) -> Result<(), EngineError> {
        let previous = self
            .entries
            .get(id.0)
            .ok_or(EngineError::EntryNotFound(id.0))?
            .footprints();
        for (_, footprint) in previous {
            for key in self.touched_cells(&footprint) {
                if let Some(cell) = self.cells.get_mut(&key) {
                    cell.items.retain(|item| item.entry != id);
                    if cell.items.is_empty() {
                        self.cells.remove(&key);
                    }
                }
            }
        }
        for (part, footprint) in entry.footprints() {
            for key in self.touched_cells(&footprint) {
                self.cells
                    .entry(key)
                    .or_default()
                    .push(CellItem { entry: id, part })?;
            }
        }
        self.entries[id.0] = entry;
        Ok(())
    }

    fn clear(&mut self) {
        self.cells.clear();
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// 单桶索引：每次查询都返回全部条目，适合条目很少的地图或作为对照实现。
#[derive(Debug, Default)]
pub struct LinearSpatialIndex {
    extent: Option<UprightRectangle>,
    bucket: CellCollection,
    entries: Vec<IndexEntry>,
}

impl LinearSpatialIndex {
    pub const IDENTITY: &'static str = "linear";

    pub fn new(options: IndexOptions) -> Self {
        Self {
            extent: options.extent,
            ..Self::default()
        }
    }
}

impl SpatialIndex for LinearSpatialIndex {
    fn identity(&self) -> &'static str {
        Self::IDENTITY
    }

    fn insert(&mut self, entry: IndexEntry) -> Result<Vec<EntryId>, EngineError> {
        let entries = match &self.extent {
            Some(extent) => entry.clip_to_extent(extent)?,
            None => vec![entry],
        };
        let mut ids = Vec::with_capacity(entries.len());
        for entry in entries {
            let id = EntryId(self.entries.len());
            for (part, _) in entry.footprints() {
                self.bucket.push(CellItem { entry: id, part })?;
            }
            self.entries.push(entry);
            ids.push(id);
        }
        Ok(ids)
    }

    fn potential_overlaps(&self, _query: &Rectangle) -> Result<Vec<&CellCollection>, EngineError> {
        if self.bucket.is_empty() {
            Ok(Vec::new())
        } else {
            Ok(vec![&self.bucket])
        }
    }

    fn entry(&self, id: EntryId) -> Option<&IndexEntry> {
        self.entries.get(id.0)
    }

    fn replace(&mut self, id: EntryId, entry: IndexEntry) -> Result<(), EngineError> {
        if id.0 >= self.entries.len() {
            return Err(EngineError::EntryNotFound(id.0));
        }
        self.bucket.items.retain(|item| item.entry != id);
        for (part, _) in entry.footprints() {
            self.bucket.push(CellItem { entry: id, part })?;
        }
        self.entries[id.0] = entry;
        Ok(())
    }

    fn clear(&mut self) {
        self.bucket.items.clear();
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

type IndexConstructor = Box<dyn Fn(IndexOptions) -> Box<dyn SpatialIndex> + Send + Sync>;

/// 按名称创建空间索引的注册表。
pub struct SpatialIndexFactory {
    constructors: HashMap<&'static str, IndexConstructor>,
}

impl SpatialIndexFactory {
    pub fn new() -> Self {
        let mut factory = Self {
            constructors: HashMap::new(),
        };
        factory.register(GridSpatialIndex::IDENTITY, |options| {
            Box::new(GridSpatialIndex::new(options))
        });
        factory.register(LinearSpatialIndex::IDENTITY, |options| {
            Box::new(LinearSpatialIndex::new(options))
        });
        factory
    }

    pub fn register<F>(&mut self, identity: &'static str, constructor: F)
    where
        F: Fn(IndexOptions) -> Box<dyn SpatialIndex> + Send + Sync + 'static,
    {
        self.constructors.insert(identity, Box::new(constructor));
    }

    pub fn identities(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.constructors.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn create(
        &self,
        identity: &str,
        options: IndexOptions,
    ) -> Result<Box<dyn SpatialIndex>, EngineError> {
        let constructor = self
            .constructors
            .get(identity)
            .ok_or_else(|| EngineError::UnknownIndex(identity.to_string()))?;
        Ok(constructor(options))
    }
}

impl Default for SpatialIndexFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// 根据要素几何与图层样式生成索引条目。
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureIndexer;

impl FeatureIndexer {
    pub fn entries_for(
        &self,
        feature: &maplabel_core::model::Feature,
        style: &FeatureStyle,
    ) -> Result<Vec<IndexEntry>, EngineError> {
        let shape = feature
            .shape
            .as_ref()
            .ok_or(EngineError::NoFeatureTypeSpecified(feature.id.0))?;
        let unhandled = || EngineError::UnhandledFeatureType {
            id: feature.id.0,
            kind: shape.kind_name(),
        };
        let line = |geometry: Polyline, stroke_width: f32| IndexEntry::FeaturePolyline {
            feature: feature.id,
            class: Arc::clone(&feature.class),
            geometry,
            stroke_width,
        };
        let entries = match (shape, style) {
            (Shape::Polyline(polyline), FeatureStyle::Line { .. } | FeatureStyle::Area { .. }) => {
                vec![line(polyline.clone(), style.stroke_width())]
            }
            (Shape::Polygon(polygon), FeatureStyle::Area { opaque: true, .. }) => {
                vec![IndexEntry::OpaquePolygon {
                    feature: feature.id,
                    class: Arc::clone(&feature.class),
                    polygon: polygon.clone(),
                }]
            }
            (Shape::Polygon(polygon), FeatureStyle::Area { .. } | FeatureStyle::Line { .. }) => polygon
                .rings()
                .map(|ring| line(ring.clone(), style.stroke_width()))
                .collect(),
            (Shape::Point(point), FeatureStyle::Point { .. }) => {
                let size = style.stroke_width();
                let square = Rectangle::from_center(*point, size, size, 0.0);
                vec![IndexEntry::OpaquePolygon {
                    feature: feature.id,
                    class: Arc::clone(&feature.class),
                    polygon: Polygon::new(square.corners().to_vec())?,
                }]
            }
            _ => return Err(unhandled()),
        };
        Ok(entries)
    }

    pub fn entries_for_label(&self, label: &Label) -> Vec<IndexEntry> {
        let mut entries = Vec::with_capacity(label.text_parts.len() + 1);
        for (part, text) in label.text_parts.iter().enumerate() {
            entries.push(IndexEntry::TextPart {
                label: label.id,
                part,
                frame: text.frame,
            });
        }
        if let Some(leader) = label.leader {
            entries.push(IndexEntry::Leader {
                label: label.id,
                leader,
            });
        }
        for (part, symbol) in label.symbol_components.iter().enumerate() {
            entries.push(IndexEntry::SymbolComponent {
                label: label.id,
                part,
                frame: symbol.frame,
            });
        }
        entries
    }

    /// 把一个图层的全部带几何要素登记到索引，返回登记的条目数量。
    pub fn index_layer(
        &self,
        map: &Map,
        layer: &Layer,
        index: &mut dyn SpatialIndex,
    ) -> Result<usize, EngineError> {
        let style = map
            .style(&layer.style)
            .ok_or_else(|| EngineError::UnknownStyle(layer.style.clone()))?;
        let mut inserted = 0;
        for feature in &layer.features {
            if feature.shape.is_none() {
                debug!(feature = feature.id.0, layer = %layer.name, "要素没有几何，跳过索引");
                continue;
            }
            for entry in self.entries_for(feature, style)? {
                inserted += index.insert(entry)?.len();
            }
        }
        Ok(inserted)
    }
}

/// 重建一帧的索引：可见图层的要素加上已放置的注记。
pub fn index_map(map: &Map, index: &mut dyn SpatialIndex) -> Result<usize, EngineError> {
    let indexer = FeatureIndexer;
    index.clear();
    let mut inserted = 0;
    for layer in map.layers().iter().filter(|layer| layer.visible) {
        inserted += indexer.index_layer(map, layer, index)?;
    }
    for label in map.labels() {
        for entry in indexer.entries_for_label(label) {
            inserted += index.insert(entry)?.len();
        }
    }
    debug!(
        index = index.identity(),
        entries = index.len(),
        inserted,
        "空间索引已重建"
    );
    Ok(inserted)
}

/// 查询结果中出现的线段，供测试与调试输出使用。
pub fn candidate_segments(
    index: &dyn SpatialIndex,
    query: &Rectangle,
) -> Result<Vec<(EntryId, usize, LineSegment)>, EngineError> {
    let mut seen = std::collections::HashSet::new();
    let mut segments = Vec::new();
    for cell in index.potential_overlaps(query)? {
        for item in cell.items() {
            if !seen.insert(*item) {
                continue;
            }
            let entry = index
                .entry(item.entry)
                .ok_or(EngineError::EntryNotFound(item.entry.0))?;
            if let IndexEntry::FeaturePolyline { geometry, .. } = entry {
                if let Some(segment) = geometry.segment(item.part) {
                    segments.push((item.entry, item.part, segment));
                }
            }
        }
    }
    segments.sort_by_key(|(entry, part, _)| (*entry, *part));
    Ok(segments)
}
