use serde::{Deserialize, Serialize};

use super::lines::LineSegment;
use super::point::{Point, Vector};
use super::rect::{Rectangle, UprightRectangle};
use crate::errors::GeometryError;

/// 多段线的只读顶点访问能力。`Polyline` 及其各种视图都实现该 trait。
pub trait PolylineView {
    fn vertex(&self, index: usize) -> Option<Point>;

    fn num_vertices(&self) -> usize;

    fn is_closed(&self) -> bool {
        false
    }

    /// 闭合多段线的最后一段连接回第一个顶点。
    fn num_segments(&self) -> usize {
        let n = self.num_vertices();
        match (n, self.is_closed()) {
            (0 | 1, _) => 0,
            (2, true) => 1,
            (n, true) => n,
            (n, false) => n - 1,
        }
    }

    fn segment(&self, index: usize) -> Option<LineSegment> {
        if index >= self.num_segments() {
            return None;
        }
        let n = self.num_vertices();
        let start = self.vertex(index)?;
        let end = self.vertex((index + 1) % n)?;
        Some(LineSegment::new(start, end))
    }

    fn segments(&self) -> Segments<'_, Self>
    where
        Self: Sized,
    {
        Segments {
            view: self,
            next: 0,
        }
    }

    fn bounds(&self) -> UprightRectangle {
        UprightRectangle::from_points((0..self.num_vertices()).filter_map(|i| self.vertex(i)))
    }

    /// 第 `index` 段按 `width` 加粗后的描边盒。
    fn stroke_box(&self, index: usize, width: f32) -> Option<Rectangle> {
        self.segment(index).map(|segment| segment.stroke_box(width))
    }

    fn length(&self) -> f32 {
        (0..self.num_segments())
            .filter_map(|i| self.segment(i))
            .map(|s| s.length())
            .sum()
    }

    /// 复制为独立拥有顶点的多段线。
    fn to_polyline(&self) -> Result<Polyline, GeometryError> {
        let vertices = (0..self.num_vertices())
            .filter_map(|i| self.vertex(i))
            .collect();
        if self.is_closed() {
            Polyline::new_closed(vertices)
        } else {
            Polyline::new(vertices)
        }
    }
}

/// 按顺序遍历视图中的线段。
pub struct Segments<'a, V: PolylineView> {
    view: &'a V,
    next: usize,
}

impl<V: PolylineView> Iterator for Segments<'_, V> {
    type Item = LineSegment;

    fn next(&mut self) -> Option<Self::Item> {
        let segment = self.view.segment(self.next)?;
        self.next += 1;
        Some(segment)
    }
}

#[derive(Debug, Clone)]
struct StrokeBoxCache {
    width: f32,
    boxes: Vec<Rectangle>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawPolyline {
    vertices: Vec<Point>,
    closed: bool,
}

/// 拥有顶点数组的多段线（至少两个顶点）。
///
/// 包围盒始终与当前顶点一致；按线宽缓存的描边盒只有在线宽变化或几何被修改时才重算。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawPolyline", into = "RawPolyline")]
pub struct Polyline {
    vertices: Vec<Point>,
    closed: bool,
    bounds: UprightRectangle,
    stroke_cache: Option<StrokeBoxCache>,
}

impl TryFrom<RawPolyline> for Polyline {
    type Error = GeometryError;

    fn try_from(raw: RawPolyline) -> Result<Self, Self::Error> {
        Polyline::with_closed(raw.vertices, raw.closed)
    }
}

impl From<Polyline> for RawPolyline {
    fn from(value: Polyline) -> Self {
        RawPolyline {
            vertices: value.vertices,
            closed: value.closed,
        }
    }
}

impl PartialEq for Polyline {
    fn eq(&self, other: &Self) -> bool {
        self.closed == other.closed && self.vertices == other.vertices
    }
}

impl Polyline {
    pub fn new(vertices: Vec<Point>) -> Result<Self, GeometryError> {
        Self::with_closed(vertices, false)
    }

    /// 闭合环：若首尾顶点重复，去掉末尾的重复点。
    pub fn new_closed(mut vertices: Vec<Point>) -> Result<Self, GeometryError> {
        if vertices.len() > 2 && vertices.first() == vertices.last() {
            vertices.pop();
        }
        Self::with_closed(vertices, true)
    }

    pub fn with_closed(vertices: Vec<Point>, closed: bool) -> Result<Self, GeometryError> {
        if vertices.len() < 2 {
            return Err(GeometryError::TooFewVertices {
                required: 2,
                actual: vertices.len(),
            });
        }
        let bounds = UprightRectangle::from_points(vertices.iter().copied());
        Ok(Self {
            vertices,
            closed,
            bounds,
            stroke_cache: None,
        })
    }

    #[inline]
    pub fn vertices(&self) -> &[Point] {
        &self.vertices
    }

    #[inline]
    pub fn closed(&self) -> bool {
        self.closed
    }

    pub fn set_closed(&mut self, closed: bool) {
        if self.closed != closed {
            self.closed = closed;
            self.stroke_cache = None;
        }
    }

    #[inline]
    pub fn bounding_box(&self) -> UprightRectangle {
        self.bounds
    }

    /// 修改单个顶点。若旧顶点位于包围盒边上则整体重算，否则只做扩张。
    pub fn set_vertex(&mut self, index: usize, point: Point) -> Result<(), GeometryError> {
        let len = self.vertices.len();
        let slot = self
            .vertices
            .get_mut(index)
            .ok_or(GeometryError::IndexOutOfRange { index, len })?;
        let old = std::mem::replace(slot, point);
        let ll = self.bounds.lower_left();
        let ur = self.bounds.upper_right();
        let on_edge =
            old.x() == ll.x() || old.y() == ll.y() || old.x() == ur.x() || old.y() == ur.y();
        if on_edge {
            self.recompute_bounds();
        } else {
            self.bounds.include_point(point);
        }
        self.stroke_cache = None;
        Ok(())
    }

    pub fn push_vertex(&mut self, point: Point) {
        self.vertices.push(point);
        self.bounds.include_point(point);
        self.stroke_cache = None;
    }

    pub fn translate(&mut self, offset: Vector) {
        for vertex in &mut self.vertices {
            *vertex = vertex.translate(offset);
        }
        self.bounds.translate(offset);
        self.stroke_cache = None;
    }

    pub fn scale(&mut self, factor: f32, center: Point) {
        for vertex in &mut self.vertices {
            *vertex = center.translate(Vector::from_points(center, *vertex).scaled(factor));
        }
        self.recompute_bounds();
        self.stroke_cache = None;
    }

    pub fn rotate(&mut self, angle: f32, center: Point) {
        let (sin, cos) = angle.sin_cos();
        for vertex in &mut self.vertices {
            *vertex = vertex.rotate_about(center, sin, cos);
        }
        self.recompute_bounds();
        self.stroke_cache = None;
    }

    pub fn reverse(&mut self) {
        self.vertices.reverse();
        self.stroke_cache = None;
    }

    /// 去掉容差内重复的相邻顶点（闭合时也比较首尾），至少保留两个顶点。
    pub fn remove_duplicate_vertices(&mut self, tolerance: f32) {
        let mut kept: Vec<Point> = Vec::with_capacity(self.vertices.len());
        for vertex in &self.vertices {
            if kept.last().is_none_or(|last| !last.is_near(*vertex, tolerance)) {
                kept.push(*vertex);
            }
        }
        if self.closed && kept.len() > 2 {
            if let (Some(first), Some(last)) = (kept.first(), kept.last()) {
                if first.is_near(*last, tolerance) {
                    kept.pop();
                }
            }
        }
        if kept.len() < 2 {
            kept = self.vertices.iter().take(1).copied().collect();
            if let Some(last) = self.vertices.last() {
                kept.push(*last);
            }
        }
        if kept.len() != self.vertices.len() {
            self.vertices = kept;
            self.stroke_cache = None;
        }
    }

    /// 以 `width` 加粗每一段得到的描边盒，结果按线宽缓存。
    pub fn stroke_boxes(&mut self, width: f32) -> &[Rectangle] {
        let stale = self
            .stroke_cache
            .as_ref()
            .is_none_or(|cache| cache.width != width);
        if stale {
            let boxes = self.segments().map(|s| s.stroke_box(width)).collect();
            self.stroke_cache = Some(StrokeBoxCache { width, boxes });
        }
        self.stroke_cache
            .as_ref()
            .map(|cache| cache.boxes.as_slice())
            .unwrap_or(&[])
    }

    /// 顶点 `first..=last` 组成的开放子视图。
    pub fn part(&self, first: usize, last: usize) -> Result<PolylinePart<'_>, GeometryError> {
        let len = self.vertices.len();
        if last >= len {
            return Err(GeometryError::IndexOutOfRange { index: last, len });
        }
        if first >= last {
            return Err(GeometryError::IndexOutOfRange { index: first, len });
        }
        Ok(PolylinePart {
            parent: self,
            first,
            last,
        })
    }

    pub fn clip_to_upright_rectangle(
        &self,
        rect: &UprightRectangle,
    ) -> Result<Vec<ClippedPolyline<'_>>, GeometryError> {
        self.clip_to_rectangle(&Rectangle::from_upright(rect))
    }

    /// 裁剪到（可旋转的）矩形，返回落在矩形内的各段视图。
    ///
    /// 完全落在矩形内时返回唯一一段且顶点与原多段线一致；闭合多段线跨越起点的
    /// 两段会合并为一段。零长度线段返回 `ZeroLengthSegment`。
    pub fn clip_to_rectangle(
        &self,
        rect: &Rectangle,
    ) -> Result<Vec<ClippedPolyline<'_>>, GeometryError> {
        let segment_count = self.num_segments();
        let mut pieces: Vec<PieceBuilder> = Vec::new();
        let mut current: Option<PieceBuilder> = None;

        for index in 0..segment_count {
            let Some(segment) = self.segment(index) else {
                break;
            };
            match segment.clip_parameters_to_rectangle(rect)? {
                None => {
                    if let Some(piece) = current.take() {
                        pieces.push(piece);
                    }
                }
                Some((t0, t1)) => {
                    let clipped = segment.sub_segment(t0, t1);
                    let continues = current
                        .as_ref()
                        .is_some_and(|piece| piece.ends_at_vertex && t0 <= 0.0);
                    if continues {
                        if let Some(piece) = current.as_mut() {
                            piece.interior_count += 1;
                            piece.end = clipped.end;
                            piece.ends_at_vertex = t1 >= 1.0;
                            piece.last_segment = index;
                        }
                    } else {
                        if let Some(piece) = current.take() {
                            pieces.push(piece);
                        }
                        current = Some(PieceBuilder {
                            start: clipped.start,
                            starts_at_vertex: t0 <= 0.0,
                            first_segment: index,
                            last_segment: index,
                            interior_first: index + 1,
                            interior_count: 0,
                            end: clipped.end,
                            ends_at_vertex: t1 >= 1.0,
                        });
                    }
                    if t1 < 1.0 {
                        if let Some(piece) = current.take() {
                            pieces.push(piece);
                        }
                    }
                }
            }
        }
        if let Some(piece) = current.take() {
            pieces.push(piece);
        }

        if self.closed && !pieces.is_empty() {
            let first = &pieces[0];
            let last = &pieces[pieces.len() - 1];
            let wraps = first.first_segment == 0
                && first.starts_at_vertex
                && last.last_segment + 1 == segment_count
                && last.ends_at_vertex;
            if wraps && pieces.len() == 1 {
                return Ok(vec![ClippedPolyline::whole(self)]);
            }
            if wraps {
                let first = pieces.remove(0);
                if let Some(last) = pieces.last_mut() {
                    last.interior_count += 1 + first.interior_count;
                    last.end = first.end;
                    last.ends_at_vertex = first.ends_at_vertex;
                }
            }
        }

        Ok(pieces
            .into_iter()
            .map(|piece| ClippedPolyline {
                parent: self,
                start: piece.start,
                end: piece.end,
                interior_first: piece.interior_first,
                interior_count: piece.interior_count,
                closed: false,
            })
            .collect())
    }

    fn recompute_bounds(&mut self) {
        self.bounds = UprightRectangle::from_points(self.vertices.iter().copied());
    }
}

struct PieceBuilder {
    start: Point,
    starts_at_vertex: bool,
    first_segment: usize,
    last_segment: usize,
    interior_first: usize,
    interior_count: usize,
    end: Point,
    ends_at_vertex: bool,
}

impl PolylineView for Polyline {
    #[inline]
    fn vertex(&self, index: usize) -> Option<Point> {
        self.vertices.get(index).copied()
    }

    #[inline]
    fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    fn is_closed(&self) -> bool {
        self.closed
    }

    fn bounds(&self) -> UprightRectangle {
        self.bounds
    }
}

/// 父多段线中一段连续顶点区间的非拥有视图，生命周期不得超过父对象。
#[derive(Debug, Clone, Copy)]
pub struct PolylinePart<'a> {
    parent: &'a Polyline,
    first: usize,
    last: usize,
}

impl<'a> PolylinePart<'a> {
    #[inline]
    pub fn parent(&self) -> &'a Polyline {
        self.parent
    }

    #[inline]
    pub fn range(&self) -> (usize, usize) {
        (self.first, self.last)
    }
}

impl PolylineView for PolylinePart<'_> {
    fn vertex(&self, index: usize) -> Option<Point> {
        if index > self.last - self.first {
            return None;
        }
        self.parent.vertex(self.first + index)
    }

    fn num_vertices(&self) -> usize {
        self.last - self.first + 1
    }
}

/// 裁剪结果：首尾为裁剪点，中间顶点引用父多段线（下标按环展开后取模）。
#[derive(Debug, Clone, Copy)]
pub struct ClippedPolyline<'a> {
    parent: &'a Polyline,
    start: Point,
    end: Point,
    interior_first: usize,
    interior_count: usize,
    closed: bool,
}

impl<'a> ClippedPolyline<'a> {
    fn whole(parent: &'a Polyline) -> Self {
        let n = parent.vertices.len();
        Self {
            parent,
            start: parent.vertices[0],
            end: parent.vertices[n - 1],
            interior_first: 1,
            interior_count: n.saturating_sub(2),
            closed: parent.closed,
        }
    }

    #[inline]
    pub fn parent(&self) -> &'a Polyline {
        self.parent
    }

    #[inline]
    pub fn start(&self) -> Point {
        self.start
    }

    #[inline]
    pub fn end(&self) -> Point {
        self.end
    }

    /// 父多段线中被完整保留的顶点下标（已取模）。
    pub fn parent_indices(&self) -> impl Iterator<Item = usize> + '_ {
        let n = self.parent.vertices.len();
        (self.interior_first..self.interior_first + self.interior_count).map(move |i| i % n)
    }
}

impl PolylineView for ClippedPolyline<'_> {
    fn vertex(&self, index: usize) -> Option<Point> {
        let count = self.num_vertices();
        if index >= count {
            return None;
        }
        if index == 0 {
            return Some(self.start);
        }
        if index == count - 1 {
            return Some(self.end);
        }
        let n = self.parent.vertices.len();
        self.parent
            .vertex((self.interior_first + index - 1) % n)
    }

    fn num_vertices(&self) -> usize {
        self.interior_count + 2
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// 把矩形视为四个顶点的闭合多段线。
#[derive(Debug, Clone, Copy)]
pub struct RectanglePolyline<'a> {
    rect: &'a Rectangle,
}

impl<'a> RectanglePolyline<'a> {
    #[inline]
    pub fn new(rect: &'a Rectangle) -> Self {
        Self { rect }
    }
}

impl PolylineView for RectanglePolyline<'_> {
    fn vertex(&self, index: usize) -> Option<Point> {
        self.rect.corners().get(index).copied()
    }

    fn num_vertices(&self) -> usize {
        4
    }

    fn is_closed(&self) -> bool {
        true
    }

    fn bounds(&self) -> UprightRectangle {
        self.rect.bounding_box()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_ring() -> Polyline {
        Polyline::new_closed(vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ])
        .unwrap()
    }

    fn collect(view: &impl PolylineView) -> Vec<Point> {
        (0..view.num_vertices())
            .filter_map(|i| view.vertex(i))
            .collect()
    }

    #[test]
    fn polyline_requires_two_vertices() {
        let err = Polyline::new(vec![Point::ORIGIN]).unwrap_err();
        assert_eq!(
            err,
            GeometryError::TooFewVertices {
                required: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn clipping_fully_inside_returns_original() {
        let window = UprightRectangle::from_coords(-1.0, -1.0, 20.0, 20.0);
        let open = Polyline::new(vec![
            Point::new(1.0, 1.0),
            Point::new(5.0, 2.0),
            Point::new(7.0, 9.0),
        ])
        .unwrap();
        let pieces = open.clip_to_upright_rectangle(&window).unwrap();
        assert_eq!(pieces.len(), 1);
        assert_eq!(collect(&pieces[0]), open.vertices());
        assert!(!pieces[0].is_closed());

        let ring = square_ring();
        let pieces = ring.clip_to_upright_rectangle(&window).unwrap();
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].to_polyline().unwrap(), ring);
    }

    #[test]
    fn clipping_splits_into_pieces() {
        let zigzag = Polyline::new(vec![
            Point::new(0.0, 0.0),
            Point::new(4.0, 0.0),
            Point::new(4.0, 10.0),
            Point::new(8.0, 10.0),
            Point::new(8.0, 0.0),
        ])
        .unwrap();
        let window = UprightRectangle::from_coords(-1.0, -1.0, 9.0, 2.0);
        let pieces = zigzag.clip_to_upright_rectangle(&window).unwrap();
        assert_eq!(pieces.len(), 2);
        assert_eq!(
            collect(&pieces[0]),
            vec![Point::new(0.0, 0.0), Point::new(4.0, 0.0), Point::new(4.0, 2.0)]
        );
        assert_eq!(
            collect(&pieces[1]),
            vec![Point::new(8.0, 2.0), Point::new(8.0, 0.0)]
        );
    }

    #[test]
    fn clipping_closed_ring_merges_wraparound() {
        let ring = square_ring();
        let window = UprightRectangle::from_coords(-1.0, -1.0, 11.0, 5.0);
        let pieces = ring.clip_to_upright_rectangle(&window).unwrap();
        assert_eq!(pieces.len(), 1);
        assert_eq!(
            collect(&pieces[0]),
            vec![
                Point::new(0.0, 5.0),
                Point::new(0.0, 0.0),
                Point::new(10.0, 0.0),
                Point::new(10.0, 5.0),
            ]
        );
    }

    #[test]
    fn bounds_follow_vertex_updates() {
        let mut line = Polyline::new(vec![Point::new(0.0, 0.0), Point::new(2.0, 2.0)]).unwrap();
        line.set_vertex(1, Point::new(1.0, 1.0)).unwrap();
        assert_eq!(line.bounding_box().upper_right(), Point::new(1.0, 1.0));
        line.translate(Vector::new(5.0, 0.0));
        assert_eq!(line.bounding_box().lower_left(), Point::new(5.0, 0.0));
        line.scale(2.0, Point::new(5.0, 0.0));
        assert_eq!(line.bounding_box().upper_right(), Point::new(7.0, 2.0));
        assert!(matches!(
            line.set_vertex(9, Point::ORIGIN),
            Err(GeometryError::IndexOutOfRange { index: 9, len: 2 })
        ));
    }

    #[test]
    fn stroke_boxes_are_cached_per_width() {
        let mut ring = square_ring();
        assert_eq!(ring.stroke_boxes(1.0).len(), 4);
        let first = ring.stroke_boxes(1.0)[0];
        assert!((first.height() - 1.0).abs() < 1e-5);
        let wider = ring.stroke_boxes(3.0)[0];
        assert!((wider.height() - 3.0).abs() < 1e-5);
    }

    #[test]
    fn part_and_rectangle_views() {
        let ring = square_ring();
        let part = ring.part(1, 3).unwrap();
        assert_eq!(part.num_vertices(), 3);
        assert_eq!(part.num_segments(), 2);
        assert!(ring.part(3, 1).is_err());

        let rect = Rectangle::from_upright(&UprightRectangle::from_coords(0.0, 0.0, 2.0, 1.0));
        let view = RectanglePolyline::new(&rect);
        assert_eq!(view.num_segments(), 4);
        assert!((view.length() - 6.0).abs() < 1e-5);
    }
}
