//! 多边形拓扑合并：把一组相邻多边形的边界拆成共享边界，
//! 使相邻面之间的公共边只存在一份几何，可以统一化简后再重建多边形。

use std::collections::HashMap;

use crate::errors::GeometryError;
use crate::geometry::{
    Point, Polygon, Polyline, PolylineSimplifier, PolylineView, Simplified, Vector,
};

/// 边界在某一侧多边形中覆盖的线段下标区间（闭区间，沿环方向，可能跨越环起点）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRange {
    pub ring: usize,
    pub first: usize,
    pub last: usize,
}

/// 两个面之间（或面与外部之间）的一段公共边界。
///
/// 沿 `polyline` 方向行走时 `right` 在右侧、`left` 在左侧；外部用 `None` 表示。
#[derive(Debug, Clone)]
pub struct SharedBoundary {
    polyline: Polyline,
    left: Option<usize>,
    right: Option<usize>,
    left_range: Option<SegmentRange>,
    right_range: Option<SegmentRange>,
    steps: Vec<(usize, bool)>,
}

impl SharedBoundary {
    #[inline]
    pub fn polyline(&self) -> &Polyline {
        &self.polyline
    }

    #[inline]
    pub fn left(&self) -> Option<usize> {
        self.left
    }

    #[inline]
    pub fn right(&self) -> Option<usize> {
        self.right
    }

    #[inline]
    pub fn left_range(&self) -> Option<SegmentRange> {
        self.left_range
    }

    #[inline]
    pub fn right_range(&self) -> Option<SegmentRange> {
        self.right_range
    }

    /// 两侧都有多边形。
    pub fn is_shared(&self) -> bool {
        self.left.is_some() && self.right.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryUse {
    pub boundary: usize,
    pub reversed: bool,
}

/// 以共享边界序列描述的多边形；`rings[0]` 为外边界，其余为洞。
#[derive(Debug, Clone)]
pub struct TopologicalPolygon {
    source: usize,
    rings: Vec<Vec<BoundaryUse>>,
}

impl TopologicalPolygon {
    #[inline]
    pub fn source(&self) -> usize {
        self.source
    }

    #[inline]
    pub fn rings(&self) -> &[Vec<BoundaryUse>] {
        &self.rings
    }
}

#[derive(Debug, Clone, Copy)]
struct Owner {
    polygon: usize,
    forward: bool,
}

#[derive(Debug, Clone)]
struct Piece {
    start: Point,
    end: Point,
    owners: Vec<Owner>,
    left: Option<usize>,
    right: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
struct TaggedSegment {
    polygon: usize,
    ring: usize,
    segment: usize,
    forward: bool,
    start: Point,
    end: Point,
    angle: f32,
    offset: f32,
}

impl TaggedSegment {
    /// 把线段方向规范到 [0, π) 的角度上，并记录原方向是否与规范方向一致。
    fn new(polygon: usize, ring: usize, segment: usize, a: Point, b: Point) -> Self {
        let d = Vector::from_points(a, b);
        let forward = d.dy() > 0.0 || (d.dy() == 0.0 && d.dx() > 0.0);
        let (start, end) = if forward { (a, b) } else { (b, a) };
        let canonical = Vector::from_points(start, end);
        let mut angle = canonical.angle();
        if angle >= std::f32::consts::PI {
            angle -= std::f32::consts::PI;
        }
        let normal = canonical
            .normalized()
            .map(|unit| unit.perpendicular())
            .unwrap_or(Vector::new(0.0, 1.0));
        let offset = normal.dot(Vector::from_vec(start.as_vec2()));
        Self {
            polygon,
            ring,
            segment,
            forward,
            start,
            end,
            angle,
            offset,
        }
    }

    /// 反转规范方向：角度减去 π，偏移取反。
    fn flipped(self) -> Self {
        Self {
            forward: !self.forward,
            start: self.end,
            end: self.start,
            angle: self.angle - std::f32::consts::PI,
            offset: -self.offset,
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RingStep {
    piece: usize,
    forward: bool,
    segment: usize,
    start: Point,
    end: Point,
}

type SplitMap = HashMap<(usize, usize, usize), Vec<(usize, bool)>>;

/// 多边形拓扑图。
#[derive(Debug, Clone)]
pub struct PolygonTopologyGraph {
    polygons: Vec<Polygon>,
    topological: Vec<TopologicalPolygon>,
    boundaries: Vec<SharedBoundary>,
    tolerance: f32,
}

impl PolygonTopologyGraph {
    /// 建图。输入需构成合法的平面剖分：同一线段至多被两个多边形以相反方向共享，
    /// 否则返回 [`GeometryError::Topology`]。
    ///
    /// 多边形会先被调整为“内部在右侧”的绕向，区间下标以调整后的环为准。
    pub fn build_graph(polygons: &[Polygon], tolerance: f32) -> Result<Self, GeometryError> {
        let tolerance = tolerance.max(f32::EPSILON);
        let mut oriented = polygons.to_vec();
        for polygon in &mut oriented {
            polygon.orient_interior_right();
        }

        let segment_count: usize = oriented
            .iter()
            .flat_map(|polygon| polygon.rings())
            .map(|ring| ring.segments().count())
            .sum();
        let mut tagged: Vec<TaggedSegment> = Vec::new();
        tagged.try_reserve(segment_count)?;
        for (polygon_index, polygon) in oriented.iter().enumerate() {
            for (ring_index, ring) in polygon.rings().enumerate() {
                for (segment_index, segment) in ring.segments().enumerate() {
                    if segment.is_zero_length(tolerance) {
                        continue;
                    }
                    tagged.push(TaggedSegment::new(
                        polygon_index,
                        ring_index,
                        segment_index,
                        segment.start,
                        segment.end,
                    ));
                }
            }
        }

        let mut pieces = Vec::new();
        let mut splits = SplitMap::new();
        for line in collinear_groups(tagged, tolerance) {
            node_collinear_run(&line, tolerance, &mut pieces, &mut splits);
        }
        for piece in &mut pieces {
            assign_sides(piece)?;
        }

        let mut degree: HashMap<(i64, i64), usize> = HashMap::new();
        for piece in &pieces {
            *degree.entry(snap(piece.start, tolerance)).or_default() += 1;
            *degree.entry(snap(piece.end, tolerance)).or_default() += 1;
        }

        let mut graph = Self {
            polygons: Vec::with_capacity(oriented.len()),
            topological: Vec::with_capacity(oriented.len()),
            boundaries: Vec::new(),
            tolerance,
        };
        let mut assignment: Vec<Option<usize>> = vec![None; pieces.len()];
        for (polygon_index, polygon) in oriented.iter().enumerate() {
            let mut rings = Vec::new();
            for (ring_index, ring) in polygon.rings().enumerate() {
                let steps = ring_steps(&pieces, &splits, polygon_index, ring_index, ring);
                let uses = graph.attach_ring(
                    polygon_index,
                    ring_index,
                    &steps,
                    &pieces,
                    &degree,
                    &mut assignment,
                )?;
                rings.push(uses);
            }
            graph.topological.push(TopologicalPolygon {
                source: polygon_index,
                rings,
            });
        }
        graph.polygons = oriented;
        Ok(graph)
    }

    fn attach_ring(
        &mut self,
        polygon: usize,
        ring: usize,
        steps: &[RingStep],
        pieces: &[Piece],
        degree: &HashMap<(i64, i64), usize>,
        assignment: &mut [Option<usize>],
    ) -> Result<Vec<BoundaryUse>, GeometryError> {
        let n = steps.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        let neighbour = |step: &RingStep| {
            let piece = &pieces[step.piece];
            if step.forward { piece.left } else { piece.right }
        };
        let breaks: Vec<usize> = (0..n)
            .filter(|&i| {
                let previous = &steps[(i + n - 1) % n];
                let current = &steps[i];
                degree
                    .get(&snap(current.start, self.tolerance))
                    .copied()
                    .unwrap_or(0)
                    != 2
                    || neighbour(previous) != neighbour(current)
            })
            .collect();

        let closed = breaks.is_empty();
        let runs: Vec<Vec<usize>> = if closed {
            vec![(0..n).collect()]
        } else {
            breaks
                .iter()
                .enumerate()
                .map(|(k, &from)| {
                    let to = breaks.get(k + 1).copied().unwrap_or(breaks[0] + n);
                    (from..to).map(|i| i % n).collect()
                })
                .collect()
        };

        let mut uses = Vec::with_capacity(runs.len());
        for run in runs {
            let first = &steps[run[0]];
            let last = &steps[run[run.len() - 1]];
            let range = SegmentRange {
                ring,
                first: first.segment,
                last: last.segment,
            };
            match assignment[first.piece] {
                Some(index) => {
                    self.link_neighbour(index, polygon, &run, steps, closed, range)?;
                    uses.push(BoundaryUse {
                        boundary: index,
                        reversed: true,
                    });
                }
                None => {
                    let mut vertices: Vec<Point> = Vec::with_capacity(run.len() + 1);
                    if !closed {
                        vertices.push(first.start);
                    }
                    for &i in &run {
                        vertices.push(if closed { steps[i].start } else { steps[i].end });
                    }
                    let polyline = Polyline::with_closed(vertices, closed)?;
                    let index = self.boundaries.len();
                    for &i in &run {
                        assignment[steps[i].piece] = Some(index);
                    }
                    self.boundaries.push(SharedBoundary {
                        polyline,
                        left: neighbour(first),
                        right: Some(polygon),
                        left_range: None,
                        right_range: Some(range),
                        steps: run.iter().map(|&i| (steps[i].piece, steps[i].forward)).collect(),
                    });
                    uses.push(BoundaryUse {
                        boundary: index,
                        reversed: false,
                    });
                }
            }
        }
        Ok(uses)
    }

    /// 邻面沿相反方向走过已有边界时，校验片段序列一致并登记左侧区间。
    fn link_neighbour(
        &mut self,
        index: usize,
        polygon: usize,
        run: &[usize],
        steps: &[RingStep],
        closed: bool,
        range: SegmentRange,
    ) -> Result<(), GeometryError> {
        let boundary = &mut self.boundaries[index];
        let len = boundary.steps.len();
        let mismatch = || {
            GeometryError::Topology(format!(
                "ring {} of polygon {polygon} does not line up with boundary {index}",
                range.ring
            ))
        };
        if run.len() != len || boundary.left != Some(polygon) {
            return Err(mismatch());
        }
        let offset = if closed {
            boundary
                .steps
                .iter()
                .position(|(piece, _)| *piece == steps[run[0]].piece)
                .ok_or_else(mismatch)?
        } else {
            len - 1
        };
        for (k, &i) in run.iter().enumerate() {
            let (piece, forward) = boundary.steps[(offset + len - k) % len];
            if piece != steps[i].piece || forward == steps[i].forward {
                return Err(mismatch());
            }
        }
        boundary.left_range = Some(range);
        Ok(())
    }

    #[inline]
    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    /// 调整绕向后的输入多边形。
    pub fn polygon(&self, index: usize) -> Option<&Polygon> {
        self.polygons.get(index)
    }

    pub fn topological_polygons(&self) -> &[TopologicalPolygon] {
        &self.topological
    }

    pub fn boundaries(&self) -> &[SharedBoundary] {
        &self.boundaries
    }

    /// 两侧都有多边形的边界。
    pub fn shared_boundaries(&self) -> impl Iterator<Item = &SharedBoundary> {
        self.boundaries.iter().filter(|boundary| boundary.is_shared())
    }

    /// 允许调用方直接修改某条边界的几何（例如化简）。端点若被移动，重建的多边形将无法闭合。
    pub fn boundary_polyline_mut(&mut self, index: usize) -> Option<&mut Polyline> {
        self.boundaries
            .get_mut(index)
            .map(|boundary| &mut boundary.polyline)
    }

    /// 对每条边界做 Douglas–Peucker 化简，端点保持不动，相邻面因此仍然严密拼接。
    /// 返回顶点数减少的边界数量。
    pub fn simplify_boundaries(&mut self, tolerance: f32) -> Result<usize, GeometryError> {
        let simplifier = PolylineSimplifier::new(tolerance);
        let mut changed = 0;
        for boundary in &mut self.boundaries {
            if let Simplified::Polyline(simplified) = simplifier.simplify(&boundary.polyline)? {
                if simplified.num_vertices() < boundary.polyline.num_vertices() {
                    changed += 1;
                }
                boundary.polyline = simplified;
            }
        }
        Ok(changed)
    }

    /// 沿拓扑多边形的边界序列拼接出多边形。
    pub fn build_polygon_from_shared_boundaries(
        &self,
        index: usize,
    ) -> Result<Polygon, GeometryError> {
        let topological = self
            .topological
            .get(index)
            .ok_or(GeometryError::IndexOutOfRange {
                index,
                len: self.topological.len(),
            })?;
        let mut rings = Vec::with_capacity(topological.rings.len());
        for uses in &topological.rings {
            rings.push(self.stitch_ring(index, uses)?);
        }
        let mut rings = rings.into_iter();
        let boundary = rings.next().ok_or(GeometryError::BoundaryCantBeNull)?;
        Polygon::with_holes(boundary, rings.collect())
    }

    fn stitch_ring(&self, polygon: usize, uses: &[BoundaryUse]) -> Result<Vec<Point>, GeometryError> {
        let broken = || GeometryError::Topology(format!("boundaries of polygon {polygon} are broken"));
        if let [single] = uses {
            let boundary = &self.boundaries[single.boundary];
            if boundary.polyline.closed() {
                let mut vertices = boundary.polyline.vertices().to_vec();
                if single.reversed {
                    vertices.reverse();
                }
                return Ok(vertices);
            }
        }
        let mut vertices: Vec<Point> = Vec::new();
        for usage in uses {
            let polyline = &self.boundaries[usage.boundary].polyline;
            if polyline.closed() {
                return Err(broken());
            }
            let mut part = polyline.vertices().to_vec();
            if usage.reversed {
                part.reverse();
            }
            let joins = vertices
                .last()
                .map(|last| last.is_near(part[0], self.tolerance));
            match joins {
                Some(false) => return Err(broken()),
                Some(true) => vertices.extend(part.into_iter().skip(1)),
                None => vertices = part,
            }
        }
        let closes = vertices.len() > 1
            && matches!(
                (vertices.first(), vertices.last()),
                (Some(first), Some(last)) if first.is_near(*last, self.tolerance)
            );
        if !closes {
            return Err(broken());
        }
        vertices.pop();
        Ok(vertices)
    }

    /// 合并一组多边形：丢弃两侧都属于该组的内部边界，把其余边界拼成闭合环。
    /// 结果环同样是“内部在右侧”的绕向。
    pub fn dissolve(&self, members: &[usize]) -> Result<Vec<Polyline>, GeometryError> {
        let inside = |side: Option<usize>| side.is_some_and(|polygon| members.contains(&polygon));
        let mut rings = Vec::new();
        let mut open: Vec<Vec<Point>> = Vec::new();
        for boundary in &self.boundaries {
            let mut vertices = boundary.polyline.vertices().to_vec();
            match (inside(boundary.right), inside(boundary.left)) {
                (true, false) => {}
                (false, true) => vertices.reverse(),
                _ => continue,
            }
            if boundary.polyline.closed() {
                rings.push(Polyline::new_closed(vertices)?);
            } else {
                open.push(vertices);
            }
        }

        while let Some(mut chain) = open.pop() {
            loop {
                let (Some(&first), Some(&last)) = (chain.first(), chain.last()) else {
                    break;
                };
                if chain.len() > 2 && first.is_near(last, self.tolerance) {
                    chain.pop();
                    break;
                }
                let next = open
                    .iter()
                    .position(|candidate| candidate[0].is_near(last, self.tolerance))
                    .ok_or_else(|| {
                        GeometryError::Topology("dissolved outline is not closed".into())
                    })?;
                let next = open.swap_remove(next);
                chain.extend(next.into_iter().skip(1));
            }
            rings.push(Polyline::new_closed(chain)?);
        }
        Ok(rings)
    }
}

fn snap(point: Point, tolerance: f32) -> (i64, i64) {
    (
        (point.x() / tolerance).round() as i64,
        (point.y() / tolerance).round() as i64,
    )
}

/// 共线分组的角度容差（弧度）。
const ANGLE_TOLERANCE: f32 = 1e-3;

/// 先按角度、再按偏移把共线线段归为一组。接近 π 的方向翻到 0 附近，与近水平线段同组。
fn collinear_groups(tagged: Vec<TaggedSegment>, tolerance: f32) -> Vec<Vec<TaggedSegment>> {
    let mut tagged: Vec<TaggedSegment> = tagged
        .into_iter()
        .map(|segment| {
            if segment.angle > std::f32::consts::PI - ANGLE_TOLERANCE {
                segment.flipped()
            } else {
                segment
            }
        })
        .collect();
    tagged.sort_by(|a, b| a.angle.total_cmp(&b.angle));
    let mut by_angle: Vec<Vec<TaggedSegment>> = Vec::new();
    for segment in tagged {
        let joins = by_angle
            .last()
            .and_then(|group| group.last())
            .is_some_and(|prev| (segment.angle - prev.angle).abs() <= ANGLE_TOLERANCE);
        match by_angle.last_mut() {
            Some(group) if joins => group.push(segment),
            _ => by_angle.push(vec![segment]),
        }
    }

    let mut lines = Vec::new();
    for mut group in by_angle {
        group.sort_by(|a, b| a.offset.total_cmp(&b.offset));
        let mut current: Vec<TaggedSegment> = Vec::new();
        for segment in group {
            if current
                .last()
                .is_some_and(|prev| (segment.offset - prev.offset).abs() > tolerance)
            {
                lines.push(std::mem::take(&mut current));
            }
            current.push(segment);
        }
        if !current.is_empty() {
            lines.push(current);
        }
    }
    lines
}

/// 在一条直线上收集所有端点作为断点，把每条线段切成相邻断点之间的基本片段。
fn node_collinear_run(
    line: &[TaggedSegment],
    tolerance: f32,
    pieces: &mut Vec<Piece>,
    splits: &mut SplitMap,
) {
    let Some(reference) = line.first() else {
        return;
    };
    let Some(unit) = Vector::from_points(reference.start, reference.end).normalized() else {
        return;
    };
    let origin = reference.start;
    let param = |point: Point| unit.dot(Vector::from_points(origin, point));

    let mut breaks: Vec<(f32, Point)> = line
        .iter()
        .flat_map(|segment| {
            [
                (param(segment.start), segment.start),
                (param(segment.end), segment.end),
            ]
        })
        .collect();
    breaks.sort_by(|a, b| a.0.total_cmp(&b.0));
    breaks.dedup_by(|next, kept| (next.0 - kept.0).abs() <= tolerance);

    let mut local: Vec<Option<usize>> = vec![None; breaks.len().saturating_sub(1)];
    for segment in line {
        let from = breaks.partition_point(|(t, _)| *t < param(segment.start) - tolerance);
        let to = breaks.partition_point(|(t, _)| *t < param(segment.end) - tolerance);
        let mut ordered = Vec::with_capacity(to.saturating_sub(from));
        for slot in from..to {
            let piece = *local[slot].get_or_insert_with(|| {
                pieces.push(Piece {
                    start: breaks[slot].1,
                    end: breaks[slot + 1].1,
                    owners: Vec::new(),
                    left: None,
                    right: None,
                });
                pieces.len() - 1
            });
            pieces[piece].owners.push(Owner {
                polygon: segment.polygon,
                forward: segment.forward,
            });
            ordered.push((piece, segment.forward));
        }
        if !segment.forward {
            ordered.reverse();
        }
        splits
            .entry((segment.polygon, segment.ring, segment.segment))
            .or_default()
            .extend(ordered);
    }
}

fn assign_sides(piece: &mut Piece) -> Result<(), GeometryError> {
    match piece.owners.as_slice() {
        [owner] => {
            if owner.forward {
                piece.right = Some(owner.polygon);
            } else {
                piece.left = Some(owner.polygon);
            }
            Ok(())
        }
        [a, b] if a.forward != b.forward => {
            let (right, left) = if a.forward { (a, b) } else { (b, a) };
            piece.right = Some(right.polygon);
            piece.left = Some(left.polygon);
            Ok(())
        }
        [a, b] => Err(GeometryError::Topology(format!(
            "polygons {} and {} overlap with the same winding between {:?} and {:?}",
            a.polygon, b.polygon, piece.start, piece.end
        ))),
        owners => Err(GeometryError::Topology(format!(
            "segment between {:?} and {:?} is shared by {} polygons",
            piece.start,
            piece.end,
            owners.len()
        ))),
    }
}

fn ring_steps(
    pieces: &[Piece],
    splits: &SplitMap,
    polygon: usize,
    ring: usize,
    polyline: &Polyline,
) -> Vec<RingStep> {
    let mut steps = Vec::new();
    for segment in 0..polyline.num_segments() {
        let Some(parts) = splits.get(&(polygon, ring, segment)) else {
            continue;
        };
        for &(piece, forward) in parts {
            let p = &pieces[piece];
            let (start, end) = if forward { (p.start, p.end) } else { (p.end, p.start) };
            steps.push(RingStep {
                piece,
                forward,
                segment,
                start,
                end,
            });
        }
    }
    steps
}
