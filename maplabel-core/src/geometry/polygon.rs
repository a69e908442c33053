use std::sync::OnceLock;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use super::point::{Point, Vector};
use super::polyline::{Polyline, PolylineView};
use super::rect::{Rectangle, UprightRectangle};
use crate::errors::GeometryError;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawPolygon {
    boundary: Vec<Point>,
    #[serde(default)]
    holes: Vec<Vec<Point>>,
}

/// 多边形：一个外边界加若干洞，均为闭合多段线。
///
/// 约定“内部在右侧”：外边界顺时针，洞逆时针。构造时不强制绕向，
/// 需要时调用 [`Polygon::orient_interior_right`]。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawPolygon", into = "RawPolygon")]
pub struct Polygon {
    boundary: Polyline,
    holes: Vec<Polyline>,
    mbr: OnceLock<Rectangle>,
}

impl TryFrom<RawPolygon> for Polygon {
    type Error = GeometryError;

    fn try_from(raw: RawPolygon) -> Result<Self, Self::Error> {
        let mut polygon = Polygon::new(raw.boundary)?;
        for hole in raw.holes {
            polygon.add_hole(hole)?;
        }
        Ok(polygon)
    }
}

impl From<Polygon> for RawPolygon {
    fn from(value: Polygon) -> Self {
        RawPolygon {
            boundary: value.boundary.vertices().to_vec(),
            holes: value
                .holes
                .iter()
                .map(|hole| hole.vertices().to_vec())
                .collect(),
        }
    }
}

impl PartialEq for Polygon {
    fn eq(&self, other: &Self) -> bool {
        self.boundary == other.boundary && self.holes == other.holes
    }
}

fn closed_ring(vertices: Vec<Point>) -> Result<Polyline, GeometryError> {
    if vertices.is_empty() {
        return Err(GeometryError::BoundaryCantBeNull);
    }
    let ring = Polyline::new_closed(vertices).map_err(|_| GeometryError::TooFewVertices {
        required: 3,
        actual: 1,
    })?;
    if ring.num_vertices() < 3 {
        return Err(GeometryError::TooFewVertices {
            required: 3,
            actual: ring.num_vertices(),
        });
    }
    Ok(ring)
}

/// 环的有向面积（逆时针为正）。
pub(crate) fn signed_ring_area(vertices: &[Point]) -> f32 {
    let n = vertices.len();
    if n < 3 {
        return 0.0;
    }
    let mut twice = 0.0_f64;
    for i in 0..n {
        let a = vertices[i];
        let b = vertices[(i + 1) % n];
        twice += f64::from(a.x()) * f64::from(b.y()) - f64::from(b.x()) * f64::from(a.y());
    }
    (twice * 0.5) as f32
}

fn ring_crossings(ring: &Polyline, point: Point) -> bool {
    let vertices = ring.vertices();
    let n = vertices.len();
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let a = vertices[i];
        let b = vertices[j];
        if (a.y() > point.y()) != (b.y() > point.y()) {
            let x = a.x() + (point.y() - a.y()) * (b.x() - a.x()) / (b.y() - a.y());
            if point.x() < x {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

impl Polygon {
    /// 以顶点序列构造外边界；首尾重复点会被去掉。
    pub fn new(boundary: Vec<Point>) -> Result<Self, GeometryError> {
        Ok(Self {
            boundary: closed_ring(boundary)?,
            holes: Vec::new(),
            mbr: OnceLock::new(),
        })
    }

    pub fn from_polyline(boundary: Polyline) -> Result<Self, GeometryError> {
        Self::new(boundary.vertices().to_vec())
    }

    pub fn with_holes(
        boundary: Vec<Point>,
        holes: Vec<Vec<Point>>,
    ) -> Result<Self, GeometryError> {
        let mut polygon = Self::new(boundary)?;
        for hole in holes {
            polygon.add_hole(hole)?;
        }
        Ok(polygon)
    }

    pub fn add_hole(&mut self, hole: Vec<Point>) -> Result<(), GeometryError> {
        self.holes.push(closed_ring(hole)?);
        Ok(())
    }

    #[inline]
    pub fn boundary(&self) -> &Polyline {
        &self.boundary
    }

    #[inline]
    pub fn holes(&self) -> &[Polyline] {
        &self.holes
    }

    /// 外边界在前，洞依次在后。
    pub fn rings(&self) -> impl Iterator<Item = &Polyline> {
        std::iter::once(&self.boundary).chain(self.holes.iter())
    }

    #[inline]
    pub fn bounding_box(&self) -> UprightRectangle {
        self.boundary.bounding_box()
    }

    /// 外边界面积减去洞的面积。
    pub fn area(&self) -> f32 {
        let outer = signed_ring_area(self.boundary.vertices()).abs();
        let holes: f32 = self
            .holes
            .iter()
            .map(|hole| signed_ring_area(hole.vertices()).abs())
            .sum();
        (outer - holes).max(0.0)
    }

    pub fn is_interior_right(&self) -> bool {
        signed_ring_area(self.boundary.vertices()) <= 0.0
            && self
                .holes
                .iter()
                .all(|hole| signed_ring_area(hole.vertices()) >= 0.0)
    }

    /// 调整绕向使内部位于每条环的右侧。
    pub fn orient_interior_right(&mut self) {
        if signed_ring_area(self.boundary.vertices()) > 0.0 {
            self.boundary.reverse();
        }
        for hole in &mut self.holes {
            if signed_ring_area(hole.vertices()) < 0.0 {
                hole.reverse();
            }
        }
    }

    /// 奇偶规则判定，洞内的点不算在多边形内。
    pub fn contains_point(&self, point: Point) -> bool {
        if !self.bounding_box().contains_point(point) {
            return false;
        }
        self.rings()
            .filter(|ring| ring_crossings(ring, point))
            .count()
            % 2
            == 1
    }

    pub fn translate(&mut self, offset: Vector) {
        self.boundary.translate(offset);
        for hole in &mut self.holes {
            hole.translate(offset);
        }
        self.mbr = OnceLock::new();
    }

    pub fn rotate(&mut self, angle: f32, center: Point) {
        self.boundary.rotate(angle, center);
        for hole in &mut self.holes {
            hole.rotate(angle, center);
        }
        self.mbr = OnceLock::new();
    }

    pub fn scale(&mut self, factor: f32, center: Point) {
        self.boundary.scale(factor, center);
        for hole in &mut self.holes {
            hole.scale(factor, center);
        }
        self.mbr = OnceLock::new();
    }

    /// 最小面积外接矩形，首次访问时按旋转卡壳计算并缓存。
    pub fn minimum_bounding_rectangle(&self) -> &Rectangle {
        self.mbr
            .get_or_init(|| minimum_area_rectangle(self.boundary.vertices()))
    }
}

/// Andrew 单调链：返回逆时针凸包，不含共线点。
fn monotone_chain(mut points: Vec<Vec2>) -> Vec<Vec2> {
    points.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    points.dedup();
    if points.len() < 3 {
        return points;
    }
    let cross = |o: Vec2, a: Vec2, b: Vec2| (a - o).perp_dot(b - o);
    let mut hull: Vec<Vec2> = Vec::with_capacity(points.len() * 2);
    for &p in &points {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    let lower_len = hull.len() + 1;
    for &p in points.iter().rev().skip(1) {
        while hull.len() >= lower_len
            && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0
        {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();
    hull
}

fn minimum_area_rectangle(vertices: &[Point]) -> Rectangle {
    let hull = monotone_chain(vertices.iter().map(|p| p.as_vec2()).collect());
    let fallback = || {
        Rectangle::from_upright(&UprightRectangle::from_points(vertices.iter().copied()))
    };
    if hull.len() < 3 {
        return fallback();
    }
    let mut best: Option<(f32, Rectangle)> = None;
    for i in 0..hull.len() {
        let edge = hull[(i + 1) % hull.len()] - hull[i];
        let Some(along) = edge.try_normalize() else {
            continue;
        };
        let across = along.perp();
        let (mut min_a, mut max_a) = (f32::INFINITY, f32::NEG_INFINITY);
        let (mut min_c, mut max_c) = (f32::INFINITY, f32::NEG_INFINITY);
        for p in &hull {
            let a = p.dot(along);
            let c = p.dot(across);
            min_a = min_a.min(a);
            max_a = max_a.max(a);
            min_c = min_c.min(c);
            max_c = max_c.max(c);
        }
        let area = (max_a - min_a) * (max_c - min_c);
        if best.as_ref().is_none_or(|(best_area, _)| area < *best_area) {
            let origin = along * min_a + across * min_c;
            let rect = Rectangle::from_origin(
                Point::from_vec(origin),
                max_a - min_a,
                max_c - min_c,
                along.y.atan2(along.x),
            );
            best = Some((area, rect));
        }
    }
    best.map(|(_, rect)| rect).unwrap_or_else(fallback)
}

/// 所有多边形外边界顶点的凸包，输出为顺时针（内部在右侧）。
pub fn generate_convex_hull(polygons: &[Polygon]) -> Result<Polygon, GeometryError> {
    let points: Vec<Vec2> = polygons
        .iter()
        .flat_map(|polygon| polygon.boundary().vertices().iter().map(|p| p.as_vec2()))
        .collect();
    let mut hull = monotone_chain(points);
    if hull.len() < 3 {
        return Err(GeometryError::DegenerateGeometry(format!(
            "convex hull needs 3 non-collinear points, got {}",
            hull.len()
        )));
    }
    hull.reverse();
    Polygon::new(hull.into_iter().map(Point::from_vec).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: f32, y0: f32, size: f32) -> Polygon {
        Polygon::new(vec![
            Point::new(x0, y0),
            Point::new(x0 + size, y0),
            Point::new(x0 + size, y0 + size),
            Point::new(x0, y0 + size),
        ])
        .unwrap()
    }

    #[test]
    fn construction_rejects_null_and_short_boundaries() {
        assert_eq!(
            Polygon::new(Vec::new()).unwrap_err(),
            GeometryError::BoundaryCantBeNull
        );
        assert!(matches!(
            Polygon::new(vec![Point::ORIGIN, Point::new(1.0, 0.0), Point::ORIGIN]),
            Err(GeometryError::TooFewVertices { required: 3, .. })
        ));
    }

    #[test]
    fn orientation_puts_interior_on_the_right() {
        let mut polygon = Polygon::with_holes(
            vec![
                Point::new(0.0, 0.0),
                Point::new(10.0, 0.0),
                Point::new(10.0, 10.0),
                Point::new(0.0, 10.0),
            ],
            vec![vec![
                Point::new(2.0, 2.0),
                Point::new(2.0, 4.0),
                Point::new(4.0, 4.0),
                Point::new(4.0, 2.0),
            ]],
        )
        .unwrap();
        assert!(!polygon.is_interior_right());
        polygon.orient_interior_right();
        assert!(polygon.is_interior_right());
        assert!((polygon.area() - 96.0).abs() < 1e-3);
        assert!(polygon.contains_point(Point::new(5.0, 5.0)));
        assert!(!polygon.contains_point(Point::new(3.0, 3.0)));
        assert!(!polygon.contains_point(Point::new(11.0, 3.0)));
    }

    #[test]
    fn convex_hull_contains_every_input_vertex() {
        let polygons = vec![
            square(0.0, 0.0, 4.0),
            square(3.0, 5.0, 2.0),
            Polygon::new(vec![
                Point::new(-2.0, 1.0),
                Point::new(1.0, 9.0),
                Point::new(0.5, 2.0),
            ])
            .unwrap(),
        ];
        let hull = generate_convex_hull(&polygons).unwrap();
        assert!(signed_ring_area(hull.boundary().vertices()) < 0.0);

        let ring = hull.boundary().vertices();
        for polygon in &polygons {
            for vertex in polygon.boundary().vertices() {
                for i in 0..ring.len() {
                    let a = ring[i];
                    let b = ring[(i + 1) % ring.len()];
                    let side = Vector::from_points(a, b).cross(Vector::from_points(a, *vertex));
                    assert!(side <= 1e-3, "{vertex:?} outside hull edge {a:?}->{b:?}");
                }
            }
        }
    }

    #[test]
    fn convex_hull_of_collinear_points_is_degenerate() {
        let flat = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(2.0, 0.0),
        ])
        .unwrap();
        assert!(matches!(
            generate_convex_hull(&[flat]),
            Err(GeometryError::DegenerateGeometry(_))
        ));
    }

    #[test]
    fn minimum_bounding_rectangle_follows_rotation() {
        let mut polygon = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(4.0, 0.0),
            Point::new(4.0, 1.0),
            Point::new(0.0, 1.0),
        ])
        .unwrap();
        assert!((polygon.minimum_bounding_rectangle().area() - 4.0).abs() < 1e-3);

        polygon.rotate(std::f32::consts::FRAC_PI_4, Point::ORIGIN);
        let mbr = polygon.minimum_bounding_rectangle();
        assert!((mbr.area() - 4.0).abs() < 1e-3);
        let upright = polygon.bounding_box();
        assert!(upright.width() * upright.height() > 6.0);
    }
}
