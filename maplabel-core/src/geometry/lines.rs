use serde::{Deserialize, Serialize};

use super::point::{Point, Vector};
use super::rect::{Rectangle, UprightRectangle};
use crate::errors::GeometryError;

const ZERO_LENGTH_SQUARED: f32 = 1e-12;

/// 圆。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub center: Point,
    pub radius: f32,
}

impl Circle {
    #[inline]
    pub fn new(center: Point, radius: f32) -> Self {
        Self {
            center,
            radius: radius.abs(),
        }
    }

    pub fn contains_point(&self, point: Point, tolerance: f32) -> bool {
        let limit = self.radius + tolerance;
        self.center.distance_squared(point) <= limit * limit
    }

    pub fn intersects_segment(&self, segment: &LineSegment) -> bool {
        segment.distance_to_point(self.center) <= self.radius
    }

    pub fn bounding_box(&self) -> UprightRectangle {
        UprightRectangle::from_coords(
            self.center.x() - self.radius,
            self.center.y() - self.radius,
            self.center.x() + self.radius,
            self.center.y() + self.radius,
        )
    }
}

/// 有向线段。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineSegment {
    pub start: Point,
    pub end: Point,
}

impl LineSegment {
    #[inline]
    pub fn new(start: Point, end: Point) -> Self {
        Self { start, end }
    }

    #[inline]
    pub fn direction(&self) -> Vector {
        Vector::from_points(self.start, self.end)
    }

    #[inline]
    pub fn length(&self) -> f32 {
        self.start.distance(self.end)
    }

    #[inline]
    pub fn is_zero_length(&self, tolerance: f32) -> bool {
        self.start.is_near(self.end, tolerance)
    }

    #[inline]
    pub fn point_at(&self, t: f32) -> Point {
        self.start.lerp(self.end, t)
    }

    #[inline]
    pub fn reversed(&self) -> LineSegment {
        Self::new(self.end, self.start)
    }

    pub fn bounding_box(&self) -> UprightRectangle {
        UprightRectangle::new(self.start, self.end)
    }

    /// 加粗后的描边矩形。
    pub fn stroke_box(&self, width: f32) -> Rectangle {
        Rectangle::from_segment(self, width * 0.5)
    }

    /// Liang–Barsky 裁剪，返回保留部分在线段上的参数区间 `[t0, t1]`。
    pub fn clip_parameters_to_upright_rectangle(
        &self,
        rect: &UprightRectangle,
    ) -> Result<Option<(f32, f32)>, GeometryError> {
        let d = self.end.as_vec2() - self.start.as_vec2();
        if d.length_squared() <= ZERO_LENGTH_SQUARED {
            return Err(GeometryError::ZeroLengthSegment);
        }
        if rect.is_empty() {
            return Ok(None);
        }
        let ll = rect.lower_left();
        let ur = rect.upper_right();
        let p = [-d.x, d.x, -d.y, d.y];
        let q = [
            self.start.x() - ll.x(),
            ur.x() - self.start.x(),
            self.start.y() - ll.y(),
            ur.y() - self.start.y(),
        ];
        let mut t0 = 0.0_f32;
        let mut t1 = 1.0_f32;
        for (p, q) in p.into_iter().zip(q) {
            if p == 0.0 {
                if q < 0.0 {
                    return Ok(None);
                }
                continue;
            }
            let r = q / p;
            if p < 0.0 {
                if r > t1 {
                    return Ok(None);
                }
                t0 = t0.max(r);
            } else {
                if r < t0 {
                    return Ok(None);
                }
                t1 = t1.min(r);
            }
        }
        Ok(Some((t0, t1)))
    }

    /// 裁剪到任意朝向的矩形：先把线段变换到矩形自身坐标系，再做直立裁剪。
    /// 参数区间在仿射变换下不变，因此可直接用于原始线段。
    pub fn clip_parameters_to_rectangle(
        &self,
        rect: &Rectangle,
    ) -> Result<Option<(f32, f32)>, GeometryError> {
        let local = LineSegment::new(rect.to_local(self.start), rect.to_local(self.end));
        local.clip_parameters_to_upright_rectangle(&rect.local_box())
    }

    pub fn clip_to_upright_rectangle(
        &self,
        rect: &UprightRectangle,
    ) -> Result<Option<LineSegment>, GeometryError> {
        Ok(self
            .clip_parameters_to_upright_rectangle(rect)?
            .map(|(t0, t1)| self.sub_segment(t0, t1)))
    }

    pub fn clip_to_rectangle(&self, rect: &Rectangle) -> Result<Option<LineSegment>, GeometryError> {
        Ok(self
            .clip_parameters_to_rectangle(rect)?
            .map(|(t0, t1)| self.sub_segment(t0, t1)))
    }

    /// 参数区间对应的子线段；端点参数为 0/1 时保留原始坐标，避免引入舍入误差。
    pub fn sub_segment(&self, t0: f32, t1: f32) -> LineSegment {
        let start = if t0 <= 0.0 { self.start } else { self.point_at(t0) };
        let end = if t1 >= 1.0 { self.end } else { self.point_at(t1) };
        LineSegment::new(start, end)
    }

    /// 线段上离 `point` 最近的参数（限制在 `[0, 1]`）。
    pub fn closest_parameter(&self, point: Point) -> f32 {
        let d = self.end.as_vec2() - self.start.as_vec2();
        let len_sq = d.length_squared();
        if len_sq <= ZERO_LENGTH_SQUARED {
            return 0.0;
        }
        ((point.as_vec2() - self.start.as_vec2()).dot(d) / len_sq).clamp(0.0, 1.0)
    }

    pub fn distance_to_point(&self, point: Point) -> f32 {
        self.point_at(self.closest_parameter(point)).distance(point)
    }

    /// 两线段的交点；平行（含共线重叠）时返回 `None`。
    pub fn intersection(&self, other: &LineSegment, tolerance: f32) -> Option<Point> {
        let r = self.direction();
        let s = other.direction();
        let denom = r.cross(s);
        if denom.abs() <= f32::EPSILON {
            return None;
        }
        let qp = Vector::from_points(self.start, other.start);
        let t = qp.cross(s) / denom;
        let u = qp.cross(r) / denom;
        let t_tol = tolerance / r.magnitude().max(f32::EPSILON);
        let u_tol = tolerance / s.magnitude().max(f32::EPSILON);
        if t < -t_tol || t > 1.0 + t_tol || u < -u_tol || u > 1.0 + u_tol {
            return None;
        }
        Some(self.point_at(t.clamp(0.0, 1.0)))
    }

    pub fn intersects(&self, other: &LineSegment, tolerance: f32) -> bool {
        self.intersection(other, tolerance).is_some()
    }

    /// 两线段端点在容差内一致（方向可相反）。
    pub fn is_coincident(&self, other: &LineSegment, tolerance: f32) -> bool {
        (self.start.is_near(other.start, tolerance) && self.end.is_near(other.end, tolerance))
            || (self.start.is_near(other.end, tolerance) && self.end.is_near(other.start, tolerance))
    }

    /// 点是否在线段上（垂距不超过容差）。
    pub fn contains_point(&self, point: Point, tolerance: f32) -> bool {
        self.distance_to_point(point) <= tolerance
    }
}

/// 射线：原点加单位方向。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    origin: Point,
    direction: Vector,
}

impl Ray {
    /// 方向为零向量时返回 `None`。
    pub fn new(origin: Point, direction: Vector) -> Option<Self> {
        direction.normalized().map(|direction| Self { origin, direction })
    }

    #[inline]
    pub fn origin(&self) -> Point {
        self.origin
    }

    #[inline]
    pub fn direction(&self) -> Vector {
        self.direction
    }

    #[inline]
    pub fn point_at(&self, distance: f32) -> Point {
        self.origin.translate(self.direction.scaled(distance))
    }

    /// 射线与圆最近的交点（`t >= 0`），解二次方程 `t² + 2bt + c = 0`。
    pub fn intersect_circle(&self, circle: &Circle) -> Option<Point> {
        let oc = Vector::from_points(circle.center, self.origin);
        let b = self.direction.dot(oc);
        let c = oc.dot(oc) - circle.radius * circle.radius;
        let discriminant = b * b - c;
        if discriminant < 0.0 {
            return None;
        }
        let root = discriminant.sqrt();
        let mut t = -b - root;
        if t < 0.0 {
            t = -b + root;
        }
        if t < 0.0 {
            return None;
        }
        Some(self.point_at(t))
    }

    pub fn intersect_segment(&self, segment: &LineSegment) -> Option<Point> {
        let s = segment.direction();
        let denom = self.direction.cross(s);
        if denom.abs() <= f32::EPSILON {
            return None;
        }
        let qp = Vector::from_points(self.origin, segment.start);
        let t = qp.cross(s) / denom;
        let u = qp.cross(self.direction) / denom;
        if t < 0.0 || !(0.0..=1.0).contains(&u) {
            return None;
        }
        Some(self.point_at(t))
    }

    pub fn intersect_line(&self, line: &Line) -> Option<Point> {
        let denom = self.direction.cross(line.direction());
        if denom.abs() <= f32::EPSILON {
            return None;
        }
        let qp = Vector::from_points(self.origin, line.point());
        let t = qp.cross(line.direction()) / denom;
        if t < 0.0 {
            return None;
        }
        Some(self.point_at(t))
    }
}

/// 无限长直线：经过 `point`，沿单位方向 `direction`。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line {
    point: Point,
    direction: Vector,
}

impl Line {
    pub fn new(point: Point, direction: Vector) -> Option<Self> {
        direction.normalized().map(|direction| Self { point, direction })
    }

    pub fn through(a: Point, b: Point) -> Option<Self> {
        Self::new(a, Vector::from_points(a, b))
    }

    #[inline]
    pub fn point(&self) -> Point {
        self.point
    }

    #[inline]
    pub fn direction(&self) -> Vector {
        self.direction
    }

    /// 有符号距离：正值表示点在直线左侧。
    pub fn side_of(&self, point: Point) -> f32 {
        self.direction.cross(Vector::from_points(self.point, point))
    }

    pub fn distance_to_point(&self, point: Point) -> f32 {
        self.side_of(point).abs()
    }

    pub fn project(&self, point: Point) -> Point {
        let t = self.direction.dot(Vector::from_points(self.point, point));
        self.point.translate(self.direction.scaled(t))
    }

    /// 两直线交点（二元线性方程组），平行时返回 `None`。
    pub fn intersect(&self, other: &Line) -> Option<Point> {
        let denom = self.direction.cross(other.direction);
        if denom.abs() <= f32::EPSILON {
            return None;
        }
        let qp = Vector::from_points(self.point, other.point);
        let t = qp.cross(other.direction) / denom;
        Some(self.point.translate(self.direction.scaled(t)))
    }
}
