use glam::Vec2;
use serde::{Deserialize, Serialize};

use super::lines::LineSegment;
use super::point::{Point, Vector};

/// 轴对齐矩形，用作包围盒。非空时保证左下角分量不大于右上角。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UprightRectangle {
    lower_left: Point,
    upper_right: Point,
}

impl UprightRectangle {
    /// 由任意两个对角点构造，自动规范化为左下/右上。
    #[inline]
    pub fn new(a: Point, b: Point) -> Self {
        Self {
            lower_left: Point::from_vec(a.as_vec2().min(b.as_vec2())),
            upper_right: Point::from_vec(a.as_vec2().max(b.as_vec2())),
        }
    }

    #[inline]
    pub fn from_coords(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self::new(Point::new(x0, y0), Point::new(x1, y1))
    }

    #[inline]
    pub fn empty() -> Self {
        Self {
            lower_left: Point::new(f32::INFINITY, f32::INFINITY),
            upper_right: Point::new(f32::NEG_INFINITY, f32::NEG_INFINITY),
        }
    }

    pub fn from_points<I: IntoIterator<Item = Point>>(points: I) -> Self {
        let mut bounds = Self::empty();
        for point in points {
            bounds.include_point(point);
        }
        bounds
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lower_left.x() > self.upper_right.x() || self.lower_left.y() > self.upper_right.y()
    }

    #[inline]
    pub fn lower_left(&self) -> Point {
        self.lower_left
    }

    #[inline]
    pub fn upper_right(&self) -> Point {
        self.upper_right
    }

    #[inline]
    pub fn width(&self) -> f32 {
        if self.is_empty() {
            0.0
        } else {
            self.upper_right.x() - self.lower_left.x()
        }
    }

    #[inline]
    pub fn height(&self) -> f32 {
        if self.is_empty() {
            0.0
        } else {
            self.upper_right.y() - self.lower_left.y()
        }
    }

    #[inline]
    pub fn center(&self) -> Point {
        debug_assert!(!self.is_empty());
        self.lower_left.midpoint(self.upper_right)
    }

    /// 按逆时针顺序返回四个角点，从左下角开始。
    pub fn corners(&self) -> [Point; 4] {
        let ll = self.lower_left;
        let ur = self.upper_right;
        [
            ll,
            Point::new(ur.x(), ll.y()),
            ur,
            Point::new(ll.x(), ur.y()),
        ]
    }

    pub fn include_point(&mut self, point: Point) {
        if self.is_empty() {
            self.lower_left = point;
            self.upper_right = point;
            return;
        }
        self.lower_left = Point::from_vec(self.lower_left.as_vec2().min(point.as_vec2()));
        self.upper_right = Point::from_vec(self.upper_right.as_vec2().max(point.as_vec2()));
    }

    pub fn include_rect(&mut self, other: &UprightRectangle) {
        if other.is_empty() {
            return;
        }
        self.include_point(other.lower_left);
        self.include_point(other.upper_right);
    }

    /// 闭区间相交判定（共享边也算相交）。
    pub fn intersects(&self, other: &UprightRectangle) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        self.lower_left.x() <= other.upper_right.x()
            && other.lower_left.x() <= self.upper_right.x()
            && self.lower_left.y() <= other.upper_right.y()
            && other.lower_left.y() <= self.upper_right.y()
    }

    pub fn intersection(&self, other: &UprightRectangle) -> Option<UprightRectangle> {
        if !self.intersects(other) {
            return None;
        }
        Some(Self {
            lower_left: Point::from_vec(self.lower_left.as_vec2().max(other.lower_left.as_vec2())),
            upper_right: Point::from_vec(
                self.upper_right.as_vec2().min(other.upper_right.as_vec2()),
            ),
        })
    }

    pub fn contains_point(&self, point: Point) -> bool {
        !self.is_empty()
            && point.x() >= self.lower_left.x()
            && point.x() <= self.upper_right.x()
            && point.y() >= self.lower_left.y()
            && point.y() <= self.upper_right.y()
    }

    pub fn contains_rect(&self, other: &UprightRectangle) -> bool {
        !other.is_empty()
            && self.contains_point(other.lower_left)
            && self.contains_point(other.upper_right)
    }

    /// 四边各向外扩张 `amount`，负值表示收缩（收缩过度则变为空）。
    pub fn expanded(&self, amount: f32) -> UprightRectangle {
        if self.is_empty() {
            return *self;
        }
        let delta = Vec2::splat(amount);
        let lower_left = self.lower_left.as_vec2() - delta;
        let upper_right = self.upper_right.as_vec2() + delta;
        if lower_left.x > upper_right.x || lower_left.y > upper_right.y {
            return Self::empty();
        }
        Self {
            lower_left: Point::from_vec(lower_left),
            upper_right: Point::from_vec(upper_right),
        }
    }

    pub fn translate(&mut self, offset: Vector) {
        if self.is_empty() {
            return;
        }
        self.lower_left = self.lower_left.translate(offset);
        self.upper_right = self.upper_right.translate(offset);
    }
}

impl Default for UprightRectangle {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Orientation {
    angle: f32,
    sin: f32,
    cos: f32,
}

impl Orientation {
    fn from_angle(angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self { angle, sin, cos }
    }
}

/// 任意朝向的矩形：显式保存四个角点，并缓存朝向角及其正弦/余弦。
///
/// 角点顺序以矩形自身坐标系为准：0 左下、1 右下、2 右上、3 左上。
/// 直接修改角点后必须调用 [`Rectangle::recompute_the_angle`]（`set_corner` 会自动处理）。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[Point; 4]", into = "[Point; 4]")]
pub struct Rectangle {
    corners: [Point; 4],
    orientation: Orientation,
}

impl From<[Point; 4]> for Rectangle {
    fn from(corners: [Point; 4]) -> Self {
        Self::from_corners(corners)
    }
}

impl From<Rectangle> for [Point; 4] {
    fn from(value: Rectangle) -> Self {
        value.corners
    }
}

impl Rectangle {
    pub fn from_corners(corners: [Point; 4]) -> Self {
        let mut rect = Self {
            corners,
            orientation: Orientation::from_angle(0.0),
        };
        rect.recompute_the_angle();
        rect
    }

    pub fn from_upright(rect: &UprightRectangle) -> Self {
        Self {
            corners: rect.corners(),
            orientation: Orientation::from_angle(0.0),
        }
    }

    /// 以左下角 `origin` 为基点，沿 `angle` 方向展开宽高。
    pub fn from_origin(origin: Point, width: f32, height: f32, angle: f32) -> Self {
        let orientation = Orientation::from_angle(angle);
        let along = Vec2::new(orientation.cos, orientation.sin);
        let across = along.perp();
        let o = origin.as_vec2();
        Self {
            corners: [
                origin,
                Point::from_vec(o + along * width),
                Point::from_vec(o + along * width + across * height),
                Point::from_vec(o + across * height),
            ],
            orientation,
        }
    }

    pub fn from_center(center: Point, width: f32, height: f32, angle: f32) -> Self {
        let orientation = Orientation::from_angle(angle);
        let along = Vec2::new(orientation.cos, orientation.sin);
        let across = along.perp();
        let origin = center.as_vec2() - along * (width * 0.5) - across * (height * 0.5);
        Self::from_origin(Point::from_vec(origin), width, height, angle)
    }

    /// 线段加粗后的矩形（描边盒）。零长度线段退化为以端点为中心的正方形。
    pub fn from_segment(segment: &LineSegment, half_width: f32) -> Self {
        let direction = segment.direction();
        let length = direction.magnitude();
        if length <= f32::EPSILON {
            return Self::from_center(segment.start, half_width * 2.0, half_width * 2.0, 0.0);
        }
        let angle = direction.angle();
        let unit = direction.as_vec2() / length;
        let origin = segment.start.as_vec2() - unit.perp() * half_width;
        Self::from_origin(Point::from_vec(origin), length, half_width * 2.0, angle)
    }

    #[inline]
    pub fn corners(&self) -> &[Point; 4] {
        &self.corners
    }

    #[inline]
    pub fn corner(&self, index: usize) -> Point {
        self.corners[index % 4]
    }

    pub fn set_corner(&mut self, index: usize, point: Point) {
        self.corners[index % 4] = point;
        self.recompute_the_angle();
    }

    /// 根据 0→1 边（宽度边）重新计算朝向缓存；宽度为零时改用 0→3 边。
    pub fn recompute_the_angle(&mut self) {
        let width_edge = self.corners[1].as_vec2() - self.corners[0].as_vec2();
        let angle = if width_edge.length_squared() > f32::EPSILON * f32::EPSILON {
            width_edge.y.atan2(width_edge.x)
        } else {
            let height_edge = self.corners[3].as_vec2() - self.corners[0].as_vec2();
            if height_edge.length_squared() > f32::EPSILON * f32::EPSILON {
                height_edge.y.atan2(height_edge.x) - std::f32::consts::FRAC_PI_2
            } else {
                0.0
            }
        };
        self.orientation = Orientation::from_angle(angle);
    }

    #[inline]
    pub fn angle(&self) -> f32 {
        self.orientation.angle
    }

    #[inline]
    pub fn sin(&self) -> f32 {
        self.orientation.sin
    }

    #[inline]
    pub fn cos(&self) -> f32 {
        self.orientation.cos
    }

    #[inline]
    pub fn origin(&self) -> Point {
        self.corners[0]
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.corners[0].distance(self.corners[1])
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.corners[0].distance(self.corners[3])
    }

    #[inline]
    pub fn center(&self) -> Point {
        self.corners[0].midpoint(self.corners[2])
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// 将世界坐标变换到矩形自身坐标系（原点为左下角，x 轴沿宽度边）。
    #[inline]
    pub fn to_local(&self, point: Point) -> Point {
        let d = point.as_vec2() - self.corners[0].as_vec2();
        let (sin, cos) = (self.orientation.sin, self.orientation.cos);
        Point::new(d.x * cos + d.y * sin, -d.x * sin + d.y * cos)
    }

    #[inline]
    pub fn from_local(&self, point: Point) -> Point {
        let rotated = Vector::from_vec(point.as_vec2())
            .rotated_by(self.orientation.sin, self.orientation.cos);
        self.corners[0].translate(rotated)
    }

    /// 自身坐标系下的轴对齐范围 `[0, w] x [0, h]`。
    pub fn local_box(&self) -> UprightRectangle {
        UprightRectangle::from_coords(0.0, 0.0, self.width(), self.height())
    }

    pub fn contains_point(&self, point: Point, tolerance: f32) -> bool {
        self.local_box()
            .expanded(tolerance)
            .contains_point(self.to_local(point))
    }

    pub fn bounding_box(&self) -> UprightRectangle {
        UprightRectangle::from_points(self.corners)
    }

    pub fn edges(&self) -> [LineSegment; 4] {
        let c = self.corners;
        [
            LineSegment::new(c[0], c[1]),
            LineSegment::new(c[1], c[2]),
            LineSegment::new(c[2], c[3]),
            LineSegment::new(c[3], c[0]),
        ]
    }

    /// 分离轴判定两个矩形的内部是否重叠；仅接触（间距不超过容差）不算重叠。
    pub fn overlaps(&self, other: &Rectangle, tolerance: f32) -> bool {
        for rect in [self, other] {
            for axis in [
                Vec2::new(rect.orientation.cos, rect.orientation.sin),
                Vec2::new(-rect.orientation.sin, rect.orientation.cos),
            ] {
                let (min_a, max_a) = project(&self.corners, axis);
                let (min_b, max_b) = project(&other.corners, axis);
                if max_a <= min_b + tolerance || max_b <= min_a + tolerance {
                    return false;
                }
            }
        }
        true
    }

    pub fn translate(&mut self, offset: Vector) {
        for corner in &mut self.corners {
            *corner = corner.translate(offset);
        }
    }

    /// 绕 `center` 旋转 `angle`，朝向缓存同步更新。
    pub fn rotate(&mut self, angle: f32, center: Point) {
        let (sin, cos) = angle.sin_cos();
        for corner in &mut self.corners {
            *corner = corner.rotate_about(center, sin, cos);
        }
        self.recompute_the_angle();
    }

    /// 在自身坐标系内向四周扩张 `amount`。
    pub fn buffered(&self, amount: f32) -> Rectangle {
        let origin = self.from_local(Point::new(-amount, -amount));
        Self::from_origin(
            origin,
            (self.width() + amount * 2.0).max(0.0),
            (self.height() + amount * 2.0).max(0.0),
            self.orientation.angle,
        )
    }
}

fn project(corners: &[Point; 4], axis: Vec2) -> (f32, f32) {
    let mut lo = f32::INFINITY;
    let mut hi = f32::NEG_INFINITY;
    for corner in corners {
        let dot = corner.as_vec2().dot(axis);
        lo = lo.min(dot);
        hi = hi.max(dot);
    }
    (lo, hi)
}
