use glam::Vec2;
use serde::{Deserialize, Serialize};

/// 默认的几何比较容差（“点在边界上”、“向量平行”、“线段重合”等判定）。
pub const DEFAULT_TOLERANCE: f32 = 1e-4;

/// 二维点，内部以 `glam::Vec2` 表示（地图空间单精度坐标）。
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point(pub Vec2);

impl Point {
    pub const ORIGIN: Point = Point(Vec2::ZERO);

    #[inline]
    pub fn new(x: f32, y: f32) -> Self {
        Self(Vec2::new(x, y))
    }

    #[inline]
    pub fn from_vec(vec: Vec2) -> Self {
        Self(vec)
    }

    #[inline]
    pub fn x(self) -> f32 {
        self.0.x
    }

    #[inline]
    pub fn y(self) -> f32 {
        self.0.y
    }

    #[inline]
    pub fn as_vec2(self) -> Vec2 {
        self.0
    }

    #[inline]
    pub fn translate(self, offset: Vector) -> Self {
        Self(self.0 + offset.as_vec2())
    }

    #[inline]
    pub fn vector_to(self, other: Point) -> Vector {
        Vector::from_vec(other.0 - self.0)
    }

    #[inline]
    pub fn distance(self, other: Point) -> f32 {
        self.0.distance(other.0)
    }

    #[inline]
    pub fn distance_squared(self, other: Point) -> f32 {
        self.0.distance_squared(other.0)
    }

    /// 两点距离不超过容差即视为重合。
    #[inline]
    pub fn is_near(self, other: Point, tolerance: f32) -> bool {
        self.distance_squared(other) <= tolerance * tolerance
    }

    #[inline]
    pub fn midpoint(self, other: Point) -> Point {
        Self((self.0 + other.0) * 0.5)
    }

    #[inline]
    pub fn lerp(self, other: Point, t: f32) -> Point {
        Self(self.0 + (other.0 - self.0) * t)
    }

    /// 以 `center` 为原点按给定的 (sin, cos) 旋转。
    #[inline]
    pub fn rotate_about(self, center: Point, sin: f32, cos: f32) -> Point {
        let d = self.0 - center.0;
        Self(center.0 + Vec2::new(d.x * cos - d.y * sin, d.x * sin + d.y * cos))
    }
}

impl From<Vec2> for Point {
    fn from(value: Vec2) -> Self {
        Self::from_vec(value)
    }
}

/// 二维向量。模长在每次通过 setter 修改分量时重新计算，字段不对外暴露。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vector {
    delta: Vec2,
    magnitude: f32,
}

impl Vector {
    #[inline]
    pub fn new(dx: f32, dy: f32) -> Self {
        Self::from_vec(Vec2::new(dx, dy))
    }

    #[inline]
    pub fn from_vec(delta: Vec2) -> Self {
        Self {
            delta,
            magnitude: delta.length(),
        }
    }

    #[inline]
    pub fn from_points(start: Point, end: Point) -> Self {
        Self::from_vec(end.0 - start.0)
    }

    /// 单位方向向量。
    #[inline]
    pub fn from_angle(angle: f32) -> Self {
        Self::from_vec(Vec2::from_angle(angle))
    }

    #[inline]
    pub fn dx(self) -> f32 {
        self.delta.x
    }

    #[inline]
    pub fn dy(self) -> f32 {
        self.delta.y
    }

    #[inline]
    pub fn as_vec2(self) -> Vec2 {
        self.delta
    }

    #[inline]
    pub fn magnitude(self) -> f32 {
        self.magnitude
    }

    pub fn set_dx(&mut self, dx: f32) {
        self.set(dx, self.delta.y);
    }

    pub fn set_dy(&mut self, dy: f32) {
        self.set(self.delta.x, dy);
    }

    pub fn set(&mut self, dx: f32, dy: f32) {
        self.delta = Vec2::new(dx, dy);
        self.magnitude = self.delta.length();
    }

    #[inline]
    pub fn dot(self, other: Vector) -> f32 {
        self.delta.dot(other.delta)
    }

    /// 二维叉积（z 分量）。正值表示 `other` 位于 `self` 的逆时针一侧。
    #[inline]
    pub fn cross(self, other: Vector) -> f32 {
        self.delta.perp_dot(other.delta)
    }

    #[inline]
    pub fn is_zero(self, tolerance: f32) -> bool {
        self.magnitude <= tolerance
    }

    pub fn normalized(self) -> Option<Vector> {
        if self.magnitude <= f32::EPSILON {
            None
        } else {
            Some(Self {
                delta: self.delta / self.magnitude,
                magnitude: 1.0,
            })
        }
    }

    #[inline]
    pub fn scaled(self, factor: f32) -> Vector {
        Self::from_vec(self.delta * factor)
    }

    #[inline]
    pub fn reversed(self) -> Vector {
        Self {
            delta: -self.delta,
            magnitude: self.magnitude,
        }
    }

    /// 逆时针旋转 90°。
    #[inline]
    pub fn perpendicular(self) -> Vector {
        Self {
            delta: self.delta.perp(),
            magnitude: self.magnitude,
        }
    }

    #[inline]
    pub fn rotated_by(self, sin: f32, cos: f32) -> Vector {
        let d = self.delta;
        Self::from_vec(Vec2::new(d.x * cos - d.y * sin, d.x * sin + d.y * cos))
    }

    #[inline]
    pub fn rotated(self, angle: f32) -> Vector {
        let (sin, cos) = angle.sin_cos();
        self.rotated_by(sin, cos)
    }

    #[inline]
    pub fn angle(self) -> f32 {
        self.delta.y.atan2(self.delta.x)
    }

    /// 判定两向量是否平行（同向或反向），按归一化叉积比较。
    pub fn is_parallel(self, other: Vector, tolerance: f32) -> bool {
        let scale = self.magnitude * other.magnitude;
        if scale <= f32::EPSILON {
            return true;
        }
        (self.cross(other) / scale).abs() <= tolerance
    }
}

impl From<Vec2> for Vector {
    fn from(value: Vec2) -> Self {
        Self::from_vec(value)
    }
}

/// 双精度经纬度，仅用于持久化要素的地理位置。
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DoublePoint {
    pub longitude: f64,
    pub latitude: f64,
}

impl DoublePoint {
    #[inline]
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }
}
