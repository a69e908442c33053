//! 单精度二维几何原语：点、向量、矩形、线段/射线/直线、多段线与多边形。

mod lines;
mod point;
mod polygon;
mod polyline;
mod rect;
mod simplify;

pub use lines::{Circle, Line, LineSegment, Ray};
pub use point::{DEFAULT_TOLERANCE, DoublePoint, Point, Vector};
pub use polygon::{Polygon, generate_convex_hull};
pub use polyline::{
    ClippedPolyline, Polyline, PolylinePart, PolylineView, RectanglePolyline, Segments,
};
pub use rect::{Rectangle, UprightRectangle};
pub use simplify::{PolylineSimplifier, Simplified};
