use super::lines::LineSegment;
use super::point::Point;
use super::polyline::Polyline;
use super::rect::UprightRectangle;
use crate::errors::GeometryError;

/// 化简结果。闭合环在容差大于自身范围时坍缩为一个点。
#[derive(Debug, Clone, PartialEq)]
pub enum Simplified {
    Polyline(Polyline),
    Point(Point),
}

/// Douglas–Peucker 化简器，容差为顶点到化简后线段的垂直距离上限。
#[derive(Debug, Clone, Copy)]
pub struct PolylineSimplifier {
    tolerance: f32,
}

impl PolylineSimplifier {
    pub fn new(tolerance: f32) -> Self {
        Self {
            tolerance: tolerance.max(0.0),
        }
    }

    #[inline]
    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    pub fn simplify(&self, polyline: &Polyline) -> Result<Simplified, GeometryError> {
        let vertices = polyline.vertices();
        if !polyline.closed() {
            let keep = self.keep_mask(vertices, 0, vertices.len() - 1);
            let kept = retain(vertices, &keep);
            return Ok(Simplified::Polyline(Polyline::new(kept)?));
        }

        let extent = UprightRectangle::from_points(vertices.iter().copied());
        if extent.width().max(extent.height()) <= self.tolerance {
            return Ok(Simplified::Point(extent.center()));
        }

        // 以首点和离它最远的顶点把环分成两条开放链分别化简。
        let first = vertices[0];
        let far = (1..vertices.len())
            .max_by(|&a, &b| {
                first
                    .distance_squared(vertices[a])
                    .total_cmp(&first.distance_squared(vertices[b]))
            })
            .unwrap_or(1);
        let mut unrolled = vertices.to_vec();
        unrolled.push(first);
        let mut keep = self.keep_mask(&unrolled, 0, far);
        let second = self.keep_mask(&unrolled, far, unrolled.len() - 1);
        for (slot, other) in keep.iter_mut().zip(second) {
            *slot |= other;
        }
        keep.pop();
        let mut kept = retain(vertices, &keep);

        if kept.len() < 3 {
            // 两点的环没有面积，补回离首尾连线最远的顶点。
            let chord = LineSegment::new(vertices[0], vertices[far]);
            if let Some(extra) = (1..vertices.len())
                .filter(|&i| i != far)
                .max_by(|&a, &b| {
                    chord
                        .distance_to_point(vertices[a])
                        .total_cmp(&chord.distance_to_point(vertices[b]))
                })
            {
                keep[extra] = true;
                kept = retain(vertices, &keep);
            }
        }
        Ok(Simplified::Polyline(Polyline::new_closed(kept)?))
    }

    /// 迭代版 Douglas–Peucker，标记 `[first, last]` 区间内需要保留的顶点。
    fn keep_mask(&self, points: &[Point], first: usize, last: usize) -> Vec<bool> {
        let mut keep = vec![false; points.len()];
        keep[first] = true;
        keep[last] = true;
        let mut stack = vec![(first, last)];
        while let Some((start, end)) = stack.pop() {
            if end <= start + 1 {
                continue;
            }
            let chord = LineSegment::new(points[start], points[end]);
            let mut farthest = start;
            let mut max_distance = 0.0_f32;
            for (offset, point) in points[start + 1..end].iter().enumerate() {
                let distance = chord.distance_to_point(*point);
                if distance > max_distance {
                    max_distance = distance;
                    farthest = start + 1 + offset;
                }
            }
            if max_distance > self.tolerance {
                keep[farthest] = true;
                stack.push((start, farthest));
                stack.push((farthest, end));
            }
        }
        keep
    }
}

fn retain(points: &[Point], keep: &[bool]) -> Vec<Point> {
    points
        .iter()
        .zip(keep)
        .filter_map(|(point, keep)| keep.then_some(*point))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PolylineView;

    fn distance_to_polyline(point: Point, polyline: &Polyline) -> f32 {
        polyline
            .segments()
            .map(|segment| segment.distance_to_point(point))
            .fold(f32::INFINITY, f32::min)
    }

    #[test]
    fn every_original_vertex_stays_within_tolerance() {
        let wobbly: Vec<Point> = (0..40)
            .map(|i| {
                let x = i as f32 * 0.5;
                Point::new(x, (x * 1.3).sin() * 0.4 + (x * 0.2).cos() * 3.0)
            })
            .collect();
        let original = Polyline::new(wobbly).unwrap();
        let simplifier = PolylineSimplifier::new(0.25);
        let Simplified::Polyline(simplified) = simplifier.simplify(&original).unwrap() else {
            panic!("open polyline must stay a polyline");
        };
        assert!(simplified.num_vertices() < original.num_vertices());
        assert_eq!(simplified.vertices()[0], original.vertices()[0]);
        for vertex in original.vertices() {
            assert!(distance_to_polyline(*vertex, &simplified) <= 0.25 + 1e-4);
        }
    }

    #[test]
    fn straight_run_reduces_to_endpoints() {
        let line = Polyline::new(vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.01),
            Point::new(2.0, 0.0),
            Point::new(3.0, -0.01),
            Point::new(4.0, 0.0),
        ])
        .unwrap();
        let result = PolylineSimplifier::new(0.1).simplify(&line).unwrap();
        assert_eq!(
            result,
            Simplified::Polyline(
                Polyline::new(vec![Point::new(0.0, 0.0), Point::new(4.0, 0.0)]).unwrap()
            )
        );
    }

    #[test]
    fn closed_ring_keeps_tolerance_and_area() {
        let ring: Vec<Point> = (0..24)
            .map(|i| {
                let angle = i as f32 / 24.0 * std::f32::consts::TAU;
                Point::new(angle.cos() * 10.0, angle.sin() * 10.0)
            })
            .collect();
        let original = Polyline::new_closed(ring).unwrap();
        let Simplified::Polyline(simplified) =
            PolylineSimplifier::new(1.0).simplify(&original).unwrap()
        else {
            panic!("ring larger than tolerance must not collapse");
        };
        assert!(simplified.closed());
        assert!(simplified.num_vertices() >= 3);
        for vertex in original.vertices() {
            assert!(distance_to_polyline(*vertex, &simplified) <= 1.0 + 1e-4);
        }
    }

    #[test]
    fn tiny_ring_collapses_to_point() {
        let ring = Polyline::new_closed(vec![
            Point::new(5.0, 5.0),
            Point::new(5.2, 5.0),
            Point::new(5.2, 5.2),
            Point::new(5.0, 5.2),
        ])
        .unwrap();
        let result = PolylineSimplifier::new(1.0).simplify(&ring).unwrap();
        let Simplified::Point(point) = result else {
            panic!("expected collapse, got {result:?}");
        };
        assert!(point.is_near(Point::new(5.1, 5.1), 1e-4));
    }
}
