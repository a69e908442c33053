//! 引线避让：检测引线与周围要素、注记的冲突，
//! 并绕锚点顺时针、逆时针两侧旋转引线寻找可接受的方向。

use maplabel_core::geometry::{Point, Rectangle, Vector};
use maplabel_core::model::{FeatureId, LabelId, Leader, PlacementRule};
use tracing::debug;

use crate::errors::EngineError;
use crate::index::SpatialIndex;
use crate::obstacle::{DetectionArgs, ObstacleDetector, ObstacleOverlapSummary, TextOverlapKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementTestResult {
    Allowed,
    /// 引线（含重叠缓冲）直接压到了障碍。
    InvalidOverlaps,
    /// 没有直接重叠，但障碍落在邻近缓冲区内。
    InvalidNearbyObjects,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObstacleSource {
    Feature {
        id: FeatureId,
        class: std::sync::Arc<str>,
    },
    Label {
        id: LabelId,
        kind: TextOverlapKind,
    },
}

/// 引线需要绕开的障碍，顶点为世界坐标。
#[derive(Debug, Clone, PartialEq)]
pub struct LeaderObstacle {
    pub source: ObstacleSource,
    pub vertices: Vec<Point>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeaderPlacementTest {
    pub result: PlacementTestResult,
    pub immediate: Vec<LeaderObstacle>,
    pub proximity: Vec<LeaderObstacle>,
}

impl LeaderPlacementTest {
    #[inline]
    pub fn is_allowed(&self) -> bool {
        self.result == PlacementTestResult::Allowed
    }
}

/// 一次引线布置请求：所属注记、被注记要素与放置规则。
#[derive(Debug, Clone, Copy)]
pub struct LeaderRequest<'a> {
    pub label: LabelId,
    pub feature: FeatureId,
    pub rule: &'a PlacementRule,
}

/// 避让楔形：从引线原方向出发，分别累计顺时针、逆时针两侧需要转过的角度。
///
/// 新的障碍方向只与当前一侧的方向在半圆内比较，累计角度之和达到一整圈时两侧相遇。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AvoidanceWedge {
    reference: Vector,
    cw_rotation: f32,
    ccw_rotation: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WedgeSides {
    Both,
    Clockwise,
    CounterClockwise,
}

impl AvoidanceWedge {
    pub fn new(reference: Vector) -> Self {
        Self {
            reference,
            cw_rotation: 0.0,
            ccw_rotation: 0.0,
        }
    }

    #[inline]
    pub fn clockwise(&self) -> Vector {
        self.reference.rotated(-self.cw_rotation)
    }

    #[inline]
    pub fn counter_clockwise(&self) -> Vector {
        self.reference.rotated(self.ccw_rotation)
    }

    /// 顺时针一侧累计转过的弧度。
    #[inline]
    pub fn clockwise_rotation(&self) -> f32 {
        self.cw_rotation
    }

    #[inline]
    pub fn counter_clockwise_rotation(&self) -> f32 {
        self.ccw_rotation
    }

    /// 两侧方向已经相遇，绕锚点一周都找不到空隙。
    pub fn are_vectors_passing_each_other(&self) -> bool {
        self.cw_rotation + self.ccw_rotation >= std::f32::consts::TAU
    }

    fn push_clockwise(&mut self, vector: Vector, clearance: f32) -> bool {
        let Some(candidate) = tangent(vector, clearance, -1.0) else {
            return false;
        };
        let step = -signed_angle(self.clockwise(), candidate);
        if step <= 0.0 {
            return false;
        }
        self.cw_rotation += step;
        true
    }

    fn push_counter_clockwise(&mut self, vector: Vector, clearance: f32) -> bool {
        let Some(candidate) = tangent(vector, clearance, 1.0) else {
            return false;
        };
        let step = signed_angle(self.counter_clockwise(), candidate);
        if step <= 0.0 {
            return false;
        }
        self.ccw_rotation += step;
        true
    }

    /// 把障碍顶点推开的方向并入楔形，直到不再变化或两侧相遇。
    pub fn add_vectors_pushing_overlap(
        &mut self,
        anchor: Point,
        vertices: &[Point],
        clearance: f32,
        sides: WedgeSides,
    ) {
        let vectors: Vec<Vector> = vertices.iter().map(|v| anchor.vector_to(*v)).collect();
        // 每次更新都只朝同一侧转，轮数不会超过顶点数。
        for _ in 0..=vectors.len() {
            let mut changed = false;
            for vector in &vectors {
                if sides != WedgeSides::CounterClockwise {
                    changed |= self.push_clockwise(*vector, clearance);
                }
                if sides != WedgeSides::Clockwise {
                    changed |= self.push_counter_clockwise(*vector, clearance);
                }
                if self.are_vectors_passing_each_other() {
                    return;
                }
            }
            if !changed {
                return;
            }
        }
    }
}

/// `from` 到 `to` 的有向夹角，逆时针为正，范围 `(-π, π]`。
fn signed_angle(from: Vector, to: Vector) -> f32 {
    from.cross(to).atan2(from.dot(to))
}

/// 与 `vector` 指向的点保持 `clearance` 距离的切线方向；`sign` 为负时取顺时针一侧。
fn tangent(vector: Vector, clearance: f32, sign: f32) -> Option<Vector> {
    let distance = vector.magnitude();
    if distance <= f32::EPSILON {
        return None;
    }
    let delta = (clearance / distance).min(1.0).asin();
    Some(vector.rotated(sign * delta))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AvoidanceOutcome {
    Vectors { cw: Vector, ccw: Vector },
    Impossible,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LeaderRoute {
    Placed { leader: Leader, iterations: usize },
    /// 两侧避让方向相遇，或继续旋转不再产生新的候选。
    Impossible,
    /// 迭代次数用尽。
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeaderRouter {
    pub tolerance: f32,
    pub max_iterations: usize,
    pub thick_line_threshold: f32,
}

impl Default for LeaderRouter {
    fn default() -> Self {
        Self {
            tolerance: 1e-3,
            max_iterations: 16,
            thick_line_threshold: 1.0,
        }
    }
}

impl LeaderRouter {
    /// 引线过短或没有方向时无法避让。
    pub fn is_leader_degenerate(&self, leader: &Leader) -> bool {
        leader.anchor.distance(leader.end) <= self.tolerance || leader.width < 0.0
    }

    /// 障碍没有顶点，或有顶点贴着锚点时无法参与避让。
    pub fn is_geometry_degenerate(&self, obstacle: &LeaderObstacle, anchor: Point) -> bool {
        obstacle.vertices.is_empty()
            || obstacle
                .vertices
                .iter()
                .any(|v| v.is_near(anchor, self.tolerance))
    }

    fn overlap_clearance(&self, leader: &Leader, rule: &PlacementRule) -> f32 {
        leader.width * 0.5 + rule.overlap_buffer + self.tolerance
    }

    fn proximity_clearance(&self, leader: &Leader, rule: &PlacementRule) -> f32 {
        leader.width * 0.5 + rule.proximity_buffer + self.tolerance
    }

    fn detection_args(&self, request: &LeaderRequest<'_>, query: Rectangle) -> DetectionArgs {
        DetectionArgs {
            query,
            thick_line_threshold: self.thick_line_threshold,
            ignore_label: Some(request.label),
            ignore_feature: Some(request.feature),
            tolerance: self.tolerance * 0.1,
        }
    }

    /// 把检测汇总转成引线障碍，去掉规则允许压盖的类别与贴着锚点的退化障碍。
    fn collect_obstacles(
        &self,
        summary: &ObstacleOverlapSummary,
        request: &LeaderRequest<'_>,
        leader: &Leader,
    ) -> Result<Vec<LeaderObstacle>, EngineError> {
        let length = leader.anchor.distance(leader.end);
        let reach_side = (length + self.overlap_clearance(leader, request.rule)) * 2.0;
        let reach = Rectangle::from_center(leader.anchor, reach_side, reach_side, 0.0);

        let mut obstacles = Vec::new();
        for overlap in &summary.polylines {
            if request.rule.allows_crossing(&overlap.class) {
                continue;
            }
            let vertices = if overlap.segment.is_zero_length(1e-6) {
                vec![overlap.segment.start]
            } else {
                match overlap.segment.clip_to_rectangle(&reach)? {
                    Some(piece) => vec![piece.start, piece.end],
                    None => overlap.clipped.map(|c| vec![c.start, c.end]).unwrap_or_default(),
                }
            };
            obstacles.push(LeaderObstacle {
                source: ObstacleSource::Feature {
                    id: overlap.feature,
                    class: overlap.class.clone(),
                },
                vertices,
            });
        }
        for overlap in &summary.polygons {
            if request.rule.allows_crossing(&overlap.class) {
                continue;
            }
            obstacles.push(LeaderObstacle {
                source: ObstacleSource::Feature {
                    id: overlap.feature,
                    class: overlap.class.clone(),
                },
                vertices: overlap.vertices.clone(),
            });
        }
        for overlap in &summary.texts {
            obstacles.push(LeaderObstacle {
                source: ObstacleSource::Label {
                    id: overlap.label,
                    kind: overlap.kind,
                },
                vertices: overlap.corners.to_vec(),
            });
        }
        obstacles.retain(|obstacle| !self.is_geometry_degenerate(obstacle, leader.anchor));
        Ok(obstacles)
    }

    pub fn is_leader_placement_acceptable(
        &self,
        detector: &mut ObstacleDetector,
        index: &dyn SpatialIndex,
        request: &LeaderRequest<'_>,
        leader: &Leader,
    ) -> Result<LeaderPlacementTest, EngineError> {
        let segment = leader.segment();
        let rule = request.rule;
        let immediate_box = segment.stroke_box(leader.width + rule.overlap_buffer * 2.0);
        let summary = detector.detect(index, &self.detection_args(request, immediate_box))?;
        let immediate = self.collect_obstacles(&summary, request, leader)?;

        let mut proximity = Vec::new();
        if rule.proximity_buffer > rule.overlap_buffer {
            let proximity_box = segment.stroke_box(leader.width + rule.proximity_buffer * 2.0);
            let summary = detector.detect(index, &self.detection_args(request, proximity_box))?;
            proximity = self
                .collect_obstacles(&summary, request, leader)?
                .into_iter()
                .filter(|obstacle| !immediate.contains(obstacle))
                .collect();
        }

        let result = if !immediate.is_empty() {
            PlacementTestResult::InvalidOverlaps
        } else if !proximity.is_empty() {
            PlacementTestResult::InvalidNearbyObjects
        } else {
            PlacementTestResult::Allowed
        };
        Ok(LeaderPlacementTest {
            result,
            immediate,
            proximity,
        })
    }

    fn absorb(
        &self,
        wedge: &mut AvoidanceWedge,
        test: &LeaderPlacementTest,
        leader: &Leader,
        rule: &PlacementRule,
        sides: WedgeSides,
    ) {
        let overlap = self.overlap_clearance(leader, rule);
        for obstacle in &test.immediate {
            wedge.add_vectors_pushing_overlap(leader.anchor, &obstacle.vertices, overlap, sides);
        }
        let proximity = self.proximity_clearance(leader, rule);
        for obstacle in &test.proximity {
            wedge.add_vectors_pushing_overlap(leader.anchor, &obstacle.vertices, proximity, sides);
        }
    }

    /// 根据一次检测结果计算两侧最近的可能方向。
    pub fn get_vectors_to_acceptable_placement(
        &self,
        test: &LeaderPlacementTest,
        leader: &Leader,
        rule: &PlacementRule,
    ) -> AvoidanceOutcome {
        if self.is_leader_degenerate(leader) {
            return AvoidanceOutcome::Impossible;
        }
        let mut wedge = AvoidanceWedge::new(leader.anchor.vector_to(leader.end));
        self.absorb(&mut wedge, test, leader, rule, WedgeSides::Both);
        if wedge.are_vectors_passing_each_other() {
            AvoidanceOutcome::Impossible
        } else {
            AvoidanceOutcome::Vectors {
                cw: wedge.clockwise(),
                ccw: wedge.counter_clockwise(),
            }
        }
    }

    /// 交替尝试顺时针、逆时针两侧的候选方向，保持引线长度不变。
    pub fn route(
        &self,
        detector: &mut ObstacleDetector,
        index: &dyn SpatialIndex,
        request: &LeaderRequest<'_>,
        leader: &Leader,
    ) -> Result<LeaderRoute, EngineError> {
        if self.is_leader_degenerate(leader) {
            return Ok(LeaderRoute::Impossible);
        }
        let test = self.is_leader_placement_acceptable(detector, index, request, leader)?;
        if test.is_allowed() {
            return Ok(LeaderRoute::Placed {
                leader: *leader,
                iterations: 0,
            });
        }

        let length = leader.anchor.distance(leader.end);
        let rotate_to = |direction: Vector| -> Option<Leader> {
            direction.normalized().map(|unit| Leader {
                end: leader.anchor.translate(unit.scaled(length)),
                ..*leader
            })
        };

        let mut wedge = AvoidanceWedge::new(leader.anchor.vector_to(leader.end));
        self.absorb(&mut wedge, &test, leader, request.rule, WedgeSides::Both);
        let mut last_cw: Option<Leader> = None;
        let mut last_ccw: Option<Leader> = None;

        for iteration in 1..=self.max_iterations {
            if wedge.are_vectors_passing_each_other() {
                debug!(label = request.label.0, iteration, "引线两侧避让方向相遇");
                return Ok(LeaderRoute::Impossible);
            }
            let mut progressed = false;
            for sides in [WedgeSides::Clockwise, WedgeSides::CounterClockwise] {
                let (direction, last) = match sides {
                    WedgeSides::Clockwise => (wedge.clockwise(), &mut last_cw),
                    _ => (wedge.counter_clockwise(), &mut last_ccw),
                };
                let Some(candidate) = rotate_to(direction) else {
                    continue;
                };
                if last.is_some_and(|previous| {
                    previous.end.is_near(candidate.end, self.tolerance)
                }) {
                    continue;
                }
                *last = Some(candidate);
                progressed = true;
                let test =
                    self.is_leader_placement_acceptable(detector, index, request, &candidate)?;
                if test.is_allowed() {
                    debug!(label = request.label.0, iteration, "引线已找到可行方向");
                    return Ok(LeaderRoute::Placed {
                        leader: candidate,
                        iterations: iteration,
                    });
                }
                self.absorb(&mut wedge, &test, &candidate, request.rule, sides);
                if wedge.are_vectors_passing_each_other() {
                    break;
                }
            }
            if !progressed {
                return Ok(LeaderRoute::Impossible);
            }
        }
        debug!(
            label = request.label.0,
            max_iterations = self.max_iterations,
            "引线避让迭代次数用尽"
        );
        Ok(LeaderRoute::Exhausted)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use maplabel_core::geometry::UprightRectangle;

    use super::*;
    use crate::index::{GridSpatialIndex, IndexEntry, IndexOptions};

    fn text_box(index: &mut GridSpatialIndex, label: u64, x0: f32, y0: f32, x1: f32, y1: f32) {
        index
            .insert(IndexEntry::TextPart {
                label: LabelId(label),
                part: 0,
                frame: Rectangle::from_upright(&UprightRectangle::from_coords(x0, y0, x1, y1)),
            })
            .expect("insert text part");
    }

    fn rule() -> PlacementRule {
        PlacementRule {
            overlap_buffer: 0.1,
            allow_leader: true,
            ..PlacementRule::new("callout")
        }
    }

    fn leader_to(x: f32, y: f32) -> Leader {
        Leader {
            anchor: Point::new(0.0, 0.0),
            end: Point::new(x, y),
            width: 0.2,
        }
    }

    fn request(rule: &PlacementRule) -> LeaderRequest<'_> {
        LeaderRequest {
            label: LabelId(1),
            feature: FeatureId(1),
            rule,
        }
    }

    #[test]
    fn leader_rotates_clockwise_past_text_corner() {
        let mut index = GridSpatialIndex::new(IndexOptions {
            cell_size: 1.0,
            extent: None,
        });
        text_box(&mut index, 2, 2.0, -1.0, 3.0, 1.0);
        let rule = rule();
        let request = request(&rule);
        let leader = leader_to(5.0, 0.0);
        let router = LeaderRouter::default();
        let mut detector = ObstacleDetector::new();

        let test = router
            .is_leader_placement_acceptable(&mut detector, &index, &request, &leader)
            .unwrap();
        assert_eq!(test.result, PlacementTestResult::InvalidOverlaps);
        assert_eq!(test.immediate.len(), 1);

        let AvoidanceOutcome::Vectors { cw, ccw } =
            router.get_vectors_to_acceptable_placement(&test, &leader, &rule)
        else {
            panic!("a single text box must be avoidable");
        };
        assert!((cw.angle().to_degrees() + 31.7).abs() < 0.1);
        assert!((ccw.angle().to_degrees() - 31.7).abs() < 0.1);
        let corner = Vector::new(2.0, -1.0);
        assert!(cw.cross(corner) > 0.0);

        let moved = Leader {
            end: leader.anchor.translate(cw.normalized().unwrap().scaled(5.0)),
            ..leader
        };
        let text = Rectangle::from_upright(&UprightRectangle::from_coords(2.0, -1.0, 3.0, 1.0));
        assert!(!moved.segment().stroke_box(0.4).overlaps(&text, 0.0));

        let LeaderRoute::Placed { leader: routed, iterations } = router
            .route(&mut detector, &index, &request, &leader)
            .unwrap()
        else {
            panic!("expected a placed leader");
        };
        assert_eq!(iterations, 1);
        assert!(routed.end.y() < 0.0);
        assert!((routed.anchor.distance(routed.end) - 5.0).abs() < 1e-3);
    }

    #[test]
    fn clear_leader_is_placed_without_iterations() {
        let mut index = GridSpatialIndex::new(IndexOptions::default());
        text_box(&mut index, 2, 2.0, 3.0, 3.0, 4.0);
        let rule = rule();
        let route = LeaderRouter::default()
            .route(&mut ObstacleDetector::new(), &index, &request(&rule), &leader_to(5.0, 0.0))
            .unwrap();
        assert!(matches!(route, LeaderRoute::Placed { iterations: 0, .. }));
    }

    #[test]
    fn allowed_crossing_classes_are_not_obstacles() {
        let mut index = GridSpatialIndex::new(IndexOptions::default());
        let river = maplabel_core::geometry::Polyline::new(vec![
            Point::new(2.0, -4.0),
            Point::new(2.0, 4.0),
        ])
        .unwrap();
        index
            .insert(IndexEntry::FeaturePolyline {
                feature: FeatureId(9),
                class: Arc::from("river"),
                geometry: river,
                stroke_width: 0.5,
            })
            .unwrap();
        let mut rule = rule();
        let router = LeaderRouter::default();
        let leader = leader_to(5.0, 0.0);
        let mut detector = ObstacleDetector::new();
        let blocked = router
            .is_leader_placement_acceptable(&mut detector, &index, &request(&rule), &leader)
            .unwrap();
        assert_eq!(blocked.result, PlacementTestResult::InvalidOverlaps);

        rule.allowed_crossing_classes.push(Arc::from("river"));
        let crossing = router
            .is_leader_placement_acceptable(&mut detector, &index, &request(&rule), &leader)
            .unwrap();
        assert!(crossing.is_allowed());
    }

    #[test]
    fn proximity_buffer_reports_nearby_objects() {
        let mut index = GridSpatialIndex::new(IndexOptions::default());
        text_box(&mut index, 2, 2.0, 0.5, 3.0, 1.5);
        let mut rule = rule();
        rule.proximity_buffer = 0.6;
        let test = LeaderRouter::default()
            .is_leader_placement_acceptable(
                &mut ObstacleDetector::new(),
                &index,
                &request(&rule),
                &leader_to(5.0, 0.0),
            )
            .unwrap();
        assert_eq!(test.result, PlacementTestResult::InvalidNearbyObjects);
        assert!(test.immediate.is_empty());
        assert_eq!(test.proximity.len(), 1);
    }

    #[test]
    fn surrounding_ring_makes_avoidance_impossible() {
        let ring = LeaderObstacle {
            source: ObstacleSource::Feature {
                id: FeatureId(4),
                class: Arc::from("road"),
            },
            vertices: vec![
                Point::new(-5.0, 5.0),
                Point::new(-5.0, -5.0),
                Point::new(5.0, -5.0),
                Point::new(5.0, 5.0),
            ],
        };
        let test = LeaderPlacementTest {
            result: PlacementTestResult::InvalidOverlaps,
            immediate: vec![ring],
            proximity: Vec::new(),
        };
        let outcome = LeaderRouter::default().get_vectors_to_acceptable_placement(
            &test,
            &leader_to(8.0, 0.0),
            &rule(),
        );
        assert_eq!(outcome, AvoidanceOutcome::Impossible);
    }

    #[test]
    fn fenced_anchor_cannot_be_routed() {
        let mut index = GridSpatialIndex::new(IndexOptions {
            cell_size: 2.0,
            extent: None,
        });
        text_box(&mut index, 2, 4.0, -6.0, 6.0, 6.0);
        text_box(&mut index, 3, -6.0, -6.0, -4.0, 6.0);
        text_box(&mut index, 4, -6.0, 4.0, 6.0, 6.0);
        text_box(&mut index, 5, -6.0, -6.0, 6.0, -4.0);
        let rule = rule();
        let route = LeaderRouter::default()
            .route(&mut ObstacleDetector::new(), &index, &request(&rule), &leader_to(8.0, 0.0))
            .unwrap();
        assert_eq!(route, LeaderRoute::Impossible);
    }

    #[test]
    fn degenerate_leaders_and_obstacles() {
        let router = LeaderRouter::default();
        assert!(router.is_leader_degenerate(&leader_to(0.0, 0.0)));
        assert!(!router.is_leader_degenerate(&leader_to(3.0, 0.0)));

        let anchor = Point::new(0.0, 0.0);
        let obstacle = |vertices: Vec<Point>| LeaderObstacle {
            source: ObstacleSource::Label {
                id: LabelId(2),
                kind: TextOverlapKind::Text,
            },
            vertices,
        };
        assert!(router.is_geometry_degenerate(&obstacle(Vec::new()), anchor));
        assert!(router.is_geometry_degenerate(
            &obstacle(vec![Point::new(0.0, 0.0005), Point::new(2.0, 2.0)]),
            anchor
        ));
        assert!(!router.is_geometry_degenerate(
            &obstacle(vec![Point::new(1.0, 1.0), Point::new(2.0, 2.0)]),
            anchor
        ));
    }

    #[test]
    fn wedge_tracks_rotation_beyond_half_circle() {
        let anchor = Point::new(0.0, 0.0);
        let mut wedge = AvoidanceWedge::new(Vector::new(1.0, 0.0));
        wedge.add_vectors_pushing_overlap(
            anchor,
            &[Point::new(-1.0, -3.0), Point::new(-3.0, 1.0), Point::new(1.0, 3.0)],
            0.1,
            WedgeSides::Clockwise,
        );
        assert!(wedge.clockwise_rotation() > std::f32::consts::PI);
        assert!(!wedge.are_vectors_passing_each_other());

        wedge.add_vectors_pushing_overlap(
            anchor,
            &[Point::new(-1.0, 3.0)],
            0.1,
            WedgeSides::CounterClockwise,
        );
        assert!(wedge.are_vectors_passing_each_other());
    }
}
