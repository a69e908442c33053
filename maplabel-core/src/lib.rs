pub mod geometry;
pub mod model;
pub mod topology;

pub mod errors {
    use std::collections::TryReserveError;

    use thiserror::Error;

    /// 几何与拓扑运算的结构化错误，不耦合任何日志输出。
    #[derive(Debug, Clone, PartialEq, Error)]
    pub enum GeometryError {
        #[error("zero length segment")]
        ZeroLengthSegment,
        #[error("index {index} out of range (len {len})")]
        IndexOutOfRange { index: usize, len: usize },
        #[error("polygon boundary can't be null")]
        BoundaryCantBeNull,
        #[error("expected at least {required} vertices, got {actual}")]
        TooFewVertices { required: usize, actual: usize },
        #[error("degenerate geometry: {0}")]
        DegenerateGeometry(String),
        #[error("topology error: {0}")]
        Topology(String),
        #[error("allocation failed: {0}")]
        Allocation(String),
    }

    impl From<TryReserveError> for GeometryError {
        fn from(value: TryReserveError) -> Self {
            GeometryError::Allocation(value.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::errors::GeometryError;

    #[test]
    fn reserve_failure_becomes_allocation_error() {
        let err = Vec::<u64>::new().try_reserve(usize::MAX).unwrap_err();
        assert!(matches!(GeometryError::from(err), GeometryError::Allocation(_)));
    }
}
