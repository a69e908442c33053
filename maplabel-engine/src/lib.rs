pub mod index;
pub mod leader;
pub mod obstacle;
pub mod session;

pub mod errors {
    use maplabel_core::errors::GeometryError;
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum EngineError {
        #[error("allocation failed while {context}")]
        Allocation { context: &'static str },
        #[error("feature {0} has no shape to index")]
        NoFeatureTypeSpecified(u64),
        #[error("feature {id} has a {kind} shape that its style cannot index")]
        UnhandledFeatureType { id: u64, kind: &'static str },
        #[error("style {0} is not defined")]
        UnknownStyle(String),
        #[error("index entry {0} not found")]
        EntryNotFound(usize),
        #[error("unknown spatial index kind: {0}")]
        UnknownIndex(String),
        #[error("label {0} not found")]
        LabelNotFound(u64),
        #[error("feature {0} not found")]
        FeatureNotFound(u64),
        #[error("placement rule {0} is not defined")]
        RuleNotFound(String),
        #[error(transparent)]
        Geometry(#[from] GeometryError),
    }
}
