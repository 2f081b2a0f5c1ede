//! Error taxonomy for IR transforms.
//!
//! Every error here is fatal for the function being transformed: these are
//! static-analysis failures on a fixed input, so there is no recovery path.
//! Callers propagate with `?` and surface the message as a compilation
//! diagnostic.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlanError>;

/// Failures raised by the pipeline planning pass.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    /// The body of an annotated loop is not a statement sequence, and not a
    /// conditional (without an else branch) wrapping one.
    #[error("pipeline body must be a statement sequence, got {found}")]
    BadPipelineBody { found: &'static str },

    /// The requested pipeline depth is not a positive integer.
    #[error("pipeline depth must be at least 1, got {num_stages}")]
    BadStageCount { num_stages: i64 },

    /// Pipelining only applies to serial loops.
    #[error("pipelined loop must be serial, got a {kind} loop")]
    BadLoopKind { kind: &'static str },

    /// Two stages write intersecting regions of the same buffer with no
    /// order that resolves the conflict.
    #[error(
        "stages {first} and {second} both write overlapping regions of \
         buffer '{buffer}'; overlapping writes cannot be pipelined"
    )]
    OverlappingWrites {
        buffer: String,
        first: usize,
        second: usize,
    },

    /// The assignment algorithm produced a different number of schedule
    /// slots than there are statements. This is a defect in the planner,
    /// not a problem with the input.
    #[error("internal: assigned {assigned} schedule slots for {expected} statements")]
    AssignmentMismatch { assigned: usize, expected: usize },
}
