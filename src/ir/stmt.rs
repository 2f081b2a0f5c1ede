//! Statement tree definitions and loop annotations.

use super::buffer::{Buffer, BufferId};
use super::expr::{Expr, VarId};

/// Annotation key requesting software pipelining with the given depth.
pub const ANN_NUM_STAGES: &str = "num_stages";
/// Output annotation: per-statement pipeline stage, in original order.
pub const ANN_PIPELINE_STAGE: &str = "software_pipeline_stage";
/// Output annotation: per-statement schedule slot, in original order.
pub const ANN_PIPELINE_ORDER: &str = "software_pipeline_order";
/// Output annotation: schedule slots eligible for async copy issuance.
pub const ANN_PIPELINE_ASYNC_STAGES: &str = "software_pipeline_async_stages";

/// An annotation value attached to a loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnValue {
    Int(i64),
    IntSeq(Vec<i64>),
}

/// String-keyed loop annotations.
///
/// Backed by a `Vec` rather than a hash map so that iteration order is the
/// insertion order: transform output must be bit-identical across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Annotations(Vec<(String, AnnValue)>);

impl Annotations {
    pub fn new() -> Self {
        Annotations(Vec::new())
    }

    pub fn get(&self, key: &str) -> Option<&AnnValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Insert or replace the value for `key`.
    pub fn set(&mut self, key: &str, value: AnnValue) {
        match self.0.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => self.0.push((key.to_string(), value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<AnnValue> {
        let idx = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AnnValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Loop execution kind. Only serial loops can be software pipelined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForKind {
    Serial,
    Parallel,
    Vectorized,
    Unrolled,
    ThreadBinding,
}

impl ForKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ForKind::Serial => "serial",
            ForKind::Parallel => "parallel",
            ForKind::Vectorized => "vectorized",
            ForKind::Unrolled => "unrolled",
            ForKind::ThreadBinding => "thread-binding",
        }
    }
}

/// A statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Store one element: `buffer[indices] = value`.
    Store { buffer: BufferId, indices: Vec<Expr>, value: Expr },
    /// A sequence of statements executed in order.
    Seq(Vec<Stmt>),
    /// A conditional statement.
    IfThenElse { cond: Expr, then_body: Box<Stmt>, else_body: Option<Box<Stmt>> },
    /// A lexical block that allocates buffers visible only inside it.
    Block { allocs: Vec<Buffer>, body: Box<Stmt> },
    /// A counted loop over `var` in `[min, min + extent)`.
    For {
        var: VarId,
        min: Expr,
        extent: Expr,
        kind: ForKind,
        annotations: Annotations,
        body: Box<Stmt>,
    },
    /// Evaluate an expression for its side effects.
    Evaluate(Expr),
}

impl Stmt {
    /// The statement's variant name, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Stmt::Store { .. } => "store",
            Stmt::Seq(_) => "sequence",
            Stmt::IfThenElse { .. } => "if-then-else",
            Stmt::Block { .. } => "block",
            Stmt::For { .. } => "for",
            Stmt::Evaluate(_) => "evaluate",
        }
    }

    pub fn store(buffer: BufferId, indices: Vec<Expr>, value: Expr) -> Stmt {
        Stmt::Store { buffer, indices, value }
    }
}
