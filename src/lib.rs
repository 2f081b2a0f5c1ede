//! Tile-level tensor IR and transforms.
//!
//! The crate provides a small statement/expression IR for tile programs
//! (buffers with memory scopes, stores, conditionals, loops) and the
//! transforms that run over it. The main transform is software pipeline
//! planning (`passes::pipeline_planning`), which rewrites a loop annotated
//! with a requested pipeline depth into the same loop carrying per-statement
//! `stage`/`order` schedule annotations for a downstream multi-buffering
//! lowering.

pub mod common;
pub mod ir;
pub mod passes;
