//! The tile-level tensor IR.
//!
//! A small statement/expression tree over multi-dimensional buffers with
//! memory scopes. Statements and expressions are closed enums and every
//! traversal is a recursive match over them; there is no visitor object
//! threading mutable state through the walk.

pub mod bounds;
pub mod buffer;
pub mod expr;
pub mod function;
pub mod regions;
pub mod stmt;

pub use buffer::{Buffer, BufferId, MemScope};
pub use expr::{BinOp, Expr, VarId};
pub use function::Function;
pub use regions::{may_overlap, Bound, BufferRegion, ScopeStack};
pub use stmt::{AnnValue, Annotations, ForKind, Stmt};
