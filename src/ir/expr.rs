//! Expression tree definitions.

use super::buffer::BufferId;

/// A loop or binding variable. Like `BufferId`, a u32 index; variables with
/// ranges known to an analysis are registered in its `VarRanges` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(pub u32);

impl std::fmt::Display for VarId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Integer binary operators that appear in index arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    FloorDiv,
    FloorMod,
    Min,
    Max,
}

/// An expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Var(VarId),
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    /// Read one element of a buffer.
    Load { buffer: BufferId, indices: Vec<Expr> },
    /// Conditional expression. Lowered to predication, not a branch, so both
    /// value arms are live; the condition only selects between them.
    Select { cond: Box<Expr>, then_val: Box<Expr>, else_val: Box<Expr> },
    /// An opaque intrinsic call. The planner does not look through these.
    Call { name: String, args: Vec<Expr> },
}

impl Expr {
    pub fn var(id: u32) -> Expr {
        Expr::Var(VarId(id))
    }

    pub fn load(buffer: BufferId, indices: Vec<Expr>) -> Expr {
        Expr::Load { buffer, indices }
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }

    pub fn add(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Add, lhs, rhs)
    }

    pub fn mul(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Mul, lhs, rhs)
    }

    pub fn select(cond: Expr, then_val: Expr, else_val: Expr) -> Expr {
        Expr::Select {
            cond: Box::new(cond),
            then_val: Box::new(then_val),
            else_val: Box::new(else_val),
        }
    }
}
