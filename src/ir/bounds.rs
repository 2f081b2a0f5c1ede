//! Conservative interval bounds for index expressions.
//!
//! Maps an index expression to an inclusive `[min, max]` interval given the
//! ranges of the loop variables in scope. Region extraction uses this to
//! turn symbolic accesses into per-dimension footprints; anything the
//! evaluator cannot bound (data-dependent indices, unregistered variables,
//! overflowing arithmetic) comes back as `None` and the caller widens to the
//! whole dimension.

use rustc_hash::FxHashMap;

use super::expr::{BinOp, Expr, VarId};

/// An inclusive integer interval.
pub type Interval = (i64, i64);

/// Ranges of the variables currently in scope.
///
/// Loop walks bind their variable on entry and restore the previous binding
/// on exit, so shadowing in nested loops behaves like the lexical scoping it
/// models.
#[derive(Debug, Clone, Default)]
pub struct VarRanges {
    ranges: FxHashMap<VarId, Interval>,
}

impl VarRanges {
    pub fn new() -> Self {
        VarRanges::default()
    }

    /// Bind `var` to an inclusive interval, returning the previous binding.
    pub fn bind(&mut self, var: VarId, interval: Interval) -> Option<Interval> {
        self.ranges.insert(var, interval)
    }

    /// Restore a binding saved by `bind` (or remove it if there was none).
    pub fn restore(&mut self, var: VarId, saved: Option<Interval>) {
        match saved {
            Some(interval) => {
                self.ranges.insert(var, interval);
            }
            None => {
                self.ranges.remove(&var);
            }
        }
    }

    /// Remove any binding for `var`, returning it for a later `restore`.
    /// Used when a nested loop shadows a variable with a range the
    /// evaluator cannot compute.
    pub fn unbind(&mut self, var: VarId) -> Option<Interval> {
        self.ranges.remove(&var)
    }

    pub fn get(&self, var: VarId) -> Option<Interval> {
        self.ranges.get(&var).copied()
    }
}

/// Evaluate a conservative inclusive bound for `expr`, or `None` if the
/// expression cannot be bounded.
pub fn eval_interval(expr: &Expr, ranges: &VarRanges) -> Option<Interval> {
    match expr {
        Expr::Int(v) => Some((*v, *v)),
        Expr::Var(v) => ranges.get(*v),
        Expr::Binary { op, lhs, rhs } => {
            let a = eval_interval(lhs, ranges)?;
            let b = eval_interval(rhs, ranges)?;
            eval_binop(*op, a, b)
        }
        // Both value arms are live under predication; the bound is their
        // union. The condition does not narrow it.
        Expr::Select { then_val, else_val, .. } => {
            let t = eval_interval(then_val, ranges)?;
            let e = eval_interval(else_val, ranges)?;
            Some((t.0.min(e.0), t.1.max(e.1)))
        }
        Expr::Load { .. } | Expr::Call { .. } => None,
    }
}

fn eval_binop(op: BinOp, (al, ah): Interval, (bl, bh): Interval) -> Option<Interval> {
    match op {
        BinOp::Add => Some((al.checked_add(bl)?, ah.checked_add(bh)?)),
        BinOp::Sub => Some((al.checked_sub(bh)?, ah.checked_sub(bl)?)),
        BinOp::Mul => {
            let products = [
                al.checked_mul(bl)?,
                al.checked_mul(bh)?,
                ah.checked_mul(bl)?,
                ah.checked_mul(bh)?,
            ];
            Some((*products.iter().min().unwrap(), *products.iter().max().unwrap()))
        }
        BinOp::FloorDiv => {
            // Only divisors with a known constant sign-free value are
            // handled; a divisor interval through zero is unbounded.
            if bl == bh && bl > 0 {
                Some((al.div_euclid(bl), ah.div_euclid(bl)))
            } else {
                None
            }
        }
        BinOp::FloorMod => {
            if bl == bh && bl > 0 {
                if al.div_euclid(bl) == ah.div_euclid(bl) {
                    // The whole interval falls in one quotient block, so the
                    // remainder is exact.
                    Some((al.rem_euclid(bl), ah.rem_euclid(bl)))
                } else {
                    Some((0, bl - 1))
                }
            } else {
                None
            }
        }
        BinOp::Min => Some((al.min(bl), ah.min(bh))),
        BinOp::Max => Some((al.max(bl), ah.max(bh))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::expr::Expr;

    fn ranges_with(var: u32, lo: i64, hi: i64) -> VarRanges {
        let mut r = VarRanges::new();
        r.bind(VarId(var), (lo, hi));
        r
    }

    #[test]
    fn constant_and_var() {
        let r = ranges_with(0, 0, 15);
        assert_eq!(eval_interval(&Expr::Int(7), &r), Some((7, 7)));
        assert_eq!(eval_interval(&Expr::var(0), &r), Some((0, 15)));
        assert_eq!(eval_interval(&Expr::var(1), &r), None);
    }

    #[test]
    fn affine_combination() {
        // 16 * v0 + 3 with v0 in [0, 3] -> [3, 51]
        let r = ranges_with(0, 0, 3);
        let e = Expr::add(Expr::mul(Expr::Int(16), Expr::var(0)), Expr::Int(3));
        assert_eq!(eval_interval(&e, &r), Some((3, 51)));
    }

    #[test]
    fn mul_with_negative_range() {
        let r = ranges_with(0, -2, 3);
        let e = Expr::mul(Expr::var(0), Expr::Int(-4));
        assert_eq!(eval_interval(&e, &r), Some((-12, 8)));
    }

    #[test]
    fn floordiv_and_floormod() {
        let r = ranges_with(0, 0, 31);
        let div = Expr::binary(BinOp::FloorDiv, Expr::var(0), Expr::Int(8));
        assert_eq!(eval_interval(&div, &r), Some((0, 3)));
        let rem = Expr::binary(BinOp::FloorMod, Expr::var(0), Expr::Int(8));
        assert_eq!(eval_interval(&rem, &r), Some((0, 7)));
        // Interval confined to one quotient block keeps an exact remainder.
        let r2 = ranges_with(0, 9, 11);
        let rem2 = Expr::binary(BinOp::FloorMod, Expr::var(0), Expr::Int(8));
        assert_eq!(eval_interval(&rem2, &r2), Some((1, 3)));
    }

    #[test]
    fn select_unions_branches() {
        let r = ranges_with(0, 0, 3);
        let e = Expr::select(Expr::var(0), Expr::Int(2), Expr::Int(10));
        assert_eq!(eval_interval(&e, &r), Some((2, 10)));
    }

    #[test]
    fn data_dependent_index_is_unbounded() {
        let r = VarRanges::new();
        let e = Expr::load(crate::ir::BufferId(0), vec![Expr::Int(0)]);
        assert_eq!(eval_interval(&e, &r), None);
    }

    #[test]
    fn bind_and_restore_shadowing() {
        let mut r = ranges_with(0, 0, 7);
        let saved = r.bind(VarId(0), (0, 3));
        assert_eq!(r.get(VarId(0)), Some((0, 3)));
        r.restore(VarId(0), saved);
        assert_eq!(r.get(VarId(0)), Some((0, 7)));
    }
}
