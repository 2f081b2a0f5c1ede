//! Memory regions, the region overlap test, and read/write region
//! extraction.
//!
//! A region is a buffer identity plus one `(lower, extent)` interval per
//! dimension. Extraction walks a statement as an opaque unit and reports the
//! footprint of every buffer access reachable from it, resolving buffer
//! handles through an explicit stack of scope frames so block-local
//! allocations shadow outer bindings and never leak out of their block.

use rustc_hash::{FxHashMap, FxHashSet};

use super::bounds::{eval_interval, VarRanges};
use super::buffer::{Buffer, BufferId};
use super::expr::Expr;
use super::stmt::Stmt;

/// One dimension of a region: the half-open element range
/// `[lo, lo + extent)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bound {
    pub lo: i64,
    pub extent: i64,
}

impl Bound {
    pub fn new(lo: i64, extent: i64) -> Self {
        Bound { lo, extent }
    }
}

/// A multi-dimensional memory footprint over one buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferRegion {
    pub buffer: BufferId,
    pub dims: Vec<Bound>,
}

/// Whether two equal-rank regions can touch a common element.
///
/// True iff every dimension's intervals intersect; a single disjoint
/// dimension separates the regions. Zero-extent dimensions are empty and
/// intersect nothing, including themselves. Callers compare regions over
/// the same buffer, which guarantees equal rank.
pub fn may_overlap(a: &BufferRegion, b: &BufferRegion) -> bool {
    debug_assert_eq!(a.dims.len(), b.dims.len());
    for (da, db) in a.dims.iter().zip(b.dims.iter()) {
        if da.lo + da.extent <= db.lo || db.lo + db.extent <= da.lo {
            return false;
        }
        if da.extent <= 0 || db.extent <= 0 {
            return false;
        }
    }
    true
}

/// A stack of buffer-identity frames.
///
/// The bottom frame holds the function's parameter buffers; each
/// `Stmt::Block` pushes a frame with its local allocations on entry and pops
/// exactly that frame on exit, so the enclosing view is restored
/// structurally rather than by manual erase-on-leave bookkeeping.
#[derive(Debug, Default)]
pub struct ScopeStack {
    frames: Vec<FxHashMap<BufferId, Buffer>>,
}

impl ScopeStack {
    pub fn new() -> Self {
        ScopeStack { frames: vec![FxHashMap::default()] }
    }

    /// Build a stack whose bottom frame binds the given buffers.
    pub fn from_buffers<'a>(buffers: impl IntoIterator<Item = &'a Buffer>) -> Self {
        let mut stack = ScopeStack::new();
        for buffer in buffers {
            stack.bind(buffer.clone());
        }
        stack
    }

    pub fn push_frame(&mut self) {
        self.frames.push(FxHashMap::default());
    }

    pub fn pop_frame(&mut self) {
        debug_assert!(self.frames.len() > 1, "popping the parameter frame");
        self.frames.pop();
    }

    /// Bind a buffer in the innermost frame, shadowing any outer binding of
    /// the same handle.
    pub fn bind(&mut self, buffer: Buffer) {
        self.frames
            .last_mut()
            .expect("scope stack always has a bottom frame")
            .insert(buffer.id, buffer);
    }

    /// Resolve a buffer handle, innermost binding first.
    pub fn lookup(&self, id: BufferId) -> Option<&Buffer> {
        self.frames.iter().rev().find_map(|frame| frame.get(&id))
    }

    /// The display name for a buffer handle, for diagnostics.
    pub fn buffer_name(&self, id: BufferId) -> String {
        match self.lookup(id) {
            Some(buffer) => buffer.name.clone(),
            None => id.to_string(),
        }
    }
}

/// Compute the read and write regions reachable from `stmt`.
///
/// `ranges` carries the intervals of loop variables bound outside the
/// statement (typically the pipelined loop's own variable); loops inside the
/// statement extend it during the walk. Accesses to buffers allocated by
/// blocks inside `stmt` are private to the statement and are not reported.
pub fn extract_regions(
    stmt: &Stmt,
    scope: &mut ScopeStack,
    ranges: &mut VarRanges,
) -> (Vec<BufferRegion>, Vec<BufferRegion>) {
    let mut collector = RegionCollector { reads: Vec::new(), writes: Vec::new() };
    collector.walk_stmt(stmt, scope, ranges);
    (collector.reads, collector.writes)
}

struct RegionCollector {
    reads: Vec<BufferRegion>,
    writes: Vec<BufferRegion>,
}

impl RegionCollector {
    fn walk_stmt(&mut self, stmt: &Stmt, scope: &mut ScopeStack, ranges: &mut VarRanges) {
        match stmt {
            Stmt::Store { buffer, indices, value } => {
                if let Some(region) = region_for_access(*buffer, indices, scope, ranges) {
                    self.writes.push(region);
                }
                for index in indices {
                    self.walk_expr(index, scope, ranges);
                }
                self.walk_expr(value, scope, ranges);
            }
            Stmt::Seq(stmts) => {
                for s in stmts {
                    self.walk_stmt(s, scope, ranges);
                }
            }
            Stmt::IfThenElse { cond, then_body, else_body } => {
                self.walk_expr(cond, scope, ranges);
                self.walk_stmt(then_body, scope, ranges);
                if let Some(else_body) = else_body {
                    self.walk_stmt(else_body, scope, ranges);
                }
            }
            Stmt::Block { allocs, body } => {
                scope.push_frame();
                let mut local_ids = FxHashSet::default();
                for buffer in allocs {
                    local_ids.insert(buffer.id);
                    scope.bind(buffer.clone());
                }
                let reads_before = self.reads.len();
                let writes_before = self.writes.len();
                self.walk_stmt(body, scope, ranges);
                scope.pop_frame();
                // Accesses to the block's own allocations are internal to
                // it. Only regions collected inside the block are filtered:
                // an earlier access through a handle the block shadows still
                // refers to the outer buffer.
                let tail: Vec<_> = self.reads.split_off(reads_before);
                self.reads.extend(tail.into_iter().filter(|r| !local_ids.contains(&r.buffer)));
                let tail: Vec<_> = self.writes.split_off(writes_before);
                self.writes.extend(tail.into_iter().filter(|r| !local_ids.contains(&r.buffer)));
            }
            Stmt::For { var, min, extent, body, .. } => {
                self.walk_expr(min, scope, ranges);
                self.walk_expr(extent, scope, ranges);
                let min_iv = eval_interval(min, ranges);
                let ext_iv = eval_interval(extent, ranges);
                let saved = match (min_iv, ext_iv) {
                    (Some((min_lo, min_hi)), Some((_, ext_hi))) if ext_hi >= 1 => {
                        ranges.bind(*var, (min_lo, min_hi + ext_hi - 1))
                    }
                    _ => ranges.unbind(*var),
                };
                self.walk_stmt(body, scope, ranges);
                ranges.restore(*var, saved);
            }
            Stmt::Evaluate(expr) => self.walk_expr(expr, scope, ranges),
        }
    }

    fn walk_expr(&mut self, expr: &Expr, scope: &mut ScopeStack, ranges: &VarRanges) {
        match expr {
            Expr::Int(_) | Expr::Var(_) => {}
            Expr::Binary { lhs, rhs, .. } => {
                self.walk_expr(lhs, scope, ranges);
                self.walk_expr(rhs, scope, ranges);
            }
            Expr::Load { buffer, indices } => {
                if let Some(region) = region_for_access(*buffer, indices, scope, ranges) {
                    self.reads.push(region);
                }
                for index in indices {
                    self.walk_expr(index, scope, ranges);
                }
            }
            Expr::Select { cond, then_val, else_val } => {
                self.walk_expr(cond, scope, ranges);
                self.walk_expr(then_val, scope, ranges);
                self.walk_expr(else_val, scope, ranges);
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    self.walk_expr(arg, scope, ranges);
                }
            }
        }
    }
}

/// The footprint of one access, or `None` for handles the scope cannot
/// resolve (those belong to no tracked buffer and are not reported).
fn region_for_access(
    buffer_id: BufferId,
    indices: &[Expr],
    scope: &ScopeStack,
    ranges: &VarRanges,
) -> Option<BufferRegion> {
    let buffer = scope.lookup(buffer_id)?;
    // A rank mismatch means an opaque view of the buffer; cover all of it.
    if indices.len() != buffer.shape.len() {
        let dims = buffer.shape.iter().map(|&n| Bound::new(0, n)).collect();
        return Some(BufferRegion { buffer: buffer_id, dims });
    }
    let dims = indices
        .iter()
        .zip(buffer.shape.iter())
        .map(|(index, &dim_extent)| match eval_interval(index, ranges) {
            Some((lo, hi)) => Bound::new(lo, hi - lo + 1),
            None => Bound::new(0, dim_extent),
        })
        .collect();
    Some(BufferRegion { buffer: buffer_id, dims })
}
