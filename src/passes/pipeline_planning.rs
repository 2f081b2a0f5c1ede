//! Software pipeline planning.
//!
//! Rewrites every serial loop annotated with `num_stages` into the same loop
//! carrying a per-statement pipeline schedule: a `software_pipeline_stage`
//! (buffering depth) and `software_pipeline_order` (slot in the rotated
//! iteration) for each statement of the loop body, plus an async-stages
//! marker when the target can issue asynchronous copies. A downstream
//! lowering pass materializes the multi-buffered storage and the rotated
//! instruction stream from these annotations.
//!
//! The schedule is built in five steps:
//! 1. Per statement, extract read/write regions and classify bulk
//!    global-to-fast-memory copies.
//! 2. For each copy, find its last consumer among later statements; reject
//!    overlapping writes outright (no order resolves them).
//! 3. Greedily assign (order, stage): ordinary statements take the next slot
//!    at depth `num_stages`; a copy with a known consumer is deferred and
//!    placed right after that consumer at depth 0, so the copy for iteration
//!    i+num_stages overlaps with compute for iteration i.
//! 4. If every copy landed after every compute slot, rotate the copies to
//!    the front of the next iteration and shrink all compute depths by one;
//!    the dependence structure is unchanged but one level of buffering
//!    disappears.
//! 5. Serialize the schedule back onto the loop, index-aligned with the
//!    original statement order.

use log::{debug, trace};

use crate::common::error::{PlanError, Result};
use crate::common::target::Target;
use crate::ir::bounds::{eval_interval, VarRanges};
use crate::ir::buffer::MemScope;
use crate::ir::regions::{extract_regions, may_overlap, BufferRegion, ScopeStack};
use crate::ir::stmt::{
    AnnValue, Annotations, ForKind, Stmt, ANN_NUM_STAGES, ANN_PIPELINE_ASYNC_STAGES,
    ANN_PIPELINE_ORDER, ANN_PIPELINE_STAGE,
};
use crate::ir::{Expr, Function, VarId};

/// Plan every annotated loop in the function.
pub fn run(func: &mut Function) -> Result<()> {
    debug!("pipeline planning: {}", func.name);
    let mut scope = ScopeStack::from_buffers(&func.params);
    let target = func.target;
    plan_stmt(&mut func.body, &mut scope, &target)
}

/// Walk the statement tree looking for annotated loops. Loops that carry the
/// pipelining annotation are planned and their bodies left alone; everything
/// else is traversed, with block allocations entering the scope for the
/// duration of their block.
fn plan_stmt(stmt: &mut Stmt, scope: &mut ScopeStack, target: &Target) -> Result<()> {
    match stmt {
        Stmt::Seq(stmts) => {
            for s in stmts {
                plan_stmt(s, scope, target)?;
            }
            Ok(())
        }
        Stmt::IfThenElse { then_body, else_body, .. } => {
            plan_stmt(then_body, scope, target)?;
            if let Some(else_body) = else_body {
                plan_stmt(else_body, scope, target)?;
            }
            Ok(())
        }
        Stmt::Block { allocs, body } => {
            scope.push_frame();
            for buffer in allocs {
                scope.bind(buffer.clone());
            }
            let result = plan_stmt(body, scope, target);
            scope.pop_frame();
            result
        }
        Stmt::For { var, min, extent, kind, annotations, body } => {
            if annotations.get(ANN_NUM_STAGES).is_some() {
                plan_pipeline_loop(*var, min, extent, *kind, annotations, body, scope, target)
            } else {
                plan_stmt(body, scope, target)
            }
        }
        Stmt::Store { .. } | Stmt::Evaluate(_) => Ok(()),
    }
}

/// Plan one annotated loop, replacing its `num_stages` annotation with the
/// computed schedule.
#[allow(clippy::too_many_arguments)]
fn plan_pipeline_loop(
    var: VarId,
    min: &Expr,
    extent: &Expr,
    kind: ForKind,
    annotations: &mut Annotations,
    body: &Stmt,
    scope: &mut ScopeStack,
    target: &Target,
) -> Result<()> {
    let num_stages = match annotations.get(ANN_NUM_STAGES) {
        Some(&AnnValue::Int(n)) => n,
        _ => return Err(PlanError::BadStageCount { num_stages: 0 }),
    };
    if num_stages < 1 {
        return Err(PlanError::BadStageCount { num_stages });
    }
    if kind != ForKind::Serial {
        return Err(PlanError::BadLoopKind { kind: kind.as_str() });
    }

    // The loop body may be wrapped in a block whose allocations (the tiles
    // being pipelined) must be visible while analyzing the stages.
    let mut pushed_frame = false;
    let mut pipeline_body: &Stmt = body;
    if let Stmt::Block { allocs, body: inner } = pipeline_body {
        scope.push_frame();
        pushed_frame = true;
        for buffer in allocs {
            scope.bind(buffer.clone());
        }
        pipeline_body = &**inner;
    }

    let result = plan_body(var, min, extent, num_stages, pipeline_body, scope);
    if pushed_frame {
        scope.pop_frame();
    }
    let (stages, orders) = result?;

    annotations.remove(ANN_NUM_STAGES);
    annotations.set(ANN_PIPELINE_STAGE, AnnValue::IntSeq(stages));
    annotations.set(ANN_PIPELINE_ORDER, AnnValue::IntSeq(orders));
    // Known limitation: the marker is the fixed slot 0 whenever the target
    // supports async issuance, not a list derived from the copy stages.
    if target.supports_async_copy() {
        annotations.set(ANN_PIPELINE_ASYNC_STAGES, AnnValue::IntSeq(vec![0]));
    }
    Ok(())
}

/// Build the schedule for an unwrapped pipeline body. Returns the
/// (stage, order) sequences index-aligned with the original statements.
fn plan_body(
    var: VarId,
    min: &Expr,
    extent: &Expr,
    num_stages: i64,
    body: &Stmt,
    scope: &mut ScopeStack,
) -> Result<(Vec<i64>, Vec<i64>)> {
    // Accept a flat sequence, or a guard conditional with no else branch
    // wrapping one (the usual shape after tail-padding guards are inserted).
    let mut body = body;
    if let Stmt::IfThenElse { then_body, else_body, .. } = body {
        if else_body.is_some() {
            return Err(PlanError::BadPipelineBody { found: "if-then-else with an else branch" });
        }
        body = &**then_body;
    }
    let stmts = match body {
        Stmt::Seq(stmts) => stmts,
        other => return Err(PlanError::BadPipelineBody { found: other.kind_name() }),
    };

    let mut ranges = VarRanges::new();
    let empty = VarRanges::new();
    if let (Some((min_lo, min_hi)), Some((_, ext_hi))) =
        (eval_interval(min, &empty), eval_interval(extent, &empty))
    {
        if ext_hi >= 1 {
            ranges.bind(var, (min_lo, min_hi + ext_hi - 1));
        }
    }

    debug!(
        "planning pipeline over {}: {} statements at depth {}",
        var,
        stmts.len(),
        num_stages
    );

    let mut infos: Vec<StageInfo> = stmts
        .iter()
        .enumerate()
        .map(|(idx, stmt)| StageInfo::build(stmt, idx, scope, &mut ranges))
        .collect();

    analyze_last_uses(&mut infos, scope)?;
    assign_schedule(&mut infos, num_stages)?;
    rotate_trailing_copies(&mut infos, num_stages);

    let mut stages = Vec::with_capacity(infos.len());
    let mut orders = Vec::with_capacity(infos.len());
    for info in &infos {
        match (info.stage, info.order) {
            (Some(stage), Some(order)) => {
                stages.push(stage);
                orders.push(order as i64);
            }
            _ => {
                return Err(PlanError::AssignmentMismatch {
                    assigned: infos.iter().filter(|i| i.order.is_some()).count(),
                    expected: infos.len(),
                })
            }
        }
    }
    Ok((stages, orders))
}

/// Per-statement scheduling state.
#[derive(Debug)]
struct StageInfo {
    /// Position in the input sequence. Stable; the output arrays are indexed
    /// by it.
    original_order: usize,
    reads: Vec<BufferRegion>,
    writes: Vec<BufferRegion>,
    /// Whether the statement is a bulk copy from global into fast memory.
    is_copy: bool,
    /// `original_order` of the furthest later statement that consumes this
    /// copy's output. `None` when no consumer was found.
    last_use_stage: Option<usize>,
    order: Option<usize>,
    stage: Option<i64>,
}

impl StageInfo {
    fn build(stmt: &Stmt, idx: usize, scope: &mut ScopeStack, ranges: &mut VarRanges) -> StageInfo {
        let (reads, writes) = extract_regions(stmt, scope, ranges);
        let is_copy = is_copy_stage(stmt, scope);
        trace!(
            "stage {}: {} reads, {} writes, copy={}",
            idx,
            reads.len(),
            writes.len(),
            is_copy
        );
        StageInfo {
            original_order: idx,
            reads,
            writes,
            is_copy,
            last_use_stage: None,
            order: None,
            stage: None,
        }
    }
}

/// Whether a statement is a bulk copy: some store in it targets a fast
/// scope (shared, shared.dyn, local) and its stored value reads from global
/// memory, possibly through nested selects.
///
/// This is a syntactic classification. It looks at what the statement is,
/// not at what it computes, so unusual constructs can be over- or
/// under-classified; the planner only relies on it to pick candidates for
/// deferred placement.
pub fn is_copy_stage(stmt: &Stmt, scope: &mut ScopeStack) -> bool {
    match stmt {
        Stmt::Store { buffer, value, .. } => {
            let dest_is_fast = scope
                .lookup(*buffer)
                .is_some_and(|b| b.scope.is_copy_destination());
            dest_is_fast && reads_global(value, scope)
        }
        Stmt::Seq(stmts) => stmts.iter().any(|s| is_copy_stage(s, scope)),
        Stmt::IfThenElse { then_body, else_body, .. } => {
            // The condition is not inspected: a guard that merely references
            // global data does not make the statement a copy.
            let mut found = is_copy_stage(then_body, scope);
            if let Some(else_body) = else_body {
                found |= is_copy_stage(else_body, scope);
            }
            found
        }
        Stmt::Block { allocs, body } => {
            scope.push_frame();
            for buffer in allocs {
                scope.bind(buffer.clone());
            }
            let found = is_copy_stage(body, scope);
            scope.pop_frame();
            found
        }
        Stmt::For { body, .. } => is_copy_stage(body, scope),
        Stmt::Evaluate(_) => false,
    }
}

/// Whether the value expression reads any global-scope buffer. Select
/// conditions are skipped; opaque calls are not looked through.
fn reads_global(expr: &Expr, scope: &ScopeStack) -> bool {
    match expr {
        Expr::Load { buffer, .. } => scope
            .lookup(*buffer)
            .is_some_and(|b| b.scope == MemScope::Global),
        Expr::Select { then_val, else_val, .. } => {
            reads_global(then_val, scope) || reads_global(else_val, scope)
        }
        Expr::Binary { lhs, rhs, .. } => reads_global(lhs, scope) || reads_global(rhs, scope),
        Expr::Call { .. } => false,
        Expr::Int(_) | Expr::Var(_) => false,
    }
}

/// For every copy stage, find the furthest later statement that reads its
/// output, and reject overlapping writes.
///
/// Only copy stages are tracked as producers: compute stages are kept in
/// their original relative order by the assignment below, so their consumers
/// never observe a reordering. Scan order is fixed by `original_order`, so
/// the result does not depend on any container's iteration order.
fn analyze_last_uses(infos: &mut [StageInfo], scope: &ScopeStack) -> Result<()> {
    let n = infos.len();
    for p in 0..n {
        if !infos[p].is_copy {
            continue;
        }
        for q in (p + 1)..n {
            let mut consumed = false;
            for read in &infos[q].reads {
                if infos[p]
                    .writes
                    .iter()
                    .any(|w| w.buffer == read.buffer && may_overlap(w, read))
                {
                    consumed = true;
                }
            }
            for write in &infos[q].writes {
                if infos[p]
                    .writes
                    .iter()
                    .any(|w| w.buffer == write.buffer && may_overlap(w, write))
                {
                    return Err(PlanError::OverlappingWrites {
                        buffer: scope.buffer_name(write.buffer),
                        first: infos[p].original_order,
                        second: infos[q].original_order,
                    });
                }
            }
            if consumed {
                let q_order = infos[q].original_order;
                infos[p].last_use_stage =
                    Some(infos[p].last_use_stage.map_or(q_order, |cur| cur.max(q_order)));
            }
        }
    }
    Ok(())
}

/// Greedily assign (order, stage) to every statement.
///
/// Copies with a known last consumer are deferred past it and placed at
/// depth 0; everything else takes the next slot at depth `num_stages` in
/// original order. A copy with no detected consumer is not known to be safe
/// to defer and is scheduled like an ordinary statement at its own turn.
///
/// The claim relation (which anchor each deferred copy attaches to) is
/// computed once up front, so the placement pass is a single in-order scan.
fn assign_schedule(infos: &mut [StageInfo], num_stages: i64) -> Result<()> {
    let n = infos.len();
    let mut claimed: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, info) in infos.iter().enumerate() {
        if info.is_copy {
            if let Some(anchor) = info.last_use_stage {
                claimed[anchor].push(i);
            }
        }
    }

    let mut next_order = 0;
    for i in 0..n {
        if infos[i].is_copy && infos[i].last_use_stage.is_some() {
            continue;
        }
        infos[i].order = Some(next_order);
        infos[i].stage = Some(num_stages);
        next_order += 1;
        for &copy in &claimed[i] {
            trace!("deferring copy stage {} behind its last use {}", copy, i);
            infos[copy].order = Some(next_order);
            infos[copy].stage = Some(0);
            next_order += 1;
        }
    }

    if next_order != n {
        return Err(PlanError::AssignmentMismatch { assigned: next_order, expected: n });
    }
    Ok(())
}

/// If every copy slot trails every compute slot, rotate the copies to the
/// front of the order sequence and drop one buffering level from the
/// compute stages. A copy that runs after all compute in a rotation can
/// equally run at the head of the next rotation without changing any
/// data dependence, and that removes the need for one extra buffer depth.
fn rotate_trailing_copies(infos: &mut [StageInfo], num_stages: i64) {
    let n = infos.len();
    let mut copy_count = 0;
    let mut copy_order_min = n;
    let mut non_copy_order_max = 0;
    for info in infos.iter() {
        let Some(order) = info.order else { return };
        if info.is_copy {
            copy_count += 1;
            copy_order_min = copy_order_min.min(order);
        } else {
            non_copy_order_max = non_copy_order_max.max(order);
        }
    }
    if copy_count == 0 || copy_order_min <= non_copy_order_max || num_stages < 2 {
        return;
    }
    debug!("rotating {} trailing copy stages to the front", copy_count);
    for info in infos.iter_mut() {
        if let Some(order) = info.order {
            info.order = Some((order + copy_count) % n);
        }
        if !info.is_copy {
            if let Some(stage) = info.stage {
                info.stage = Some(stage - 1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::target::Target;
    use crate::ir::buffer::{Buffer, BufferId};
    use crate::ir::stmt::Annotations;

    const A_G: BufferId = BufferId(0);
    const A_S: BufferId = BufferId(1);
    const B: BufferId = BufferId(2);
    const C: BufferId = BufferId(3);

    fn buffers() -> Vec<Buffer> {
        vec![
            Buffer::new(0, "A", MemScope::Global, vec![64]),
            Buffer::new(1, "A_shared", MemScope::Shared, vec![64]),
            Buffer::new(2, "B", MemScope::Shared, vec![64]),
            Buffer::new(3, "C", MemScope::Shared, vec![64]),
        ]
    }

    /// buffer[0] = load src[0]
    fn move_stmt(dst: BufferId, src: BufferId) -> Stmt {
        Stmt::store(dst, vec![Expr::Int(0)], Expr::load(src, vec![Expr::Int(0)]))
    }

    fn pipelined_loop(num_stages: i64, kind: ForKind, body: Stmt) -> Stmt {
        let mut annotations = Annotations::new();
        annotations.set(ANN_NUM_STAGES, AnnValue::Int(num_stages));
        Stmt::For {
            var: VarId(0),
            min: Expr::Int(0),
            extent: Expr::Int(16),
            kind,
            annotations,
            body: Box::new(body),
        }
    }

    fn planned(func: &mut Function) -> (Vec<i64>, Vec<i64>) {
        run(func).expect("planning failed");
        let Stmt::For { annotations, .. } = &func.body else { panic!("expected loop") };
        let Some(AnnValue::IntSeq(stages)) = annotations.get(ANN_PIPELINE_STAGE) else {
            panic!("missing stage annotation")
        };
        let Some(AnnValue::IntSeq(orders)) = annotations.get(ANN_PIPELINE_ORDER) else {
            panic!("missing order annotation")
        };
        (stages.clone(), orders.clone())
    }

    // ── copy classification ───────────────────────────────────────────────

    #[test]
    fn classifies_global_to_shared_store() {
        let mut scope = ScopeStack::from_buffers(&buffers());
        assert!(is_copy_stage(&move_stmt(A_S, A_G), &mut scope));
        // Shared-to-shared moves are not bulk copies.
        assert!(!is_copy_stage(&move_stmt(B, A_S), &mut scope));
        // Neither are stores back out to global.
        assert!(!is_copy_stage(&move_stmt(A_G, A_S), &mut scope));
    }

    #[test]
    fn classifies_through_nested_selects() {
        let mut scope = ScopeStack::from_buffers(&buffers());
        let guarded = Stmt::store(
            A_S,
            vec![Expr::Int(0)],
            Expr::select(
                Expr::var(0),
                Expr::select(Expr::var(1), Expr::load(A_G, vec![Expr::Int(0)]), Expr::Int(0)),
                Expr::Int(0),
            ),
        );
        assert!(is_copy_stage(&guarded, &mut scope));

        // A global read that only appears in the select condition does not
        // make the statement a copy.
        let cond_only = Stmt::store(
            A_S,
            vec![Expr::Int(0)],
            Expr::select(Expr::load(A_G, vec![Expr::Int(0)]), Expr::Int(1), Expr::Int(2)),
        );
        assert!(!is_copy_stage(&cond_only, &mut scope));
    }

    #[test]
    fn classifies_branching_and_looped_stores() {
        let mut scope = ScopeStack::from_buffers(&buffers());
        // Store only in the else branch.
        let branched = Stmt::IfThenElse {
            cond: Expr::var(0),
            then_body: Box::new(Stmt::Evaluate(Expr::Int(0))),
            else_body: Some(Box::new(move_stmt(A_S, A_G))),
        };
        assert!(is_copy_stage(&branched, &mut scope));

        // The usual shape: a copy loop of element stores.
        let looped = Stmt::For {
            var: VarId(5),
            min: Expr::Int(0),
            extent: Expr::Int(64),
            kind: ForKind::Serial,
            annotations: Annotations::new(),
            body: Box::new(Stmt::store(
                A_S,
                vec![Expr::var(5)],
                Expr::load(A_G, vec![Expr::var(5)]),
            )),
        };
        assert!(is_copy_stage(&looped, &mut scope));
    }

    #[test]
    fn opaque_calls_are_not_looked_through() {
        let mut scope = ScopeStack::from_buffers(&buffers());
        let via_call = Stmt::store(
            A_S,
            vec![Expr::Int(0)],
            Expr::Call { name: "reduce".to_string(), args: vec![Expr::load(A_G, vec![Expr::Int(0)])] },
        );
        assert!(!is_copy_stage(&via_call, &mut scope));
    }

    // ── scheduling scenarios ──────────────────────────────────────────────

    #[test]
    fn copy_feeding_compute_is_deferred() {
        // (0) copy A -> A_shared, (1) B = f(A_shared), (2) C = f(B)
        let body = Stmt::Seq(vec![
            move_stmt(A_S, A_G),
            move_stmt(B, A_S),
            move_stmt(C, B),
        ]);
        let mut func = Function::new(
            "main",
            buffers(),
            pipelined_loop(3, ForKind::Serial, body),
            Target::cpu(),
        );
        let (stages, orders) = planned(&mut func);
        assert_eq!(stages, vec![0, 3, 3]);
        assert_eq!(orders, vec![1, 0, 2]);
    }

    #[test]
    fn trailing_copy_is_rotated_to_front() {
        // Two compute stages, then a copy nothing consumes.
        let body = Stmt::Seq(vec![
            move_stmt(B, A_S),
            move_stmt(C, B),
            move_stmt(A_S, A_G),
        ]);
        let mut func = Function::new(
            "main",
            buffers(),
            pipelined_loop(3, ForKind::Serial, body),
            Target::cpu(),
        );
        let (stages, orders) = planned(&mut func);
        // Rotation moved the copy to slot 0 and shrank compute depth by one;
        // the copy keeps its conservative depth.
        assert_eq!(orders, vec![1, 2, 0]);
        assert_eq!(stages, vec![2, 2, 3]);
    }

    #[test]
    fn no_rotation_at_depth_one() {
        let body = Stmt::Seq(vec![move_stmt(B, A_S), move_stmt(A_S, A_G)]);
        let mut func = Function::new(
            "main",
            buffers(),
            pipelined_loop(1, ForKind::Serial, body),
            Target::cpu(),
        );
        let (stages, orders) = planned(&mut func);
        assert_eq!(orders, vec![0, 1]);
        assert_eq!(stages, vec![1, 1]);
    }

    #[test]
    fn lone_unconsumed_copy_is_scheduled_like_compute() {
        let body = Stmt::Seq(vec![move_stmt(A_S, A_G)]);
        let mut func = Function::new(
            "main",
            buffers(),
            pipelined_loop(3, ForKind::Serial, body),
            Target::cpu(),
        );
        let (stages, orders) = planned(&mut func);
        assert_eq!(orders, vec![0]);
        assert_eq!(stages, vec![3]);
    }

    #[test]
    fn orders_are_a_permutation() {
        // Deferred copy, two computes, trailing unconsumed copy.
        let body = Stmt::Seq(vec![
            move_stmt(A_S, A_G),
            move_stmt(B, A_S),
            move_stmt(C, B),
            Stmt::store(B, vec![Expr::Int(32)], Expr::load(A_G, vec![Expr::Int(32)])),
        ]);
        let mut func = Function::new(
            "main",
            buffers(),
            pipelined_loop(2, ForKind::Serial, body),
            Target::cpu(),
        );
        let (_, orders) = planned(&mut func);
        let mut sorted = orders.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2, 3]);
    }

    #[test]
    fn overlapping_writes_are_rejected() {
        // Stage 0 copies into A_shared[0..16); stage 1 writes A_shared[8].
        let body = Stmt::Seq(vec![
            Stmt::For {
                var: VarId(5),
                min: Expr::Int(0),
                extent: Expr::Int(16),
                kind: ForKind::Serial,
                annotations: Annotations::new(),
                body: Box::new(Stmt::store(
                    A_S,
                    vec![Expr::var(5)],
                    Expr::load(A_G, vec![Expr::var(5)]),
                )),
            },
            Stmt::store(A_S, vec![Expr::Int(8)], Expr::Int(0)),
        ]);
        let mut func = Function::new(
            "main",
            buffers(),
            pipelined_loop(2, ForKind::Serial, body),
            Target::cpu(),
        );
        let err = run(&mut func).unwrap_err();
        assert_eq!(
            err,
            PlanError::OverlappingWrites { buffer: "A_shared".to_string(), first: 0, second: 1 }
        );
    }

    #[test]
    fn disjoint_writes_to_same_buffer_are_allowed() {
        // Both stages write A_shared, but halves that cannot intersect.
        let halves = |lo: i64| Stmt::For {
            var: VarId(5),
            min: Expr::Int(lo),
            extent: Expr::Int(32),
            kind: ForKind::Serial,
            annotations: Annotations::new(),
            body: Box::new(Stmt::store(
                A_S,
                vec![Expr::var(5)],
                Expr::load(A_G, vec![Expr::var(5)]),
            )),
        };
        let body = Stmt::Seq(vec![halves(0), halves(32)]);
        let mut func = Function::new(
            "main",
            buffers(),
            pipelined_loop(2, ForKind::Serial, body),
            Target::cpu(),
        );
        assert!(run(&mut func).is_ok());
    }

    // ── input shape and annotation hygiene ────────────────────────────────

    #[test]
    fn rejects_non_sequence_body() {
        let mut func = Function::new(
            "main",
            buffers(),
            pipelined_loop(2, ForKind::Serial, move_stmt(A_S, A_G)),
            Target::cpu(),
        );
        assert_eq!(run(&mut func).unwrap_err(), PlanError::BadPipelineBody { found: "store" });
    }

    #[test]
    fn rejects_guard_with_else_branch() {
        let body = Stmt::IfThenElse {
            cond: Expr::var(0),
            then_body: Box::new(Stmt::Seq(vec![move_stmt(A_S, A_G)])),
            else_body: Some(Box::new(Stmt::Seq(vec![move_stmt(B, A_S)]))),
        };
        let mut func = Function::new(
            "main",
            buffers(),
            pipelined_loop(2, ForKind::Serial, body),
            Target::cpu(),
        );
        assert!(matches!(run(&mut func).unwrap_err(), PlanError::BadPipelineBody { .. }));
    }

    #[test]
    fn accepts_guarded_sequence_body() {
        let body = Stmt::IfThenElse {
            cond: Expr::var(0),
            then_body: Box::new(Stmt::Seq(vec![move_stmt(A_S, A_G), move_stmt(B, A_S)])),
            else_body: None,
        };
        let mut func = Function::new(
            "main",
            buffers(),
            pipelined_loop(3, ForKind::Serial, body),
            Target::cpu(),
        );
        let (stages, orders) = planned(&mut func);
        // The deferred copy ends up behind the only compute slot, so the
        // rotation fires too: copy first, compute depth shrunk by one.
        assert_eq!(stages, vec![0, 2]);
        assert_eq!(orders, vec![0, 1]);
    }

    #[test]
    fn rejects_bad_depth_and_non_serial_loops() {
        let body = Stmt::Seq(vec![move_stmt(A_S, A_G)]);
        let mut func = Function::new(
            "main",
            buffers(),
            pipelined_loop(0, ForKind::Serial, body.clone()),
            Target::cpu(),
        );
        assert_eq!(run(&mut func).unwrap_err(), PlanError::BadStageCount { num_stages: 0 });

        let mut func = Function::new(
            "main",
            buffers(),
            pipelined_loop(2, ForKind::Parallel, body),
            Target::cpu(),
        );
        assert_eq!(run(&mut func).unwrap_err(), PlanError::BadLoopKind { kind: "parallel" });
    }

    #[test]
    fn consumes_depth_annotation_and_keeps_the_rest() {
        let body = Stmt::Seq(vec![move_stmt(A_S, A_G), move_stmt(B, A_S)]);
        let mut looped = pipelined_loop(3, ForKind::Serial, body);
        let Stmt::For { annotations, .. } = &mut looped else { unreachable!() };
        annotations.set("pragma_unroll_explicit", AnnValue::Int(0));
        let mut func = Function::new("main", buffers(), looped, Target::cpu());
        run(&mut func).unwrap();

        let Stmt::For { annotations, .. } = &func.body else { unreachable!() };
        assert!(annotations.get(ANN_NUM_STAGES).is_none());
        assert_eq!(annotations.get("pragma_unroll_explicit"), Some(&AnnValue::Int(0)));
        assert!(annotations.get(ANN_PIPELINE_ASYNC_STAGES).is_none());
    }

    #[test]
    fn async_marker_follows_target_capability() {
        let body = Stmt::Seq(vec![move_stmt(A_S, A_G), move_stmt(B, A_S)]);
        let mut func = Function::new(
            "main",
            buffers(),
            pipelined_loop(3, ForKind::Serial, body),
            Target::cuda(80),
        );
        run(&mut func).unwrap();
        let Stmt::For { annotations, .. } = &func.body else { unreachable!() };
        assert_eq!(
            annotations.get(ANN_PIPELINE_ASYNC_STAGES),
            Some(&AnnValue::IntSeq(vec![0]))
        );
    }

    #[test]
    fn block_wrapped_body_binds_tile_allocations() {
        // The pipelined tiles are allocated by a block around the sequence;
        // classification and use-def must see them.
        let tile = Buffer::new(1, "A_shared", MemScope::Shared, vec![64]);
        let body = Stmt::Block {
            allocs: vec![tile],
            body: Box::new(Stmt::Seq(vec![move_stmt(A_S, A_G), move_stmt(B, A_S)])),
        };
        let params = vec![
            Buffer::new(0, "A", MemScope::Global, vec![64]),
            Buffer::new(2, "B", MemScope::Shared, vec![64]),
        ];
        let mut func =
            Function::new("main", params, pipelined_loop(2, ForKind::Serial, body), Target::cpu());
        let (stages, orders) = planned(&mut func);
        assert_eq!(stages, vec![0, 1]);
        assert_eq!(orders, vec![0, 1]);
    }

    #[test]
    fn plans_every_annotated_loop_in_a_function() {
        let inner = pipelined_loop(2, ForKind::Serial, Stmt::Seq(vec![move_stmt(A_S, A_G)]));
        let outer = Stmt::For {
            var: VarId(9),
            min: Expr::Int(0),
            extent: Expr::Int(4),
            kind: ForKind::Serial,
            annotations: Annotations::new(),
            body: Box::new(inner),
        };
        let sibling = pipelined_loop(3, ForKind::Serial, Stmt::Seq(vec![move_stmt(B, A_S)]));
        let mut func = Function::new(
            "main",
            buffers(),
            Stmt::Seq(vec![outer, sibling]),
            Target::cpu(),
        );
        run(&mut func).unwrap();

        let Stmt::Seq(stmts) = &func.body else { unreachable!() };
        let Stmt::For { body: outer_body, .. } = &stmts[0] else { unreachable!() };
        let Stmt::For { annotations, .. } = outer_body.as_ref() else { unreachable!() };
        assert!(annotations.get(ANN_PIPELINE_ORDER).is_some());
        let Stmt::For { annotations, .. } = &stmts[1] else { unreachable!() };
        assert!(annotations.get(ANN_PIPELINE_ORDER).is_some());
    }
}
