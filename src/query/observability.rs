//! Classifies a planned query into one of five observability mode tags
//! and emits it as a `tracing` field, the way [`crate::engine`] already
//! tags commits (`tracing::debug!(commit_id, tx_id, ...)`) rather than
//! introducing a bespoke metrics channel.
//!
//! The tags mirror what a caller needs to tell apart in a slow-query
//! log: whether the planner found an index to lean on at all, whether
//! it could exploit a sorted range instead of an equality probe,
//! whether it had to merge several index legs, or whether it had to
//! give up and fall back to scanning everything despite an index being
//! defined.

use crate::query::physical::{PhysicalNode, PhysicalOp};
use crate::query::PlannerOutput;

/// One of the five query execution modes callers can key dashboards
/// and alerts off of.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PlanMode {
    /// No usable index; every candidate row is visited.
    FullScan,
    /// A single index leg was used as a sorted range (not a point
    /// lookup), e.g. to satisfy an ORDER BY or a `<`/`>` predicate.
    RangeAware,
    /// A single index leg resolved the match via an equality probe.
    IndexOptimized,
    /// Multiple index legs were planned and merged (intersected or
    /// hash-joined) to answer the query.
    IndexParallel,
    /// An index was considered but rejected by the cost model in favor
    /// of scanning, e.g. because its estimated selectivity was too
    /// close to 1.0 to pay for the index probe.
    FullScanFallback,
}

impl PlanMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanMode::FullScan => "full_scan",
            PlanMode::RangeAware => "range_aware",
            PlanMode::IndexOptimized => "index_optimized",
            PlanMode::IndexParallel => "index_parallel",
            PlanMode::FullScanFallback => "full_scan_fallback",
        }
    }
}

fn count_leaves(node: &PhysicalNode, label_scans: &mut u32, range_scans: &mut u32, eq_scans: &mut u32) {
    match &node.op {
        PhysicalOp::LabelScan { .. } => *label_scans += 1,
        PhysicalOp::PropIndexScan { pred, .. } => match pred {
            crate::query::physical::PropPredicate::Range { .. } => *range_scans += 1,
            crate::query::physical::PropPredicate::Eq { .. } => *eq_scans += 1,
        },
        _ => {}
    }
    for input in &node.inputs {
        count_leaves(input, label_scans, range_scans, eq_scans);
    }
}

fn has_merge_op(node: &PhysicalNode) -> bool {
    if matches!(node.op, PhysicalOp::Intersect { .. } | PhysicalOp::HashJoin { .. }) {
        return true;
    }
    node.inputs.iter().any(has_merge_op)
}

/// Classifies an already-planned query. Selectivity-driven "rejected
/// the index" decisions are made earlier by the planner's cost model;
/// this function only reads the shape of the plan it settled on, so a
/// plan with a `LabelScan` root where an index scan was available
/// reports [`PlanMode::FullScanFallback`] (the caller passes
/// `index_was_available` from its own cost comparison), otherwise
/// plain [`PlanMode::FullScan`].
pub fn classify(output: &PlannerOutput, index_was_available: bool) -> PlanMode {
    let mut label_scans = 0;
    let mut range_scans = 0;
    let mut eq_scans = 0;
    count_leaves(&output.plan.root, &mut label_scans, &mut range_scans, &mut eq_scans);

    if range_scans + eq_scans == 0 {
        return if index_was_available { PlanMode::FullScanFallback } else { PlanMode::FullScan };
    }
    if has_merge_op(&output.plan.root) || range_scans + eq_scans > 1 {
        return PlanMode::IndexParallel;
    }
    if range_scans > 0 {
        return PlanMode::RangeAware;
    }
    PlanMode::IndexOptimized
}

/// Emits the plan mode as a structured `tracing` event, mirroring the
/// engine's `tracing::debug!(commit_id, ...)` convention.
pub fn record(output: &PlannerOutput, index_was_available: bool) -> PlanMode {
    let mode = classify(output, index_was_available);
    tracing::debug!(plan_mode = mode.as_str(), "query planned");
    mode
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::Var;
    use crate::query::physical::{PhysicalOp, PhysicalPlan};
    use crate::query::{PlanExplain, PlannerOutput};
    use crate::types::LabelId;

    fn wrap(root: PhysicalNode) -> PlannerOutput {
        PlannerOutput {
            plan: PhysicalPlan::new(root),
            explain: PlanExplain { root: crate::query::planner::ExplainNode::new("test") },
        }
    }

    #[test]
    fn bare_label_scan_with_no_index_available_is_full_scan() {
        let node = PhysicalNode::new(PhysicalOp::LabelScan { label: LabelId(1), as_var: Var("n".into()) });
        assert_eq!(classify(&wrap(node), false), PlanMode::FullScan);
    }

    #[test]
    fn bare_label_scan_when_index_was_available_is_fallback() {
        let node = PhysicalNode::new(PhysicalOp::LabelScan { label: LabelId(1), as_var: Var("n".into()) });
        assert_eq!(classify(&wrap(node), true), PlanMode::FullScanFallback);
    }

    #[test]
    fn single_range_scan_is_range_aware() {
        use std::ops::Bound;
        let node = PhysicalNode::new(PhysicalOp::PropIndexScan {
            label: LabelId(1),
            prop: crate::types::PropId(1),
            pred: crate::query::physical::PropPredicate::Range {
                var: Var("n".into()),
                prop: crate::types::PropId(1),
                lower: Bound::Unbounded,
                upper: Bound::Unbounded,
            },
            selectivity: 0.1,
            as_var: Var("n".into()),
        });
        assert_eq!(classify(&wrap(node), true), PlanMode::RangeAware);
    }
}
