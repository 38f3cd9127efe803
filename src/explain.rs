//! Parsed explain documents: the flat node list and plan-level totals.

use serde::Serialize;
use thiserror::Error;

use crate::decode::decode;
use crate::flatten::flatten;

/// Structural problems with an `EXPLAIN (FORMAT JSON)` document. Any of these
/// aborts the whole parse; there is no partial plan.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("explain output is not valid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected explain json shape: {0}")]
    Shape(String),

    #[error("plan node is missing required field '{field}'")]
    MissingField { field: &'static str },

    #[error("plan node field '{field}' should be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
}

/// Where a node sits in one of the two tree addressings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Position {
    pub id: u32,
    pub level: u32,
    /// `id` of the parent in the same addressing, 0 for the root.
    pub parent: u32,
    pub display: bool,
    pub below_gather: bool,
}

/// Execution evidence, only present for `EXPLAIN ANALYZE` output.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Analyzed {
    pub actual_rows: i64,
    pub actual_loops: i64,
    pub startup_time: f64,
    pub total_time: f64,
    pub launched_workers: i64,
    pub shared_buffers_hit: i64,
    pub shared_buffers_read: i64,
    pub temp_read_blocks: i64,
    pub temp_write_blocks: i64,
}

impl Analyzed {
    pub fn total_buffers(&self) -> i64 {
        self.shared_buffers_hit + self.shared_buffers_read
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlanNode {
    pub node_type: String,
    pub partial_mode: String,
    pub parallel_aware: bool,

    pub position: Position,
    pub join_view_position: Position,

    pub plan_rows: i64,
    pub plan_width: i64,
    pub startup_cost: f64,
    pub total_cost: f64,

    pub analyzed: Option<Analyzed>,

    pub relation_name: String,
    pub index_name: String,
    pub index_cond: String,
    pub filter: String,
    pub hash_cond: String,
    pub group_key: Vec<String>,
    pub sort_keys: Vec<String>,
    pub presort_keys: Vec<String>,
    pub strategy: String,
    pub command: String,
    pub cte_name: String,
    pub function_name: String,
    pub table_function_name: String,
    pub tid_cond: String,
    pub operation: String,
    pub join_type: String,
    pub subplan_name: String,

    pub is_gather: bool,
    /// Workers planned plus the leader, 0 unless `is_gather`.
    pub planned_workers: i64,
    pub parent_relationship: String,
    pub parent_is_nested_loop: bool,
}

impl PlanNode {
    /// Short label used on the node's row, e.g. `Finalize Aggregate`.
    pub fn title(&self) -> String {
        if self.partial_mode.is_empty() || self.partial_mode == "Simple" {
            self.node_type.clone()
        } else {
            format!("{} {}", self.partial_mode, self.node_type)
        }
    }

    pub fn actual_rows(&self) -> Option<i64> {
        self.analyzed.as_ref().map(|a| a.actual_rows)
    }
}

/// One parsed plan document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExplainPlan {
    pub nodes: Vec<PlanNode>,
    pub analyzed: bool,
    pub has_buffers: bool,
    pub execution_time: f64,
    pub planning_time: f64,
    /// Non-default settings reported by `EXPLAIN (SETTINGS)`.
    pub settings: Vec<(String, String)>,
}

impl ExplainPlan {
    pub fn parse(explain_json: &str) -> Result<Self, PlanError> {
        let decoded = decode(explain_json)?;
        let nodes = flatten(&decoded.plan, decoded.analyzed, decoded.has_buffers)?;

        Ok(ExplainPlan {
            nodes,
            analyzed: decoded.analyzed,
            has_buffers: decoded.has_buffers,
            execution_time: decoded.execution_time,
            planning_time: decoded.planning_time,
            settings: decoded.settings,
        })
    }

    pub fn root(&self) -> Option<&PlanNode> {
        self.nodes.first()
    }

    /// Shared hit + read blocks of the root node. `None` unless the plan was
    /// produced with both ANALYZE and BUFFERS.
    pub fn total_buffers(&self) -> Option<i64> {
        if !self.analyzed || !self.has_buffers {
            return None;
        }
        self.root()?.analyzed.as_ref().map(Analyzed::total_buffers)
    }

    /// Actual rows of the root node. `None` for plan-only output.
    pub fn total_rows(&self) -> Option<i64> {
        if !self.analyzed {
            return None;
        }
        self.root()?.actual_rows()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANALYZE_BUFFERS: &str = include_str!("../testdata/analyze_buffers.json");
    const ANALYZE_NO_BUFFERS: &str = include_str!("../testdata/analyze_no_buffers.json");
    const PLAN_ONLY: &str = include_str!("../testdata/plan_only.json");

    #[test]
    fn aggregates_read_the_root_node() {
        let plan = ExplainPlan::parse(ANALYZE_BUFFERS).unwrap();
        let root = plan.root().unwrap().analyzed.clone().unwrap();

        assert!(plan.analyzed);
        assert!(plan.has_buffers);
        assert_eq!(plan.total_rows(), Some(root.actual_rows));
        assert_eq!(
            plan.total_buffers(),
            Some(root.shared_buffers_hit + root.shared_buffers_read)
        );
        assert_eq!(plan.total_rows(), Some(1));
        assert_eq!(plan.total_buffers(), Some(4425 + 1203));
    }

    #[test]
    fn aggregates_unavailable_without_analyze() {
        let plan = ExplainPlan::parse(PLAN_ONLY).unwrap();
        assert!(!plan.analyzed);
        assert_eq!(plan.execution_time, 0.0);
        assert_eq!(plan.total_rows(), None);
        assert_eq!(plan.total_buffers(), None);
    }

    #[test]
    fn buffers_unavailable_without_instrumentation() {
        let plan = ExplainPlan::parse(ANALYZE_NO_BUFFERS).unwrap();
        assert!(plan.analyzed);
        assert!(!plan.has_buffers);
        assert_eq!(plan.total_rows(), Some(1));
        assert_eq!(plan.total_buffers(), None);
    }

    #[test]
    fn plan_level_scalars() {
        let plan = ExplainPlan::parse(ANALYZE_BUFFERS).unwrap();
        assert_eq!(plan.execution_time, 69.662);
        assert_eq!(plan.planning_time, 0.412);
        assert_eq!(
            plan.settings,
            vec![
                ("random_page_cost".to_string(), "1.1".to_string()),
                ("work_mem".to_string(), "40MB".to_string()),
            ]
        );
    }

    #[test]
    fn title_prefixes_partial_mode() {
        let node = PlanNode {
            node_type: "Aggregate".into(),
            partial_mode: "Finalize".into(),
            ..Default::default()
        };
        assert_eq!(node.title(), "Finalize Aggregate");

        let simple = PlanNode {
            node_type: "Aggregate".into(),
            partial_mode: "Simple".into(),
            ..Default::default()
        };
        assert_eq!(simple.title(), "Aggregate");
    }
}
