use serde::Serialize;

use crate::explain::PlanNode;

/// Which tree addressing drives visibility and indentation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ViewMode {
    #[default]
    Full,
    Join,
}

impl ViewMode {
    pub fn toggled(self) -> Self {
        match self {
            ViewMode::Full => ViewMode::Join,
            ViewMode::Join => ViewMode::Full,
        }
    }

    /// Level of `node` in this mode's addressing.
    pub fn level(self, node: &PlanNode) -> u32 {
        match self {
            ViewMode::Full => node.position.level,
            ViewMode::Join => node.join_view_position.level,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ViewMode::Full => "PLAN",
            ViewMode::Join => "JOIN",
        }
    }
}

/// Nodes visible under `mode`, in their original order.
pub fn project(nodes: &[PlanNode], mode: ViewMode) -> Vec<&PlanNode> {
    nodes
        .iter()
        .filter(|node| match mode {
            ViewMode::Full => node.position.display,
            ViewMode::Join => node.join_view_position.display,
        })
        .collect()
}
