//! Single pre-order walk over the plan tree that produces the flat node list
//! and assigns both tree addressings.

use serde_json::{Map, Value};

use crate::decode::PlanObject;
use crate::explain::{Analyzed, PlanError, PlanNode, Position};

const JOIN_TYPES: &[&str] = &["Nested Loop", "Hash Join", "Merge Join"];

fn is_join_type(node_type: &str) -> bool {
    JOIN_TYPES.contains(&node_type)
}

/// Traversal state shared by every level of the recursion.
struct ParseContext {
    next_id: u32,
    nodes: Vec<PlanNode>,
    analyzed: bool,
    has_buffers: bool,
}

/// State handed from a node to its children.
#[derive(Clone, Copy, Default)]
struct Inherited {
    parent: Position,
    /// Nearest join-view-significant ancestor (or the virtual root).
    join_anchor: Position,
    below_gather: bool,
    parent_is_nested_loop: bool,
}

pub fn flatten(
    root: &Map<String, Value>,
    analyzed: bool,
    has_buffers: bool,
) -> Result<Vec<PlanNode>, PlanError> {
    let mut ctx = ParseContext {
        next_id: 0,
        nodes: Vec::new(),
        analyzed,
        has_buffers,
    };

    extract_plan_nodes(PlanObject(root), Inherited::default(), &mut ctx)?;

    Ok(ctx.nodes)
}

fn extract_plan_nodes(
    plan: PlanObject<'_>,
    inherited: Inherited,
    ctx: &mut ParseContext,
) -> Result<(), PlanError> {
    let node_type = plan.required_str("Node Type")?.to_string();
    let plan_rows = plan.required_count("Plan Rows")?;
    let plan_width = plan.required_count("Plan Width")?;
    let parallel_aware = plan.required_bool("Parallel Aware")?;
    let startup_cost = plan.required_f64("Startup Cost")?;
    let total_cost = plan.required_f64("Total Cost")?;
    let relation_name = plan.string("Relation Name");

    ctx.next_id += 1;
    let id = ctx.next_id;

    let is_gather = node_type.contains("Gather");
    let planned_workers = if is_gather {
        plan.count("Workers Planned") + 1
    } else {
        0
    };

    let position = Position {
        id,
        level: inherited.parent.level + 1,
        parent: inherited.parent.id,
        display: true,
        below_gather: inherited.below_gather,
    };

    let anchor = inherited.join_anchor;
    let (join_view_position, join_anchor) =
        if is_join_type(&node_type) || !relation_name.is_empty() || is_gather {
            let fresh = Position {
                id,
                level: anchor.level + 1,
                parent: anchor.id,
                display: true,
                below_gather: inherited.below_gather,
            };
            (fresh, fresh)
        } else {
            // Collapses into the nearest significant ancestor.
            let hidden = Position {
                id,
                display: false,
                ..anchor
            };
            (hidden, anchor)
        };

    let analyzed = if ctx.analyzed {
        Some(read_analyzed(plan, is_gather, ctx.has_buffers)?)
    } else {
        None
    };

    let node = PlanNode {
        partial_mode: plan.string("Partial Mode"),
        parallel_aware,
        position,
        join_view_position,
        plan_rows,
        plan_width,
        startup_cost,
        total_cost,
        analyzed,
        relation_name,
        index_name: plan.string("Index Name"),
        index_cond: plan.string("Index Cond"),
        filter: plan.string("Filter"),
        hash_cond: plan.string("Hash Cond"),
        group_key: plan.strings("Group Key"),
        sort_keys: plan.strings("Sort Key"),
        presort_keys: plan.strings("Presorted Key"),
        strategy: plan.string("Strategy"),
        command: plan.string("Command"),
        cte_name: plan.string("CTE Name"),
        function_name: plan.string("Function Name"),
        table_function_name: plan.string("Table Function Name"),
        tid_cond: plan.string("TID Cond"),
        operation: plan.string("Operation"),
        join_type: plan.string("Join Type"),
        subplan_name: plan.string("Subplan Name"),
        is_gather,
        planned_workers,
        parent_relationship: plan.string("Parent Relationship"),
        parent_is_nested_loop: inherited.parent_is_nested_loop,
        node_type,
    };

    let for_children = Inherited {
        parent: position,
        join_anchor,
        below_gather: is_gather || inherited.below_gather,
        parent_is_nested_loop: node.node_type == "Nested Loop",
    };

    ctx.nodes.push(node);

    for child in plan.children()? {
        extract_plan_nodes(child, for_children, ctx)?;
    }

    Ok(())
}

fn read_analyzed(
    plan: PlanObject<'_>,
    is_gather: bool,
    has_buffers: bool,
) -> Result<Analyzed, PlanError> {
    let launched_workers = if is_gather {
        plan.count("Workers Launched") + 1
    } else {
        0
    };

    let mut analyzed = Analyzed {
        actual_rows: plan.required_count("Actual Rows")?,
        actual_loops: plan.required_count("Actual Loops")?,
        startup_time: plan.required_f64("Actual Startup Time")?,
        total_time: plan.required_f64("Actual Total Time")?,
        launched_workers,
        ..Default::default()
    };

    if has_buffers {
        analyzed.shared_buffers_hit = plan.count("Shared Hit Blocks");
        analyzed.shared_buffers_read = plan.count("Shared Read Blocks");
        analyzed.temp_read_blocks = plan.count("Temp Read Blocks");
        analyzed.temp_write_blocks = plan.count("Temp Written Blocks");
    }

    Ok(analyzed)
}

#[cfg(test)]
mod tests {
    use crate::explain::{ExplainPlan, PlanError, PlanNode};

    const ANALYZE_BUFFERS: &str = include_str!("../testdata/analyze_buffers.json");
    const ANALYZE_NO_BUFFERS: &str = include_str!("../testdata/analyze_no_buffers.json");
    const PLAN_ONLY: &str = include_str!("../testdata/plan_only.json");

    fn nodes(json: &str) -> Vec<PlanNode> {
        ExplainPlan::parse(json).unwrap().nodes
    }

    fn by_id(nodes: &[PlanNode], id: u32) -> &PlanNode {
        nodes.iter().find(|n| n.position.id == id).unwrap()
    }

    #[test]
    fn minimal_plan_only_document() {
        let plan = ExplainPlan::parse(
            r#"[{"Plan":{"Node Type":"Seq Scan","Plan Rows":100,"Plan Width":4,"Parallel Aware":false,"Startup Cost":0.0,"Total Cost":10.0}}]"#,
        )
        .unwrap();

        assert!(!plan.analyzed);
        assert_eq!(plan.nodes.len(), 1);

        let node = &plan.nodes[0];
        assert_eq!(node.position.id, 1);
        assert_eq!(node.position.level, 1);
        assert_eq!(node.position.parent, 0);
        assert!(node.position.display);
        assert_eq!(node.plan_rows, 100);
        assert_eq!(node.plan_width, 4);
        assert_eq!(node.total_cost, 10.0);
        assert!(node.analyzed.is_none());
    }

    #[test]
    fn ids_are_dense_and_pre_ordered() {
        for json in [ANALYZE_BUFFERS, ANALYZE_NO_BUFFERS, PLAN_ONLY] {
            let nodes = nodes(json);
            let ids: Vec<u32> = nodes.iter().map(|n| n.position.id).collect();
            let expected: Vec<u32> = (1..=nodes.len() as u32).collect();
            assert_eq!(ids, expected);

            for node in &nodes {
                assert_eq!(node.position.id, node.join_view_position.id);
            }
        }
    }

    #[test]
    fn pre_order_of_discovery() {
        let nodes = nodes(ANALYZE_BUFFERS);
        let types: Vec<&str> = nodes.iter().map(|n| n.node_type.as_str()).collect();
        assert_eq!(
            types,
            vec![
                "Aggregate",
                "Gather Merge",
                "Aggregate",
                "Sort",
                "Hash Join",
                "Nested Loop",
                "Seq Scan",
                "Index Scan",
                "Hash",
                "Seq Scan",
            ]
        );
    }

    #[test]
    fn full_tree_positions() {
        let nodes = nodes(ANALYZE_BUFFERS);
        let shape: Vec<(u32, u32, u32)> = nodes
            .iter()
            .map(|n| (n.position.id, n.position.level, n.position.parent))
            .collect();
        assert_eq!(
            shape,
            vec![
                (1, 1, 0),
                (2, 2, 1),
                (3, 3, 2),
                (4, 4, 3),
                (5, 5, 4),
                (6, 6, 5),
                (7, 7, 6),
                (8, 7, 6),
                (9, 6, 5),
                (10, 7, 9),
            ]
        );
        assert!(nodes.iter().all(|n| n.position.display));
    }

    #[test]
    fn below_gather_covers_descendants_only() {
        let nodes = nodes(ANALYZE_BUFFERS);
        assert!(!by_id(&nodes, 1).position.below_gather);
        assert!(!by_id(&nodes, 2).position.below_gather);
        for id in 3..=10 {
            assert!(by_id(&nodes, id).position.below_gather, "node {id}");
        }
    }

    #[test]
    fn join_view_positions() {
        let nodes = nodes(ANALYZE_BUFFERS);
        let shape: Vec<(u32, u32, u32, bool)> = nodes
            .iter()
            .map(|n| {
                let p = n.join_view_position;
                (p.id, p.level, p.parent, p.display)
            })
            .collect();
        assert_eq!(
            shape,
            vec![
                (1, 0, 0, false),
                (2, 1, 0, true),
                (3, 1, 0, false),
                (4, 1, 0, false),
                (5, 2, 2, true),
                (6, 3, 5, true),
                (7, 4, 6, true),
                (8, 4, 6, true),
                (9, 2, 2, false),
                (10, 3, 5, true),
            ]
        );
    }

    #[test]
    fn collapsed_nodes_inherit_parent_join_position() {
        let nodes = nodes(ANALYZE_BUFFERS);
        for node in &nodes {
            if node.join_view_position.display || node.position.parent == 0 {
                continue;
            }
            let parent = by_id(&nodes, node.position.parent);
            assert_eq!(
                node.join_view_position.level,
                parent.join_view_position.level
            );
            assert_eq!(
                node.join_view_position.parent,
                parent.join_view_position.parent
            );
        }
    }

    #[test]
    fn gather_worker_arithmetic() {
        let nodes = nodes(ANALYZE_BUFFERS);
        let gather = by_id(&nodes, 2);
        assert!(gather.is_gather);
        assert_eq!(gather.planned_workers, 3);
        assert_eq!(gather.analyzed.as_ref().unwrap().launched_workers, 3);

        for node in nodes.iter().filter(|n| !n.is_gather) {
            assert_eq!(node.planned_workers, 0);
            assert_eq!(node.analyzed.as_ref().unwrap().launched_workers, 0);
        }

        let nodes = self::nodes(ANALYZE_NO_BUFFERS);
        let gather = by_id(&nodes, 2);
        assert_eq!(gather.node_type, "Gather");
        assert_eq!(gather.planned_workers, 3);
        assert_eq!(gather.analyzed.as_ref().unwrap().launched_workers, 2);
    }

    #[test]
    fn gather_merge_scenario() {
        let nodes = nodes(
            r#"[{"Plan":{"Node Type":"Gather Merge","Plan Rows":2,"Plan Width":8,"Parallel Aware":false,
                "Startup Cost":1.0,"Total Cost":2.0,"Workers Planned":2,"Workers Launched":2,
                "Actual Rows":2,"Actual Loops":1,"Actual Startup Time":0.1,"Actual Total Time":0.2},
                "Execution Time": 0.3}]"#,
        );
        assert_eq!(nodes[0].planned_workers, 3);
        assert_eq!(nodes[0].analyzed.as_ref().unwrap().launched_workers, 3);
    }

    #[test]
    fn nested_loop_children_marked() {
        let nodes = nodes(ANALYZE_BUFFERS);

        let outer = by_id(&nodes, 7);
        assert!(outer.parent_is_nested_loop);
        assert_eq!(outer.parent_relationship, "Outer");

        let inner = by_id(&nodes, 8);
        assert!(inner.parent_is_nested_loop);
        assert_eq!(inner.parent_relationship, "Inner");

        // Grandchildren of a nested loop are not marked.
        assert!(!by_id(&nodes, 10).parent_is_nested_loop);
        assert!(!by_id(&nodes, 6).parent_is_nested_loop);
    }

    #[test]
    fn buffers_read_when_instrumented() {
        let nodes = nodes(ANALYZE_BUFFERS);
        let root = nodes[0].analyzed.as_ref().unwrap();
        assert_eq!(root.shared_buffers_hit, 4425);
        assert_eq!(root.shared_buffers_read, 1203);
        assert_eq!(root.temp_read_blocks, 96);
        assert_eq!(root.temp_write_blocks, 96);
    }

    #[test]
    fn buffers_gated_on_root_probe() {
        let nodes = nodes(ANALYZE_NO_BUFFERS);
        assert_eq!(nodes.len(), 4);
        for node in &nodes {
            let analyzed = node.analyzed.as_ref().unwrap();
            assert_eq!(analyzed.shared_buffers_hit, 0);
            assert_eq!(analyzed.shared_buffers_read, 0);
            assert_eq!(analyzed.temp_read_blocks, 0);
            assert_eq!(analyzed.temp_write_blocks, 0);
        }
        assert_eq!(nodes[3].analyzed.as_ref().unwrap().actual_rows, 500000);
    }

    #[test]
    fn operator_fields() {
        let nodes = nodes(ANALYZE_BUFFERS);

        let root = by_id(&nodes, 1);
        assert_eq!(root.partial_mode, "Finalize");
        assert_eq!(root.strategy, "Plain");

        let partial = by_id(&nodes, 3);
        assert_eq!(partial.group_key, vec!["o.customer_id"]);

        let sort = by_id(&nodes, 4);
        assert_eq!(sort.sort_keys, vec!["o.customer_id"]);
        assert!(sort.presort_keys.is_empty());

        let hash_join = by_id(&nodes, 5);
        assert_eq!(hash_join.hash_cond, "(c.region_id = r.id)");
        assert_eq!(hash_join.join_type, "Inner");

        let scan = by_id(&nodes, 7);
        assert!(scan.parallel_aware);
        assert_eq!(scan.relation_name, "orders");
        assert_eq!(scan.filter, "(o.total > '10'::numeric)");
        assert_eq!(scan.command, "");

        let index = by_id(&nodes, 8);
        assert_eq!(index.index_name, "customers_pkey");
        assert_eq!(index.index_cond, "(id = o.customer_id)");
        assert_eq!(index.analyzed.as_ref().unwrap().actual_loops, 100000);
    }

    #[test]
    fn parsing_is_idempotent() {
        assert_eq!(nodes(ANALYZE_BUFFERS), nodes(ANALYZE_BUFFERS));
        assert_eq!(nodes(PLAN_ONLY), nodes(PLAN_ONLY));
    }

    #[test]
    fn null_children_are_skipped() {
        let nodes = nodes(
            r#"[{"Plan":{"Node Type":"Append","Plan Rows":1,"Plan Width":4,"Parallel Aware":false,
                "Startup Cost":0.0,"Total Cost":1.0,"Plans":[null,
                {"Node Type":"Result","Plan Rows":1,"Plan Width":4,"Parallel Aware":false,
                 "Startup Cost":0.0,"Total Cost":0.01}]}}]"#,
        );
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].position.parent, 1);
    }

    #[test]
    fn missing_required_field_is_fatal() {
        let err = ExplainPlan::parse(
            r#"[{"Plan":{"Node Type":"Sort","Plan Rows":1,"Plan Width":4,"Parallel Aware":false,
                "Startup Cost":0.0,"Total Cost":1.0,"Plans":[
                {"Node Type":"Seq Scan","Plan Width":4,"Parallel Aware":false,
                 "Startup Cost":0.0,"Total Cost":1.0}]}}]"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PlanError::MissingField { field: "Plan Rows" }
        ));
    }

    #[test]
    fn missing_actuals_are_fatal_when_analyzed() {
        let err = ExplainPlan::parse(
            r#"[{"Plan":{"Node Type":"Result","Plan Rows":1,"Plan Width":4,"Parallel Aware":false,
                "Startup Cost":0.0,"Total Cost":0.01},"Execution Time":0.05}]"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PlanError::MissingField {
                field: "Actual Rows"
            }
        ));
    }

    #[test]
    fn non_object_child_is_fatal() {
        let err = ExplainPlan::parse(
            r#"[{"Plan":{"Node Type":"Append","Plan Rows":1,"Plan Width":4,"Parallel Aware":false,
                "Startup Cost":0.0,"Total Cost":1.0,"Plans":[3]}}]"#,
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::WrongType { field: "Plans", .. }));
    }

    #[test]
    fn plan_only_join_view() {
        let nodes = nodes(PLAN_ONLY);
        let visible: Vec<u32> = nodes
            .iter()
            .filter(|n| n.join_view_position.display)
            .map(|n| n.position.id)
            .collect();
        assert_eq!(visible, vec![2, 3, 5]);

        let customers = by_id(&nodes, 5);
        assert_eq!(customers.join_view_position.parent, 2);
        assert_eq!(customers.join_view_position.level, 2);
    }
}
