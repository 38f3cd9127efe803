use std::fmt::Write;

use crate::command::BINDINGS;
use crate::explain::{ExplainPlan, PlanNode};
use crate::format::{underscores, underscores_float};
use crate::sql::referenced_relations;
use crate::viewer::{Source, StatDisplay, Viewer};

const STAT_COLUMN_WIDTH: usize = 12;
const MIN_STATUS_WIDTH: usize = 30;

/// Everything a renderer may read for one screen. Renderers never mutate the
/// plan or the viewer.
pub struct RenderContext<'a> {
    pub nodes: Vec<&'a PlanNode>,
    pub plan: &'a ExplainPlan,
    pub viewer: &'a Viewer,
    pub width: usize,
}

impl<'a> RenderContext<'a> {
    pub fn new(viewer: &'a Viewer, width: usize) -> Self {
        RenderContext {
            nodes: viewer.visible(),
            plan: viewer.plan(),
            viewer,
            width,
        }
    }
}

pub trait Renderable {
    fn render(&self, ctx: &RenderContext<'_>) -> String;
}

/// Plain text, one screen per call.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextRenderer;

impl Renderable for TextRenderer {
    fn render(&self, ctx: &RenderContext<'_>) -> String {
        let mut lines = Vec::new();

        lines.push(header(ctx));

        let status = status_line(ctx.plan, ctx.width);
        let headers = stat_headers(ctx.viewer.stat_display);
        lines.push(pad_between(&status, &headers, ctx.width));

        for (i, node) in ctx.nodes.iter().enumerate() {
            lines.push(node_line(node, i == ctx.viewer.cursor(), ctx));
        }
        lines.push(String::new());

        if ctx.viewer.display_settings {
            lines.extend(settings_panel(ctx.viewer, ctx.width));
            lines.push(String::new());
        }

        if ctx.viewer.show_help {
            lines.extend(help_panel());
        } else if ctx.viewer.display_sql {
            lines.extend(sql_panel(ctx.viewer));
        } else {
            lines.extend(details_panel(ctx));
        }

        if let Some(error) = &ctx.viewer.last_error {
            lines.push(String::new());
            lines.push(format!("Error: {error}"));
        }

        lines.join("\n")
    }
}

fn source_label(viewer: &Viewer) -> String {
    match &viewer.source {
        Source::Stdin => "STDIN".to_string(),
        Source::File(name) => format!("FILE - {name}"),
        Source::Run => match &viewer.run().pointer {
            Some(pointer) => format!("RUN - {pointer}"),
            None => "RUN".to_string(),
        },
    }
}

fn header(ctx: &RenderContext<'_>) -> String {
    let marker = if ctx.viewer.loading { "* " } else { "  " };
    let left = format!("{marker}{}", source_label(ctx.viewer));
    let right = format!(
        "{} {}",
        ctx.viewer.view_mode.label(),
        ctx.viewer.stat_display
    );
    pad_between(&left, right.trim_end(), ctx.width)
}

/// Left text, then `right` pushed to the right edge when there is room.
fn pad_between(left: &str, right: &str, width: usize) -> String {
    if right.is_empty() {
        return left.to_string();
    }
    let used = left.chars().count() + right.chars().count();
    let gap = width.saturating_sub(used).max(1);
    format!("{left}{}{right}", " ".repeat(gap))
}

pub fn status_line(plan: &ExplainPlan, width: usize) -> String {
    if width < MIN_STATUS_WIDTH {
        return String::new();
    }

    let time = if plan.analyzed {
        format!("{:.3}ms", plan.execution_time)
    } else {
        "-".to_string()
    };
    let buffers = plan
        .total_buffers()
        .map(underscores)
        .unwrap_or_else(|| "-".to_string());
    let rows = plan
        .total_rows()
        .map(underscores)
        .unwrap_or_else(|| "-".to_string());

    format!("  Time: {time} | Buffers: {buffers} | Rows: {rows}")
}

fn stat_headers(stat: StatDisplay) -> String {
    let names: &[&str] = match stat {
        StatDisplay::Nothing => &[],
        StatDisplay::Rows => &["Planned", "Actual", "Estimate"],
        StatDisplay::Time => &["Startup", "Total"],
        StatDisplay::Buffers => &["Total", "Read"],
        StatDisplay::Cost => &["Startup", "Total"],
    };
    columns(names.iter().map(|s| s.to_string()))
}

fn columns(values: impl Iterator<Item = String>) -> String {
    values.fold(String::new(), |mut out, value| {
        let _ = write!(out, "{value:>STAT_COLUMN_WIDTH$}");
        out
    })
}

/// `plan_rows / actual_rows` as a percentage; `None` when nothing actually
/// came back to compare with.
pub fn estimate_percent(node: &PlanNode) -> Option<f64> {
    match node.actual_rows() {
        Some(actual) if actual != 0 => Some(node.plan_rows as f64 / actual as f64 * 100.0),
        _ => None,
    }
}

fn stat_values(node: &PlanNode, stat: StatDisplay) -> Vec<String> {
    let dash = || "-".to_string();
    let analyzed = node.analyzed.as_ref();

    match stat {
        StatDisplay::Nothing => Vec::new(),
        StatDisplay::Rows => vec![
            underscores(node.plan_rows),
            analyzed.map(|a| underscores(a.actual_rows)).unwrap_or_else(dash),
            estimate_percent(node)
                .map(|p| format!("{p:.0}%"))
                .unwrap_or_else(dash),
        ],
        StatDisplay::Time => vec![
            analyzed
                .map(|a| format!("{:.3}", a.startup_time))
                .unwrap_or_else(dash),
            analyzed
                .map(|a| format!("{:.3}", a.total_time))
                .unwrap_or_else(dash),
        ],
        StatDisplay::Buffers => vec![
            analyzed
                .map(|a| underscores(a.total_buffers()))
                .unwrap_or_else(dash),
            analyzed
                .map(|a| underscores(a.shared_buffers_read))
                .unwrap_or_else(dash),
        ],
        StatDisplay::Cost => vec![
            underscores_float(node.startup_cost),
            underscores_float(node.total_cost),
        ],
    }
}

pub fn node_label(node: &PlanNode, display_parallel: bool) -> String {
    let mut label = node.title();

    if !node.index_name.is_empty() {
        let _ = write!(label, " using {}", node.index_name);
    }
    if !node.relation_name.is_empty() {
        let _ = write!(label, " on {}", node.relation_name);
    } else if !node.cte_name.is_empty() {
        let _ = write!(label, " on {}", node.cte_name);
    } else if !node.function_name.is_empty() {
        let _ = write!(label, " on {}", node.function_name);
    }
    if !node.subplan_name.is_empty() {
        let _ = write!(label, " ({})", node.subplan_name);
    }
    if node.parent_is_nested_loop && node.parent_relationship == "Inner" {
        label.push_str(" (inner)");
    }

    if display_parallel {
        if node.is_gather {
            let launched = node
                .analyzed
                .as_ref()
                .map(|a| a.launched_workers.to_string())
                .unwrap_or_else(|| "-".to_string());
            let _ = write!(label, " [workers {}/{}]", launched, node.planned_workers);
        } else if node.parallel_aware {
            label.push_str(" [parallel]");
        } else if node.position.below_gather {
            label.push_str(" [worker]");
        }
    }

    label
}

fn node_line(node: &PlanNode, selected: bool, ctx: &RenderContext<'_>) -> String {
    let viewer = ctx.viewer;
    let gutter = if selected { "> " } else { "  " };

    let level = viewer.view_mode.level(node).saturating_sub(1) as usize;
    let indent = if viewer.indent && level > 0 {
        format!("{}-> ", "   ".repeat(level - 1))
    } else {
        String::new()
    };

    let left = format!(
        "{gutter}{indent}{}",
        node_label(node, viewer.display_parallel)
    );
    let stats = columns(stat_values(node, viewer.stat_display).into_iter());
    pad_between(&left, &stats, ctx.width)
}

fn settings_panel(viewer: &Viewer, width: usize) -> Vec<String> {
    let indicator = if viewer.display_next_settings {
        "PGEX | [NEXT]"
    } else {
        "[PGEX] | NEXT"
    };

    let mut lines = vec![
        pad_between("Settings", indicator, width),
        "-".repeat(width),
    ];

    for (i, setting) in viewer.shown_settings().iter().enumerate() {
        let gutter = if i == viewer.settings_cursor() { "> " } else { "  " };
        lines.push(format!("{gutter}{setting}"));
    }
    lines
}

fn sql_panel(viewer: &Viewer) -> Vec<String> {
    let query = &viewer.run().query;
    let relations = referenced_relations(query);

    let mut lines = vec!["SQL".to_string()];
    if !relations.is_empty() {
        lines.push(format!("Relations: {}", relations.join(", ")));
    }
    lines.push(String::new());
    lines.extend(query.lines().map(str::to_string));
    lines
}

/// Every populated field of `node`, label first.
pub fn node_details(node: &PlanNode) -> Vec<(&'static str, String)> {
    let mut details = vec![("Node Type", node.node_type.clone())];

    let strings = [
        ("Partial Mode", &node.partial_mode),
        ("Relation", &node.relation_name),
        ("Index", &node.index_name),
        ("Index Cond", &node.index_cond),
        ("Filter", &node.filter),
        ("Hash Cond", &node.hash_cond),
        ("TID Cond", &node.tid_cond),
        ("Join Type", &node.join_type),
        ("Strategy", &node.strategy),
        ("Command", &node.command),
        ("Operation", &node.operation),
        ("CTE", &node.cte_name),
        ("Function", &node.function_name),
        ("Table Function", &node.table_function_name),
        ("Subplan", &node.subplan_name),
        ("Parent Relationship", &node.parent_relationship),
    ];
    for (label, value) in strings {
        if !value.is_empty() {
            details.push((label, value.clone()));
        }
    }

    let lists = [
        ("Group Key", &node.group_key),
        ("Sort Key", &node.sort_keys),
        ("Presorted Key", &node.presort_keys),
    ];
    for (label, values) in lists {
        if !values.is_empty() {
            details.push((label, values.join(", ")));
        }
    }

    details.push(("Plan Rows", underscores(node.plan_rows)));
    details.push(("Plan Width", underscores(node.plan_width)));
    details.push((
        "Cost",
        format!(
            "{}..{}",
            underscores_float(node.startup_cost),
            underscores_float(node.total_cost)
        ),
    ));

    if node.is_gather {
        details.push(("Workers Planned", node.planned_workers.to_string()));
    }

    if let Some(a) = &node.analyzed {
        details.push(("Actual Rows", underscores(a.actual_rows)));
        details.push(("Actual Loops", underscores(a.actual_loops)));
        details.push((
            "Actual Time",
            format!("{:.3}..{:.3}", a.startup_time, a.total_time),
        ));
        if node.is_gather {
            details.push(("Workers Launched", a.launched_workers.to_string()));
        }
        if a.total_buffers() > 0 || a.temp_read_blocks > 0 || a.temp_write_blocks > 0 {
            details.push((
                "Shared Buffers",
                format!(
                    "hit={} read={}",
                    underscores(a.shared_buffers_hit),
                    underscores(a.shared_buffers_read)
                ),
            ));
            details.push((
                "Temp Blocks",
                format!(
                    "read={} written={}",
                    underscores(a.temp_read_blocks),
                    underscores(a.temp_write_blocks)
                ),
            ));
        }
    }

    details
}

fn details_panel(ctx: &RenderContext<'_>) -> Vec<String> {
    let mut lines = vec!["Details".to_string()];
    if let Some(node) = ctx.viewer.selected() {
        let label_width = 20;
        lines.extend(
            node_details(node)
                .into_iter()
                .map(|(label, value)| format!("  {label:<label_width$}{value}")),
        );
    }
    lines
}

fn help_panel() -> Vec<String> {
    let mut lines = vec!["Commands".to_string()];
    lines.extend(
        BINDINGS
            .iter()
            .map(|(key, description, _)| format!("  {key}  {description}")),
    );
    lines
}
