//! View state behind the terminal screen. Knows nothing about drawing; the
//! renderer reads it and the interactive loop mutates it.

use std::fmt;

use crate::explain::{ExplainPlan, PlanNode};
use crate::projection::{project, ViewMode};
use crate::session::QueryRun;
use crate::settings::Setting;

/// Which statistic columns are shown next to each node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatDisplay {
    #[default]
    Nothing,
    Rows,
    Time,
    Buffers,
    Cost,
}

impl StatDisplay {
    const ORDER: [StatDisplay; 5] = [
        StatDisplay::Nothing,
        StatDisplay::Rows,
        StatDisplay::Time,
        StatDisplay::Buffers,
        StatDisplay::Cost,
    ];

    fn index(self) -> usize {
        Self::ORDER
            .iter()
            .position(|s| *s == self)
            .unwrap_or_default()
    }

    /// Whether the stat has anything to show for a plan-only document.
    pub fn available_without_analyze(self) -> bool {
        matches!(
            self,
            StatDisplay::Nothing | StatDisplay::Rows | StatDisplay::Cost
        )
    }

    pub fn next(self, analyzed: bool) -> Self {
        self.cycle(1, analyzed)
    }

    pub fn prev(self, analyzed: bool) -> Self {
        self.cycle(Self::ORDER.len() - 1, analyzed)
    }

    fn cycle(self, step: usize, analyzed: bool) -> Self {
        let mut i = self.index();
        loop {
            i = (i + step) % Self::ORDER.len();
            let candidate = Self::ORDER[i];
            if analyzed || candidate.available_without_analyze() {
                return candidate;
            }
        }
    }
}

impl fmt::Display for StatDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatDisplay::Nothing => "",
            StatDisplay::Rows => "ROWS",
            StatDisplay::Time => "TIME",
            StatDisplay::Buffers => "BUFFERS",
            StatDisplay::Cost => "COST",
        };
        f.write_str(name)
    }
}

/// Where the displayed plan came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Stdin,
    File(String),
    Run,
}

#[derive(Debug, Clone)]
pub struct Viewer {
    pub source: Source,
    plan: ExplainPlan,
    run: QueryRun,
    pub view_mode: ViewMode,
    cursor: usize,
    pub indent: bool,
    pub stat_display: StatDisplay,
    pub display_parallel: bool,
    pub display_sql: bool,
    pub display_settings: bool,
    pub display_next_settings: bool,
    pub show_help: bool,
    settings_cursor: usize,
    next_settings: Vec<Setting>,
    pub loading: bool,
    pub last_error: Option<String>,
}

impl Viewer {
    pub fn new(source: Source) -> Self {
        Viewer {
            source,
            plan: ExplainPlan::default(),
            run: QueryRun::default(),
            view_mode: ViewMode::Full,
            cursor: 0,
            indent: true,
            stat_display: StatDisplay::Nothing,
            display_parallel: false,
            display_sql: false,
            display_settings: true,
            display_next_settings: false,
            show_help: false,
            settings_cursor: 0,
            next_settings: Vec::new(),
            loading: false,
            last_error: None,
        }
    }

    pub fn plan(&self) -> &ExplainPlan {
        &self.plan
    }

    pub fn run(&self) -> &QueryRun {
        &self.run
    }

    /// Replaces plan and run together and resets the selection. Stats that
    /// the new plan cannot show fall back to `Nothing`.
    pub fn load(&mut self, plan: ExplainPlan, run: QueryRun) {
        self.plan = plan;
        self.run = run;
        self.cursor = 0;
        self.last_error = None;
        if !self.plan.analyzed && !self.stat_display.available_without_analyze() {
            self.stat_display = StatDisplay::Nothing;
        }
    }

    /// Keeps the current plan; the error is shown until the next load.
    pub fn record_error(&mut self, error: impl fmt::Display) {
        self.last_error = Some(error.to_string());
    }

    pub fn visible(&self) -> Vec<&PlanNode> {
        project(&self.plan.nodes, self.view_mode)
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn selected(&self) -> Option<&PlanNode> {
        self.visible().get(self.cursor).copied()
    }

    pub fn move_up(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn move_down(&mut self) {
        if self.cursor + 1 < self.visible().len() {
            self.cursor += 1;
        }
    }

    pub fn toggle_join_view(&mut self) {
        self.view_mode = self.view_mode.toggled();
        self.cursor = 0;
    }

    /// Shows `stat`, or hides stats if it is already shown. Stats a
    /// plan-only document cannot show are ignored.
    pub fn toggle_stat(&mut self, stat: StatDisplay) {
        if !self.plan.analyzed && !stat.available_without_analyze() {
            return;
        }
        self.stat_display = if self.stat_display == stat {
            StatDisplay::Nothing
        } else {
            stat
        };
    }

    pub fn next_stat(&mut self) {
        self.stat_display = self.stat_display.next(self.plan.analyzed);
    }

    pub fn prev_stat(&mut self) {
        self.stat_display = self.stat_display.prev(self.plan.analyzed);
    }

    pub fn next_settings(&self) -> &[Setting] {
        &self.next_settings
    }

    pub fn set_next_settings(&mut self, settings: Vec<Setting>) {
        self.next_settings = settings;
        self.settings_cursor = self
            .settings_cursor
            .min(self.next_settings.len().saturating_sub(1));
    }

    /// The settings list currently on screen.
    pub fn shown_settings(&self) -> &[Setting] {
        if self.display_next_settings {
            &self.next_settings
        } else {
            &self.run.settings
        }
    }

    pub fn settings_cursor(&self) -> usize {
        self.settings_cursor
    }

    pub fn settings_up(&mut self) {
        self.settings_cursor = self.settings_cursor.saturating_sub(1);
    }

    pub fn settings_down(&mut self) {
        if self.settings_cursor + 1 < self.shown_settings().len() {
            self.settings_cursor += 1;
        }
    }

    /// Raises the selected next-run setting one step. Only the NEXT list is
    /// editable; recorded run settings are history.
    pub fn increment_setting(&mut self) {
        if self.display_next_settings {
            if let Some(setting) = self.next_settings.get_mut(self.settings_cursor) {
                setting.increment();
            }
        }
    }

    pub fn decrement_setting(&mut self) {
        if self.display_next_settings {
            if let Some(setting) = self.next_settings.get_mut(self.settings_cursor) {
                setting.decrement();
            }
        }
    }

    pub fn toggle_settings_type(&mut self) {
        self.display_next_settings = !self.display_next_settings;
        self.settings_cursor = 0;
    }
}
