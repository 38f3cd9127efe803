//! The interactive loop. Input lines come from a line editor on its own
//! thread, execution results from background tasks; both feed one `select!`.

use std::sync::Arc;
use std::thread;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::error::Error;
use crate::executor::PlanExecutor;
use crate::explain::ExplainPlan;
use crate::render::{RenderContext, Renderable, TextRenderer};
use crate::session::{QueryRun, SessionStore};
use crate::sql::{with_explain, with_explain_analyze};
use crate::viewer::{Source, Viewer};

const PROMPT: &str = "pgex> ";
const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

/// What a background execution sends back, tagged with the generation of
/// the execution that produced it.
#[derive(Debug)]
pub enum Outcome {
    Finished {
        generation: u64,
        plan: ExplainPlan,
        run: QueryRun,
        analyze: bool,
    },
    Failed {
        generation: u64,
        error: Error,
    },
}

impl Outcome {
    fn generation(&self) -> u64 {
        match self {
            Outcome::Finished { generation, .. } | Outcome::Failed { generation, .. } => {
                *generation
            }
        }
    }
}

pub struct App<E, S> {
    viewer: Viewer,
    executor: Option<Arc<E>>,
    store: S,
    renderer: TextRenderer,
    width: usize,
    in_flight: Option<JoinHandle<()>>,
    /// Bumped on every start and cancel; only outcomes of the current
    /// generation are applied.
    generation: u64,
    outcomes_tx: mpsc::UnboundedSender<Outcome>,
    outcomes_rx: mpsc::UnboundedReceiver<Outcome>,
}

impl<E: PlanExecutor, S: SessionStore> App<E, S> {
    /// `executor` is `None` when nothing can be re-executed, e.g. for a plan
    /// read from stdin or when no connection is configured.
    pub fn new(viewer: Viewer, executor: Option<E>, store: S, width: usize) -> Self {
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        App {
            viewer,
            executor: executor.map(Arc::new),
            store,
            renderer: TextRenderer,
            width,
            in_flight: None,
            generation: 0,
            outcomes_tx,
            outcomes_rx,
        }
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    pub fn screen(&self) -> String {
        self.renderer
            .render(&RenderContext::new(&self.viewer, self.width))
    }

    /// Applies one command; returns `false` once the loop should stop.
    pub fn apply(&mut self, command: Command) -> bool {
        debug!(?command, "applying command");
        let viewer = &mut self.viewer;

        match command {
            Command::Up => viewer.move_up(),
            Command::Down => viewer.move_down(),
            Command::JoinView => viewer.toggle_join_view(),
            Command::IndentToggle => viewer.indent = !viewer.indent,
            Command::ToggleStat(stat) => viewer.toggle_stat(stat),
            Command::NextStat => viewer.next_stat(),
            Command::PrevStat => viewer.prev_stat(),
            Command::ToggleParallel => viewer.display_parallel = !viewer.display_parallel,
            Command::ToggleSql => viewer.display_sql = !viewer.display_sql,
            Command::ToggleSettings => viewer.display_settings = !viewer.display_settings,
            Command::ToggleSettingsType => viewer.toggle_settings_type(),
            Command::SettingsUp => viewer.settings_up(),
            Command::SettingsDown => viewer.settings_down(),
            Command::SettingIncrement => viewer.increment_setting(),
            Command::SettingDecrement => viewer.decrement_setting(),
            Command::Help => viewer.show_help = !viewer.show_help,
            Command::ReExecute => self.execute(false),
            Command::Cancel => self.cancel(),
            Command::PrevRun => self.step_run(false),
            Command::NextRun => self.step_run(true),
            Command::Quit => return false,
        }
        true
    }

    /// Starts a background `EXPLAIN` (or `EXPLAIN ANALYZE`) of the current
    /// query with the next-run settings.
    pub fn execute(&mut self, analyze: bool) {
        if self.in_flight.is_some() {
            self.viewer
                .record_error("a query is already running, cancel it with 'c' first");
            return;
        }
        let Some(executor) = &self.executor else {
            self.viewer.record_error(match self.viewer.source {
                Source::Stdin => "plan was read from stdin, there is no query to execute",
                _ => "no database connection configured",
            });
            return;
        };
        if self.viewer.run().query.is_empty() {
            self.viewer.record_error("run has no query to execute");
            return;
        }

        let mut run = QueryRun::new(
            self.viewer.run().query.clone(),
            self.viewer.run().original_filename.clone(),
        );
        run.settings = self.viewer.next_settings().to_vec();

        let executor = Arc::clone(executor);
        let tx = self.outcomes_tx.clone();

        self.generation += 1;
        let generation = self.generation;

        info!(analyze, generation, "starting execution");
        self.viewer.loading = true;
        self.in_flight = Some(tokio::spawn(async move {
            let sql = if analyze {
                with_explain_analyze(&run.query)
            } else {
                with_explain(&run.query)
            };

            let outcome = match executor.execute(&sql, &run.settings).await {
                Ok(result) => match ExplainPlan::parse(&result) {
                    Ok(plan) => {
                        run.result = result;
                        Outcome::Finished {
                            generation,
                            plan,
                            run,
                            analyze,
                        }
                    }
                    Err(e) => Outcome::Failed {
                        generation,
                        error: e.into(),
                    },
                },
                Err(error) => Outcome::Failed { generation, error },
            };

            if tx.send(outcome).is_err() {
                debug!("execution finished after the loop stopped");
            }
        }));
    }

    fn cancel(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
            self.generation += 1;
            self.viewer.loading = false;
            self.viewer.record_error("query cancelled");
            info!("execution cancelled");
        }
    }

    pub fn handle_outcome(&mut self, outcome: Outcome) {
        if outcome.generation() != self.generation {
            debug!(
                generation = outcome.generation(),
                current = self.generation,
                "dropping outcome of a cancelled execution"
            );
            return;
        }

        self.in_flight = None;
        self.viewer.loading = false;

        match outcome {
            Outcome::Finished {
                plan,
                mut run,
                analyze,
                ..
            } => {
                let saved = if analyze {
                    Some(self.store.save(&mut run))
                } else {
                    None
                };

                self.viewer.load(plan, run);

                match saved {
                    Some(Ok(_)) => self.viewer.source = Source::Run,
                    Some(Err(e)) => {
                        warn!("could not save run: {}", e);
                        self.viewer.record_error(e);
                    }
                    None => self.execute(true),
                }
            }
            Outcome::Failed { error, .. } => {
                warn!("execution failed: {}", error);
                self.viewer.record_error(error);
            }
        }
    }

    fn step_run(&mut self, forward: bool) {
        if self.viewer.source != Source::Run {
            self.viewer.record_error("run history is only available for saved runs");
            return;
        }

        let current = self.viewer.run();
        let stepped = if forward {
            self.store.next(current)
        } else {
            self.store.previous(current)
        };

        let loaded = stepped.and_then(|run| {
            let plan = ExplainPlan::parse(&run.result)?;
            Ok((plan, run))
        });

        match loaded {
            Ok((plan, run)) => self.viewer.load(plan, run),
            Err(e) => self.viewer.record_error(e),
        }
    }

    /// Waits for the in-flight execution, and whatever it chains, to finish.
    pub async fn settle(&mut self) {
        while self.in_flight.is_some() {
            match self.outcomes_rx.recv().await {
                Some(outcome) => self.handle_outcome(outcome),
                None => break,
            }
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut lines = spawn_input();

        loop {
            print!("{CLEAR_SCREEN}");
            println!("{}", self.screen());

            tokio::select! {
                line = lines.recv() => {
                    let Some(line) = line else {
                        return Ok(());
                    };
                    for command in Command::parse_line(&line) {
                        if !self.apply(command) {
                            return Ok(());
                        }
                    }
                }
                Some(outcome) = self.outcomes_rx.recv() => self.handle_outcome(outcome),
            }
        }
    }
}

/// Reads lines on a dedicated thread; the channel closes on EOF or Ctrl-C.
fn spawn_input() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();

    thread::spawn(move || {
        let mut editor = match DefaultEditor::new() {
            Ok(editor) => editor,
            Err(e) => {
                warn!("could not open line editor: {}", e);
                return;
            }
        };

        loop {
            match editor.readline(PROMPT) {
                Ok(line) => {
                    let _ = editor.add_history_entry(line.as_str());
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
                Err(e) => {
                    warn!("input error: {}", e);
                    break;
                }
            }
        }
    });

    rx
}
