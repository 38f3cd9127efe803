use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub mod app;
pub mod cfg;
pub mod command;
pub mod config;
pub mod decode;
pub mod error;
pub mod executor;
pub mod explain;
pub mod flatten;
pub mod format;
pub mod projection;
pub mod render;
pub mod session;
pub mod settings;
pub mod sql;
pub mod viewer;

use crate::app::App;
use crate::cfg::{PGEX_CONFIG_PATH, PGEX_DIR, PGEX_LOG};
use crate::config::ConnectionConfig;
use crate::executor::{PgExecutor, PlanExecutor, DEFAULT_TIMEOUT};
use crate::explain::ExplainPlan;
use crate::session::{FsSessionStore, QueryRun, SessionStore};
use crate::viewer::{Source, Viewer};

/// Terminal viewer for PostgreSQL `EXPLAIN (FORMAT JSON)` plans.
///
/// Pipe a plan into pgex to view it, run `pgex exec <file>` to explain a
/// query, or run `pgex` alone to reopen the latest recorded run.
#[derive(Parser, Debug)]
#[command(name = "pgex")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// libpq connection string, e.g. "host=localhost dbname=shop"
    #[arg(long, env = "PGEX_CONN_STRING", global = true)]
    conn_string: Option<String>,

    #[arg(long, global = true)]
    host: Option<String>,

    #[arg(long, global = true)]
    port: Option<u16>,

    #[arg(long, global = true)]
    user: Option<String>,

    #[arg(long, global = true)]
    password: Option<String>,

    #[arg(long, global = true)]
    database: Option<String>,

    /// JSON connection config, defaults to $PGEX_CONFIG_PATH or ./pgex.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Query timeout in seconds
    #[arg(long, global = true, default_value_t = DEFAULT_TIMEOUT.as_secs())]
    timeout: u64,

    /// Render once to stdout and exit
    #[arg(long, global = true)]
    print: bool,

    /// Dump the visible plan nodes as JSON and exit
    #[arg(long, global = true)]
    json: bool,

    /// Screen width in columns
    #[arg(long, env = "COLUMNS", global = true, default_value_t = 120)]
    width: usize,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Explain a single-statement SQL file, then analyze it and record the run
    Exec {
        file: PathBuf,
    },
    /// Print the version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Version) => {
            println!("pgex {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Exec { file }) => exec(&cli, file).await,
        None => view(&cli).await,
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let subscriber = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env());

    match PGEX_LOG.as_deref() {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("could not open log file {path}"))?;
            subscriber
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => subscriber.with_writer(std::io::stderr).init(),
    }

    Ok(())
}

/// Flags first, then the config file, then `PG*` environment variables.
fn connection_config(cli: &Cli) -> anyhow::Result<ConnectionConfig> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(PGEX_CONFIG_PATH.as_str()));
    let file = ConnectionConfig::from_file(&path)
        .with_context(|| format!("could not read config {}", path.display()))?;

    let flags = ConnectionConfig {
        conn_string: cli.conn_string.clone(),
        host: cli.host.clone(),
        socket: None,
        port: cli.port,
        user: cli.user.clone(),
        password: cli.password.clone(),
        database: cli.database.clone(),
    };

    Ok(flags.or(file).or(ConnectionConfig::from_env()))
}

fn pg_executor(cli: &Cli) -> anyhow::Result<PgExecutor> {
    let config = connection_config(cli)?.to_pg_config()?;
    Ok(PgExecutor::new(config, Duration::from_secs(cli.timeout)))
}

async fn exec(cli: &Cli, file: &Path) -> anyhow::Result<()> {
    let query = sql::load_statement(file)
        .with_context(|| format!("could not load {}", file.display()))?;

    let executor = pg_executor(cli)?;
    let settings = executor
        .show_settings()
        .await
        .context("could not read session settings")?;

    let run = QueryRun::new(query, Some(file.to_path_buf()));
    let name = run
        .display_name()
        .unwrap_or_else(|| file.display().to_string());

    let mut viewer = Viewer::new(Source::File(name));
    viewer.set_next_settings(settings);
    viewer.load(ExplainPlan::default(), run);

    let mut app = App::new(
        viewer,
        Some(executor),
        FsSessionStore::new(PGEX_DIR.as_str()),
        cli.width,
    );
    app.execute(false);

    if cli.print || cli.json {
        app.settle().await;
    }
    present(cli, app).await
}

async fn view(cli: &Cli) -> anyhow::Result<()> {
    let store = FsSessionStore::new(PGEX_DIR.as_str());

    if !std::io::stdin().is_terminal() {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .context("could not read stdin")?;
        let plan = ExplainPlan::parse(&input).context("could not parse plan from stdin")?;

        let mut viewer = Viewer::new(Source::Stdin);
        viewer.load(
            plan,
            QueryRun {
                result: input,
                ..Default::default()
            },
        );

        // stdin is spent on the plan, so there is nothing left to read
        // commands from.
        let app: App<PgExecutor, _> = App::new(viewer, None, store, cli.width);
        return print_once(cli, &app);
    }

    let run = store.latest()?;
    let plan = ExplainPlan::parse(&run.result)
        .with_context(|| format!("could not parse plan in {}", store.dir().display()))?;
    info!(pointer = ?run.pointer, "opening latest run");

    let mut viewer = Viewer::new(Source::Run);
    viewer.set_next_settings(run.settings.clone());
    viewer.load(plan, run);

    let executor = match pg_executor(cli) {
        Ok(executor) => Some(executor),
        Err(e) => {
            warn!("re-execution disabled: {:#}", e);
            None
        }
    };

    present(cli, App::new(viewer, executor, store, cli.width)).await
}

async fn present<E, S>(cli: &Cli, app: App<E, S>) -> anyhow::Result<()>
where
    E: PlanExecutor,
    S: SessionStore,
{
    if cli.print || cli.json {
        return print_once(cli, &app);
    }
    app.run().await
}

fn print_once<E, S>(cli: &Cli, app: &App<E, S>) -> anyhow::Result<()>
where
    E: PlanExecutor,
    S: SessionStore,
{
    if cli.json {
        let nodes = app.viewer().visible();
        println!("{}", serde_json::to_string_pretty(&nodes)?);
    } else {
        println!("{}", app.screen());
    }
    Ok(())
}
