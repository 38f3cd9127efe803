//! Recorded runs (`.pgex` files): settings, SQL and raw explain output kept
//! side by side so earlier runs can be reopened.

use std::path::{Path, PathBuf};

use chrono::Local;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};
use crate::settings::{filter_allowed, Setting};

pub const EXTENSION: &str = ".pgex";
const DATE_FORMAT: &str = "%Y%m%d%H%M%S";

const SQL_DIVIDER: &str = "---------------- SETTINGS ABOVE / SQL BELOW ----------------";
const EXPLAIN_DIVIDER: &str = "---------------- SQL ABOVE / EXPLAIN JSON BELOW ----------------";

static RUN_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{14}_.*\.pgex$").expect("valid run file pattern"));

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryRun {
    pub query: String,
    pub result: String,
    pub settings: Vec<Setting>,
    pub original_filename: Option<PathBuf>,
    /// File name of the `.pgex` file this run was read from or written to.
    pub pointer: Option<String>,
}

impl QueryRun {
    pub fn new(query: String, original_filename: Option<PathBuf>) -> Self {
        QueryRun {
            query,
            original_filename,
            ..Default::default()
        }
    }

    pub fn display_name(&self) -> Option<String> {
        self.original_filename
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|name| name.to_string_lossy().into_owned())
    }

    /// `<timestamp>_<stem>.pgex` where stem is the original file name up to
    /// its first dot.
    pub fn file_name(&self, timestamp: &str) -> String {
        let stem = self
            .original_filename
            .as_ref()
            .map(|p| expand_home(p))
            .and_then(|p| {
                p.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .and_then(|name| name.split('.').next().map(str::to_string))
            .filter(|stem| !stem.is_empty())
            .unwrap_or_else(|| "stdin".to_string());

        format!("{timestamp}_{stem}{EXTENSION}")
    }

    pub fn to_file_content(&self) -> String {
        let mut buf = String::new();
        for setting in &self.settings {
            buf.push_str(&setting.marshal());
            buf.push('\n');
        }
        buf.push_str("\n\n");
        buf.push_str(SQL_DIVIDER);
        buf.push_str("\n\n");
        buf.push_str(&self.query);
        buf.push_str("\n\n");
        buf.push_str(EXPLAIN_DIVIDER);
        buf.push_str("\n\n");
        buf.push_str(&self.result);
        buf.push_str("\n\n");
        buf
    }

    pub fn from_file_content(path: &Path, contents: &str) -> Result<Self> {
        let invalid = |reason| Error::InvalidSession {
            path: path.to_path_buf(),
            reason,
        };

        let (settings_part, rest) = contents
            .split_once(SQL_DIVIDER)
            .ok_or_else(|| invalid("no settings-above divider"))?;
        let (sql_part, plan_part) = rest
            .split_once(EXPLAIN_DIVIDER)
            .ok_or_else(|| invalid("no sql-above divider"))?;

        let recorded = settings_part
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(Setting::unmarshal)
            .collect::<Result<Vec<_>>>()?;

        let count = recorded.len();
        let settings = filter_allowed(recorded);
        if settings.len() != count {
            warn!(
                "ignoring {} settings in {} that cannot be changed",
                count - settings.len(),
                path.display()
            );
        }

        Ok(QueryRun {
            query: sql_part.trim().to_string(),
            result: plan_part.trim().to_string(),
            settings,
            original_filename: None,
            pointer: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
        })
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

/// Persistence and chronological navigation of recorded runs.
pub trait SessionStore {
    /// Writes the run and records its file name in `run.pointer`.
    fn save(&self, run: &mut QueryRun) -> Result<PathBuf>;
    fn latest(&self) -> Result<QueryRun>;
    /// The run recorded before `run`, or a copy of `run` if it is the first.
    fn previous(&self, run: &QueryRun) -> Result<QueryRun>;
    /// The run recorded after `run`, or a copy of `run` if it is the last.
    fn next(&self, run: &QueryRun) -> Result<QueryRun>;
}

/// Runs kept as files in one directory, ordered by their timestamp prefix.
#[derive(Debug, Clone)]
pub struct FsSessionStore {
    dir: PathBuf,
}

impl FsSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FsSessionStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Run files sorted oldest first.
    pub fn entries(&self) -> Result<Vec<PathBuf>> {
        let read_dir = match std::fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NoStoreDir(self.dir.clone()))
            }
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            let name = entry.file_name();
            if RUN_FILE.is_match(&name.to_string_lossy()) {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    fn load(&self, path: &Path) -> Result<QueryRun> {
        debug!("loading run {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        QueryRun::from_file_content(path, &contents)
    }

    fn neighbour(&self, run: &QueryRun, step: isize) -> Result<QueryRun> {
        let files = self.entries()?;
        let current = run.pointer.as_deref().and_then(|pointer| {
            files
                .iter()
                .position(|f| f.file_name().is_some_and(|name| name == pointer))
        });

        let Some(current) = current else {
            return Ok(run.clone());
        };

        match current.checked_add_signed(step).and_then(|i| files.get(i)) {
            Some(path) => self.load(path),
            None => Ok(run.clone()),
        }
    }
}

impl SessionStore for FsSessionStore {
    #[tracing::instrument(skip(run))]
    fn save(&self, run: &mut QueryRun) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;

        let name = run.file_name(&Local::now().format(DATE_FORMAT).to_string());
        let path = self.dir.join(&name);
        std::fs::write(&path, run.to_file_content())?;

        info!("saved run to {}", path.display());
        run.pointer = Some(name);
        Ok(path)
    }

    fn latest(&self) -> Result<QueryRun> {
        let files = self.entries()?;
        match files.last() {
            Some(path) => self.load(path),
            None => Err(Error::NoRuns(self.dir.clone())),
        }
    }

    fn previous(&self, run: &QueryRun) -> Result<QueryRun> {
        self.neighbour(run, -1)
    }

    fn next(&self, run: &QueryRun) -> Result<QueryRun> {
        self.neighbour(run, 1)
    }
}
