use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::explain::PlanError;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors from the collaborators around the plan parser: database, session
/// files, SQL loading and configuration.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("query did not finish within {0:?}")]
    Timeout(Duration),

    #[error("query returned no explain output")]
    EmptyResult,

    #[error("could not parse sql: {0}")]
    Sql(#[from] sqlparser::parser::ParserError),

    #[error("expected exactly one sql statement, found {0}")]
    StatementCount(usize),

    #[error("wrong pgex format in {path}: {reason}")]
    InvalidSession { path: PathBuf, reason: &'static str },

    #[error("invalid setting line '{0}', expected name=value")]
    InvalidSetting(String),

    #[error("{0} does not exist, use the exec command to create a .pgex file")]
    NoStoreDir(PathBuf),

    #[error("no .pgex runs found in {0}")]
    NoRuns(PathBuf),

    #[error("config error: {0}")]
    Config(String),

    #[error("config file is not valid json: {0}")]
    ConfigJson(#[from] serde_json::Error),
}
