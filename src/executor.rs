use std::future::Future;
use std::time::Duration;

use tokio_postgres::{Client, NoTls, SimpleQueryMessage};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::settings::{filter_allowed, Setting};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Runs explain queries against a database.
pub trait PlanExecutor: Send + Sync + 'static {
    /// Applies `settings` for the session, runs `query` and returns the first
    /// column of its first row.
    fn execute(
        &self,
        query: &str,
        settings: &[Setting],
    ) -> impl Future<Output = Result<String>> + Send;

    /// Current values of the allow-listed settings, in display order.
    fn show_settings(&self) -> impl Future<Output = Result<Vec<Setting>>> + Send;
}

#[derive(Debug, Clone)]
pub struct PgExecutor {
    config: tokio_postgres::Config,
    timeout: Duration,
}

impl PgExecutor {
    pub fn new(config: tokio_postgres::Config, timeout: Duration) -> Self {
        PgExecutor { config, timeout }
    }

    async fn connect(&self) -> Result<Client> {
        let (client, connection) = self.config.connect(NoTls).await?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("connection error: {}", e);
            }
        });

        Ok(client)
    }

    async fn run_explain(&self, query: &str, settings: &[Setting]) -> Result<String> {
        let client = self.connect().await?;

        for sql in set_statements(settings) {
            debug!("applying {}", sql);
            client.batch_execute(&sql).await?;
        }

        let messages = client.simple_query(query).await?;
        first_column(&messages).ok_or(Error::EmptyResult)
    }

    async fn run_show_all(&self) -> Result<Vec<Setting>> {
        let client = self.connect().await?;
        let messages = client.simple_query("show all").await?;

        let settings = messages.iter().filter_map(|message| match message {
            SimpleQueryMessage::Row(row) => match (row.get(0), row.get(1)) {
                (Some(name), Some(value)) => Some(Setting::new(name, value)),
                _ => None,
            },
            _ => None,
        });

        Ok(filter_allowed(settings))
    }

    async fn with_timeout<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.timeout)),
        }
    }
}

impl PlanExecutor for PgExecutor {
    #[tracing::instrument(skip(self, settings), fields(settings = settings.len()))]
    async fn execute(&self, query: &str, settings: &[Setting]) -> Result<String> {
        info!("executing explain");
        self.with_timeout(self.run_explain(query, settings)).await
    }

    #[tracing::instrument(skip(self))]
    async fn show_settings(&self) -> Result<Vec<Setting>> {
        self.with_timeout(self.run_show_all()).await
    }
}

/// `SET` statements for the allow-listed settings; anything else is skipped.
fn set_statements(settings: &[Setting]) -> Vec<String> {
    settings
        .iter()
        .filter(|setting| {
            let allowed = setting.is_allowed();
            if !allowed {
                warn!("not applying setting {}", setting.name);
            }
            allowed
        })
        .map(Setting::sql)
        .collect()
}

/// Text of the first column of the first data row.
fn first_column(messages: &[SimpleQueryMessage]) -> Option<String> {
    messages.iter().find_map(|message| match message {
        SimpleQueryMessage::Row(row) => row.get(0).map(str::to_string),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_allowed_settings_are_applied() {
        let statements = set_statements(&[
            Setting::new("work_mem; drop table orders; set x", "1"),
            Setting::new("statement_timeout", "0"),
            Setting::new("work_mem", "40MB"),
            Setting::new("random_page_cost", "1'1"),
        ]);
        assert_eq!(
            statements,
            vec![
                "SET work_mem = '40MB'".to_string(),
                "SET random_page_cost = '1''1'".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn slow_queries_time_out() {
        let executor = PgExecutor::new(tokio_postgres::Config::new(), Duration::from_millis(10));
        let result: Result<String> = executor
            .with_timeout(std::future::pending::<Result<String>>())
            .await;
        assert!(matches!(result, Err(Error::Timeout(d)) if d == Duration::from_millis(10)));
    }

    #[tokio::test]
    async fn fast_results_pass_through() {
        let executor = PgExecutor::new(tokio_postgres::Config::new(), DEFAULT_TIMEOUT);
        let result = executor
            .with_timeout(async { Ok::<_, Error>("[]".to_string()) })
            .await
            .unwrap();
        assert_eq!(result, "[]");
    }
}
