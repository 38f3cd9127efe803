//! Database connection settings, merged from CLI flags, an optional JSON
//! config file and the libpq `PG*` environment variables, in that order of
//! precedence.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// libpq style connection string. `user`, `password` and `database`
    /// override its parts; its host and port win over `host` and `port`.
    pub conn_string: Option<String>,
    pub host: Option<String>,
    /// Kept for older config files, used when `host` is not set.
    pub socket: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
}

impl ConnectionConfig {
    /// Reads the JSON config file. A missing file is an empty config.
    pub fn from_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                debug!("reading connection config from {}", path.display());
                Ok(serde_json::from_str(&contents)?)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        ConnectionConfig {
            conn_string: None,
            host: lookup("PGHOST"),
            socket: None,
            port: lookup("PGPORT").and_then(|p| p.parse().ok()),
            user: lookup("PGUSER"),
            password: lookup("PGPASSWORD"),
            database: lookup("PGDATABASE"),
        }
    }

    /// Fields set in `self` win; unset ones are taken from `fallback`.
    pub fn or(self, fallback: ConnectionConfig) -> Self {
        ConnectionConfig {
            conn_string: self.conn_string.or(fallback.conn_string),
            host: self.host.or(fallback.host),
            socket: self.socket.or(fallback.socket),
            port: self.port.or(fallback.port),
            user: self.user.or(fallback.user),
            password: self.password.or(fallback.password),
            database: self.database.or(fallback.database),
        }
    }

    pub fn to_pg_config(&self) -> Result<tokio_postgres::Config> {
        let mut config = match &self.conn_string {
            Some(conn_string) => conn_string
                .parse::<tokio_postgres::Config>()
                .map_err(|e| Error::Config(format!("invalid conn_string: {e}")))?,
            None => tokio_postgres::Config::new(),
        };

        // Hosts and ports accumulate in tokio-postgres, so a connection
        // string that names them keeps its own.
        if config.get_hosts().is_empty() {
            if let Some(host) = self.host.as_ref().or(self.socket.as_ref()) {
                config.host(host);
            }
        }
        if config.get_ports().is_empty() {
            if let Some(port) = self.port {
                config.port(port);
            }
        }
        if let Some(user) = &self.user {
            config.user(user);
        }
        if let Some(password) = &self.password {
            config.password(password);
        }
        if let Some(database) = &self.database {
            config.dbname(database);
        }

        if config.get_hosts().is_empty() {
            config.host("localhost");
        }
        if config.get_user().is_none() {
            let user = std::env::var("USER")
                .map_err(|_| Error::Config("no database user configured".to_string()))?;
            config.user(&user);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn missing_file_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let config = ConnectionConfig::from_file(&tmp.path().join("pgex.json")).unwrap();
        assert_eq!(config, ConnectionConfig::default());
    }

    #[test]
    fn file_fields_are_optional() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"host": "db.internal", "port": 6432}}"#).unwrap();

        let config = ConnectionConfig::from_file(file.path()).unwrap();
        assert_eq!(config.host.as_deref(), Some("db.internal"));
        assert_eq!(config.port, Some(6432));
        assert_eq!(config.user, None);
    }

    #[test]
    fn bad_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[database]\nhost=x").unwrap();
        assert!(matches!(
            ConnectionConfig::from_file(file.path()),
            Err(Error::ConfigJson(_))
        ));
    }

    #[test]
    fn precedence() {
        let env: HashMap<&str, &str> =
            HashMap::from([("PGHOST", "envhost"), ("PGUSER", "envuser"), ("PGPORT", "nope")]);
        let from_env = ConnectionConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(from_env.port, None);

        let flags = ConnectionConfig {
            user: Some("flaguser".into()),
            ..Default::default()
        };
        let file = ConnectionConfig {
            host: Some("filehost".into()),
            database: Some("shop".into()),
            ..Default::default()
        };

        let merged = flags.or(file).or(from_env);
        assert_eq!(merged.user.as_deref(), Some("flaguser"));
        assert_eq!(merged.host.as_deref(), Some("filehost"));
        assert_eq!(merged.database.as_deref(), Some("shop"));
    }

    #[test]
    fn fields_override_conn_string() {
        let config = ConnectionConfig {
            conn_string: Some("host=a port=5433 user=u dbname=d".into()),
            database: Some("other".into()),
            ..Default::default()
        };
        let pg = config.to_pg_config().unwrap();
        assert_eq!(pg.get_ports(), &[5433]);
        assert_eq!(pg.get_user(), Some("u"));
        assert_eq!(pg.get_dbname(), Some("other"));
    }

    #[test]
    fn socket_used_without_host() {
        let config = ConnectionConfig {
            socket: Some("/var/run/postgresql".into()),
            user: Some("u".into()),
            ..Default::default()
        };
        let pg = config.to_pg_config().unwrap();
        assert_eq!(pg.get_hosts().len(), 1);
    }
}
