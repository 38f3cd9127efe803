pub static PGEX_DIR: once_cell::sync::Lazy<String> =
    once_cell::sync::Lazy::new(|| std::env::var("PGEX_DIR").unwrap_or_else(|_| "_pgex".to_string()));

pub static PGEX_CONFIG_PATH: once_cell::sync::Lazy<String> = once_cell::sync::Lazy::new(|| {
    std::env::var("PGEX_CONFIG_PATH").unwrap_or_else(|_| "./pgex.json".to_string())
});

/// Log file; logs go to stderr when unset.
pub static PGEX_LOG: once_cell::sync::Lazy<Option<String>> =
    once_cell::sync::Lazy::new(|| std::env::var("PGEX_LOG").ok());
