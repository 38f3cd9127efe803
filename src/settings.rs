use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Settings that may be changed between runs, in display order.
pub const ALLOWED_SETTINGS: &[&str] = &[
    "work_mem",
    "random_page_cost",
    "join_collapse_limit",
    "effective_cache_size",
    "max_parallel_workers_per_gather",
];

fn ladder(name: &str) -> &'static [&'static str] {
    match name {
        "work_mem" => &[
            "4MB", "40MB", "400MB", "800MB", "1GB", "2GB", "3GB", "4GB",
        ],
        "random_page_cost" => &["1", "1.1", "2", "3", "4"],
        "join_collapse_limit" => &["1", "2", "3", "4", "5", "6", "7", "8"],
        "effective_cache_size" => &["4GB"],
        "max_parallel_workers_per_gather" => &["0", "1", "2", "3", "4", "5", "6", "7", "8"],
        _ => &[],
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    pub name: String,
    pub value: String,
}

impl Setting {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Setting {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        ALLOWED_SETTINGS.contains(&self.name.as_str())
    }

    fn rank(&self) -> usize {
        ALLOWED_SETTINGS
            .iter()
            .position(|name| *name == self.name)
            .unwrap_or(ALLOWED_SETTINGS.len())
    }

    pub fn sql(&self) -> String {
        format!("SET {} = '{}'", self.name, self.value.replace('\'', "''"))
    }

    pub fn marshal(&self) -> String {
        format!("{}={}", self.name, self.value)
    }

    pub fn unmarshal(line: &str) -> Result<Self> {
        let (name, value) = line
            .trim()
            .split_once('=')
            .ok_or_else(|| Error::InvalidSetting(line.to_string()))?;
        Ok(Setting::new(name.trim(), value.trim()))
    }

    /// Moves to the next value on the ladder; no-op at the top or when the
    /// current value is not on the ladder.
    pub fn increment(&mut self) {
        let values = ladder(&self.name);
        if let Some(i) = values.iter().position(|v| *v == self.value) {
            if let Some(next) = values.get(i + 1) {
                self.value = next.to_string();
            }
        }
    }

    pub fn decrement(&mut self) {
        let values = ladder(&self.name);
        if let Some(i) = values.iter().position(|v| *v == self.value) {
            if i > 0 {
                self.value = values[i - 1].to_string();
            }
        }
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = 32usize.saturating_sub(self.name.chars().count());
        write!(f, "{}: {:>width$}", self.name, self.value)
    }
}

fn compare(a: &Setting, b: &Setting) -> Ordering {
    a.rank().cmp(&b.rank())
}

pub fn sort_settings(settings: &mut [Setting]) {
    settings.sort_by(compare);
}

/// Keeps the allow-listed settings, in display order.
pub fn filter_allowed(settings: impl IntoIterator<Item = Setting>) -> Vec<Setting> {
    let mut allowed: Vec<Setting> = settings.into_iter().filter(Setting::is_allowed).collect();
    sort_settings(&mut allowed);
    allowed
}
