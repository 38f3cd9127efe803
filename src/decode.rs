//! Unwraps the `EXPLAIN (FORMAT JSON)` envelope and provides typed access to
//! the fields of a plan object.

use serde_json::{Map, Value};

use crate::explain::PlanError;

/// Top-level pieces of one explain document.
#[derive(Debug)]
pub struct Decoded {
    pub plan: Map<String, Value>,
    pub execution_time: f64,
    pub planning_time: f64,
    pub analyzed: bool,
    pub has_buffers: bool,
    pub settings: Vec<(String, String)>,
}

pub fn decode(explain_json: &str) -> Result<Decoded, PlanError> {
    let decoded: Value = serde_json::from_str(explain_json)?;

    let mut documents = match decoded {
        Value::Array(documents) => documents,
        other => {
            return Err(PlanError::Shape(format!(
                "expected an array, found {}",
                kind(&other)
            )))
        }
    };

    if documents.len() != 1 {
        return Err(PlanError::Shape(format!(
            "expected exactly one plan, found {}",
            documents.len()
        )));
    }

    let mut document = match documents.remove(0) {
        Value::Object(document) => document,
        other => {
            return Err(PlanError::Shape(format!(
                "expected an object, found {}",
                kind(&other)
            )))
        }
    };

    let plan = match document.remove("Plan") {
        Some(Value::Object(plan)) => plan,
        Some(other) => {
            return Err(PlanError::Shape(format!(
                "expected 'Plan' to be an object, found {}",
                kind(&other)
            )))
        }
        None => return Err(PlanError::Shape("missing 'Plan' attribute".to_string())),
    };

    let execution_time = document.get("Execution Time").and_then(Value::as_f64);
    let analyzed = execution_time.is_some();
    let has_buffers = PlanObject(&plan).has("Shared Read Blocks");

    let planning_time = document
        .get("Planning Time")
        .and_then(Value::as_f64)
        .unwrap_or_default();

    let settings = match document.get("Settings") {
        Some(Value::Object(settings)) => settings
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (name.clone(), value)
            })
            .collect(),
        _ => Vec::new(),
    };

    Ok(Decoded {
        plan,
        execution_time: execution_time.unwrap_or_default(),
        planning_time,
        analyzed,
        has_buffers,
        settings,
    })
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Typed view over one plan node object.
#[derive(Debug, Clone, Copy)]
pub struct PlanObject<'a>(pub &'a Map<String, Value>);

impl<'a> PlanObject<'a> {
    pub fn required_str(&self, field: &'static str) -> Result<&'a str, PlanError> {
        match self.0.get(field) {
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(PlanError::WrongType {
                field,
                expected: "a string",
            }),
            None => Err(PlanError::MissingField { field }),
        }
    }

    pub fn required_f64(&self, field: &'static str) -> Result<f64, PlanError> {
        match self.0.get(field) {
            Some(value) => value.as_f64().ok_or(PlanError::WrongType {
                field,
                expected: "a number",
            }),
            None => Err(PlanError::MissingField { field }),
        }
    }

    /// Whole-number counters (rows, loops, widths). PostgreSQL emits these as
    /// JSON numbers that may carry a fraction for per-loop averages.
    pub fn required_count(&self, field: &'static str) -> Result<i64, PlanError> {
        self.required_f64(field).map(|n| n as i64)
    }

    pub fn required_bool(&self, field: &'static str) -> Result<bool, PlanError> {
        match self.0.get(field) {
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(PlanError::WrongType {
                field,
                expected: "a bool",
            }),
            None => Err(PlanError::MissingField { field }),
        }
    }

    /// Missing or non-string fields read as an empty string.
    pub fn string(&self, field: &str) -> String {
        self.0
            .get(field)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    /// Missing or non-numeric fields read as zero.
    pub fn count(&self, field: &str) -> i64 {
        self.0
            .get(field)
            .and_then(Value::as_f64)
            .map(|n| n as i64)
            .unwrap_or_default()
    }

    /// String arrays such as `Group Key`; non-string entries are skipped.
    pub fn strings(&self, field: &str) -> Vec<String> {
        match self.0.get(field) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn has(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Child plan objects in order, skipping nulls.
    pub fn children(&self) -> Result<Vec<PlanObject<'a>>, PlanError> {
        let plans = match self.0.get("Plans") {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Array(plans)) => plans,
            Some(_) => {
                return Err(PlanError::WrongType {
                    field: "Plans",
                    expected: "an array",
                })
            }
        };

        plans
            .iter()
            .filter(|plan| !plan.is_null())
            .map(|plan| match plan {
                Value::Object(plan) => Ok(PlanObject(plan)),
                _ => Err(PlanError::WrongType {
                    field: "Plans",
                    expected: "an array of objects",
                }),
            })
            .collect()
    }
}
