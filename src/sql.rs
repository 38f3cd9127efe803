use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::path::Path;

use sqlparser::ast::visit_relations;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser as SQLParser;
use tracing::debug;

use crate::error::{Error, Result};

const EXPLAIN_PREFIX: &str = "explain (format json) ";
const EXPLAIN_ANALYZE_PREFIX: &str = "explain (settings, format json, buffers, analyze) ";

/// Reads a SQL file that must hold exactly one statement and returns its text
/// without surrounding whitespace or the trailing semicolon.
#[tracing::instrument]
pub fn load_statement(path: &Path) -> Result<String> {
    let body = std::fs::read_to_string(path)?;
    single_statement(&body)
}

pub fn single_statement(body: &str) -> Result<String> {
    let ast = SQLParser::parse_sql(&PostgreSqlDialect {}, body)?;

    if ast.len() != 1 {
        return Err(Error::StatementCount(ast.len()));
    }

    let statement = body.trim().trim_end_matches(';').trim_end().to_string();
    debug!("loaded statement of {} bytes", statement.len());
    Ok(statement)
}

pub fn with_explain(query: &str) -> String {
    format!("{EXPLAIN_PREFIX}{query}")
}

pub fn with_explain_analyze(query: &str) -> String {
    format!("{EXPLAIN_ANALYZE_PREFIX}{query}")
}

/// Relation names referenced anywhere in the query, sorted and de-duplicated.
/// Text that does not parse yields no names.
pub fn referenced_relations(query: &str) -> Vec<String> {
    let ast = match SQLParser::parse_sql(&PostgreSqlDialect {}, query) {
        Ok(ast) => ast,
        Err(e) => {
            debug!("not collecting relations: {}", e);
            return Vec::new();
        }
    };

    let mut tables = BTreeSet::new();
    let _ = visit_relations(&ast, |relation| {
        tables.insert(relation.to_string());
        ControlFlow::<()>::Continue(())
    });
    tables.into_iter().collect()
}
