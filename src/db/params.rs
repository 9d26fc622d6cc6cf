//! Parameter binding utilities for database queries.
//!
//! Statements are written with `:name` placeholders. Before execution they are
//! rewritten to the positional `$N` form both PostgreSQL and SQLite accept,
//! and the values are bound in that order. Placeholders are located with the
//! sqlparser tokenizer, so `::type` casts, string literals and quoted
//! identifiers are never touched.

use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, QueryParam, QueryParams};
use sqlparser::dialect::{Dialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::tokenizer::{Location, Token, Tokenizer};
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{Postgres, Sqlite};

/// A statement ready for the driver: positional SQL plus ordered values.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedStatement {
    pub sql: String,
    pub args: Vec<QueryParam>,
}

fn get_dialect(db_type: DatabaseType) -> Box<dyn Dialect> {
    match db_type {
        DatabaseType::PostgreSQL => Box::new(PostgreSqlDialect {}),
        DatabaseType::SQLite => Box::new(SQLiteDialect {}),
    }
}

/// Rewrite `:name` placeholders to `$N` and collect the bound values.
///
/// A name used several times maps to the same position. Every placeholder
/// must have a value in `params`; unused params are ignored.
pub fn prepare_statement(
    sql: &str,
    params: &QueryParams,
    db_type: DatabaseType,
) -> DbResult<PreparedStatement> {
    if !sql.contains(':') {
        return Ok(PreparedStatement {
            sql: sql.to_string(),
            args: Vec::new(),
        });
    }

    let dialect = get_dialect(db_type);
    let tokens = Tokenizer::new(dialect.as_ref(), sql)
        .tokenize_with_location()
        .map_err(|e| DbError::invalid_input(format!("Failed to tokenize SQL: {}", e)))?;

    let index = LineIndex::new(sql);
    let mut names: Vec<String> = Vec::new();
    let mut replacements: Vec<(usize, usize, usize)> = Vec::new();

    for pair in tokens.windows(2) {
        let (colon, word) = (&pair[0], &pair[1]);
        let Token::Colon = colon.token else {
            continue;
        };
        let Token::Word(w) = &word.token else {
            continue;
        };
        if w.quote_style.is_some() {
            continue;
        }

        let start = index.offset(colon.span.start);
        let end = index.offset(word.span.end);
        let (Some(start), Some(end)) = (start, end) else {
            return Err(DbError::internal("Placeholder position out of range"));
        };
        // `:` must touch the name; `a : b` is not a placeholder
        if index.offset(word.span.start) != Some(start + 1) {
            continue;
        }

        let position = match names.iter().position(|n| *n == w.value) {
            Some(p) => p,
            None => {
                names.push(w.value.clone());
                names.len() - 1
            }
        };
        replacements.push((start, end, position + 1));
    }

    let mut rewritten = String::with_capacity(sql.len());
    let mut cursor = 0;
    for (start, end, position) in replacements {
        rewritten.push_str(&sql[cursor..start]);
        rewritten.push('$');
        rewritten.push_str(&position.to_string());
        cursor = end;
    }
    rewritten.push_str(&sql[cursor..]);

    let args = names
        .iter()
        .map(|name| {
            params.get(name).cloned().ok_or_else(|| {
                DbError::invalid_input(format!("Missing value for SQL parameter ':{}'", name))
            })
        })
        .collect::<DbResult<Vec<_>>>()?;

    Ok(PreparedStatement {
        sql: rewritten,
        args,
    })
}

/// Maps tokenizer locations (1-based line, 1-based char column) to byte offsets.
struct LineIndex<'a> {
    sql: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(sql: &'a str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(sql.match_indices('\n').map(|(i, _)| i + 1));
        Self { sql, line_starts }
    }

    fn offset(&self, location: Location) -> Option<usize> {
        let line = usize::try_from(location.line).ok()?.checked_sub(1)?;
        let column = usize::try_from(location.column).ok()?.checked_sub(1)?;
        let line_start = *self.line_starts.get(line)?;
        let rest = &self.sql[line_start..];
        match rest.char_indices().nth(column) {
            Some((i, _)) => Some(line_start + i),
            None if rest.chars().count() == column => Some(self.sql.len()),
            None => None,
        }
    }
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Json(v) => query.bind(Json(v)),
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        // SQLite doesn't have native JSON type, store as string
        QueryParam::Json(v) => query.bind(v.to_string()),
    }
}
