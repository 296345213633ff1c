//! Statement execution on top of the shared pool.
//!
//! Binds named parameters, acquires the pool handle, and routes the statement
//! to a row-returning or affected-count call. Transport-class failures
//! invalidate the pool so the next call reconnects.

use crate::error::ReservoirError;
use crate::models::{BoundStatement, NamedParams, QueryOutcome, QueryType, RowMap};
use crate::services::connector::{Connector, PoolHandle};
use crate::services::pool::ConnectionPool;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Runs parameterized statements against a [`ConnectionPool`].
pub struct QueryExecutor<C: Connector> {
    pool: ConnectionPool<C>,
    request_timeout: Option<Duration>,
}

impl<C: Connector> Clone for QueryExecutor<C> {
    fn clone(&self) -> Self {
        Self { pool: self.pool.clone(), request_timeout: self.request_timeout }
    }
}

impl<C: Connector> QueryExecutor<C> {
    /// Create an executor using the pool's configured request timeout.
    pub fn new(pool: ConnectionPool<C>) -> Self {
        let request_timeout = pool.config().request_timeout();
        Self { pool, request_timeout }
    }

    /// Override the per-statement timeout. `None` disables it.
    pub fn with_request_timeout(mut self, request_timeout: Option<Duration>) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Get the underlying pool manager.
    pub fn pool(&self) -> &ConnectionPool<C> {
        &self.pool
    }

    /// Execute a statement with named parameters.
    ///
    /// Reads (and writes with `RETURNING`) yield [`QueryOutcome::Rows`];
    /// everything else yields [`QueryOutcome::Affected`]. A missing parameter
    /// fails before the pool is touched.
    pub async fn execute(
        &self,
        sql: &str,
        params: &NamedParams,
    ) -> Result<QueryOutcome, ReservoirError> {
        let bound = bind_named(sql, params)?;
        let returns_rows = QueryType::returns_rows(&bound.sql);
        self.run(bound, returns_rows).await
    }

    /// Execute a statement and return its rows, whatever its type.
    pub async fn query_rows(
        &self,
        sql: &str,
        params: &NamedParams,
    ) -> Result<Vec<RowMap>, ReservoirError> {
        let bound = bind_named(sql, params)?;
        match self.run(bound, true).await? {
            QueryOutcome::Rows(rows) => Ok(rows),
            QueryOutcome::Affected(_) => Ok(Vec::new()),
        }
    }

    async fn run(
        &self,
        bound: BoundStatement,
        returns_rows: bool,
    ) -> Result<QueryOutcome, ReservoirError> {
        let handle = self.pool.acquire().await?;
        let start = Instant::now();

        match self.run_on(&handle, &bound, returns_rows).await {
            Ok(outcome) => {
                tracing::debug!(
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    rows = outcome.row_count(),
                    "Statement completed"
                );
                Ok(outcome)
            }
            Err(err) => {
                let invalidated = self.pool.report_failure(&handle, &err);
                tracing::warn!(
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    category = err.category(),
                    invalidated,
                    error = %err,
                    "Statement failed"
                );
                Err(err)
            }
        }
    }

    async fn run_on(
        &self,
        handle: &Arc<C::Handle>,
        bound: &BoundStatement,
        returns_rows: bool,
    ) -> Result<QueryOutcome, ReservoirError> {
        let statement = async {
            if returns_rows {
                handle.query(&bound.sql, &bound.values).await.map(QueryOutcome::Rows)
            } else {
                handle.execute(&bound.sql, &bound.values).await.map(QueryOutcome::Affected)
            }
        };

        match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, statement).await.map_err(|_| {
                ReservoirError::timeout(format!(
                    "Statement timed out after {}ms",
                    limit.as_millis()
                ))
            })?,
            None => statement.await,
        }
    }
}

/// Rewrite `:name` and `@name` placeholders to positional `$n` ones.
///
/// Repeated names share one position. Placeholders inside quoted strings
/// (including `E'...'` escape strings), quoted identifiers, dollar-quoted
/// bodies and comments are left alone, as are `::type` casts and the bounds
/// of an array slice such as `arr[lo:hi]`.
///
/// # Errors
///
/// Returns a query error naming the first placeholder with no bound value.
pub fn bind_named(sql: &str, params: &NamedParams) -> Result<BoundStatement, ReservoirError> {
    let bytes = sql.as_bytes();
    let mut rewritten = String::with_capacity(sql.len());
    let mut values = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();
    // One entry per open bracket; true when it subscripts an expression
    let mut brackets: Vec<bool> = Vec::new();
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' if opens_escape_string(bytes, i) => i = skip_escape_string(bytes, i),
            quote @ (b'\'' | b'"') => i = skip_quoted(bytes, i, quote),
            b'-' if bytes.get(i + 1) == Some(&b'-') => i = skip_line_comment(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i),
            b'$' => i = skip_dollar_quoted(sql, i),
            b'[' => {
                brackets.push(opens_subscript(bytes, i));
                i += 1;
            }
            b']' => {
                brackets.pop();
                i += 1;
            }
            b':' if bytes.get(i + 1) == Some(&b':') => i += 2,
            b':' if brackets.last() == Some(&true)
                && prev_non_space(bytes, i).is_some_and(ends_operand) =>
            {
                i += 1
            }
            b':' | b'@' if bytes.get(i + 1).is_some_and(|b| is_name_start(*b)) => {
                let end = name_end(bytes, i + 1);
                let name = &sql[i + 1..end];

                let position = match positions.get(name).copied() {
                    Some(position) => position,
                    None => {
                        let value = params.get(name).ok_or_else(|| {
                            ReservoirError::query_message(format!(
                                "No value bound for parameter '{name}'"
                            ))
                        })?;
                        values.push(value.clone());
                        positions.insert(name, values.len());
                        values.len()
                    }
                };

                rewritten.push_str(&sql[copied..i]);
                rewritten.push('$');
                rewritten.push_str(&position.to_string());
                copied = end;
                i = end;
            }
            _ => i += 1,
        }
    }
    rewritten.push_str(&sql[copied..]);

    Ok(BoundStatement { sql: rewritten, values })
}

fn is_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_name_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn name_end(bytes: &[u8], start: usize) -> usize {
    let mut end = start;
    while end < bytes.len() && is_name_char(bytes[end]) {
        end += 1;
    }
    end
}

fn prev_non_space(bytes: &[u8], end: usize) -> Option<u8> {
    bytes[..end].iter().rev().copied().find(|b| !b.is_ascii_whitespace())
}

fn ends_operand(b: u8) -> bool {
    is_name_char(b) || b == b')' || b == b']'
}

/// `[` following an expression indexes it; after `ARRAY` or an operator it
/// builds a literal whose elements may be placeholders.
fn opens_subscript(bytes: &[u8], at: usize) -> bool {
    let before = bytes[..at].trim_ascii_end();
    if !before.last().is_some_and(|b| ends_operand(*b)) {
        return false;
    }
    let word_start = before.iter().rposition(|b| !is_name_char(*b)).map_or(0, |p| p + 1);
    !before[word_start..].eq_ignore_ascii_case(b"array")
}

/// `E'...'` or `e'...'` not preceded by an identifier character.
fn opens_escape_string(bytes: &[u8], quote: usize) -> bool {
    quote >= 1
        && matches!(bytes[quote - 1], b'e' | b'E')
        && (quote < 2 || !is_name_char(bytes[quote - 2]))
}

/// Like [`skip_quoted`], but a backslash escapes the byte after it.
fn skip_escape_string(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\'' => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Index just past the closing quote. Doubled quotes reopen the literal.
fn skip_quoted(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn skip_line_comment(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|b| *b == b'\n')
        .map_or(bytes.len(), |offset| start + offset + 1)
}

fn skip_block_comment(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 2;
    while i + 1 < bytes.len() {
        if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            return i + 2;
        }
        i += 1;
    }
    bytes.len()
}

/// Skip a `$tag$ ... $tag$` body. Positional `$1` and stray `$` advance by one.
fn skip_dollar_quoted(sql: &str, start: usize) -> usize {
    let bytes = sql.as_bytes();
    let tag_end = name_end(bytes, start + 1);
    let opens_body = bytes.get(tag_end) == Some(&b'$')
        && bytes.get(start + 1).is_some_and(|b| *b == b'$' || is_name_start(*b));
    if !opens_body {
        return start + 1;
    }

    let delimiter = &sql[start..=tag_end];
    let body_start = tag_end + 1;
    match sql[body_start..].find(delimiter) {
        Some(offset) => body_start + offset + delimiter.len(),
        None => bytes.len(),
    }
}
