//! PostgreSQL connector built on deadpool-postgres.
//!
//! Provides:
//! - Pool construction with optional TLS
//! - Connection validation on pool creation (`SELECT 1`)
//! - Eager warmup of `min_idle` connections
//! - Row mapping to JSON objects by column type

use crate::error::ReservoirError;
use crate::models::{ConnectionConfig, ParamValue, PoolStatus, RowMap};
use crate::services::connector::{Connector, PoolHandle};

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use serde_json::Value as JsonValue;
use rust_decimal::Decimal;
use std::error::Error as StdError;
use std::str::FromStr;
use std::time::Duration;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, Kind, ToSql, Type};
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

/// Connect primitive for PostgreSQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnector;

impl PgConnector {
    /// Build an unvalidated deadpool pool from the configuration.
    pub fn build_pool(config: &ConnectionConfig) -> Result<Pool, ReservoirError> {
        let connect_timeout = config.connect_timeout();

        let mut pg_config = tokio_postgres::Config::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.username);
        pg_config.password(&config.password);
        pg_config.application_name(&config.application_name);
        pg_config.connect_timeout(connect_timeout);
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(60));
        if let Some(timeout) = config.request_timeout() {
            pg_config.options(&format!("-c statement_timeout={}", timeout.as_millis()));
        }

        let manager_config = ManagerConfig { recycling_method: RecyclingMethod::Fast };
        let manager = if config.encrypt {
            pg_config.ssl_mode(tokio_postgres::config::SslMode::Require);
            let connector = TlsConnector::builder()
                .danger_accept_invalid_certs(config.trust_server_certificate)
                .danger_accept_invalid_hostnames(config.trust_server_certificate)
                .build()
                .map_err(|e| {
                    ReservoirError::config(format!("Failed to create TLS connector: {e}"))
                })?;
            Manager::from_config(pg_config, MakeTlsConnector::new(connector), manager_config)
        } else {
            Manager::from_config(pg_config, NoTls, manager_config)
        };

        Pool::builder(manager)
            .max_size(config.pool.max_size)
            .wait_timeout(Some(connect_timeout))
            .create_timeout(Some(connect_timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| ReservoirError::config(format!("Failed to create pool: {e}")))
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Handle = PgPoolHandle;

    async fn connect(&self, config: &ConnectionConfig) -> Result<PgPoolHandle, ReservoirError> {
        let pool = Self::build_pool(config)?;

        // Validate by establishing a real connection
        {
            let client = pool
                .get()
                .await
                .map_err(|e| ReservoirError::from(e).into_connect_failure())?;
            client
                .execute("SELECT 1", &[])
                .await
                .map_err(|e| ReservoirError::from(e).into_connect_failure())?;
        }

        if config.pool.min_idle > 1 {
            let warm = futures_util::future::try_join_all(
                (0..config.pool.min_idle).map(|_| pool.get()),
            )
            .await
            .map_err(|e| ReservoirError::from(e).into_connect_failure())?;
            tracing::debug!(connections = warm.len(), "Warmed pool to minimum size");
        }

        tracing::info!(
            host = %config.host,
            database = %config.database,
            encrypt = config.encrypt,
            max_size = config.pool.max_size,
            "PostgreSQL pool created"
        );

        Ok(PgPoolHandle { pool })
    }
}

/// An established deadpool-postgres pool.
pub struct PgPoolHandle {
    pool: Pool,
}

impl PgPoolHandle {
    async fn client(&self) -> Result<deadpool_postgres::Client, ReservoirError> {
        self.pool.get().await.map_err(ReservoirError::from)
    }
}

#[async_trait]
impl PoolHandle for PgPoolHandle {
    fn is_connected(&self) -> bool {
        !self.pool.is_closed()
    }

    async fn ping(&self) -> Result<(), ReservoirError> {
        let client = self.client().await?;
        client.execute("SELECT 1", &[]).await?;
        Ok(())
    }

    async fn query(&self, sql: &str, params: &[ParamValue]) -> Result<Vec<RowMap>, ReservoirError> {
        let client = self.client().await?;
        let refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        let rows = client.query(sql, &refs).await?;
        rows.iter().map(row_to_json).collect()
    }

    async fn execute(&self, sql: &str, params: &[ParamValue]) -> Result<u64, ReservoirError> {
        let client = self.client().await?;
        let refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        Ok(client.execute(sql, &refs).await?)
    }

    fn status(&self) -> Option<PoolStatus> {
        let status = self.pool.status();
        Some(PoolStatus {
            max_size: status.max_size,
            size: status.size,
            available: status.available as isize,
            waiting: status.waiting,
        })
    }

    async fn close(&self) -> Result<(), ReservoirError> {
        self.pool.close();
        Ok(())
    }
}

impl ToSql for ParamValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
        match self {
            ParamValue::Null => Ok(IsNull::Yes),
            ParamValue::Bool(b) => b.to_sql_checked(ty, out),
            ParamValue::Int(i) => match *ty {
                Type::INT2 => i16::try_from(*i)?.to_sql_checked(ty, out),
                Type::INT4 => i32::try_from(*i)?.to_sql_checked(ty, out),
                Type::FLOAT4 => (*i as f32).to_sql_checked(ty, out),
                Type::FLOAT8 => (*i as f64).to_sql_checked(ty, out),
                Type::NUMERIC => Decimal::from(*i).to_sql_checked(ty, out),
                _ if is_text(ty) => i.to_string().to_sql_checked(ty, out),
                _ => i.to_sql_checked(ty, out),
            },
            ParamValue::Float(f) => match *ty {
                Type::FLOAT4 => (*f as f32).to_sql_checked(ty, out),
                Type::NUMERIC => Decimal::try_from(*f)?.to_sql_checked(ty, out),
                _ if is_text(ty) => f.to_string().to_sql_checked(ty, out),
                _ => f.to_sql_checked(ty, out),
            },
            ParamValue::Text(s) => text_to_sql(s, ty, out),
            ParamValue::Json(v) => v.to_sql_checked(ty, out),
        }
    }

    // Per-variant checks happen in `to_sql`
    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Bind text to a column, parsing it when the column is not textual.
fn text_to_sql(
    s: &str,
    ty: &Type,
    out: &mut BytesMut,
) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
    match *ty {
        Type::BOOL => s.trim().parse::<bool>()?.to_sql_checked(ty, out),
        Type::INT2 => s.trim().parse::<i16>()?.to_sql_checked(ty, out),
        Type::INT4 => s.trim().parse::<i32>()?.to_sql_checked(ty, out),
        Type::INT8 => s.trim().parse::<i64>()?.to_sql_checked(ty, out),
        Type::FLOAT4 => s.trim().parse::<f32>()?.to_sql_checked(ty, out),
        Type::FLOAT8 => s.trim().parse::<f64>()?.to_sql_checked(ty, out),
        Type::NUMERIC => Decimal::from_str(s.trim())?.to_sql_checked(ty, out),
        Type::UUID => Uuid::parse_str(s)?.to_sql_checked(ty, out),
        Type::JSON | Type::JSONB => serde_json::from_str::<JsonValue>(s)
            .unwrap_or_else(|_| JsonValue::String(s.to_string()))
            .to_sql_checked(ty, out),
        Type::TIMESTAMPTZ => {
            DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc).to_sql_checked(ty, out)
        }
        Type::TIMESTAMP => s.parse::<NaiveDateTime>()?.to_sql_checked(ty, out),
        Type::DATE => s.parse::<NaiveDate>()?.to_sql_checked(ty, out),
        Type::TIME => s.parse::<NaiveTime>()?.to_sql_checked(ty, out),
        _ if matches!(ty.kind(), Kind::Enum(_)) => {
            // Enum labels travel as their text in the binary protocol
            out.extend_from_slice(s.as_bytes());
            Ok(IsNull::No)
        }
        _ => s.to_sql_checked(ty, out),
    }
}

fn is_text(ty: &Type) -> bool {
    <&str as ToSql>::accepts(ty)
}

/// How a result column is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Text,
    Bytea,
    Uuid,
    Json,
    TimestampTz,
    Timestamp,
    Date,
    Time,
    Int4Array,
    Int8Array,
    TextArray,
    Enum,
}

/// Pick a decoder for `ty`, or `None` if values of this type cannot be mapped.
fn column_kind(ty: &Type) -> Option<ColumnKind> {
    let kind = match *ty {
        Type::BOOL => ColumnKind::Bool,
        Type::INT2 => ColumnKind::Int2,
        Type::INT4 => ColumnKind::Int4,
        Type::INT8 => ColumnKind::Int8,
        Type::FLOAT4 => ColumnKind::Float4,
        Type::FLOAT8 => ColumnKind::Float8,
        Type::NUMERIC => ColumnKind::Numeric,
        Type::BYTEA => ColumnKind::Bytea,
        Type::UUID => ColumnKind::Uuid,
        Type::JSON | Type::JSONB => ColumnKind::Json,
        Type::TIMESTAMPTZ => ColumnKind::TimestampTz,
        Type::TIMESTAMP => ColumnKind::Timestamp,
        Type::DATE => ColumnKind::Date,
        Type::TIME => ColumnKind::Time,
        Type::INT4_ARRAY => ColumnKind::Int4Array,
        Type::INT8_ARRAY => ColumnKind::Int8Array,
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => ColumnKind::TextArray,
        _ if matches!(ty.kind(), Kind::Enum(_)) => ColumnKind::Enum,
        _ if <&str as FromSql>::accepts(ty) => ColumnKind::Text,
        _ => return None,
    };
    Some(kind)
}

/// Enum label read straight from the wire.
struct EnumLabel(String);

impl<'a> FromSql<'a> for EnumLabel {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        Ok(Self(std::str::from_utf8(raw)?.to_string()))
    }

    fn accepts(ty: &Type) -> bool {
        matches!(ty.kind(), Kind::Enum(_))
    }
}

fn unsupported_column(name: &str, ty: &Type) -> ReservoirError {
    ReservoirError::query_message(format!(
        "Column '{name}' has type {ty} which cannot be returned; cast it to text in the query"
    ))
}

/// Convert a PostgreSQL row to a JSON object in column order.
fn row_to_json(row: &Row) -> Result<RowMap, ReservoirError> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| -> Result<(String, JsonValue), ReservoirError> {
            Ok((col.name().to_string(), column_to_json(row, i)?))
        })
        .collect()
}

fn column_to_json(row: &Row, i: usize) -> Result<JsonValue, ReservoirError> {
    let column = &row.columns()[i];
    let kind =
        column_kind(column.type_()).ok_or_else(|| unsupported_column(column.name(), column.type_()))?;

    let value = match kind {
        ColumnKind::Bool => get::<bool>(row, i)?.map(JsonValue::Bool),
        ColumnKind::Int2 => get::<i16>(row, i)?.map(JsonValue::from),
        ColumnKind::Int4 => get::<i32>(row, i)?.map(JsonValue::from),
        ColumnKind::Int8 => get::<i64>(row, i)?.map(JsonValue::from),
        ColumnKind::Float4 => get::<f32>(row, i)?.map(|v| float_to_json(v as f64)),
        ColumnKind::Float8 => get::<f64>(row, i)?.map(float_to_json),
        // Kept as text so no precision is lost
        ColumnKind::Numeric => get::<Decimal>(row, i)?.map(|v| JsonValue::String(v.to_string())),
        ColumnKind::Text => get::<String>(row, i)?.map(JsonValue::String),
        ColumnKind::Bytea => get::<Vec<u8>>(row, i)?.map(|v| JsonValue::String(bytea_hex(&v))),
        ColumnKind::Uuid => get::<Uuid>(row, i)?.map(|v| JsonValue::String(v.to_string())),
        ColumnKind::Json => get::<JsonValue>(row, i)?,
        ColumnKind::TimestampTz => {
            get::<DateTime<Utc>>(row, i)?.map(|v| JsonValue::String(v.to_rfc3339()))
        }
        ColumnKind::Timestamp => {
            get::<NaiveDateTime>(row, i)?.map(|v| JsonValue::String(v.to_string()))
        }
        ColumnKind::Date => get::<NaiveDate>(row, i)?.map(|v| JsonValue::String(v.to_string())),
        ColumnKind::Time => get::<NaiveTime>(row, i)?.map(|v| JsonValue::String(v.to_string())),
        ColumnKind::Int4Array => get::<Vec<Option<i32>>>(row, i)?
            .map(|v| JsonValue::Array(v.into_iter().map(JsonValue::from).collect())),
        ColumnKind::Int8Array => get::<Vec<Option<i64>>>(row, i)?
            .map(|v| JsonValue::Array(v.into_iter().map(JsonValue::from).collect())),
        ColumnKind::TextArray => get::<Vec<Option<String>>>(row, i)?
            .map(|v| JsonValue::Array(v.into_iter().map(JsonValue::from).collect())),
        ColumnKind::Enum => get::<EnumLabel>(row, i)?.map(|v| JsonValue::String(v.0)),
    };

    Ok(value.unwrap_or(JsonValue::Null))
}

/// Decode a nullable column, reporting decode failures instead of hiding them.
fn get<'a, T: FromSql<'a>>(row: &'a Row, i: usize) -> Result<Option<T>, ReservoirError> {
    row.try_get::<_, Option<T>>(i).map_err(|e| {
        let column = &row.columns()[i];
        ReservoirError::query_message(format!(
            "Failed to decode column '{}' ({}): {e}",
            column.name(),
            column.type_()
        ))
    })
}

/// Non-finite floats have no JSON form and render as strings.
fn float_to_json(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// Render bytes in PostgreSQL's `\x` hex output format.
fn bytea_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
