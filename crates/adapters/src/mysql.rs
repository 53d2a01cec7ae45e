use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts, Row, SslOpts, Value};
use nextop_core::connection_manager::{BackendError, BackendErrorKind, ConnectionBackend};
use nextop_core::instance::Instance;
use nextop_core::metric::{MetricBackend, MetricKind, MetricRow};
use tracing::debug;

use crate::catalogue::query_for;
use crate::dsn::{parse_dsn, Address, DsnError, DsnParts, TlsSetting};

pub const PASSWORD_ENV: &str = "NEXTOP_DB_PASSWORD";

// Enough for every metric kind of one view to run at once.
const POOL_MAX_CONNECTIONS: usize = 6;

/// `mysql_async` backed client for MySQL and MariaDB.
#[derive(Debug, Clone, Default)]
pub struct MysqlBackend;

/// Per-instance pool; clones share the same connections.
#[derive(Debug, Clone)]
pub struct MysqlHandle {
    pool: Pool,
}

#[async_trait]
impl ConnectionBackend for MysqlBackend {
    type Connection = MysqlHandle;

    async fn connect(&self, instance: &Instance) -> Result<Self::Connection, BackendError> {
        let opts = opts_from_instance(instance).map_err(dsn_error)?;
        let pool = Pool::new(opts);

        // Open one connection now so bad credentials fail here, not on first fetch.
        match pool.get_conn().await {
            Ok(conn) => {
                drop(conn);
                debug!(instance = %instance.connection_name, dbms = %instance.dbms, "pool ready");
                Ok(MysqlHandle { pool })
            }
            Err(error) => {
                let _ = pool.disconnect().await;
                Err(to_backend_error(&error))
            }
        }
    }

    async fn ping(&self, connection: &Self::Connection) -> Result<(), BackendError> {
        let mut conn = connection
            .pool
            .get_conn()
            .await
            .map_err(|error| to_backend_error(&error))?;
        conn.ping().await.map_err(|error| to_backend_error(&error))
    }

    async fn disconnect(&self, connection: Self::Connection) -> Result<(), BackendError> {
        connection
            .pool
            .disconnect()
            .await
            .map_err(|error| to_backend_error(&error))
    }
}

#[async_trait]
impl MetricBackend for MysqlBackend {
    async fn fetch_metric(
        &self,
        connection: &Self::Connection,
        kind: MetricKind,
    ) -> Result<Vec<MetricRow>, BackendError> {
        let mut conn = connection
            .pool
            .get_conn()
            .await
            .map_err(|error| to_backend_error(&error))?;
        let rows: Vec<Row> = conn
            .query(query_for(kind))
            .await
            .map_err(|error| to_backend_error(&error))?;

        let width = kind.columns().len();
        Ok(rows
            .into_iter()
            .map(|row| row_to_metric_row(row, width))
            .collect())
    }
}

pub(crate) fn opts_from_instance(instance: &Instance) -> Result<Opts, DsnError> {
    let raw = instance.dsn.expose();
    let builder = if raw.starts_with("mysql://") {
        let opts = Opts::from_url(raw).map_err(|error| DsnError::InvalidUrl(error.to_string()))?;
        let has_password = opts.pass().is_some_and(|password| !password.is_empty());
        let builder = OptsBuilder::from_opts(opts);
        if has_password {
            builder
        } else {
            builder.pass(env_password())
        }
    } else {
        builder_from_parts(parse_dsn(raw)?)
    };

    let constraints = PoolConstraints::new(0, POOL_MAX_CONNECTIONS).unwrap_or_default();
    Ok(Opts::from(
        builder.pool_opts(PoolOpts::default().with_constraints(constraints)),
    ))
}

fn builder_from_parts(parts: DsnParts) -> OptsBuilder {
    let mut builder = OptsBuilder::default()
        .user(parts.user)
        .pass(parts.password.or_else(env_password))
        .db_name(parts.database);

    builder = match parts.address {
        Address::Tcp { host, port } => builder.ip_or_hostname(host).tcp_port(port),
        Address::Socket(path) => builder.socket(Some(path.to_string_lossy().into_owned())),
    };

    if let Some(ssl_opts) = ssl_opts_for(parts.tls) {
        builder = builder.ssl_opts(ssl_opts);
    }
    builder
}

fn ssl_opts_for(tls: TlsSetting) -> Option<SslOpts> {
    match tls {
        TlsSetting::Disabled => None,
        TlsSetting::Verified => Some(SslOpts::default()),
        TlsSetting::SkipVerify => Some(
            SslOpts::default()
                .with_danger_accept_invalid_certs(true)
                .with_danger_skip_domain_validation(true),
        ),
    }
}

fn env_password() -> Option<String> {
    std::env::var(PASSWORD_ENV)
        .ok()
        .filter(|password| !password.is_empty())
}

fn row_to_metric_row(row: Row, width: usize) -> MetricRow {
    values_to_metric_row(Row::unwrap(row), width)
}

fn values_to_metric_row(values: Vec<Value>, width: usize) -> MetricRow {
    let mut values = values
        .into_iter()
        .map(mysql_value_to_string)
        .collect::<Vec<_>>();
    // Missing trailing columns read as NULL.
    values.resize(width.max(values.len()), None);
    MetricRow::new(values)
}

fn mysql_value_to_string(value: Value) -> Option<String> {
    let rendered = match value {
        Value::NULL => return None,
        Value::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Value::Int(value) => value.to_string(),
        Value::UInt(value) => value.to_string(),
        Value::Float(value) => value.to_string(),
        Value::Double(value) => value.to_string(),
        Value::Date(year, month, day, hour, minute, second, micros) => format!(
            "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{micros:06}"
        ),
        Value::Time(is_negative, days, hours, minutes, seconds, micros) => {
            let sign = if is_negative { "-" } else { "" };
            format!("{sign}{days:03} {hours:02}:{minutes:02}:{seconds:02}.{micros:06}")
        }
    };
    Some(rendered)
}

/// Maps a MySQL server error code onto the failure kinds the core logs.
#[must_use]
pub fn classify_server_code(code: u16) -> BackendErrorKind {
    match code {
        // ER_DBACCESS_DENIED_ERROR, ER_ACCESS_DENIED_ERROR, ER_ACCESS_DENIED_NO_PASSWORD_ERROR
        1044 | 1045 | 1698 => BackendErrorKind::Authentication,
        // ER_UNKNOWN_TABLE, ER_NO_SUCH_TABLE, ER_UNKNOWN_SYSTEM_VARIABLE
        1109 | 1146 | 1193 => BackendErrorKind::Unsupported,
        // ER_CON_COUNT_ERROR, ER_SERVER_SHUTDOWN
        1040 | 1053 => BackendErrorKind::Network,
        _ => BackendErrorKind::Query,
    }
}

fn to_backend_error(error: &mysql_async::Error) -> BackendError {
    let kind = match error {
        mysql_async::Error::Server(server) => classify_server_code(server.code),
        mysql_async::Error::Io(_) | mysql_async::Error::Driver(_) => BackendErrorKind::Network,
        _ => BackendErrorKind::Other,
    };
    BackendError::new(kind, error.to_string())
}

fn dsn_error(error: DsnError) -> BackendError {
    BackendError::new(BackendErrorKind::Other, format!("invalid DSN: {error}"))
}
