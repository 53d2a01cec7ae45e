use std::fmt;

use async_trait::async_trait;

use crate::connection_manager::{BackendError, ConnectionBackend};

const NULL_DISPLAY: &str = "NULL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricKind {
    Processlist,
    Locks,
    MemoryByUser,
    MemoryGlobal,
    MemoryByArea,
    TempTableMemory,
    Checkpoint,
    ErrorLog,
    StatementCounts,
    InnodbCounters,
}

impl MetricKind {
    pub const ALL: [Self; 10] = [
        Self::Processlist,
        Self::Locks,
        Self::MemoryByUser,
        Self::MemoryGlobal,
        Self::MemoryByArea,
        Self::TempTableMemory,
        Self::Checkpoint,
        Self::ErrorLog,
        Self::StatementCounts,
        Self::InnodbCounters,
    ];

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Processlist => "processlist",
            Self::Locks => "locks",
            Self::MemoryByUser => "memory-by-user",
            Self::MemoryGlobal => "memory-global",
            Self::MemoryByArea => "memory-by-area",
            Self::TempTableMemory => "temptable-memory",
            Self::Checkpoint => "checkpoint",
            Self::ErrorLog => "error-log",
            Self::StatementCounts => "statement-counts",
            Self::InnodbCounters => "innodb-counters",
        }
    }

    /// Fixed column schema of the rows this kind produces.
    #[must_use]
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Self::Processlist => &[
                "command",
                "thd_id",
                "conn_id",
                "pid",
                "state",
                "user",
                "db",
                "current_statement",
                "statement_latency",
                "lock_latency",
            ],
            Self::Locks => &[
                "waiting_trx_id",
                "waiting_thread",
                "waiting_query",
                "blocking_trx_id",
                "blocking_thread",
                "blocking_query",
            ],
            Self::MemoryByUser => &["user", "current_allocated", "current_max_alloc"],
            Self::MemoryGlobal => &["total_allocated"],
            Self::MemoryByArea => &["code_area", "current_alloc", "current_alloc_bytes"],
            Self::TempTableMemory => &["event_name", "current_alloc", "high_alloc"],
            Self::Checkpoint => &["checkpoint_age", "checkpoint_capacity", "checkpoint_age_pct"],
            Self::ErrorLog => &["logged", "thread_id", "prio", "error_code", "subsystem", "data"],
            Self::StatementCounts => &["selects", "inserts", "updates", "deletes"],
            Self::InnodbCounters => &["variable_name", "variable_value"],
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One result row; `None` is a SQL `NULL` or a column the server did not return.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetricRow {
    pub values: Vec<Option<String>>,
}

impl MetricRow {
    #[must_use]
    pub fn new(values: Vec<Option<String>>) -> Self {
        Self { values }
    }

    #[must_use]
    pub fn from_strs(values: &[&str]) -> Self {
        Self::new(values.iter().map(|value| Some((*value).to_string())).collect())
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&str> {
        self.values.get(index).and_then(Option::as_deref)
    }

    #[must_use]
    pub fn display(&self, index: usize) -> &str {
        self.get(index).unwrap_or(NULL_DISPLAY)
    }

    #[must_use]
    pub fn matches(&self, filter: &str, case_sensitive: bool) -> bool {
        if filter.is_empty() {
            return true;
        }
        if case_sensitive {
            return self.values.iter().flatten().any(|value| value.contains(filter));
        }
        let needle = filter.to_lowercase();
        self.values
            .iter()
            .flatten()
            .any(|value| value.to_lowercase().contains(&needle))
    }
}

#[must_use]
pub fn filter_rows<'a>(rows: &'a [MetricRow], filter: &str, case_sensitive: bool) -> Vec<&'a MetricRow> {
    rows.iter()
        .filter(|row| row.matches(filter, case_sensitive))
        .collect()
}

#[async_trait]
pub trait MetricBackend: ConnectionBackend {
    async fn fetch_metric(
        &self,
        connection: &Self::Connection,
        kind: MetricKind,
    ) -> Result<Vec<MetricRow>, BackendError>;
}
