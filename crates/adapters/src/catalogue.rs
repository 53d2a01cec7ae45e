//! Read-only introspection queries, one per metric kind.
//!
//! Column order in every query matches `MetricKind::columns`.

use nextop_core::metric::MetricKind;

const PROCESSLIST: &str = "\
SELECT pps.PROCESSLIST_COMMAND AS command,
       pps.THREAD_ID AS thd_id,
       pps.PROCESSLIST_ID AS conn_id,
       conattr_pid.ATTR_VALUE AS pid,
       pps.PROCESSLIST_STATE AS state,
       IF(pps.NAME IN ('thread/sql/one_connection', 'thread/thread_pool/tp_one_connection'),
          CONCAT(pps.PROCESSLIST_USER, '@', pps.PROCESSLIST_HOST),
          REPLACE(pps.NAME, 'thread/', '')) AS user,
       pps.PROCESSLIST_DB AS db,
       IF(CHAR_LENGTH(pps.PROCESSLIST_INFO) > 64,
          REPLACE(CONCAT(LEFT(pps.PROCESSLIST_INFO, 30), ' ... ', RIGHT(pps.PROCESSLIST_INFO, 30)), '\\n', ' '),
          REPLACE(pps.PROCESSLIST_INFO, '\\n', ' ')) AS current_statement,
       IF(ISNULL(esc.END_EVENT_ID), esc.TIMER_WAIT, NULL) AS statement_latency,
       esc.LOCK_TIME AS lock_latency
FROM performance_schema.threads pps
LEFT JOIN performance_schema.events_statements_current esc
       ON pps.THREAD_ID = esc.THREAD_ID
LEFT JOIN performance_schema.session_connect_attrs conattr_pid
       ON conattr_pid.PROCESSLIST_ID = pps.PROCESSLIST_ID AND conattr_pid.ATTR_NAME = '_pid'
WHERE pps.PROCESSLIST_ID IS NOT NULL
  AND pps.PROCESSLIST_COMMAND <> 'Daemon'
ORDER BY IF(ISNULL(esc.END_EVENT_ID), esc.TIMER_WAIT, 0) DESC";

const LOCKS: &str = "\
SELECT r.trx_id AS waiting_trx_id,
       r.trx_mysql_thread_id AS waiting_thread,
       r.trx_query AS waiting_query,
       b.trx_id AS blocking_trx_id,
       b.trx_mysql_thread_id AS blocking_thread,
       b.trx_query AS blocking_query
FROM performance_schema.data_lock_waits w
INNER JOIN information_schema.innodb_trx b
        ON b.trx_id = w.blocking_engine_transaction_id
INNER JOIN information_schema.innodb_trx r
        ON r.trx_id = w.requesting_engine_transaction_id";

const MEMORY_BY_USER: &str = "\
SELECT user, current_allocated, current_max_alloc
FROM sys.memory_by_user_by_current_bytes
WHERE user <> 'background'";

const MEMORY_GLOBAL: &str = "SELECT total_allocated FROM sys.memory_global_total";

const MEMORY_BY_AREA: &str = "\
SELECT SUBSTRING_INDEX(event_name, '/', 2) AS code_area,
       sys.format_bytes(SUM(current_alloc)) AS current_alloc,
       SUM(current_alloc) AS current_alloc_bytes
FROM sys.x$memory_global_by_current_bytes
GROUP BY SUBSTRING_INDEX(event_name, '/', 2)
ORDER BY SUM(current_alloc) DESC";

const TEMPTABLE_MEMORY: &str = "\
SELECT event_name,
       sys.format_bytes(CURRENT_NUMBER_OF_BYTES_USED) AS current_alloc,
       sys.format_bytes(HIGH_NUMBER_OF_BYTES_USED) AS high_alloc
FROM performance_schema.memory_summary_global_by_event_name
WHERE event_name LIKE 'memory/temptable/%'";

// Redo capacity is `innodb_redo_log_capacity` on 8.0.30+, file size times file count before.
const CHECKPOINT: &str = "\
SELECT sys.format_bytes(lag.age) AS checkpoint_age,
       sys.format_bytes(cap.capacity) AS checkpoint_capacity,
       ROUND(lag.age / cap.capacity * 100) AS checkpoint_age_pct
FROM (
  SELECT STORAGE_ENGINES->>'$.\"InnoDB\".\"LSN\"' - STORAGE_ENGINES->>'$.\"InnoDB\".\"LSN_checkpoint\"' AS age
  FROM performance_schema.log_status
) lag
CROSS JOIN (
  SELECT COALESCE(
    (SELECT VARIABLE_VALUE FROM performance_schema.global_variables
      WHERE VARIABLE_NAME = 'innodb_redo_log_capacity'),
    (SELECT VARIABLE_VALUE FROM performance_schema.global_variables
      WHERE VARIABLE_NAME = 'innodb_log_file_size')
    * (SELECT VARIABLE_VALUE FROM performance_schema.global_variables
      WHERE VARIABLE_NAME = 'innodb_log_files_in_group')
  ) AS capacity
) cap";

const ERROR_LOG: &str = "\
SELECT LOGGED AS logged, THREAD_ID AS thread_id, PRIO AS prio,
       ERROR_CODE AS error_code, SUBSYSTEM AS subsystem, DATA AS data
FROM performance_schema.error_log
ORDER BY LOGGED DESC";

const STATEMENT_COUNTS: &str = "\
SELECT SUM(IF(digest_text LIKE 'SELECT%', count_star, 0)) AS selects,
       SUM(IF(digest_text LIKE 'INSERT%', count_star, 0)) AS inserts,
       SUM(IF(digest_text LIKE 'UPDATE%', count_star, 0)) AS updates,
       SUM(IF(digest_text LIKE 'DELETE%', count_star, 0)) AS deletes
FROM performance_schema.events_statements_summary_by_digest";

const INNODB_COUNTERS: &str = "\
SELECT LOWER(VARIABLE_NAME) AS variable_name, VARIABLE_VALUE AS variable_value
FROM performance_schema.global_status
WHERE LOWER(VARIABLE_NAME) LIKE 'innodb_buffer_pool_read_requests%'
   OR LOWER(VARIABLE_NAME) LIKE 'innodb_buffer_pool_write_requests%'
   OR LOWER(VARIABLE_NAME) IN (
     'innodb_buffer_pool_pages_dirty', 'innodb_buffer_pool_reads',
     'innodb_buffer_pool_writes', 'innodb_os_log_pending_writes',
     'handler_read_first', 'handler_read_key', 'handler_read_next',
     'handler_read_prev', 'handler_read_rnd', 'handler_read_rnd_next',
     'innodb_data_pending_fsyncs', 'innodb_os_log_pending_fsyncs')
ORDER BY variable_name";

#[must_use]
pub fn query_for(kind: MetricKind) -> &'static str {
    match kind {
        MetricKind::Processlist => PROCESSLIST,
        MetricKind::Locks => LOCKS,
        MetricKind::MemoryByUser => MEMORY_BY_USER,
        MetricKind::MemoryGlobal => MEMORY_GLOBAL,
        MetricKind::MemoryByArea => MEMORY_BY_AREA,
        MetricKind::TempTableMemory => TEMPTABLE_MEMORY,
        MetricKind::Checkpoint => CHECKPOINT,
        MetricKind::ErrorLog => ERROR_LOG,
        MetricKind::StatementCounts => STATEMENT_COUNTS,
        MetricKind::InnodbCounters => INNODB_COUNTERS,
    }
}
