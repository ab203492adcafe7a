//! SQLite storage backend implementation
//!
//! This module provides a SQLite-based implementation of the `StorageBackend` trait.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Better concurrency for reads during writes
//! - **Connection pooling**: Efficient resource usage
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! ## Limitations
//!
//! - **Concurrency**: Limited concurrent writes, run tasks share a pool of 5
//! - **Replication**: No built-in replication (file-level backups only)

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{BackendHealth, QueryRange, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{
    from_json, group_from_column, group_to_column, millis_to_timestamp, parse_column,
    timestamp_to_millis, to_json,
};
use crate::model::{
    Category, CategoryScore, CollectorConfig, CompositeScore, ExecutionFilter, ExecutionId,
    ExecutionLogEntry, ExecutionOutcome, LastRunSummary, NewExecution, RunStatus, ThresholdRule,
    VersionQuery,
};
use crate::registry::CollectorBundle;
use crate::scoring::aggregate::latest_per_category;

const EXECUTION_COLUMNS: &str = "id, collector, started_at, finished_at, duration_ms, status, \
     success_count, error_count, skipped_count, not_attempted_count, error_message, \
     trigger_type, triggered_by";

const CATEGORY_COLUMNS: &str =
    "instance_id, category, collector, collected_at, score, breached, groups, detail";

const COMPOSITE_COLUMNS: &str = "instance_id, computed_at, composite, status, detail";

/// SQLite storage backend
///
/// This backend stores collectors, the execution log and the score series in
/// a local SQLite database file.
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Create a new SQLite backend
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Run migrations to create tables
    /// 3. Configure SQLite for optimal performance (WAL mode, etc.)
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use dbvitals::storage::sqlite::SqliteBackend;
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = SqliteBackend::new("./dbvitals.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        info!("SQLite connection pool created");

        debug!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    async fn count_rows(&self, table: &str) -> StorageResult<i64> {
        let row: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Ok(row.0)
    }
}

fn optional_millis(row: &SqliteRow, column: &str) -> Option<DateTime<Utc>> {
    row.get::<Option<i64>, _>(column).map(millis_to_timestamp)
}

fn config_from_row(row: &SqliteRow) -> StorageResult<CollectorConfig> {
    let last_status = row
        .get::<Option<String>, _>("last_status")
        .map(|s| parse_column::<RunStatus>(&s, "last_status"))
        .transpose()?;

    Ok(CollectorConfig {
        name: row.get("name"),
        display_name: row.get("display_name"),
        enabled: row.get("enabled"),
        interval_secs: row.get::<i64, _>("interval_secs") as u64,
        timeout_secs: row.get::<i64, _>("timeout_secs") as u64,
        weight: row.get::<i64, _>("weight") as u32,
        parallel_degree: row.get::<i64, _>("parallel_degree") as usize,
        category: parse_column(&row.get::<String, _>("category"), "category")?,
        execution_order: row.get::<i64, _>("execution_order") as i32,
        default_score: row.get::<i64, _>("default_score") as u8,
        group_combine: parse_column(&row.get::<String, _>("group_combine"), "group_combine")?,
        last_run: LastRunSummary {
            started_at: optional_millis(row, "last_started_at"),
            finished_at: optional_millis(row, "last_finished_at"),
            duration_ms: row
                .get::<Option<i64>, _>("last_duration_ms")
                .map(|v| v as u64),
            instances_processed: row.get::<i64, _>("last_instances_processed") as u32,
            status: last_status,
            last_error: row.get("last_error"),
        },
    })
}

fn rule_from_row(row: &SqliteRow) -> StorageResult<ThresholdRule> {
    Ok(ThresholdRule {
        name: row.get("name"),
        threshold: row.get("threshold"),
        operator: parse_column(&row.get::<String, _>("operator"), "operator")?,
        score: row.get::<i64, _>("score") as u8,
        action: parse_column(&row.get::<String, _>("action"), "action")?,
        default_score: row.get::<Option<i64>, _>("default_score").map(|v| v as u8),
        evaluation_order: row.get::<i64, _>("evaluation_order") as i32,
        group: group_from_column(row.get("rule_group")),
        active: row.get("active"),
    })
}

fn query_from_row(row: &SqliteRow) -> StorageResult<VersionQuery> {
    let max_version = row
        .get::<Option<String>, _>("max_version")
        .map(|v| parse_column(&v, "max_version"))
        .transpose()?;

    Ok(VersionQuery {
        min_version: parse_column(&row.get::<String, _>("min_version"), "min_version")?,
        max_version,
        template: row.get("template"),
        priority: row.get::<i64, _>("priority") as i32,
        active: row.get("active"),
    })
}

fn execution_from_row(row: &SqliteRow) -> StorageResult<ExecutionLogEntry> {
    Ok(ExecutionLogEntry {
        id: row.get("id"),
        collector: row.get("collector"),
        started_at: millis_to_timestamp(row.get("started_at")),
        finished_at: optional_millis(row, "finished_at"),
        duration_ms: row.get::<Option<i64>, _>("duration_ms").map(|v| v as u64),
        status: parse_column(&row.get::<String, _>("status"), "status")?,
        success_count: row.get::<i64, _>("success_count") as u32,
        error_count: row.get::<i64, _>("error_count") as u32,
        skipped_count: row.get::<i64, _>("skipped_count") as u32,
        not_attempted_count: row.get::<i64, _>("not_attempted_count") as u32,
        error_message: row.get("error_message"),
        trigger: parse_column(&row.get::<String, _>("trigger_type"), "trigger_type")?,
        triggered_by: row.get("triggered_by"),
    })
}

fn category_score_from_row(row: &SqliteRow) -> StorageResult<CategoryScore> {
    Ok(CategoryScore {
        instance_id: row.get("instance_id"),
        category: parse_column(&row.get::<String, _>("category"), "category")?,
        collector: row.get("collector"),
        collected_at: millis_to_timestamp(row.get("collected_at")),
        score: row.get::<i64, _>("score") as u8,
        breached: row.get("breached"),
        groups: from_json(&row.get::<String, _>("groups"), "groups")?,
        detail: from_json(&row.get::<String, _>("detail"), "detail")?,
    })
}

fn composite_from_row(row: &SqliteRow) -> StorageResult<CompositeScore> {
    Ok(CompositeScore {
        instance_id: row.get("instance_id"),
        computed_at: millis_to_timestamp(row.get("computed_at")),
        composite: row.get("composite"),
        status: parse_column(&row.get::<String, _>("status"), "status")?,
        detail: from_json(&row.get::<String, _>("detail"), "detail")?,
    })
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self))]
    async fn load_collectors(&self) -> StorageResult<Vec<CollectorBundle>> {
        let rows = sqlx::query("SELECT * FROM collectors ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        // Rules are rewritten on every save, so rowid keeps the saved order
        let rule_rows = sqlx::query("SELECT * FROM threshold_rules ORDER BY collector, rowid")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let query_rows = sqlx::query("SELECT * FROM version_queries ORDER BY collector, id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let mut rules: HashMap<String, Vec<ThresholdRule>> = HashMap::new();
        for row in &rule_rows {
            rules
                .entry(row.get("collector"))
                .or_default()
                .push(rule_from_row(row)?);
        }

        let mut queries: HashMap<String, Vec<VersionQuery>> = HashMap::new();
        for row in &query_rows {
            queries
                .entry(row.get("collector"))
                .or_default()
                .push(query_from_row(row)?);
        }

        let bundles = rows
            .iter()
            .map(|row| {
                let config = config_from_row(row)?;
                Ok(CollectorBundle {
                    rules: rules.remove(&config.name).unwrap_or_default(),
                    queries: queries.remove(&config.name).unwrap_or_default(),
                    config,
                })
            })
            .collect::<StorageResult<Vec<_>>>()?;

        debug!("loaded {} collectors", bundles.len());
        Ok(bundles)
    }

    #[instrument(skip(self, bundle), fields(collector = %bundle.name()))]
    async fn save_collector(&self, bundle: &CollectorBundle) -> StorageResult<()> {
        let config = &bundle.config;
        let last = &config.last_run;

        // Rules and queries are replaced as a whole in one transaction
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO collectors (
                name, display_name, enabled, interval_secs, timeout_secs, weight,
                parallel_degree, category, execution_order, default_score, group_combine,
                last_started_at, last_finished_at, last_duration_ms,
                last_instances_processed, last_status, last_error
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (name) DO UPDATE SET
                display_name = excluded.display_name,
                enabled = excluded.enabled,
                interval_secs = excluded.interval_secs,
                timeout_secs = excluded.timeout_secs,
                weight = excluded.weight,
                parallel_degree = excluded.parallel_degree,
                category = excluded.category,
                execution_order = excluded.execution_order,
                default_score = excluded.default_score,
                group_combine = excluded.group_combine,
                last_started_at = excluded.last_started_at,
                last_finished_at = excluded.last_finished_at,
                last_duration_ms = excluded.last_duration_ms,
                last_instances_processed = excluded.last_instances_processed,
                last_status = excluded.last_status,
                last_error = excluded.last_error
            "#,
        )
        .bind(&config.name)
        .bind(&config.display_name)
        .bind(config.enabled)
        .bind(config.interval_secs as i64)
        .bind(config.timeout_secs as i64)
        .bind(i64::from(config.weight))
        .bind(config.parallel_degree as i64)
        .bind(config.category.as_str())
        .bind(i64::from(config.execution_order))
        .bind(i64::from(config.default_score))
        .bind(config.group_combine.as_str())
        .bind(last.started_at.as_ref().map(timestamp_to_millis))
        .bind(last.finished_at.as_ref().map(timestamp_to_millis))
        .bind(last.duration_ms.map(|v| v as i64))
        .bind(i64::from(last.instances_processed))
        .bind(last.status.map(|s| s.as_str()))
        .bind(&last.last_error)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        sqlx::query("DELETE FROM threshold_rules WHERE collector = ?")
            .bind(&config.name)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        for rule in &bundle.rules {
            sqlx::query(
                r#"
                INSERT INTO threshold_rules (
                    collector, name, threshold, operator, score, action,
                    default_score, evaluation_order, rule_group, active
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&config.name)
            .bind(&rule.name)
            .bind(rule.threshold)
            .bind(rule.operator.as_str())
            .bind(i64::from(rule.score))
            .bind(rule.action.as_str())
            .bind(rule.default_score.map(i64::from))
            .bind(i64::from(rule.evaluation_order))
            .bind(group_to_column(rule.group.as_deref()))
            .bind(rule.active)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        }

        sqlx::query("DELETE FROM version_queries WHERE collector = ?")
            .bind(&config.name)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        for query in &bundle.queries {
            sqlx::query(
                r#"
                INSERT INTO version_queries (
                    collector, min_version, max_version, template, priority, active
                )
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&config.name)
            .bind(query.min_version.to_string())
            .bind(query.max_version.as_ref().map(|v| v.to_string()))
            .bind(&query.template)
            .bind(i64::from(query.priority))
            .bind(query.active)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        debug!(
            "saved collector with {} rules and {} queries",
            bundle.rules.len(),
            bundle.queries.len()
        );
        Ok(())
    }

    #[instrument(skip(self, summary))]
    async fn record_last_run(
        &self,
        collector: &str,
        summary: &LastRunSummary,
    ) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE collectors SET
                last_started_at = ?,
                last_finished_at = ?,
                last_duration_ms = ?,
                last_instances_processed = ?,
                last_status = ?,
                last_error = ?
            WHERE name = ?
            "#,
        )
        .bind(summary.started_at.as_ref().map(timestamp_to_millis))
        .bind(summary.finished_at.as_ref().map(timestamp_to_millis))
        .bind(summary.duration_ms.map(|v| v as i64))
        .bind(i64::from(summary.instances_processed))
        .bind(summary.status.map(|s| s.as_str()))
        .bind(&summary.last_error)
        .bind(collector)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("collector {collector}")));
        }
        Ok(())
    }

    #[instrument(skip(self, new), fields(collector = %new.collector))]
    async fn start_execution(&self, new: &NewExecution) -> StorageResult<ExecutionLogEntry> {
        let result = sqlx::query(
            r#"
            INSERT INTO execution_log (collector, started_at, status, trigger_type, triggered_by)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.collector)
        .bind(timestamp_to_millis(&new.started_at))
        .bind(RunStatus::Running.as_str())
        .bind(new.trigger.as_str())
        .bind(&new.triggered_by)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let mut entry = ExecutionLogEntry::open(result.last_insert_rowid(), new);
        entry.started_at = millis_to_timestamp(timestamp_to_millis(&new.started_at));

        debug!("opened execution #{}", entry.id);
        Ok(entry)
    }

    #[instrument(skip(self, outcome))]
    async fn finish_execution(
        &self,
        id: ExecutionId,
        outcome: &ExecutionOutcome,
    ) -> StorageResult<ExecutionLogEntry> {
        let mut entry = self
            .get_execution(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("execution #{id}")))?;

        if entry.status != RunStatus::Running {
            return Err(StorageError::Conflict(format!(
                "execution #{id} is already finalized"
            )));
        }

        entry.finalize(outcome);

        let result = sqlx::query(
            r#"
            UPDATE execution_log SET
                finished_at = ?,
                duration_ms = ?,
                status = ?,
                success_count = ?,
                error_count = ?,
                skipped_count = ?,
                not_attempted_count = ?,
                error_message = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(entry.finished_at.as_ref().map(timestamp_to_millis))
        .bind(entry.duration_ms.map(|v| v as i64))
        .bind(entry.status.as_str())
        .bind(i64::from(entry.success_count))
        .bind(i64::from(entry.error_count))
        .bind(i64::from(entry.skipped_count))
        .bind(i64::from(entry.not_attempted_count))
        .bind(&entry.error_message)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        // Lost a race against another finalizer
        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict(format!(
                "execution #{id} is already finalized"
            )));
        }

        entry.finished_at = entry
            .finished_at
            .map(|at| millis_to_timestamp(timestamp_to_millis(&at)));
        Ok(entry)
    }

    #[instrument(skip(self))]
    async fn get_execution(&self, id: ExecutionId) -> StorageResult<Option<ExecutionLogEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM execution_log WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        row.as_ref().map(execution_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn query_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> StorageResult<Vec<ExecutionLogEntry>> {
        let sql = format!(
            r#"
            SELECT {EXECUTION_COLUMNS}
            FROM execution_log
            WHERE (?1 IS NULL OR collector = ?1)
              AND (?2 IS NULL OR status = ?2)
              AND (?3 IS NULL OR started_at >= ?3)
              AND (?4 IS NULL OR started_at <= ?4)
            ORDER BY started_at DESC, id DESC
            LIMIT ?5
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(&filter.collector)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.start.as_ref().map(timestamp_to_millis))
            .bind(filter.end.as_ref().map(timestamp_to_millis))
            .bind(filter.limit.map(|l| l as i64).unwrap_or(-1))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let entries = rows
            .iter()
            .map(execution_from_row)
            .collect::<StorageResult<Vec<_>>>()?;

        debug!("query returned {} executions", entries.len());
        Ok(entries)
    }

    #[instrument(skip(self, score), fields(instance = %score.instance_id, category = %score.category))]
    async fn insert_category_score(&self, score: &CategoryScore) -> StorageResult<()> {
        sqlx::query(&format!(
            "INSERT INTO category_scores ({CATEGORY_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&score.instance_id)
        .bind(score.category.as_str())
        .bind(&score.collector)
        .bind(timestamp_to_millis(&score.collected_at))
        .bind(i64::from(score.score))
        .bind(score.breached)
        .bind(to_json(&score.groups, "groups")?)
        .bind(to_json(&score.detail, "detail")?)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn latest_category_scores(&self, instance_id: &str) -> StorageResult<Vec<CategoryScore>> {
        let sql = format!(
            r#"
            SELECT {CATEGORY_COLUMNS}
            FROM category_scores s
            JOIN (
                SELECT category AS latest_category, MAX(collected_at) AS latest_at
                FROM category_scores
                WHERE instance_id = ?1
                GROUP BY category
            ) latest ON s.category = latest.latest_category AND s.collected_at = latest.latest_at
            WHERE s.instance_id = ?1
            ORDER BY s.id
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(instance_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let scores = rows
            .iter()
            .map(category_score_from_row)
            .collect::<StorageResult<Vec<_>>>()?;

        // Two collectors of one category may share a millisecond
        Ok(latest_per_category(&scores)
            .into_values()
            .cloned()
            .collect())
    }

    #[instrument(skip(self), fields(instance = %query.instance_id))]
    async fn query_category_scores(
        &self,
        query: &QueryRange,
        category: Category,
    ) -> StorageResult<Vec<CategoryScore>> {
        let sql = format!(
            r#"
            SELECT {CATEGORY_COLUMNS}
            FROM category_scores
            WHERE instance_id = ? AND category = ? AND collected_at >= ? AND collected_at <= ?
            ORDER BY collected_at ASC, id ASC
            LIMIT ?
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(&query.instance_id)
            .bind(category.as_str())
            .bind(timestamp_to_millis(&query.start))
            .bind(timestamp_to_millis(&query.end))
            .bind(query.limit.map(|l| l as i64).unwrap_or(-1))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        rows.iter().map(category_score_from_row).collect()
    }

    #[instrument(skip(self, score), fields(instance = %score.instance_id))]
    async fn insert_composite_score(&self, score: &CompositeScore) -> StorageResult<()> {
        sqlx::query(&format!(
            "INSERT INTO composite_scores ({COMPOSITE_COLUMNS}) VALUES (?, ?, ?, ?, ?)"
        ))
        .bind(&score.instance_id)
        .bind(timestamp_to_millis(&score.computed_at))
        .bind(score.composite)
        .bind(score.status.as_str())
        .bind(to_json(&score.detail, "detail")?)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn latest_composite(&self, instance_id: &str) -> StorageResult<Option<CompositeScore>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {COMPOSITE_COLUMNS}
            FROM composite_scores
            WHERE instance_id = ?
            ORDER BY computed_at DESC, id DESC
            LIMIT 1
            "#
        ))
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        row.as_ref().map(composite_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn latest_composites(&self) -> StorageResult<Vec<CompositeScore>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COMPOSITE_COLUMNS}
            FROM composite_scores
            WHERE id IN (
                SELECT MAX(c.id)
                FROM composite_scores c
                JOIN (
                    SELECT instance_id AS latest_instance, MAX(computed_at) AS latest_at
                    FROM composite_scores
                    GROUP BY instance_id
                ) latest ON c.instance_id = latest.latest_instance AND c.computed_at = latest.latest_at
                GROUP BY c.instance_id
            )
            ORDER BY instance_id
            "#
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        rows.iter().map(composite_from_row).collect()
    }

    #[instrument(skip(self), fields(instance = %query.instance_id))]
    async fn query_composite_scores(
        &self,
        query: &QueryRange,
    ) -> StorageResult<Vec<CompositeScore>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COMPOSITE_COLUMNS}
            FROM composite_scores
            WHERE instance_id = ? AND computed_at >= ? AND computed_at <= ?
            ORDER BY computed_at ASC, id ASC
            LIMIT ?
            "#
        ))
        .bind(&query.instance_id)
        .bind(timestamp_to_millis(&query.start))
        .bind(timestamp_to_millis(&query.end))
        .bind(query.limit.map(|l| l as i64).unwrap_or(-1))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        rows.iter().map(composite_from_row).collect()
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn cleanup_old_scores(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let before_millis = timestamp_to_millis(&before);

        info!("cleaning up scores older than {}", before);

        let categories = sqlx::query("DELETE FROM category_scores WHERE collected_at < ?")
            .bind(before_millis)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let composites = sqlx::query("DELETE FROM composite_scores WHERE computed_at < ?")
            .bind(before_millis)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let deleted = (categories.rows_affected() + composites.rows_affected()) as usize;
        info!("deleted {} old scores", deleted);

        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<BackendHealth> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(BackendHealth {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(BackendHealth {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_stats(&self) -> StorageResult<String> {
        let collectors = self.count_rows("collectors").await?;
        let executions = self.count_rows("execution_log").await?;
        let category_rows = self.count_rows("category_scores").await?;
        let composite_rows = self.count_rows("composite_scores").await?;

        let range: (Option<i64>, Option<i64>) =
            sqlx::query_as("SELECT MIN(collected_at), MAX(collected_at) FROM category_scores")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let file_size = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);

        let file_size_mb = file_size as f64 / 1_000_000.0;

        let time_range = match range {
            (Some(old), Some(new)) => format!(
                "{} to {}",
                millis_to_timestamp(old).format("%Y-%m-%d"),
                millis_to_timestamp(new).format("%Y-%m-%d")
            ),
            _ => "no data".to_string(),
        };

        Ok(format!(
            "SQLite: {} collectors, {} executions, {} category scores, {} composites, \
             {:.2} MB on disk, time range: {}",
            collectors, executions, category_rows, composite_rows, file_size_mb, time_range
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
