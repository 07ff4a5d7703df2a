//! SQLite implementation of [`TriggerBackend`].
//!
//! Timestamps are stored as epoch milliseconds, job data as JSON text.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reel_model::{
    FiredState, FiredTriggerRecord, JobDataMap, JobDetail, JobKey,
    MisfirePolicy, Schedule, Trigger, TriggerKey, TriggerState,
};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteSynchronous,
};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use tracing::info;

use super::backend::{
    AcquireQuery, DueQuery, TriggerBackend, TriggerCandidate, TypeFilter,
    WaitingEntry,
};
use crate::error::{Result, SchedulerError};

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const TRIGGER_COLUMNS: &str = "t.trigger_name, t.trigger_group, t.job_name, \
    t.job_group, t.description, t.priority, t.start_time, t.next_fire_time, \
    t.prev_fire_time, t.repeat_interval_ms, t.repeat_count, t.misfire_policy, \
    t.times_triggered, t.fire_instance_id";

const JOB_COLUMNS: &str = "j.job_type, j.description AS job_description, \
    j.job_data, j.is_durable, j.requests_recovery, j.is_nonconcurrent";

#[derive(Debug, FromRow)]
struct JobRow {
    job_name: String,
    job_group: String,
    job_type: String,
    description: Option<String>,
    job_data: String,
    is_durable: bool,
    requests_recovery: bool,
    is_nonconcurrent: bool,
}

impl TryFrom<JobRow> for JobDetail {
    type Error = SchedulerError;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(JobDetail {
            key: JobKey::new(row.job_name, row.job_group),
            job_type: row.job_type,
            description: row.description,
            data: serde_json::from_str::<JobDataMap>(&row.job_data)?,
            durable: row.is_durable,
            requests_recovery: row.requests_recovery,
            concurrent_execution_disallowed: row.is_nonconcurrent,
        })
    }
}

#[derive(Debug, FromRow)]
struct TriggerRow {
    trigger_name: String,
    trigger_group: String,
    job_name: String,
    job_group: String,
    description: Option<String>,
    priority: i64,
    start_time: i64,
    next_fire_time: Option<i64>,
    prev_fire_time: Option<i64>,
    repeat_interval_ms: Option<i64>,
    repeat_count: Option<i64>,
    misfire_policy: String,
    times_triggered: i64,
    fire_instance_id: Option<String>,
}

impl TryFrom<TriggerRow> for Trigger {
    type Error = SchedulerError;

    fn try_from(row: TriggerRow) -> Result<Self> {
        let schedule = match row.repeat_interval_ms {
            Some(ms) => Schedule::Repeat {
                interval: Duration::from_millis(ms.max(0) as u64),
                repeat_count: row
                    .repeat_count
                    .map(|count| u32::try_from(count).unwrap_or(u32::MAX)),
            },
            None => Schedule::Once,
        };

        Ok(Trigger {
            key: TriggerKey::new(row.trigger_name, row.trigger_group),
            job_key: JobKey::new(row.job_name, row.job_group),
            description: row.description,
            priority: i32::try_from(row.priority).unwrap_or(i32::MAX),
            start_time: from_millis(row.start_time)?,
            next_fire_time: row.next_fire_time.map(from_millis).transpose()?,
            previous_fire_time: row
                .prev_fire_time
                .map(from_millis)
                .transpose()?,
            schedule,
            misfire_policy: MisfirePolicy::from_str(&row.misfire_policy)?,
            times_triggered: u32::try_from(row.times_triggered).unwrap_or(0),
            fire_instance_id: row.fire_instance_id,
        })
    }
}

#[derive(Debug, FromRow)]
struct WaitingRow {
    #[sqlx(flatten)]
    trigger: TriggerRow,
    job_type: String,
    job_description: Option<String>,
    job_data: String,
    is_durable: bool,
    requests_recovery: bool,
    is_nonconcurrent: bool,
}

impl TryFrom<WaitingRow> for WaitingEntry {
    type Error = SchedulerError;

    fn try_from(row: WaitingRow) -> Result<Self> {
        let trigger = Trigger::try_from(row.trigger)?;
        let job = JobDetail {
            key: trigger.job_key.clone(),
            job_type: row.job_type,
            description: row.job_description,
            data: serde_json::from_str::<JobDataMap>(&row.job_data)?,
            durable: row.is_durable,
            requests_recovery: row.requests_recovery,
            concurrent_execution_disallowed: row.is_nonconcurrent,
        };
        Ok(WaitingEntry { job, trigger })
    }
}

#[derive(Debug, FromRow)]
struct CandidateRow {
    trigger_name: String,
    trigger_group: String,
    job_name: String,
    job_group: String,
    job_type: String,
    next_fire_time: i64,
    priority: i64,
    requests_recovery: bool,
}

#[derive(Debug, FromRow)]
struct FiredRow {
    fire_instance_id: String,
    trigger_name: String,
    trigger_group: String,
    job_name: String,
    job_group: String,
    job_type: String,
    state: String,
    fired_at: i64,
    scheduled_at: i64,
    priority: i64,
    requests_recovery: bool,
}

impl TryFrom<FiredRow> for FiredTriggerRecord {
    type Error = SchedulerError;

    fn try_from(row: FiredRow) -> Result<Self> {
        Ok(FiredTriggerRecord {
            fire_instance_id: row.fire_instance_id,
            trigger_key: TriggerKey::new(row.trigger_name, row.trigger_group),
            job_key: JobKey::new(row.job_name, row.job_group),
            job_type: row.job_type,
            state: FiredState::from_str(&row.state)?,
            fired_at: from_millis(row.fired_at)?,
            scheduled_at: from_millis(row.scheduled_at)?,
            priority: i32::try_from(row.priority).unwrap_or(i32::MAX),
            requests_recovery: row.requests_recovery,
        })
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        SchedulerError::Internal(format!("timestamp out of range: {ms}"))
    })
}

fn push_due_filter<'a>(qb: &mut QueryBuilder<'a, Sqlite>, query: &DueQuery) {
    qb.push(" WHERE t.trigger_state = ")
        .push_bind(TriggerState::Waiting.as_str())
        .push(" AND t.next_fire_time <= ")
        .push_bind(query.no_later_than.timestamp_millis())
        .push(" AND (t.misfire_policy = ")
        .push_bind(MisfirePolicy::IgnoreMisfires.as_str())
        .push(" OR t.next_fire_time >= ")
        .push_bind(query.no_earlier_than.timestamp_millis())
        .push(")");
    push_type_filter(qb, &query.types);
}

fn push_type_filter<'a>(qb: &mut QueryBuilder<'a, Sqlite>, filter: &TypeFilter) {
    let (types, negate) = match filter {
        TypeFilter::All => return,
        TypeFilter::Excluding(types) if types.is_empty() => return,
        TypeFilter::Only(types) if types.is_empty() => {
            qb.push(" AND 0");
            return;
        }
        TypeFilter::Excluding(types) => (types, true),
        TypeFilter::Only(types) => (types, false),
    };

    qb.push(if negate {
        " AND j.job_type NOT IN ("
    } else {
        " AND j.job_type IN ("
    });
    let mut separated = qb.separated(", ");
    for job_type in types {
        separated.push_bind(job_type.clone());
    }
    separated.push_unseparated(")");
}

const DUE_FROM: &str = " FROM reel_triggers t JOIN reel_jobs j \
    ON j.job_name = t.job_name AND j.job_group = t.job_group";

const DUE_ORDER: &str = " ORDER BY t.next_fire_time ASC, t.priority DESC, \
    t.trigger_group ASC, t.trigger_name ASC";

/// Durable backend over a SQLite pool.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) a WAL-mode database.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(DEFAULT_BUSY_TIMEOUT)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;
        info!(target: "reel::store", url, max_connections, "opened sqlite job store");
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|err| SchedulerError::persistence("migration failed", err))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl TriggerBackend for SqliteBackend {
    async fn job_exists(&self, key: &JobKey) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM reel_jobs WHERE job_name = ? AND job_group = ?",
        )
        .bind(&key.name)
        .bind(&key.group)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn upsert_job(&self, job: &JobDetail) -> Result<()> {
        let data = serde_json::to_string(&job.data)?;
        sqlx::query(
            "INSERT INTO reel_jobs (job_name, job_group, job_type, description, \
             job_data, is_durable, requests_recovery, is_nonconcurrent) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (job_name, job_group) DO UPDATE SET \
             job_type = excluded.job_type, description = excluded.description, \
             job_data = excluded.job_data, is_durable = excluded.is_durable, \
             requests_recovery = excluded.requests_recovery, \
             is_nonconcurrent = excluded.is_nonconcurrent",
        )
        .bind(&job.key.name)
        .bind(&job.key.group)
        .bind(&job.job_type)
        .bind(&job.description)
        .bind(data)
        .bind(job.durable)
        .bind(job.requests_recovery)
        .bind(job.concurrent_execution_disallowed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn retrieve_job(&self, key: &JobKey) -> Result<Option<JobDetail>> {
        sqlx::query_as::<_, JobRow>(
            "SELECT job_name, job_group, job_type, description, job_data, \
             is_durable, requests_recovery, is_nonconcurrent \
             FROM reel_jobs WHERE job_name = ? AND job_group = ?",
        )
        .bind(&key.name)
        .bind(&key.group)
        .fetch_optional(&self.pool)
        .await?
        .map(JobDetail::try_from)
        .transpose()
    }

    async fn delete_job(&self, key: &JobKey) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM reel_triggers WHERE job_name = ? AND job_group = ?",
        )
        .bind(&key.name)
        .bind(&key.group)
        .execute(&mut *tx)
        .await?;
        let result = sqlx::query(
            "DELETE FROM reel_jobs WHERE job_name = ? AND job_group = ?",
        )
        .bind(&key.name)
        .bind(&key.group)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn trigger_exists(&self, key: &TriggerKey) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM reel_triggers \
             WHERE trigger_name = ? AND trigger_group = ?",
        )
        .bind(&key.name)
        .bind(&key.group)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn upsert_trigger(
        &self,
        trigger: &Trigger,
        state: TriggerState,
    ) -> Result<()> {
        let (interval_ms, repeat_count) = match trigger.schedule {
            Schedule::Once => (None, None),
            Schedule::Repeat {
                interval,
                repeat_count,
            } => (
                Some(i64::try_from(interval.as_millis()).unwrap_or(i64::MAX)),
                repeat_count.map(i64::from),
            ),
        };

        sqlx::query(
            "INSERT INTO reel_triggers (trigger_name, trigger_group, job_name, \
             job_group, description, priority, trigger_state, start_time, \
             next_fire_time, prev_fire_time, repeat_interval_ms, repeat_count, \
             misfire_policy, times_triggered, fire_instance_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (trigger_name, trigger_group) DO UPDATE SET \
             job_name = excluded.job_name, job_group = excluded.job_group, \
             description = excluded.description, priority = excluded.priority, \
             trigger_state = excluded.trigger_state, \
             start_time = excluded.start_time, \
             next_fire_time = excluded.next_fire_time, \
             prev_fire_time = excluded.prev_fire_time, \
             repeat_interval_ms = excluded.repeat_interval_ms, \
             repeat_count = excluded.repeat_count, \
             misfire_policy = excluded.misfire_policy, \
             times_triggered = excluded.times_triggered, \
             fire_instance_id = excluded.fire_instance_id",
        )
        .bind(&trigger.key.name)
        .bind(&trigger.key.group)
        .bind(&trigger.job_key.name)
        .bind(&trigger.job_key.group)
        .bind(&trigger.description)
        .bind(i64::from(trigger.priority))
        .bind(state.as_str())
        .bind(trigger.start_time.timestamp_millis())
        .bind(trigger.next_fire_time.map(|t| t.timestamp_millis()))
        .bind(trigger.previous_fire_time.map(|t| t.timestamp_millis()))
        .bind(interval_ms)
        .bind(repeat_count)
        .bind(trigger.misfire_policy.as_str())
        .bind(i64::from(trigger.times_triggered))
        .bind(&trigger.fire_instance_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn retrieve_trigger(
        &self,
        key: &TriggerKey,
    ) -> Result<Option<Trigger>> {
        sqlx::query_as::<_, TriggerRow>(&format!(
            "SELECT {TRIGGER_COLUMNS} FROM reel_triggers t \
             WHERE t.trigger_name = ? AND t.trigger_group = ?"
        ))
        .bind(&key.name)
        .bind(&key.group)
        .fetch_optional(&self.pool)
        .await?
        .map(Trigger::try_from)
        .transpose()
    }

    async fn trigger_state(
        &self,
        key: &TriggerKey,
    ) -> Result<Option<TriggerState>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT trigger_state FROM reel_triggers \
             WHERE trigger_name = ? AND trigger_group = ?",
        )
        .bind(&key.name)
        .bind(&key.group)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|(state,)| TriggerState::from_str(&state).map_err(Into::into))
            .transpose()
    }

    async fn delete_trigger(&self, key: &TriggerKey) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM reel_triggers \
             WHERE trigger_name = ? AND trigger_group = ?",
        )
        .bind(&key.name)
        .bind(&key.group)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn trigger_keys_for_job(
        &self,
        key: &JobKey,
    ) -> Result<Vec<TriggerKey>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT trigger_name, trigger_group FROM reel_triggers \
             WHERE job_name = ? AND job_group = ? \
             ORDER BY trigger_group, trigger_name",
        )
        .bind(&key.name)
        .bind(&key.group)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(name, group)| TriggerKey::new(name, group))
            .collect())
    }

    async fn update_trigger_state(
        &self,
        key: &TriggerKey,
        state: TriggerState,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE reel_triggers SET trigger_state = ? \
             WHERE trigger_name = ? AND trigger_group = ?",
        )
        .bind(state.as_str())
        .bind(&key.name)
        .bind(&key.group)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn transition_trigger_state(
        &self,
        key: &TriggerKey,
        from: TriggerState,
        to: TriggerState,
        expected_next_fire: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "UPDATE reel_triggers SET trigger_state = ",
        );
        qb.push_bind(to.as_str())
            .push(" WHERE trigger_name = ")
            .push_bind(key.name.clone())
            .push(" AND trigger_group = ")
            .push_bind(key.group.clone())
            .push(" AND trigger_state = ")
            .push_bind(from.as_str());
        if let Some(expected) = expected_next_fire {
            qb.push(" AND next_fire_time = ")
                .push_bind(expected.timestamp_millis());
        }
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn transition_all_trigger_states(
        &self,
        from: &[TriggerState],
        to: TriggerState,
    ) -> Result<u64> {
        if from.is_empty() {
            return Ok(0);
        }
        let mut qb = QueryBuilder::<Sqlite>::new(
            "UPDATE reel_triggers SET trigger_state = ",
        );
        qb.push_bind(to.as_str()).push(" WHERE trigger_state IN (");
        let mut separated = qb.separated(", ");
        for state in from {
            separated.push_bind(state.as_str());
        }
        separated.push_unseparated(")");
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn select_triggers_to_acquire(
        &self,
        query: &AcquireQuery,
    ) -> Result<Vec<TriggerCandidate>> {
        let due = DueQuery {
            no_later_than: query.no_later_than,
            no_earlier_than: query.no_earlier_than,
            types: TypeFilter::Excluding(query.excluded_types.clone()),
        };
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT t.trigger_name, t.trigger_group, t.job_name, t.job_group, \
             j.job_type, t.next_fire_time, t.priority, j.requests_recovery",
        );
        qb.push(DUE_FROM);
        push_due_filter(&mut qb, &due);
        qb.push(DUE_ORDER)
            .push(" LIMIT ")
            .push_bind(i64::try_from(query.max_count).unwrap_or(i64::MAX));

        let rows = qb
            .build_query_as::<CandidateRow>()
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(TriggerCandidate {
                    trigger_key: TriggerKey::new(
                        row.trigger_name,
                        row.trigger_group,
                    ),
                    job_key: JobKey::new(row.job_name, row.job_group),
                    job_type: row.job_type,
                    next_fire_time: from_millis(row.next_fire_time)?,
                    priority: i32::try_from(row.priority).unwrap_or(i32::MAX),
                    requests_recovery: row.requests_recovery,
                })
            })
            .collect()
    }

    async fn select_misfired_triggers(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TriggerKey>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT trigger_name, trigger_group FROM reel_triggers \
             WHERE trigger_state = ? AND misfire_policy <> ? \
             AND next_fire_time < ? \
             ORDER BY next_fire_time ASC, priority DESC LIMIT ?",
        )
        .bind(TriggerState::Waiting.as_str())
        .bind(MisfirePolicy::IgnoreMisfires.as_str())
        .bind(before.timestamp_millis())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(name, group)| TriggerKey::new(name, group))
            .collect())
    }

    async fn insert_fired_trigger(
        &self,
        record: &FiredTriggerRecord,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO reel_fired_triggers (fire_instance_id, trigger_name, \
             trigger_group, job_name, job_group, job_type, state, fired_at, \
             scheduled_at, priority, requests_recovery) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.fire_instance_id)
        .bind(&record.trigger_key.name)
        .bind(&record.trigger_key.group)
        .bind(&record.job_key.name)
        .bind(&record.job_key.group)
        .bind(&record.job_type)
        .bind(record.state.as_str())
        .bind(record.fired_at.timestamp_millis())
        .bind(record.scheduled_at.timestamp_millis())
        .bind(i64::from(record.priority))
        .bind(record.requests_recovery)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_fired_trigger_state(
        &self,
        fire_instance_id: &str,
        state: FiredState,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE reel_fired_triggers SET state = ? \
             WHERE fire_instance_id = ?",
        )
        .bind(state.as_str())
        .bind(fire_instance_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_fired_trigger(&self, fire_instance_id: &str) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM reel_fired_triggers WHERE fire_instance_id = ?",
        )
        .bind(fire_instance_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn select_fired_triggers(&self) -> Result<Vec<FiredTriggerRecord>> {
        sqlx::query_as::<_, FiredRow>(
            "SELECT fire_instance_id, trigger_name, trigger_group, job_name, \
             job_group, job_type, state, fired_at, scheduled_at, priority, \
             requests_recovery FROM reel_fired_triggers ORDER BY fired_at",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(FiredTriggerRecord::try_from)
        .collect()
    }

    async fn delete_all_fired_triggers(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM reel_fired_triggers")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_due_triggers(&self, query: &DueQuery) -> Result<usize> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*)");
        qb.push(DUE_FROM);
        push_due_filter(&mut qb, query);
        let count: i64 =
            qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn select_due_triggers(
        &self,
        query: &DueQuery,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<WaitingEntry>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {TRIGGER_COLUMNS}, {JOB_COLUMNS}"
        ));
        qb.push(DUE_FROM);
        push_due_filter(&mut qb, query);
        qb.push(DUE_ORDER)
            .push(" LIMIT ")
            .push_bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .push(" OFFSET ")
            .push_bind(i64::try_from(offset).unwrap_or(0));

        qb.build_query_as::<WaitingRow>()
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(WaitingEntry::try_from)
            .collect()
    }

    async fn count_due_triggers_by_type(
        &self,
        query: &DueQuery,
    ) -> Result<BTreeMap<String, usize>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT j.job_type, COUNT(*)");
        qb.push(DUE_FROM);
        push_due_filter(&mut qb, query);
        qb.push(" GROUP BY j.job_type");

        let rows: Vec<(String, i64)> =
            qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|(job_type, count)| {
                (job_type, usize::try_from(count).unwrap_or(0))
            })
            .collect())
    }

    async fn clear_jobs_and_triggers(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM reel_triggers")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM reel_jobs").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}
