//! PostgreSQL implementation of the dbqueue storage contract
//!
//! Production-ready persistence using PostgreSQL with:
//! - Atomic claiming via `FOR UPDATE SKIP LOCKED`
//! - Crash-retry pre-scheduling inside the claim statement
//! - Shared SQL between pooled and transactional execution paths
//!
//! The claim statement selects one due row of the queue, locks it against
//! every other worker in every process, advances `next_process_at` by the
//! configured failure backoff (computed from the pre-increment attempt
//! count) and increments the attempt counters, all in one statement. A
//! worker dying mid-execution therefore leaves the row claimable again at
//! the correct backoff time with no extra bookkeeping.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row};
use tracing::{debug, error, instrument};

use dbqueue_core::persistence::{DaoError, TaskDao, TaskTransaction};
use dbqueue_core::settings::{
    validate_identifier, FailureSettings, QueueTableLocation, SettingsError,
};
use dbqueue_core::task::{EnqueueParams, TaskRecord};

/// PostgreSQL implementation of [`TaskDao`].
///
/// Uses a connection pool for the implicit-transaction operations and
/// [`TaskDao::begin`] for the wrap-in-transaction processing mode. The
/// table and sequence names come from the (construction-validated)
/// [`QueueTableLocation`]; optional extra columns are validated here.
///
/// # Example
///
/// ```ignore
/// use dbqueue_postgres::PostgresTaskDao;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/mydb").await?;
/// let dao = PostgresTaskDao::new(pool);
/// ```
#[derive(Clone)]
pub struct PostgresTaskDao {
    pool: PgPool,
    extra_columns: Vec<String>,
}

impl PostgresTaskDao {
    /// Create a new DAO over the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            extra_columns: Vec::new(),
        }
    }

    /// Carry caller-defined extra columns on every row.
    ///
    /// The columns must exist on the task table; their values travel in
    /// [`EnqueueParams::extra`] and come back in [`TaskRecord::extra`].
    pub fn with_extra_columns(
        mut self,
        columns: Vec<String>,
    ) -> Result<Self, SettingsError> {
        for column in &columns {
            validate_identifier(column)?;
        }
        self.extra_columns = columns;
        Ok(self)
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TaskDao for PostgresTaskDao {
    #[instrument(skip(self, params), fields(location = %location))]
    async fn enqueue(
        &self,
        location: &QueueTableLocation,
        params: &EnqueueParams,
    ) -> Result<i64, DaoError> {
        let sql = enqueue_sql(location, &self.extra_columns);
        let mut query = sqlx::query(&sql)
            .bind(location.queue_id().as_str())
            .bind(&params.payload)
            .bind(millis(params.delay));
        for column in &self.extra_columns {
            query = query.bind(params.extra.get(column).map(String::as_str));
        }

        let row = query.fetch_one(&self.pool).await.map_err(|e| {
            error!("enqueue failed: {}", e);
            DaoError::Database(e.to_string())
        })?;
        let id: i64 = row
            .try_get("id")
            .map_err(|e| DaoError::RowMapping(e.to_string()))?;
        debug!(id, "task enqueued");
        Ok(id)
    }

    #[instrument(skip(self, settings), fields(location = %location))]
    async fn pick_task(
        &self,
        location: &QueueTableLocation,
        settings: &FailureSettings,
    ) -> Result<Option<TaskRecord>, DaoError> {
        pick_task_on(&self.pool, location, settings, &self.extra_columns).await
    }

    #[instrument(skip(self), fields(location = %location))]
    async fn delete_task(&self, location: &QueueTableLocation, id: i64) -> Result<bool, DaoError> {
        delete_task_on(&self.pool, location, id).await
    }

    #[instrument(skip(self), fields(location = %location))]
    async fn reenqueue(
        &self,
        location: &QueueTableLocation,
        id: i64,
        delay: Duration,
    ) -> Result<bool, DaoError> {
        reenqueue_on(&self.pool, location, id, delay).await
    }

    #[instrument(skip(self), fields(location = %location))]
    async fn reschedule(
        &self,
        location: &QueueTableLocation,
        id: i64,
        delay: Duration,
    ) -> Result<bool, DaoError> {
        reschedule_on(&self.pool, location, id, delay).await
    }

    async fn begin(&self) -> Result<Box<dyn TaskTransaction>, DaoError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DaoError::Database(e.to_string()))?;
        Ok(Box::new(PostgresTaskTransaction {
            tx,
            extra_columns: self.extra_columns.clone(),
        }))
    }
}

/// One explicit PostgreSQL transaction.
///
/// Dropping it without committing rolls the transaction back.
pub struct PostgresTaskTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    extra_columns: Vec<String>,
}

#[async_trait]
impl TaskTransaction for PostgresTaskTransaction {
    async fn pick_task(
        &mut self,
        location: &QueueTableLocation,
        settings: &FailureSettings,
    ) -> Result<Option<TaskRecord>, DaoError> {
        pick_task_on(&mut *self.tx, location, settings, &self.extra_columns).await
    }

    async fn delete_task(
        &mut self,
        location: &QueueTableLocation,
        id: i64,
    ) -> Result<bool, DaoError> {
        delete_task_on(&mut *self.tx, location, id).await
    }

    async fn reenqueue(
        &mut self,
        location: &QueueTableLocation,
        id: i64,
        delay: Duration,
    ) -> Result<bool, DaoError> {
        reenqueue_on(&mut *self.tx, location, id, delay).await
    }

    async fn reschedule(
        &mut self,
        location: &QueueTableLocation,
        id: i64,
        delay: Duration,
    ) -> Result<bool, DaoError> {
        reschedule_on(&mut *self.tx, location, id, delay).await
    }

    async fn commit(self: Box<Self>) -> Result<(), DaoError> {
        self.tx
            .commit()
            .await
            .map_err(|e| DaoError::Database(e.to_string()))
    }

    async fn rollback(self: Box<Self>) -> Result<(), DaoError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| DaoError::Database(e.to_string()))
    }
}

// Shared SQL over `impl PgExecutor`, so the pooled and transactional paths
// cannot drift apart.

async fn pick_task_on<'e, E>(
    executor: E,
    location: &QueueTableLocation,
    settings: &FailureSettings,
    extra_columns: &[String],
) -> Result<Option<TaskRecord>, DaoError>
where
    E: sqlx::PgExecutor<'e>,
{
    let sql = pick_sql(location, extra_columns);
    let row = sqlx::query(&sql)
        .bind(location.queue_id().as_str())
        .bind(settings.retry_type.to_string())
        .bind(millis(settings.retry_interval))
        .fetch_optional(executor)
        .await
        .map_err(|e| {
            error!("pick failed: {}", e);
            DaoError::Database(e.to_string())
        })?;

    row.map(|row| map_record(&row, extra_columns)).transpose()
}

async fn delete_task_on<'e, E>(
    executor: E,
    location: &QueueTableLocation,
    id: i64,
) -> Result<bool, DaoError>
where
    E: sqlx::PgExecutor<'e>,
{
    let sql = format!(
        "DELETE FROM {} WHERE queue_name = $1 AND id = $2",
        location.table_name()
    );
    let result = sqlx::query(&sql)
        .bind(location.queue_id().as_str())
        .bind(id)
        .execute(executor)
        .await
        .map_err(|e| DaoError::Database(e.to_string()))?;
    Ok(result.rows_affected() > 0)
}

async fn reenqueue_on<'e, E>(
    executor: E,
    location: &QueueTableLocation,
    id: i64,
    delay: Duration,
) -> Result<bool, DaoError>
where
    E: sqlx::PgExecutor<'e>,
{
    let sql = format!(
        r#"
        UPDATE {}
        SET next_process_at = now() + $3 * interval '1 millisecond',
            attempt = 0,
            reenqueue_attempt = reenqueue_attempt + 1
        WHERE queue_name = $1 AND id = $2
        "#,
        location.table_name()
    );
    let result = sqlx::query(&sql)
        .bind(location.queue_id().as_str())
        .bind(id)
        .bind(millis(delay))
        .execute(executor)
        .await
        .map_err(|e| DaoError::Database(e.to_string()))?;
    Ok(result.rows_affected() > 0)
}

async fn reschedule_on<'e, E>(
    executor: E,
    location: &QueueTableLocation,
    id: i64,
    delay: Duration,
) -> Result<bool, DaoError>
where
    E: sqlx::PgExecutor<'e>,
{
    let sql = format!(
        "UPDATE {} SET next_process_at = now() + $3 * interval '1 millisecond' \
         WHERE queue_name = $1 AND id = $2",
        location.table_name()
    );
    let result = sqlx::query(&sql)
        .bind(location.queue_id().as_str())
        .bind(id)
        .bind(millis(delay))
        .execute(executor)
        .await
        .map_err(|e| DaoError::Database(e.to_string()))?;
    Ok(result.rows_affected() > 0)
}

fn enqueue_sql(location: &QueueTableLocation, extra_columns: &[String]) -> String {
    let mut columns = String::from("queue_name, payload, next_process_at");
    let mut values = String::from("$1, $2, now() + $3 * interval '1 millisecond'");
    for (index, column) in extra_columns.iter().enumerate() {
        columns.push_str(", ");
        columns.push_str(column);
        values.push_str(&format!(", ${}", index + 4));
    }
    match location.id_sequence() {
        Some(sequence) => format!(
            "INSERT INTO {} (id, {columns}) VALUES (nextval('{sequence}'), {values}) RETURNING id",
            location.table_name()
        ),
        None => format!(
            "INSERT INTO {} ({columns}) VALUES ({values}) RETURNING id",
            location.table_name()
        ),
    }
}

fn pick_sql(location: &QueueTableLocation, extra_columns: &[String]) -> String {
    let mut returning = String::from(
        "t.id, t.payload, t.attempt, t.reenqueue_attempt, t.total_attempt, \
         t.created_at, t.next_process_at",
    );
    for column in extra_columns {
        returning.push_str(", t.");
        returning.push_str(column);
    }
    // claim one due row, lock it past concurrent claimers and pre-schedule
    // its crash-retry time from the pre-increment attempt count
    format!(
        r#"
        WITH claimable AS (
            SELECT id
            FROM {table}
            WHERE queue_name = $1
              AND next_process_at <= now()
            ORDER BY next_process_at, id
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        UPDATE {table} t
        SET next_process_at = now() + CASE $2
                WHEN 'geometric'  THEN power(2, t.attempt) * ($3 * interval '1 millisecond')
                WHEN 'arithmetic' THEN (1 + 2 * t.attempt) * ($3 * interval '1 millisecond')
                ELSE $3 * interval '1 millisecond'
            END,
            attempt = t.attempt + 1,
            total_attempt = t.total_attempt + 1
        FROM claimable c
        WHERE t.id = c.id
        RETURNING {returning}
        "#,
        table = location.table_name(),
    )
}

fn map_record(row: &PgRow, extra_columns: &[String]) -> Result<TaskRecord, DaoError> {
    let mut extra = BTreeMap::new();
    for column in extra_columns {
        let value: Option<String> = row
            .try_get(column.as_str())
            .map_err(|e| DaoError::RowMapping(e.to_string()))?;
        if let Some(value) = value {
            extra.insert(column.clone(), value);
        }
    }

    Ok(TaskRecord {
        id: get(row, "id")?,
        payload: get(row, "payload")?,
        attempt: get::<i32>(row, "attempt")? as u32,
        reenqueue_attempt: get::<i32>(row, "reenqueue_attempt")? as u32,
        total_attempt: get::<i64>(row, "total_attempt")? as u64,
        created_at: get(row, "created_at")?,
        next_process_at: get(row, "next_process_at")?,
        extra,
    })
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, DaoError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| DaoError::RowMapping(e.to_string()))
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
