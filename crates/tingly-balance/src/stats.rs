use std::collections::HashMap;
use std::path::Path;

use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveValue, ConnectionTrait, Database, DatabaseConnection, DbErr, EntityTrait, Schema,
};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::info;

use crate::entities::service_stats;
use crate::types::{Rule, Service, ServiceStats};

const STATS_DB_FILE: &str = "stats.db";

/// Identifies one stats row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatsKey {
    pub rule_uuid: String,
    pub provider: String,
    pub model: String,
}

impl StatsKey {
    pub fn new(
        rule_uuid: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            rule_uuid: rule_uuid.into(),
            provider: provider.into(),
            model: model.into(),
        }
    }
}

/// Reset the window and fold one observed request into the row. Pure so the
/// window arithmetic is testable with synthetic clocks.
pub fn apply_usage(
    stats: &mut ServiceStats,
    now: OffsetDateTime,
    input_tokens: i64,
    output_tokens: i64,
) {
    if stats.window_expired(now) {
        stats.window_start = now;
        stats.window_request_count = 0;
        stats.window_tokens_consumed = 0;
        stats.window_input_tokens = 0;
        stats.window_output_tokens = 0;
    }

    stats.request_count += 1;
    stats.last_used = now;
    stats.window_request_count += 1;
    stats.window_input_tokens += input_tokens;
    stats.window_output_tokens += output_tokens;
    stats.window_tokens_consumed = stats.window_input_tokens + stats.window_output_tokens;
}

/// Durable per-service usage counters backed by SQLite.
///
/// A single mutex serialises every read and write; the in-memory map mirrors
/// the table so routing reads never touch the database.
pub struct StatsStore {
    db: DatabaseConnection,
    rows: Mutex<HashMap<StatsKey, ServiceStats>>,
}

impl StatsStore {
    /// Open (or create) the store under `data_dir`.
    pub async fn open(data_dir: &Path) -> Result<Self, DbErr> {
        std::fs::create_dir_all(data_dir)
            .map_err(|err| DbErr::Custom(format!("create stats dir: {err}")))?;
        let db_path = data_dir.join(STATS_DB_FILE);
        let dsn = format!("sqlite://{}?mode=rwc", db_path.display());
        info!(event = "stats_store_open", path = %db_path.display());
        Self::connect(&dsn).await
    }

    /// In-memory store for tests.
    pub async fn open_in_memory() -> Result<Self, DbErr> {
        Self::connect("sqlite::memory:").await
    }

    async fn connect(dsn: &str) -> Result<Self, DbErr> {
        let db = Database::connect(dsn).await?;
        // SQLite tuning; both are no-ops on backends that lack them.
        let _ = db.execute_unprepared("PRAGMA journal_mode=WAL;").await;
        let _ = db.execute_unprepared("PRAGMA busy_timeout=5000;").await;

        let backend = db.get_database_backend();
        let schema = Schema::new(backend);
        let mut create = schema.create_table_from_entity(service_stats::Entity);
        create.if_not_exists();
        db.execute(backend.build(&create)).await?;

        let rows = Self::load_all(&db).await?;
        Ok(Self {
            db,
            rows: Mutex::new(rows),
        })
    }

    async fn load_all(db: &DatabaseConnection) -> Result<HashMap<StatsKey, ServiceStats>, DbErr> {
        let records = service_stats::Entity::find().all(db).await?;
        let mut rows = HashMap::with_capacity(records.len());
        for record in records {
            rows.insert(
                StatsKey::new(&record.rule_uuid, &record.provider, &record.model),
                ServiceStats {
                    request_count: record.request_count,
                    last_used: record.last_used,
                    window_start: record.window_start,
                    window_request_count: record.window_request_count,
                    window_tokens_consumed: record.window_tokens_consumed,
                    window_input_tokens: record.window_input_tokens,
                    window_output_tokens: record.window_output_tokens,
                    time_window: record.time_window,
                },
            );
        }
        Ok(rows)
    }

    pub async fn get(&self, rule_uuid: &str, provider: &str, model: &str) -> Option<ServiceStats> {
        let rows = self.rows.lock().await;
        rows.get(&StatsKey::new(rule_uuid, provider, model)).copied()
    }

    /// A consistent copy of every row, taken under the store lock.
    pub async fn snapshot(&self) -> HashMap<StatsKey, ServiceStats> {
        self.rows.lock().await.clone()
    }

    /// Fold one completed request into the row for `(rule_uuid, service)`,
    /// creating it lazily, and persist the result.
    pub async fn record_usage(
        &self,
        rule_uuid: &str,
        service: &Service,
        input_tokens: i64,
        output_tokens: i64,
    ) -> Result<ServiceStats, DbErr> {
        let now = OffsetDateTime::now_utc();
        let key = StatsKey::new(rule_uuid, &service.provider, &service.model);

        let mut rows = self.rows.lock().await;
        let stats = rows
            .entry(key.clone())
            .or_insert_with(|| ServiceStats::fresh(service.effective_time_window(), now));
        apply_usage(stats, now, input_tokens, output_tokens);
        let updated = *stats;
        self.persist(&key, &updated).await?;
        Ok(updated)
    }

    /// Ensure a row exists for every service of every rule, seeding missing
    /// ones with fresh windows.
    pub async fn hydrate_rules(&self, rules: &[Rule]) -> Result<(), DbErr> {
        let now = OffsetDateTime::now_utc();
        let mut rows = self.rows.lock().await;
        for rule in rules {
            for service in &rule.services {
                let key = StatsKey::new(&rule.uuid, &service.provider, &service.model);
                if !rows.contains_key(&key) {
                    let stats = ServiceStats::fresh(service.effective_time_window(), now);
                    rows.insert(key.clone(), stats);
                    self.persist(&key, &stats).await?;
                }
            }
        }
        Ok(())
    }

    pub async fn clear_all(&self) -> Result<(), DbErr> {
        let mut rows = self.rows.lock().await;
        service_stats::Entity::delete_many().exec(&self.db).await?;
        rows.clear();
        Ok(())
    }

    async fn persist(&self, key: &StatsKey, stats: &ServiceStats) -> Result<(), DbErr> {
        let row = service_stats::ActiveModel {
            rule_uuid: ActiveValue::Set(key.rule_uuid.clone()),
            provider: ActiveValue::Set(key.provider.clone()),
            model: ActiveValue::Set(key.model.clone()),
            request_count: ActiveValue::Set(stats.request_count),
            last_used: ActiveValue::Set(stats.last_used),
            window_start: ActiveValue::Set(stats.window_start),
            window_request_count: ActiveValue::Set(stats.window_request_count),
            window_tokens_consumed: ActiveValue::Set(stats.window_tokens_consumed),
            window_input_tokens: ActiveValue::Set(stats.window_input_tokens),
            window_output_tokens: ActiveValue::Set(stats.window_output_tokens),
            time_window: ActiveValue::Set(stats.time_window),
        };
        service_stats::Entity::insert(row)
            .on_conflict(
                OnConflict::columns([
                    service_stats::Column::RuleUuid,
                    service_stats::Column::Provider,
                    service_stats::Column::Model,
                ])
                .update_columns([
                    service_stats::Column::RequestCount,
                    service_stats::Column::LastUsed,
                    service_stats::Column::WindowStart,
                    service_stats::Column::WindowRequestCount,
                    service_stats::Column::WindowTokensConsumed,
                    service_stats::Column::WindowInputTokens,
                    service_stats::Column::WindowOutputTokens,
                    service_stats::Column::TimeWindow,
                ])
                .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }
}
