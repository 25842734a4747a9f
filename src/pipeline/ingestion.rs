use crate::config::AppConfig;
use crate::pipeline::normalizer::DataNormalizer;
use crate::providers::{AirFeed, AnyFeed};
use crate::storage::entity::provider::Model as ProviderModel;
use crate::storage::repository::provider_repo::is_due;
use crate::storage::repository::{JobLogEntry, LogRepository, ProviderRepository};
use chrono::Utc;
use log::{error, info};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Instant;

pub const JOB_NAME: &str = "ingestion";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestionSummary {
    pub providers_processed: usize,
    pub providers_failed: usize,
    pub providers_skipped: usize,
    pub readings_saved: usize,
    pub duplicates: usize,
    pub errors: usize,
    pub duration_ms: u128,
}

#[derive(Clone)]
pub struct IngestionJob {
    db: DatabaseConnection,
    cfg: Arc<AppConfig>,
}

impl IngestionJob {
    pub fn new(db: DatabaseConnection, cfg: Arc<AppConfig>) -> Self {
        Self { db, cfg }
    }

    pub async fn run(&self, force: bool) -> anyhow::Result<IngestionSummary> {
        self.run_at(Utc::now().timestamp(), force).await
    }

    /// 以 now（调度 tick 时间）拉取所有到期的 provider；force 时忽略拉取间隔。
    /// 本轮所有 provider 的 last_ingested_at 统一记为 now
    pub async fn run_at(&self, now: i64, force: bool) -> anyhow::Result<IngestionSummary> {
        let started = Instant::now();
        let providers = ProviderRepository::list_active(&self.db).await?;
        let mut normalizer = DataNormalizer::load(&self.db).await?;

        let mut summary = IngestionSummary::default();
        info!("Starting ingestion job ({} active providers)", providers.len());

        for provider in providers {
            if !force && !is_due(&provider, now) {
                summary.providers_skipped += 1;
                continue;
            }
            let job_started = Utc::now().timestamp();
            let entry = match self.ingest_one(&provider, &mut normalizer).await {
                Ok(entry) => {
                    summary.providers_processed += 1;
                    summary.readings_saved += entry.readings_saved as usize;
                    summary.duplicates += entry.duplicates as usize;
                    summary.errors += entry.errors as usize;
                    if let Err(e) = ProviderRepository::mark_ingested(&self.db, provider.id, now).await
                    {
                        error!("Failed to stamp {}: {e}", provider.name);
                    }
                    entry
                }
                Err(e) => {
                    summary.providers_failed += 1;
                    error!("Error fetching data from {}: {e:#}", provider.name);
                    JobLogEntry {
                        job: JOB_NAME.to_string(),
                        provider: Some(provider.name.clone()),
                        status: "error".to_string(),
                        message: Some(format!("{e:#}")),
                        started_at: job_started,
                        finished_at: Utc::now().timestamp(),
                        ..Default::default()
                    }
                }
            };
            if let Err(e) = LogRepository::insert_job_log(&self.db, entry).await {
                error!("Failed to write job log for {}: {e}", provider.name);
            }
        }

        summary.duration_ms = started.elapsed().as_millis();
        info!(
            "Ingestion job completed in {} ms: {} providers, {} readings saved, {} duplicates",
            summary.duration_ms,
            summary.providers_processed,
            summary.readings_saved,
            summary.duplicates
        );
        Ok(summary)
    }

    async fn ingest_one(
        &self,
        provider: &ProviderModel,
        normalizer: &mut DataNormalizer,
    ) -> anyhow::Result<JobLogEntry> {
        let started_at = Utc::now().timestamp();
        let feed = AnyFeed::for_provider(provider, &self.cfg)?;
        info!(
            "Fetching data from provider: {}{}",
            provider.name,
            if feed.is_mock() { " (mock)" } else { "" }
        );
        let records = feed.fetch().await?;
        let stats = normalizer
            .normalize_and_save(&self.db, provider, feed.format(), &records)
            .await;

        info!(
            "Fetched {} records from {}, saved {} readings",
            records.len(),
            provider.name,
            stats.saved
        );
        Ok(JobLogEntry {
            job: JOB_NAME.to_string(),
            provider: Some(provider.name.clone()),
            status: "success".to_string(),
            records_fetched: records.len() as i32,
            readings_saved: stats.saved as i32,
            duplicates: stats.duplicates as i32,
            errors: stats.errors as i32,
            message: stats.error_details.first().cloned(),
            started_at,
            finished_at: Utc::now().timestamp(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::connection::memory_db;
    use crate::storage::entity::provider;
    use sea_orm::{ActiveModelTrait, Set};

    fn job(db: &DatabaseConnection) -> IngestionJob {
        IngestionJob::new(db.clone(), Arc::new(AppConfig::default()))
    }

    #[tokio::test]
    async fn first_run_ingests_every_provider_then_respects_frequency() {
        let db = memory_db().await;
        let first = job(&db).run(false).await.unwrap();
        assert_eq!(first.providers_processed, 3);
        // AQICN 5 城 x 6 + Google 2 x 4 + IQAir 3 x 1
        assert_eq!(first.readings_saved + first.duplicates, 41);

        let second = job(&db).run(false).await.unwrap();
        assert_eq!(second.providers_processed, 0);
        assert_eq!(second.providers_skipped, 3);

        let logs = LogRepository::recent_job_logs(&db, 10).await.unwrap();
        assert_eq!(logs.len(), 3);
        assert!(logs.iter().all(|l| l.status == "success"));
    }

    #[tokio::test]
    async fn one_failing_provider_does_not_stop_the_rest() {
        let db = memory_db().await;
        provider::ActiveModel {
            name: Set("Local CSV".to_string()),
            format: Set("csv".to_string()),
            api_endpoint: Set(None),
            api_key: Set(None),
            ingestion_frequency_minutes: Set(30),
            is_active: Set(true),
            last_ingested_at: Set(None),
            created_at: Set(0),
            ..Default::default()
        }
        .insert(&db)
        .await
        .unwrap();

        let summary = job(&db).run(true).await.unwrap();
        assert_eq!(summary.providers_processed, 3);
        assert_eq!(summary.providers_failed, 1);

        let logs = LogRepository::recent_job_logs(&db, 10).await.unwrap();
        let failed: Vec<_> = logs.iter().filter(|l| l.status == "error").collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].provider.as_deref(), Some("Local CSV"));
    }

    #[tokio::test]
    async fn providers_are_stamped_with_the_tick_time() {
        let db = memory_db().await;
        let tick = 1_710_079_200;
        let first = job(&db).run_at(tick, false).await.unwrap();
        assert_eq!(first.providers_processed, 3);
        for p in ProviderRepository::list_active(&db).await.unwrap() {
            assert_eq!(p.last_ingested_at, Some(tick), "{}", p.name);
        }

        // 下一个 30 分钟 tick：30 分钟的两个 provider 到期，IQAir (60 分钟) 未到期
        let next = job(&db).run_at(tick + 30 * 60, false).await.unwrap();
        assert_eq!(next.providers_processed, 2);
        assert_eq!(next.providers_skipped, 1);

        let third = job(&db).run_at(tick + 60 * 60, false).await.unwrap();
        assert_eq!(third.providers_processed, 3);
    }

    #[tokio::test]
    async fn job_log_write_failure_does_not_stop_other_providers() {
        use sea_orm::ConnectionTrait;
        let db = memory_db().await;
        db.execute_unprepared("DROP TABLE job_logs").await.unwrap();

        let tick = 1_710_079_200;
        let summary = job(&db).run_at(tick, false).await.unwrap();
        assert_eq!(summary.providers_processed, 3);
        for p in ProviderRepository::list_active(&db).await.unwrap() {
            assert_eq!(p.last_ingested_at, Some(tick), "{}", p.name);
        }
    }
}
