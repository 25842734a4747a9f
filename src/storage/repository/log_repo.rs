use crate::storage::entity::error_log::{ActiveModel as ErrorLogActiveModel, Entity as ErrorLog};
use crate::storage::entity::job_log::{
    self, ActiveModel as JobLogActiveModel, Entity as JobLog, Model as JobLogModel,
};
use chrono::Utc;
use sea_orm::{DatabaseConnection, EntityTrait, QueryOrder, QuerySelect, Set};

/// error_logs.record_sample 最大字符数
pub const RECORD_SAMPLE_LIMIT: usize = 500;

pub struct LogRepository;

#[derive(Debug, Clone, Default)]
pub struct JobLogEntry {
    pub job: String,
    pub provider: Option<String>,
    pub status: String,
    pub records_fetched: i32,
    pub readings_saved: i32,
    pub duplicates: i32,
    pub errors: i32,
    pub message: Option<String>,
    pub started_at: i64,
    pub finished_at: i64,
}

impl LogRepository {
    pub async fn insert_job_log(
        db: &DatabaseConnection,
        e: JobLogEntry,
    ) -> Result<(), sea_orm::DbErr> {
        JobLog::insert(JobLogActiveModel {
            job: Set(e.job),
            provider: Set(e.provider),
            status: Set(e.status),
            records_fetched: Set(e.records_fetched),
            readings_saved: Set(e.readings_saved),
            duplicates: Set(e.duplicates),
            errors: Set(e.errors),
            message: Set(e.message),
            started_at: Set(e.started_at),
            finished_at: Set(e.finished_at),
            ..Default::default()
        })
        .exec_without_returning(db)
        .await?;
        Ok(())
    }

    pub async fn recent_job_logs(
        db: &DatabaseConnection,
        limit: u64,
    ) -> Result<Vec<JobLogModel>, sea_orm::DbErr> {
        JobLog::find()
            .order_by_desc(job_log::Column::Id)
            .limit(limit)
            .all(db)
            .await
    }

    pub async fn insert_error(
        db: &DatabaseConnection,
        source: &str,
        error_type: &str,
        message: &str,
        record_sample: &str,
    ) -> Result<(), sea_orm::DbErr> {
        ErrorLog::insert(ErrorLogActiveModel {
            source: Set(source.to_string()),
            error_type: Set(error_type.to_string()),
            message: Set(message.to_string()),
            record_sample: Set(truncate_chars(record_sample, RECORD_SAMPLE_LIMIT)),
            created_at: Set(Utc::now().timestamp()),
            ..Default::default()
        })
        .exec_without_returning(db)
        .await?;
        Ok(())
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
