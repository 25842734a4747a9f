use crate::app_state::AppEvent;
use crate::config::AppConfig;
use crate::notify::Notifier;
use crate::pipeline::aggregation::{self, DailyAggregationJob};
use crate::pipeline::alerts::{self, AlertChecker};
use crate::pipeline::ingestion::{self, IngestionJob};
use crate::storage::repository::{JobLogEntry, LogRepository};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};
use log::{error, info, warn};
use sea_orm::DatabaseConnection;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobId {
    Ingestion,
    DailyAggregation,
    AlertCheck,
}

impl JobId {
    pub const ALL: [JobId; 3] = [JobId::Ingestion, JobId::DailyAggregation, JobId::AlertCheck];

    pub fn id(&self) -> &'static str {
        match self {
            JobId::Ingestion => ingestion::JOB_NAME,
            JobId::DailyAggregation => aggregation::JOB_NAME,
            JobId::AlertCheck => alerts::JOB_NAME,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobId::Ingestion => "Ingest air quality data",
            JobId::DailyAggregation => "Daily aggregation",
            JobId::AlertCheck => "Check alerts",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for JobId {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ingestion" | "ingest" => Ok(JobId::Ingestion),
            "daily_aggregation" | "aggregate" | "aggregation" => Ok(JobId::DailyAggregation),
            "alert_check" | "alerts" => Ok(JobId::AlertCheck),
            other => Err(SchedulerError::UnknownJob(other.to_string())),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SchedulerError {
    #[error("unknown job: {0}")]
    UnknownJob(String),
    #[error("job {0} is already running")]
    AlreadyRunning(JobId),
    #[error("job {job} failed: {source:#}")]
    Failed {
        job: JobId,
        #[source]
        source: anyhow::Error,
    },
}

/// 一次执行的具体参数
#[derive(Clone, Debug, PartialEq)]
pub enum JobRequest {
    Ingest { force: bool },
    Aggregate { day: Option<NaiveDate> },
    Backfill { start: NaiveDate, end: NaiveDate },
    AlertCheck,
}

impl JobRequest {
    pub fn job(&self) -> JobId {
        match self {
            JobRequest::Ingest { .. } => JobId::Ingestion,
            JobRequest::Aggregate { .. } | JobRequest::Backfill { .. } => JobId::DailyAggregation,
            JobRequest::AlertCheck => JobId::AlertCheck,
        }
    }

    fn default_for(job: JobId) -> Self {
        match job {
            JobId::Ingestion => JobRequest::Ingest { force: false },
            JobId::DailyAggregation => JobRequest::Aggregate { day: None },
            JobId::AlertCheck => JobRequest::AlertCheck,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct JobStatus {
    pub id: String,
    pub name: String,
    pub next_run: Option<i64>,
    pub last_run: Option<i64>,
    pub last_outcome: Option<String>,
    pub running: bool,
}

#[derive(Default)]
struct SlotState {
    next_run: Option<i64>,
    last_run: Option<i64>,
    last_outcome: Option<String>,
}

#[derive(Default)]
struct JobSlot {
    running: AtomicBool,
    state: Mutex<SlotState>,
}

/// 离开作用域时释放运行标记
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// 下一个对齐到 interval 整数倍的时刻
pub fn next_interval_tick(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let secs = interval.as_secs().max(1) as i64;
    let next = (now.timestamp().div_euclid(secs) + 1) * secs;
    DateTime::from_timestamp(next, 0).unwrap_or(now + TimeDelta::seconds(secs))
}

/// 下一个 UTC hour:minute；已过则为明天
pub fn next_daily_at(now: DateTime<Utc>, hour: u32, minute: u32) -> DateTime<Utc> {
    let Some(at) = NaiveTime::from_hms_opt(hour, minute, 0) else {
        return now + TimeDelta::days(1);
    };
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        today + TimeDelta::days(1)
    }
}

pub struct Scheduler {
    db: DatabaseConnection,
    cfg: Arc<AppConfig>,
    notifier: Arc<dyn Notifier>,
    evt_tx: Option<mpsc::UnboundedSender<AppEvent>>,
    slots: [JobSlot; 3],
}

impl Scheduler {
    pub fn new(
        db: DatabaseConnection,
        cfg: Arc<AppConfig>,
        notifier: Arc<dyn Notifier>,
        evt_tx: Option<mpsc::UnboundedSender<AppEvent>>,
    ) -> Self {
        Self {
            db,
            cfg,
            notifier,
            evt_tx,
            slots: Default::default(),
        }
    }

    /// 计算 job 在 now 之后的下一次触发时间
    pub fn next_fire(&self, job: JobId, now: DateTime<Utc>) -> DateTime<Utc> {
        match job {
            JobId::Ingestion => next_interval_tick(
                now,
                Duration::from_secs(self.cfg.ingest_interval_minutes * 60),
            ),
            JobId::DailyAggregation => {
                next_daily_at(now, self.cfg.aggregate_hour, self.cfg.aggregate_minute)
            }
            JobId::AlertCheck => {
                next_interval_tick(now, Duration::from_secs(self.cfg.alert_check_seconds))
            }
        }
    }

    /// 每个 job 一个常驻循环
    pub fn start(self: &Arc<Self>) {
        for job in JobId::ALL {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                loop {
                    let next = this.next_fire(job, Utc::now());
                    this.set_next_run(job, next.timestamp());
                    let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    tokio::time::sleep(wait).await;

                    match this.execute(JobRequest::default_for(job), Some(next)).await {
                        Ok(_) => {}
                        Err(SchedulerError::AlreadyRunning(_)) => {
                            warn!("Job {job} is still running, skipping this tick");
                        }
                        Err(e) => error!("{e}"),
                    }
                }
            });
        }
        info!(
            "Scheduler started: ingestion every {} min, aggregation daily at {:02}:{:02} UTC, alert check every {} s",
            self.cfg.ingest_interval_minutes,
            self.cfg.aggregate_hour,
            self.cfg.aggregate_minute,
            self.cfg.alert_check_seconds
        );
    }

    /// 手动触发，与定时触发共用单实例保护
    pub async fn run_now(&self, job: JobId) -> Result<String, SchedulerError> {
        self.execute(JobRequest::default_for(job), None).await
    }

    pub async fn submit(&self, req: JobRequest) -> Result<String, SchedulerError> {
        self.execute(req, None).await
    }

    pub fn is_running(&self, job: JobId) -> bool {
        self.slots[job.index()].running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> Vec<JobStatus> {
        JobId::ALL
            .iter()
            .map(|job| {
                let slot = &self.slots[job.index()];
                let mut status = JobStatus {
                    id: job.id().to_string(),
                    name: job.name().to_string(),
                    running: slot.running.load(Ordering::SeqCst),
                    ..Default::default()
                };
                if let Ok(state) = slot.state.lock() {
                    status.next_run = state.next_run;
                    status.last_run = state.last_run;
                    status.last_outcome = state.last_outcome.clone();
                }
                status
            })
            .collect()
    }

    fn set_next_run(&self, job: JobId, at: i64) {
        if let Ok(mut state) = self.slots[job.index()].state.lock() {
            state.next_run = Some(at);
        }
    }

    /// tick 为定时触发的计划时间，手动触发为 None
    async fn execute(
        &self,
        req: JobRequest,
        tick: Option<DateTime<Utc>>,
    ) -> Result<String, SchedulerError> {
        let job = req.job();
        let scheduled = tick.is_some();
        let slot = &self.slots[job.index()];
        if slot
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SchedulerError::AlreadyRunning(job));
        }
        let _guard = RunningGuard(&slot.running);

        let started = Utc::now().timestamp();
        let result = self.dispatch(&req, tick).await;

        let outcome = match &result {
            Ok(line) => format!("ok: {line}"),
            Err(e) => format!("error: {e:#}"),
        };
        if let Ok(mut state) = slot.state.lock() {
            state.last_run = Some(started);
            state.last_outcome = Some(outcome);
        }

        match result {
            Ok(line) => {
                // 告警检查每分钟一次，成功时不刷屏
                if job != JobId::AlertCheck || !scheduled {
                    self.emit(AppEvent::Log(format!("✓ {line}")));
                }
                Ok(line)
            }
            Err(source) => {
                self.emit(AppEvent::Log(format!("✗ {job}: {source:#}")));
                Err(SchedulerError::Failed { job, source })
            }
        }
    }

    async fn dispatch(
        &self,
        req: &JobRequest,
        tick: Option<DateTime<Utc>>,
    ) -> anyhow::Result<String> {
        match req {
            JobRequest::Ingest { force } => {
                let now = tick.unwrap_or_else(Utc::now).timestamp();
                let s = IngestionJob::new(self.db.clone(), self.cfg.clone())
                    .run_at(now, *force)
                    .await?;
                Ok(format!(
                    "ingestion: {} providers, {} saved, {} duplicates, {} errors, {} skipped",
                    s.providers_processed,
                    s.readings_saved,
                    s.duplicates,
                    s.errors + s.providers_failed,
                    s.providers_skipped
                ))
            }
            JobRequest::Aggregate { day } => {
                let started_at = Utc::now().timestamp();
                let job = DailyAggregationJob::new(self.db.clone());
                let s = job.run(*day).await?;
                LogRepository::insert_job_log(
                    &self.db,
                    JobLogEntry {
                        job: aggregation::JOB_NAME.to_string(),
                        status: if s.errors == 0 { "success" } else { "error" }.to_string(),
                        readings_saved: (s.created + s.updated) as i32,
                        errors: s.errors as i32,
                        message: Some(format!("day {}", s.day)),
                        started_at,
                        finished_at: Utc::now().timestamp(),
                        ..Default::default()
                    },
                )
                .await?;
                if tick.is_some() {
                    self.send_digest(&job, *day).await;
                }
                Ok(format!(
                    "aggregation {}: {} created, {} updated, {} skipped, {} errors",
                    s.day, s.created, s.updated, s.skipped, s.errors
                ))
            }
            JobRequest::Backfill { start, end } => {
                let s = DailyAggregationJob::new(self.db.clone())
                    .backfill(*start, *end)
                    .await?;
                Ok(format!(
                    "backfill {start}..{end}: {}/{} days, {} created, {} updated, {} errors",
                    s.days_processed, s.total_days, s.created, s.updated, s.errors
                ))
            }
            JobRequest::AlertCheck => {
                let s = AlertChecker::new(
                    self.db.clone(),
                    self.notifier.clone(),
                    self.cfg.alert_window_minutes,
                    self.cfg.alert_cooldown_minutes,
                )
                .run()
                .await?;
                Ok(format!(
                    "alert check: {} checked, {} triggered, {} notifications, {} in cooldown",
                    s.checked, s.triggered, s.notifications_sent, s.in_cooldown
                ))
            }
        }
    }

    async fn send_digest(&self, job: &DailyAggregationJob, day: Option<NaiveDate>) {
        let day = day.unwrap_or_else(aggregation::yesterday);
        match job.digest(day).await {
            Ok(Some(digest)) => match self.notifier.send_daily_summary(&digest).await {
                Ok(true) => info!("Daily summary for {day} sent"),
                Ok(false) => {}
                Err(e) => error!("Failed to send daily summary: {e}"),
            },
            Ok(None) => info!("No daily stats for {day}, summary not sent"),
            Err(e) => error!("Failed to build daily summary: {e:#}"),
        }
    }

    fn emit(&self, evt: AppEvent) {
        if let Some(tx) = &self.evt_tx {
            let _ = tx.send(evt);
        }
    }
}
