use crate::app_state::{AppEvent, DailyRow, JobsSnapshot, ReadingRow, StationRow};
use crate::pipeline::Scheduler;
use crate::storage::repository::{
    AlertRepository, DailyStatsRepository, LogRepository, PollutantRepository, ReadingRepository,
    StationRepository,
};
use chrono::DateTime;
use sea_orm::DatabaseConnection;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// 详情页读数条数（6 种污染物 × 最近 8 个时刻）
const DETAIL_READINGS: u64 = 48;
const DETAIL_DAILY_ROWS: u64 = 60;
const JOB_LOG_ROWS: u64 = 30;
const INBOX_ROWS: u64 = 10;

pub async fn load_stations(db: &DatabaseConnection) -> Result<Vec<StationRow>, sea_orm::DbErr> {
    let latest: HashMap<i32, (i64, Option<i32>)> = StationRepository::latest_aqi(db)
        .await?
        .into_iter()
        .map(|r| (r.station_id, (r.recorded_at, r.aqi)))
        .collect();
    Ok(StationRepository::list_all(db)
        .await?
        .into_iter()
        .map(|s| {
            let (last_seen, latest_aqi) = match latest.get(&s.id) {
                Some(&(ts, aqi)) => (Some(ts), aqi),
                None => (None, None),
            };
            StationRow {
                id: s.id,
                name: s.name,
                city: s.city,
                country: s.country,
                latest_aqi,
                last_seen,
            }
        })
        .collect())
}

pub async fn load_station_detail(
    db: &DatabaseConnection,
    station_id: i32,
) -> Result<AppEvent, sea_orm::DbErr> {
    let pollutants: HashMap<i32, (String, String)> = PollutantRepository::list_all(db)
        .await?
        .into_iter()
        .map(|p| (p.id, (p.name, p.unit)))
        .collect();
    let name_of = |id: i32| {
        pollutants
            .get(&id)
            .cloned()
            .unwrap_or_else(|| (format!("#{id}"), String::new()))
    };

    let readings = ReadingRepository::recent_for_station(db, station_id, DETAIL_READINGS)
        .await?
        .into_iter()
        .map(|r| {
            let (pollutant, unit) = name_of(r.pollutant_id);
            ReadingRow {
                recorded_at: r.recorded_at,
                pollutant,
                unit,
                value: r.value,
                aqi: r.aqi,
            }
        })
        .collect();

    let daily = DailyStatsRepository::recent_for_station(db, station_id, DETAIL_DAILY_ROWS)
        .await?
        .into_iter()
        .map(|d| DailyRow {
            day: d.day,
            pollutant: name_of(d.pollutant_id).0,
            avg_value: d.avg_value,
            p95_value: d.p95_value,
            avg_aqi: d.avg_aqi,
            max_aqi: d.max_aqi,
            readings_count: d.readings_count,
        })
        .collect();

    Ok(AppEvent::StationDetail {
        station_id,
        readings,
        daily,
    })
}

pub async fn load_jobs(
    db: &DatabaseConnection,
    scheduler: &Scheduler,
) -> Result<JobsSnapshot, sea_orm::DbErr> {
    Ok(JobsSnapshot {
        status: scheduler.status(),
        logs: LogRepository::recent_job_logs(db, JOB_LOG_ROWS).await?,
    })
}

/// 用户的站内告警通知，最新的在前
pub async fn load_inbox(
    db: &DatabaseConnection,
    user_id: i32,
) -> Result<Vec<String>, sea_orm::DbErr> {
    Ok(AlertRepository::recommendations_for(db, user_id, INBOX_ROWS)
        .await?
        .into_iter()
        .map(|r| {
            let when = DateTime::from_timestamp(r.created_at, 0)
                .map(|t| t.format("%m-%d %H:%M").to_string())
                .unwrap_or_default();
            format!("[{when}] 站点 {}: {}", r.station_id, r.message)
        })
        .collect())
}

/// 停用告警；不存在或已停用时返回 Error 事件
pub async fn deactivate_alert(db: &DatabaseConnection, alert_id: i32) -> AppEvent {
    let alert = match AlertRepository::find_by_id(db, alert_id).await {
        Ok(Some(alert)) => alert,
        Ok(None) => return AppEvent::Error(format!("告警 [ID: {}] 不存在", alert_id)),
        Err(e) => return AppEvent::Error(format!("停用告警失败: {}", e)),
    };
    if !alert.is_active {
        return AppEvent::Error(format!("告警 [ID: {}] 已经停用", alert_id));
    }
    match AlertRepository::deactivate(db, alert_id).await {
        Ok(_) => AppEvent::Log(format!("✓ 告警 [ID: {}] 已停用", alert_id)),
        Err(e) => AppEvent::Error(format!("停用告警失败: {}", e)),
    }
}

/// 周期性刷新站点列表与任务状态
pub async fn refresh_ui(
    db: &DatabaseConnection,
    scheduler: &Scheduler,
    tx: &mpsc::UnboundedSender<AppEvent>,
) {
    if let Ok(stations) = load_stations(db).await {
        let _ = tx.send(AppEvent::Stations(stations));
    }
    if let Ok(jobs) = load_jobs(db, scheduler).await {
        let _ = tx.send(AppEvent::Jobs(jobs));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::notify::testing::RecordingNotifier;
    use crate::pipeline::JobId;
    use crate::storage::connection::memory_db;
    use std::sync::Arc;

    #[tokio::test]
    async fn views_reflect_ingested_data() {
        let db = memory_db().await;
        let scheduler = Scheduler::new(
            db.clone(),
            Arc::new(AppConfig::default()),
            Arc::new(RecordingNotifier::default()),
            None,
        );
        assert!(load_stations(&db).await.unwrap().is_empty());

        scheduler.run_now(JobId::Ingestion).await.unwrap();

        let stations = load_stations(&db).await.unwrap();
        assert!(!stations.is_empty());
        assert!(stations.iter().all(|s| s.latest_aqi.is_some()));

        let AppEvent::StationDetail { readings, daily, .. } =
            load_station_detail(&db, stations[0].id).await.unwrap()
        else {
            panic!("expected station detail");
        };
        assert!(!readings.is_empty());
        assert!(readings.iter().all(|r| !r.unit.is_empty()));
        assert!(daily.is_empty());

        let jobs = load_jobs(&db, &scheduler).await.unwrap();
        assert_eq!(jobs.status.len(), 3);
        assert_eq!(jobs.logs.len(), 3);
    }

    #[tokio::test]
    async fn alert_off_and_inbox() {
        use crate::pipeline::alerts::{create_alert, NotificationMethod, TriggerCondition};
        use crate::storage::repository::UserRepository;

        let db = memory_db().await;
        let scheduler = Scheduler::new(
            db.clone(),
            Arc::new(AppConfig::default()),
            Arc::new(RecordingNotifier::default()),
            None,
        );
        scheduler.run_now(JobId::Ingestion).await.unwrap();
        let station_id = load_stations(&db).await.unwrap()[0].id;
        let user = UserRepository::create(&db, "ana", "ana@example.com", None, "Citizen")
            .await
            .unwrap();
        assert!(load_inbox(&db, user.id).await.unwrap().is_empty());

        // 阈值 0：任何读数都会触发站内通知
        let alert = create_alert(
            &db,
            user.id,
            station_id,
            "PM2.5",
            TriggerCondition::Exceeds,
            0.0,
            NotificationMethod::InApp,
        )
        .await
        .unwrap();
        scheduler.run_now(JobId::AlertCheck).await.unwrap();
        let inbox = load_inbox(&db, user.id).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert!(inbox[0].contains(&format!("站点 {station_id}")));

        assert!(matches!(deactivate_alert(&db, alert.id).await, AppEvent::Log(_)));
        assert!(matches!(deactivate_alert(&db, alert.id).await, AppEvent::Error(ref m) if m.contains("已经停用")));
        assert!(matches!(deactivate_alert(&db, 999).await, AppEvent::Error(ref m) if m.contains("不存在")));
    }
}
