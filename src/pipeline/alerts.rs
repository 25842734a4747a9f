use crate::aqi::AqiBand;
use crate::notify::{AlertMessage, Notifier};
use crate::storage::entity::alert::Model as AlertModel;
use crate::storage::entity::reading::Model as ReadingModel;
use crate::storage::repository::{
    AlertRepository, NewAlert, PollutantRepository, ReadingRepository, StationRepository,
    UserRepository,
};
use chrono::Utc;
use log::{debug, error, info, warn};
use sea_orm::DatabaseConnection;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

pub const JOB_NAME: &str = "alert_check";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerCondition {
    Exceeds,
    Below,
    Equals,
}

impl TriggerCondition {
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            TriggerCondition::Exceeds => value > threshold,
            TriggerCondition::Below => value < threshold,
            TriggerCondition::Equals => (value - threshold).abs() < 0.01,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerCondition::Exceeds => "exceeds",
            TriggerCondition::Below => "below",
            TriggerCondition::Equals => "equals",
        }
    }

    /// 通知文本中的措辞
    pub fn describe(&self) -> &'static str {
        match self {
            TriggerCondition::Exceeds => "exceeds",
            TriggerCondition::Below => "is below",
            TriggerCondition::Equals => "equals",
        }
    }
}

impl FromStr for TriggerCondition {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exceeds" | ">" => Ok(TriggerCondition::Exceeds),
            "below" | "falls_below" | "<" => Ok(TriggerCondition::Below),
            "equals" | "=" => Ok(TriggerCondition::Equals),
            other => Err(AlertError::UnknownCondition(other.to_string())),
        }
    }
}

impl fmt::Display for TriggerCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationMethod {
    Telegram,
    Email,
    InApp,
    All,
}

impl NotificationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationMethod::Telegram => "telegram",
            NotificationMethod::Email => "email",
            NotificationMethod::InApp => "in-app",
            NotificationMethod::All => "all",
        }
    }

    fn includes(&self, channel: NotificationMethod) -> bool {
        *self == NotificationMethod::All || *self == channel
    }
}

impl FromStr for NotificationMethod {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "telegram" => Ok(NotificationMethod::Telegram),
            "email" => Ok(NotificationMethod::Email),
            "in-app" | "in_app" | "inapp" => Ok(NotificationMethod::InApp),
            "all" => Ok(NotificationMethod::All),
            other => Err(AlertError::UnknownMethod(other.to_string())),
        }
    }
}

impl fmt::Display for NotificationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AlertError {
    #[error("unknown trigger condition: {0}")]
    UnknownCondition(String),
    #[error("unknown notification method: {0}")]
    UnknownMethod(String),
    #[error("user {0} is not allowed to configure alerts")]
    PermissionDenied(i32),
    #[error("{0} not found")]
    NotFound(String),
    #[error("threshold must be a non-negative number")]
    InvalidThreshold,
    #[error(transparent)]
    Db(#[from] sea_orm::DbErr),
}

/// 创建告警：用户角色须拥有 configure_alerts
pub async fn create_alert(
    db: &DatabaseConnection,
    user_id: i32,
    station_id: i32,
    pollutant: &str,
    condition: TriggerCondition,
    threshold: f64,
    method: NotificationMethod,
) -> Result<AlertModel, AlertError> {
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(AlertError::InvalidThreshold);
    }
    if UserRepository::find_by_id(db, user_id).await?.is_none() {
        return Err(AlertError::NotFound(format!("user {user_id}")));
    }
    if !UserRepository::has_permission(db, user_id, "configure_alerts").await? {
        return Err(AlertError::PermissionDenied(user_id));
    }
    if StationRepository::find_by_id(db, station_id).await?.is_none() {
        return Err(AlertError::NotFound(format!("station {station_id}")));
    }
    let pollutant_name = pollutant
        .parse::<crate::aqi::Pollutant>()
        .map(|p| p.name().to_string())
        .unwrap_or_else(|_| pollutant.to_string());
    let pollutant = PollutantRepository::find_by_name(db, &pollutant_name)
        .await?
        .ok_or_else(|| AlertError::NotFound(format!("pollutant {pollutant_name}")))?;

    let alert = AlertRepository::create(
        db,
        NewAlert {
            user_id,
            station_id,
            pollutant_id: pollutant.id,
            threshold,
            trigger_condition: condition.as_str().to_string(),
            notification_method: method.as_str().to_string(),
        },
    )
    .await?;
    info!(
        "Alert {} created: user {} station {} {} {} {}",
        alert.id, user_id, station_id, pollutant.name, condition, threshold
    );
    Ok(alert)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertSummary {
    pub checked: usize,
    pub triggered: usize,
    pub notifications_sent: usize,
    pub in_cooldown: usize,
    pub errors: usize,
    pub duration_ms: u128,
}

#[derive(Clone)]
pub struct AlertChecker {
    db: DatabaseConnection,
    notifier: Arc<dyn Notifier>,
    window_minutes: i64,
    cooldown_minutes: i64,
}

impl AlertChecker {
    pub fn new(
        db: DatabaseConnection,
        notifier: Arc<dyn Notifier>,
        window_minutes: i64,
        cooldown_minutes: i64,
    ) -> Self {
        Self {
            db,
            notifier,
            window_minutes,
            cooldown_minutes,
        }
    }

    pub async fn run(&self) -> anyhow::Result<AlertSummary> {
        self.run_at(Utc::now().timestamp()).await
    }

    /// 以 now 为当前时间检查所有启用的告警
    pub async fn run_at(&self, now: i64) -> anyhow::Result<AlertSummary> {
        let started = Instant::now();
        let alerts = AlertRepository::list_active(&self.db).await?;
        let mut summary = AlertSummary::default();
        if alerts.is_empty() {
            debug!("No active alerts to check");
            return Ok(summary);
        }
        info!("Checking {} active alerts", alerts.len());

        for alert in alerts {
            summary.checked += 1;
            match self.check_one(&alert, now).await {
                Ok(Outcome::Quiet) => {}
                Ok(Outcome::Cooldown) => summary.in_cooldown += 1,
                Ok(Outcome::Fired { delivered }) => {
                    summary.triggered += 1;
                    summary.notifications_sent += delivered;
                }
                Err(e) => {
                    summary.errors += 1;
                    error!("Error checking alert {}: {e:#}", alert.id);
                }
            }
        }

        summary.duration_ms = started.elapsed().as_millis();
        info!(
            "Alert checker completed in {} ms. Sent {} notifications.",
            summary.duration_ms, summary.notifications_sent
        );
        Ok(summary)
    }

    async fn check_one(&self, alert: &AlertModel, now: i64) -> anyhow::Result<Outcome> {
        let condition: TriggerCondition = alert.trigger_condition.parse()?;
        let method: NotificationMethod = alert.notification_method.parse()?;

        let since = now - self.window_minutes * 60;
        let Some(reading) =
            ReadingRepository::latest_for(&self.db, alert.station_id, alert.pollutant_id, since)
                .await?
        else {
            debug!("No recent reading for alert {}", alert.id);
            return Ok(Outcome::Quiet);
        };

        if !condition.holds(reading.value, alert.threshold) {
            return Ok(Outcome::Quiet);
        }
        // 冷却从最近一次送达或最近一次尝试算起
        let last_attempt = AlertRepository::last_attempt_at(&self.db, alert.id).await?;
        if let Some(last) = alert.triggered_at.max(last_attempt) {
            if now < last + self.cooldown_minutes * 60 {
                debug!("Alert {} in cooldown period", alert.id);
                return Ok(Outcome::Cooldown);
            }
        }

        let delivered = self.dispatch(alert, method, condition, &reading, now).await?;
        if delivered > 0 {
            AlertRepository::mark_triggered(&self.db, alert.id, now).await?;
        }
        Ok(Outcome::Fired { delivered })
    }

    /// 按通知方式逐个通道发送，返回成功送达的通道数
    async fn dispatch(
        &self,
        alert: &AlertModel,
        method: NotificationMethod,
        condition: TriggerCondition,
        reading: &ReadingModel,
        now: i64,
    ) -> anyhow::Result<usize> {
        let mut delivered = 0;

        if method.includes(NotificationMethod::Telegram) {
            let msg = self.build_message(alert, condition, reading).await?;
            match self.notifier.send_alert(&msg).await {
                Ok(true) => {
                    self.record(alert, reading, NotificationMethod::Telegram, true, now)
                        .await?;
                    delivered += 1;
                }
                // 通道未启用不算一次尝试
                Ok(false) => debug!("Telegram disabled, alert {} not sent", alert.id),
                Err(e) => {
                    error!("Failed to send Telegram notification for alert {}: {e}", alert.id);
                    self.record(alert, reading, NotificationMethod::Telegram, false, now)
                        .await?;
                }
            }
        }

        if method.includes(NotificationMethod::Email) {
            // 没有邮件通道，只记日志
            info!("Email notification would be sent for alert {}", alert.id);
            self.record(alert, reading, NotificationMethod::Email, false, now)
                .await?;
        }

        if method.includes(NotificationMethod::InApp) {
            let band = AqiBand::from_aqi(reading.aqi.unwrap_or(0));
            let message = format!(
                "{} {} reading {:.2} (AQI {}): {}",
                band.marker(),
                band.label(),
                reading.value,
                reading
                    .aqi
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "n/a".to_string()),
                band.health_advice()
            );
            AlertRepository::add_recommendation(
                &self.db,
                alert.user_id,
                alert.station_id,
                band.index(),
                message,
            )
            .await?;
            self.record(alert, reading, NotificationMethod::InApp, true, now)
                .await?;
            delivered += 1;
        }

        Ok(delivered)
    }

    async fn build_message(
        &self,
        alert: &AlertModel,
        condition: TriggerCondition,
        reading: &ReadingModel,
    ) -> anyhow::Result<AlertMessage> {
        let station = StationRepository::find_by_id(&self.db, alert.station_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("station {} not found", alert.station_id))?;
        let pollutant = PollutantRepository::list_all(&self.db)
            .await?
            .into_iter()
            .find(|p| p.id == alert.pollutant_id)
            .ok_or_else(|| anyhow::anyhow!("pollutant {} not found", alert.pollutant_id))?;
        let user = UserRepository::find_by_id(&self.db, alert.user_id).await?;

        Ok(AlertMessage {
            station: station.name,
            city: station.city,
            pollutant: pollutant.name,
            unit: pollutant.unit,
            value: reading.value,
            aqi: reading.aqi,
            threshold: alert.threshold,
            condition: condition.describe().to_string(),
            recorded_at: reading.recorded_at,
            user_name: user.map(|u| u.full_name.unwrap_or(u.username)),
        })
    }

    async fn record(
        &self,
        alert: &AlertModel,
        reading: &ReadingModel,
        channel: NotificationMethod,
        delivered: bool,
        at: i64,
    ) -> Result<(), sea_orm::DbErr> {
        if !delivered && channel != NotificationMethod::Email {
            warn!("alert {} not delivered via {}", alert.id, channel);
        }
        AlertRepository::record_attempt(
            &self.db,
            alert.id,
            reading.id,
            reading.value,
            reading.aqi,
            channel.as_str(),
            delivered,
            at,
        )
        .await
    }
}

enum Outcome {
    Quiet,
    Cooldown,
    Fired { delivered: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::notify::testing::RecordingNotifier;
    use crate::notify::TelegramNotifier;
    use crate::storage::connection::memory_db;
    use crate::storage::entity::alert_history;
    use crate::storage::repository::{NewReading, StationDescriptor};
    use sea_orm::EntityTrait;

    const NOW: i64 = 1_710_079_200;

    #[test]
    fn conditions() {
        assert!(TriggerCondition::Exceeds.holds(50.1, 50.0));
        assert!(!TriggerCondition::Exceeds.holds(50.0, 50.0));
        assert!(TriggerCondition::Below.holds(9.0, 10.0));
        assert!(TriggerCondition::Equals.holds(10.005, 10.0));
        assert!(!TriggerCondition::Equals.holds(10.02, 10.0));
        assert_eq!(
            "falls_below".parse::<TriggerCondition>().unwrap(),
            TriggerCondition::Below
        );
        assert!("rises".parse::<TriggerCondition>().is_err());
        assert_eq!(
            "In-App".parse::<NotificationMethod>().unwrap(),
            NotificationMethod::InApp
        );
    }

    struct Fixture {
        db: DatabaseConnection,
        user_id: i32,
        station_id: i32,
        pollutant_id: i32,
    }

    async fn fixture(role: &str) -> Fixture {
        let db = memory_db().await;
        let user = UserRepository::create(&db, "ana", "ana@example.com", Some("Ana".into()), role)
            .await
            .unwrap();
        let station = StationRepository::get_or_create(
            &db,
            &StationDescriptor {
                name: "Kennedy".to_string(),
                city: "Bogotá".to_string(),
                country: "Colombia".to_string(),
                latitude: 4.63,
                longitude: -74.15,
            },
            None,
        )
        .await
        .unwrap();
        let pm25 = PollutantRepository::find_by_name(&db, "PM2.5")
            .await
            .unwrap()
            .unwrap();
        Fixture {
            db,
            user_id: user.id,
            station_id: station.id,
            pollutant_id: pm25.id,
        }
    }

    async fn add_reading(f: &Fixture, at: i64, value: f64) {
        ReadingRepository::insert_if_absent(
            &f.db,
            NewReading {
                station_id: f.station_id,
                pollutant_id: f.pollutant_id,
                provider_id: None,
                recorded_at: at,
                value,
                aqi: crate::aqi::calculate_aqi(crate::aqi::Pollutant::Pm25, value).ok(),
                raw_json: "{}".to_string(),
            },
        )
        .await
        .unwrap();
    }

    fn checker(f: &Fixture, notifier: Arc<RecordingNotifier>) -> AlertChecker {
        AlertChecker::new(f.db.clone(), notifier, 60, 30)
    }

    #[tokio::test]
    async fn creating_alert_requires_permission() {
        let f = fixture("Citizen").await;
        assert!(create_alert(
            &f.db,
            f.user_id,
            f.station_id,
            "pm25",
            TriggerCondition::Exceeds,
            35.0,
            NotificationMethod::Telegram
        )
        .await
        .is_ok());

        // 停用角色权限后再创建
        use crate::storage::entity::role_permission;
        use sea_orm::{ColumnTrait, QueryFilter};
        role_permission::Entity::delete_many()
            .filter(role_permission::Column::RoleId.is_not_null())
            .exec(&f.db)
            .await
            .unwrap();
        let err = create_alert(
            &f.db,
            f.user_id,
            f.station_id,
            "PM2.5",
            TriggerCondition::Exceeds,
            35.0,
            NotificationMethod::Telegram,
        )
        .await;
        assert!(matches!(err, Err(AlertError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn fires_once_then_respects_cooldown() {
        let f = fixture("Citizen").await;
        let alert = create_alert(
            &f.db,
            f.user_id,
            f.station_id,
            "PM2.5",
            TriggerCondition::Exceeds,
            35.0,
            NotificationMethod::Telegram,
        )
        .await
        .unwrap();
        add_reading(&f, NOW - 600, 80.0).await;

        let notifier = Arc::new(RecordingNotifier::default());
        let c = checker(&f, notifier.clone());

        let s = c.run_at(NOW).await.unwrap();
        assert_eq!(s.triggered, 1);
        assert_eq!(s.notifications_sent, 1);
        {
            let sent = notifier.alerts.lock().unwrap();
            assert_eq!(sent[0].station, "Kennedy");
            assert_eq!(sent[0].user_name.as_deref(), Some("Ana"));
        }

        let s = c.run_at(NOW + 10 * 60).await.unwrap();
        assert_eq!(s.in_cooldown, 1);
        assert_eq!(notifier.alerts.lock().unwrap().len(), 1);

        let stored = AlertRepository::find_by_id(&f.db, alert.id).await.unwrap().unwrap();
        assert_eq!(stored.triggered_at, Some(NOW));

        // 冷却结束后仍在窗口内，再次触发
        let s = c.run_at(NOW + 31 * 60).await.unwrap();
        assert_eq!(s.triggered, 1);
        assert_eq!(alert_history::Entity::find().all(&f.db).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn stale_readings_and_unmet_conditions_are_quiet() {
        let f = fixture("Citizen").await;
        create_alert(
            &f.db,
            f.user_id,
            f.station_id,
            "PM2.5",
            TriggerCondition::Below,
            10.0,
            NotificationMethod::Telegram,
        )
        .await
        .unwrap();
        add_reading(&f, NOW - 2 * 3600, 5.0).await;
        let notifier = Arc::new(RecordingNotifier::default());
        let s = checker(&f, notifier.clone()).run_at(NOW).await.unwrap();
        assert_eq!(s.triggered, 0);

        add_reading(&f, NOW - 60, 12.0).await;
        let s = checker(&f, notifier.clone()).run_at(NOW).await.unwrap();
        assert_eq!(s.triggered, 0);
        assert!(notifier.alerts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn in_app_alert_writes_recommendation() {
        let f = fixture("Researcher").await;
        create_alert(
            &f.db,
            f.user_id,
            f.station_id,
            "PM2.5",
            TriggerCondition::Exceeds,
            35.0,
            NotificationMethod::InApp,
        )
        .await
        .unwrap();
        add_reading(&f, NOW - 60, 80.0).await;

        let notifier = Arc::new(RecordingNotifier::default());
        let s = checker(&f, notifier.clone()).run_at(NOW).await.unwrap();
        assert_eq!(s.notifications_sent, 1);
        assert!(notifier.alerts.lock().unwrap().is_empty());

        let recs = AlertRepository::recommendations_for(&f.db, f.user_id, 10)
            .await
            .unwrap();
        assert_eq!(recs.len(), 1);
        // 80 μg/m³ -> AQI 163 -> Unhealthy
        assert_eq!(recs[0].aqi_band, AqiBand::Unhealthy.index());
        assert!(recs[0].message.contains(AqiBand::Unhealthy.health_advice()));
    }

    #[tokio::test]
    async fn failed_delivery_is_recorded_without_cooldown() {
        let f = fixture("Citizen").await;
        let alert = create_alert(
            &f.db,
            f.user_id,
            f.station_id,
            "PM2.5",
            TriggerCondition::Exceeds,
            35.0,
            NotificationMethod::Telegram,
        )
        .await
        .unwrap();
        add_reading(&f, NOW - 60, 80.0).await;

        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let c = checker(&f, notifier);
        let s = c.run_at(NOW).await.unwrap();
        assert_eq!(s.notifications_sent, 0);

        let stored = AlertRepository::find_by_id(&f.db, alert.id).await.unwrap().unwrap();
        assert_eq!(stored.triggered_at, None);
        let history = alert_history::Entity::find().all(&f.db).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(!history[0].delivered);

        // 失败后同样等冷却结束才重试
        let s = c.run_at(NOW + 60).await.unwrap();
        assert_eq!(s.in_cooldown, 1);
        assert_eq!(alert_history::Entity::find().all(&f.db).await.unwrap().len(), 1);
    }

    async fn active_alert(f: &Fixture, method: NotificationMethod) {
        create_alert(
            &f.db,
            f.user_id,
            f.station_id,
            "PM2.5",
            TriggerCondition::Exceeds,
            35.0,
            method,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn disabled_telegram_writes_no_history() {
        let f = fixture("Citizen").await;
        active_alert(&f, NotificationMethod::Telegram).await;
        add_reading(&f, NOW - 60, 80.0).await;

        let telegram = TelegramNotifier::from_config(&AppConfig::default());
        let c = AlertChecker::new(f.db.clone(), Arc::new(telegram), 60, 30);
        for minute in 0..30 {
            let s = c.run_at(NOW + minute * 60).await.unwrap();
            assert_eq!(s.notifications_sent, 0);
        }
        assert!(alert_history::Entity::find().all(&f.db).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn email_only_alert_is_recorded_once_per_cooldown() {
        let f = fixture("Citizen").await;
        active_alert(&f, NotificationMethod::Email).await;
        add_reading(&f, NOW - 60, 80.0).await;

        let c = checker(&f, Arc::new(RecordingNotifier::default()));
        for minute in 0..30 {
            c.run_at(NOW + minute * 60).await.unwrap();
        }
        assert_eq!(alert_history::Entity::find().all(&f.db).await.unwrap().len(), 1);

        c.run_at(NOW + 30 * 60).await.unwrap();
        assert_eq!(alert_history::Entity::find().all(&f.db).await.unwrap().len(), 2);
    }
}
