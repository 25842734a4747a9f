pub mod telegram;

pub use telegram::TelegramNotifier;

use async_trait::async_trait;

#[derive(thiserror::Error, Debug)]
pub enum NotifyError {
    #[error("http error: {0}")]
    Http(String),
    #[error("unexpected status {0}")]
    Status(u16),
}

/// 一次告警触发时需要展示的内容
#[derive(Clone, Debug, PartialEq)]
pub struct AlertMessage {
    pub station: String,
    pub city: String,
    pub pollutant: String,
    pub unit: String,
    pub value: f64,
    pub aqi: Option<i32>,
    pub threshold: f64,
    /// 条件的文字描述，如 "exceeds"
    pub condition: String,
    pub recorded_at: i64,
    pub user_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StationDigest {
    pub name: String,
    pub avg_aqi: f64,
}

/// 每日汇总
#[derive(Clone, Debug, PartialEq)]
pub struct DailyDigest {
    pub date: String,
    pub total_readings: i64,
    pub avg_aqi: f64,
    pub max_aqi: i32,
    /// 已按平均 AQI 降序
    pub stations: Vec<StationDigest>,
}

/// 返回 Ok(false) 表示通道未启用
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_alert(&self, msg: &AlertMessage) -> Result<bool, NotifyError>;
    async fn send_daily_summary(&self, digest: &DailyDigest) -> Result<bool, NotifyError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// 记录所有发送内容的通知器
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub alerts: Mutex<Vec<AlertMessage>>,
        pub digests: Mutex<Vec<DailyDigest>>,
        pub fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send_alert(&self, msg: &AlertMessage) -> Result<bool, NotifyError> {
            if self.fail {
                return Err(NotifyError::Status(502));
            }
            self.alerts.lock().unwrap().push(msg.clone());
            Ok(true)
        }

        async fn send_daily_summary(&self, digest: &DailyDigest) -> Result<bool, NotifyError> {
            if self.fail {
                return Err(NotifyError::Status(502));
            }
            self.digests.lock().unwrap().push(digest.clone());
            Ok(true)
        }
    }
}
