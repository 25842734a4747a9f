use crate::aqi::AqiBand;
use crate::config::AppConfig;
use crate::notify::{AlertMessage, DailyDigest, Notifier, NotifyError};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use log::{debug, info, warn};

const FOOTER: &str = "🌍 Air Quality Monitor";

#[derive(Clone)]
pub struct TelegramNotifier {
    client: reqwest::Client,
    bot_token: Option<String>,
    chat_id: Option<String>,
    api_base: String,
}

impl TelegramNotifier {
    pub fn from_config(cfg: &AppConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(cfg.http_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let n = Self {
            client,
            bot_token: cfg.telegram_bot_token.clone(),
            chat_id: cfg.telegram_chat_id.clone(),
            api_base: cfg.telegram_api_base.clone(),
        };
        if n.enabled() {
            info!("Telegram notifier initialized");
        } else if n.bot_token.is_none() {
            warn!("Telegram notifications disabled: TELEGRAM_BOT_TOKEN not configured");
        } else {
            warn!("Telegram notifications disabled: TELEGRAM_CHAT_ID not configured");
        }
        n
    }

    pub fn enabled(&self) -> bool {
        self.bot_token.is_some() && self.chat_id.is_some()
    }

    async fn send_message(&self, text: String) -> Result<bool, NotifyError> {
        let (Some(token), Some(chat_id)) = (&self.bot_token, &self.chat_id) else {
            debug!("Telegram notifications disabled, skipping");
            return Ok(false);
        };
        let url = format!("{}/bot{}/sendMessage", self.api_base, token);
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
        });
        let resp = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::Http(e.without_url().to_string()))?;
        if !resp.status().is_success() {
            return Err(NotifyError::Status(resp.status().as_u16()));
        }
        Ok(true)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_alert(&self, msg: &AlertMessage) -> Result<bool, NotifyError> {
        let sent = self.send_message(format_alert(msg)).await?;
        if sent {
            info!("Alert sent to Telegram: {} - {}", msg.station, msg.pollutant);
        }
        Ok(sent)
    }

    async fn send_daily_summary(&self, digest: &DailyDigest) -> Result<bool, NotifyError> {
        let sent = self.send_message(format_daily_summary(digest)).await?;
        if sent {
            info!("Daily summary sent to Telegram");
        }
        Ok(sent)
    }
}

pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

pub fn format_alert(msg: &AlertMessage) -> String {
    let band = AqiBand::from_aqi(msg.aqi.unwrap_or(0));
    let aqi = msg
        .aqi
        .map(|a| a.to_string())
        .unwrap_or_else(|| "n/a".to_string());
    let when = Utc
        .timestamp_opt(msg.recorded_at, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_default();

    let mut out = format!("🚨 <b>AIR QUALITY ALERT</b> {}\n\n", band.marker());
    out += &format!(
        "📍 <b>Station:</b> {} - {}\n",
        escape_html(&msg.station),
        escape_html(&msg.city)
    );
    out += &format!("🧪 <b>Pollutant:</b> {}\n", escape_html(&msg.pollutant));
    if let Some(name) = &msg.user_name {
        out += &format!("👤 <b>For:</b> {}\n", escape_html(name));
    }
    out += "\n";
    out += "📊 <b>Current values:</b>\n";
    out += &format!("• Concentration: {:.2} {}\n", msg.value, escape_html(&msg.unit));
    out += &format!("• AQI: {aqi}\n");
    out += &format!("• Threshold: {}\n", msg.threshold);
    out += &format!("• Condition: {}\n\n", escape_html(&msg.condition));
    out += &format!("⚠️ <b>Level:</b> {}\n", band.label());
    out += &format!("🕐 <b>Time:</b> {when}\n\n");
    out += &format!("💡 <b>Recommendation:</b>\n{}\n\n", band.health_advice());
    out += FOOTER;
    out
}

pub fn format_daily_summary(d: &DailyDigest) -> String {
    let band = AqiBand::from_mean(d.avg_aqi);
    let mut out = format!("📊 <b>DAILY SUMMARY - AIR QUALITY</b> {}\n\n", band.marker());
    out += &format!("📅 <b>Date:</b> {}\n", d.date);
    out += &format!("📈 <b>Total readings:</b> {}\n\n", d.total_readings);
    out += "<b>Air quality index:</b>\n";
    out += &format!("• Mean AQI: {:.1}\n", d.avg_aqi);
    out += &format!("• Max AQI: {}\n\n", d.max_aqi);
    out += "<b>By station:</b>";
    for s in d.stations.iter().take(5) {
        out += &format!(
            "\n{} {}: AQI {:.1}",
            AqiBand::from_mean(s.avg_aqi).marker(),
            escape_html(&s.name),
            s.avg_aqi
        );
    }
    out += "\n\n";
    out += FOOTER;
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::serve_once;
    use crate::notify::StationDigest;

    fn alert() -> AlertMessage {
        AlertMessage {
            station: "Kennedy".to_string(),
            city: "Bogotá".to_string(),
            pollutant: "PM2.5".to_string(),
            unit: "μg/m³".to_string(),
            value: 75.456,
            aqi: Some(161),
            threshold: 50.0,
            condition: "exceeds".to_string(),
            recorded_at: 1_710_079_200,
            user_name: None,
        }
    }

    #[test]
    fn alert_message_contains_values_and_advice() {
        let text = format_alert(&alert());
        assert!(text.contains("Kennedy - Bogotá"));
        assert!(text.contains("Concentration: 75.46 μg/m³"));
        assert!(text.contains("AQI: 161"));
        assert!(text.contains("Threshold: 50"));
        assert!(text.contains("Condition: exceeds"));
        assert!(text.contains("🔴"));
        assert!(text.contains("Level:</b> Unhealthy"));
        assert!(text.contains("2024-03-10 14:00 UTC"));
        assert!(text.contains(AqiBand::Unhealthy.health_advice()));
        assert!(!text.contains("For:"));
    }

    #[test]
    fn station_names_are_escaped() {
        let mut msg = alert();
        msg.station = "A&B <north>".to_string();
        assert!(format_alert(&msg).contains("A&amp;B &lt;north&gt;"));
    }

    #[test]
    fn summary_lists_at_most_five_stations() {
        let d = DailyDigest {
            date: "2024-03-09".to_string(),
            total_readings: 1234,
            avg_aqi: 72.345,
            max_aqi: 180,
            stations: (0..7)
                .map(|i| StationDigest {
                    name: format!("S{i}"),
                    avg_aqi: 100.0 - i as f64,
                })
                .collect(),
        };
        let text = format_daily_summary(&d);
        assert!(text.contains("Mean AQI: 72.3"));
        assert!(text.contains("Max AQI: 180"));
        assert!(text.contains("Total readings:</b> 1234"));
        assert!(text.contains("S4: AQI 96.0"));
        assert!(!text.contains("S5"));
    }

    #[tokio::test]
    async fn disabled_notifier_reports_false() {
        let n = TelegramNotifier::from_config(&AppConfig::default());
        assert!(!n.enabled());
        assert!(!n.send_alert(&alert()).await.unwrap());
    }

    fn notifier(base: &str) -> TelegramNotifier {
        TelegramNotifier::from_config(&AppConfig {
            telegram_bot_token: Some("123:abc".to_string()),
            telegram_chat_id: Some("-100".to_string()),
            telegram_api_base: base.to_string(),
            ..AppConfig::default()
        })
    }

    #[tokio::test]
    async fn posts_html_message_to_bot_api() {
        let (base, req) = serve_once(200, r#"{"ok":true}"#).await;
        let mut msg = alert();
        msg.user_name = Some("Ana".to_string());
        assert!(notifier(&base).send_alert(&msg).await.unwrap());

        let raw = req.await.unwrap();
        assert!(raw.starts_with("POST /bot123:abc/sendMessage "));
        assert!(raw.contains(r#""parse_mode":"HTML""#));
        assert!(raw.contains(r#""chat_id":"-100""#));
        assert!(raw.contains("For:</b> Ana"));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let (base, _req) = serve_once(403, r#"{"ok":false}"#).await;
        let err = notifier(&base).send_alert(&alert()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Status(403)));
    }
}
