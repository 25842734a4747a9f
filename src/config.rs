use std::time::Duration;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// 数据源获取模式：mock 使用内置模拟数据，http 请求 provider 配置的 api_endpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedMode {
    Mock,
    Http,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub feed_mode: FeedMode,
    pub provider_proxy: Option<String>,
    pub http_timeout: Duration,
    pub ingest_interval_minutes: u64,
    pub aggregate_hour: u32,
    pub aggregate_minute: u32,
    pub alert_check_seconds: u64,
    pub alert_window_minutes: i64,
    pub alert_cooldown_minutes: i64,
    pub headless: bool,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    /// Bot API 地址，自建 Bot API server 时覆盖
    pub telegram_api_base: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://airq.db?mode=rwc".to_string(),
            feed_mode: FeedMode::Mock,
            provider_proxy: None,
            http_timeout: Duration::from_secs(15),
            ingest_interval_minutes: 30,
            aggregate_hour: 2,
            aggregate_minute: 0,
            alert_check_seconds: 60,
            alert_window_minutes: 60,
            alert_cooldown_minutes: 30,
            headless: false,
            telegram_bot_token: None,
            telegram_chat_id: None,
            telegram_api_base: "https://api.telegram.org".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 从任意 key-value 来源构建配置（测试中用闭包代替环境变量）
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut cfg = AppConfig::default();

        if let Some(url) = get("DATABASE_URL") {
            cfg.database_url = url;
        }
        if let Some(mode) = get("FEED_MODE") {
            cfg.feed_mode = match mode.to_ascii_lowercase().as_str() {
                "mock" => FeedMode::Mock,
                "http" => FeedMode::Http,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "FEED_MODE",
                        value: mode,
                    })
                }
            };
        }
        cfg.provider_proxy = get("PROVIDER_PROXY");
        if let Some(secs) = parse_num::<u64>(get("HTTP_TIMEOUT_SECONDS"), "HTTP_TIMEOUT_SECONDS")? {
            cfg.http_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(m) = parse_num::<u64>(get("INGEST_INTERVAL_MINUTES"), "INGEST_INTERVAL_MINUTES")? {
            if m == 0 {
                return Err(ConfigError::Invalid {
                    key: "INGEST_INTERVAL_MINUTES",
                    value: m.to_string(),
                });
            }
            cfg.ingest_interval_minutes = m;
        }
        if let Some(at) = get("AGGREGATE_AT_UTC") {
            let (h, m) = parse_hh_mm(&at).ok_or(ConfigError::Invalid {
                key: "AGGREGATE_AT_UTC",
                value: at.clone(),
            })?;
            cfg.aggregate_hour = h;
            cfg.aggregate_minute = m;
        }
        if let Some(s) = parse_num::<u64>(get("ALERT_CHECK_SECONDS"), "ALERT_CHECK_SECONDS")? {
            cfg.alert_check_seconds = s.max(1);
        }
        if let Some(m) = parse_num::<i64>(get("ALERT_WINDOW_MINUTES"), "ALERT_WINDOW_MINUTES")? {
            cfg.alert_window_minutes = m.max(1);
        }
        if let Some(m) = parse_num::<i64>(get("ALERT_COOLDOWN_MINUTES"), "ALERT_COOLDOWN_MINUTES")? {
            cfg.alert_cooldown_minutes = m.max(0);
        }
        if let Some(flag) = get("AIRQ_HEADLESS") {
            cfg.headless = matches!(
                flag.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        cfg.telegram_bot_token = get("TELEGRAM_BOT_TOKEN");
        cfg.telegram_chat_id = get("TELEGRAM_CHAT_ID");
        if let Some(base) = get("TELEGRAM_API_BASE") {
            cfg.telegram_api_base = base.trim_end_matches('/').to_string();
        }

        Ok(cfg)
    }
}

fn parse_num<T: std::str::FromStr>(
    raw: Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match raw {
        None => Ok(None),
        Some(v) => v
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: v }),
    }
}

fn parse_hh_mm(s: &str) -> Option<(u32, u32)> {
    let (h, m) = s.split_once(':')?;
    let h: u32 = h.trim().parse().ok()?;
    let m: u32 = m.trim().parse().ok()?;
    if h < 24 && m < 60 {
        Some((h, m))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cfg_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_when_nothing_set() {
        let cfg = cfg_from(&[]).unwrap();
        assert_eq!(cfg.feed_mode, FeedMode::Mock);
        assert_eq!(cfg.ingest_interval_minutes, 30);
        assert_eq!((cfg.aggregate_hour, cfg.aggregate_minute), (2, 0));
        assert!(cfg.telegram_bot_token.is_none());
    }

    #[test]
    fn parses_overrides() {
        let cfg = cfg_from(&[
            ("FEED_MODE", "HTTP"),
            ("INGEST_INTERVAL_MINUTES", "10"),
            ("AGGREGATE_AT_UTC", "03:15"),
            ("AIRQ_HEADLESS", "true"),
            ("TELEGRAM_CHAT_ID", "  "),
            ("TELEGRAM_API_BASE", "http://127.0.0.1:8081/"),
        ])
        .unwrap();
        assert_eq!(cfg.feed_mode, FeedMode::Http);
        assert_eq!(cfg.ingest_interval_minutes, 10);
        assert_eq!((cfg.aggregate_hour, cfg.aggregate_minute), (3, 15));
        assert!(cfg.headless);
        assert!(cfg.telegram_chat_id.is_none());
        assert_eq!(cfg.telegram_api_base, "http://127.0.0.1:8081");
    }

    #[test]
    fn rejects_bad_values() {
        assert!(cfg_from(&[("INGEST_INTERVAL_MINUTES", "abc")]).is_err());
        assert!(cfg_from(&[("INGEST_INTERVAL_MINUTES", "0")]).is_err());
        assert!(cfg_from(&[("AGGREGATE_AT_UTC", "25:00")]).is_err());
        assert!(cfg_from(&[("FEED_MODE", "ftp")]).is_err());
    }
}
