use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

#[derive(thiserror::Error, Debug)]
pub enum FeedError {
    #[error("http error: {0}")]
    Http(String),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("unsupported provider: {0}")]
    Unsupported(String),
}

/// 一个空气质量数据源：每次调用返回一批原始记录
#[async_trait]
pub trait AirFeed: Send + Sync {
    async fn fetch(&self) -> Result<Vec<Value>, FeedError>;
}

/// 原始记录的载荷格式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderFormat {
    Aqicn,
    Google,
    Iqair,
}

impl ProviderFormat {
    /// 先看 format 列，再按名称关键字猜
    pub fn detect(format: &str, name: &str) -> Option<Self> {
        Self::from_keyword(format).or_else(|| Self::from_keyword(name))
    }

    fn from_keyword(s: &str) -> Option<Self> {
        let s = s.to_ascii_lowercase();
        if s.contains("aqicn") || s.contains("waqi") {
            Some(ProviderFormat::Aqicn)
        } else if s.contains("google") {
            Some(ProviderFormat::Google)
        } else if s.contains("iqair") || s.contains("airvisual") {
            Some(ProviderFormat::Iqair)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderFormat::Aqicn => "aqicn",
            ProviderFormat::Google => "google",
            ProviderFormat::Iqair => "iqair",
        }
    }
}

impl fmt::Display for ProviderFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_prefers_format_column() {
        assert_eq!(
            ProviderFormat::detect("iqair", "Google-ish"),
            Some(ProviderFormat::Iqair)
        );
        assert_eq!(
            ProviderFormat::detect("", "WAQI feed"),
            Some(ProviderFormat::Aqicn)
        );
        assert_eq!(
            ProviderFormat::detect("custom", "AirVisual"),
            Some(ProviderFormat::Iqair)
        );
        assert_eq!(ProviderFormat::detect("csv", "Local sensor"), None);
    }
}
