use crate::providers::types::{AirFeed, FeedError};
use async_trait::async_trait;
use log::warn;
use serde_json::Value;
use std::time::Duration;

/// 构建访问外部数据源的 HTTP 客户端；代理不写协议时按 socks5h 处理
pub(crate) fn build_feed_http_client(
    proxy: Option<&str>,
    timeout: Duration,
) -> Result<reqwest::Client, FeedError> {
    let mut builder = reqwest::Client::builder().timeout(timeout);

    if let Some(raw) = proxy {
        let t = raw.trim();
        if !t.is_empty() {
            let url = if t.contains("://") {
                t.to_string()
            } else {
                format!("socks5h://{}", t)
            };
            let proxy = reqwest::Proxy::all(&url).map_err(|e| FeedError::Http(e.to_string()))?;
            builder = builder.proxy(proxy);
        }
    }

    builder.build().map_err(|e| FeedError::Http(e.to_string()))
}

#[derive(Clone)]
pub struct HttpFeed {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpFeed {
    pub fn new(client: reqwest::Client, endpoint: String, api_key: Option<String>) -> Self {
        Self {
            client,
            endpoint,
            api_key,
        }
    }
}

#[async_trait]
impl AirFeed for HttpFeed {
    async fn fetch(&self) -> Result<Vec<Value>, FeedError> {
        let mut req = self.client.get(&self.endpoint);
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.is_empty()) {
            req = req.query(&[("token", key)]);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                FeedError::Http("timeout".to_string())
            } else {
                FeedError::Http(e.to_string())
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            warn!("feed {} returned {}", self.endpoint, status);
            return Err(FeedError::Status(status.as_u16()));
        }

        let raw = resp
            .text()
            .await
            .map_err(|e| FeedError::Http(e.to_string()))?;
        split_records(&raw)
    }
}

/// 兼容三种返回结构：记录数组、{ "data": [...] }、单条记录对象
pub fn split_records(raw: &str) -> Result<Vec<Value>, FeedError> {
    let v: Value = serde_json::from_str(raw)
        .map_err(|e| FeedError::InvalidResponse(format!("json parse failed: {e}")))?;
    match v {
        Value::Array(items) => Ok(items),
        Value::Object(ref obj) => match obj.get("data") {
            Some(Value::Array(items)) => Ok(items.clone()),
            _ => Ok(vec![v]),
        },
        _ => Err(FeedError::InvalidResponse(format!(
            "expected object or array, got {}",
            raw.chars().take(80).collect::<String>()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::serve_once;

    #[test]
    fn splits_all_body_shapes() {
        assert_eq!(split_records(r#"[{"a":1},{"a":2}]"#).unwrap().len(), 2);
        assert_eq!(split_records(r#"{"data":[{"a":1}]}"#).unwrap().len(), 1);
        // AQICN 的单条记录 data 是对象，整条保留
        let single = split_records(r#"{"status":"ok","data":{"aqi":5}}"#).unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0]["status"], "ok");
        assert!(split_records("42").is_err());
        assert!(split_records("not json").is_err());
    }

    #[test]
    fn proxy_without_scheme_is_accepted() {
        assert!(build_feed_http_client(Some("127.0.0.1:1080"), Duration::from_secs(5)).is_ok());
        assert!(build_feed_http_client(None, Duration::from_secs(5)).is_ok());
    }

    fn feed(base: &str, api_key: Option<&str>) -> HttpFeed {
        let client = build_feed_http_client(None, Duration::from_secs(5)).unwrap();
        HttpFeed::new(
            client,
            format!("{base}/feed/bogota/"),
            api_key.map(str::to_string),
        )
    }

    #[tokio::test]
    async fn sends_token_and_splits_body() {
        let (base, req) = serve_once(200, r#"{"data":[{"a":1},{"a":2}]}"#).await;
        let records = feed(&base, Some("secret")).fetch().await.unwrap();
        assert_eq!(records.len(), 2);

        let raw = req.await.unwrap();
        assert!(raw.starts_with("GET /feed/bogota/?token=secret "));
    }

    #[tokio::test]
    async fn no_token_when_key_is_empty() {
        let (base, req) = serve_once(200, "[]").await;
        assert!(feed(&base, Some("")).fetch().await.unwrap().is_empty());
        assert!(req.await.unwrap().starts_with("GET /feed/bogota/ "));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let (base, _req) = serve_once(503, r#"{"status":"error"}"#).await;
        let err = feed(&base, None).fetch().await.unwrap_err();
        assert!(matches!(err, FeedError::Status(503)));
    }
}
