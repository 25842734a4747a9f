pub mod http;
pub mod mock;
pub mod types;

pub use http::HttpFeed;
pub use mock::{AqicnMock, GoogleMock, IqairMock};
pub use types::{AirFeed, FeedError, ProviderFormat};

use crate::config::{AppConfig, FeedMode};
use crate::storage::entity::provider::Model as ProviderModel;
use async_trait::async_trait;
use log::warn;
use serde_json::Value;

#[derive(Clone)]
pub enum InnerFeed {
    Aqicn(AqicnMock),
    Google(GoogleMock),
    Iqair(IqairMock),
    Http(HttpFeed),
}

#[derive(Clone)]
pub struct AnyFeed {
    inner: InnerFeed,
    format: ProviderFormat,
}

impl AnyFeed {
    /// 按 provider 配置和 FEED_MODE 选择数据源
    pub fn for_provider(provider: &ProviderModel, cfg: &AppConfig) -> Result<Self, FeedError> {
        let format = ProviderFormat::detect(&provider.format, &provider.name)
            .ok_or_else(|| FeedError::Unsupported(provider.name.clone()))?;

        if cfg.feed_mode == FeedMode::Http {
            match provider.api_endpoint.as_deref().map(str::trim) {
                Some(endpoint) if !endpoint.is_empty() => {
                    let client = http::build_feed_http_client(
                        cfg.provider_proxy.as_deref(),
                        cfg.http_timeout,
                    )?;
                    return Ok(Self {
                        inner: InnerFeed::Http(HttpFeed::new(
                            client,
                            endpoint.to_string(),
                            provider.api_key.clone(),
                        )),
                        format,
                    });
                }
                _ => warn!(
                    "provider {} has no api_endpoint, falling back to mock feed",
                    provider.name
                ),
            }
        }

        let inner = match format {
            ProviderFormat::Aqicn => InnerFeed::Aqicn(AqicnMock),
            ProviderFormat::Google => InnerFeed::Google(GoogleMock),
            ProviderFormat::Iqair => InnerFeed::Iqair(IqairMock),
        };
        Ok(Self { inner, format })
    }

    pub fn format(&self) -> ProviderFormat {
        self.format
    }

    pub fn is_mock(&self) -> bool {
        !matches!(self.inner, InnerFeed::Http(_))
    }
}

#[async_trait]
impl AirFeed for AnyFeed {
    async fn fetch(&self) -> Result<Vec<Value>, FeedError> {
        match &self.inner {
            InnerFeed::Aqicn(f) => f.fetch().await,
            InnerFeed::Google(f) => f.fetch().await,
            InnerFeed::Iqair(f) => f.fetch().await,
            InnerFeed::Http(f) => f.fetch().await,
        }
    }
}
