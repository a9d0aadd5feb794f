use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt, TryStreamExt};
use http::{header, HeaderMap, StatusCode};

use crate::{playback::ByteRange, Error, Result};

/// Status, headers and a not-yet-consumed body of an upstream audio
/// response.
pub struct UpstreamResponse {
  pub status: StatusCode,
  pub headers: HeaderMap,
  pub body: BoxStream<'static, Result<Bytes>>,
}

impl std::fmt::Debug for UpstreamResponse {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("UpstreamResponse")
      .field("status", &self.status)
      .field("headers", &self.headers)
      .finish_non_exhaustive()
  }
}

#[async_trait]
pub trait AudioFetcher: Send + Sync {
  async fn fetch(
    &self,
    url: &str,
    range: Option<ByteRange>,
  ) -> Result<UpstreamResponse>;
}

pub struct HttpFetcher {
  client: reqwest::Client,
  // deadline for the response headers; the body may stream indefinitely
  timeout: Duration,
}

impl HttpFetcher {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .connect_timeout(timeout)
      .build()?;
    Ok(Self { client, timeout })
  }
}

#[async_trait]
impl AudioFetcher for HttpFetcher {
  async fn fetch(
    &self,
    url: &str,
    range: Option<ByteRange>,
  ) -> Result<UpstreamResponse> {
    let mut req = self.client.get(url).header("User-Agent", "Mozilla/5.0");
    if let Some(range) = range {
      req = req.header(header::RANGE, range.range_header());
    }

    let resp = tokio::time::timeout(self.timeout, req.send())
      .await
      .map_err(|_| {
        Error::ProxyStream(format!(
          "no response from upstream within {:?}",
          self.timeout
        ))
      })??;

    Ok(UpstreamResponse {
      status: resp.status(),
      headers: resp.headers().clone(),
      body: resp.bytes_stream().map_err(Error::from).boxed(),
    })
  }
}
