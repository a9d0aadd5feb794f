use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt};
use http::{
  header::{self, HeaderMap, HeaderName, HeaderValue},
  StatusCode,
};
use tracing::{info, warn};

use super::{parse_content_length, parse_range, ByteRange, Resolver};
use crate::{fetch::UpstreamResponse, util::ByteStream, Error, Result};

pub const PLAYBACK_SOURCE_HEADER: &str = "x-playback-source";

const MIRRORED_HEADERS: [HeaderName; 4] = [
  header::CONTENT_TYPE,
  header::CONTENT_LENGTH,
  header::CONTENT_RANGE,
  header::ACCEPT_RANGES,
];

/// Which resolution strategy produced the url being streamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackSource {
  Primary,
  CliFallback,
}

impl PlaybackSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      PlaybackSource::Primary => "primary",
      PlaybackSource::CliFallback => "cli-fallback",
    }
  }
}

/// A committed upstream response, ready to be sent to the client.
pub struct ProxiedStream {
  pub status: StatusCode,
  pub headers: HeaderMap,
  pub source: PlaybackSource,
  pub body: BoxStream<'static, Result<Bytes>>,
}

impl Resolver {
  /// Stream a track's audio through this server.
  ///
  /// A 403 from the upstream invalidates the cached url and retries once
  /// with a fresh resolution, then once more with a url from the CLI
  /// fallback.
  pub async fn proxy(
    &self,
    track_id: &str,
    range_header: Option<&str>,
  ) -> Result<ProxiedStream> {
    if !self.config.resolver_enabled || !self.config.proxy_enabled {
      return Err(Error::ProxyDisabled);
    }

    let playback = self.resolve(track_id).await?;
    let mut total = playback.selected_format.content_length;
    let mut range = byte_window(range_header, total)?;

    let mut source = PlaybackSource::Primary;
    let mut upstream = self.fetch_audio(&playback.direct_url, range).await?;

    if upstream.status == StatusCode::FORBIDDEN {
      warn!("upstream refused url for {}, re-resolving", track_id);
      self.cache.invalidate(track_id);
      let fresh = self.resolve_fresh(track_id).await?;
      // the fresh resolution may have picked another format
      total = fresh.selected_format.content_length;
      range = byte_window(range_header, total)?;
      upstream = self.fetch_audio(&fresh.direct_url, range).await?;
    }

    if upstream.status == StatusCode::FORBIDDEN {
      warn!("fresh url for {} refused too, trying yt-dlp", track_id);
      if let Some(url) = self.fallback.resolve_url(track_id).await {
        total = parse_content_length(&url).or(total);
        range = byte_window(range_header, total)?;
        let retried = self.fetch_audio(&url, range).await?;
        if is_success(retried.status) {
          info!("serving {} from the yt-dlp url", track_id);
          self.cache.patch_url(track_id, &url);
          source = PlaybackSource::CliFallback;
        }
        upstream = retried;
      }
    }

    if !is_success(upstream.status) {
      return Err(Error::ProxyStream(format!(
        "upstream responded with status {}",
        upstream.status.as_u16()
      )));
    }

    let (status, headers) = response_head(&upstream, range, total, source);
    let body = committed_body(upstream, range).await?;

    Ok(ProxiedStream {
      status,
      headers,
      source,
      body,
    })
  }

  async fn fetch_audio(
    &self,
    url: &str,
    range: Option<ByteRange>,
  ) -> Result<UpstreamResponse> {
    self.fetcher.fetch(url, range).await.map_err(|e| match e {
      Error::ProxyStream(_) => e,
      other => Error::ProxyStream(other.to_string()),
    })
  }
}

// pulls the first chunk so that an upstream failure before any byte is
// sent can still be reported as a json error
async fn committed_body(
  upstream: UpstreamResponse,
  range: Option<ByteRange>,
) -> Result<BoxStream<'static, Result<Bytes>>> {
  let mut body = match upstream_ignored_range(&upstream, range) {
    Some(range) => ByteStream::new(upstream.body)
      .skip_bytes(range.start)
      .limit_bytes(range.length())
      .boxed(),
    None => upstream.body,
  };

  let first = match body.next().await {
    Some(Ok(chunk)) => Some(chunk),
    Some(Err(e)) => return Err(Error::ProxyStream(e.to_string())),
    None => None,
  };

  Ok(futures::stream::iter(first.map(Ok)).chain(body).boxed())
}

// without a known size the range is ignored and the full body is served
fn byte_window(
  range_header: Option<&str>,
  total: Option<u64>,
) -> Result<Option<ByteRange>> {
  match (range_header, total) {
    (Some(header), Some(total)) => Ok(Some(parse_range(header, total)?)),
    _ => Ok(None),
  }
}

fn is_success(status: StatusCode) -> bool {
  status == StatusCode::OK || status == StatusCode::PARTIAL_CONTENT
}

// a range was asked for but the upstream sent the whole resource
fn upstream_ignored_range(
  upstream: &UpstreamResponse,
  range: Option<ByteRange>,
) -> Option<ByteRange> {
  range.filter(|_| upstream.status == StatusCode::OK)
}

fn response_head(
  upstream: &UpstreamResponse,
  range: Option<ByteRange>,
  total: Option<u64>,
  source: PlaybackSource,
) -> (StatusCode, HeaderMap) {
  let mut headers = HeaderMap::new();

  let status = match range {
    Some(range) => {
      insert(&mut headers, header::CONTENT_RANGE, range.content_range());
      insert(&mut headers, header::CONTENT_LENGTH, range.length());
      StatusCode::PARTIAL_CONTENT
    }
    None => {
      if let Some(total) = total {
        insert(&mut headers, header::CONTENT_LENGTH, total);
      }
      upstream.status
    }
  };

  // length and range of a full upstream body don't describe the window
  // we cut out of it
  let trimmed = upstream_ignored_range(upstream, range).is_some();
  for name in MIRRORED_HEADERS {
    if trimmed && name != header::CONTENT_TYPE {
      continue;
    }
    if let Some(value) = upstream.headers.get(&name) {
      headers.insert(name, value.clone());
    }
  }

  headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
  headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
  headers.insert(
    PLAYBACK_SOURCE_HEADER,
    HeaderValue::from_static(source.as_str()),
  );

  (status, headers)
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: impl ToString) {
  if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
    headers.insert(name, value);
  }
}

#[cfg(test)]
mod test {
  use std::sync::atomic::Ordering;

  use futures::TryStreamExt;

  use super::super::test_support::*;
  use super::*;
  use crate::config::PlaybackConfig;

  async fn collect(body: BoxStream<'static, Result<Bytes>>) -> Vec<u8> {
    let chunks: Vec<Bytes> = body.try_collect().await.unwrap();
    chunks.concat()
  }

  #[tokio::test]
  async fn test_proxy_disabled() {
    let source = MockSource::default();
    let fetcher = MockFetcher::with_statuses(&[]);
    let config = PlaybackConfig {
      proxy_enabled: false,
      ..enabled()
    };
    let resolver = resolver(config, &source, &fetcher, &Default::default());

    let err = resolver.proxy("abc", None).await.err().unwrap();
    assert_eq!(err.code(), "PROXY_DISABLED");
    assert_eq!(err.status().as_u16(), 501);
    assert_eq!(source.calls(), 0);
    assert!(fetcher.urls().is_empty());
  }

  #[tokio::test]
  async fn test_proxy_full_body() {
    let source = MockSource::default();
    let mut fetcher = MockFetcher::with_statuses(&[200]);
    fetcher
      .headers
      .insert(header::CONTENT_TYPE, HeaderValue::from_static("audio/mp4"));
    let resolver = resolver(enabled(), &source, &fetcher, &Default::default());

    let proxied = resolver.proxy("abc", None).await.unwrap();

    assert_eq!(proxied.status, StatusCode::OK);
    assert_eq!(proxied.source, PlaybackSource::Primary);
    assert_eq!(proxied.headers[header::CONTENT_LENGTH], "1000");
    assert_eq!(proxied.headers[header::CONTENT_TYPE], "audio/mp4");
    assert_eq!(proxied.headers[header::ACCEPT_RANGES], "bytes");
    assert_eq!(proxied.headers[header::CACHE_CONTROL], "no-store");
    assert_eq!(proxied.headers[PLAYBACK_SOURCE_HEADER], "primary");
    assert_eq!(collect(proxied.body).await, b"hello world");
    assert_eq!(fetcher.ranges.lock().unwrap()[0], None);
  }

  #[tokio::test]
  async fn test_proxy_partial_content() {
    let source = MockSource::default();
    let mut fetcher = MockFetcher::with_statuses(&[206]);
    fetcher.headers.insert(
      header::CONTENT_RANGE,
      HeaderValue::from_static("bytes 100-199/1000"),
    );
    let resolver = resolver(enabled(), &source, &fetcher, &Default::default());

    let proxied = resolver.proxy("abc", Some("bytes=100-199")).await.unwrap();

    assert_eq!(proxied.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(proxied.headers[header::CONTENT_RANGE], "bytes 100-199/1000");
    assert_eq!(proxied.headers[header::CONTENT_LENGTH], "100");

    let forwarded = fetcher.ranges.lock().unwrap()[0].unwrap();
    assert_eq!((forwarded.start, forwarded.end), (100, 199));
  }

  #[tokio::test]
  async fn test_proxy_suffix_range() {
    let source = MockSource::default();
    let fetcher = MockFetcher::with_statuses(&[206]);
    let resolver = resolver(enabled(), &source, &fetcher, &Default::default());

    let proxied = resolver.proxy("abc", Some("bytes=-100")).await.unwrap();
    assert_eq!(proxied.headers[header::CONTENT_RANGE], "bytes 900-999/1000");
  }

  #[tokio::test]
  async fn test_proxy_unsatisfiable_range() {
    let source = MockSource::default();
    let fetcher = MockFetcher::with_statuses(&[]);
    let resolver = resolver(enabled(), &source, &fetcher, &Default::default());

    let err = resolver.proxy("abc", Some("bytes=2000-")).await.err().unwrap();
    assert_eq!(err.code(), "RANGE_NOT_SATISFIABLE");
    assert_eq!(err.status().as_u16(), 416);
    assert!(fetcher.urls().is_empty());

    let err = resolver.proxy("abc", Some("bytes=x-")).await.err().unwrap();
    assert_eq!(err.code(), "INVALID_RANGE_HEADER");
  }

  #[tokio::test]
  async fn test_proxy_trims_when_upstream_ignores_range() {
    let source = MockSource::default();
    let mut fetcher = MockFetcher::with_statuses(&[200]);
    fetcher.headers.insert(
      header::CONTENT_LENGTH,
      HeaderValue::from_static("1000"),
    );
    let resolver = resolver(enabled(), &source, &fetcher, &Default::default());

    let proxied = resolver.proxy("abc", Some("bytes=2-7")).await.unwrap();

    assert_eq!(proxied.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(proxied.headers[header::CONTENT_LENGTH], "6");
    assert_eq!(proxied.headers[header::CONTENT_RANGE], "bytes 2-7/1000");
    assert_eq!(collect(proxied.body).await, b"llo wo");
  }

  #[tokio::test]
  async fn test_proxy_retries_after_forbidden() {
    let source = MockSource::default();
    let fetcher = MockFetcher::with_statuses(&[403, 200]);
    let fallback = MockFallback::default();
    let resolver = resolver(enabled(), &source, &fetcher, &fallback);

    let proxied = resolver.proxy("abc", None).await.unwrap();

    assert_eq!(proxied.status, StatusCode::OK);
    assert_eq!(proxied.source, PlaybackSource::Primary);
    assert_eq!(source.calls(), 2);
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    assert_eq!(
      fetcher.urls(),
      vec![
        "https://media.example/v1?expire=4102444800",
        "https://media.example/v2?expire=4102444800",
      ]
    );
    // the fresh resolution replaced the refused one
    let cached = resolver.cache().get("abc").unwrap();
    assert_eq!(cached.direct_url, "https://media.example/v2?expire=4102444800");
  }

  #[tokio::test]
  async fn test_proxy_falls_back_to_cli() {
    let source = MockSource::default();
    let fetcher = MockFetcher::with_statuses(&[403, 403, 206]);
    let fallback = MockFallback {
      url: Some("https://cli.example/a?expire=4102444800"),
      ..Default::default()
    };
    let resolver = resolver(enabled(), &source, &fetcher, &fallback);

    let proxied = resolver.proxy("abc", Some("bytes=0-9")).await.unwrap();

    assert_eq!(proxied.source, PlaybackSource::CliFallback);
    assert_eq!(proxied.headers[PLAYBACK_SOURCE_HEADER], "cli-fallback");
    assert_eq!(source.calls(), 2);
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
      fetcher.urls().last().map(String::as_str),
      Some("https://cli.example/a?expire=4102444800")
    );

    let cached = resolver.cache().get("abc").unwrap();
    assert_eq!(cached.direct_url, "https://cli.example/a?expire=4102444800");
    assert_eq!(cached.expires_at.as_deref(), Some("2100-01-01T00:00:00.000Z"));
  }

  #[tokio::test]
  async fn test_proxy_range_follows_fresh_resolution() {
    let source = MockSource {
      content_lengths: vec![1000, 2000],
      ..Default::default()
    };
    let fetcher = MockFetcher::with_statuses(&[403, 206]);
    let resolver = resolver(enabled(), &source, &fetcher, &Default::default());

    let proxied = resolver.proxy("abc", Some("bytes=-100")).await.unwrap();

    assert_eq!(proxied.headers[header::CONTENT_RANGE], "bytes 1900-1999/2000");
    let ranges = fetcher.ranges.lock().unwrap().clone();
    assert_eq!(ranges[0].map(|r| r.start), Some(900));
    assert_eq!(ranges[1].map(|r| r.start), Some(1900));
  }

  #[tokio::test]
  async fn test_proxy_range_follows_cli_content_length() {
    let source = MockSource::default();
    let fetcher = MockFetcher::with_statuses(&[403, 403, 206]);
    let fallback = MockFallback {
      url: Some("https://cli.example/a?clen=500"),
      ..Default::default()
    };
    let resolver = resolver(enabled(), &source, &fetcher, &fallback);

    let proxied = resolver.proxy("abc", Some("bytes=-100")).await.unwrap();
    assert_eq!(proxied.headers[header::CONTENT_RANGE], "bytes 400-499/500");
    assert_eq!(proxied.headers[header::CONTENT_LENGTH], "100");

    let cached = resolver.cache().get("abc").unwrap();
    assert_eq!(cached.selected_format.content_length, Some(500));
  }

  #[tokio::test]
  async fn test_proxy_gives_up_without_cli_url() {
    let source = MockSource::default();
    let fetcher = MockFetcher::with_statuses(&[403, 403]);
    let fallback = MockFallback::default();
    let resolver = resolver(enabled(), &source, &fetcher, &fallback);

    let err = resolver.proxy("abc", None).await.err().unwrap();

    assert_eq!(err.code(), "PROXY_STREAM_ERROR");
    assert_eq!(err.status().as_u16(), 502);
    assert!(err.to_string().contains("403"));
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
    assert_eq!(fetcher.urls().len(), 2);
  }

  #[tokio::test]
  async fn test_proxy_cli_url_refused_too() {
    let source = MockSource::default();
    let fetcher = MockFetcher::with_statuses(&[403, 403, 403]);
    let fallback = MockFallback {
      url: Some("https://cli.example/a"),
      ..Default::default()
    };
    let resolver = resolver(enabled(), &source, &fetcher, &fallback);

    let err = resolver.proxy("abc", None).await.err().unwrap();
    assert_eq!(err.code(), "PROXY_STREAM_ERROR");

    // cache still holds the primary resolution, not the refused cli url
    let cached = resolver.cache().get("abc").unwrap();
    assert_eq!(cached.direct_url, "https://media.example/v2?expire=4102444800");
  }

  #[tokio::test]
  async fn test_proxy_non_forbidden_error_is_not_retried() {
    let source = MockSource::default();
    let fetcher = MockFetcher::with_statuses(&[500]);
    let fallback = MockFallback::default();
    let resolver = resolver(enabled(), &source, &fetcher, &fallback);

    let err = resolver.proxy("abc", None).await.err().unwrap();
    assert_eq!(err.code(), "PROXY_STREAM_ERROR");
    assert_eq!(source.calls(), 1);
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_proxy_first_chunk_error_is_reported() {
    let source = MockSource::default();
    let mut fetcher = MockFetcher::with_statuses(&[200]);
    fetcher.fail_first_chunk = true;
    let resolver = resolver(enabled(), &source, &fetcher, &Default::default());

    let err = resolver.proxy("abc", None).await.err().unwrap();
    assert_eq!(err.code(), "PROXY_STREAM_ERROR");
  }

  #[tokio::test]
  async fn test_proxy_reuses_cached_resolution() {
    let source = MockSource::default();
    let fetcher = MockFetcher::with_statuses(&[200, 200]);
    let resolver = resolver(enabled(), &source, &fetcher, &Default::default());

    resolver.resolve("abc").await.unwrap();
    resolver.proxy("abc", None).await.unwrap();
    resolver.proxy("abc", None).await.unwrap();

    assert_eq!(source.calls(), 1);
  }
}
