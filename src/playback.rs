mod cache;
mod expiry;
mod format;
mod proxy;
mod range;

use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing::{debug, info};

use crate::{
  config::{Config, PlaybackConfig, YoutubeConfig},
  cookies::{build_cookie_jar, CookieJar},
  extractor::{
    fetch_metadata, Innertube, MetadataSource, UrlFallback, Ytdlp,
  },
  fetch::{AudioFetcher, HttpFetcher},
  Error, Result,
};

pub use cache::ResolutionCache;
pub use expiry::{parse_content_length, parse_expiry};
pub use format::{rank_formats, FormatDescriptor};
pub use range::{parse_range, ByteRange};

const MAX_CANDIDATES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPlayback {
  pub track_id: String,
  pub title: String,
  pub author: String,
  pub duration_seconds: u64,
  pub selected_format: FormatDescriptor,
  pub direct_url: String,
  pub expires_at: Option<String>,
  pub proxy_url: Option<String>,
  pub candidate_formats: Vec<FormatDescriptor>,
}

/// Turns track ids into playable audio urls, and optionally streams the
/// audio itself.
///
/// Owns all process-wide playback state: the resolution cache and the
/// lazily built cookie jar.
pub struct Resolver {
  config: PlaybackConfig,
  youtube: YoutubeConfig,
  source: Box<dyn MetadataSource>,
  fetcher: Box<dyn AudioFetcher>,
  fallback: Box<dyn UrlFallback>,
  cache: ResolutionCache,
  cookies: OnceCell<CookieJar>,
}

impl Resolver {
  pub fn new(config: &Config) -> Result<Self> {
    let fetcher = HttpFetcher::new(config.playback.upstream_timeout)?;

    Ok(Self::with_parts(
      config.playback.clone(),
      config.youtube.clone(),
      Box::new(Innertube::new(&config.youtube)),
      Box::new(fetcher),
      Box::new(Ytdlp::new(&config.ytdlp)),
    ))
  }

  pub fn with_parts(
    config: PlaybackConfig,
    youtube: YoutubeConfig,
    source: Box<dyn MetadataSource>,
    fetcher: Box<dyn AudioFetcher>,
    fallback: Box<dyn UrlFallback>,
  ) -> Self {
    Self {
      config,
      youtube,
      source,
      fetcher,
      fallback,
      cache: ResolutionCache::default(),
      cookies: OnceCell::new(),
    }
  }

  pub async fn resolve(&self, track_id: &str) -> Result<ResolvedPlayback> {
    if !self.config.resolver_enabled {
      return Err(Error::ResolverDisabled);
    }

    if let Some(hit) = self.cache.get(track_id) {
      debug!("cache hit for {}", track_id);
      return Ok(hit);
    }

    self.resolve_fresh(track_id).await
  }

  // bypasses the cache lookup but still stores the result
  async fn resolve_fresh(&self, track_id: &str) -> Result<ResolvedPlayback> {
    let cookies = self.cookies()?;
    let metadata =
      fetch_metadata(self.source.as_ref(), track_id, cookies).await?;

    let audio_only: Vec<_> = metadata
      .formats
      .into_iter()
      .filter(FormatDescriptor::is_audio_only)
      .collect();
    let ranked = rank_formats(&audio_only);

    let selected = ranked
      .first()
      .cloned()
      .ok_or_else(|| Error::NoAudioFormats(track_id.into()))?;
    let direct_url = selected
      .url
      .clone()
      .ok_or_else(|| Error::AudioUrlMissing(track_id.into()))?;

    let playback = ResolvedPlayback {
      track_id: track_id.to_string(),
      title: metadata.title,
      author: metadata.author,
      duration_seconds: metadata.duration_seconds,
      expires_at: parse_expiry(&direct_url),
      proxy_url: self.proxy_url(track_id),
      candidate_formats: ranked.into_iter().take(MAX_CANDIDATES).collect(),
      selected_format: selected,
      direct_url,
    };

    info!(
      "resolved {} to itag {} (expires {})",
      track_id,
      playback.selected_format.itag,
      playback.expires_at.as_deref().unwrap_or("unknown")
    );
    self.cache.put(playback.clone());
    debug!("{} cached resolutions", self.cache.len());

    Ok(playback)
  }

  fn proxy_url(&self, track_id: &str) -> Option<String> {
    if !self.config.proxy_enabled {
      return None;
    }

    let base = self.config.public_base_url.as_deref().unwrap_or_default();
    Some(format!("{base}/api/playback/{track_id}/stream"))
  }

  // built once; a failed build is retried (and fails again) on every call
  fn cookies(&self) -> Result<Option<&CookieJar>> {
    let jar = self.cookies.get_or_try_init(|| {
      build_cookie_jar(
        self.youtube.cookies_json.as_deref(),
        self.youtube.cookie_header.as_deref(),
      )
    })?;

    Ok((!jar.is_empty()).then_some(jar))
  }

  #[cfg(test)]
  pub fn cache(&self) -> &ResolutionCache {
    &self.cache
  }
}
