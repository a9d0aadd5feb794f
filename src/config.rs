use std::{net::SocketAddr, str::FromStr, time::Duration};

use tracing::warn;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Clone)]
pub struct Config {
  pub bind_addr: SocketAddr,
  pub log_level: tracing::Level,
  pub playback: PlaybackConfig,
  pub youtube: YoutubeConfig,
  pub ytdlp: YtdlpConfig,
}

#[derive(Debug, Clone)]
pub struct PlaybackConfig {
  pub resolver_enabled: bool,
  pub proxy_enabled: bool,
  // prefix for `proxyUrl`; relative paths are handed out when unset
  pub public_base_url: Option<String>,
  pub upstream_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct YoutubeConfig {
  pub region: String,
  pub locale: String,
  pub cookies_json: Option<String>,
  pub cookie_header: Option<String>,
}

#[derive(Debug, Clone)]
pub struct YtdlpConfig {
  pub program: String,
  pub proxy: Option<String>,
  pub concurrency: usize,
}

impl Default for PlaybackConfig {
  fn default() -> Self {
    Self {
      resolver_enabled: true,
      proxy_enabled: false,
      public_base_url: None,
      upstream_timeout: Duration::from_secs(15),
    }
  }
}

impl Default for YoutubeConfig {
  fn default() -> Self {
    Self {
      region: "US".into(),
      locale: "en".into(),
      cookies_json: None,
      cookie_header: None,
    }
  }
}

impl Default for YtdlpConfig {
  fn default() -> Self {
    Self {
      program: "yt-dlp".into(),
      proxy: None,
      concurrency: 1,
    }
  }
}

impl Config {
  pub fn from_env() -> Self {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
    // blank values count as unset
    let var = |key: &str| {
      lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
    };

    let playback_defaults = PlaybackConfig::default();
    let youtube_defaults = YoutubeConfig::default();
    let ytdlp_defaults = YtdlpConfig::default();

    let playback = PlaybackConfig {
      resolver_enabled: flag(
        "PLAYBACK_RESOLVER_ENABLED",
        var("PLAYBACK_RESOLVER_ENABLED"),
        playback_defaults.resolver_enabled,
      ),
      proxy_enabled: flag(
        "PLAYBACK_PROXY_ENABLED",
        var("PLAYBACK_PROXY_ENABLED"),
        playback_defaults.proxy_enabled,
      ),
      public_base_url: var("PUBLIC_BASE_URL")
        .map(|url| url.trim_end_matches('/').to_string()),
      upstream_timeout: parsed::<u64>(
        "UPSTREAM_TIMEOUT_SECS",
        var("UPSTREAM_TIMEOUT_SECS"),
      )
      .map(Duration::from_secs)
      .unwrap_or(playback_defaults.upstream_timeout),
    };

    let youtube = YoutubeConfig {
      region: var("YOUTUBE_REGION").unwrap_or(youtube_defaults.region),
      locale: var("YOUTUBE_LOCALE").unwrap_or(youtube_defaults.locale),
      cookies_json: var("YOUTUBE_COOKIES_JSON"),
      cookie_header: var("YOUTUBE_COOKIE"),
    };

    let ytdlp = YtdlpConfig {
      program: var("YTDLP_PATH").unwrap_or(ytdlp_defaults.program),
      proxy: var("YTDLP_PROXY"),
      concurrency: parsed::<usize>(
        "YTDLP_CONCURRENCY",
        var("YTDLP_CONCURRENCY"),
      )
      .filter(|n| *n > 0)
      .unwrap_or(ytdlp_defaults.concurrency),
    };

    let bind_addr = parsed::<SocketAddr>("BIND_ADDR", var("BIND_ADDR"))
      .unwrap_or_else(|| {
        DEFAULT_BIND_ADDR.parse().expect("default address is valid")
      });

    let log_level = parsed::<tracing::Level>("LOG_LEVEL", var("LOG_LEVEL"))
      .unwrap_or(tracing::Level::INFO);

    Self {
      bind_addr,
      log_level,
      playback,
      youtube,
      ytdlp,
    }
  }
}

fn flag(key: &str, value: Option<String>, default: bool) -> bool {
  let Some(value) = value else {
    return default;
  };

  match value.to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => true,
    "0" | "false" | "no" | "off" => false,
    _ => {
      warn!("ignoring invalid boolean {key}={value}, using {default}");
      default
    }
  }
}

fn parsed<T: FromStr>(key: &str, value: Option<String>) -> Option<T> {
  let value = value?;
  match value.parse() {
    Ok(v) => Some(v),
    Err(_) => {
      warn!("ignoring invalid value {key}={value}");
      None
    }
  }
}
