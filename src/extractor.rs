mod innertube;
mod ytdlp;

use async_trait::async_trait;

use crate::{cookies::CookieJar, playback::FormatDescriptor, Error, Result};

pub use innertube::Innertube;
pub use ytdlp::Ytdlp;

/// Everything the upstream knows about a track that playback needs.
#[derive(Debug, Clone, Default)]
pub struct TrackMetadata {
  pub title: String,
  pub author: String,
  pub duration_seconds: u64,
  pub formats: Vec<FormatDescriptor>,
}

#[async_trait]
pub trait MetadataSource: Send + Sync {
  async fn fetch(
    &self,
    track_id: &str,
    cookies: Option<&CookieJar>,
  ) -> Result<TrackMetadata>;
}

/// Last-resort resolver for a direct audio url. Never fails: every error
/// collapses to `None`.
#[async_trait]
pub trait UrlFallback: Send + Sync {
  async fn resolve_url(&self, track_id: &str) -> Option<String>;
}

const BOT_CHECK_PATTERNS: &[&str] = &[
  "sign in to confirm",
  "confirm you're not a bot",
  "confirm you\u{2019}re not a bot",
  "confirm you are not a bot",
];

/// Fetch metadata, turning anti-automation challenges into
/// [`Error::BotCheck`]. Other failures pass through untouched.
pub async fn fetch_metadata(
  source: &dyn MetadataSource,
  track_id: &str,
  cookies: Option<&CookieJar>,
) -> Result<TrackMetadata> {
  source
    .fetch(track_id, cookies)
    .await
    .map_err(classify_upstream_error)
}

fn classify_upstream_error(err: Error) -> Error {
  if matches!(err, Error::BotCheck(_)) {
    return err;
  }

  let message = err.to_string();
  if is_bot_check(&message) {
    Error::BotCheck(message)
  } else {
    err
  }
}

pub(crate) fn is_bot_check(message: &str) -> bool {
  let lowered = message.to_lowercase();
  BOT_CHECK_PATTERNS.iter().any(|p| lowered.contains(p))
}

#[cfg(test)]
mod test {
  use super::*;

  struct Failing(&'static str);

  #[async_trait]
  impl MetadataSource for Failing {
    async fn fetch(
      &self,
      _track_id: &str,
      _cookies: Option<&CookieJar>,
    ) -> Result<TrackMetadata> {
      Err(Error::Upstream(self.0.to_string()))
    }
  }

  #[tokio::test]
  async fn test_bot_check_is_reclassified() {
    for message in [
      "LOGIN_REQUIRED: Sign in to confirm you\u{2019}re not a bot",
      "Please CONFIRM YOU'RE NOT A BOT",
      "confirm you are not a bot",
    ] {
      let err = fetch_metadata(&Failing(message), "abc", None)
        .await
        .unwrap_err();
      assert_eq!(err.code(), "YOUTUBE_BOT_CHECK", "{message}");
      assert_eq!(err.status().as_u16(), 503);
      assert!(err.to_string().contains("YOUTUBE_COOKIE"));
    }
  }

  #[tokio::test]
  async fn test_other_errors_pass_through() {
    let err = fetch_metadata(&Failing("Video unavailable"), "abc", None)
      .await
      .unwrap_err();

    assert_eq!(err.code(), "UPSTREAM_ERROR");
    assert_eq!(err.to_string(), "upstream: Video unavailable");
  }
}
