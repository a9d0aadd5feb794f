use std::{collections::HashMap, sync::Mutex};

use super::{
  expiry::{parse_content_length, parse_expiry, timestamp_millis},
  ResolvedPlayback,
};

// served for at least this long after a put
const SAFETY_WINDOW_MS: i64 = 5_000;
// retired this long before the signed url actually dies
const EXPIRY_MARGIN_MS: i64 = 30_000;
// lifetime when the url carries no usable expiry
const FALLBACK_TTL_MS: i64 = 3 * 60 * 1_000;

struct CacheEntry {
  value: ResolvedPlayback,
  expires_at_ms: i64,
}

/// In-memory map from track id to its last resolution.
///
/// The lock is only taken inside synchronous sections and never held
/// across an `.await`. Concurrent misses for the same track are not
/// coalesced; both callers resolve and the last `put` wins.
#[derive(Default)]
pub struct ResolutionCache {
  entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResolutionCache {
  pub fn get(&self, track_id: &str) -> Option<ResolvedPlayback> {
    self.get_at(track_id, now_ms())
  }

  pub fn put(&self, resolution: ResolvedPlayback) {
    self.put_at(resolution, now_ms())
  }

  pub fn invalidate(&self, track_id: &str) {
    self.lock().remove(track_id);
  }

  /// Swap in a new direct url for an existing entry, re-deriving its
  /// expiry. Absent entries are left alone.
  pub fn patch_url(&self, track_id: &str, url: &str) {
    self.patch_url_at(track_id, url, now_ms())
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  fn get_at(&self, track_id: &str, now: i64) -> Option<ResolvedPlayback> {
    let mut entries = self.lock();
    match entries.get(track_id) {
      Some(entry) if now < entry.expires_at_ms => Some(entry.value.clone()),
      Some(_) => {
        entries.remove(track_id);
        None
      }
      None => None,
    }
  }

  fn put_at(&self, resolution: ResolvedPlayback, now: i64) {
    let expires_at_ms = entry_deadline(resolution.expires_at.as_deref(), now);
    let entry = CacheEntry {
      value: resolution,
      expires_at_ms,
    };
    self.lock().insert(entry.value.track_id.clone(), entry);
  }

  fn patch_url_at(&self, track_id: &str, url: &str, now: i64) {
    let Some(mut value) = self.lock().get(track_id).map(|e| e.value.clone())
    else {
      return;
    };

    value.direct_url = url.to_string();
    value.expires_at = parse_expiry(url);
    if let Some(length) = parse_content_length(url) {
      value.selected_format.content_length = Some(length);
    }
    self.put_at(value, now);
  }

  #[cfg(test)]
  fn expires_at_ms(&self, track_id: &str) -> Option<i64> {
    self.lock().get(track_id).map(|e| e.expires_at_ms)
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
    // a poisoned map still holds consistent entries
    self.entries.lock().unwrap_or_else(|e| e.into_inner())
  }
}

fn entry_deadline(expires_at: Option<&str>, now: i64) -> i64 {
  let retire_at = match expires_at.and_then(timestamp_millis) {
    Some(upstream) => upstream - EXPIRY_MARGIN_MS,
    None => now + FALLBACK_TTL_MS,
  };
  retire_at.max(now + SAFETY_WINDOW_MS)
}

fn now_ms() -> i64 {
  chrono::Utc::now().timestamp_millis()
}
