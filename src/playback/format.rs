use std::cmp::Reverse;

use serde::Serialize;

const PREFERRED_BONUS: u32 = 1000;

/// One candidate encoding of a track, as reported by the upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatDescriptor {
  pub itag: u32,
  pub url: Option<String>,
  pub mime_type: String,
  pub container: Option<String>,
  pub codecs: Option<String>,
  pub audio_bitrate_kbps: Option<u32>,
  pub content_length: Option<u64>,
  pub has_audio: bool,
  pub has_video: bool,
  pub is_preferred_for_target_device: bool,
}

impl FormatDescriptor {
  /// Build a descriptor from a raw `mimeType` such as
  /// `audio/mp4; codecs="mp4a.40.2"`. Container and codecs are derived
  /// from it.
  pub fn new(itag: u32, mime_type: impl Into<String>) -> Self {
    let mime_type = mime_type.into();
    let (essence, params) = match mime_type.split_once(';') {
      Some((essence, params)) => (essence.trim(), params),
      None => (mime_type.trim(), ""),
    };

    let (kind, subtype) = essence.split_once('/').unwrap_or((essence, ""));
    let container = (!subtype.is_empty()).then(|| subtype.to_lowercase());
    let codecs = params
      .split(';')
      .filter_map(|p| p.trim().strip_prefix("codecs="))
      .map(|c| c.trim_matches('"').to_string())
      .next();

    let kind = kind.to_ascii_lowercase();
    let mut format = Self {
      itag,
      url: None,
      container,
      codecs,
      audio_bitrate_kbps: None,
      content_length: None,
      has_audio: kind == "audio",
      has_video: kind == "video",
      is_preferred_for_target_device: false,
      mime_type,
    };
    format.is_preferred_for_target_device = is_device_preferred(&format);
    format
  }

  pub fn with_url(self, url: Option<String>) -> Self {
    Self { url, ..self }
  }

  pub fn with_audio_bitrate_kbps(self, kbps: Option<u32>) -> Self {
    Self {
      audio_bitrate_kbps: kbps,
      ..self
    }
  }

  pub fn with_content_length(self, bytes: Option<u64>) -> Self {
    Self {
      content_length: bytes,
      ..self
    }
  }

  // muxed video formats may still carry audio
  pub fn with_audio_track(self, has_audio: bool) -> Self {
    Self { has_audio, ..self }
  }

  pub fn is_audio_only(&self) -> bool {
    self.has_audio && !self.has_video
  }

  pub fn score(&self) -> u32 {
    let bonus = if self.is_preferred_for_target_device {
      PREFERRED_BONUS
    } else {
      0
    };
    bonus.saturating_add(self.audio_bitrate_kbps.unwrap_or(0))
  }
}

/// Formats the mobile client can play natively: AAC in an mp4/m4a box.
pub fn is_device_preferred(format: &FormatDescriptor) -> bool {
  let mime = format.mime_type.to_ascii_lowercase();
  let container = format
    .container
    .as_deref()
    .map(str::to_ascii_lowercase)
    .unwrap_or_default();

  mime.contains("audio/mp4") || container == "m4a" || container == "mp4"
}

/// Rank formats best-first. Equal scores keep their input order.
pub fn rank_formats(formats: &[FormatDescriptor]) -> Vec<FormatDescriptor> {
  let mut ranked = formats.to_vec();
  // sort_by_key is stable
  ranked.sort_by_key(|f| Reverse(f.score()));
  ranked
}
