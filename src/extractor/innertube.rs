use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{
  config::YoutubeConfig, cookies::CookieJar, playback::FormatDescriptor,
  Error, Result,
};

use super::{is_bot_check, MetadataSource, TrackMetadata};

const PLAYER_URL: &str =
  "https://www.youtube.com/youtubei/v1/player?prettyPrint=false";

// query the youtube player endpoint directly. client identities are tried
// in order until one reports the track as playable.
pub struct Innertube {
  client: reqwest::Client,
  player_url: String,
  region: String,
  locale: String,
}

struct ClientIdentity {
  name: &'static str,
  version: &'static str,
  user_agent: &'static str,
  extra: Value,
}

const CLIENTS: &[fn() -> ClientIdentity] = &[android_vr, web_embedded];

fn android_vr() -> ClientIdentity {
  ClientIdentity {
    name: "ANDROID_VR",
    version: "1.71.26",
    user_agent: "com.google.android.apps.youtube.vr.oculus/1.71.26 \
      (Linux; U; Android 12L; eureka-user Build/SQ3A.220605.009.A1) gzip",
    extra: json!({
      "androidSdkVersion": 32,
      "deviceMake": "Oculus",
      "deviceModel": "Quest 3",
    }),
  }
}

fn web_embedded() -> ClientIdentity {
  ClientIdentity {
    name: "WEB_EMBEDDED_PLAYER",
    version: "1.20260115.01.00",
    user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
      AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    extra: json!({}),
  }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PlayerResponse {
  playability_status: PlayabilityStatus,
  video_details: VideoDetails,
  streaming_data: StreamingData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PlayabilityStatus {
  status: String,
  reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct VideoDetails {
  title: String,
  author: String,
  length_seconds: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StreamingData {
  formats: Vec<Value>,
  adaptive_formats: Vec<Value>,
}

impl Innertube {
  pub fn new(config: &YoutubeConfig) -> Self {
    Self {
      client: reqwest::Client::new(),
      player_url: PLAYER_URL.to_string(),
      region: config.region.clone(),
      locale: config.locale.clone(),
    }
  }

  fn payload(&self, identity: &ClientIdentity, track_id: &str) -> Value {
    let mut client = json!({
      "clientName": identity.name,
      "clientVersion": identity.version,
      "hl": self.locale,
      "gl": self.region,
    });

    if let (Some(client), Some(extra)) =
      (client.as_object_mut(), identity.extra.as_object())
    {
      client.extend(extra.clone());
    }

    let mut payload = json!({
      "context": { "client": client },
      "videoId": track_id,
      "contentCheckOk": true,
      "racyCheckOk": true,
    });

    if identity.name == "WEB_EMBEDDED_PLAYER" {
      payload["context"]["thirdParty"] =
        json!({ "embedUrl": "https://www.youtube.com/" });
    }

    payload
  }

  async fn try_client(
    &self,
    identity: &ClientIdentity,
    track_id: &str,
    cookies: Option<&CookieJar>,
  ) -> Result<PlayerResponse> {
    let mut req = self
      .client
      .post(&self.player_url)
      .header("User-Agent", identity.user_agent)
      .json(&self.payload(identity, track_id));

    if let Some(cookie) = cookies.and_then(CookieJar::header_value) {
      req = req.header("Cookie", cookie);
    }

    let resp = req.send().await?;
    if !resp.status().is_success() {
      return Err(Error::Upstream(format!(
        "{} player request returned {}",
        identity.name,
        resp.status()
      )));
    }

    Ok(resp.json().await?)
  }
}

#[async_trait]
impl MetadataSource for Innertube {
  async fn fetch(
    &self,
    track_id: &str,
    cookies: Option<&CookieJar>,
  ) -> Result<TrackMetadata> {
    let mut last_err = None;

    for identity in CLIENTS.iter().map(|make| make()) {
      let player = match self.try_client(&identity, track_id, cookies).await {
        Ok(player) => player,
        Err(e) => {
          warn!("{} failed for {}: {}", identity.name, track_id, e);
          keep_most_telling(&mut last_err, e);
          continue;
        }
      };

      let status = &player.playability_status;
      if status.status != "OK" {
        let reason = status.reason.as_deref().unwrap_or("unknown reason");
        warn!(
          "{} {}: {} ({})",
          identity.name, track_id, status.status, reason
        );
        let message = format!("{}: {}", status.status, reason);
        keep_most_telling(&mut last_err, Error::Upstream(message));
        continue;
      }

      debug!("{} resolved metadata for {}", identity.name, track_id);
      return Ok(player.into());
    }

    Err(
      last_err.unwrap_or_else(|| Error::Upstream("no player clients".into())),
    )
  }
}

// a bot check seen on any client outranks whatever later clients report
fn keep_most_telling(last_err: &mut Option<Error>, err: Error) {
  let seen_bot_check = last_err
    .as_ref()
    .is_some_and(|e| is_bot_check(&e.to_string()));
  if !seen_bot_check {
    *last_err = Some(err);
  }
}

impl From<PlayerResponse> for TrackMetadata {
  fn from(player: PlayerResponse) -> Self {
    let details = player.video_details;
    let streaming = player.streaming_data;

    let formats = streaming
      .adaptive_formats
      .iter()
      .chain(streaming.formats.iter())
      .filter_map(format_descriptor)
      .collect();

    Self {
      title: details.title,
      author: details.author,
      duration_seconds: details
        .length_seconds
        .and_then(|s| s.parse().ok())
        .unwrap_or_default(),
      formats,
    }
  }
}

// the upstream schema drifts; anything missing or oddly typed becomes None
fn format_descriptor(raw: &Value) -> Option<FormatDescriptor> {
  let itag = raw["itag"].as_u64()? as u32;
  let mime_type = raw["mimeType"].as_str()?;

  // formats that only carry a signatureCipher have no usable url
  let url = raw["url"].as_str().map(String::from);
  let bitrate = raw["averageBitrate"]
    .as_u64()
    .or_else(|| raw["bitrate"].as_u64());
  let content_length = match &raw["contentLength"] {
    Value::String(s) => s.parse().ok(),
    other => other.as_u64(),
  };

  let kbps = bitrate.map(|bps| (bps as f64 / 1000.0).round() as u32);

  let format = FormatDescriptor::new(itag, mime_type)
    .with_url(url)
    .with_audio_bitrate_kbps(kbps)
    .with_content_length(content_length);

  // muxed progressive formats announce their audio through audioQuality
  let has_audio = format.has_audio || raw["audioQuality"].is_string();
  Some(format.with_audio_track(has_audio))
}
