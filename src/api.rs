use std::sync::Arc;

use axum::{
  body::StreamBody,
  extract::{Path, State},
  http::HeaderMap,
  response::{IntoResponse, Response},
  routing::get,
  Json, Router,
};
use chrono::{SecondsFormat, Utc};
use reqwest::header;
use serde::Serialize;
use tracing::debug;

use crate::{
  error::ErrorBody,
  playback::{ResolvedPlayback, Resolver},
  Result,
};

pub type AppState = Arc<Resolver>;

/// JSON wrapper for every non-audio response.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
  pub ok: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub data: Option<T>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<ErrorBody>,
  pub ts: String,
}

impl<T> Envelope<T> {
  pub fn success(data: T) -> Self {
    Self {
      ok: true,
      data: Some(data),
      error: None,
      ts: timestamp(),
    }
  }

  pub fn failure(error: ErrorBody) -> Self {
    Self {
      ok: false,
      data: None,
      error: Some(error),
      ts: timestamp(),
    }
  }
}

fn timestamp() -> String {
  Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn router(state: AppState) -> Router {
  Router::new()
    .route("/health", get(health))
    .route("/api/playback/:track_id/resolve", get(resolve))
    .route("/api/playback/:track_id/stream", get(stream))
    .with_state(state)
}

async fn health() -> impl IntoResponse {
  "ok".to_owned()
}

async fn resolve(
  State(resolver): State<AppState>,
  Path(track_id): Path<String>,
) -> Result<Json<Envelope<ResolvedPlayback>>> {
  let playback = resolver.resolve(&track_id).await?;
  Ok(Json(Envelope::success(playback)))
}

// errors up to the first audio chunk become json; afterwards a failing
// body aborts the connection
async fn stream(
  State(resolver): State<AppState>,
  Path(track_id): Path<String>,
  headers: HeaderMap,
) -> Result<Response> {
  // an undecodable header is treated as malformed
  let range = headers
    .get(header::RANGE)
    .map(|v| v.to_str().unwrap_or_default());

  let proxied = resolver.proxy(&track_id, range).await?;
  debug!(
    "streaming {} ({}) with status {}",
    track_id,
    proxied.source.as_str(),
    proxied.status
  );

  let mut resp = StreamBody::new(proxied.body).into_response();
  *resp.status_mut() = proxied.status;
  resp.headers_mut().extend(proxied.headers);

  Ok(resp)
}
