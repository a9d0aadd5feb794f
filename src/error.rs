use axum::{
  response::{IntoResponse, Response},
  Json,
};
use reqwest::{header, StatusCode};
use serde::Serialize;

use crate::api::Envelope;

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("playback resolver is disabled")]
  ResolverDisabled,
  #[error("playback proxy is disabled")]
  ProxyDisabled,
  #[error(
    "YouTube asked to confirm this is not a bot ({0}). \
     Set YOUTUBE_COOKIES_JSON or YOUTUBE_COOKIE to a signed-in session."
  )]
  BotCheck(String),
  #[error("no audio formats available for {0}")]
  NoAudioFormats(String),
  #[error("top-ranked audio format for {0} has no url")]
  AudioUrlMissing(String),
  #[error("invalid range header: {header}")]
  InvalidRangeHeader { header: String, total: u64 },
  #[error("range {header} not satisfiable for {total} bytes")]
  RangeNotSatisfiable { header: String, total: u64 },
  #[error("proxy stream failed: {0}")]
  ProxyStream(String),
  #[error("invalid YOUTUBE_COOKIES_JSON: {0}")]
  InvalidJsonCookies(String),
  #[error("YOUTUBE_COOKIES_JSON contains no usable cookies")]
  InvalidEmptyCookies,
  #[error("upstream: {0}")]
  Upstream(String),
  #[error("http: {0}")]
  Http(#[from] reqwest::Error),
  #[error("json: {0}")]
  Json(#[from] serde_json::Error),
  #[error("io: {0}")]
  IO(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
  pub fn code(&self) -> &'static str {
    match self {
      Error::ResolverDisabled => "RESOLVER_DISABLED",
      Error::ProxyDisabled => "PROXY_DISABLED",
      Error::BotCheck(_) => "YOUTUBE_BOT_CHECK",
      Error::NoAudioFormats(_) => "NO_AUDIO_FORMATS",
      Error::AudioUrlMissing(_) => "AUDIO_URL_MISSING",
      Error::InvalidRangeHeader { .. } => "INVALID_RANGE_HEADER",
      Error::RangeNotSatisfiable { .. } => "RANGE_NOT_SATISFIABLE",
      Error::ProxyStream(_) => "PROXY_STREAM_ERROR",
      Error::InvalidJsonCookies(_) => "INVALID_JSON_COOKIES",
      Error::InvalidEmptyCookies => "INVALID_EMPTY_COOKIES",
      Error::Upstream(_) => "UPSTREAM_ERROR",
      Error::Http(_) | Error::Json(_) | Error::IO(_) => "INTERNAL_ERROR",
    }
  }

  pub fn status(&self) -> StatusCode {
    match self {
      Error::ResolverDisabled | Error::ProxyDisabled => {
        StatusCode::NOT_IMPLEMENTED
      }
      Error::BotCheck(_) => StatusCode::SERVICE_UNAVAILABLE,
      Error::NoAudioFormats(_) => StatusCode::NOT_FOUND,
      Error::AudioUrlMissing(_)
      | Error::ProxyStream(_)
      | Error::Upstream(_) => StatusCode::BAD_GATEWAY,
      Error::InvalidRangeHeader { .. } | Error::RangeNotSatisfiable { .. } => {
        StatusCode::RANGE_NOT_SATISFIABLE
      }
      Error::InvalidJsonCookies(_)
      | Error::InvalidEmptyCookies
      | Error::Http(_)
      | Error::Json(_)
      | Error::IO(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  // total length to advertise in `Content-Range: bytes */{total}`
  fn unsatisfied_total(&self) -> Option<u64> {
    match self {
      Error::InvalidRangeHeader { total, .. }
      | Error::RangeNotSatisfiable { total, .. } => Some(*total),
      _ => None,
    }
  }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
  pub code: &'static str,
  pub message: String,
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      tracing::error!(code = self.code(), "{}", self);
    } else {
      tracing::debug!(code = self.code(), "{}", self);
    }

    let body = ErrorBody {
      code: self.code(),
      message: self.to_string(),
    };
    let mut resp =
      (status, Json(Envelope::<()>::failure(body))).into_response();

    if let Some(total) = self.unsatisfied_total() {
      if let Ok(value) = format!("bytes */{total}").parse() {
        resp.headers_mut().insert(header::CONTENT_RANGE, value);
      }
    }

    resp
  }
}
