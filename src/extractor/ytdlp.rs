use std::{process::Stdio, sync::LazyLock, time::Duration};

use async_trait::async_trait;
use regex::Regex;
use tokio::{io::AsyncReadExt, process::Command, sync::Semaphore};
use tracing::{info, warn};

use crate::{config::YtdlpConfig, Result};

use super::UrlFallback;

const TIMEOUT: Duration = Duration::from_secs(20);
const MAX_STDOUT_BYTES: u64 = 1024 * 1024;
// itag 140 is AAC in m4a at 128kbps
const FORMAT_SELECTOR: &str = "140/bestaudio[ext=m4a]/bestaudio";

static URL_LINE_REGEX: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(?m)^https?://\S+").unwrap());

// used to remove cred info from proxy url before printing
static AUTH_REGEX: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"//[^:]+(:[^@]+)@").unwrap());

// run yt-dlp command line to get a direct audio url.
// requires yt-dlp executable to be in PATH (or YTDLP_PATH).
pub struct Ytdlp {
  program: String,
  proxy: Option<String>,
  // bounds the number of concurrent yt-dlp processes
  permits: Semaphore,
  timeout: Duration,
}

impl Ytdlp {
  pub fn new(config: &YtdlpConfig) -> Self {
    Self {
      program: config.program.clone(),
      proxy: config.proxy.clone(),
      permits: Semaphore::new(config.concurrency.max(1)),
      timeout: TIMEOUT,
    }
  }

  fn command(&self, track_id: &str) -> Command {
    let url = format!("https://www.youtube.com/watch?v={track_id}");
    let mut cmd = Command::new(&self.program);

    cmd
      .arg("-f")
      .arg(FORMAT_SELECTOR)
      // print the url instead of downloading
      .arg("-g")
      .arg("--no-playlist")
      .arg("--no-warnings");

    if let Some(proxy) = &self.proxy {
      info!("using proxy: {}", redact_proxy(proxy));
      cmd.arg("--proxy").arg(proxy);
    }

    cmd
      .arg(url)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::null())
      .kill_on_drop(true);
    cmd
  }

  async fn run(&self, track_id: &str) -> Result<Option<String>> {
    let _permit = match self.permits.acquire().await {
      Ok(permit) => permit,
      Err(_) => return Ok(None),
    };

    let mut child = self.command(track_id).spawn()?;
    let mut stdout = Vec::new();
    if let Some(out) = child.stdout.take() {
      out.take(MAX_STDOUT_BYTES + 1).read_to_end(&mut stdout).await?;
    }

    // the child is killed when dropped
    if stdout.len() as u64 > MAX_STDOUT_BYTES {
      warn!(
        "yt-dlp printed more than {} bytes for {}",
        MAX_STDOUT_BYTES, track_id
      );
      return Ok(None);
    }

    let status = child.wait().await?;
    if !status.success() {
      warn!("yt-dlp exited with {} for {}", status, track_id);
      return Ok(None);
    }

    Ok(first_url_line(&String::from_utf8_lossy(&stdout)))
  }
}

#[async_trait]
impl UrlFallback for Ytdlp {
  async fn resolve_url(&self, track_id: &str) -> Option<String> {
    // dropping the future on timeout kills the child
    match tokio::time::timeout(self.timeout, self.run(track_id)).await {
      Ok(Ok(Some(url))) => {
        info!("yt-dlp resolved {}", track_id);
        Some(url)
      }
      Ok(Ok(None)) => {
        warn!("yt-dlp printed no url for {}", track_id);
        None
      }
      Ok(Err(e)) => {
        warn!("yt-dlp failed for {}: {}", track_id, e);
        None
      }
      Err(_) => {
        warn!("yt-dlp timed out after {:?} for {}", self.timeout, track_id);
        None
      }
    }
  }
}

fn first_url_line(stdout: &str) -> Option<String> {
  URL_LINE_REGEX
    .find(stdout)
    .map(|m| m.as_str().to_string())
}

fn redact_proxy(proxy: &str) -> String {
  AUTH_REGEX.replace(proxy, "//<REDACTED>@").into_owned()
}
