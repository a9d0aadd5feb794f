use crate::{Error, Result};

/// Inclusive byte window within a resource of known length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
  pub start: u64,
  pub end: u64,
  pub total: u64,
}

impl ByteRange {
  pub fn length(&self) -> u64 {
    self.end - self.start + 1
  }

  pub fn content_range(&self) -> String {
    format!("bytes {}-{}/{}", self.start, self.end, self.total)
  }

  /// Header value to forward to the upstream.
  pub fn range_header(&self) -> String {
    format!("bytes={}-{}", self.start, self.end)
  }
}

/// Parse a single-range `Range` header (`bytes=a-b`, `bytes=a-`,
/// `bytes=-n`) against a resource of `total` bytes. The end is clamped to
/// the last byte.
pub fn parse_range(header: &str, total: u64) -> Result<ByteRange> {
  let invalid = || Error::InvalidRangeHeader {
    header: header.to_string(),
    total,
  };
  let unsatisfiable = || Error::RangeNotSatisfiable {
    header: header.to_string(),
    total,
  };

  let spec = header
    .trim()
    .strip_prefix("bytes=")
    .ok_or_else(invalid)?
    .trim();
  let (start, end) = spec.split_once('-').ok_or_else(invalid)?;
  let (start, end) = (start.trim(), end.trim());

  let number = |s: &str| {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
      return Err(invalid());
    }
    s.parse::<u64>().map_err(|_| invalid())
  };

  let (start, end) = match (start.is_empty(), end.is_empty()) {
    // bytes=-n: the last n bytes
    (true, false) => {
      let suffix = number(end)?;
      (total.saturating_sub(suffix), total.saturating_sub(1))
    }
    (false, true) => (number(start)?, total.saturating_sub(1)),
    (false, false) => {
      let end = number(end)?.min(total.saturating_sub(1));
      (number(start)?, end)
    }
    (true, true) => return Err(invalid()),
  };

  if start >= total || end < start {
    return Err(unsatisfiable());
  }

  Ok(ByteRange { start, end, total })
}
