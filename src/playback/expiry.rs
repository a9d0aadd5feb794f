use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use http_types::Url;

/// Read the `expire` query parameter (unix seconds) of a signed url and
/// return it as an ISO-8601 timestamp.
pub fn parse_expiry(url: &str) -> Option<String> {
  let expire = query_param(url, "expire")?;

  let secs: f64 = expire.trim().parse().ok()?;
  if !secs.is_finite() {
    return None;
  }

  let millis = (secs * 1000.0).round() as i64;
  let at = Utc.timestamp_millis_opt(millis).single()?;
  Some(at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Byte size the signed url advertises through its `clen` parameter.
pub fn parse_content_length(url: &str) -> Option<u64> {
  query_param(url, "clen")?.trim().parse().ok()
}

fn query_param(url: &str, name: &str) -> Option<String> {
  let url: Url = url.parse().ok()?;
  url
    .query_pairs()
    .find_map(|(k, v)| (k == name).then(|| v.into_owned()))
}

pub fn timestamp_millis(iso: &str) -> Option<i64> {
  DateTime::parse_from_rfc3339(iso)
    .ok()
    .map(|at| at.timestamp_millis())
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn test_parse_expiry() {
    let url = "https://rr1---sn-abc.googlevideo.com/videoplayback\
               ?expire=1700000000&ei=xyz&itag=140";
    let iso = parse_expiry(url).unwrap();

    assert_eq!(iso, "2023-11-14T22:13:20.000Z");
    let parsed = DateTime::parse_from_rfc3339(&iso).unwrap();
    assert_eq!(parsed.timestamp(), 1_700_000_000);
    assert_eq!(timestamp_millis(&iso), Some(1_700_000_000_000));
  }

  #[test]
  fn test_parse_expiry_missing_or_malformed() {
    assert_eq!(parse_expiry("not a url"), None);
    assert_eq!(parse_expiry("https://example.com/a?itag=140"), None);
    assert_eq!(parse_expiry("https://example.com/a?expire=soon"), None);
    assert_eq!(parse_expiry("https://example.com/a?expire=NaN"), None);
    assert_eq!(parse_expiry("https://example.com/a?expire=inf"), None);
    assert_eq!(parse_expiry("https://example.com/a?expire="), None);
  }

  #[test]
  fn test_parse_content_length() {
    let url = "https://rr1.googlevideo.com/videoplayback?itag=140&clen=3476543";
    assert_eq!(parse_content_length(url), Some(3_476_543));
    assert_eq!(parse_content_length("https://example.com/a?clen=-1"), None);
    assert_eq!(parse_content_length("https://example.com/a"), None);
  }
}
