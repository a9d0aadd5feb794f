use serde::Deserialize;
use serde_json::Value;

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
  pub name: String,
  pub value: String,
  #[allow(unused)]
  #[serde(default)]
  pub domain: Option<String>,
  #[allow(unused)]
  #[serde(default)]
  pub path: Option<String>,
}

/// Credentials sent along with upstream metadata requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar(Vec<Cookie>);

impl CookieJar {
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  #[cfg(test)]
  pub fn cookies(&self) -> &[Cookie] {
    &self.0
  }

  /// Render as a `Cookie` request header value.
  pub fn header_value(&self) -> Option<String> {
    if self.is_empty() {
      return None;
    }

    let pairs: Vec<_> = self
      .0
      .iter()
      .map(|c| format!("{}={}", c.name, c.value))
      .collect();
    Some(pairs.join("; "))
  }
}

/// Build the jar from a JSON cookie export if configured, else from a raw
/// `Cookie:` header string, else empty.
pub fn build_cookie_jar(
  cookies_json: Option<&str>,
  cookie_header: Option<&str>,
) -> Result<CookieJar> {
  if let Some(json) = cookies_json {
    return parse_json_cookies(json);
  }

  if let Some(header) = cookie_header {
    return Ok(parse_cookie_header(header));
  }

  Ok(CookieJar::default())
}

fn parse_json_cookies(json: &str) -> Result<CookieJar> {
  let value: Value = serde_json::from_str(json)
    .map_err(|e| Error::InvalidJsonCookies(e.to_string()))?;

  let Value::Array(entries) = value else {
    return Err(Error::InvalidJsonCookies("expected an array".into()));
  };

  // entries lacking a string name/value are skipped
  let cookies: Vec<Cookie> = entries
    .into_iter()
    .filter_map(|entry| serde_json::from_value(entry).ok())
    .filter(|c: &Cookie| !c.name.is_empty())
    .collect();

  if cookies.is_empty() {
    return Err(Error::InvalidEmptyCookies);
  }

  Ok(CookieJar(cookies))
}

fn parse_cookie_header(header: &str) -> CookieJar {
  let header = header.trim();
  let header = match header.get(..7) {
    Some(prefix) if prefix.eq_ignore_ascii_case("cookie:") => &header[7..],
    _ => header,
  };

  let cookies = header
    .split(';')
    .filter_map(|pair| {
      let (name, value) = pair.split_once('=')?;
      let name = name.trim();
      if name.is_empty() {
        return None;
      }

      Some(Cookie {
        name: name.to_string(),
        value: value.trim().to_string(),
        domain: None,
        path: None,
      })
    })
    .collect();

  CookieJar(cookies)
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn test_json_cookies() {
    let json = r#"[
      {"name": "SID", "value": "abc", "domain": ".youtube.com"},
      {"name": "HSID", "value": "def", "httpOnly": true},
      {"name": "broken"}
    ]"#;
    let jar = build_cookie_jar(Some(json), Some("ignored=1")).unwrap();

    assert_eq!(jar.cookies().len(), 2);
    assert_eq!(jar.cookies()[0].domain.as_deref(), Some(".youtube.com"));
    assert_eq!(jar.header_value().as_deref(), Some("SID=abc; HSID=def"));
  }

  #[test]
  fn test_malformed_json_is_fatal() {
    let err = build_cookie_jar(Some("[{"), None).unwrap_err();
    assert_eq!(err.code(), "INVALID_JSON_COOKIES");

    let err = build_cookie_jar(Some(r#"{"name":"a"}"#), None).unwrap_err();
    assert_eq!(err.code(), "INVALID_JSON_COOKIES");
  }

  #[test]
  fn test_json_without_usable_cookies_is_fatal() {
    let err =
      build_cookie_jar(Some(r#"[{"name": 1, "value": "x"}]"#), None)
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_EMPTY_COOKIES");

    let err = build_cookie_jar(Some("[]"), None).unwrap_err();
    assert_eq!(err.code(), "INVALID_EMPTY_COOKIES");
  }

  #[test]
  fn test_header_cookies() {
    let jar = build_cookie_jar(
      None,
      Some("Cookie: SID=abc ; junk; =nameless;  PREF = tz=UTC "),
    )
    .unwrap();

    assert_eq!(
      jar.header_value().as_deref(),
      Some("SID=abc; PREF=tz=UTC")
    );
  }

  #[test]
  fn test_header_prefix_is_case_insensitive() {
    for raw in ["cookie: SID=abc", "COOKIE:SID=abc", "SID=abc"] {
      let jar = build_cookie_jar(None, Some(raw)).unwrap();
      assert_eq!(jar.header_value().as_deref(), Some("SID=abc"), "{raw}");
    }
  }

  #[test]
  fn test_no_cookies() {
    let jar = build_cookie_jar(None, None).unwrap();
    assert!(jar.is_empty());
    assert_eq!(jar.header_value(), None);
  }
}
