//! Conditional GET helpers
//!
//! A request is "not modified" only when it carries at least one validator
//! (`If-None-Match`, `If-Modified-Since`) and every validator it carries is
//! satisfied by the current resource.

use chrono::{DateTime, TimeZone, Utc};
use http::header::{IF_MODIFIED_SINCE, IF_NONE_MATCH};
use http::HeaderMap;

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Format a timestamp as an IMF-fixdate (`Sun, 06 Nov 1994 08:49:37 GMT`)
pub fn format_http_date<Tz: TimeZone>(time: &DateTime<Tz>) -> String {
    time.with_timezone(&Utc).format(HTTP_DATE_FORMAT).to_string()
}

/// Parse an HTTP date header value
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc2822(value)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(value, HTTP_DATE_FORMAT)
                .ok()
                .map(|naive| naive.and_utc())
        })
}

/// Whether the resource must be sent in full
///
/// `etag` is compared byte for byte against `If-None-Match`; `last_modified`
/// against `If-Modified-Since` with one second precision. A validator the
/// resource can't answer (no ETag, no modification time) counts as modified.
pub fn is_modified(headers: &HeaderMap, etag: Option<&str>, last_modified: Option<DateTime<Utc>>) -> bool {
    let mut conditional = false;
    let mut modified = false;

    if let Some(if_none_match) = headers.get(IF_NONE_MATCH) {
        conditional = true;
        modified = match etag {
            Some(etag) => if_none_match.as_bytes() != etag.as_bytes(),
            None => true,
        };
    }

    if !modified {
        let since = headers.get(IF_MODIFIED_SINCE).and_then(|v| v.to_str().ok()).filter(|v| !v.is_empty());
        if let Some(since) = since {
            conditional = true;
            modified = match (last_modified, parse_http_date(since)) {
                (Some(last_modified), Some(since)) => since.timestamp() < last_modified.timestamp(),
                _ => true,
            };
        }
    }

    !conditional || modified
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    fn time(secs: i64, millis: u32) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, millis * 1_000_000).unwrap()
    }

    #[test]
    fn test_http_date_round_trip() {
        let t = time(784_111_777, 0);
        let formatted = format_http_date(&t);
        assert_eq!(formatted, "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(parse_http_date(&formatted), Some(t));
        assert_eq!(parse_http_date("not a date"), None);
    }

    #[test]
    fn test_unconditional_request_is_modified() {
        assert!(is_modified(&HeaderMap::new(), Some("\"a\""), Some(time(10, 0))));
    }

    #[test]
    fn test_etag_match() {
        let etag = Some("W/\"1f-abc\"");
        assert!(!is_modified(&headers(&[("if-none-match", "W/\"1f-abc\"")]), etag, None));
        assert!(is_modified(&headers(&[("if-none-match", "W/\"other\"")]), etag, None));
        assert!(is_modified(&headers(&[("if-none-match", "W/\"1f-abc\"")]), None, None));
    }

    #[test]
    fn test_last_modified_second_precision() {
        let modified_at = time(1_000, 900);
        let since = format_http_date(&time(1_000, 0));
        assert!(!is_modified(&headers(&[("if-modified-since", since.as_str())]), None, Some(modified_at)));

        let earlier = format_http_date(&time(999, 0));
        assert!(is_modified(&headers(&[("if-modified-since", earlier.as_str())]), None, Some(modified_at)));
    }

    #[test]
    fn test_all_validators_must_hold() {
        let since = format_http_date(&time(2_000, 0));
        let request = headers(&[("if-none-match", "\"x\""), ("if-modified-since", since.as_str())]);

        assert!(!is_modified(&request, Some("\"x\""), Some(time(1_500, 0))));
        assert!(is_modified(&request, Some("\"y\""), Some(time(1_500, 0))));
        assert!(is_modified(&request, Some("\"x\""), Some(time(2_500, 0))));
    }
}
