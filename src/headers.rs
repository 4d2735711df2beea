use std::time::SystemTime;

use http::{header, HeaderMap, HeaderValue};
use httpdate::HttpDate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LastModified(pub(crate) HttpDate);

impl From<SystemTime> for LastModified {
    fn from(time: SystemTime) -> Self {
        LastModified(time.into())
    }
}

impl LastModified {
    pub(crate) fn to_header_value(self) -> HeaderValue {
        // an IMF-fixdate only ever contains visible ASCII
        HeaderValue::from_str(&self.0.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("Thu, 01 Jan 1970 00:00:00 GMT"))
    }
}

pub(crate) struct IfModifiedSince(HttpDate);

impl IfModifiedSince {
    /// Check if the supplied time means the resource has been modified.
    pub(crate) fn is_modified(&self, last_modified: &LastModified) -> bool {
        self.0 < last_modified.0
    }

    /// convert a header value into a IfModifiedSince, invalid values are silently ignored
    pub(crate) fn from_header_value(value: &HeaderValue) -> Option<IfModifiedSince> {
        std::str::from_utf8(value.as_bytes())
            .ok()
            .and_then(|value| httpdate::parse_http_date(value).ok())
            .map(|time| IfModifiedSince(time.into()))
    }
}

/// Whether the client's cached copy is still usable, so a `304 Not Modified`
/// can be sent instead of the body.
///
/// No `ETag` is ever emitted, so any `If-None-Match` other than `*` makes the
/// request stale.
pub(crate) fn is_fresh(headers: &HeaderMap, last_modified: &LastModified) -> bool {
    let if_modified_since = headers.get(header::IF_MODIFIED_SINCE);
    let if_none_match = headers.get(header::IF_NONE_MATCH);

    if if_modified_since.is_none() && if_none_match.is_none() {
        return false;
    }

    let no_cache = headers
        .get_all(header::CACHE_CONTROL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|directive| directive.trim().eq_ignore_ascii_case("no-cache"));
    if no_cache {
        return false;
    }

    if let Some(if_none_match) = if_none_match {
        if if_none_match.to_str().ok().map(str::trim) != Some("*") {
            return false;
        }
    }

    match if_modified_since {
        Some(value) => IfModifiedSince::from_header_value(value)
            .map(|since| !since.is_modified(last_modified))
            .unwrap_or(false),
        None => true,
    }
}
