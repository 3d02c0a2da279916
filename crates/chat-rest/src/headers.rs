//! Rate-limit response headers

use chat_ratelimit::RateLimitHeaders;
use reqwest::header::HeaderMap;
use std::time::Duration;

pub const LIMIT: &str = "x-ratelimit-limit";
pub const REMAINING: &str = "x-ratelimit-remaining";
/// Fractional seconds until the bucket resets
pub const RESET_AFTER: &str = "x-ratelimit-reset-after";
pub const BUCKET: &str = "x-ratelimit-bucket";
pub const GLOBAL: &str = "x-ratelimit-global";
pub const RETRY_AFTER: &str = "retry-after";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

fn seconds(value: &str) -> Option<Duration> {
    value
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

/// Read whatever rate-limit information `headers` carries.
///
/// Malformed values are treated as absent.
pub fn parse_rate_limit_headers(headers: &HeaderMap) -> RateLimitHeaders {
    RateLimitHeaders {
        limit: header_str(headers, LIMIT).and_then(|v| v.parse().ok()),
        remaining: header_str(headers, REMAINING).and_then(|v| v.parse().ok()),
        reset_after: header_str(headers, RESET_AFTER).and_then(seconds),
        bucket: header_str(headers, BUCKET)
            .filter(|v| !v.is_empty())
            .map(str::to_string),
        global: header_str(headers, GLOBAL).is_some_and(|v| v.eq_ignore_ascii_case("true")),
        retry_after: header_str(headers, RETRY_AFTER).and_then(seconds),
    }
}
