//! Classify HTTP status codes and curl errors into fetch errors.

use std::time::Duration;

use super::error::FetchError;

/// Classify an HTTP status code. Returns `None` for 2xx.
pub fn classify_http_status(code: u32, retry_after: Option<Duration>) -> Option<FetchError> {
    let status = u16::try_from(code).ok();
    match code {
        200..=299 => None,
        429 | 503 => Some(FetchError::Throttled { retry_after }),
        408 | 500..=599 => Some(FetchError::Transient {
            status,
            reason: format!("HTTP {}", code),
        }),
        _ => Some(FetchError::Permanent {
            status,
            reason: format!("HTTP {}", code),
        }),
    }
}

/// Classify a curl error. Malformed URLs and unsupported protocols will never
/// succeed on retry; everything else is treated as a network hiccup.
pub fn classify_curl_error(e: &curl::Error) -> FetchError {
    if e.is_url_malformed() || e.is_unsupported_protocol() {
        return FetchError::permanent(e.to_string());
    }
    if e.is_operation_timedout() {
        return FetchError::transient(format!("timed out: {}", e));
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
    {
        return FetchError::transient(format!("connection: {}", e));
    }
    FetchError::transient(e.to_string())
}

/// Parse a `Retry-After` header value given in seconds.
///
/// HTTP-date values are not supported and yield `None`, which makes the
/// rate limiter fall back to its own exponential backoff.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_429_and_503_throttled() {
        let hint = Some(Duration::from_secs(7));
        assert_eq!(
            classify_http_status(429, hint),
            Some(FetchError::Throttled { retry_after: hint })
        );
        assert!(matches!(
            classify_http_status(503, None),
            Some(FetchError::Throttled { retry_after: None })
        ));
    }

    #[test]
    fn http_5xx_and_408_transient() {
        assert!(matches!(
            classify_http_status(500, None),
            Some(FetchError::Transient { status: Some(500), .. })
        ));
        assert!(matches!(
            classify_http_status(408, None),
            Some(FetchError::Transient { status: Some(408), .. })
        ));
    }

    #[test]
    fn http_4xx_permanent() {
        assert!(matches!(
            classify_http_status(404, None),
            Some(FetchError::Permanent { status: Some(404), .. })
        ));
        assert!(matches!(
            classify_http_status(400, None),
            Some(FetchError::Permanent { status: Some(400), .. })
        ));
    }

    #[test]
    fn http_2xx_ok() {
        assert_eq!(classify_http_status(200, None), None);
        assert_eq!(classify_http_status(204, None), None);
    }

    #[test]
    fn retry_after_seconds() {
        assert_eq!(parse_retry_after(" 30 "), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }
}
