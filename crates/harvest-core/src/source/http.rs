//! Generic HTTP JSON source over libcurl.
//!
//! URLs come from a template with `{kind}` and `{congress}` placeholders.
//! Pagination follows a JSON pointer in each response whose value (a URL)
//! becomes the next page token. The API key is added at request time and
//! stripped from stored tokens so it never lands in the state database.

use std::str;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use super::{FetchRequest, Payload, Source};
use crate::config::SourceConfig;
use crate::retry::{classify_curl_error, classify_http_status, parse_retry_after, FetchError};

/// Raw result of one GET.
struct Response {
    code: u32,
    retry_after: Option<Duration>,
    body: Vec<u8>,
}

pub struct HttpSource {
    cfg: SourceConfig,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpSource {
    /// Reads the API key from `cfg.api_key_env` once, at construction.
    pub fn new(cfg: SourceConfig, timeout: Duration) -> Self {
        let api_key = cfg
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            if let Some(var) = &cfg.api_key_env {
                tracing::warn!(env = %var, "API key variable not set; sending unauthenticated requests");
            }
        }
        Self::with_api_key(cfg, api_key, timeout)
    }

    pub fn with_api_key(cfg: SourceConfig, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            cfg,
            api_key,
            timeout,
        }
    }

    /// Request URL for `req`, including the API key.
    pub fn request_url(&self, req: &FetchRequest) -> Result<Url, FetchError> {
        let mut url = match req.page_token.as_deref() {
            Some(token) if is_http_url(token) => Url::parse(token)
                .map_err(|e| FetchError::permanent(format!("bad page URL: {}", e)))?,
            token => {
                let rendered = self
                    .cfg
                    .url_template
                    .replace("{kind}", self.cfg.paths.for_kind(req.kind))
                    .replace("{congress}", &req.congress.to_string());
                let mut url = Url::parse(&rendered)
                    .map_err(|e| FetchError::permanent(format!("bad URL template: {}", e)))?;
                if let Some(token) = token {
                    url.query_pairs_mut().append_pair(&self.cfg.page_param, token);
                }
                url
            }
        };
        if let Some(key) = &self.api_key {
            let present = url.query_pairs().any(|(k, _)| k == self.cfg.api_key_param);
            if !present {
                url.query_pairs_mut().append_pair(&self.cfg.api_key_param, key);
            }
        }
        Ok(url)
    }

    /// Pagination hints from a response body. Unparseable bodies yield none;
    /// shape validation reports them.
    pub fn page_hints(&self, body: &[u8], current: Option<&str>) -> (Option<String>, Option<u64>) {
        let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) else {
            return (None, None);
        };
        let next = self
            .cfg
            .next_page_pointer
            .as_deref()
            .and_then(|ptr| value.pointer(ptr))
            .and_then(|v| v.as_str())
            .map(|s| strip_query_param(s, &self.cfg.api_key_param))
            .filter(|s| !s.is_empty() && Some(s.as_str()) != current);
        let total_pages = self
            .cfg
            .count_pointer
            .as_deref()
            .and_then(|ptr| value.pointer(ptr))
            .and_then(|v| v.as_u64())
            .map(|count| pages_for(count, self.cfg.page_size));
        (next, total_pages)
    }
}

#[async_trait]
impl Source for HttpSource {
    async fn fetch(&self, req: &FetchRequest) -> Result<Payload, FetchError> {
        let url = self.request_url(req)?;
        let shown_url = strip_query_param(url.as_str(), &self.cfg.api_key_param);
        let connect_timeout = Duration::from_secs(self.cfg.connect_timeout_secs.max(1));
        let timeout = self.timeout;
        tracing::debug!(url = %shown_url, kind = %req.kind, congress = req.congress, "GET");

        let target = url.to_string();
        let resp = tokio::task::spawn_blocking(move || get(&target, connect_timeout, timeout))
            .await
            .map_err(|e| FetchError::transient(format!("fetch task failed: {}", e)))??;

        if let Some(err) = classify_http_status(resp.code, resp.retry_after) {
            tracing::debug!(url = %shown_url, code = resp.code, "non-success response");
            return Err(err);
        }
        let (next_page, total_pages) = self.page_hints(&resp.body, req.page_token.as_deref());
        Ok(Payload {
            bytes: resp.body,
            next_page,
            total_pages,
        })
    }
}

/// Blocking GET; call from `spawn_blocking`.
fn get(url: &str, connect_timeout: Duration, timeout: Duration) -> Result<Response, FetchError> {
    let mut headers: Vec<String> = Vec::new();
    let mut body: Vec<u8> = Vec::new();

    let mut easy = curl::easy::Easy::new();
    let setup = |easy: &mut curl::easy::Easy| -> Result<(), curl::Error> {
        easy.url(url)?;
        easy.get(true)?;
        easy.follow_location(true)?;
        easy.connect_timeout(connect_timeout)?;
        easy.timeout(timeout)?;
        easy.accept_encoding("")?;
        let mut list = curl::easy::List::new();
        list.append("Accept: application/json")?;
        easy.http_headers(list)?;
        Ok(())
    };
    setup(&mut easy).map_err(|e| classify_curl_error(&e))?;

    {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    headers.push(s.trim_end().to_string());
                }
                true
            })
            .map_err(|e| classify_curl_error(&e))?;
        transfer
            .write_function(|data| {
                body.extend_from_slice(data);
                Ok(data.len())
            })
            .map_err(|e| classify_curl_error(&e))?;
        transfer.perform().map_err(|e| classify_curl_error(&e))?;
    }

    let code = easy.response_code().map_err(|e| classify_curl_error(&e))?;
    Ok(Response {
        code,
        retry_after: retry_after_header(&headers),
        body,
    })
}

/// Last `Retry-After` in the header lines (redirects produce several blocks).
fn retry_after_header(lines: &[String]) -> Option<Duration> {
    lines
        .iter()
        .filter_map(|line| line.split_once(':'))
        .filter(|(name, _)| name.trim().eq_ignore_ascii_case("retry-after"))
        .filter_map(|(_, value)| parse_retry_after(value))
        .last()
}

fn is_http_url(token: &str) -> bool {
    token.starts_with("http://") || token.starts_with("https://")
}

fn pages_for(count: u64, page_size: u64) -> u64 {
    let size = page_size.max(1);
    count.div_ceil(size).max(1)
}

/// `url` without query parameter `name`; non-URLs are returned unchanged.
fn strip_query_param(url: &str, name: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    if !parsed.query_pairs().any(|(k, _)| k == name) {
        return url.to_string();
    }
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| k != name)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(kept);
    }
    parsed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobKind;

    fn source(key: Option<&str>) -> HttpSource {
        let cfg = SourceConfig {
            url_template: "https://api.example.gov/v3/{kind}/{congress}?format=json".to_string(),
            ..SourceConfig::default()
        };
        HttpSource::with_api_key(cfg, key.map(str::to_string), Duration::from_secs(5))
    }

    fn req(kind: JobKind, congress: u32, token: Option<&str>) -> FetchRequest {
        FetchRequest {
            kind,
            congress,
            page_token: token.map(str::to_string),
        }
    }

    #[test]
    fn first_page_url_from_template() {
        let url = source(Some("k3y"))
            .request_url(&req(JobKind::Members, 117, None))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.gov/v3/member/congress/117?format=json&api_key=k3y"
        );
    }

    #[test]
    fn non_url_token_uses_page_param() {
        let url = source(None)
            .request_url(&req(JobKind::Bills, 110, Some("250")))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.gov/v3/bill/110?format=json&offset=250"
        );
    }

    #[test]
    fn url_token_is_used_verbatim_plus_key() {
        let url = source(Some("k3y"))
            .request_url(&req(
                JobKind::HouseVotes,
                118,
                Some("https://api.example.gov/v3/house-vote/118?offset=250&limit=250"),
            ))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.gov/v3/house-vote/118?offset=250&limit=250&api_key=k3y"
        );
    }

    #[test]
    fn page_hints_strip_api_key_and_count_pages() {
        let s = source(Some("k3y"));
        let body = br#"{
            "bills": [],
            "pagination": {
                "count": 1001,
                "next": "https://api.example.gov/v3/bill/110?offset=250&api_key=k3y"
            }
        }"#;
        let (next, pages) = s.page_hints(body, None);
        assert_eq!(
            next.as_deref(),
            Some("https://api.example.gov/v3/bill/110?offset=250")
        );
        assert_eq!(pages, Some(5));
    }

    #[test]
    fn page_hints_stop_on_repeat_or_absent() {
        let s = source(None);
        let body = br#"{"pagination": {"next": "https://a.gov/x?offset=5"}}"#;
        let (next, _) = s.page_hints(body, Some("https://a.gov/x?offset=5"));
        assert_eq!(next, None);
        assert_eq!(s.page_hints(b"{}", None), (None, None));
        assert_eq!(s.page_hints(b"not json", None), (None, None));
    }

    #[test]
    fn retry_after_header_case_insensitive() {
        let lines = vec![
            "HTTP/1.1 429 Too Many Requests".to_string(),
            "retry-after: 12".to_string(),
        ];
        assert_eq!(retry_after_header(&lines), Some(Duration::from_secs(12)));
        assert_eq!(retry_after_header(&["Content-Type: x".to_string()]), None);
    }

    #[test]
    fn strip_query_param_only_touches_named_param() {
        assert_eq!(
            strip_query_param("https://a.gov/x?api_key=s&offset=2", "api_key"),
            "https://a.gov/x?offset=2"
        );
        assert_eq!(strip_query_param("https://a.gov/x?api_key=s", "api_key"), "https://a.gov/x");
        assert_eq!(strip_query_param("offset=2", "api_key"), "offset=2");
    }

    #[test]
    fn pages_round_up() {
        assert_eq!(pages_for(0, 250), 1);
        assert_eq!(pages_for(250, 250), 1);
        assert_eq!(pages_for(251, 250), 2);
    }
}
