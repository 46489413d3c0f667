//! Raw probe outcomes and the mapping to externally reported summaries

use crate::models::ResultRow;

/// Scheduler-internal outcome of probing one URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawStatus {
    /// Ban marker found; carries the trimmed marker text
    Banned(String),
    PrivateProfile,
    NotBannedPublic,
    UnexpectedStructure,
    /// Non-success HTTP status
    HttpError(u16),
    Timeout,
    ProxyError(String),
    ConnectionError,
    RequestError(String),
    /// Non-network failure, returned without retrying
    Unexpected(String),
    /// Inner worker crashed; recorded per URL at the batch boundary
    WorkerPanic(String),
    /// Retry budget spent; wraps the last retryable error
    RetriesExhausted(Box<RawStatus>),
}

impl RawStatus {
    /// Transient failures worth another attempt within a single probe
    pub fn is_retryable(&self) -> bool {
        match self {
            RawStatus::Timeout | RawStatus::ProxyError(_) | RawStatus::ConnectionError => true,
            RawStatus::HttpError(code) => matches!(code, 429 | 500 | 502 | 503 | 504),
            _ => false,
        }
    }
}

impl std::fmt::Display for RawStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawStatus::Banned(text) => write!(f, "BANNED: {text}"),
            RawStatus::PrivateProfile => write!(f, "PRIVATE_PROFILE"),
            RawStatus::NotBannedPublic => write!(f, "NOT_BANNED_PUBLIC"),
            RawStatus::UnexpectedStructure => write!(f, "PROFILE_UNEXPECTED_STRUCTURE"),
            RawStatus::HttpError(code) => write!(f, "ERROR_HTTP_{code}"),
            RawStatus::Timeout => write!(f, "ERROR_TIMEOUT"),
            RawStatus::ProxyError(msg) => write!(f, "PROXY_ERROR_CONNECT: {msg}"),
            RawStatus::ConnectionError => write!(f, "ERROR_CONNECTION"),
            RawStatus::RequestError(msg) => write!(f, "ERROR_REQUEST_GENERAL: {msg}"),
            RawStatus::Unexpected(msg) => write!(f, "ERROR_UNEXPECTED: {msg}"),
            RawStatus::WorkerPanic(msg) => write!(f, "ERROR_INNER_THREAD_EXCEPTION: {msg}"),
            RawStatus::RetriesExhausted(last) => write!(f, "RETRY_FAILED_FINAL: {last}"),
        }
    }
}

/// Map a raw status to the external `(status_summary, details)` pair.
///
/// Deterministic and stateless; the full table lives here and nowhere else.
pub fn interpret(raw: &RawStatus) -> (&'static str, String) {
    match raw {
        RawStatus::Banned(text) => ("Banned", text.clone()),
        RawStatus::PrivateProfile => ("Private", "Profile is private".to_string()),
        RawStatus::NotBannedPublic => {
            ("Public", "Profile is public, no ban displayed".to_string())
        }
        RawStatus::UnexpectedStructure => {
            ("Unexpected", "Page structure not recognized".to_string())
        }
        RawStatus::HttpError(404) => (
            "HTTP 404 Not Found",
            "Profile page not found (HTTP 404)".to_string(),
        ),
        RawStatus::HttpError(code) => ("Error", format!("HTTP error {code}")),
        RawStatus::Timeout => ("Error", "Request timed out".to_string()),
        RawStatus::ProxyError(msg) => ("Proxy Error", msg.clone()),
        RawStatus::ConnectionError => ("Error", "Connection error".to_string()),
        RawStatus::RequestError(msg) => ("Error", msg.clone()),
        RawStatus::Unexpected(msg) => ("Error", msg.clone()),
        RawStatus::WorkerPanic(msg) => ("Error", format!("Worker failed: {msg}")),
        RawStatus::RetriesExhausted(last) => {
            let (inner_summary, inner_details) = interpret(last);
            let summary = if inner_summary == "Proxy Error" {
                "Proxy Error"
            } else {
                "Error"
            };
            (summary, format!("Retries exhausted: {inner_details}"))
        }
    }
}

/// Build the external result row for one probed URL.
///
/// `steam_id` is the URL segment after the last `/`. Error and proxy-error
/// rows gain a ` (Proxy: <endpoint>)` suffix when a proxy was in play.
pub fn to_result_row(url: &str, raw: &RawStatus, proxy_used: &str, batch_id: u64) -> ResultRow {
    let steam_id = url.rsplit('/').next().unwrap_or_default().to_string();
    let (summary, mut details) = interpret(raw);

    if (summary == "Error" || summary == "Proxy Error")
        && proxy_used != "None"
        && !details.contains(proxy_used)
    {
        details = if details.is_empty() {
            format!("(Proxy: {proxy_used})")
        } else {
            format!("{details} (Proxy: {proxy_used})")
        };
    }

    ResultRow {
        steam_id,
        status_summary: summary.to_string(),
        details,
        proxy_used: proxy_used.to_string(),
        batch_id,
    }
}
