//! One-shot URL classification with per-attempt retry policy

use std::time::Duration;

use reqwest::{header, redirect, Client};
use tracing::{debug, warn};

use super::classifier::{classify_profile_page, PageVerdict};
use super::status::RawStatus;
use crate::models::validate_endpoint;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";
const REQUEST_TIMEOUT_SECS: u64 = 25;
const MAX_REDIRECTS: usize = 10;

/// Probes a single URL through an optional proxy.
///
/// Every failure mode is folded into a [`RawStatus`]; `probe` never returns
/// an error and has no partial side effects.
#[derive(Clone)]
pub struct UrlProber {
    timeout: Duration,
}

impl Default for UrlProber {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlProber {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        }
    }

    /// Override the hard per-request timeout (used by tests against local
    /// doubles; production keeps the 25 s default).
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Classify `url`, retrying transient failures up to `max_retries`
    /// times with `retry_delay` between attempts.
    ///
    /// `batch_id`, `index` and `total` only feed the log context.
    #[allow(clippy::too_many_arguments)]
    pub async fn probe(
        &self,
        url: &str,
        proxy: Option<&str>,
        max_retries: u32,
        retry_delay: Duration,
        batch_id: u64,
        index: usize,
        total: usize,
    ) -> RawStatus {
        // Invalid endpoints demote the probe to a direct request.
        let proxy_url = proxy.and_then(|raw| {
            let validated = validate_endpoint(raw);
            if validated.is_none() {
                warn!(proxy = raw, "Invalid proxy format, proceeding without proxy");
            }
            validated
        });

        let client = match self.build_client(proxy_url.as_deref()) {
            Ok(client) => client,
            Err(err) => return RawStatus::Unexpected(err.to_string()),
        };

        let via_proxy = proxy_url.is_some();
        let mut last_error = RawStatus::Unexpected("no attempts made".to_string());

        for attempt in 0..=max_retries {
            if attempt > 0 {
                debug!(
                    batch_id,
                    url,
                    index,
                    total,
                    attempt,
                    max_retries,
                    "Retrying probe"
                );
            }

            match self.attempt(&client, url, via_proxy).await {
                Ok(verdict) => {
                    debug!(batch_id, url, index, total, ?verdict, "Probe classified");
                    return match verdict {
                        PageVerdict::Banned(text) => RawStatus::Banned(text),
                        PageVerdict::Private => RawStatus::PrivateProfile,
                        PageVerdict::Public => RawStatus::NotBannedPublic,
                        PageVerdict::Unexpected => RawStatus::UnexpectedStructure,
                    };
                }
                Err(raw) => {
                    // 404 is permanent and unexpected errors are programmer
                    // territory; both end the probe at once.
                    if raw == RawStatus::HttpError(404) {
                        return raw;
                    }
                    if matches!(raw, RawStatus::Unexpected(_)) {
                        return raw;
                    }

                    let retryable = raw.is_retryable();
                    debug!(batch_id, url, attempt, %raw, retryable, "Probe attempt failed");
                    last_error = raw;

                    // A non-retryable error surfaces unwrapped only while
                    // attempts remain; the final attempt always reports the
                    // spent retry budget.
                    if !retryable && attempt < max_retries {
                        return last_error;
                    }
                    if retryable && attempt < max_retries {
                        if !retry_delay.is_zero() {
                            tokio::time::sleep(retry_delay).await;
                        }
                        continue;
                    }
                }
            }
        }

        RawStatus::RetriesExhausted(Box::new(last_error))
    }

    fn build_client(&self, proxy_url: Option<&str>) -> crate::Result<Client> {
        let mut builder = Client::builder()
            .timeout(self.timeout)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS));

        if let Some(endpoint) = proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(endpoint)?);
        }

        Ok(builder.build()?)
    }

    async fn attempt(
        &self,
        client: &Client,
        url: &str,
        via_proxy: bool,
    ) -> std::result::Result<PageVerdict, RawStatus> {
        let response = client
            .get(url)
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::ACCEPT_LANGUAGE, ACCEPT_LANGUAGE)
            .send()
            .await
            .map_err(|err| classify_transport_error(&err, via_proxy))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RawStatus::HttpError(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|err| classify_transport_error(&err, via_proxy))?;

        Ok(classify_profile_page(&body))
    }
}

fn classify_transport_error(err: &reqwest::Error, via_proxy: bool) -> RawStatus {
    if err.is_timeout() {
        RawStatus::Timeout
    } else if err.is_connect() {
        if via_proxy {
            RawStatus::ProxyError(err.to_string())
        } else {
            RawStatus::ConnectionError
        }
    } else if err.is_builder() {
        RawStatus::Unexpected(err.to_string())
    } else {
        RawStatus::RequestError(err.to_string())
    }
}
