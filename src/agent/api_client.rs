//! Control-plane HTTP client used for action parameter enrichment

use std::collections::HashMap;
use std::time::Duration;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{header, Client};
use tracing::{debug, info, warn};

use crate::config::GeneralConfig;
use crate::error::{Result, WardenError};

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Percent-encode everything but unreserved characters and `/`.
const VALUE_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

fn encode_value(value: &str) -> String {
    utf8_percent_encode(value, VALUE_ENCODE_SET).to_string()
}

/// Expand `{placeholder}` occurrences from the context, percent-encoding
/// substituted values. Placeholders without a context entry are kept
/// verbatim.
pub fn expand_template(template: &str, context: &HashMap<String, String>) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        result.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                match context.get(name) {
                    Some(value) => result.push_str(&encode_value(value)),
                    None => {
                        result.push('{');
                        result.push_str(name);
                        result.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                // Unterminated placeholder; keep the remainder as-is.
                result.push('{');
                rest = after;
                break;
            }
        }
    }

    result.push_str(rest);
    result
}

/// Client for the manager control plane.
///
/// The API key travels as a query parameter; a non-2xx answer triggers one
/// retry with the key additionally in the `Authorization` header. That
/// order is deliberate and must not collapse into a single attempt.
pub struct ControlPlaneClient {
    base_url: String,
    api_key: String,
    vm_identifier: String,
    client: Client,
}

impl ControlPlaneClient {
    pub fn new(general: &GeneralConfig) -> Result<Self> {
        let mut default_headers = header::HeaderMap::new();
        default_headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .default_headers(default_headers)
            .user_agent(concat!("warden-agent/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url: general.manager_base_url.trim_end_matches('/').to_string(),
            api_key: general.api_key.clone(),
            vm_identifier: general.vm_identifier.clone(),
            client,
        })
    }

    /// Fetch enrichment data for an action.
    ///
    /// The endpoint template is expanded from the VM identifier plus the
    /// event captures; the response must be a JSON value on 2xx.
    pub async fn get_data(
        &self,
        endpoint_template: &str,
        context: &HashMap<String, String>,
    ) -> Result<serde_json::Value> {
        let mut full_context = HashMap::with_capacity(context.len() + 1);
        full_context.insert("VMIdentifier".to_string(), self.vm_identifier.clone());
        full_context.extend(context.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut endpoint = expand_template(endpoint_template, &full_context);
        if !endpoint.starts_with('/') {
            endpoint.insert(0, '/');
        }

        let separator = if endpoint.contains('?') { '&' } else { '?' };
        let url = format!(
            "{}{}{}api_key={}",
            self.base_url,
            endpoint,
            separator,
            encode_value(&self.api_key)
        );

        debug!(endpoint = %endpoint, "Requesting control plane data");

        // First attempt: query-parameter auth only.
        let response = self.client.get(&url).send().await?;
        if response.status().is_success() {
            return Ok(response.json().await?);
        }
        let first_status = response.status();
        warn!(
            status = %first_status,
            "Query-parameter auth rejected, retrying with Authorization header"
        );

        let response = self
            .client
            .get(&url)
            .header(header::AUTHORIZATION, self.api_key.as_str())
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(response.json().await?);
        }

        Err(WardenError::ControlPlane(format!(
            "all attempts failed: {} then {}",
            first_status,
            response.status()
        )))
    }

    /// Check whether the configured API key is accepted.
    ///
    /// A 2xx or 404 answer means the credential is valid (404 is the probe
    /// account not existing); 401 means it is not.
    pub async fn verify_key(&self) -> Result<bool> {
        let url = format!(
            "{}/windows-vm-agent/account-config?vm_id={}&account_id=test&api_key={}",
            self.base_url,
            encode_value(&self.vm_identifier),
            encode_value(&self.api_key)
        );

        let response = self.client.get(&url).send().await?;
        let status = response.status();

        if status.is_success() {
            info!("API key is valid");
            Ok(true)
        } else if status.as_u16() == 404 {
            info!("API key is valid (test account not found)");
            Ok(true)
        } else if status.as_u16() == 401 {
            warn!("API key was rejected");
            Ok(false)
        } else {
            warn!(status = %status, "Unexpected status during API key check");
            Ok(false)
        }
    }
}
