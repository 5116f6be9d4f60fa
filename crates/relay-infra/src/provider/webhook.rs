//! Generic `http-request` action.
//!
//! Sends the rendered body to an arbitrary URL. With a `secret` credential
//! the body is signed into [`SIGNATURE_HEADER`] so the receiver can verify
//! it; an `oauth2` credential is sent as a bearer token instead.

use relay_core::invoker::ActionProvider;
use relay_types::credential::{CredentialHandle, CredentialType};
use relay_types::dispatch::ActionResult;
use relay_types::error::ActionError;
use relay_types::value::{ConfigMap, ConfigValue};
use reqwest::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde_json::json;

use super::{optional, required, send};
use crate::crypto::signature::{SIGNATURE_HEADER, sign};

pub struct WebhookProvider {
    http: reqwest::Client,
}

/// A fully validated outbound request.
#[derive(Debug)]
struct OutboundRequest {
    url: Url,
    method: Method,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Vec<u8>,
    content_type: Option<&'static str>,
}

impl WebhookProvider {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn http_request(
        &self,
        config: &ConfigMap,
        credential: &CredentialHandle,
    ) -> Result<ActionResult, ActionError> {
        let outbound = parse_request(config)?;

        let mut request = self.http.request(outbound.method.clone(), outbound.url.clone());
        for (name, value) in outbound.headers {
            request = request.header(name, value);
        }
        if let Some(content_type) = outbound.content_type {
            request = request.header(CONTENT_TYPE, content_type);
        }
        request = match credential.credential_type {
            CredentialType::Secret => {
                let signature = sign(credential.token().as_bytes(), &outbound.body)
                    .map_err(|e| ActionError::InvalidConfig(e.to_string()))?;
                request.header(SIGNATURE_HEADER, signature)
            }
            CredentialType::OAuth2 => request.bearer_auth(credential.token()),
        };

        let (status, _) = send(request.body(outbound.body)).await?;
        tracing::debug!(method = %outbound.method, host = ?outbound.url.host_str(), status, "webhook delivered");

        Ok(ActionResult::new(json!({ "status": status })))
    }
}

impl ActionProvider for WebhookProvider {
    fn name(&self) -> &str {
        "webhook"
    }

    fn actions(&self) -> &[&'static str] {
        &["http-request"]
    }

    async fn call(
        &self,
        action_id: &str,
        config: &ConfigMap,
        credential: &CredentialHandle,
    ) -> Result<ActionResult, ActionError> {
        match action_id {
            "http-request" => self.http_request(config, credential).await,
            other => Err(ActionError::InvalidConfig(format!(
                "unknown webhook action '{other}'"
            ))),
        }
    }
}

/// Validate `url`, `method`, `headers`, and `body`.
///
/// Maps and lists in `body` are sent as JSON, scalars as plain text.
fn parse_request(config: &ConfigMap) -> Result<OutboundRequest, ActionError> {
    let raw_url = required(config, "url")?;
    let url = Url::parse(&raw_url)
        .map_err(|e| ActionError::InvalidConfig(format!("invalid url '{raw_url}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ActionError::InvalidConfig(format!(
            "unsupported url scheme '{}'",
            url.scheme()
        )));
    }

    let method = match optional(config, "method")? {
        None => Method::POST,
        Some(m) => match m.to_ascii_uppercase().as_str() {
            "GET" => Method::GET,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "PATCH" => Method::PATCH,
            "DELETE" => Method::DELETE,
            other => {
                return Err(ActionError::InvalidConfig(format!(
                    "unsupported method '{other}'"
                )));
            }
        },
    };

    let mut headers = Vec::new();
    match config.get("headers") {
        None | Some(ConfigValue::Null) => {}
        Some(ConfigValue::Map(map)) => {
            for (name, value) in map {
                let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                    ActionError::InvalidConfig(format!("invalid header name '{name}'"))
                })?;
                if name.as_str().eq_ignore_ascii_case(SIGNATURE_HEADER) {
                    return Err(ActionError::InvalidConfig(format!(
                        "header '{SIGNATURE_HEADER}' is reserved"
                    )));
                }
                if !value.is_scalar() {
                    return Err(ActionError::InvalidConfig(format!(
                        "header '{name}' must be a scalar"
                    )));
                }
                let value = HeaderValue::from_str(&value.to_template_string()).map_err(|_| {
                    ActionError::InvalidConfig(format!("invalid value for header '{name}'"))
                })?;
                headers.push((name, value));
            }
        }
        Some(other) => {
            return Err(ActionError::InvalidConfig(format!(
                "headers must be a map, got {}",
                other.kind()
            )));
        }
    }

    let (body, content_type) = match config.get("body") {
        None | Some(ConfigValue::Null) => (Vec::new(), None),
        Some(value @ (ConfigValue::Map(_) | ConfigValue::List(_))) => (
            serde_json::Value::from(value.clone()).to_string().into_bytes(),
            Some("application/json"),
        ),
        Some(value) => (
            value.to_template_string().into_bytes(),
            Some("text/plain; charset=utf-8"),
        ),
    };
    // Explicit Content-Type headers win.
    let content_type = content_type.filter(|_| !headers.iter().any(|(n, _)| *n == CONTENT_TYPE));

    Ok(OutboundRequest {
        url,
        method,
        headers,
        body,
        content_type,
    })
}
