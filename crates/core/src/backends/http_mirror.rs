//! HTTP mirror cache backend (itorrents-style).
//!
//! Fetches `.torrent` files from a URL template containing `{HASH}`
//! (uppercase) or `{hash}` (lowercase). Every response is reported to the
//! backend's rate limiter, including failures.
//!
//! Some mirrors (torrage) hand out a short-lived download token first: a
//! landing page embeds `getTTL("<token>")`, and the token is decoded and
//! substituted as `{TTL}` into the download URL.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use reqwest::{Client, Response};
use tracing::debug;

use crate::magnet::redact_hash;
use crate::rate_limiter::DynamicRateLimiter;
use crate::resolver::{BackendFetch, FetchError};

static TTL_TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"getTTL\("([^"]+)""#).unwrap());

/// Mirror cache reachable over HTTP.
pub struct HttpMirrorBackend {
    client: Client,
    url_template: String,
    /// Landing page that issues the `{TTL}` token, if the mirror needs one.
    token_url_template: Option<String>,
}

impl HttpMirrorBackend {
    pub fn new(url_template: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            url_template: url_template.into(),
            token_url_template: None,
        })
    }

    /// Fetch a download token from `template` before every blob request.
    ///
    /// The template takes `{HASH}`/`{hash}` and `{NOW}` (unix seconds).
    pub fn with_token_page(mut self, template: impl Into<String>) -> Self {
        self.token_url_template = Some(template.into());
        self
    }

    /// URL of the blob for `hash`.
    pub fn blob_url(&self, hash: &str) -> String {
        fill_hash(&self.url_template, hash)
    }

    async fn get(&self, url: &str) -> Result<Response, FetchError> {
        self.client.get(url).send().await.map_err(map_reqwest)
    }

    /// Resolve the download token for `hash` from the landing page.
    async fn download_token(
        &self,
        template: &str,
        hash: &str,
        rate_limiter: Option<&DynamicRateLimiter>,
    ) -> Result<String, FetchError> {
        let url = fill_hash(template, hash).replace("{NOW}", &Utc::now().timestamp().to_string());
        let response = self.get(&url).await?;
        let status = response.status();
        if !status.is_success() {
            report(rate_limiter, &response);
            return Err(FetchError::Status(status.as_u16()));
        }

        let page = response.text().await.map_err(map_reqwest)?;
        match TTL_TOKEN_RE.captures(&page).and_then(|c| c.get(1)) {
            Some(token) => Ok(decode_ttl_token(token.as_str())),
            None => {
                debug!(hash = %redact_hash(hash), "Mirror landing page carried no download token");
                Err(FetchError::Unavailable("no download token".to_string()))
            }
        }
    }
}

fn fill_hash(template: &str, hash: &str) -> String {
    template
        .replace("{HASH}", &hash.to_ascii_uppercase())
        .replace("{hash}", &hash.to_ascii_lowercase())
}

fn map_reqwest(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Transport(e.to_string())
    }
}

fn report(rate_limiter: Option<&DynamicRateLimiter>, response: &Response) {
    let Some(limiter) = rate_limiter else {
        return;
    };
    let headers: HashMap<String, String> = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    limiter.report_response(response.status().as_u16(), &headers);
}

/// Undo the landing page's obfuscation: shift letters back by 12, then
/// reverse the string.
pub fn decode_ttl_token(token: &str) -> String {
    token
        .chars()
        .map(|c| match c {
            'a'..='z' => (((c as u8 - b'a' + 14) % 26) + b'a') as char,
            'A'..='Z' => (((c as u8 - b'A' + 14) % 26) + b'A') as char,
            other => other,
        })
        .rev()
        .collect()
}

#[async_trait]
impl BackendFetch for HttpMirrorBackend {
    async fn fetch(
        &self,
        _locator: &str,
        hash: &str,
        rate_limiter: Option<&DynamicRateLimiter>,
    ) -> Result<Option<Vec<u8>>, FetchError> {
        let mut url = self.blob_url(hash);
        if let Some(template) = &self.token_url_template {
            let token = self.download_token(template, hash, rate_limiter).await?;
            url = url.replace("{TTL}", &token);
        }

        let response = self.get(&url).await?;
        let status = response.status();
        report(rate_limiter, &response);

        if !status.is_success() {
            debug!(
                hash = %redact_hash(hash),
                status = status.as_u16(),
                "Mirror returned an error status"
            );
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(map_reqwest)?;

        if body.is_empty() {
            return Err(FetchError::EmptyBody);
        }

        Ok(Some(body.to_vec()))
    }
}
