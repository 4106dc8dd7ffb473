//! HTTP client construction for the console API.
//!
//! This module builds a `reqwest::Client` out of [`ApiSettings`]:
//! - request and connect timeouts
//! - user agent
//! - default `Authorization` header when a token is configured
//!
//! # Example
//! ```no_run
//! use roster_config::{RosterConfig, http::{HttpClientParams, build_http_client}};
//!
//! let config = RosterConfig::from_toml_str(r#"
//! [api]
//! base_url = "https://hr.example.com/api"
//! timeout_ms = 15000
//! "#).unwrap();
//!
//! let client = build_http_client(HttpClientParams::from_settings(&config.api)).unwrap();
//! ```
use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderValue};

use crate::ApiSettings;

/// Parameters for configuring an HTTP client.
#[derive(Debug, Clone)]
pub struct HttpClientParams<'a> {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: &'a str,
    pub auth_token: Option<&'a str>,
}

impl<'a> HttpClientParams<'a> {
    pub fn from_settings(settings: &'a ApiSettings) -> Self {
        Self {
            timeout: settings.timeout(),
            connect_timeout: settings.connect_timeout(),
            user_agent: &settings.user_agent,
            auth_token: settings.auth_token.as_deref(),
        }
    }
}

/// Builds an HTTP client with the specified parameters.
///
/// A token that is not a valid header value is skipped with a warning rather
/// than failing the whole client.
pub fn build_http_client(
    params: HttpClientParams,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

    if let Some(token) = params.auth_token {
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                headers.insert(header::AUTHORIZATION, value);
            }
            Err(err) => {
                tracing::warn!("auth token is not a valid header value: {err}");
            }
        }
    }

    reqwest::ClientBuilder::new()
        .use_rustls_tls()
        .timeout(params.timeout)
        .connect_timeout(params.connect_timeout)
        .user_agent(params.user_agent)
        .default_headers(headers)
        .build()
}
