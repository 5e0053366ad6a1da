//! Shared HTTP client for the backends.
//!
//! Basic auth on every request, a cookie store so session-based servers
//! keep their session, and an optional Jenkins CSRF crumb on POSTs.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::debug;

use stratus_core::{Secret, Tunables, retry_fixed_if};

use crate::error::{BackendError, BackendResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Request body variants the backends need.
#[derive(Debug, Clone)]
pub enum Body {
    Empty,
    Form(Vec<(String, String)>),
    Xml(String),
}

pub struct HttpClient {
    client: reqwest::Client,
    base: String,
    username: String,
    password: Secret,
    attempts: u32,
    delay: Duration,
    csrf: bool,
    crumb: Mutex<Option<(String, String)>>,
}

impl HttpClient {
    pub fn new(
        base: &str,
        username: &str,
        password: &Secret,
        tunables: &Tunables,
        csrf: bool,
    ) -> BackendResult<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BackendError::Unavailable(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.clone(),
            attempts: tunables.http_attempts,
            delay: Duration::from_secs(tunables.http_delay_secs),
            csrf,
            crumb: Mutex::new(None),
        })
    }

    /// Join `path` onto the base URL with exactly one slash.
    pub fn url(&self, path: &str) -> String {
        join_url(&self.base, path)
    }

    pub async fn get_text(&self, path: &str) -> BackendResult<String> {
        self.request(Method::GET, path, Body::Empty).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> BackendResult<T> {
        let body = self.get_text(path).await?;
        serde_json::from_str(&body)
            .map_err(|e| BackendError::Unavailable(format!("invalid json from {path}: {e}")))
    }

    pub async fn post(&self, path: &str, body: Body) -> BackendResult<String> {
        self.request(Method::POST, path, body).await
    }

    /// One logical request with bounded retry on transient failures.
    async fn request(&self, method: Method, path: &str, body: Body) -> BackendResult<String> {
        let url = self.url(path);
        retry_fixed_if(
            self.attempts,
            self.delay,
            &url,
            BackendError::is_transient,
            || self.send_once(method.clone(), &url, &body),
        )
        .await
    }

    async fn send_once(&self, method: Method, url: &str, body: &Body) -> BackendResult<String> {
        debug!(%method, url, "backend request");
        let mut req = self
            .client
            .request(method.clone(), url)
            .basic_auth(&self.username, Some(self.password.expose()));
        if method == Method::POST && self.csrf {
            if let Some((field, crumb)) = self.crumb().await {
                req = req.header(field, crumb);
            }
        }
        req = match body {
            Body::Empty => req,
            Body::Form(pairs) => req.form(pairs),
            Body::Xml(xml) => req.header(CONTENT_TYPE, "application/xml").body(xml.clone()),
        };

        let resp = req
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(format!("{url}: {e}")))?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(BackendError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        resp.text()
            .await
            .map_err(|e| BackendError::Unavailable(format!("{url}: {e}")))
    }

    /// Fetch and cache the CSRF crumb. Servers without crumb protection
    /// answer 404, which leaves requests crumb-less.
    async fn crumb(&self) -> Option<(String, String)> {
        let mut cached = self.crumb.lock().await;
        if cached.is_none() {
            let url = self.url("crumbIssuer/api/json");
            let resp = self
                .client
                .get(&url)
                .basic_auth(&self.username, Some(self.password.expose()))
                .send()
                .await
                .ok()?;
            if !resp.status().is_success() {
                return None;
            }
            let value: serde_json::Value = resp.json().await.ok()?;
            let field = value.get("crumbRequestField")?.as_str()?.to_string();
            let crumb = value.get("crumb")?.as_str()?.to_string();
            *cached = Some((field, crumb));
        }
        cached.clone()
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_joined_with_one_slash() {
        assert_eq!(join_url("https://ci/", "/computer/api/json"), "https://ci/computer/api/json");
        assert_eq!(join_url("https://ci", "agent/viewAgents.action"), "https://ci/agent/viewAgents.action");
    }

    #[test]
    fn client_trims_base() {
        let client = HttpClient::new(
            "https://bamboo.example.com/",
            "svc",
            &Secret::new("pw"),
            &Tunables::immediate(),
            false,
        )
        .unwrap();
        assert_eq!(client.url("x"), "https://bamboo.example.com/x");
    }
}
