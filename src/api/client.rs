//! Authenticated HTTP client for the marketplace REST API
//!
//! Wraps reqwest::Client with base-URL handling and bearer token injection.

use anyhow::Result;

use super::error::{ApiError, ErrorBody};
use crate::config::Config;

pub struct MarketClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl MarketClient {
    /// Build a client from config. An expired token is an error; a missing
    /// one is allowed (requests go out unauthenticated and the API decides).
    pub fn new(config: &Config) -> Result<Self> {
        let token = match &config.access_token {
            Some(t) if t.is_expired() => {
                anyhow::bail!("Access token expired. Run `market-live init --token ...` again.")
            }
            Some(t) => Some(t.token.clone()),
            None => {
                tracing::debug!("No access token configured; requests are unauthenticated");
                None
            }
        };

        Ok(Self {
            http: reqwest::Client::new(),
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// GET `path` with query parameters.
    pub async fn get(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, ApiError> {
        let url = self.url(path);
        tracing::debug!("GET {}", url);

        let resp = self
            .authorize(self.http.get(&url).query(query))
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                url: url.clone(),
                source,
            })?;

        check_response(resp, &url).await
    }

    /// POST a multipart form to `path`.
    pub async fn post_multipart(
        &self,
        path: &str,
        form: reqwest::multipart::Form,
    ) -> Result<reqwest::Response, ApiError> {
        let url = self.url(path);
        tracing::debug!("POST {} (multipart)", url);

        let resp = self
            .authorize(self.http.post(&url).multipart(form))
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                url: url.clone(),
                source,
            })?;

        check_response(resp, &url).await
    }
}

/// Turn non-success statuses into `ApiError::Status` with the decoded body.
async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    tracing::debug!("HTTP {} for {}: {}", status.as_u16(), url, text);
    Err(ApiError::Status {
        url: url.to_string(),
        status: status.as_u16(),
        body: ErrorBody::parse(&text),
    })
}

/// Decode a JSON body, mapping failures to `ApiError::Decode`.
pub async fn json_body(resp: reqwest::Response, url: &str) -> Result<serde_json::Value, ApiError> {
    resp.json().await.map_err(|source| ApiError::Decode {
        url: url.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StoredToken;

    #[test]
    fn test_url_joins_without_double_slash() {
        let mut config = Config::default();
        config.api_url = "https://api.example.com/v1/".into();
        let client = MarketClient::new(&config).unwrap();
        assert_eq!(
            client.url("/notifications"),
            "https://api.example.com/v1/notifications"
        );
    }

    #[test]
    fn test_expired_token_rejected() {
        let mut config = Config::default();
        config.access_token = Some(StoredToken {
            token: "t".into(),
            expires_at: Some(1),
        });
        assert!(MarketClient::new(&config).is_err());
    }
}
