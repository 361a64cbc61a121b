//! socket.io v1 handshake

use anyhow::{Context, Result};
use std::time::Duration;

/// Parameters returned by the handshake request.
#[derive(Debug, Clone, PartialEq)]
pub struct Handshake {
    pub session_id: String,
    /// Server heartbeat timeout; we must ping more often than this.
    pub heartbeat_timeout: Option<Duration>,
    pub close_timeout: Option<Duration>,
    pub transports: Vec<String>,
}

impl Handshake {
    /// Parse `"{sid}:{heartbeat}:{close}:{transports}"`.
    pub fn parse(body: &str) -> Result<Self> {
        let mut parts = body.trim().split(':');
        let session_id = parts
            .next()
            .filter(|s| !s.is_empty())
            .context("Empty handshake response")?
            .to_string();
        let secs = |s: Option<&str>| {
            s.and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .map(Duration::from_secs)
        };
        let heartbeat_timeout = secs(parts.next());
        let close_timeout = secs(parts.next());
        let transports = parts
            .next()
            .map(|t| t.split(',').map(String::from).collect())
            .unwrap_or_default();

        Ok(Self {
            session_id,
            heartbeat_timeout,
            close_timeout,
            transports,
        })
    }

    pub fn supports_websocket(&self) -> bool {
        self.transports.is_empty() || self.transports.iter().any(|t| t == "websocket")
    }

    /// How often to send our own heartbeat: half the server timeout, within
    /// 5..=30 seconds.
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_timeout
            .map(|t| t / 2)
            .unwrap_or(Duration::from_secs(25))
            .clamp(Duration::from_secs(5), Duration::from_secs(30))
    }

    /// WebSocket URL for this session.
    pub fn ws_url(&self, base: &str, user_id: &str) -> String {
        let url = format!(
            "{}/socket.io/1/websocket/{}?userId={}",
            base.trim_end_matches('/'),
            self.session_id,
            encode(user_id),
        );
        url.replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1)
    }
}

fn encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// URL of the handshake request.
pub fn handshake_url(base: &str, user_id: &str) -> String {
    format!(
        "{}/socket.io/1/?userId={}&t={}",
        base.trim_end_matches('/'),
        encode(user_id),
        chrono::Utc::now().timestamp_millis(),
    )
}

/// Request a session id for `user_id`.
pub async fn handshake(http: &reqwest::Client, base: &str, user_id: &str) -> Result<Handshake> {
    let url = handshake_url(base, user_id);

    tracing::info!("Requesting socket.io session for {}", user_id);
    tracing::debug!("Handshake URL: {}", url);

    let resp = http
        .get(&url)
        .send()
        .await
        .context("Socket.io handshake request failed")?;

    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();

    if !status.is_success() {
        anyhow::bail!("Socket.io handshake failed: {}: {}", status, text);
    }
    tracing::debug!("Handshake response: {}", text);

    let handshake = Handshake::parse(&text)?;
    anyhow::ensure!(
        handshake.supports_websocket(),
        "Server does not offer the websocket transport (offers {:?})",
        handshake.transports
    );

    tracing::info!("Got socket.io session ID: {}", handshake.session_id);
    Ok(handshake)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_handshake() {
        let hs = Handshake::parse("abc123:60:60:websocket,xhr-polling\n").unwrap();
        assert_eq!(hs.session_id, "abc123");
        assert_eq!(hs.heartbeat_timeout, Some(Duration::from_secs(60)));
        assert_eq!(hs.close_timeout, Some(Duration::from_secs(60)));
        assert!(hs.supports_websocket());
        assert_eq!(hs.heartbeat_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_without_timeouts() {
        let hs = Handshake::parse("abc123:::websocket").unwrap();
        assert_eq!(hs.heartbeat_timeout, None);
        assert_eq!(hs.heartbeat_interval(), Duration::from_secs(25));
    }

    #[test]
    fn test_short_heartbeat_is_clamped() {
        let hs = Handshake::parse("s:6:10:websocket").unwrap();
        assert_eq!(hs.heartbeat_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_polling_only_server() {
        let hs = Handshake::parse("s:60:60:xhr-polling").unwrap();
        assert!(!hs.supports_websocket());
    }

    #[test]
    fn test_empty_handshake_is_error() {
        assert!(Handshake::parse("").is_err());
        assert!(Handshake::parse(":60:60:websocket").is_err());
    }

    #[test]
    fn test_ws_url_scheme_and_encoding() {
        let hs = Handshake::parse("sid:60:60:websocket").unwrap();
        assert_eq!(
            hs.ws_url("https://rt.example.com/", "a b"),
            "wss://rt.example.com/socket.io/1/websocket/sid?userId=a+b"
        );
        assert_eq!(
            hs.ws_url("http://localhost:5000", "U1"),
            "ws://localhost:5000/socket.io/1/websocket/sid?userId=U1"
        );
    }

    #[test]
    fn test_handshake_url() {
        let url = handshake_url("http://localhost:5000/", "U1");
        assert!(url.starts_with("http://localhost:5000/socket.io/1/?userId=U1&t="));
    }
}
