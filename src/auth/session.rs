//! Local sign-in state: who the client acts as and with which token

use anyhow::Result;

use crate::config::{Config, Identity};

/// Values accepted by `init`. Unset fields leave the stored value alone.
#[derive(Debug, Default)]
pub struct InitOptions {
    pub user_id: String,
    pub role: Option<String>,
    pub token: Option<String>,
    pub expires_in: Option<u64>,
    pub api_url: Option<String>,
    pub socket_url: Option<String>,
}

fn apply(config: &mut Config, opts: InitOptions) {
    let role = opts
        .role
        .or_else(|| config.identity.as_ref().map(|i| i.role.clone()))
        .unwrap_or_else(|| "user".to_string());
    config.identity = Some(Identity {
        user_id: opts.user_id,
        role,
    });
    if let Some(token) = opts.token {
        config.set_access_token(token, opts.expires_in);
    }
    if let Some(url) = opts.api_url {
        config.api_url = url;
    }
    if let Some(url) = opts.socket_url {
        config.socket_url = url;
    }
}

/// Store identity, token and endpoints.
pub async fn init(opts: InitOptions) -> Result<()> {
    let mut config = Config::load()?;
    apply(&mut config, opts);
    config.save()?;

    if let Some(ref identity) = config.identity {
        println!("Signed in as {} ({}).", identity.user_id, identity.role);
    }
    if config.access_token.is_none() {
        println!("No access token stored; REST calls will be unauthenticated.");
    }
    Ok(())
}

/// Forget identity and token. Endpoints and timing stay.
pub async fn logout() -> Result<()> {
    let mut config = Config::load()?;
    config.identity = None;
    config.access_token = None;
    config.save()?;
    println!("Logged out.");
    Ok(())
}

/// Display current sign-in status
pub async fn status() -> Result<()> {
    let config = Config::load()?;

    match config.identity {
        Some(ref identity) => println!("User:        {} ({})", identity.user_id, identity.role),
        None => println!("User:        none (run `market-live init`)"),
    }

    match config.access_token {
        Some(ref token) if !token.is_expired() => {
            println!("Token:       valid");
            if let Some(exp) = token.expires_at {
                println!("  expires_at: {}", exp);
            }
        }
        Some(_) => println!("Token:       expired"),
        None => println!("Token:       none"),
    }

    println!("API:         {}", config.api_url);
    println!("Socket:      {}", config.socket_url);
    println!(
        "Legacy fan-out: {}",
        if config.channel.legacy_fanout { "on" } else { "off" }
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_keeps_previous_role_and_urls() {
        let mut config = Config::default();
        config.identity = Some(Identity {
            user_id: "old".into(),
            role: "admin".into(),
        });
        apply(
            &mut config,
            InitOptions {
                user_id: "U2".into(),
                token: Some("tok".into()),
                ..Default::default()
            },
        );

        let identity = config.identity.unwrap();
        assert_eq!(identity.user_id, "U2");
        assert_eq!(identity.role, "admin");
        assert_eq!(config.access_token.unwrap().token, "tok");
        assert_eq!(config.api_url, Config::default().api_url);
    }

    #[test]
    fn test_init_defaults_role_to_user() {
        let mut config = Config::default();
        apply(
            &mut config,
            InitOptions {
                user_id: "U1".into(),
                socket_url: Some("https://rt.example.com".into()),
                ..Default::default()
            },
        );
        assert_eq!(config.identity.unwrap().role, "user");
        assert!(config.access_token.is_none());
        assert_eq!(config.socket_url, "https://rt.example.com");
    }
}
