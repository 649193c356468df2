//! Subcommand implementations.

use anyhow::{Context, Result};

use cairn_core::config::ClientConfig;
use cairn_core::messages::UserIdentityToken;
use libcairn::Client;

pub mod attributes;
pub mod browse;
pub mod endpoints;
pub mod watch;

pub struct Options {
    pub endpoint: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub json: bool,
}

impl Options {
    fn identity(&self) -> UserIdentityToken {
        match (&self.user, &self.password) {
            (Some(user), Some(password)) => UserIdentityToken::UserName {
                policy_id: Some("username".into()),
                user_name: Some(user.clone()),
                password: Some(password.as_bytes().to_vec()),
                encryption_algorithm: None,
            },
            _ => UserIdentityToken::Anonymous {
                policy_id: Some("anonymous".into()),
            },
        }
    }
}

/// Connect, create and activate a session per the options.
pub async fn connect(opts: &Options) -> Result<Client> {
    let config = ClientConfig::default().with_endpoint_url(opts.endpoint.clone());
    let client = Client::connect(config)
        .await
        .with_context(|| format!("connecting to {}", opts.endpoint))?;
    client.create_session().await.context("creating session")?;
    client
        .activate_session(opts.identity())
        .await
        .context("activating session")?;
    Ok(client)
}
