//! `endpoints` command.

use anyhow::{Context, Result};

use cairn_core::config::ClientConfig;
use libcairn::Client;

use super::Options;

pub async fn run(opts: &Options) -> Result<()> {
    // Endpoint discovery needs no session
    let config = ClientConfig::default().with_endpoint_url(opts.endpoint.clone());
    let client = Client::connect(config)
        .await
        .with_context(|| format!("connecting to {}", opts.endpoint))?;
    let endpoints = client.get_endpoints().await.context("GetEndpoints failed")?;

    if opts.json {
        let list: Vec<_> = endpoints
            .iter()
            .map(|e| {
                serde_json::json!({
                    "url": e.endpoint_url,
                    "security_policy": e.security_policy_uri,
                    "security_mode": e.security_mode,
                })
            })
            .collect();
        println!("{}", serde_json::Value::Array(list));
    } else {
        for endpoint in &endpoints {
            println!(
                "{}  mode={}  policy={}",
                endpoint.endpoint_url.as_deref().unwrap_or("?"),
                endpoint.security_mode,
                endpoint.security_policy_uri.as_deref().unwrap_or("?"),
            );
            if let Some(tokens) = &endpoint.user_identity_tokens {
                for token in tokens {
                    println!(
                        "    user token: {} (type {})",
                        token.policy_id.as_deref().unwrap_or("?"),
                        token.token_type
                    );
                }
            }
        }
    }
    client.disconnect().await;
    Ok(())
}
