//! `browse` command.

use anyhow::{Context, Result};

use cairn_core::messages::{browse_direction, BrowseDescription};
use cairn_core::types::NodeId;

use super::Options;

pub async fn run(opts: &Options, node: &str) -> Result<()> {
    let node_id: NodeId = node
        .parse()
        .map_err(|status| anyhow::anyhow!("bad node id {node:?}: {status}"))?;
    let client = super::connect(opts).await?;
    let results = client
        .browse(vec![BrowseDescription {
            node_id: node_id.clone(),
            browse_direction: browse_direction::FORWARD,
            reference_type_id: NodeId::null(),
            include_subtypes: true,
            node_class_mask: 0,
            result_mask: 0x3F,
        }])
        .await
        .context("browse failed")?;

    for result in &results {
        if result.status_code.is_bad() {
            println!("{node_id}: {}", result.status_code);
            continue;
        }
        for reference in result.references.as_deref().unwrap_or_default() {
            if opts.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "node": reference.node_id.node_id.to_string(),
                        "browse_name": reference.browse_name.name,
                        "node_class": reference.node_class,
                    })
                );
            } else {
                println!(
                    "{:<28} {}",
                    reference.node_id.node_id.to_string(),
                    reference
                        .browse_name
                        .name
                        .as_deref()
                        .unwrap_or(""),
                );
            }
        }
    }
    client.disconnect().await;
    Ok(())
}
