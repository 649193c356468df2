//! `watch` command — subscribe to a variable and stream data changes.

use anyhow::{Context, Result};

use cairn_core::messages::{
    DataChangeNotification, MonitoredItemCreateRequest, MonitoringParameters, ReadValueId,
    SubscriptionAcknowledgement,
};
use cairn_core::types::NodeId;

use super::Options;

pub async fn run(opts: &Options, node: &str) -> Result<()> {
    let node_id: NodeId = node
        .parse()
        .map_err(|status| anyhow::anyhow!("bad node id {node:?}: {status}"))?;
    let client = super::connect(opts).await?;

    let (subscription_id, interval, _, _) = client
        .create_subscription(250.0, 60, 10)
        .await
        .context("creating subscription")?;
    let results = client
        .create_monitored_items(
            subscription_id,
            vec![MonitoredItemCreateRequest {
                item_to_monitor: ReadValueId::value_of(node_id.clone()),
                monitoring_mode: 2, // reporting
                requested_parameters: MonitoringParameters {
                    client_handle: 1,
                    sampling_interval: interval,
                    filter: Default::default(),
                    queue_size: 16,
                    discard_oldest: true,
                },
            }],
        )
        .await
        .context("creating monitored item")?;
    if results[0].status_code.is_bad() {
        anyhow::bail!("monitored item rejected: {}", results[0].status_code);
    }
    eprintln!("watching {node_id} (interval {interval} ms, ctrl-c to stop)");

    let mut acks: Vec<SubscriptionAcknowledgement> = Vec::new();
    loop {
        let response = client.publish(std::mem::take(&mut acks)).await?;
        let message = &response.notification_message;
        for data in message.notification_data.as_deref().unwrap_or_default() {
            if let Ok(change) = DataChangeNotification::from_extension(data) {
                for item in change.monitored_items.as_deref().unwrap_or_default() {
                    if opts.json {
                        println!(
                            "{}",
                            serde_json::json!({
                                "sequence": message.sequence_number,
                                "status": item.value.status.to_string(),
                                "value": format!("{:?}", item.value.value),
                            })
                        );
                    } else {
                        println!(
                            "#{} {} {:?}",
                            message.sequence_number, item.value.status, item.value.value
                        );
                    }
                }
            }
        }
        if message.notification_data.is_some() {
            acks.push(SubscriptionAcknowledgement {
                subscription_id: response.subscription_id,
                sequence_number: message.sequence_number,
            });
        }
    }
}
