//! Subscription and publish-queue scenarios.

use std::time::{Duration, Instant};

use cairn_core::messages::{
    DataChangeNotification, MonitoredItemCreateRequest, MonitoringParameters, ReadValueId,
    SubscriptionAcknowledgement, UserIdentityToken,
};
use cairn_core::status::StatusCode;
use cairn_core::types::{NodeId, Variant};
use libcairn::Client;

use crate::{start_server, DEMO_COUNTER};

async fn connected_client() -> (cairnd::ServerHandle, Client) {
    let (server, config) = start_server().await;
    let client = Client::connect(config).await.expect("connect");
    client.create_session().await.expect("create session");
    client
        .activate_session(UserIdentityToken::Anonymous {
            policy_id: Some("anonymous".into()),
        })
        .await
        .expect("activate");
    (server, client)
}

async fn subscribe_counter(client: &Client) -> u32 {
    let (subscription_id, _, _, _) = client
        .create_subscription(100.0, 30, 3)
        .await
        .expect("create subscription");
    let results = client
        .create_monitored_items(
            subscription_id,
            vec![MonitoredItemCreateRequest {
                item_to_monitor: ReadValueId::value_of(DEMO_COUNTER.parse().unwrap()),
                monitoring_mode: 2,
                requested_parameters: MonitoringParameters {
                    client_handle: 7,
                    sampling_interval: 100.0,
                    filter: Default::default(),
                    queue_size: 16,
                    discard_oldest: true,
                },
            }],
        )
        .await
        .expect("create monitored items");
    assert_eq!(results[0].status_code, StatusCode::GOOD);
    subscription_id
}

#[tokio::test]
async fn keep_alive_arrives_after_three_quiet_intervals() {
    let (_server, client) = connected_client().await;
    let subscription_id = subscribe_counter(&client).await;

    // One publish, no data changes: exactly one keep-alive around 300 ms
    let started = Instant::now();
    let response = client.publish(vec![]).await.expect("publish");
    let elapsed = started.elapsed();

    assert_eq!(response.subscription_id, subscription_id);
    assert!(
        response.notification_message.notification_data.is_none(),
        "expected an empty keep-alive"
    );
    // Keep-alive before any real notification reports sequence 1 and
    // consumes nothing
    assert_eq!(response.notification_message.sequence_number, 1);
    assert!(
        elapsed >= Duration::from_millis(250),
        "keep-alive came too early: {elapsed:?}"
    );
    assert!(
        elapsed < Duration::from_millis(2_000),
        "keep-alive came too late: {elapsed:?}"
    );

    client.disconnect().await;
}

#[tokio::test]
async fn data_change_is_published_with_incrementing_sequence() {
    let (_server, client) = connected_client().await;
    let subscription_id = subscribe_counter(&client).await;
    let node: NodeId = DEMO_COUNTER.parse().unwrap();

    // Change the value, then publish: the notification carries it
    client
        .write_value(node.clone(), Variant::Int32(41))
        .await
        .expect("write");
    let response = client.publish(vec![]).await.expect("publish");
    assert_eq!(response.notification_message.sequence_number, 1);
    let data = response
        .notification_message
        .notification_data
        .as_deref()
        .expect("a real notification");
    let change = DataChangeNotification::from_extension(&data[0]).expect("data change");
    let items = change.monitored_items.as_deref().unwrap();
    assert_eq!(items[0].client_handle, 7);
    assert_eq!(items[0].value.value, Some(Variant::Int32(41)));

    // Second round: acknowledge the first, sequence moves to 2
    client
        .write_value(node, Variant::Int32(42))
        .await
        .expect("write");
    let response = client
        .publish(vec![SubscriptionAcknowledgement {
            subscription_id,
            sequence_number: 1,
        }])
        .await
        .expect("second publish");
    assert_eq!(response.notification_message.sequence_number, 2);
    assert_eq!(response.results, Some(vec![StatusCode::GOOD]));

    client.disconnect().await;
}

#[tokio::test]
async fn republish_serves_from_the_retransmission_queue() {
    let (_server, client) = connected_client().await;
    let subscription_id = subscribe_counter(&client).await;
    let node: NodeId = DEMO_COUNTER.parse().unwrap();

    client
        .write_value(node, Variant::Int32(5))
        .await
        .expect("write");
    let response = client.publish(vec![]).await.expect("publish");
    let sequence = response.notification_message.sequence_number;

    // Unacknowledged messages can be republished…
    let replay = client
        .republish(subscription_id, sequence)
        .await
        .expect("republish");
    assert_eq!(replay.sequence_number, sequence);

    // …an unknown sequence number cannot
    let err = client
        .republish(subscription_id, sequence + 10)
        .await
        .expect_err("unknown sequence");
    assert_eq!(err.status(), StatusCode::BAD_MESSAGE_NOT_AVAILABLE);

    client.disconnect().await;
}

#[tokio::test]
async fn publish_without_subscription_is_refused() {
    let (_server, client) = connected_client().await;
    let err = client
        .publish(vec![])
        .await
        .expect_err("no subscription exists");
    assert_eq!(err.status(), StatusCode::BAD_NO_SUBSCRIPTION);
    client.disconnect().await;
}
