//! Session lifecycle scenarios over real TCP.

use std::time::Duration;

use cairn_core::messages::UserIdentityToken;
use cairn_core::status::StatusCode;
use cairn_core::types::{NodeId, Variant};
use libcairn::{Client, ClientError};

use crate::{start_server, DEMO_COUNTER};

fn username(user: &str, password: &str) -> UserIdentityToken {
    UserIdentityToken::UserName {
        policy_id: Some("username".into()),
        user_name: Some(user.into()),
        password: Some(password.as_bytes().to_vec()),
        encryption_algorithm: None,
    }
}

fn anonymous() -> UserIdentityToken {
    UserIdentityToken::Anonymous {
        policy_id: Some("anonymous".into()),
    }
}

#[tokio::test]
async fn happy_path_read_server_state() {
    let (_server, config) = start_server().await;
    let client = Client::connect(config).await.expect("connect");
    client.create_session().await.expect("create session");
    client.activate_session(anonymous()).await.expect("activate");

    // Server_ServerStatus_State must read as Int32 0 (Running)
    let value = client
        .read_value("ns=0;i=2259".parse().unwrap())
        .await
        .expect("read");
    assert_eq!(value.status, StatusCode::GOOD);
    assert_eq!(value.value, Some(Variant::Int32(0)));

    client.disconnect().await;
}

#[tokio::test]
async fn bad_password_leaves_session_usable_for_retry() {
    let (_server, config) = start_server().await;
    let client = Client::connect(config).await.expect("connect");
    client.create_session().await.expect("create session");

    let err = client
        .activate_session(username("user1", "wrong"))
        .await
        .expect_err("wrong password must fail");
    match err {
        ClientError::Status(status) => {
            assert_eq!(status, StatusCode::BAD_IDENTITY_TOKEN_REJECTED)
        }
        other => panic!("expected status error, got {other:?}"),
    }

    // The session stayed in Created: services are refused…
    let err = client
        .read_value(DEMO_COUNTER.parse().unwrap())
        .await
        .expect_err("read before activation");
    assert_eq!(err.status(), StatusCode::BAD_SESSION_NOT_ACTIVATED);

    // …and a retry with the right password activates it
    client
        .activate_session(username("user1", "password1"))
        .await
        .expect("retry with correct password");
    let value = client
        .read_value(DEMO_COUNTER.parse().unwrap())
        .await
        .expect("read after activation");
    assert_eq!(value.status, StatusCode::GOOD);

    client.disconnect().await;
}

#[tokio::test]
async fn write_then_read_round_trips() {
    let (_server, config) = start_server().await;
    let client = Client::connect(config).await.expect("connect");
    client.create_session().await.expect("create session");
    client.activate_session(anonymous()).await.expect("activate");

    let node: NodeId = DEMO_COUNTER.parse().unwrap();
    let status = client
        .write_value(node.clone(), Variant::Int32(1234))
        .await
        .expect("write");
    assert_eq!(status, StatusCode::GOOD);

    let value = client.read_value(node).await.expect("read back");
    assert_eq!(value.value, Some(Variant::Int32(1234)));

    client.disconnect().await;
}

#[tokio::test]
async fn type_mismatch_is_reported_per_item() {
    let (_server, config) = start_server().await;
    let client = Client::connect(config).await.expect("connect");
    client.create_session().await.expect("create session");
    client.activate_session(anonymous()).await.expect("activate");

    let err = client
        .write_value(
            DEMO_COUNTER.parse().unwrap(),
            Variant::String(Some("not an int".into())),
        )
        .await;
    // A single all-failed write promotes the item code to the service level,
    // which the client surfaces as a status error
    match err {
        Ok(status) => assert_eq!(status, StatusCode::BAD_TYPE_MISMATCH),
        Err(ClientError::Status(status)) => assert_eq!(status, StatusCode::BAD_TYPE_MISMATCH),
        Err(other) => panic!("unexpected failure {other:?}"),
    }

    client.disconnect().await;
}

#[tokio::test]
async fn session_times_out_without_traffic() {
    let (_server, mut config) = start_server().await;
    config.session_timeout_ms = 1_000.0;
    let client = Client::connect(config).await.expect("connect");
    client.create_session().await.expect("create session");
    client.activate_session(anonymous()).await.expect("activate");

    tokio::time::sleep(Duration::from_millis(1_500)).await;

    let err = client
        .read_value(DEMO_COUNTER.parse().unwrap())
        .await
        .expect_err("session must have expired");
    assert_eq!(err.status(), StatusCode::BAD_SESSION_ID_INVALID);

    client.disconnect().await;
}

#[tokio::test]
async fn session_rebinds_to_new_channel_and_rejects_the_old() {
    let (_server, config) = start_server().await;

    let first = Client::connect(config.clone()).await.expect("connect A");
    first.create_session().await.expect("create session");
    first.activate_session(anonymous()).await.expect("activate");
    let info = first.session_info().expect("session info");

    // Bind the same session to a brand new secure channel
    let second = Client::connect_with_session(config, Default::default(), info)
        .await
        .expect("re-activate over new channel");

    // The old channel is now stale for this session
    let err = first
        .read_value(DEMO_COUNTER.parse().unwrap())
        .await
        .expect_err("stale channel must be rejected");
    assert_eq!(err.status(), StatusCode::BAD_SESSION_ID_INVALID);

    // The new channel carries the session fine
    let value = second
        .read_value(DEMO_COUNTER.parse().unwrap())
        .await
        .expect("read over the new channel");
    assert_eq!(value.status, StatusCode::GOOD);

    second.disconnect().await;
    first.disconnect().await;
}

#[tokio::test]
async fn close_session_invalidates_the_token() {
    let (_server, config) = start_server().await;
    let client = Client::connect(config.clone()).await.expect("connect");
    client.create_session().await.expect("create session");
    client.activate_session(anonymous()).await.expect("activate");
    let info = client.session_info().unwrap();
    client.close_session().await.expect("close session");

    // A new channel presenting the closed session's token is refused
    let err = Client::connect_with_session(config, Default::default(), info)
        .await
        .expect_err("closed session must not re-activate");
    assert_eq!(err.status(), StatusCode::BAD_SESSION_ID_INVALID);
}

#[tokio::test]
async fn get_endpoints_and_browse_walk() {
    let (_server, config) = start_server().await;
    let client = Client::connect(config).await.expect("connect");

    // Discovery works without any session
    let endpoints = client.get_endpoints().await.expect("endpoints");
    assert!(!endpoints.is_empty());

    client.create_session().await.expect("create session");
    client.activate_session(anonymous()).await.expect("activate");

    let results = client
        .browse(vec![cairn_core::messages::BrowseDescription {
            node_id: NodeId::numeric(0, 85), // Objects
            browse_direction: cairn_core::messages::browse_direction::FORWARD,
            reference_type_id: NodeId::null(),
            include_subtypes: true,
            node_class_mask: 0,
            result_mask: 0x3F,
        }])
        .await
        .expect("browse");
    assert_eq!(results[0].status_code, StatusCode::GOOD);
    let names: Vec<String> = results[0]
        .references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter_map(|r| r.browse_name.name.clone())
        .collect();
    assert!(names.contains(&"Demo".to_string()), "browse found {names:?}");

    client.disconnect().await;
}
