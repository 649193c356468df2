//! Cairn integration test harness.
//!
//! Every test spins up an in-process server engine on a loopback port and
//! talks to it over real TCP — either through `libcairn` or, for the
//! transport-level scenarios, through a hand-driven secure channel on a raw
//! socket.

use std::sync::Arc;

use cairn_core::config::{ClientConfig, ServerConfig};
use cairn_core::types::{NodeId, Variant};
use cairn_services::address_space::{ns0, MemoryAddressSpace};
use cairn_services::deps::{roles, StaticUserRegistry};
use cairnd::{ServerDeps, ServerHandle};

mod sessions;
mod subscriptions;
mod transport;

pub const DEMO_COUNTER: &str = "ns=2;s=Demo.Counter";
pub const DEMO_BLOB: &str = "ns=2;s=Demo.Blob";

/// Start a server with the demo namespace and the `user1`/`password1`
/// account. Returns the handle and a matching client config.
pub async fn start_server() -> (ServerHandle, ClientConfig) {
    let config = ServerConfig::default();
    let mut users = StaticUserRegistry::new(true);
    users.add_user("user1", "password1", vec![roles::OPERATOR]);

    let mut space = MemoryAddressSpace::with_ns0();
    let demo = NodeId::string(2, "Demo");
    space.add_object(demo.clone(), "Demo");
    space.add_reference(
        &NodeId::numeric(0, ns0::OBJECTS_FOLDER),
        NodeId::numeric(0, ns0::ORGANIZES),
        &demo,
    );
    let counter: NodeId = DEMO_COUNTER.parse().unwrap();
    space.add_variable(counter.clone(), "Counter", Variant::Int32(0));
    space.add_reference(&demo, NodeId::numeric(0, ns0::HAS_COMPONENT), &counter);
    let blob: NodeId = DEMO_BLOB.parse().unwrap();
    space.add_variable(blob.clone(), "Blob", Variant::ByteString(Some(Vec::new())));
    space.add_reference(&demo, NodeId::numeric(0, ns0::HAS_COMPONENT), &blob);

    let deps = ServerDeps {
        space: Box::new(space),
        authn: Arc::new(users),
        ..ServerDeps::demo()
    };
    let handle = ServerHandle::spawn(config, "127.0.0.1:0", deps)
        .await
        .expect("server spawn");
    let client_config = ClientConfig::default().with_endpoint_url(handle.endpoint_url());
    (handle, client_config)
}
