//! cairnd — Cairn OPC UA server daemon.

use std::sync::Arc;

use anyhow::Result;

use cairn_core::types::{NodeId, Variant};
use cairn_services::address_space::{ns0, MemoryAddressSpace};
use cairn_services::deps::StaticUserRegistry;
use cairnd::{DaemonConfig, ServerDeps, ServerHandle};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing — RUST_LOG controls verbosity
    // e.g. RUST_LOG=debug cargo run -p cairnd
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = DaemonConfig::load()?;
    tracing::info!(listen = %config.listen_addr, "cairnd starting");

    // Translate the daemon's user table into the engine's registry
    let mut users = StaticUserRegistry::new(config.allow_anonymous);
    for user in &config.users {
        let role_ids = user
            .roles
            .iter()
            .map(|&id| NodeId::numeric(0, id))
            .collect();
        users.add_user(&user.username, &user.password, role_ids);
    }

    // A small demo namespace alongside the ns=0 skeleton
    let mut space = MemoryAddressSpace::with_ns0();
    let demo = NodeId::string(2, "Demo");
    space.add_object(demo.clone(), "Demo");
    space.add_reference(
        &NodeId::numeric(0, ns0::OBJECTS_FOLDER),
        NodeId::numeric(0, ns0::ORGANIZES),
        &demo,
    );
    for (name, value) in [
        ("Counter", Variant::Int32(0)),
        ("Temperature", Variant::Double(20.5)),
        ("Label", Variant::String(Some("cairn demo".into()))),
    ] {
        let node = NodeId::string(2, format!("Demo.{name}"));
        space.add_variable(node.clone(), name, value);
        space.add_reference(&demo, NodeId::numeric(0, ns0::HAS_COMPONENT), &node);
    }

    let deps = ServerDeps {
        space: Box::new(space),
        authn: Arc::new(users),
        ..ServerDeps::demo()
    };

    let handle = ServerHandle::spawn(config.server.clone(), &config.listen_addr, deps).await?;
    tracing::info!(endpoint = %handle.endpoint_url(), "server ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    handle.shutdown();
    Ok(())
}
