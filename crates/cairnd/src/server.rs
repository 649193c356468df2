//! The server runtime.
//!
//! Three cooperative tasks joined by bounded event queues, mirroring the
//! engine's layering:
//!
//! - **sockets**: accepts connections, pumps raw bytes in and out
//! - **secure channels**: framing, chunking and crypto per connection
//! - **services**: the dispatcher and everything behind it
//!
//! Each task owns its state exclusively and suspends only on its queue.
//! Timers tick into the secure-channel task (token expiry) and the services
//! task (session timeouts, publishing intervals).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

use cairn_core::channel::{ChannelError, ScId, ScOutput, SecureChannel};
use cairn_core::codec::encode_to_vec;
use cairn_core::config::ServerConfig;
use cairn_core::crypto::{
    AsymmetricSecurity, NullAsymmetric, PermissivePki, PkiProvider, SecurityMode, SecurityPolicy,
};
use cairn_core::messages::Message;
use cairn_core::status::StatusCode;
use cairn_core::wire::{build_frame, ErrorBody, FrameAccumulator, FrameKind, IsFinal};
use cairn_services::channels::SocketId;
use cairn_services::deps::{
    Clock, MethodCallManager, NoMethods, StaticUserRegistry, SystemClock, UserAuthN, UserAuthZ,
};
use cairn_services::deps::PermissiveAuthZ;
use cairn_services::{
    AddressSpace, DispatchAction, DispatchEvent, Dispatcher, MemoryAddressSpace,
};

/// Queue depth for every inter-task channel.
const EVENT_QUEUE_DEPTH: usize = 256;

/// Services timer period: session timeout probes and publishing intervals.
const SERVICES_TICK: Duration = Duration::from_millis(50);

/// Secure-channel timer period: token expiry checks.
const CHANNEL_TICK: Duration = Duration::from_millis(500);

// ── Events between tasks ──────────────────────────────────────────────────────

enum SocketEvent {
    Accepted { socket: SocketId, peer: SocketAddr },
    Data { socket: SocketId, bytes: Bytes },
    Closed { socket: SocketId },
}

enum SocketCommand {
    Send { socket: SocketId, bytes: Vec<u8> },
    Close { socket: SocketId },
}

enum ScCommand {
    Respond {
        sc_id: ScId,
        request_id: u32,
        body: Vec<u8>,
    },
    Close {
        sc_id: ScId,
        status: StatusCode,
    },
}

enum ServiceInput {
    Dispatch(DispatchEvent),
    Local {
        message: Message,
        reply: oneshot::Sender<Message>,
    },
}

// ── Host dependencies ─────────────────────────────────────────────────────────

/// Everything the host injects into the engine.
pub struct ServerDeps {
    pub space: Box<dyn AddressSpace>,
    pub authn: Arc<dyn UserAuthN>,
    pub authz: Arc<dyn UserAuthZ>,
    pub methods: Arc<dyn MethodCallManager>,
    pub pki: Arc<dyn PkiProvider>,
    pub asym: Arc<dyn AsymmetricSecurity>,
    pub clock: Arc<dyn Clock>,
}

impl ServerDeps {
    /// The demo wiring: in-memory address space, anonymous access, no
    /// methods, permissive PKI, null asymmetric profile.
    pub fn demo() -> Self {
        ServerDeps {
            space: Box::new(MemoryAddressSpace::with_ns0()),
            authn: Arc::new(StaticUserRegistry::new(true)),
            authz: Arc::new(PermissiveAuthZ),
            methods: Arc::new(NoMethods),
            pki: Arc::new(PermissivePki),
            asym: Arc::new(NullAsymmetric),
            clock: Arc::new(SystemClock),
        }
    }
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// A running server engine. Dropping the handle shuts it down.
pub struct ServerHandle {
    local_addr: SocketAddr,
    services_tx: mpsc::Sender<ServiceInput>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl ServerHandle {
    /// Bind and spawn the engine. `listen_addr` may use port 0.
    pub async fn spawn(
        config: ServerConfig,
        listen_addr: &str,
        deps: ServerDeps,
    ) -> Result<ServerHandle> {
        let listener = TcpListener::bind(listen_addr)
            .await
            .with_context(|| format!("binding {listen_addr}"))?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "cairnd listening");

        let (socket_event_tx, socket_event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (socket_cmd_tx, socket_cmd_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (sc_cmd_tx, sc_cmd_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (services_tx, services_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(sockets_task(
            listener,
            socket_event_tx,
            socket_cmd_rx,
            shutdown_rx,
        ));
        tokio::spawn(secure_channels_task(
            config.clone(),
            deps.pki.clone(),
            deps.asym.clone(),
            deps.clock.clone(),
            socket_event_rx,
            sc_cmd_rx,
            socket_cmd_tx,
            services_tx.clone(),
        ));
        tokio::spawn(services_task(config, deps, services_rx, sc_cmd_tx));

        // Timer feeding the services task. A weak sender keeps the timer
        // from pinning the engine alive after shutdown.
        let tick_tx = services_tx.downgrade();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SERVICES_TICK);
            loop {
                interval.tick().await;
                let Some(tx) = tick_tx.upgrade() else { break };
                if tx
                    .send(ServiceInput::Dispatch(DispatchEvent::Tick))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        Ok(ServerHandle {
            local_addr,
            services_tx,
            shutdown: Some(shutdown_tx),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The endpoint URL clients should dial.
    pub fn endpoint_url(&self) -> String {
        format!("opc.tcp://{}/cairn", self.local_addr)
    }

    /// Run a local service treatment: the request enters the dispatcher
    /// with a local call context and the response comes back directly.
    pub async fn local_request(&self, message: Message) -> Result<Message> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.services_tx
            .send(ServiceInput::Local {
                message,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("engine stopped"))?;
        reply_rx.await.context("engine dropped the request")
    }

    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

// ── Sockets task ──────────────────────────────────────────────────────────────

async fn sockets_task(
    listener: TcpListener,
    events: mpsc::Sender<SocketEvent>,
    mut commands: mpsc::Receiver<SocketCommand>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut next_socket: SocketId = 1;
    let mut writers: HashMap<SocketId, mpsc::Sender<Vec<u8>>> = HashMap::new();

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("sockets task shutting down");
                return;
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let socket = next_socket;
                next_socket += 1;
                let writer_tx = spawn_connection(socket, stream, events.clone());
                writers.insert(socket, writer_tx);
                if events.send(SocketEvent::Accepted { socket, peer }).await.is_err() {
                    return;
                }
            }
            command = commands.recv() => {
                match command {
                    Some(SocketCommand::Send { socket, bytes }) => {
                        if let Some(writer) = writers.get(&socket) {
                            if writer.send(bytes).await.is_err() {
                                writers.remove(&socket);
                            }
                        }
                    }
                    Some(SocketCommand::Close { socket }) => {
                        // Dropping the writer sender closes the connection
                        writers.remove(&socket);
                    }
                    None => return,
                }
            }
        }
    }
}

/// Spawn the reader and writer halves of one connection. Returns the writer
/// queue; dropping it closes the socket.
fn spawn_connection(
    socket: SocketId,
    stream: TcpStream,
    events: mpsc::Sender<SocketEvent>,
) -> mpsc::Sender<Vec<u8>> {
    let (mut read_half, mut write_half) = stream.into_split();
    let (writer_tx, mut writer_rx) = mpsc::channel::<Vec<u8>>(EVENT_QUEUE_DEPTH);

    tokio::spawn(async move {
        let mut buf = vec![0u8; 65_536];
        loop {
            match read_half.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let bytes = Bytes::copy_from_slice(&buf[..n]);
                    if events
                        .send(SocketEvent::Data { socket, bytes })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }
        }
        let _ = events.send(SocketEvent::Closed { socket }).await;
    });

    tokio::spawn(async move {
        while let Some(bytes) = writer_rx.recv().await {
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    writer_tx
}

// ── Secure channels task ──────────────────────────────────────────────────────

struct Connection {
    accumulator: FrameAccumulator,
    channel: SecureChannel,
}

struct ScState {
    config: ServerConfig,
    pki: Arc<dyn PkiProvider>,
    asym: Arc<dyn AsymmetricSecurity>,
    clock: Arc<dyn Clock>,
    connections: HashMap<SocketId, Connection>,
    socket_of: HashMap<ScId, SocketId>,
    next_sc_id: ScId,
    sockets: mpsc::Sender<SocketCommand>,
    services: mpsc::Sender<ServiceInput>,
}

#[allow(clippy::too_many_arguments)]
async fn secure_channels_task(
    config: ServerConfig,
    pki: Arc<dyn PkiProvider>,
    asym: Arc<dyn AsymmetricSecurity>,
    clock: Arc<dyn Clock>,
    mut socket_events: mpsc::Receiver<SocketEvent>,
    mut commands: mpsc::Receiver<ScCommand>,
    sockets: mpsc::Sender<SocketCommand>,
    services: mpsc::Sender<ServiceInput>,
) {
    let mut state = ScState {
        config,
        pki,
        asym,
        clock,
        connections: HashMap::new(),
        socket_of: HashMap::new(),
        next_sc_id: 1,
        sockets,
        services,
    };
    let mut expiry = tokio::time::interval(CHANNEL_TICK);

    loop {
        tokio::select! {
            event = socket_events.recv() => {
                match event {
                    Some(SocketEvent::Accepted { socket, peer }) => state.on_accepted(socket, peer),
                    Some(SocketEvent::Data { socket, bytes }) => state.on_data(socket, &bytes).await,
                    Some(SocketEvent::Closed { socket }) => state.on_socket_closed(socket).await,
                    None => return,
                }
            }
            command = commands.recv() => {
                match command {
                    Some(ScCommand::Respond { sc_id, request_id, body }) => {
                        state.on_respond(sc_id, request_id, &body).await;
                    }
                    Some(ScCommand::Close { sc_id, status }) => {
                        state.on_close(sc_id, status).await;
                    }
                    None => return,
                }
            }
            _ = expiry.tick() => state.on_expiry_tick().await,
        }
    }
}

impl ScState {
    fn on_accepted(&mut self, socket: SocketId, peer: SocketAddr) {
        let sc_id = self.next_sc_id;
        self.next_sc_id = self.next_sc_id.wrapping_add(1).max(1);
        // The endpoint's first security configuration governs this listener
        let (policy, mode) = self
            .config
            .security
            .first()
            .map(|s| (s.policy, s.mode))
            .unwrap_or((SecurityPolicy::None, SecurityMode::None));
        let channel = SecureChannel::server(
            sc_id,
            sc_id, // wire channel id: unique per server process
            policy,
            mode,
            self.config.transport_limits(),
        );
        tracing::debug!(sc_id, socket, %peer, "connection accepted");
        self.connections.insert(
            socket,
            Connection {
                accumulator: FrameAccumulator::new(self.config.receive_buffer_size),
                channel,
            },
        );
        self.socket_of.insert(sc_id, socket);
    }

    async fn on_data(&mut self, socket: SocketId, bytes: &[u8]) {
        let Some(connection) = self.connections.get_mut(&socket) else {
            return;
        };
        connection.accumulator.feed(bytes);

        loop {
            let frame = match self.connections.get_mut(&socket).unwrap().accumulator.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(socket, error = %e, "framing violation");
                    self.fail_connection(socket, e.status(), &e.to_string()).await;
                    return;
                }
            };
            let now = self.clock.monotonic_now();
            let connection = self.connections.get_mut(&socket).unwrap();
            let was_open = connection.channel.is_open();
            let outputs =
                connection
                    .channel
                    .handle_frame(frame, now, self.pki.as_ref(), self.asym.as_ref());
            match outputs {
                Ok(outputs) => {
                    if self.route_outputs(socket, was_open, outputs).await {
                        return; // connection went away
                    }
                }
                Err(error) => {
                    self.fail_channel(socket, &error).await;
                    return;
                }
            }
        }
    }

    /// Returns true when the connection was torn down.
    async fn route_outputs(
        &mut self,
        socket: SocketId,
        was_open: bool,
        outputs: Vec<ScOutput>,
    ) -> bool {
        for output in outputs {
            match output {
                ScOutput::Send(bytes) => {
                    let _ = self
                        .sockets
                        .send(SocketCommand::Send { socket, bytes })
                        .await;
                }
                ScOutput::Opened { channel_id, .. } => {
                    let sc_id = self.sc_of_socket(socket);
                    tracing::info!(sc_id, channel_id, "secure channel open");
                    let _ = self
                        .services
                        .send(ServiceInput::Dispatch(DispatchEvent::ChannelOpened {
                            sc_id,
                            socket,
                        }))
                        .await;
                }
                ScOutput::Renewed { token_id } => {
                    tracing::debug!(socket, token_id, "token renewed");
                }
                ScOutput::Message { request_id, body } => {
                    self.deliver_message(socket, request_id, body).await;
                }
                ScOutput::CloseRequested => {
                    let sc_id = self.sc_of_socket(socket);
                    tracing::debug!(sc_id, "peer closed the channel");
                    self.teardown(socket, true).await;
                    return true;
                }
                ScOutput::PeerError { error, reason } => {
                    tracing::warn!(socket, %error, reason, "peer reported an error");
                    self.teardown(socket, was_open).await;
                    return true;
                }
            }
        }
        false
    }

    async fn deliver_message(&mut self, socket: SocketId, request_id: u32, body: Bytes) {
        let sc_id = self.sc_of_socket(socket);
        match Message::decode_body(&mut body.clone()) {
            Ok(message) if message.is_request() => {
                let _ = self
                    .services
                    .send(ServiceInput::Dispatch(DispatchEvent::Request {
                        sc_id,
                        request_id,
                        message,
                    }))
                    .await;
            }
            Ok(message) => {
                tracing::warn!(sc_id, id = message.encoding_id(), "ignoring non-request");
            }
            Err(e) => {
                tracing::warn!(sc_id, error = %e, "undecodable message");
                self.fail_connection(socket, e.status(), "message decoding failed")
                    .await;
            }
        }
    }

    async fn on_respond(&mut self, sc_id: ScId, request_id: u32, body: &[u8]) {
        let Some(&socket) = self.socket_of.get(&sc_id) else {
            tracing::debug!(sc_id, "response for a dead channel dropped");
            return;
        };
        let now = self.clock.monotonic_now();
        let Some(connection) = self.connections.get_mut(&socket) else {
            return;
        };
        match connection.channel.encode_message(request_id, body, now) {
            Ok(frames) => {
                for bytes in frames {
                    let _ = self
                        .sockets
                        .send(SocketCommand::Send { socket, bytes })
                        .await;
                }
            }
            Err(error) => {
                tracing::warn!(sc_id, error = %error, "failed to encode response");
                self.fail_channel(socket, &error).await;
            }
        }
    }

    async fn on_close(&mut self, sc_id: ScId, status: StatusCode) {
        if let Some(&socket) = self.socket_of.get(&sc_id) {
            self.fail_connection(socket, status, "closed by server").await;
        }
    }

    async fn on_socket_closed(&mut self, socket: SocketId) {
        self.teardown(socket, true).await;
    }

    async fn on_expiry_tick(&mut self) {
        let now = self.clock.monotonic_now();
        let expired: Vec<SocketId> = self
            .connections
            .iter()
            .filter(|(_, c)| c.channel.is_open() && c.channel.token_expired(now))
            .map(|(&socket, _)| socket)
            .collect();
        for socket in expired {
            tracing::info!(socket, "channel token expired without renewal");
            self.fail_connection(
                socket,
                StatusCode::BAD_SECURE_CHANNEL_TOKEN_UNKNOWN,
                "token expired",
            )
            .await;
        }
    }

    fn sc_of_socket(&self, socket: SocketId) -> ScId {
        self.connections
            .get(&socket)
            .map(|c| c.channel.sc_id())
            .unwrap_or(0)
    }

    /// Send an ERR frame, close the socket, and notify services.
    async fn fail_connection(&mut self, socket: SocketId, status: StatusCode, reason: &str) {
        let error = build_frame(
            FrameKind::Error,
            IsFinal::Final,
            &encode_to_vec(&ErrorBody {
                error: status,
                reason: Some(reason.to_string()),
            }),
        );
        let _ = self
            .sockets
            .send(SocketCommand::Send {
                socket,
                bytes: error,
            })
            .await;
        self.teardown(socket, true).await;
    }

    async fn fail_channel(&mut self, socket: SocketId, error: &ChannelError) {
        self.fail_connection(socket, error.status, &error.reason)
            .await;
    }

    /// Remove the connection; surface `ChannelLost` when the channel had
    /// reached the services layer.
    async fn teardown(&mut self, socket: SocketId, notify: bool) {
        let Some(connection) = self.connections.remove(&socket) else {
            return;
        };
        let sc_id = connection.channel.sc_id();
        self.socket_of.remove(&sc_id);
        let _ = self.sockets.send(SocketCommand::Close { socket }).await;
        if notify {
            let _ = self
                .services
                .send(ServiceInput::Dispatch(DispatchEvent::ChannelLost { sc_id }))
                .await;
        }
    }
}

// ── Services task ─────────────────────────────────────────────────────────────

async fn services_task(
    config: ServerConfig,
    deps: ServerDeps,
    mut inputs: mpsc::Receiver<ServiceInput>,
    sc_commands: mpsc::Sender<ScCommand>,
) {
    let mut dispatcher = Dispatcher::new(
        config,
        deps.space,
        deps.authn,
        deps.authz,
        deps.methods,
        deps.asym,
        deps.clock,
    );

    while let Some(input) = inputs.recv().await {
        match input {
            ServiceInput::Dispatch(event) => {
                for action in dispatcher.handle_event(event) {
                    match action {
                        DispatchAction::Respond {
                            sc_id,
                            request_id,
                            message,
                        } => {
                            let body = message.encode_body();
                            let _ = sc_commands
                                .send(ScCommand::Respond {
                                    sc_id,
                                    request_id,
                                    body,
                                })
                                .await;
                        }
                        DispatchAction::CloseChannel { sc_id, status } => {
                            let _ = sc_commands.send(ScCommand::Close { sc_id, status }).await;
                        }
                        DispatchAction::LocalResponse { .. } => {
                            // Local responses only arise from Local inputs
                        }
                    }
                }
            }
            ServiceInput::Local { message, reply } => {
                let response = dispatcher
                    .handle_event(DispatchEvent::LocalRequest { message })
                    .into_iter()
                    .find_map(|action| match action {
                        DispatchAction::LocalResponse { message } => Some(message),
                        _ => None,
                    });
                if let Some(message) = response {
                    let _ = reply.send(message);
                }
            }
        }
    }
}
