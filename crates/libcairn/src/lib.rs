//! libcairn — the Cairn OPC UA client library.
//!
//! A [`Client`] owns one secure channel to one server. The channel state
//! machine sits behind a mutex shared by the caller side (which encodes
//! requests) and the receive task (which verifies and decodes responses);
//! responses find their caller through a concurrent table keyed by request
//! id. Token renewal runs on its own timer and is invisible to callers.

pub mod endpoint;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex};

use cairn_core::channel::{ChannelError, ScOutput, SecureChannel};
use cairn_core::codec::BinaryDecodable;
use cairn_core::config::ClientConfig;
use cairn_core::crypto::{AsymmetricSecurity, NullAsymmetric, PermissivePki, PkiProvider};
use cairn_core::messages::{
    ActivateSessionRequest, BrowseDescription, BrowseRequest, BrowseResult, CallMethodRequest,
    CallMethodResult, CallRequest, CloseSessionRequest, CreateMonitoredItemsRequest,
    CreateSessionRequest, CreateSubscriptionRequest, EndpointDescription, GetEndpointsRequest,
    Message, MonitoredItemCreateRequest, MonitoredItemCreateResult, PublishRequest,
    PublishResponse, ReadRequest, ReadValueId, RepublishRequest, RequestHeader, SignatureData,
    SubscriptionAcknowledgement, UserIdentityToken, ViewDescription, WriteValue, WriteRequest,
};
use cairn_core::status::StatusCode;
use cairn_core::types::{ticks_from_unix_millis, DataValue, NodeId, Variant};
use cairn_core::wire::{FrameAccumulator, FrameKind, ReverseHelloBody};
use cairn_services::session::encrypt_user_token;

use endpoint::EndpointUrl;

/// Discarded responses with unknown request ids tolerated before the
/// channel is considered compromised and dropped.
const UNKNOWN_RESPONSE_LIMIT: u32 = 16;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("service failed: {0}")]
    Status(StatusCode),

    #[error("secure channel failed: {0}")]
    Channel(#[from] ChannelError),

    #[error("connection lost")]
    Disconnected,

    #[error("request timed out")]
    Timeout,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// The closest wire status for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            ClientError::Status(status) => *status,
            ClientError::Channel(error) => error.status,
            ClientError::Disconnected => StatusCode::BAD_CONNECTION_CLOSED,
            ClientError::Timeout => StatusCode::BAD_TIMEOUT,
            ClientError::Io(_) => StatusCode::BAD_COMMUNICATION_ERROR,
        }
    }
}

impl From<StatusCode> for ClientError {
    fn from(status: StatusCode) -> Self {
        ClientError::Status(status)
    }
}

// ── Dependencies ──────────────────────────────────────────────────────────────

/// The host-injected crypto seams for the client side.
#[derive(Clone)]
pub struct ClientDeps {
    pub pki: Arc<dyn PkiProvider>,
    pub asym: Arc<dyn AsymmetricSecurity>,
}

impl Default for ClientDeps {
    /// Accept-anything PKI and the null asymmetric profile — matches the
    /// `None` security policy. Real deployments inject their own.
    fn default() -> Self {
        ClientDeps {
            pki: Arc::new(PermissivePki),
            asym: Arc::new(NullAsymmetric),
        }
    }
}

// ── Session bookkeeping ───────────────────────────────────────────────────────

/// Enough to re-activate a session elsewhere: hand to
/// [`Client::connect_with_session`] to bind the session to a new channel.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: NodeId,
    pub auth_token: NodeId,
    pub identity: UserIdentityToken,
}

struct SessionData {
    session_id: NodeId,
    auth_token: NodeId,
    server_nonce: Vec<u8>,
    server_certificate: Option<Vec<u8>>,
    identity: Option<UserIdentityToken>,
}

type Pending = Arc<DashMap<u32, oneshot::Sender<Result<Message, StatusCode>>>>;

// ── Client ────────────────────────────────────────────────────────────────────

pub struct Client {
    config: ClientConfig,
    deps: ClientDeps,
    channel: Arc<Mutex<SecureChannel>>,
    writer: mpsc::Sender<Vec<u8>>,
    pending: Pending,
    session: Arc<std::sync::Mutex<Option<SessionData>>>,
    next_handle: AtomicU32,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Client {
    /// Connect, negotiate transport limits, and open the secure channel.
    pub async fn connect(config: ClientConfig) -> Result<Client, ClientError> {
        Client::connect_with(config, ClientDeps::default()).await
    }

    pub async fn connect_with(
        config: ClientConfig,
        deps: ClientDeps,
    ) -> Result<Client, ClientError> {
        let url = EndpointUrl::parse(&config.endpoint_url).map_err(ClientError::Status)?;
        let stream = TcpStream::connect(url.authority()).await?;
        stream.set_nodelay(true).ok();
        let accumulator = FrameAccumulator::new(config.receive_buffer_size);
        establish(config, deps, stream, accumulator).await
    }

    /// Reverse-hello variant: listen for a server-initiated connection,
    /// then run the normal client handshake on the accepted socket.
    pub async fn accept_reverse(
        listen_addr: &str,
        config: ClientConfig,
        deps: ClientDeps,
    ) -> Result<Client, ClientError> {
        let listener = TcpListener::bind(listen_addr).await?;
        let (mut stream, peer) = listener.accept().await?;
        tracing::info!(%peer, "reverse connection accepted");

        let mut accumulator = FrameAccumulator::new(config.receive_buffer_size);
        let mut buf = [0u8; 4096];
        loop {
            match accumulator
                .next_frame()
                .map_err(|e| ClientError::Status(e.status()))?
            {
                Some(frame) if frame.kind == FrameKind::ReverseHello => {
                    let body = ReverseHelloBody::decode(&mut frame.body.clone())
                        .map_err(|e| ClientError::Status(e.status()))?;
                    tracing::debug!(
                        server_uri = body.server_uri.as_deref().unwrap_or(""),
                        endpoint = body.endpoint_url.as_deref().unwrap_or(""),
                        "reverse hello"
                    );
                    break;
                }
                Some(_) => {
                    return Err(ClientError::Status(StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID))
                }
                None => {
                    let n = stream.read(&mut buf).await?;
                    if n == 0 {
                        return Err(ClientError::Disconnected);
                    }
                    accumulator.feed(&buf[..n]);
                }
            }
        }
        establish(config, deps, stream, accumulator).await
    }

    /// Bind an existing session to this new connection: connect, then
    /// re-activate with the session's token and identity.
    pub async fn connect_with_session(
        config: ClientConfig,
        deps: ClientDeps,
        info: SessionInfo,
    ) -> Result<Client, ClientError> {
        let client = Client::connect_with(config, deps).await?;
        *client.session.lock().expect("session lock") = Some(SessionData {
            session_id: info.session_id,
            auth_token: info.auth_token,
            server_nonce: Vec::new(),
            server_certificate: None,
            identity: None,
        });
        client.activate_session(info.identity).await?;
        Ok(client)
    }

    /// What another channel needs to take this session over.
    pub fn session_info(&self) -> Option<SessionInfo> {
        let session = self.session.lock().expect("session lock");
        session.as_ref().map(|s| SessionInfo {
            session_id: s.session_id.clone(),
            auth_token: s.auth_token.clone(),
            identity: s
                .identity
                .clone()
                .unwrap_or(UserIdentityToken::Anonymous { policy_id: None }),
        })
    }

    pub fn session_id(&self) -> Option<NodeId> {
        self.session
            .lock()
            .expect("session lock")
            .as_ref()
            .map(|s| s.session_id.clone())
    }

    // ── Session services ─────────────────────────────────────────────────────

    pub async fn create_session(&self) -> Result<(), ClientError> {
        let request = CreateSessionRequest {
            request_header: self.request_header(),
            client_description: Default::default(),
            server_uri: None,
            endpoint_url: Some(self.config.endpoint_url.clone()),
            session_name: Some(self.config.session_name.clone()),
            client_nonce: Some(cairn_core::crypto::generate_nonce(32)),
            client_certificate: self.deps.asym.local_certificate().map(|c| c.to_vec()),
            requested_session_timeout: self.config.session_timeout_ms,
            max_response_message_size: self.config.max_message_size,
        };
        let response = match self.request(Message::CreateSessionRequest(request)).await? {
            Message::CreateSessionResponse(response) => response,
            other => return Err(unexpected(other)),
        };

        // With security on, the returned certificate must match the one
        // bound to the secure channel
        if self.config.security_mode != cairn_core::crypto::SecurityMode::None {
            let channel = self.channel.lock().await;
            if channel.peer_certificate() != response.server_certificate.as_deref() {
                return Err(ClientError::Status(StatusCode::BAD_SECURITY_CHECKS_FAILED));
            }
        }
        *self.session.lock().expect("session lock") = Some(SessionData {
            session_id: response.session_id,
            auth_token: response.authentication_token,
            server_nonce: response.server_nonce.unwrap_or_default(),
            server_certificate: response.server_certificate,
            identity: None,
        });
        Ok(())
    }

    pub async fn activate_session(
        &self,
        identity: UserIdentityToken,
    ) -> Result<(), ClientError> {
        let (nonce, certificate) = {
            let session = self.session.lock().expect("session lock");
            let session = session.as_ref().ok_or(StatusCode::BAD_SESSION_ID_INVALID)?;
            (session.server_nonce.clone(), session.server_certificate.clone())
        };
        let token = encrypt_user_token(
            self.deps.asym.as_ref(),
            certificate.as_deref(),
            &nonce,
            None,
            identity.clone(),
        )
        .map_err(ClientError::Status)?;

        let request = ActivateSessionRequest {
            request_header: self.request_header(),
            client_signature: SignatureData::default(),
            client_software_certificates: None,
            locale_ids: Some(
                self.config
                    .locale_ids
                    .iter()
                    .cloned()
                    .map(Some)
                    .collect(),
            ),
            user_identity_token: token.to_extension(),
            user_token_signature: SignatureData::default(),
        };
        let response = self
            .request(Message::ActivateSessionRequest(request))
            .await?;
        match response {
            Message::ActivateSessionResponse(response) => {
                let mut session = self.session.lock().expect("session lock");
                if let Some(session) = session.as_mut() {
                    session.server_nonce = response.server_nonce.unwrap_or_default();
                    session.identity = Some(identity);
                }
                Ok(())
            }
            other => Err(unexpected(other)),
        }
    }

    pub async fn close_session(&self) -> Result<(), ClientError> {
        let request = CloseSessionRequest {
            request_header: self.request_header(),
            delete_subscriptions: true,
        };
        let result = self.request(Message::CloseSessionRequest(request)).await;
        // The session is gone either way
        *self.session.lock().expect("session lock") = None;
        result.map(|_| ())
    }

    // ── Attribute services ───────────────────────────────────────────────────

    pub async fn read(&self, nodes: Vec<ReadValueId>) -> Result<Vec<DataValue>, ClientError> {
        let request = ReadRequest {
            request_header: self.request_header(),
            max_age: 0.0,
            timestamps_to_return: 2, // both
            nodes_to_read: Some(nodes),
        };
        match self.request(Message::ReadRequest(request)).await? {
            Message::ReadResponse(response) => Ok(response.results.unwrap_or_default()),
            other => Err(unexpected(other)),
        }
    }

    /// Read one Value attribute.
    pub async fn read_value(&self, node: NodeId) -> Result<DataValue, ClientError> {
        let mut results = self.read(vec![ReadValueId::value_of(node)]).await?;
        results
            .pop()
            .ok_or(ClientError::Status(StatusCode::BAD_UNEXPECTED_ERROR))
    }

    pub async fn write(&self, nodes: Vec<WriteValue>) -> Result<Vec<StatusCode>, ClientError> {
        let request = WriteRequest {
            request_header: self.request_header(),
            nodes_to_write: Some(nodes),
        };
        match self.request(Message::WriteRequest(request)).await? {
            Message::WriteResponse(response) => Ok(response.results.unwrap_or_default()),
            other => Err(unexpected(other)),
        }
    }

    /// Write one Value attribute.
    pub async fn write_value(
        &self,
        node: NodeId,
        value: Variant,
    ) -> Result<StatusCode, ClientError> {
        let mut results = self
            .write(vec![WriteValue {
                node_id: node,
                attribute_id: cairn_core::types::AttributeId::Value as u32,
                index_range: None,
                value: DataValue::new(value),
            }])
            .await?;
        results
            .pop()
            .ok_or(ClientError::Status(StatusCode::BAD_UNEXPECTED_ERROR))
    }

    pub async fn browse(
        &self,
        nodes: Vec<BrowseDescription>,
    ) -> Result<Vec<BrowseResult>, ClientError> {
        let request = BrowseRequest {
            request_header: self.request_header(),
            view: ViewDescription::default(),
            requested_max_references_per_node: 0,
            nodes_to_browse: Some(nodes),
        };
        match self.request(Message::BrowseRequest(request)).await? {
            Message::BrowseResponse(response) => Ok(response.results.unwrap_or_default()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_endpoints(&self) -> Result<Vec<EndpointDescription>, ClientError> {
        let request = GetEndpointsRequest {
            request_header: self.request_header(),
            endpoint_url: Some(self.config.endpoint_url.clone()),
            locale_ids: None,
            profile_uris: None,
        };
        match self.request(Message::GetEndpointsRequest(request)).await? {
            Message::GetEndpointsResponse(response) => Ok(response.endpoints.unwrap_or_default()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn call(
        &self,
        methods: Vec<CallMethodRequest>,
    ) -> Result<Vec<CallMethodResult>, ClientError> {
        let request = CallRequest {
            request_header: self.request_header(),
            methods_to_call: Some(methods),
        };
        match self.request(Message::CallRequest(request)).await? {
            Message::CallResponse(response) => Ok(response.results.unwrap_or_default()),
            other => Err(unexpected(other)),
        }
    }

    // ── Subscription services ────────────────────────────────────────────────

    /// Returns `(subscription_id, revised_interval_ms, revised_lifetime,
    /// revised_keep_alive)`.
    pub async fn create_subscription(
        &self,
        publishing_interval_ms: f64,
        lifetime_count: u32,
        max_keep_alive_count: u32,
    ) -> Result<(u32, f64, u32, u32), ClientError> {
        let request = CreateSubscriptionRequest {
            request_header: self.request_header(),
            requested_publishing_interval: publishing_interval_ms,
            requested_lifetime_count: lifetime_count,
            requested_max_keep_alive_count: max_keep_alive_count,
            max_notifications_per_publish: 0,
            publishing_enabled: true,
            priority: 0,
        };
        match self
            .request(Message::CreateSubscriptionRequest(request))
            .await?
        {
            Message::CreateSubscriptionResponse(response) => Ok((
                response.subscription_id,
                response.revised_publishing_interval,
                response.revised_lifetime_count,
                response.revised_max_keep_alive_count,
            )),
            other => Err(unexpected(other)),
        }
    }

    pub async fn create_monitored_items(
        &self,
        subscription_id: u32,
        items: Vec<MonitoredItemCreateRequest>,
    ) -> Result<Vec<MonitoredItemCreateResult>, ClientError> {
        let request = CreateMonitoredItemsRequest {
            request_header: self.request_header(),
            subscription_id,
            timestamps_to_return: 2,
            items_to_create: Some(items),
        };
        match self
            .request(Message::CreateMonitoredItemsRequest(request))
            .await?
        {
            Message::CreateMonitoredItemsResponse(response) => {
                Ok(response.results.unwrap_or_default())
            }
            other => Err(unexpected(other)),
        }
    }

    /// Send one Publish request and wait for its notification or
    /// keep-alive.
    pub async fn publish(
        &self,
        acknowledgements: Vec<SubscriptionAcknowledgement>,
    ) -> Result<PublishResponse, ClientError> {
        let request = PublishRequest {
            request_header: self.request_header(),
            subscription_acknowledgements: if acknowledgements.is_empty() {
                None
            } else {
                Some(acknowledgements)
            },
        };
        match self.request(Message::PublishRequest(request)).await? {
            Message::PublishResponse(response) => Ok(response),
            other => Err(unexpected(other)),
        }
    }

    pub async fn republish(
        &self,
        subscription_id: u32,
        sequence_number: u32,
    ) -> Result<cairn_core::messages::NotificationMessage, ClientError> {
        let request = RepublishRequest {
            request_header: self.request_header(),
            subscription_id,
            retransmit_sequence_number: sequence_number,
        };
        match self.request(Message::RepublishRequest(request)).await? {
            Message::RepublishResponse(response) => Ok(response.notification_message),
            other => Err(unexpected(other)),
        }
    }

    // ── Teardown ─────────────────────────────────────────────────────────────

    /// Close the secure channel (CLO) and drop the connection.
    pub async fn disconnect(self) {
        let frame = {
            let mut channel = self.channel.lock().await;
            channel.begin_close(Instant::now()).ok()
        };
        if let Some(frame) = frame {
            let _ = self.writer.send(frame).await;
        }
    }

    // ── Plumbing ─────────────────────────────────────────────────────────────

    /// Allocate the next request handle; unique per client until wrap.
    fn alloc_handle(&self) -> u32 {
        next_handle(&self.next_handle)
    }

    fn request_header(&self) -> RequestHeader {
        let auth_token = self
            .session
            .lock()
            .expect("session lock")
            .as_ref()
            .map(|s| s.auth_token.clone())
            .unwrap_or_else(NodeId::null);
        RequestHeader {
            authentication_token: auth_token,
            timestamp: utc_now_ticks(),
            request_handle: self.alloc_handle(),
            return_diagnostics: 0,
            audit_entry_id: None,
            timeout_hint: self.config.request_timeout_ms as u32,
            additional_header: Default::default(),
        }
    }

    /// Send a request and wait for its response, correlated by request id.
    async fn request(&self, message: Message) -> Result<Message, ClientError> {
        let body = message.encode_body();
        let (reply_tx, reply_rx) = oneshot::channel();
        let request_id;
        {
            let mut channel = self.channel.lock().await;
            request_id = channel.next_request_id();
            let frames = channel.encode_message(request_id, &body, Instant::now())?;
            self.pending.insert(request_id, reply_tx);
            for frame in frames {
                if self.writer.send(frame).await.is_err() {
                    self.pending.remove(&request_id);
                    return Err(ClientError::Disconnected);
                }
            }
        }

        let timeout = Duration::from_millis(self.config.request_timeout_ms);
        let response = match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result.map_err(ClientError::Status)?,
            Ok(Err(_)) => return Err(ClientError::Disconnected),
            Err(_) => {
                // Deadline elapsed: the entry is stale, synthesize a timeout
                self.pending.remove(&request_id);
                return Err(ClientError::Timeout);
            }
        };
        check_service_result(response)
    }
}

/// Reject bad service results; pass good responses through.
fn check_service_result(message: Message) -> Result<Message, ClientError> {
    if let Message::ServiceFault(fault) = &message {
        return Err(ClientError::Status(fault.response_header.service_result));
    }
    if let Some(header) = message.response_header() {
        if header.service_result.is_bad() {
            return Err(ClientError::Status(header.service_result));
        }
    }
    Ok(message)
}

/// Monotonic non-zero handle allocation; zero is the null handle on the
/// wire and is skipped at wrap.
fn next_handle(counter: &AtomicU32) -> u32 {
    let handle = counter.fetch_add(1, Ordering::Relaxed);
    if handle == 0 {
        counter.fetch_add(1, Ordering::Relaxed)
    } else {
        handle
    }
}

fn unexpected(message: Message) -> ClientError {
    tracing::warn!(id = message.encoding_id(), "response of unexpected type");
    ClientError::Status(StatusCode::BAD_UNEXPECTED_ERROR)
}

fn utc_now_ticks() -> i64 {
    let unix_millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    ticks_from_unix_millis(unix_millis)
}

// ── Connection establishment ──────────────────────────────────────────────────

async fn establish(
    config: ClientConfig,
    deps: ClientDeps,
    stream: TcpStream,
    mut accumulator: FrameAccumulator,
) -> Result<Client, ClientError> {
    let (mut read_half, mut write_half) = stream.into_split();
    let (writer_tx, mut writer_rx) = mpsc::channel::<Vec<u8>>(64);
    tokio::spawn(async move {
        while let Some(bytes) = writer_rx.recv().await {
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let mut channel = SecureChannel::client(
        1,
        config.security_policy,
        config.security_mode,
        &config.endpoint_url,
        config.transport_limits(),
        config.channel_lifetime_ms,
    );
    let hello = channel.start()?;
    writer_tx
        .send(hello)
        .await
        .map_err(|_| ClientError::Disconnected)?;

    // Drive HEL/ACK/OPN inline; the receive task takes over once open
    let mut buf = vec![0u8; 65_536];
    while !channel.is_open() {
        while let Some(frame) = accumulator
            .next_frame()
            .map_err(|e| ChannelError {
                status: e.status(),
                reason: e.to_string(),
            })?
        {
            let outputs =
                channel.handle_frame(frame, Instant::now(), deps.pki.as_ref(), deps.asym.as_ref())?;
            for output in outputs {
                match output {
                    ScOutput::Send(bytes) => writer_tx
                        .send(bytes)
                        .await
                        .map_err(|_| ClientError::Disconnected)?,
                    ScOutput::Opened { channel_id, .. } => {
                        tracing::info!(channel_id, "secure channel open");
                    }
                    ScOutput::PeerError { error, reason } => {
                        tracing::warn!(%error, reason, "server refused the channel");
                        return Err(ClientError::Status(error));
                    }
                    _ => {}
                }
            }
        }
        if channel.is_open() {
            break;
        }
        let n = read_half.read(&mut buf).await?;
        if n == 0 {
            return Err(ClientError::Disconnected);
        }
        accumulator.feed(&buf[..n]);
    }
    accumulator.set_max_frame_size(channel.limits().receive_buffer_size);

    let channel = Arc::new(Mutex::new(channel));
    let pending: Pending = Arc::new(DashMap::new());
    tokio::spawn(receive_task(
        read_half,
        accumulator,
        channel.clone(),
        pending.clone(),
        writer_tx.clone(),
        deps.clone(),
    ));
    tokio::spawn(renewal_task(
        channel.clone(),
        writer_tx.clone(),
        deps.clone(),
    ));

    Ok(Client {
        config,
        deps,
        channel,
        writer: writer_tx,
        pending,
        session: Arc::new(std::sync::Mutex::new(None)),
        next_handle: AtomicU32::new(1),
    })
}

/// Reads frames, drives the channel, routes responses to their callers.
async fn receive_task(
    mut read_half: OwnedReadHalf,
    mut accumulator: FrameAccumulator,
    channel: Arc<Mutex<SecureChannel>>,
    pending: Pending,
    writer: mpsc::Sender<Vec<u8>>,
    deps: ClientDeps,
) {
    let mut unknown_responses = 0u32;
    let mut buf = vec![0u8; 65_536];

    'connection: loop {
        match read_half.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => accumulator.feed(&buf[..n]),
        }
        loop {
            let frame = match accumulator.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "framing violation from server");
                    break 'connection;
                }
            };
            let outputs = {
                let mut channel = channel.lock().await;
                channel.handle_frame(frame, Instant::now(), deps.pki.as_ref(), deps.asym.as_ref())
            };
            let outputs = match outputs {
                Ok(outputs) => outputs,
                Err(error) => {
                    tracing::warn!(status = %error.status, reason = error.reason, "channel failed");
                    break 'connection;
                }
            };
            for output in outputs {
                match output {
                    ScOutput::Send(bytes) => {
                        if writer.send(bytes).await.is_err() {
                            break 'connection;
                        }
                    }
                    ScOutput::Renewed { token_id } => {
                        tracing::debug!(token_id, "channel token renewed");
                    }
                    ScOutput::Message { request_id, body } => {
                        match Message::decode_body(&mut body.clone()) {
                            Ok(message) => match pending.remove(&request_id) {
                                Some((_, reply)) => {
                                    let _ = reply.send(Ok(message));
                                }
                                None => {
                                    unknown_responses += 1;
                                    tracing::warn!(request_id, "response with unknown request id");
                                    if unknown_responses > UNKNOWN_RESPONSE_LIMIT {
                                        tracing::warn!("too many unknown responses, dropping channel");
                                        break 'connection;
                                    }
                                }
                            },
                            Err(e) => {
                                tracing::warn!(error = %e, "undecodable response");
                            }
                        }
                    }
                    ScOutput::PeerError { error, reason } => {
                        tracing::warn!(%error, reason, "server closed the channel");
                        break 'connection;
                    }
                    ScOutput::Opened { .. } | ScOutput::CloseRequested => {}
                }
            }
        }
    }

    // Synthetic completion for everything still in flight
    let stale: Vec<u32> = pending.iter().map(|entry| *entry.key()).collect();
    for request_id in stale {
        if let Some((_, reply)) = pending.remove(&request_id) {
            let _ = reply.send(Err(StatusCode::BAD_SECURE_CHANNEL_CLOSED));
        }
    }
}

/// Kicks off token renewal at 75% of the token lifetime.
async fn renewal_task(
    channel: Arc<Mutex<SecureChannel>>,
    writer: mpsc::Sender<Vec<u8>>,
    deps: ClientDeps,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        interval.tick().await;
        let frame = {
            let mut channel = channel.lock().await;
            if !channel.is_open() {
                return;
            }
            if channel.renewal_due(Instant::now()) {
                match channel.begin_renew(Instant::now(), deps.asym.as_ref()) {
                    Ok(frame) => Some(frame),
                    Err(error) => {
                        tracing::warn!(status = %error.status, "renewal failed");
                        None
                    }
                }
            } else {
                None
            }
        };
        if let Some(frame) = frame {
            if writer.send(frame).await.is_err() {
                return;
            }
        }
    }
}
