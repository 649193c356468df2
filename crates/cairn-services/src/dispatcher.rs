//! The I/O dispatcher.
//!
//! The single ingress for everything the secure-channel layer delivers:
//! channel lifecycle, decoded service requests, local application requests
//! and timer ticks. Each event runs to completion and yields a list of
//! actions — responses to encode, channels to close — that the runtime
//! executes in order. All server state (channels, sessions, subscriptions,
//! the address space) is owned here, on one task; nothing is shared.

use std::sync::Arc;
use std::time::Duration;

use cairn_core::channel::ScId;
use cairn_core::config::ServerConfig;
use cairn_core::crypto::AsymmetricSecurity;
use cairn_core::messages::{
    ActivateSessionResponse, BrowseResponse, CallResponse, CloseSessionResponse,
    CreateMonitoredItemsResponse, CreateSessionResponse, CreateSubscriptionResponse,
    GetEndpointsResponse, Message, PublishResponse, ReadResponse, RepublishResponse,
    ResponseHeader, ServiceFault, SignatureData, UserIdentityToken, WriteResponse,
};
use cairn_core::status::StatusCode;

use crate::address_space::AddressSpace;
use crate::channels::{Admission, ChannelManager, SocketId};
use crate::deps::{CallContext, Clock, MethodCallManager, UserAuthN, UserAuthZ};
use crate::service_misc::{build_endpoints, handle_browse, handle_call};
use crate::service_read::handle_read;
use crate::service_write::handle_write;
use crate::session::{decrypt_user_token, SessionState};
use crate::session_mgr::SessionManager;
use crate::subscription::{PendingPublish, PublishOut, SubscriptionManager};

/// The four routing classes of inbound requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceClass {
    Discovery,
    SessionTreatment,
    SessionService,
    ServiceFault,
}

/// Classify a message by its service.
pub fn service_class(message: &Message) -> ServiceClass {
    match message {
        Message::GetEndpointsRequest(_) => ServiceClass::Discovery,
        Message::CreateSessionRequest(_)
        | Message::ActivateSessionRequest(_)
        | Message::CloseSessionRequest(_) => ServiceClass::SessionTreatment,
        Message::ReadRequest(_)
        | Message::WriteRequest(_)
        | Message::BrowseRequest(_)
        | Message::CallRequest(_)
        | Message::CreateSubscriptionRequest(_)
        | Message::CreateMonitoredItemsRequest(_)
        | Message::PublishRequest(_)
        | Message::RepublishRequest(_) => ServiceClass::SessionService,
        _ => ServiceClass::ServiceFault,
    }
}

/// Everything that can reach the dispatcher.
#[derive(Debug)]
pub enum DispatchEvent {
    /// A secure channel finished its handshake.
    ChannelOpened { sc_id: ScId, socket: SocketId },
    /// A secure channel died (socket loss, fatal check, CLO).
    ChannelLost { sc_id: ScId },
    /// A complete request message arrived on an open channel.
    Request {
        sc_id: ScId,
        request_id: u32,
        message: Message,
    },
    /// A request originated by the server's own application.
    LocalRequest { message: Message },
    /// Periodic timer: session timeouts, publishing intervals.
    Tick,
}

/// What the runtime must do after an event.
#[derive(Debug)]
pub enum DispatchAction {
    Respond {
        sc_id: ScId,
        request_id: u32,
        message: Message,
    },
    CloseChannel {
        sc_id: ScId,
        status: StatusCode,
    },
    LocalResponse {
        message: Message,
    },
}

pub struct Dispatcher {
    config: ServerConfig,
    channels: ChannelManager,
    sessions: SessionManager,
    subscriptions: SubscriptionManager,
    space: Box<dyn AddressSpace>,
    authn: Arc<dyn UserAuthN>,
    authz: Arc<dyn UserAuthZ>,
    methods: Arc<dyn MethodCallManager>,
    asym: Arc<dyn AsymmetricSecurity>,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ServerConfig,
        space: Box<dyn AddressSpace>,
        authn: Arc<dyn UserAuthN>,
        authz: Arc<dyn UserAuthZ>,
        methods: Arc<dyn MethodCallManager>,
        asym: Arc<dyn AsymmetricSecurity>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Dispatcher {
            channels: ChannelManager::new(config.max_channels as usize),
            sessions: SessionManager::new(&config),
            subscriptions: SubscriptionManager::new(&config),
            config,
            space,
            authn,
            authz,
            methods,
            asym,
            clock,
        }
    }

    pub fn address_space(&self) -> &dyn AddressSpace {
        self.space.as_ref()
    }

    /// The single event funnel.
    pub fn handle_event(&mut self, event: DispatchEvent) -> Vec<DispatchAction> {
        match event {
            DispatchEvent::ChannelOpened { sc_id, socket } => self.on_channel_opened(sc_id, socket),
            DispatchEvent::ChannelLost { sc_id } => self.on_channel_lost(sc_id),
            DispatchEvent::Request {
                sc_id,
                request_id,
                message,
            } => self.on_request(sc_id, request_id, message),
            DispatchEvent::LocalRequest { message } => self.on_local_request(message),
            DispatchEvent::Tick => self.on_tick(),
        }
    }

    // ── Channel lifecycle ────────────────────────────────────────────────────

    fn on_channel_opened(&mut self, sc_id: ScId, socket: SocketId) -> Vec<DispatchAction> {
        let now = self.clock.monotonic_now();
        let mut actions = Vec::new();
        match self
            .channels
            .admit(|id| self.sessions.channel_has_sessions(id))
        {
            Admission::Accept => {}
            Admission::EvictThenAccept(victim) => {
                tracing::info!(victim, "closing idle channel to admit a new connection");
                actions.extend(self.on_channel_lost(victim));
                actions.push(DispatchAction::CloseChannel {
                    sc_id: victim,
                    status: StatusCode::BAD_SECURE_CHANNEL_CLOSED,
                });
                self.channels.remove(victim);
            }
            Admission::Reject => {
                tracing::warn!(sc_id, "rejecting connection: channel table full");
                actions.push(DispatchAction::CloseChannel {
                    sc_id,
                    status: StatusCode::BAD_MAX_CONNECTIONS_REACHED,
                });
                return actions;
            }
        }
        self.channels.register(sc_id, socket, now);
        actions
    }

    fn on_channel_lost(&mut self, sc_id: ScId) -> Vec<DispatchAction> {
        if !self.channels.mark_lost(sc_id) {
            return Vec::new();
        }
        let orphaned = self.sessions.on_channel_lost(sc_id);
        for session in orphaned {
            tracing::debug!(session, "session awaiting re-activation");
        }
        self.subscriptions.on_channel_lost(sc_id);
        Vec::new()
    }

    // ── Requests ─────────────────────────────────────────────────────────────

    fn on_request(
        &mut self,
        sc_id: ScId,
        request_id: u32,
        message: Message,
    ) -> Vec<DispatchAction> {
        let now = self.clock.monotonic_now();
        self.channels.touch(sc_id, now);

        let Some(header) = message.request_header() else {
            // A response-typed message has no place on a server ingress
            tracing::warn!(sc_id, id = message.encoding_id(), "dropping non-request message");
            return Vec::new();
        };
        let handle = header.request_handle;

        match service_class(&message) {
            ServiceClass::Discovery => self.on_discovery(sc_id, request_id, message),
            ServiceClass::SessionTreatment => {
                self.on_session_treatment(sc_id, request_id, message)
            }
            ServiceClass::SessionService => self.on_session_service(sc_id, request_id, message),
            ServiceClass::ServiceFault => {
                vec![self.fault(sc_id, request_id, handle, StatusCode::BAD_SERVICE_UNSUPPORTED)]
            }
        }
    }

    fn on_discovery(
        &mut self,
        sc_id: ScId,
        request_id: u32,
        message: Message,
    ) -> Vec<DispatchAction> {
        match message {
            Message::GetEndpointsRequest(request) => {
                let response = GetEndpointsResponse {
                    response_header: self.good_header(request.request_header.request_handle),
                    endpoints: Some(build_endpoints(&self.config)),
                };
                vec![self.respond(sc_id, request_id, Message::GetEndpointsResponse(response))]
            }
            other => {
                let handle = other
                    .request_header()
                    .map(|h| h.request_handle)
                    .unwrap_or(0);
                vec![self.fault(sc_id, request_id, handle, StatusCode::BAD_SERVICE_UNSUPPORTED)]
            }
        }
    }

    // ── Session treatment ────────────────────────────────────────────────────

    fn on_session_treatment(
        &mut self,
        sc_id: ScId,
        request_id: u32,
        message: Message,
    ) -> Vec<DispatchAction> {
        match message {
            Message::CreateSessionRequest(request) => {
                let handle = request.request_header.request_handle;
                let now = self.clock.monotonic_now();
                let timeout_ms = self
                    .config
                    .clamp_session_timeout(request.requested_session_timeout);
                let created = self.sessions.create(
                    sc_id,
                    request.session_name.as_deref(),
                    Duration::from_millis(timeout_ms as u64),
                    now,
                );
                match created {
                    Ok(index) => {
                        let session = self.sessions.get(index).expect("just created");
                        let response = CreateSessionResponse {
                            response_header: self.good_header(handle),
                            session_id: session.session_id.clone(),
                            authentication_token: session.auth_token.clone(),
                            revised_session_timeout: timeout_ms,
                            server_nonce: Some(session.server_nonce.clone()),
                            server_certificate: self
                                .asym
                                .local_certificate()
                                .map(|c| c.to_vec()),
                            server_endpoints: Some(build_endpoints(&self.config)),
                            server_software_certificates: None,
                            server_signature: SignatureData::default(),
                            max_request_message_size: self.config.max_message_size,
                        };
                        vec![self.respond(
                            sc_id,
                            request_id,
                            Message::CreateSessionResponse(response),
                        )]
                    }
                    Err(status) => vec![self.fault(sc_id, request_id, handle, status)],
                }
            }
            Message::ActivateSessionRequest(request) => {
                self.on_activate_session(sc_id, request_id, request)
            }
            Message::CloseSessionRequest(request) => {
                let handle = request.request_header.request_handle;
                let token = &request.request_header.authentication_token;
                let Some(index) = self.sessions.resolve_token(token) else {
                    return vec![self.fault(
                        sc_id,
                        request_id,
                        handle,
                        StatusCode::BAD_SESSION_ID_INVALID,
                    )];
                };
                let session = self.sessions.get(index).expect("resolved");
                if session.is_active() && session.channel() != Some(sc_id) {
                    return vec![self.fault(
                        sc_id,
                        request_id,
                        handle,
                        StatusCode::BAD_SESSION_ID_INVALID,
                    )];
                }
                let mut actions = self.fail_parked_publishes(index);
                self.sessions.close(index);
                actions.push(self.respond(
                    sc_id,
                    request_id,
                    Message::CloseSessionResponse(CloseSessionResponse {
                        response_header: self.good_header(handle),
                    }),
                ));
                actions
            }
            other => {
                let handle = other
                    .request_header()
                    .map(|h| h.request_handle)
                    .unwrap_or(0);
                vec![self.fault(sc_id, request_id, handle, StatusCode::BAD_SERVICE_UNSUPPORTED)]
            }
        }
    }

    fn on_activate_session(
        &mut self,
        sc_id: ScId,
        request_id: u32,
        request: cairn_core::messages::ActivateSessionRequest,
    ) -> Vec<DispatchAction> {
        let handle = request.request_header.request_handle;
        let now = self.clock.monotonic_now();

        let token = &request.request_header.authentication_token;
        let Some(index) = self.sessions.resolve_token(token) else {
            return vec![self.fault(sc_id, request_id, handle, StatusCode::BAD_SESSION_ID_INVALID)];
        };

        // Decode and decrypt the identity token, then authenticate. Each
        // step happens exactly once per activation attempt.
        let identity = UserIdentityToken::from_extension(&request.user_identity_token);
        let validated = identity
            .and_then(|token| self.check_token_policy(&token).map(|()| token))
            .and_then(|token| {
                let nonce = self.sessions.get(index).expect("resolved").server_nonce.clone();
                decrypt_user_token(self.asym.as_ref(), &nonce, token)
            })
            .and_then(|token| self.authn.validate_token(&self.config.endpoint_url, &token));

        let session = self.sessions.get_mut(index).expect("resolved");
        let previous = match session.begin_activation() {
            Ok(previous) => previous,
            Err(status) => return vec![self.fault(sc_id, request_id, handle, status)],
        };
        match validated {
            Ok(user) => {
                let locales: Vec<String> = request
                    .locale_ids
                    .unwrap_or_default()
                    .into_iter()
                    .flatten()
                    .collect();
                session.activate(user, sc_id, locales, now);
                let server_nonce = self.sessions.rotate_nonce(index);
                let response = ActivateSessionResponse {
                    response_header: self.good_header(handle),
                    server_nonce: Some(server_nonce),
                    results: None,
                    diagnostic_infos: None,
                };
                vec![self.respond(sc_id, request_id, Message::ActivateSessionResponse(response))]
            }
            Err(status) => {
                session.fail_activation(previous);
                tracing::info!(session = index, %status, "activation rejected");
                vec![self.fault(sc_id, request_id, handle, status)]
            }
        }
    }

    /// The token's policy id must name one of the endpoint's configured
    /// user token policies, with a matching token kind.
    fn check_token_policy(&self, token: &UserIdentityToken) -> Result<(), StatusCode> {
        use cairn_core::config::UserTokenKind;
        let matches = self.config.user_token_policies.iter().any(|policy| {
            let kind_matches = matches!(
                (&policy.kind, token),
                (UserTokenKind::Anonymous, UserIdentityToken::Anonymous { .. })
                    | (UserTokenKind::UserName, UserIdentityToken::UserName { .. })
                    | (UserTokenKind::X509, UserIdentityToken::X509 { .. })
            );
            match token.policy_id() {
                // An omitted policy id matches any policy of the right kind
                None | Some("") => kind_matches,
                Some(id) => kind_matches && id == policy.policy_id,
            }
        });
        if matches {
            Ok(())
        } else {
            Err(StatusCode::BAD_IDENTITY_TOKEN_INVALID)
        }
    }

    // ── Session services ─────────────────────────────────────────────────────

    fn on_session_service(
        &mut self,
        sc_id: ScId,
        request_id: u32,
        message: Message,
    ) -> Vec<DispatchAction> {
        let header = message.request_header().expect("classified as request");
        let handle = header.request_handle;
        let token = header.authentication_token.clone();
        let now = self.clock.monotonic_now();

        // Session resolution and SC binding check
        let Some(index) = self.sessions.resolve_token(&token) else {
            return vec![self.fault(sc_id, request_id, handle, StatusCode::BAD_SESSION_ID_INVALID)];
        };
        let session = self.sessions.get_mut(index).expect("resolved");
        if session.channel() != Some(sc_id) {
            tracing::warn!(
                session = index,
                sc_id,
                "request for a session bound to another channel"
            );
            return vec![self.fault(sc_id, request_id, handle, StatusCode::BAD_SESSION_ID_INVALID)];
        }
        if !session.is_active() {
            return vec![self.fault(
                sc_id,
                request_id,
                handle,
                StatusCode::BAD_SESSION_NOT_ACTIVATED,
            )];
        }
        // Timeout probe on receipt
        if session.timed_out(now) {
            let mut actions = self.fail_parked_publishes(index);
            self.sessions.close(index);
            actions.push(self.fault(
                sc_id,
                request_id,
                handle,
                StatusCode::BAD_SESSION_ID_INVALID,
            ));
            return actions;
        }
        session.touch(now);

        let ctx = CallContext {
            channel: Some(sc_id),
            session: Some(index),
            user: session.user().cloned().unwrap_or_else(crate::deps::User::anonymous),
            locales: session.locale_ids.clone(),
            local: false,
        };
        self.run_service(sc_id, request_id, index, ctx, message)
    }

    fn run_service(
        &mut self,
        sc_id: ScId,
        request_id: u32,
        session: u32,
        ctx: CallContext,
        message: Message,
    ) -> Vec<DispatchAction> {
        let utc_now = self.clock.utc_now();
        let max_ops = self.config.max_operations_per_request as usize;
        match message {
            Message::ReadRequest(request) => {
                let handle = request.request_header.request_handle;
                let result = handle_read(
                    &ctx,
                    self.space.as_ref(),
                    self.authz.as_ref(),
                    request.nodes_to_read.as_deref().unwrap_or_default(),
                    request.timestamps_to_return,
                    max_ops,
                    utc_now,
                );
                match result {
                    Ok(results) => {
                        let response = ReadResponse {
                            response_header: self.good_header(handle),
                            results: Some(results),
                            diagnostic_infos: None,
                        };
                        vec![self.respond(sc_id, request_id, Message::ReadResponse(response))]
                    }
                    Err(status) => vec![self.fault(sc_id, request_id, handle, status)],
                }
            }
            Message::WriteRequest(request) => {
                let handle = request.request_header.request_handle;
                let result = handle_write(
                    &ctx,
                    self.space.as_mut(),
                    self.authz.as_ref(),
                    request.nodes_to_write.as_deref().unwrap_or_default(),
                    max_ops,
                    utc_now,
                );
                match result {
                    Ok((service_status, results, changes)) => {
                        for change in changes {
                            self.subscriptions.on_data_change(
                                &change.node,
                                change.attribute,
                                &change.value,
                            );
                        }
                        let response = WriteResponse {
                            response_header: ResponseHeader::for_request(
                                handle,
                                service_status,
                                utc_now,
                            ),
                            results: Some(results),
                            diagnostic_infos: None,
                        };
                        vec![self.respond(sc_id, request_id, Message::WriteResponse(response))]
                    }
                    Err(status) => vec![self.fault(sc_id, request_id, handle, status)],
                }
            }
            Message::BrowseRequest(request) => {
                let handle = request.request_header.request_handle;
                let result = handle_browse(
                    &ctx,
                    self.space.as_ref(),
                    self.authz.as_ref(),
                    &request.view.view_id,
                    request.requested_max_references_per_node,
                    request.nodes_to_browse.as_deref().unwrap_or_default(),
                    &self.config,
                );
                match result {
                    Ok(results) => {
                        let response = BrowseResponse {
                            response_header: self.good_header(handle),
                            results: Some(results),
                            diagnostic_infos: None,
                        };
                        vec![self.respond(sc_id, request_id, Message::BrowseResponse(response))]
                    }
                    Err(status) => vec![self.fault(sc_id, request_id, handle, status)],
                }
            }
            Message::CallRequest(request) => {
                let handle = request.request_header.request_handle;
                let result = handle_call(
                    &ctx,
                    self.space.as_ref(),
                    self.authz.as_ref(),
                    self.methods.as_ref(),
                    request.methods_to_call.as_deref().unwrap_or_default(),
                    max_ops,
                );
                match result {
                    Ok(results) => {
                        let response = CallResponse {
                            response_header: self.good_header(handle),
                            results: Some(results),
                            diagnostic_infos: None,
                        };
                        vec![self.respond(sc_id, request_id, Message::CallResponse(response))]
                    }
                    Err(status) => vec![self.fault(sc_id, request_id, handle, status)],
                }
            }
            Message::CreateSubscriptionRequest(request) => {
                let handle = request.request_header.request_handle;
                let now = self.clock.monotonic_now();
                match self.subscriptions.create(session, &request, now) {
                    Ok((id, interval, lifetime, keep_alive)) => {
                        let response = CreateSubscriptionResponse {
                            response_header: self.good_header(handle),
                            subscription_id: id,
                            revised_publishing_interval: interval.as_millis() as f64,
                            revised_lifetime_count: lifetime,
                            revised_max_keep_alive_count: keep_alive,
                        };
                        vec![self.respond(
                            sc_id,
                            request_id,
                            Message::CreateSubscriptionResponse(response),
                        )]
                    }
                    Err(status) => vec![self.fault(sc_id, request_id, handle, status)],
                }
            }
            Message::CreateMonitoredItemsRequest(request) => {
                let handle = request.request_header.request_handle;
                match self
                    .subscriptions
                    .create_monitored_items(session, &request, self.space.as_ref())
                {
                    Ok(results) => {
                        let response = CreateMonitoredItemsResponse {
                            response_header: self.good_header(handle),
                            results: Some(results),
                            diagnostic_infos: None,
                        };
                        vec![self.respond(
                            sc_id,
                            request_id,
                            Message::CreateMonitoredItemsResponse(response),
                        )]
                    }
                    Err(status) => vec![self.fault(sc_id, request_id, handle, status)],
                }
            }
            Message::PublishRequest(request) => {
                let handle = request.request_header.request_handle;
                let pending = PendingPublish {
                    sc_id,
                    request_id,
                    request_handle: handle,
                };
                let acks = request
                    .subscription_acknowledgements
                    .unwrap_or_default();
                match self
                    .subscriptions
                    .queue_publish(session, pending, &acks, utc_now)
                {
                    // Parked until a notification or keep-alive is due
                    Ok(None) => Vec::new(),
                    Ok(Some(out)) => vec![self.publish_response(out)],
                    Err(status) => vec![self.fault(sc_id, request_id, handle, status)],
                }
            }
            Message::RepublishRequest(request) => {
                let handle = request.request_header.request_handle;
                match self.subscriptions.republish(
                    session,
                    request.subscription_id,
                    request.retransmit_sequence_number,
                ) {
                    Ok(notification_message) => {
                        let response = RepublishResponse {
                            response_header: self.good_header(handle),
                            notification_message,
                        };
                        vec![self.respond(sc_id, request_id, Message::RepublishResponse(response))]
                    }
                    Err(status) => vec![self.fault(sc_id, request_id, handle, status)],
                }
            }
            other => {
                let handle = other
                    .request_header()
                    .map(|h| h.request_handle)
                    .unwrap_or(0);
                vec![self.fault(sc_id, request_id, handle, StatusCode::BAD_SERVICE_UNSUPPORTED)]
            }
        }
    }

    // ── Local service treatment ──────────────────────────────────────────────

    fn on_local_request(&mut self, message: Message) -> Vec<DispatchAction> {
        let ctx = CallContext::local_treatment();
        let utc_now = self.clock.utc_now();
        let max_ops = self.config.max_operations_per_request as usize;
        let response = match message {
            Message::ReadRequest(request) => {
                let handle = request.request_header.request_handle;
                match handle_read(
                    &ctx,
                    self.space.as_ref(),
                    self.authz.as_ref(),
                    request.nodes_to_read.as_deref().unwrap_or_default(),
                    request.timestamps_to_return,
                    max_ops,
                    utc_now,
                ) {
                    Ok(results) => Message::ReadResponse(ReadResponse {
                        response_header: self.good_header(handle),
                        results: Some(results),
                        diagnostic_infos: None,
                    }),
                    Err(status) => self.fault_message(handle, status),
                }
            }
            Message::WriteRequest(request) => {
                let handle = request.request_header.request_handle;
                match handle_write(
                    &ctx,
                    self.space.as_mut(),
                    self.authz.as_ref(),
                    request.nodes_to_write.as_deref().unwrap_or_default(),
                    max_ops,
                    utc_now,
                ) {
                    Ok((service_status, results, changes)) => {
                        // Local writes still notify subscriptions
                        for change in changes {
                            self.subscriptions.on_data_change(
                                &change.node,
                                change.attribute,
                                &change.value,
                            );
                        }
                        Message::WriteResponse(WriteResponse {
                            response_header: ResponseHeader::for_request(
                                handle,
                                service_status,
                                utc_now,
                            ),
                            results: Some(results),
                            diagnostic_infos: None,
                        })
                    }
                    Err(status) => self.fault_message(handle, status),
                }
            }
            other => {
                let handle = other
                    .request_header()
                    .map(|h| h.request_handle)
                    .unwrap_or(0);
                self.fault_message(handle, StatusCode::BAD_SERVICE_UNSUPPORTED)
            }
        };
        vec![DispatchAction::LocalResponse { message: response }]
    }

    // ── Timers ───────────────────────────────────────────────────────────────

    fn on_tick(&mut self) -> Vec<DispatchAction> {
        let now = self.clock.monotonic_now();
        let utc_now = self.clock.utc_now();
        let mut actions = Vec::new();

        for index in self.sessions.tick(now) {
            actions.extend(self.fail_parked_publishes(index));
        }
        for out in self.subscriptions.tick(now, utc_now) {
            actions.push(self.publish_response(out));
        }
        actions
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    /// Complete every parked Publish of a dying session with
    /// `BadSessionClosed`.
    fn fail_parked_publishes(&mut self, session: u32) -> Vec<DispatchAction> {
        self.subscriptions
            .on_session_closed(session)
            .into_iter()
            .map(|pending| {
                self.fault(
                    pending.sc_id,
                    pending.request_id,
                    pending.request_handle,
                    StatusCode::BAD_SESSION_CLOSED,
                )
            })
            .collect()
    }

    fn publish_response(&self, out: PublishOut) -> DispatchAction {
        let response = PublishResponse {
            response_header: self.good_header(out.pending.request_handle),
            subscription_id: out.subscription_id,
            available_sequence_numbers: Some(out.available_sequence_numbers),
            more_notifications: out.more_notifications,
            notification_message: out.message,
            results: out.ack_results,
            diagnostic_infos: None,
        };
        DispatchAction::Respond {
            sc_id: out.pending.sc_id,
            request_id: out.pending.request_id,
            message: Message::PublishResponse(response),
        }
    }

    fn good_header(&self, handle: u32) -> ResponseHeader {
        ResponseHeader::for_request(handle, StatusCode::GOOD, self.clock.utc_now())
    }

    fn fault_message(&self, handle: u32, status: StatusCode) -> Message {
        Message::ServiceFault(ServiceFault {
            response_header: ResponseHeader::for_request(handle, status, self.clock.utc_now()),
        })
    }

    fn fault(
        &self,
        sc_id: ScId,
        request_id: u32,
        handle: u32,
        status: StatusCode,
    ) -> DispatchAction {
        DispatchAction::Respond {
            sc_id,
            request_id,
            message: self.fault_message(handle, status),
        }
    }

    fn respond(&self, sc_id: ScId, request_id: u32, message: Message) -> DispatchAction {
        DispatchAction::Respond {
            sc_id,
            request_id,
            message,
        }
    }

    /// Session state introspection for the runtime and tests.
    pub fn session_state(&self, index: u32) -> Option<SessionState> {
        self.sessions.get(index).map(|s| s.state())
    }
}
