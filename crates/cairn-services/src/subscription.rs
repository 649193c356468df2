//! Subscriptions and the publish queue.
//!
//! Delivery is pull-model: the client parks Publish requests, the server
//! answers them from each subscription's notification queue on its
//! publishing interval. A subscription that cannot publish keeps queueing
//! (bounded, dropping oldest), counts itself late, and dies with
//! `BadTimeout` when its lifetime counter runs out. Recently sent messages
//! stay in a fixed ring for Republish.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use cairn_core::channel::ScId;
use cairn_core::config::ServerConfig;
use cairn_core::messages::{
    CreateMonitoredItemsRequest, CreateSubscriptionRequest, DataChangeNotification,
    MonitoredItemCreateResult, MonitoredItemNotification, NotificationMessage,
    SubscriptionAcknowledgement,
};
use cairn_core::status::StatusCode;
use cairn_core::types::{AttributeId, DataValue, ExtensionObject, NodeId};

use crate::address_space::AddressSpace;

/// Smallest accepted keep-alive count.
const MIN_KEEP_ALIVE_COUNT: u32 = 1;
/// Lifetime must cover at least three keep-alive rounds (Part 4).
const LIFETIME_KEEP_ALIVE_FACTOR: u32 = 3;

// ── Monitored items ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MonitoredItem {
    pub id: u32,
    pub node: NodeId,
    pub attribute: AttributeId,
    pub client_handle: u32,
}

// ── One subscription ──────────────────────────────────────────────────────────

/// What a publishing-interval tick decided.
#[derive(Debug)]
pub enum TickAction {
    None,
    /// Send a real notification; consumes a sequence number.
    Notify(NotificationMessage),
    /// Send an empty keep-alive; no sequence number consumed.
    KeepAlive(NotificationMessage),
    /// The lifetime ran out; the subscription is closed.
    Close(StatusCode),
}

#[derive(Debug)]
pub struct Subscription {
    pub id: u32,
    pub session: u32,
    pub publishing_interval: Duration,
    pub max_keep_alive_count: u32,
    pub max_lifetime_count: u32,
    pub publishing_enabled: bool,

    keep_alive_counter: u32,
    lifetime_counter: u32,
    /// Sequence number of the last real notification; 0 before the first.
    last_sequence: u32,
    /// Interval ticks where a ready notification found no parked Publish.
    late_counter: u32,

    monitored_items: HashMap<u32, MonitoredItem>,
    next_item_id: u32,

    notification_queue: VecDeque<MonitoredItemNotification>,
    queue_capacity: usize,
    /// Set when the queue dropped its oldest entry on overflow.
    overflowed: bool,

    retransmission: VecDeque<NotificationMessage>,
    retransmission_capacity: usize,

    next_fire: Instant,
    closed: Option<StatusCode>,
}

impl Subscription {
    fn new(
        id: u32,
        session: u32,
        publishing_interval: Duration,
        max_keep_alive_count: u32,
        max_lifetime_count: u32,
        publishing_enabled: bool,
        queue_capacity: usize,
        retransmission_capacity: usize,
        now: Instant,
    ) -> Self {
        Subscription {
            id,
            session,
            publishing_interval,
            max_keep_alive_count,
            max_lifetime_count,
            publishing_enabled,
            keep_alive_counter: max_keep_alive_count,
            lifetime_counter: max_lifetime_count,
            last_sequence: 0,
            late_counter: 0,
            monitored_items: HashMap::new(),
            next_item_id: 1,
            notification_queue: VecDeque::new(),
            queue_capacity,
            overflowed: false,
            retransmission: VecDeque::new(),
            retransmission_capacity,
            next_fire: now + publishing_interval,
            closed: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    pub fn last_sequence(&self) -> u32 {
        self.last_sequence
    }

    pub fn late_counter(&self) -> u32 {
        self.late_counter
    }

    pub fn has_pending_notifications(&self) -> bool {
        !self.notification_queue.is_empty()
    }

    pub fn available_sequence_numbers(&self) -> Vec<u32> {
        self.retransmission
            .iter()
            .map(|m| m.sequence_number)
            .collect()
    }

    fn add_monitored_item(&mut self, node: NodeId, attribute: AttributeId, client_handle: u32) -> u32 {
        let id = self.next_item_id;
        self.next_item_id += 1;
        self.monitored_items.insert(
            id,
            MonitoredItem {
                id,
                node,
                attribute,
                client_handle,
            },
        );
        id
    }

    /// Queue a data change for every item watching `(node, attribute)`.
    fn on_data_change(&mut self, node: &NodeId, attribute: AttributeId, value: &DataValue) {
        if self.closed.is_some() {
            return;
        }
        let handles: Vec<u32> = self
            .monitored_items
            .values()
            .filter(|item| &item.node == node && item.attribute == attribute)
            .map(|item| item.client_handle)
            .collect();
        for client_handle in handles {
            if self.notification_queue.len() >= self.queue_capacity {
                self.notification_queue.pop_front();
                self.overflowed = true;
            }
            self.notification_queue.push_back(MonitoredItemNotification {
                client_handle,
                value: value.clone(),
            });
        }
    }

    /// Run one publishing-interval expiry.
    fn on_interval(&mut self, publish_available: bool, utc_now: i64) -> TickAction {
        if self.closed.is_some() {
            return TickAction::None;
        }
        if publish_available {
            self.lifetime_counter = self.max_lifetime_count;
            if self.publishing_enabled && !self.notification_queue.is_empty() {
                self.keep_alive_counter = self.max_keep_alive_count;
                self.late_counter = 0;
                return TickAction::Notify(self.build_notification(utc_now));
            }
            self.keep_alive_counter = self.keep_alive_counter.saturating_sub(1);
            if self.keep_alive_counter == 0 {
                self.keep_alive_counter = self.max_keep_alive_count;
                // Keep-alives repeat the last consumed number (1 before any)
                let sequence = self.last_sequence.max(1);
                return TickAction::KeepAlive(NotificationMessage::keep_alive(sequence, utc_now));
            }
            return TickAction::None;
        }

        // No Publish parked: back-pressure
        if !self.notification_queue.is_empty() {
            self.late_counter += 1;
        }
        self.lifetime_counter = self.lifetime_counter.saturating_sub(1);
        if self.lifetime_counter == 0 {
            self.closed = Some(StatusCode::BAD_TIMEOUT);
            tracing::info!(subscription = self.id, "subscription lifetime expired");
            return TickAction::Close(StatusCode::BAD_TIMEOUT);
        }
        TickAction::None
    }

    fn build_notification(&mut self, utc_now: i64) -> NotificationMessage {
        self.last_sequence += 1;
        let items: Vec<MonitoredItemNotification> = self.notification_queue.drain(..).collect();
        let data_change = DataChangeNotification {
            monitored_items: Some(items),
            diagnostic_infos: None,
        };
        let message = NotificationMessage {
            sequence_number: self.last_sequence,
            publish_time: utc_now,
            notification_data: Some(vec![data_change.to_extension()]),
        };
        if self.retransmission.len() >= self.retransmission_capacity {
            self.retransmission.pop_front();
        }
        self.retransmission.push_back(message.clone());
        self.overflowed = false;
        message
    }

    fn acknowledge(&mut self, sequence_number: u32) -> StatusCode {
        let before = self.retransmission.len();
        self.retransmission
            .retain(|m| m.sequence_number != sequence_number);
        if self.retransmission.len() < before {
            StatusCode::GOOD
        } else {
            StatusCode::BAD_SEQUENCE_NUMBER_UNKNOWN
        }
    }

    fn republish(&self, sequence_number: u32) -> Option<NotificationMessage> {
        self.retransmission
            .iter()
            .find(|m| m.sequence_number == sequence_number)
            .cloned()
    }
}

// ── Publish bookkeeping ───────────────────────────────────────────────────────

/// A parked client Publish request awaiting a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingPublish {
    pub sc_id: ScId,
    pub request_id: u32,
    pub request_handle: u32,
}

/// A publish response ready to go out.
#[derive(Debug, PartialEq)]
pub struct PublishOut {
    pub pending: PendingPublish,
    pub subscription_id: u32,
    pub message: NotificationMessage,
    pub more_notifications: bool,
    pub available_sequence_numbers: Vec<u32>,
    pub ack_results: Option<Vec<StatusCode>>,
}

// ── The manager ───────────────────────────────────────────────────────────────

pub struct SubscriptionManager {
    subscriptions: HashMap<u32, Subscription>,
    next_subscription_id: u32,
    /// Parked Publish requests per session, FIFO.
    pending_publish: HashMap<u32, VecDeque<PendingPublish>>,

    max_per_session: usize,
    max_publish_per_session: usize,
    queue_capacity: usize,
    retransmission_capacity: usize,
    min_publishing_interval: Duration,
}

impl SubscriptionManager {
    pub fn new(config: &ServerConfig) -> Self {
        SubscriptionManager {
            subscriptions: HashMap::new(),
            next_subscription_id: 1,
            pending_publish: HashMap::new(),
            max_per_session: config.max_subscriptions_per_session as usize,
            max_publish_per_session: config.max_publish_requests_per_session as usize,
            queue_capacity: config.max_notifications_queued as usize,
            retransmission_capacity: config.retransmission_queue_size as usize,
            min_publishing_interval: Duration::from_millis(config.min_publishing_interval_ms as u64),
        }
    }

    pub fn get(&self, id: u32) -> Option<&Subscription> {
        self.subscriptions.get(&id)
    }

    /// CreateSubscription: revise the parameters and install.
    pub fn create(
        &mut self,
        session: u32,
        request: &CreateSubscriptionRequest,
        now: Instant,
    ) -> Result<(u32, Duration, u32, u32), StatusCode> {
        let count = self
            .subscriptions
            .values()
            .filter(|s| s.session == session)
            .count();
        if count >= self.max_per_session {
            return Err(StatusCode::BAD_TOO_MANY_SUBSCRIPTIONS);
        }

        let requested = request.requested_publishing_interval;
        let interval = if requested.is_finite() && requested > 0.0 {
            Duration::from_millis(requested as u64).max(self.min_publishing_interval)
        } else {
            self.min_publishing_interval
        };
        let keep_alive = request
            .requested_max_keep_alive_count
            .max(MIN_KEEP_ALIVE_COUNT);
        let lifetime = request
            .requested_lifetime_count
            .max(keep_alive * LIFETIME_KEEP_ALIVE_FACTOR);

        let id = self.next_subscription_id;
        self.next_subscription_id += 1;
        self.subscriptions.insert(
            id,
            Subscription::new(
                id,
                session,
                interval,
                keep_alive,
                lifetime,
                request.publishing_enabled,
                self.queue_capacity,
                self.retransmission_capacity,
                now,
            ),
        );
        tracing::info!(subscription = id, session, ?interval, "subscription created");
        Ok((id, interval, lifetime, keep_alive))
    }

    /// CreateMonitoredItems: validate each item against the address space.
    pub fn create_monitored_items(
        &mut self,
        session: u32,
        request: &CreateMonitoredItemsRequest,
        space: &dyn AddressSpace,
    ) -> Result<Vec<MonitoredItemCreateResult>, StatusCode> {
        let subscription = self
            .subscriptions
            .get_mut(&request.subscription_id)
            .filter(|s| s.session == session)
            .ok_or(StatusCode::BAD_SUBSCRIPTION_ID_INVALID)?;

        let items = request.items_to_create.as_deref().unwrap_or_default();
        if items.is_empty() {
            return Err(StatusCode::BAD_NOTHING_TO_DO);
        }

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let node = &item.item_to_monitor.node_id;
            let attribute = AttributeId::from_u32(item.item_to_monitor.attribute_id);
            let result = match (space.node_class(node), attribute) {
                (None, _) => MonitoredItemCreateResult {
                    status_code: StatusCode::BAD_NODE_ID_UNKNOWN,
                    monitored_item_id: 0,
                    revised_sampling_interval: 0.0,
                    revised_queue_size: 0,
                    filter_result: ExtensionObject::null(),
                },
                (_, None) => MonitoredItemCreateResult {
                    status_code: StatusCode::BAD_ATTRIBUTE_ID_INVALID,
                    monitored_item_id: 0,
                    revised_sampling_interval: 0.0,
                    revised_queue_size: 0,
                    filter_result: ExtensionObject::null(),
                },
                (Some(_), Some(attribute)) => {
                    let id = subscription.add_monitored_item(
                        node.clone(),
                        attribute,
                        item.requested_parameters.client_handle,
                    );
                    MonitoredItemCreateResult {
                        status_code: StatusCode::GOOD,
                        monitored_item_id: id,
                        // Sampling rides the publishing interval
                        revised_sampling_interval: subscription
                            .publishing_interval
                            .as_millis() as f64,
                        revised_queue_size: item.requested_parameters.queue_size.max(1),
                        filter_result: ExtensionObject::null(),
                    }
                }
            };
            results.push(result);
        }
        Ok(results)
    }

    /// A Publish request arrived: apply acknowledgements, then either
    /// answer immediately from a subscription with queued notifications or
    /// park the request.
    pub fn queue_publish(
        &mut self,
        session: u32,
        pending: PendingPublish,
        acknowledgements: &[SubscriptionAcknowledgement],
        utc_now: i64,
    ) -> Result<Option<PublishOut>, StatusCode> {
        if !self.subscriptions.values().any(|s| s.session == session) {
            return Err(StatusCode::BAD_NO_SUBSCRIPTION);
        }
        let ack_results = if acknowledgements.is_empty() {
            None
        } else {
            Some(
                acknowledgements
                    .iter()
                    .map(|ack| match self.subscriptions.get_mut(&ack.subscription_id) {
                        Some(sub) if sub.session == session => {
                            sub.acknowledge(ack.sequence_number)
                        }
                        _ => StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
                    })
                    .collect(),
            )
        };

        // Serve a ready subscription right away
        let ready = self
            .subscriptions
            .values_mut()
            .find(|s| s.session == session && !s.is_closed() && s.has_pending_notifications()
                && s.publishing_enabled);
        if let Some(subscription) = ready {
            let message = subscription.build_notification(utc_now);
            return Ok(Some(PublishOut {
                pending,
                subscription_id: subscription.id,
                message,
                more_notifications: false,
                available_sequence_numbers: subscription.available_sequence_numbers(),
                ack_results,
            }));
        }

        let queue = self.pending_publish.entry(session).or_default();
        if queue.len() >= self.max_publish_per_session {
            return Err(StatusCode::BAD_TOO_MANY_PUBLISH_REQUESTS);
        }
        queue.push_back(pending);
        // Acknowledgement results ride the eventual response; per-request
        // results for a parked publish are folded into that response.
        Ok(None)
    }

    /// Republish from the retransmission ring.
    pub fn republish(
        &self,
        session: u32,
        subscription_id: u32,
        sequence_number: u32,
    ) -> Result<NotificationMessage, StatusCode> {
        let subscription = self
            .subscriptions
            .get(&subscription_id)
            .filter(|s| s.session == session)
            .ok_or(StatusCode::BAD_SUBSCRIPTION_ID_INVALID)?;
        subscription
            .republish(sequence_number)
            .ok_or(StatusCode::BAD_MESSAGE_NOT_AVAILABLE)
    }

    /// Route a data change into every watching subscription.
    pub fn on_data_change(&mut self, node: &NodeId, attribute: AttributeId, value: &DataValue) {
        for subscription in self.subscriptions.values_mut() {
            subscription.on_data_change(node, attribute, value);
        }
    }

    /// Advance publishing intervals. Returns responses to emit and closes
    /// expired subscriptions.
    pub fn tick(&mut self, now: Instant, utc_now: i64) -> Vec<PublishOut> {
        let mut out = Vec::new();
        let due: Vec<u32> = self
            .subscriptions
            .values()
            .filter(|s| !s.is_closed() && now >= s.next_fire)
            .map(|s| s.id)
            .collect();

        for id in due {
            let session = self.subscriptions[&id].session;
            let publish_available = self
                .pending_publish
                .get(&session)
                .is_some_and(|q| !q.is_empty());

            let subscription = self.subscriptions.get_mut(&id).expect("present");
            while now >= subscription.next_fire {
                subscription.next_fire += subscription.publishing_interval;
            }
            let action = subscription.on_interval(publish_available, utc_now);
            match action {
                TickAction::None => {}
                TickAction::Notify(message) | TickAction::KeepAlive(message) => {
                    let available = subscription.available_sequence_numbers();
                    let pending = self
                        .pending_publish
                        .get_mut(&session)
                        .and_then(|q| q.pop_front())
                        .expect("publish availability was checked");
                    out.push(PublishOut {
                        pending,
                        subscription_id: id,
                        message,
                        more_notifications: false,
                        available_sequence_numbers: available,
                        ack_results: None,
                    });
                }
                TickAction::Close(status) => {
                    tracing::info!(subscription = id, %status, "subscription closed");
                }
            }
        }
        self.subscriptions.retain(|_, s| !s.is_closed());
        out
    }

    /// Session closed: drop its subscriptions and hand back the parked
    /// Publish requests so the dispatcher can fail them.
    pub fn on_session_closed(&mut self, session: u32) -> Vec<PendingPublish> {
        self.subscriptions.retain(|_, s| s.session != session);
        self.pending_publish
            .remove(&session)
            .map(|q| q.into_iter().collect())
            .unwrap_or_default()
    }

    /// Channel lost: parked Publish requests on that channel can never be
    /// answered.
    pub fn on_channel_lost(&mut self, sc_id: ScId) {
        for queue in self.pending_publish.values_mut() {
            queue.retain(|p| p.sc_id != sc_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_space::MemoryAddressSpace;
    use cairn_core::messages::{MonitoredItemCreateRequest, MonitoringParameters, ReadValueId};
    use cairn_core::types::Variant;

    fn create_request(interval_ms: f64, keep_alive: u32, lifetime: u32) -> CreateSubscriptionRequest {
        CreateSubscriptionRequest {
            request_header: Default::default(),
            requested_publishing_interval: interval_ms,
            requested_lifetime_count: lifetime,
            requested_max_keep_alive_count: keep_alive,
            max_notifications_per_publish: 0,
            publishing_enabled: true,
            priority: 0,
        }
    }

    fn manager() -> SubscriptionManager {
        SubscriptionManager::new(&ServerConfig::default())
    }

    fn pending(handle: u32) -> PendingPublish {
        PendingPublish {
            sc_id: 1,
            request_id: handle,
            request_handle: handle,
        }
    }

    fn monitor_state(mgr: &mut SubscriptionManager, sub: u32, session: u32) {
        let space = MemoryAddressSpace::with_ns0();
        let request = CreateMonitoredItemsRequest {
            request_header: Default::default(),
            subscription_id: sub,
            timestamps_to_return: 3,
            items_to_create: Some(vec![MonitoredItemCreateRequest {
                item_to_monitor: ReadValueId::value_of(NodeId::numeric(0, 2259)),
                monitoring_mode: 2,
                requested_parameters: MonitoringParameters {
                    client_handle: 77,
                    sampling_interval: 0.0,
                    filter: ExtensionObject::null(),
                    queue_size: 10,
                    discard_oldest: true,
                },
            }]),
        };
        let results = mgr
            .create_monitored_items(session, &request, &space)
            .unwrap();
        assert_eq!(results[0].status_code, StatusCode::GOOD);
    }

    #[test]
    fn create_revises_lifetime_to_cover_keep_alive() {
        let now = Instant::now();
        let mut mgr = manager();
        let (_, interval, lifetime, keep_alive) = mgr
            .create(1, &create_request(100.0, 3, 1), now)
            .unwrap();
        assert_eq!(interval, Duration::from_millis(100));
        assert_eq!(keep_alive, 3);
        assert_eq!(lifetime, 9);
    }

    #[test]
    fn keep_alive_fires_after_counter_expiry() {
        let now = Instant::now();
        let mut mgr = manager();
        let (id, interval, _, _) = mgr.create(1, &create_request(100.0, 3, 30), now).unwrap();
        monitor_state(&mut mgr, id, 1);

        mgr.queue_publish(1, pending(1), &[], 0).unwrap();

        // Ticks 1 and 2: nothing; tick 3: exactly one keep-alive
        let mut t = now;
        let mut keep_alives = Vec::new();
        for _ in 0..3 {
            t += interval;
            keep_alives.extend(mgr.tick(t, 0));
        }
        assert_eq!(keep_alives.len(), 1);
        let ka = &keep_alives[0];
        assert_eq!(ka.subscription_id, id);
        // No real notification ever sent: keep-alive reports 1, consumes nothing
        assert_eq!(ka.message.sequence_number, 1);
        assert!(ka.message.notification_data.is_none());
        assert_eq!(mgr.get(id).unwrap().last_sequence(), 0);
    }

    #[test]
    fn data_change_is_delivered_and_sequence_increments() {
        let now = Instant::now();
        let mut mgr = manager();
        let (id, interval, _, _) = mgr.create(1, &create_request(100.0, 3, 30), now).unwrap();
        monitor_state(&mut mgr, id, 1);
        mgr.queue_publish(1, pending(1), &[], 0).unwrap();

        mgr.on_data_change(
            &NodeId::numeric(0, 2259),
            AttributeId::Value,
            &DataValue::new(Variant::Int32(2)),
        );
        let out = mgr.tick(now + interval, 5);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].message.sequence_number, 1);
        assert!(out[0].message.notification_data.is_some());
        assert_eq!(mgr.get(id).unwrap().last_sequence(), 1);

        // Second change, second publish, sequence 2
        mgr.queue_publish(1, pending(2), &[], 0).unwrap();
        mgr.on_data_change(
            &NodeId::numeric(0, 2259),
            AttributeId::Value,
            &DataValue::new(Variant::Int32(3)),
        );
        let out = mgr.tick(now + interval * 2, 6);
        assert_eq!(out[0].message.sequence_number, 2);
    }

    #[test]
    fn publish_answered_immediately_when_notifications_wait() {
        let now = Instant::now();
        let mut mgr = manager();
        let (id, _, _, _) = mgr.create(1, &create_request(100.0, 3, 30), now).unwrap();
        monitor_state(&mut mgr, id, 1);

        mgr.on_data_change(
            &NodeId::numeric(0, 2259),
            AttributeId::Value,
            &DataValue::new(Variant::Int32(9)),
        );
        let immediate = mgr.queue_publish(1, pending(1), &[], 0).unwrap();
        let out = immediate.expect("immediate response");
        assert_eq!(out.subscription_id, id);
        assert_eq!(out.message.sequence_number, 1);
    }

    #[test]
    fn republish_and_acknowledge() {
        let now = Instant::now();
        let mut mgr = manager();
        let (id, interval, _, _) = mgr.create(1, &create_request(100.0, 3, 30), now).unwrap();
        monitor_state(&mut mgr, id, 1);
        mgr.queue_publish(1, pending(1), &[], 0).unwrap();
        mgr.on_data_change(
            &NodeId::numeric(0, 2259),
            AttributeId::Value,
            &DataValue::new(Variant::Int32(1)),
        );
        mgr.tick(now + interval, 0);

        // The sent message is republishable until acknowledged
        let message = mgr.republish(1, id, 1).unwrap();
        assert_eq!(message.sequence_number, 1);
        assert_eq!(
            mgr.republish(1, id, 2),
            Err(StatusCode::BAD_MESSAGE_NOT_AVAILABLE)
        );

        mgr.queue_publish(
            1,
            pending(2),
            &[SubscriptionAcknowledgement {
                subscription_id: id,
                sequence_number: 1,
            }],
            0,
        )
        .unwrap();
        assert_eq!(
            mgr.republish(1, id, 1),
            Err(StatusCode::BAD_MESSAGE_NOT_AVAILABLE)
        );
    }

    #[test]
    fn lifetime_expiry_closes_with_bad_timeout() {
        let now = Instant::now();
        let mut mgr = manager();
        let (id, interval, lifetime, _) =
            mgr.create(1, &create_request(100.0, 1, 3), now).unwrap();
        monitor_state(&mut mgr, id, 1);

        // Never park a publish: the lifetime counter drains tick by tick
        let mut t = now;
        for _ in 0..lifetime {
            t += interval;
            mgr.tick(t, 0);
        }
        assert!(mgr.get(id).is_none());
    }

    #[test]
    fn queue_overflow_drops_oldest() {
        let now = Instant::now();
        let mut config = ServerConfig::default();
        config.max_notifications_queued = 2;
        let mut mgr = SubscriptionManager::new(&config);
        let (id, _, _, _) = mgr.create(1, &create_request(100.0, 3, 30), now).unwrap();
        monitor_state(&mut mgr, id, 1);

        for i in 0..4 {
            mgr.on_data_change(
                &NodeId::numeric(0, 2259),
                AttributeId::Value,
                &DataValue::new(Variant::Int32(i)),
            );
        }
        let sub = mgr.get(id).unwrap();
        assert!(sub.has_pending_notifications());
        assert_eq!(sub.notification_queue.len(), 2);
        assert!(sub.overflowed);
    }

    #[test]
    fn publish_without_subscription_is_rejected() {
        let mut mgr = manager();
        assert_eq!(
            mgr.queue_publish(1, pending(1), &[], 0),
            Err(StatusCode::BAD_NO_SUBSCRIPTION)
        );
    }

    #[test]
    fn session_close_returns_parked_publishes() {
        let now = Instant::now();
        let mut mgr = manager();
        let (id, _, _, _) = mgr.create(1, &create_request(100.0, 3, 30), now).unwrap();
        monitor_state(&mut mgr, id, 1);
        mgr.queue_publish(1, pending(1), &[], 0).unwrap();
        mgr.queue_publish(1, pending(2), &[], 0).unwrap();

        let parked = mgr.on_session_closed(1);
        assert_eq!(parked.len(), 2);
        assert!(mgr.get(id).is_none());
    }
}
