//! `MessageBus` (§4.4): pub/sub across agents over a durable inbox/outbox,
//! with acknowledgement and a searchable projection of message history.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use jetpack_store::mail::DeliveredMessage;
use jetpack_store::models::{Message, MessageType};
use jetpack_store::{MessageStore, StoreResult};

pub type Handler = Arc<dyn Fn(&Message) + Send + Sync>;

/// {ackRequired, acked, ackedAt?, ackedBy?} (§4.4 "Acknowledgement").
#[derive(Debug, Clone, PartialEq)]
pub struct AckStatus {
    pub ack_required: bool,
    pub acked: bool,
    pub acked_at: Option<chrono::DateTime<chrono::Utc>>,
    pub acked_by: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub types: Vec<MessageType>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub since: Option<chrono::DateTime<chrono::Utc>>,
    pub until: Option<chrono::DateTime<chrono::Utc>>,
    pub correlation_id: Option<String>,
}

pub struct MessageBus {
    store: MessageStore,
    handlers: HashMap<MessageType, Vec<Handler>>,
}

/// Shared, clonable handle so multiple harnesses and background tasks can
/// publish/poll/acknowledge concurrently; all mutation is serialized behind
/// one mutex, matching the DataStore ownership model in §3.
#[derive(Clone)]
pub struct SharedMessageBus(Arc<Mutex<MessageBus>>);

impl SharedMessageBus {
    pub fn new(store: MessageStore) -> Self {
        Self(Arc::new(Mutex::new(MessageBus { store, handlers: HashMap::new() })))
    }

    pub async fn subscribe(&self, message_type: MessageType, handler: Handler) {
        let mut bus = self.0.lock().await;
        bus.handlers.entry(message_type).or_default().push(handler);
    }

    pub async fn unsubscribe(&self, message_type: MessageType) {
        let mut bus = self.0.lock().await;
        bus.handlers.remove(&message_type);
    }

    pub fn new_message(
        from: &str,
        to: Option<&str>,
        message_type: MessageType,
        payload: serde_json::Value,
        correlation_id: Option<String>,
        ack_required: bool,
    ) -> Message {
        Message {
            id: format!("msg-{}", Uuid::new_v4()),
            message_type,
            from: from.to_string(),
            to: to.map(str::to_string),
            payload,
            timestamp: chrono::Utc::now(),
            correlation_id,
            ack_required: ack_required.then_some(true),
            acked_at: None,
            acked_by: None,
        }
    }

    pub async fn publish(&self, message: &Message) -> StoreResult<()> {
        let bus = self.0.lock().await;
        bus.store.publish(message)
    }

    pub async fn send_heartbeat(&self, agent_id: &str, status: &str) -> StoreResult<()> {
        let message = Self::new_message(
            agent_id,
            None,
            MessageType::Heartbeat,
            serde_json::json!({"timestamp": chrono::Utc::now(), "status": status}),
            None,
            false,
        );
        self.publish(&message).await
    }

    /// One polling tick for `agent_id`: deliver every pending message to
    /// matching handlers, in publication order, then archive/advance the
    /// cursor (§4.4 "Delivery contract"). Handler panics are not caught
    /// here -- handlers are expected to be infallible closures; errors a
    /// handler wants to surface go through its own side channel.
    pub async fn poll(&self, agent_id: &str) -> StoreResult<usize> {
        let mut bus = self.0.lock().await;
        let mut delivered: Vec<DeliveredMessage> = bus.store.receive(agent_id)?;
        delivered.sort_by(|a, b| a.message.timestamp.cmp(&b.message.timestamp));

        let mut count = 0;
        for item in &delivered {
            if let Some(handlers) = bus.handlers.get(&item.message.message_type) {
                for handler in handlers {
                    handler(&item.message);
                }
            }
            bus.store.complete_delivery(agent_id, item)?;
            count += 1;
        }
        Ok(count)
    }

    pub async fn acknowledge(&self, message_id: &str, agent_id: &str) -> StoreResult<bool> {
        let bus = self.0.lock().await;
        bus.store.acknowledge(message_id, agent_id)
    }

    pub async fn get_ack_status(&self, message_id: &str) -> StoreResult<Option<AckStatus>> {
        let bus = self.0.lock().await;
        Ok(bus.store.get(message_id)?.map(|m| AckStatus {
            ack_required: m.requires_ack(),
            acked: m.is_acked(),
            acked_at: m.acked_at,
            acked_by: m.acked_by,
        }))
    }

    pub async fn get_unacknowledged_messages(&self) -> StoreResult<Vec<Message>> {
        let bus = self.0.lock().await;
        bus.store.get_unacknowledged()
    }

    /// All messages with `correlationId == id` OR whose own id equals `id`
    /// (the originating message), ascending by timestamp (§4.4).
    pub async fn get_thread(&self, correlation_id: &str) -> StoreResult<Vec<Message>> {
        let bus = self.0.lock().await;
        let mut thread: Vec<Message> = bus
            .store
            .all_persisted()?
            .into_iter()
            .filter(|m| m.id == correlation_id || m.correlation_id.as_deref() == Some(correlation_id))
            .collect();
        thread.sort_by_key(|m| m.timestamp);
        Ok(thread)
    }

    /// Free-text phrase (substring over `payload_text`, case-insensitive)
    /// plus structural filters, paginated and sorted by timestamp
    /// descending.
    pub async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Message>> {
        let bus = self.0.lock().await;
        let query_lower = query.to_lowercase();
        let mut matches: Vec<Message> = bus
            .store
            .all_persisted()?
            .into_iter()
            .filter(|m| query.is_empty() || m.payload_text().to_lowercase().contains(&query_lower))
            .filter(|m| filters.types.is_empty() || filters.types.contains(&m.message_type))
            .filter(|m| filters.from.as_deref().is_none_or(|f| f == m.from))
            .filter(|m| filters.to.as_deref().is_none_or(|t| m.to.as_deref() == Some(t)))
            .filter(|m| filters.since.is_none_or(|s| m.timestamp >= s))
            .filter(|m| filters.until.is_none_or(|u| m.timestamp <= u))
            .filter(|m| {
                filters.correlation_id.as_deref().is_none_or(|c| m.correlation_id.as_deref() == Some(c))
            })
            .collect();
        matches.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(matches.into_iter().skip(offset).take(limit).collect())
    }

    pub async fn get_recent(&self, limit: usize) -> StoreResult<Vec<Message>> {
        self.search("", &SearchFilters::default(), limit, 0).await
    }

    pub async fn delete_older_than(&self, cutoff: chrono::DateTime<chrono::Utc>) -> StoreResult<usize> {
        let bus = self.0.lock().await;
        bus.store.delete_older_than(cutoff)
    }
}
