//! Redis pub/sub broker for multi-instance deployments.
//!
//! Envelopes are published as JSON on `<prefix>:<channel>`. Each
//! `subscribe` call runs one listener task holding a dedicated pub/sub
//! connection; if the connection drops the listener resubscribes with
//! backoff until the broker is shut down. Envelopes published while a
//! listener is reconnecting are lost, which is acceptable for presence and
//! progress traffic.

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::domain::realtime::{Channel, EventEnvelope};
use crate::domain::resilience::RetryPolicy;
use crate::ports::{BrokerError, EventHandler, EventPublisher, EventSubscriber};

/// Redis-backed broker.
pub struct RedisBroker {
    client: redis::Client,
    conn: MultiplexedConnection,
    prefix: String,
    reconnect: RetryPolicy,
    shutdown_tx: watch::Sender<bool>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl RedisBroker {
    /// Connects the publishing side. Listener connections are opened per
    /// `subscribe` call.
    pub async fn connect(
        client: redis::Client,
        prefix: impl Into<String>,
    ) -> Result<Self, BrokerError> {
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e: redis::RedisError| BrokerError::Unavailable(e.to_string()))?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            client,
            conn,
            prefix: prefix.into(),
            reconnect: RetryPolicy::new(
                u32::MAX,
                Duration::from_millis(500),
                Duration::from_secs(30),
                2.0,
            ),
            shutdown_tx,
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Redis channel name for a logical channel.
    pub fn channel_key(&self, channel: Channel) -> String {
        channel_key(&self.prefix, channel)
    }

    /// Stops every listener task.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for listener in listeners {
            let _ = listener.await;
        }
    }
}

impl std::fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroker")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

fn channel_key(prefix: &str, channel: Channel) -> String {
    format!("{}:{}", prefix, channel.as_str())
}

#[async_trait]
impl EventPublisher for RedisBroker {
    async fn publish(&self, envelope: EventEnvelope) -> Result<(), BrokerError> {
        let key = self.channel_key(envelope.channel);
        let payload = serde_json::to_string(&envelope)?;

        let mut conn = self.conn.clone();
        let receivers: i64 = conn
            .publish(&key, payload)
            .await
            .map_err(|e: redis::RedisError| BrokerError::Unavailable(e.to_string()))?;

        tracing::trace!(channel = %key, receivers, event_type = %envelope.event_type, "published");
        Ok(())
    }
}

#[async_trait]
impl EventSubscriber for RedisBroker {
    async fn subscribe(
        &self,
        channels: &[Channel],
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), BrokerError> {
        let keys: Vec<String> = channels.iter().map(|c| self.channel_key(*c)).collect();

        // Subscribe once up front so configuration errors surface to the caller.
        let pubsub = open_subscription(&self.client, &keys).await?;

        let listener = tokio::spawn(listen(
            self.client.clone(),
            keys,
            pubsub,
            handler,
            self.reconnect.clone(),
            self.shutdown_tx.subscribe(),
        ));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
        Ok(())
    }
}

async fn open_subscription(
    client: &redis::Client,
    keys: &[String],
) -> Result<redis::aio::PubSub, BrokerError> {
    let mut pubsub = client
        .get_async_connection()
        .await
        .map_err(|e: redis::RedisError| BrokerError::Unavailable(e.to_string()))?
        .into_pubsub();
    pubsub
        .subscribe(keys)
        .await
        .map_err(|e: redis::RedisError| BrokerError::Unavailable(e.to_string()))?;
    Ok(pubsub)
}

async fn listen(
    client: redis::Client,
    keys: Vec<String>,
    pubsub: redis::aio::PubSub,
    handler: Arc<dyn EventHandler>,
    reconnect: RetryPolicy,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut pubsub = Some(pubsub);
    let mut failures: u32 = 0;

    loop {
        let current = match pubsub.take() {
            Some(current) => current,
            None => match open_subscription(&client, &keys).await {
                Ok(current) => {
                    tracing::info!(handler = handler.name(), "broker subscription restored");
                    failures = 0;
                    current
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = reconnect.jittered_delay(failures);
                    tracing::warn!(
                        handler = handler.name(),
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "broker resubscribe failed"
                    );
                    tokio::select! {
                        _ = shutdown.changed() => return,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            },
        };

        let mut messages = current.into_on_message();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::debug!(handler = handler.name(), "broker listener stopping");
                        return;
                    }
                }
                message = messages.next() => {
                    let Some(message) = message else {
                        tracing::warn!(handler = handler.name(), "broker subscription dropped");
                        break;
                    };
                    dispatch(&handler, &message).await;
                }
            }
        }
    }
}

async fn dispatch(handler: &Arc<dyn EventHandler>, message: &redis::Msg) {
    let payload: String = match message.get_payload() {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(
                channel = message.get_channel_name(),
                error = %e,
                "unreadable broker message"
            );
            return;
        }
    };
    let envelope: EventEnvelope = match serde_json::from_str(&payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(channel = message.get_channel_name(), error = %e, "malformed envelope");
            return;
        }
    };

    let event_type = envelope.event_type.clone();
    if let Err(e) = handler.handle(envelope).await {
        tracing::warn!(
            handler = handler.name(),
            event_type = %event_type,
            error = %e,
            "envelope handler failed"
        );
    }
}
