use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::PulseError;
use crate::model::{Envelope, MessageKind};
use crate::network::{ConnectionStatus, Transport};
use crate::notification::NotificationSink;
use crate::pipeline::Pipeline;
use crate::reconcile::{ApplyOutcome, Consumer, MetricsBoard, OrderTracker, SampleTracker};
use crate::router::MessageRouter;
use crate::subscription::{SubscriptionManager, Topic};

type Shared<T> = Arc<RwLock<T>>;

/// Facade the dashboard talks to: transport, router, subscriptions and the
/// domain consumers, wired together.
pub struct RealtimeClient {
    transport: Transport,
    router: MessageRouter,
    subscriptions: Arc<Mutex<SubscriptionManager>>,

    samples: Shared<SampleTracker>,
    orders: Shared<OrderTracker>,
    metrics: Shared<MetricsBoard>,
    notifications: Shared<NotificationSink>,
    last_update: Shared<Option<DateTime<Utc>>>,

    // Wrapped in Option so a caller can take it and drive the loop itself
    pipeline: Option<Pipeline>,
    pipeline_task: Option<JoinHandle<()>>,
    transport_task: Option<JoinHandle<()>>,
}

impl RealtimeClient {
    /// Build every stage and start the transport actor. Does not connect.
    ///
    /// Must be called from within a tokio runtime.
    pub fn init(config: ClientConfig) -> Result<Self, PulseError> {
        let (transport, events, transport_task) = Transport::spawn(config.transport)?;

        let router = MessageRouter::new();
        let subscriptions = Arc::new(Mutex::new(SubscriptionManager::new(transport.clone())));
        let pipeline = Pipeline::new(events, router.clone(), subscriptions.clone());

        let last_update = Arc::new(RwLock::new(None));
        let samples = Arc::new(RwLock::new(SampleTracker::new(config.update_history)));
        let orders = Arc::new(RwLock::new(OrderTracker::new(config.update_history)));
        let metrics = Arc::new(RwLock::new(MetricsBoard::new(config.update_history)));
        let notifications = Arc::new(RwLock::new(NotificationSink::from_config(
            &config.notifications,
        )));

        attach(&router, &samples, &last_update);
        attach(&router, &orders, &last_update);
        attach(&router, &metrics, &last_update);
        attach(&router, &notifications, &last_update);

        Ok(Self {
            transport,
            router,
            subscriptions,
            samples,
            orders,
            metrics,
            notifications,
            last_update,
            pipeline: Some(pipeline),
            pipeline_task: None,
            transport_task: Some(transport_task),
        })
    }

    /// Take the dispatch loop to drive it manually with [`Pipeline::next`].
    pub fn pipeline(&mut self) -> Option<Pipeline> {
        self.pipeline.take()
    }

    /// Run the dispatch loop in the background. Returns `false` if the
    /// pipeline was already taken or spawned.
    pub fn spawn_pipeline(&mut self) -> bool {
        match self.pipeline.take() {
            Some(pipeline) => {
                self.pipeline_task = Some(tokio::spawn(pipeline.run()));
                true
            }
            None => false,
        }
    }

    /// Stop the transport and the dispatch loop.
    pub async fn teardown(mut self) -> Result<(), PulseError> {
        info!("Tearing down realtime client");
        // an undrained event channel would keep the actor from seeing Shutdown
        drop(self.pipeline.take());
        if let Err(e) = self.transport.shutdown() {
            debug!("Transport already stopped: {}", e);
        }
        if let Some(task) = self.transport_task.take() {
            if let Err(e) = task.await {
                warn!("Transport task ended abnormally: {}", e);
            }
        }
        // the loop ends by itself once the event channel closes
        if let Some(task) = self.pipeline_task.take() {
            if let Err(e) = task.await {
                warn!("Pipeline task ended abnormally: {}", e);
            }
        }
        Ok(())
    }

    pub fn connect(&self) -> Result<(), PulseError> {
        self.transport.connect()
    }

    pub fn disconnect(&self) -> Result<(), PulseError> {
        self.transport.disconnect()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn connection_error(&self) -> Option<String> {
        self.transport.connection_error()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.transport.status()
    }

    /// Receipt time of the last update any consumer accepted.
    pub fn last_update_time(&self) -> Option<DateTime<Utc>> {
        *read(&self.last_update)
    }

    pub fn subscribe(&self, topic: Topic) -> Result<usize, PulseError> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .subscribe(topic)
    }

    pub fn unsubscribe(&self, topic: &Topic) -> Result<usize, PulseError> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .unsubscribe(topic)
    }

    pub fn subscribe_to_sample(&self, sample_id: &str) -> Result<usize, PulseError> {
        self.subscribe(Topic::sample_tracking(sample_id))
    }

    pub fn unsubscribe_from_sample(&self, sample_id: &str) -> Result<usize, PulseError> {
        self.unsubscribe(&Topic::sample_tracking(sample_id))
    }

    pub fn subscribe_to_order(&self, order_id: &str) -> Result<usize, PulseError> {
        self.subscribe(Topic::order_tracking(order_id))
    }

    pub fn unsubscribe_from_order(&self, order_id: &str) -> Result<usize, PulseError> {
        self.unsubscribe(&Topic::order_tracking(order_id))
    }

    pub fn subscribe_to_order_line(&self, line_id: &str) -> Result<usize, PulseError> {
        self.subscribe(Topic::order_line(line_id))
    }

    pub fn unsubscribe_from_order_line(&self, line_id: &str) -> Result<usize, PulseError> {
        self.unsubscribe(&Topic::order_line(line_id))
    }

    pub fn subscribe_to_dashboard(&self) -> Result<usize, PulseError> {
        self.subscribe(Topic::dashboard_metrics())
    }

    pub fn unsubscribe_from_dashboard(&self) -> Result<usize, PulseError> {
        self.unsubscribe(&Topic::dashboard_metrics())
    }

    pub fn dismiss_notification(&self, id: &str) -> bool {
        write(&self.notifications).dismiss(id).is_some()
    }

    /// Mark locally, then tell the server. The local change is never rolled
    /// back.
    pub fn mark_notification_read(&self, id: &str) -> Result<bool, PulseError> {
        let changed = write(&self.notifications).mark_read(id);
        self.transport.send(Envelope::new(
            MessageKind::NotificationRead.as_str(),
            json!({ "id": id }),
        ))?;
        Ok(changed)
    }

    pub fn mark_all_notifications_read(&self) -> Result<usize, PulseError> {
        let changed = write(&self.notifications).mark_all_read();
        self.transport.send(Envelope::new(
            MessageKind::NotificationsReadAll.as_str(),
            Value::Null,
        ))?;
        Ok(changed)
    }

    /// Forward the action of a known insight. Returns `false` for unknown ids.
    pub fn execute_insight_action(&self, insight_id: &str) -> Result<bool, PulseError> {
        let action_url = {
            let metrics = read(&self.metrics);
            match metrics.insight(insight_id) {
                Some(insight) => insight.action_url.clone(),
                None => {
                    debug!("No insight {} to act on", insight_id);
                    return Ok(false);
                }
            }
        };

        let mut data = json!({ "insight_id": insight_id });
        if let Some(url) = action_url {
            data["action_url"] = Value::String(url);
        }
        self.transport
            .send(Envelope::new(MessageKind::InsightAction.as_str(), data))?;
        Ok(true)
    }

    /// Ask the server to push fresh metrics. Dropped while offline, since
    /// the dashboard topic is re-subscribed on every connect anyway.
    pub fn refresh_metrics(&self) -> Result<(), PulseError> {
        self.transport.send_ephemeral(Envelope::new(
            MessageKind::MetricsRefresh.as_str(),
            Value::Null,
        ))
    }

    pub fn with_samples<R>(&self, f: impl FnOnce(&SampleTracker) -> R) -> R {
        f(&*read(&self.samples))
    }

    pub fn with_orders<R>(&self, f: impl FnOnce(&OrderTracker) -> R) -> R {
        f(&*read(&self.orders))
    }

    pub fn with_metrics<R>(&self, f: impl FnOnce(&MetricsBoard) -> R) -> R {
        f(&*read(&self.metrics))
    }

    pub fn with_notifications<R>(&self, f: impl FnOnce(&NotificationSink) -> R) -> R {
        f(&*read(&self.notifications))
    }

    /// Extra listeners, e.g. for UI toasts.
    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }
}

// Register a consumer for its message kinds and stamp accepted updates.
fn attach<C>(router: &MessageRouter, consumer: &Shared<C>, last_update: &Shared<Option<DateTime<Utc>>>)
where
    C: Consumer + Send + Sync + 'static,
{
    let kinds = read(consumer).kinds();
    let consumer = consumer.clone();
    let last_update = last_update.clone();

    router.on_many(&kinds, move |inbound| {
        let outcomes = write(&consumer).handle(inbound);
        if outcomes.iter().any(ApplyOutcome::is_change) {
            *write(&last_update) = Some(Utc::now());
        }
    });
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::model::sample::SampleStatus;
    use crate::test_support::start_server;
    use std::time::Duration;

    async fn eventually<F: Fn() -> bool>(check: F) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !check() {
            assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_sample_tracking_scenario() {
        let mut server = start_server().await;
        let config = ClientConfig::default().with_transport(TransportConfig::fast_retry(&server.url));
        let mut client = RealtimeClient::init(config).unwrap();
        assert!(client.spawn_pipeline());
        assert!(!client.spawn_pipeline());

        client.connect().unwrap();
        let mut conn = server.accept().await;
        client.subscribe_to_sample("123").unwrap();

        let subscribe = conn.next_envelope().await;
        assert_eq!(subscribe.kind, "subscribe");
        assert_eq!(subscribe.data["sample_id"], "123");

        conn.send_json(json!({
            "type": "sample_update",
            "data": {"id": "123", "status": "in_transit", "timestamp": "2024-06-01T10:00:00Z"}
        }));
        eventually(|| {
            client.with_samples(|s| s.get("123").and_then(|x| x.status)) == Some(SampleStatus::InTransit)
        })
        .await;

        conn.send_json(json!({
            "type": "sample_update",
            "data": {"id": "123", "status": "delivered", "timestamp": "2024-06-01T12:00:00Z"}
        }));
        eventually(|| {
            client.with_samples(|s| s.get("123").and_then(|x| x.status)) == Some(SampleStatus::Delivered)
        })
        .await;

        assert!(client.is_connected());
        assert!(client.last_update_time().is_some());
        client.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_read_markers_forwarded_upstream() {
        let mut server = start_server().await;
        let config = ClientConfig::default().with_transport(TransportConfig::fast_retry(&server.url));
        let mut client = RealtimeClient::init(config).unwrap();
        client.spawn_pipeline();
        client.connect().unwrap();
        let mut conn = server.accept().await;

        conn.send_json(json!({
            "type": "notification",
            "id": "n-1",
            "data": {"type": "info", "title": "Welcome"}
        }));
        eventually(|| client.with_notifications(|n| n.len()) == 1).await;

        assert!(client.mark_notification_read("n-1").unwrap());
        let forwarded = conn.next_envelope().await;
        assert_eq!(forwarded.kind, "notification_read");
        assert_eq!(forwarded.data["id"], "n-1");
        assert_eq!(client.with_notifications(|n| n.unread_count()), 0);

        client.mark_all_notifications_read().unwrap();
        assert_eq!(conn.next_envelope().await.kind, "notifications_read_all");

        assert!(client.dismiss_notification("n-1"));
        client.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_insight_action_requires_known_insight() {
        let mut server = start_server().await;
        let config = ClientConfig::default().with_transport(TransportConfig::fast_retry(&server.url));
        let mut client = RealtimeClient::init(config).unwrap();
        client.spawn_pipeline();
        client.connect().unwrap();
        let mut conn = server.accept().await;

        assert!(!client.execute_insight_action("i-1").unwrap());

        conn.send_json(json!({
            "type": "ai_insight_update",
            "data": {"id": "i-1", "title": "Reorder SKU-4", "priority": "high",
                     "action_url": "/inventory/SKU-4"}
        }));
        eventually(|| client.with_metrics(|m| m.insight("i-1").is_some())).await;

        assert!(client.execute_insight_action("i-1").unwrap());
        let action = conn.next_envelope().await;
        assert_eq!(action.kind, "insight_action");
        assert_eq!(action.data["insight_id"], "i-1");
        assert_eq!(action.data["action_url"], "/inventory/SKU-4");

        client.refresh_metrics().unwrap();
        assert_eq!(conn.next_envelope().await.kind, "metrics_refresh");
        client.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_calls_after_teardown_fail_cleanly() {
        let server = start_server().await;
        let config = ClientConfig::default().with_transport(TransportConfig::fast_retry(&server.url));
        let client = RealtimeClient::init(config).unwrap();
        let transport = client.transport().clone();

        client.teardown().await.unwrap();
        assert!(matches!(transport.connect(), Err(PulseError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_teardown_with_full_event_channel() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut transport = TransportConfig::fast_retry(&format!("ws://{}", addr));
        transport.event_channel_capacity = 1;
        transport.reconnect_interval = Duration::from_millis(5);
        let client = RealtimeClient::init(ClientConfig::default().with_transport(transport)).unwrap();

        // pipeline never spawned: failed connects fill the channel
        client.connect().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        tokio::time::timeout(Duration::from_secs(5), client.teardown())
            .await
            .expect("teardown hung")
            .unwrap();
    }
}
