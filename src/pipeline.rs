//! The single dispatch loop between the transport and the router.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::network::TransportEvent;
use crate::router::{DispatchOutcome, MessageRouter};
use crate::subscription::SubscriptionManager;

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Connection lifecycle, after the subscription manager has seen it.
    Connection(TransportEvent),
    Dispatched(DispatchOutcome),
}

pub struct Pipeline {
    events: mpsc::Receiver<TransportEvent>,
    router: MessageRouter,
    subscriptions: Arc<Mutex<SubscriptionManager>>,
}

impl Pipeline {
    pub fn new(
        events: mpsc::Receiver<TransportEvent>,
        router: MessageRouter,
        subscriptions: Arc<Mutex<SubscriptionManager>>,
    ) -> Self {
        Self {
            events,
            router,
            subscriptions,
        }
    }

    /// Process the next transport event. `None` once the transport is gone.
    pub async fn next(&mut self) -> Option<PipelineEvent> {
        let event = self.events.recv().await?;
        Some(self.process(event))
    }

    /// Drive the loop until the transport stops, logging every event.
    pub async fn run(mut self) {
        while let Some(event) = self.next().await {
            match event {
                PipelineEvent::Connection(TransportEvent::Connected) => info!("Realtime link up"),
                PipelineEvent::Connection(TransportEvent::MaxReconnectAttempts { attempts }) => {
                    error!("Realtime link down after {} attempts", attempts)
                }
                PipelineEvent::Connection(other) => debug!("Transport event: {:?}", other),
                PipelineEvent::Dispatched(outcome) => trace!("Dispatch: {:?}", outcome),
            }
        }
        debug!("Pipeline stopped");
    }

    fn process(&mut self, event: TransportEvent) -> PipelineEvent {
        match event {
            TransportEvent::Frame(raw) => PipelineEvent::Dispatched(self.router.dispatch_text(&raw)),
            TransportEvent::Connected => {
                let mut subscriptions = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
                if let Err(e) = subscriptions.on_connected() {
                    warn!("Failed to re-subscribe: {}", e);
                }
                PipelineEvent::Connection(TransportEvent::Connected)
            }
            TransportEvent::Disconnected { .. } | TransportEvent::MaxReconnectAttempts { .. } => {
                self.subscriptions
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .on_disconnected();
                PipelineEvent::Connection(event)
            }
            other => PipelineEvent::Connection(other),
        }
    }
}
