pub mod client;
pub mod config;
mod error;
pub mod model;
pub mod network;
pub mod notification;
pub mod pipeline;
pub mod reconcile;
pub mod router;
pub mod subscription;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::RealtimeClient;
pub use config::{ClientConfig, NotificationConfig, TransportConfig};
pub use error::PulseError;
pub use model::{Envelope, MessageKind, Notification, NotificationLevel, RealtimeMessage};
pub use network::{ConnectionState, ConnectionStatus, Transport, TransportEvent};
pub use notification::NotificationSink;
pub use pipeline::{Pipeline, PipelineEvent};
pub use reconcile::{ApplyOutcome, EntityPhase, MetricsBoard, OrderTracker, SampleTracker};
pub use router::{DispatchOutcome, Inbound, ListenerId, MessageRouter};
pub use subscription::{SubscriptionManager, Topic};
