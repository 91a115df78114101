//! Wire and domain types shared by every stage of the pipeline.

pub mod envelope;
pub mod message;
pub mod metric;
pub mod notification;
pub mod order;
pub mod sample;
pub mod update;

pub use envelope::Envelope;
pub use message::{MessageKind, RealtimeMessage};
pub use notification::{Notification, NotificationLevel};
pub use update::{DomainUpdate, UpdateMode};
