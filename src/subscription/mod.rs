//! Reference-counted topic subscriptions that survive reconnects.
//!
//! The manager counts calls, it does not track callers: two `subscribe` calls
//! for the same topic need two `unsubscribe` calls before the server is told.
//! Frames go out as ephemeral traffic and only while the manager has caught up
//! with the transport: when a newer connection is open but its `Connected`
//! event has not been handled yet, that event re-issues the topic instead.
//! Every reconnect re-issues the full active set once.

pub mod topic;

pub use topic::Topic;

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, info};

use crate::error::PulseError;
use crate::model::{Envelope, MessageKind};
use crate::network::Transport;

struct Subscription {
    topic: Topic,
    count: usize,
}

pub struct SubscriptionManager {
    transport: Transport,
    active: BTreeMap<String, Subscription>,
    online: bool,
    // connection epoch whose `Connected` event was last handled
    epoch: u64,
}

impl SubscriptionManager {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            active: BTreeMap::new(),
            online: false,
            epoch: 0,
        }
    }

    /// Returns the new reference count.
    pub fn subscribe(&mut self, topic: Topic) -> Result<usize, PulseError> {
        let entry = self
            .active
            .entry(topic.key().to_string())
            .or_insert_with(|| Subscription { topic, count: 0 });
        entry.count += 1;
        let count = entry.count;

        if count == 1 {
            debug!("First subscriber for {}", entry.topic);
            if self.online && self.transport.status().epoch == self.epoch {
                let frame = frame(MessageKind::Subscribe, &entry.topic.frame_data());
                self.transport.send_ephemeral(frame)?;
            }
        }
        Ok(count)
    }

    /// Returns the remaining reference count. Unknown topics are a no-op.
    pub fn unsubscribe(&mut self, topic: &Topic) -> Result<usize, PulseError> {
        let Some(entry) = self.active.get_mut(topic.key()) else {
            return Ok(0);
        };
        entry.count = entry.count.saturating_sub(1);
        if entry.count > 0 {
            return Ok(entry.count);
        }

        if let Some(entry) = self.active.remove(topic.key()) {
            debug!("Last subscriber released {}", entry.topic);
            if self.in_sync() {
                let frame = frame(MessageKind::Unsubscribe, &entry.topic.frame_data());
                self.transport.send_ephemeral(frame)?;
            }
        }
        Ok(0)
    }

    /// Re-issue every active topic. Returns how many frames were sent.
    pub fn on_connected(&mut self) -> Result<usize, PulseError> {
        self.online = true;
        self.epoch += 1;
        for entry in self.active.values() {
            let frame = frame(MessageKind::Subscribe, &entry.topic.frame_data());
            self.transport.send_ephemeral(frame)?;
        }
        if !self.active.is_empty() {
            info!("Re-subscribed {} topics", self.active.len());
        }
        Ok(self.active.len())
    }

    pub fn on_disconnected(&mut self) {
        self.online = false;
    }

    pub fn ref_count(&self, topic: &Topic) -> usize {
        self.active.get(topic.key()).map(|e| e.count).unwrap_or(0)
    }

    pub fn active_topics(&self) -> Vec<Topic> {
        self.active.values().map(|e| e.topic.clone()).collect()
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    fn in_sync(&self) -> bool {
        self.online && self.transport.status().epoch == self.epoch
    }
}

fn frame(kind: MessageKind, data: &Value) -> Envelope {
    Envelope::new(kind.as_str(), data.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::connection::{Delivery, TransportCommand};
    use crate::network::{ConnectionState, ConnectionStatus};
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::sync::watch;

    // the actor opening a new connection
    fn open_link(status: &watch::Sender<ConnectionStatus>) {
        status.send_modify(|s| {
            s.state = ConnectionState::Open;
            s.epoch += 1;
        });
    }

    fn go_online(manager: &mut SubscriptionManager, status: &watch::Sender<ConnectionStatus>) {
        open_link(status);
        manager.on_connected().unwrap();
    }

    fn sent(commands: &mut UnboundedReceiver<TransportCommand>) -> Vec<(String, Value)> {
        let mut out = Vec::new();
        while let Ok(cmd) = commands.try_recv() {
            if let TransportCommand::Send { envelope, delivery } = cmd {
                assert_eq!(delivery, Delivery::Ephemeral);
                out.push((envelope.kind, envelope.data));
            }
        }
        out
    }

    #[test]
    fn test_first_and_last_subscriber_send_frames() {
        let (transport, mut commands, status) = Transport::detached();
        let mut manager = SubscriptionManager::new(transport);
        go_online(&mut manager, &status);

        let topic = Topic::sample_tracking("123");
        assert_eq!(manager.subscribe(topic.clone()).unwrap(), 1);
        assert_eq!(manager.subscribe(topic.clone()).unwrap(), 2);
        assert_eq!(sent(&mut commands).len(), 1);

        assert_eq!(manager.unsubscribe(&topic).unwrap(), 1);
        assert!(sent(&mut commands).is_empty());

        assert_eq!(manager.unsubscribe(&topic).unwrap(), 0);
        let frames = sent(&mut commands);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, "unsubscribe");
        assert_eq!(frames[0].1["sample_id"], "123");
        assert_eq!(manager.ref_count(&topic), 0);
    }

    #[test]
    fn test_offline_only_counts() {
        let (transport, mut commands, status) = Transport::detached();
        let mut manager = SubscriptionManager::new(transport);

        manager.subscribe(Topic::dashboard_metrics()).unwrap();
        manager.subscribe(Topic::order_tracking("o-1")).unwrap();
        manager.unsubscribe(&Topic::order_tracking("o-1")).unwrap();
        assert!(sent(&mut commands).is_empty());

        open_link(&status);
        assert_eq!(manager.on_connected().unwrap(), 1);
        let frames = sent(&mut commands);
        assert_eq!(frames, vec![("subscribe".to_string(), Topic::dashboard_metrics().frame_data())]);
    }

    #[test]
    fn test_each_reconnect_resubscribes_once() {
        let (transport, mut commands, status) = Transport::detached();
        let mut manager = SubscriptionManager::new(transport);
        go_online(&mut manager, &status);

        let a = Topic::sample_tracking("1");
        let b = Topic::order_line("7");
        manager.subscribe(a.clone()).unwrap();
        manager.subscribe(a.clone()).unwrap();
        manager.subscribe(b.clone()).unwrap();
        sent(&mut commands);

        manager.on_disconnected();
        go_online(&mut manager, &status);

        let mut keys: Vec<String> = sent(&mut commands)
            .into_iter()
            .map(|(kind, data)| {
                assert_eq!(kind, "subscribe");
                data["channel"].as_str().unwrap().to_string()
            })
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["order_line", "sample_tracking"]);
    }

    #[test]
    fn test_unknown_unsubscribe_is_noop() {
        let (transport, mut commands, status) = Transport::detached();
        let mut manager = SubscriptionManager::new(transport);
        go_online(&mut manager, &status);

        assert_eq!(manager.unsubscribe(&Topic::order_line("x")).unwrap(), 0);
        assert!(sent(&mut commands).is_empty());
    }

    #[test]
    fn test_subscribe_during_unhandled_reconnect_is_sent_once() {
        let (transport, mut commands, status) = Transport::detached();
        let mut manager = SubscriptionManager::new(transport);
        go_online(&mut manager, &status);

        // the link dropped and came back; neither event has been handled yet
        open_link(&status);
        let topic = Topic::sample_tracking("42");
        manager.subscribe(topic.clone()).unwrap();
        assert!(sent(&mut commands).is_empty());

        manager.on_disconnected();
        manager.on_connected().unwrap();
        assert_eq!(
            sent(&mut commands),
            vec![("subscribe".to_string(), topic.frame_data())]
        );

        // caught up again, so new topics go out directly
        manager.subscribe(Topic::dashboard_metrics()).unwrap();
        assert_eq!(sent(&mut commands).len(), 1);
    }
}
