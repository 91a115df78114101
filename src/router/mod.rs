//! Decodes inbound frames and fans them out to per-type listeners.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use tracing::{trace, warn};

use crate::model::{Envelope, MessageKind, RealtimeMessage};

pub type Handler = Arc<dyn Fn(&Inbound) + Send + Sync>;

/// Registration handle returned by [`MessageRouter::on`].
///
/// Ids increase monotonically, so ordering by id is registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// A decoded frame as seen by listeners.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub envelope: Envelope,
    pub message: RealtimeMessage,
}

impl Inbound {
    pub fn kind(&self) -> MessageKind {
        MessageKind::from_type(&self.envelope.kind)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Delivered { kind: MessageKind, listeners: usize },
    /// Decoded fine but nobody was listening.
    Unhandled(MessageKind),
    Malformed(String),
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: HashMap<MessageKind, BTreeMap<ListenerId, Handler>>,
}

#[derive(Clone, Default)]
pub struct MessageRouter {
    registry: Arc<RwLock<Registry>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, kind: MessageKind, handler: F) -> ListenerId
    where
        F: Fn(&Inbound) + Send + Sync + 'static,
    {
        self.register(kind, Arc::new(handler))
    }

    /// Register one callback for several types. Returns one id per type.
    pub fn on_many<F>(&self, kinds: &[MessageKind], handler: F) -> Vec<(MessageKind, ListenerId)>
    where
        F: Fn(&Inbound) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        kinds
            .iter()
            .map(|kind| (kind.clone(), self.register(kind.clone(), handler.clone())))
            .collect()
    }

    /// Remove a listener. Takes effect from the next dispatch.
    pub fn off(&self, kind: &MessageKind, id: ListenerId) -> bool {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        let Some(handlers) = registry.listeners.get_mut(kind) else {
            return false;
        };
        let removed = handlers.remove(&id).is_some();
        if handlers.is_empty() {
            registry.listeners.remove(kind);
        }
        removed
    }

    pub fn listener_count(&self, kind: &MessageKind) -> usize {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        registry.listeners.get(kind).map(BTreeMap::len).unwrap_or(0)
    }

    /// Parse and dispatch one raw text frame.
    pub fn dispatch_text(&self, raw: &str) -> DispatchOutcome {
        match Envelope::parse(raw) {
            Ok(envelope) => self.dispatch(envelope),
            Err(e) => {
                warn!("Dropping malformed frame: {}", e);
                DispatchOutcome::Malformed(e.to_string())
            }
        }
    }

    pub fn dispatch(&self, envelope: Envelope) -> DispatchOutcome {
        let kind = MessageKind::from_type(&envelope.kind);

        let message = match RealtimeMessage::decode(&envelope) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping '{}' frame: {}", kind, e);
                return DispatchOutcome::Malformed(e.to_string());
            }
        };

        let handlers = self.snapshot(&kind);
        if handlers.is_empty() {
            trace!("No listeners for '{}'", kind);
            return DispatchOutcome::Unhandled(kind);
        }

        let inbound = Inbound { envelope, message };
        for handler in &handlers {
            handler(&inbound);
        }

        DispatchOutcome::Delivered {
            kind,
            listeners: handlers.len(),
        }
    }

    fn register(&self, kind: MessageKind, handler: Handler) -> ListenerId {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        registry.next_id += 1;
        let id = ListenerId(registry.next_id);
        registry
            .listeners
            .entry(kind)
            .or_default()
            .insert(id, handler);
        id
    }

    // Copy the handlers out so listeners may call on/off while running.
    fn snapshot(&self, kind: &MessageKind) -> Vec<Handler> {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        let mut handlers: Vec<Handler> = registry
            .listeners
            .get(kind)
            .map(|h| h.values().cloned().collect())
            .unwrap_or_default();

        if kind.is_unknown() {
            if let Some(catch_all) = registry.listeners.get(&MessageKind::Message) {
                handlers.extend(catch_all.values().cloned());
            }
        }
        handlers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let router = MessageRouter::new();
        let seen = recorder();

        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            router.on(MessageKind::Pong, move |_| seen.lock().unwrap().push(tag.to_string()));
        }

        let outcome = router.dispatch_text(r#"{"type":"pong"}"#);
        assert_eq!(
            outcome,
            DispatchOutcome::Delivered {
                kind: MessageKind::Pong,
                listeners: 3
            }
        );
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_off_removes_listener() {
        let router = MessageRouter::new();
        let seen = recorder();
        let s = seen.clone();
        let id = router.on(MessageKind::Pong, move |_| s.lock().unwrap().push("hit".into()));

        assert!(router.off(&MessageKind::Pong, id));
        assert!(!router.off(&MessageKind::Pong, id));
        assert_eq!(
            router.dispatch_text(r#"{"type":"pong"}"#),
            DispatchOutcome::Unhandled(MessageKind::Pong)
        );
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_off_inside_handler_affects_next_dispatch_only() {
        let router = MessageRouter::new();
        let seen = recorder();

        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
        let (r, s, sl) = (router.clone(), seen.clone(), slot.clone());
        let first = router.on(MessageKind::Pong, move |_| {
            s.lock().unwrap().push("first".into());
            if let Some(id) = *sl.lock().unwrap() {
                r.off(&MessageKind::Pong, id);
            }
        });
        let s = seen.clone();
        let second = router.on(MessageKind::Pong, move |_| s.lock().unwrap().push("second".into()));
        assert!(first < second);
        *slot.lock().unwrap() = Some(second);

        // the snapshot taken before dispatch still includes `second`
        router.dispatch_text(r#"{"type":"pong"}"#);
        router.dispatch_text(r#"{"type":"pong"}"#);

        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "first"]);
    }

    #[test]
    fn test_unknown_types_reach_catch_all() {
        let router = MessageRouter::new();
        let seen = recorder();
        let s = seen.clone();
        router.on(MessageKind::Message, move |inbound| {
            s.lock().unwrap().push(inbound.envelope.kind.clone())
        });

        router.dispatch_text(r#"{"type":"inventory_update","data":{"sku":"A"}}"#);
        // known types do not go to the catch-all
        router.dispatch_text(r#"{"type":"pong"}"#);

        assert_eq!(*seen.lock().unwrap(), vec!["inventory_update"]);
    }

    #[test]
    fn test_malformed_frames_never_reach_handlers() {
        let router = MessageRouter::new();
        let seen = recorder();
        let s = seen.clone();
        router.on(MessageKind::TemperatureAlert, move |_| s.lock().unwrap().push("hit".into()));

        assert!(matches!(router.dispatch_text("not json"), DispatchOutcome::Malformed(_)));
        assert!(matches!(
            router.dispatch_text(r#"{"data":{}}"#),
            DispatchOutcome::Malformed(_)
        ));
        assert!(matches!(
            router.dispatch_text(r#"{"type":"temperature_alert","data":{"id":"1"}}"#),
            DispatchOutcome::Malformed(_)
        ));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_on_many_shares_one_callback() {
        let router = MessageRouter::new();
        let seen = recorder();
        let s = seen.clone();
        let ids = router.on_many(&[MessageKind::Ping, MessageKind::Pong], move |inbound| {
            s.lock().unwrap().push(inbound.kind().to_string())
        });
        assert_eq!(ids.len(), 2);

        router.dispatch_text(r#"{"type":"ping"}"#);
        router.dispatch_text(r#"{"type":"pong"}"#);
        assert_eq!(*seen.lock().unwrap(), vec!["ping", "pong"]);
        assert_eq!(router.listener_count(&MessageKind::Ping), 1);
    }
}
