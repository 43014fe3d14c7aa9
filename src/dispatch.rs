//! Typed routing of decoded inbound frames.
//!
//! The dispatcher classifies each decoded [`Inbound`] frame by its
//! discriminant and delivers it to the subscribers registered for that kind,
//! in subscription order, in the exact order frames arrive. It holds no
//! state beyond the subscriber table. Unrecognized discriminants never reach
//! this layer: they are dropped with a diagnostic during decode
//! (`protocol::decode_inbound`).
//!
//! Subscription and unsubscription are symmetric: a subscriber removed while
//! a frame is being delivered, including by an earlier handler in the same
//! delivery, is not invoked for that delivery.

// Rust guideline compliant 2026-02

use std::sync::{Arc, Mutex};

use crate::protocol::Inbound;

/// The four inbound event kinds a subscriber can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// `final_text`: a complete agent reply.
    FinalText,
    /// `meta`: operator metadata for the preceding reply.
    Meta,
    /// `eot`: end-of-turn marker.
    Eot,
    /// `error`: backend-reported error.
    Error,
}

impl FrameKind {
    /// Classify a decoded frame.
    pub fn of(frame: &Inbound) -> Self {
        match frame {
            Inbound::FinalText { .. } => Self::FinalText,
            Inbound::Meta { .. } => Self::Meta,
            Inbound::Eot => Self::Eot,
            Inbound::Error { .. } => Self::Error,
        }
    }
}

/// Token identifying one subscription; pass back to [`Dispatcher::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(u64);

type Handler = Arc<Mutex<dyn FnMut(&Inbound) + Send>>;

struct Entry {
    id: u64,
    kind: FrameKind,
    handler: Handler,
}

#[derive(Default)]
struct SubscriberTable {
    next_id: u64,
    // Vec preserves subscription order for delivery
    entries: Vec<Entry>,
}

/// Routes decoded frames to typed subscribers.
///
/// Cheap to clone: clones share one subscriber table, so a handler may hold
/// a clone and unsubscribe other handlers mid-delivery.
#[derive(Clone, Default)]
pub struct Dispatcher {
    table: Arc<Mutex<SubscriberTable>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.table.lock().map(|t| t.entries.len()).unwrap_or(0);
        f.debug_struct("Dispatcher").field("subscribers", &count).finish()
    }
}

impl Dispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one frame kind.
    pub fn subscribe<F>(&self, kind: FrameKind, handler: F) -> Subscription
    where
        F: FnMut(&Inbound) + Send + 'static,
    {
        let mut table = self.table.lock().expect("subscriber table poisoned");
        table.next_id += 1;
        let id = table.next_id;
        table.entries.push(Entry {
            id,
            kind,
            handler: Arc::new(Mutex::new(handler)),
        });
        Subscription(id)
    }

    /// Remove a subscription. Returns whether it was still registered.
    ///
    /// Safe to call from inside a handler; the removed subscriber is not
    /// invoked for the delivery in progress.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut table = self.table.lock().expect("subscriber table poisoned");
        let before = table.entries.len();
        table.entries.retain(|e| e.id != subscription.0);
        table.entries.len() != before
    }

    /// Deliver one frame to the subscribers of its kind, in subscription
    /// order.
    ///
    /// The subscriber table is not locked while handlers run, so handlers
    /// may subscribe and unsubscribe freely; liveness is re-checked before
    /// each invocation.
    pub fn dispatch(&self, frame: &Inbound) {
        let kind = FrameKind::of(frame);

        let snapshot: Vec<(u64, Handler)> = {
            let table = self.table.lock().expect("subscriber table poisoned");
            table
                .entries
                .iter()
                .filter(|e| e.kind == kind)
                .map(|e| (e.id, Arc::clone(&e.handler)))
                .collect()
        };

        if snapshot.is_empty() {
            log::debug!("no subscriber for {kind:?} frame");
            return;
        }

        for (id, handler) in snapshot {
            let still_registered = {
                let table = self.table.lock().expect("subscriber table poisoned");
                table.entries.iter().any(|e| e.id == id)
            };
            if !still_registered {
                continue;
            }
            (handler.lock().expect("handler poisoned"))(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn final_text(id: &str) -> Inbound {
        Inbound::FinalText {
            message_id: id.to_string(),
            text: "t".to_string(),
        }
    }

    #[test]
    fn test_classification_covers_all_kinds() {
        assert_eq!(FrameKind::of(&final_text("a")), FrameKind::FinalText);
        assert_eq!(
            FrameKind::of(&Inbound::Meta { used_ops: vec![] }),
            FrameKind::Meta
        );
        assert_eq!(FrameKind::of(&Inbound::Eot), FrameKind::Eot);
        assert_eq!(
            FrameKind::of(&Inbound::Error {
                error: "e".to_string()
            }),
            FrameKind::Error
        );
    }

    #[test]
    fn test_delivery_in_subscription_order() {
        let dispatcher = Dispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            dispatcher.subscribe(FrameKind::Eot, move |_| {
                order.lock().expect("order").push(tag);
            });
        }

        dispatcher.dispatch(&Inbound::Eot);
        assert_eq!(
            order.lock().expect("order").clone(),
            vec!["first", "second", "third"]
        );
    }

    #[test]
    fn test_frames_route_only_to_matching_kind() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(Mutex::new(Vec::new()));

        let record = |tag: &'static str| {
            let hits = Arc::clone(&hits);
            move |_: &Inbound| hits.lock().expect("hits").push(tag)
        };
        dispatcher.subscribe(FrameKind::FinalText, record("final"));
        dispatcher.subscribe(FrameKind::Error, record("error"));

        dispatcher.dispatch(&final_text("a-1"));
        dispatcher.dispatch(&Inbound::Eot);
        dispatcher.dispatch(&Inbound::Error {
            error: "boom".to_string(),
        });

        assert_eq!(hits.lock().expect("hits").clone(), vec!["final", "error"]);
    }

    #[test]
    fn test_unsubscribe_is_symmetric() {
        let dispatcher = Dispatcher::new();
        let count = Arc::new(Mutex::new(0));
        let sub = dispatcher.subscribe(FrameKind::Eot, {
            let count = Arc::clone(&count);
            move |_| *count.lock().expect("count") += 1
        });

        dispatcher.dispatch(&Inbound::Eot);
        assert!(dispatcher.unsubscribe(sub));
        dispatcher.dispatch(&Inbound::Eot);

        assert_eq!(*count.lock().expect("count"), 1);
        // Second removal reports nothing left to remove
        assert!(!dispatcher.unsubscribe(sub));
    }

    #[test]
    fn test_handler_removed_during_delivery_is_not_invoked() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(Mutex::new(Vec::new()));

        // Subscribe the victim second so the remover runs first; the token
        // is produced after the remover is registered, so wire it through a
        // shared slot.
        let victim_slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        dispatcher.subscribe(FrameKind::Eot, {
            let dispatcher = dispatcher.clone();
            let victim_slot = Arc::clone(&victim_slot);
            let hits = Arc::clone(&hits);
            move |_| {
                hits.lock().expect("hits").push("remover");
                if let Some(victim) = *victim_slot.lock().expect("slot") {
                    dispatcher.unsubscribe(victim);
                }
            }
        });

        let victim = dispatcher.subscribe(FrameKind::Eot, {
            let hits = Arc::clone(&hits);
            move |_| hits.lock().expect("hits").push("victim")
        });
        *victim_slot.lock().expect("slot") = Some(victim);

        dispatcher.dispatch(&Inbound::Eot);
        assert_eq!(hits.lock().expect("hits").clone(), vec!["remover"]);
    }

    #[test]
    fn test_handler_may_unsubscribe_itself() {
        let dispatcher = Dispatcher::new();
        let count = Arc::new(Mutex::new(0));
        let self_slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let sub = dispatcher.subscribe(FrameKind::Meta, {
            let dispatcher = dispatcher.clone();
            let self_slot = Arc::clone(&self_slot);
            let count = Arc::clone(&count);
            move |_| {
                *count.lock().expect("count") += 1;
                if let Some(me) = *self_slot.lock().expect("slot") {
                    dispatcher.unsubscribe(me);
                }
            }
        });
        *self_slot.lock().expect("slot") = Some(sub);

        dispatcher.dispatch(&Inbound::Meta { used_ops: vec![] });
        dispatcher.dispatch(&Inbound::Meta { used_ops: vec![] });
        assert_eq!(*count.lock().expect("count"), 1);
    }
}
