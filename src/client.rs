//! Client composition root.
//!
//! A [`Client`] wires the connection, dispatcher, scheduler, and store into
//! one explicitly constructed instance with an explicit lifecycle. No
//! globals, so tests can run any number of isolated clients side by side.
//!
//! # Architecture
//!
//! ```text
//!   user input ──► Client ──► SessionStore (append user message)
//!                    │              │
//!                    │              └──► Connection.send(user_message)
//!                    │
//!   Connection events ──► router task ──► Dispatcher ──► frame handlers
//!                                                            │
//!                                          SessionStore ◄────┤ final_text: append + reveal
//!                                          Scheduler runs ◄──┤ eot: force-complete reveal
//!                                          notices       ◄───┘ error: inline notice
//! ```
//!
//! The router task is the single thread of control for frame handling;
//! reveal callbacks run on their own reveal tasks. Every store mutation
//! goes through one mutex, which is the explicit mutual exclusion the
//! multi-threaded runtime requires.

// Rust guideline compliant 2026-02

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::Config;
use crate::connection::{Connection, ConnectionEvent, ConnectionState};
use crate::dispatch::{Dispatcher, FrameKind, Subscription};
use crate::protocol::{ClientStyle, Inbound, Outbound};
use crate::reveal::{RevealCallbacks, RevealHandle, RevealTiming, Scheduler};
use crate::segment::Segmenter;
use crate::store::{Message, MessagePatch, SessionStore};

/// Event surfaced to the embedding UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A session was created and marked active.
    SessionCreated {
        /// The new session id.
        session_id: String,
    },
    /// A message was appended to a session.
    MessageAppended {
        /// Owning session.
        session_id: String,
        /// The appended message.
        message_id: String,
    },
    /// A message changed in place (reveal step, completion, meta).
    MessageUpdated {
        /// Owning session.
        session_id: String,
        /// The updated message.
        message_id: String,
    },
    /// The connection status indicator changed.
    ConnectionChanged(ConnectionState),
    /// An inline notice was attached to a session.
    NoticeAdded {
        /// Owning session.
        session_id: String,
        /// Notice text.
        text: String,
    },
}

/// Result of a local user send: the message is always appended; delivery
/// may have failed (degraded connection, no retry).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    /// Id of the appended user message.
    pub message_id: String,
    /// Whether the frame was handed to an open transport.
    pub delivered: bool,
}

/// Shared pieces captured by the frame handlers.
#[derive(Clone)]
struct HandlerCtx {
    store: Arc<Mutex<SessionStore>>,
    scheduler: Scheduler,
    reveals: Arc<Mutex<HashMap<String, RevealHandle>>>,
    events: mpsc::UnboundedSender<ClientEvent>,
    typing_reveal: bool,
}

impl HandlerCtx {
    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}

/// Realtime session client: one connection, many sessions, typed events.
///
/// Must be created inside a tokio runtime; [`Client::new`] spawns the
/// router task that drains connection events.
#[derive(Debug)]
pub struct Client {
    config: Config,
    store: Arc<Mutex<SessionStore>>,
    dispatcher: Dispatcher,
    connection: Connection,
    reveals: Arc<Mutex<HashMap<String, RevealHandle>>>,
    events: mpsc::UnboundedSender<ClientEvent>,
    subscriptions: Vec<Subscription>,
    router: tokio::task::JoinHandle<()>,
}

impl Client {
    /// Construct a client and the event stream for the embedding UI.
    pub fn new(config: Config) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();

        let store = Arc::new(Mutex::new(SessionStore::new()));
        let reveals = Arc::new(Mutex::new(HashMap::new()));
        let scheduler = Scheduler::new(Segmenter::resolve(), RevealTiming::default());
        let dispatcher = Dispatcher::new();
        let connection = Connection::new(config.server_url.clone(), conn_tx);

        let ctx = HandlerCtx {
            store: Arc::clone(&store),
            scheduler,
            reveals: Arc::clone(&reveals),
            events: events_tx.clone(),
            typing_reveal: config.typing_reveal,
        };
        let subscriptions = register_frame_handlers(&dispatcher, &ctx);

        let router = tokio::spawn(route_connection_events(
            conn_rx,
            dispatcher.clone(),
            events_tx.clone(),
        ));

        let client = Self {
            config,
            store,
            dispatcher,
            connection,
            reveals,
            events: events_tx,
            subscriptions,
            router,
        };
        (client, events_rx)
    }

    /// Create a new session and mark it active.
    pub fn create_session(&self) -> String {
        let session_id = self
            .store
            .lock()
            .expect("store poisoned")
            .create_session();
        let _ = self.events.send(ClientEvent::SessionCreated {
            session_id: session_id.clone(),
        });
        session_id
    }

    /// Point the active view at `session_id` (not validated; see store docs).
    pub fn select_session(&self, session_id: &str) {
        self.store
            .lock()
            .expect("store poisoned")
            .select_session(session_id);
    }

    /// Open (or re-open) the connection bound to `session_id`.
    pub fn connect(&self, session_id: &str) {
        self.connection.connect(session_id);
    }

    /// Close the connection and cancel any pending reconnect. Idempotent.
    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    /// Current connection status indicator.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Append a user message to the active session and attempt delivery.
    ///
    /// The message is appended optimistically before any network work. A
    /// delivery failure leaves it in place with no retry; the degraded
    /// state shows only through the connection indicator. Returns `None`
    /// when no active session record exists.
    pub fn send_user_message(&self, text: &str) -> Option<SendOutcome> {
        let message_id = Uuid::new_v4().to_string();
        let session_id = {
            let mut store = self.store.lock().expect("store poisoned");
            let session_id = store.active_session_id()?.to_string();
            if store.session(&session_id).is_none() {
                log::warn!("no session record for active id {session_id}");
                return None;
            }
            store.add_message(
                &session_id,
                Message::user(message_id.clone(), text.to_string()),
            );
            session_id
        };
        let _ = self.events.send(ClientEvent::MessageAppended {
            session_id: session_id.clone(),
            message_id: message_id.clone(),
        });

        let frame = Outbound::UserMessage {
            session_id,
            message_id: message_id.clone(),
            text: text.to_string(),
            client_style: self
                .config
                .formality
                .clone()
                .map(|formality| ClientStyle { formality }),
        };
        let delivered = match self.connection.send(frame) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("user message not delivered: {e}");
                false
            }
        };

        Some(SendOutcome {
            message_id,
            delivered,
        })
    }

    /// Run a closure against the store (snapshot reads for UIs and tests).
    pub fn with_store<R>(&self, f: impl FnOnce(&SessionStore) -> R) -> R {
        f(&self.store.lock().expect("store poisoned"))
    }

    /// Tear the client down: cancel in-flight reveals, detach the frame
    /// handlers, close the connection, stop the router task.
    pub fn dispose(self) {
        for (_, handle) in self
            .reveals
            .lock()
            .expect("reveals poisoned")
            .drain()
        {
            handle.skip();
        }
        for subscription in &self.subscriptions {
            self.dispatcher.unsubscribe(*subscription);
        }
        self.connection.shutdown();
        self.router.abort();
    }

    /// Feed one decoded frame through the dispatcher (what the router task
    /// does for frames arriving off the wire).
    #[cfg(test)]
    pub(crate) fn apply_frame(&self, frame: &Inbound) {
        self.dispatcher.dispatch(frame);
    }
}

/// Router task: drains connection events in arrival order. Frames go to
/// the dispatcher; lifecycle events become status indicator updates.
async fn route_connection_events(
    mut conn_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    dispatcher: Dispatcher,
    events: mpsc::UnboundedSender<ClientEvent>,
) {
    while let Some(event) = conn_rx.recv().await {
        match event {
            ConnectionEvent::Frame(frame) => dispatcher.dispatch(&frame),
            ConnectionEvent::Connected { session_id } => {
                log::info!("connected to session {session_id}");
                let _ = events.send(ClientEvent::ConnectionChanged(ConnectionState::Connected));
            }
            ConnectionEvent::Disconnected => {
                let _ = events.send(ClientEvent::ConnectionChanged(
                    ConnectionState::Disconnected,
                ));
            }
            ConnectionEvent::TransportError(e) => {
                log::warn!("transport error: {e}");
                let _ = events.send(ClientEvent::ConnectionChanged(ConnectionState::Error));
            }
        }
    }
}

/// Subscribe the four frame handlers that implement the reactive session
/// semantics. Returns the tokens so teardown can unsubscribe symmetrically.
fn register_frame_handlers(dispatcher: &Dispatcher, ctx: &HandlerCtx) -> Vec<Subscription> {
    vec![
        dispatcher.subscribe(FrameKind::FinalText, {
            let ctx = ctx.clone();
            move |frame| {
                if let Inbound::FinalText { message_id, text } = frame {
                    handle_final_text(&ctx, message_id, text);
                }
            }
        }),
        dispatcher.subscribe(FrameKind::Meta, {
            let ctx = ctx.clone();
            move |frame| {
                if let Inbound::Meta { used_ops } = frame {
                    handle_meta(&ctx, used_ops);
                }
            }
        }),
        dispatcher.subscribe(FrameKind::Eot, {
            let ctx = ctx.clone();
            move |_| handle_eot(&ctx)
        }),
        dispatcher.subscribe(FrameKind::Error, {
            let ctx = ctx.clone();
            move |frame| {
                if let Inbound::Error { error } = frame {
                    handle_backend_error(&ctx, error);
                }
            }
        }),
    ]
}

/// `final_text`: append a revealing agent message to the active session and
/// start its reveal run. A resent message id resets the existing message
/// and cancels the prior run first.
fn handle_final_text(ctx: &HandlerCtx, message_id: &str, text: &str) {
    let session_id = {
        let mut store = ctx.store.lock().expect("store poisoned");
        let Some(session_id) = store.active_session_id().map(str::to_string) else {
            log::debug!("final_text with no active session, dropping");
            return;
        };
        if store.session(&session_id).is_none() {
            log::debug!("final_text for unknown active session {session_id}, dropping");
            return;
        }

        let already_known = store
            .session(&session_id)
            .is_some_and(|s| s.messages.iter().any(|m| m.id == message_id));
        if already_known {
            store.update_message(
                &session_id,
                message_id,
                MessagePatch {
                    text: Some(String::new()),
                    revealing: Some(true),
                    ..MessagePatch::default()
                },
            );
        } else {
            store.add_message(
                &session_id,
                Message::agent(message_id.to_string(), String::new(), true),
            );
        }
        session_id
    };
    ctx.emit(ClientEvent::MessageAppended {
        session_id: session_id.clone(),
        message_id: message_id.to_string(),
    });

    // At most one run per message id: cancel any prior chain before
    // starting the replacement.
    if let Some(prior) = ctx
        .reveals
        .lock()
        .expect("reveals poisoned")
        .remove(message_id)
    {
        prior.skip();
    }

    let callbacks = RevealCallbacks {
        on_update: Box::new({
            let ctx = ctx.clone();
            let session_id = session_id.clone();
            let message_id = message_id.to_string();
            move |shown: &str| {
                ctx.store.lock().expect("store poisoned").update_message(
                    &session_id,
                    &message_id,
                    MessagePatch {
                        text: Some(shown.to_string()),
                        ..MessagePatch::default()
                    },
                );
                ctx.emit(ClientEvent::MessageUpdated {
                    session_id: session_id.clone(),
                    message_id: message_id.clone(),
                });
            }
        }),
        on_complete: Box::new({
            let ctx = ctx.clone();
            let session_id = session_id.clone();
            let message_id = message_id.to_string();
            move || {
                ctx.store.lock().expect("store poisoned").update_message(
                    &session_id,
                    &message_id,
                    MessagePatch {
                        revealing: Some(false),
                        ..MessagePatch::default()
                    },
                );
                ctx.reveals
                    .lock()
                    .expect("reveals poisoned")
                    .remove(&message_id);
                ctx.emit(ClientEvent::MessageUpdated {
                    session_id,
                    message_id,
                });
            }
        }),
    };

    let handle = ctx
        .scheduler
        .reveal(text.to_string(), !ctx.typing_reveal, callbacks);
    if !handle.is_done() {
        ctx.reveals
            .lock()
            .expect("reveals poisoned")
            .insert(message_id.to_string(), handle);
    }
}

/// `meta`: attach operator tags to the most recent agent message.
fn handle_meta(ctx: &HandlerCtx, used_ops: &[String]) {
    let mut store = ctx.store.lock().expect("store poisoned");
    let Some(session_id) = store.active_session_id().map(str::to_string) else {
        log::debug!("meta with no active session, dropping");
        return;
    };
    let Some(message_id) = store.latest_agent_message_id(&session_id) else {
        log::debug!("meta with no agent message, dropping");
        return;
    };
    store.update_message(
        &session_id,
        &message_id,
        MessagePatch {
            used_ops: Some(used_ops.to_vec()),
            ..MessagePatch::default()
        },
    );
    drop(store);
    ctx.emit(ClientEvent::MessageUpdated {
        session_id,
        message_id,
    });
}

/// `eot`: the backend's "done" signal wins over any in-progress timer:
/// force-complete the reveal of the most recent agent message.
fn handle_eot(ctx: &HandlerCtx) {
    let latest = {
        let store = ctx.store.lock().expect("store poisoned");
        store
            .active_session_id()
            .map(str::to_string)
            .and_then(|sid| store.latest_agent_message_id(&sid))
    };
    let Some(message_id) = latest else {
        log::debug!("eot with nothing to finalize");
        return;
    };
    if let Some(handle) = ctx
        .reveals
        .lock()
        .expect("reveals poisoned")
        .remove(&message_id)
    {
        handle.skip();
    }
}

/// Backend `error`: non-fatal inline notice on the active conversation.
fn handle_backend_error(ctx: &HandlerCtx, error: &str) {
    let mut store = ctx.store.lock().expect("store poisoned");
    let Some(session_id) = store.active_session_id().map(str::to_string) else {
        log::warn!("backend error with no active session: {error}");
        return;
    };
    store.add_notice(&session_id, error.to_string());
    drop(store);
    ctx.emit(ClientEvent::NoticeAdded {
        session_id,
        text: error.to_string(),
    });
}
