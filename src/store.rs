//! Session and message state.
//!
//! The store exclusively owns every [`Session`] and [`Message`] record.
//! Message lists are append-only except for in-place field updates, and
//! exactly one session is active at a time; selecting a session never
//! touches any other session's state.
//!
//! Boundary choices (see DESIGN.md): `select_session` does not validate
//! that the id exists; an unknown id simply yields an empty active view.
//! `add_message` / `update_message` against an unknown session or message
//! are silent no-ops with a log line, never errors.

// Rust guideline compliant 2026-02

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Typed locally by the user.
    User,
    /// Produced by the backend agent.
    Agent,
}

/// One message in a session's transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Opaque id, unique within the session.
    pub id: String,
    /// Author role.
    pub role: Role,
    /// Message text; patched incrementally while an agent reply reveals.
    pub text: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// True only for agent messages while a reveal run is in flight.
    pub revealing: bool,
    /// Planner operator tags reported by a `meta` frame, agent messages only.
    pub used_ops: Vec<String>,
}

impl Message {
    /// A user message, complete at creation.
    pub fn user(id: String, text: String) -> Self {
        Self {
            id,
            role: Role::User,
            text,
            created_at: Utc::now(),
            revealing: false,
            used_ops: Vec::new(),
        }
    }

    /// An agent message created at the start of a reveal run.
    pub fn agent(id: String, text: String, revealing: bool) -> Self {
        Self {
            id,
            role: Role::Agent,
            text,
            created_at: Utc::now(),
            revealing,
            used_ops: Vec::new(),
        }
    }
}

/// Field-wise update applied to a message in place.
///
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct MessagePatch {
    /// Replacement text.
    pub text: Option<String>,
    /// New revealing flag.
    pub revealing: Option<bool>,
    /// Replacement operator tags.
    pub used_ops: Option<Vec<String>>,
}

/// Inline conversation notice (backend-reported error surfaced non-fatally).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Notice text.
    pub text: String,
    /// When the notice was attached.
    pub created_at: DateTime<Utc>,
}

/// One conversational session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque unique id, caller-generated.
    pub id: String,
    /// Display title, derived from creation time.
    pub title: String,
    /// Ordered transcript, append-only.
    pub messages: Vec<Message>,
    /// Inline notices attached to this conversation.
    pub notices: Vec<Notice>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Owns all sessions and the active-session pointer.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Vec<Session>,
    active: Option<String>,
}

impl SessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new session, prepend it, and mark it active.
    ///
    /// Returns the fresh session id.
    pub fn create_session(&mut self) -> String {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let session = Session {
            id: id.clone(),
            title: format!("Chat {}", now.format("%m-%d %H:%M")),
            messages: Vec::new(),
            notices: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.sessions.insert(0, session);
        self.active = Some(id.clone());
        id
    }

    /// Point the active view at `id`.
    ///
    /// The id is not validated: selecting a non-existent session is legal
    /// and yields an empty active view.
    pub fn select_session(&mut self, id: &str) {
        self.active = Some(id.to_string());
    }

    /// Id of the active session, if one has been selected.
    pub fn active_session_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// The active session's record, when it exists.
    pub fn active_session(&self) -> Option<&Session> {
        let id = self.active.as_deref()?;
        self.session(id)
    }

    /// Look up a session by id.
    pub fn session(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    /// All sessions, most recently created first.
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// Append a message to a session's transcript.
    ///
    /// No-op with a warning when the session does not exist.
    pub fn add_message(&mut self, session_id: &str, message: Message) {
        let Some(session) = self.sessions.iter_mut().find(|s| s.id == session_id) else {
            log::warn!("dropping message for unknown session {session_id}");
            return;
        };
        session.messages.push(message);
        session.updated_at = Utc::now();
    }

    /// Merge `patch` into a message in place.
    ///
    /// No-op when the session or message id is absent.
    pub fn update_message(&mut self, session_id: &str, message_id: &str, patch: MessagePatch) {
        let Some(session) = self.sessions.iter_mut().find(|s| s.id == session_id) else {
            log::debug!("update for unknown session {session_id}");
            return;
        };
        let Some(message) = session.messages.iter_mut().find(|m| m.id == message_id) else {
            log::debug!("update for unknown message {message_id}");
            return;
        };
        if let Some(text) = patch.text {
            message.text = text;
        }
        if let Some(revealing) = patch.revealing {
            message.revealing = revealing;
        }
        if let Some(used_ops) = patch.used_ops {
            message.used_ops = used_ops;
        }
        session.updated_at = Utc::now();
    }

    /// Attach an inline notice to a session.
    pub fn add_notice(&mut self, session_id: &str, text: String) {
        let Some(session) = self.sessions.iter_mut().find(|s| s.id == session_id) else {
            log::debug!("notice for unknown session {session_id}");
            return;
        };
        session.notices.push(Notice {
            text,
            created_at: Utc::now(),
        });
        session.updated_at = Utc::now();
    }

    /// Id of the most recent agent message in a session, if any.
    pub fn latest_agent_message_id(&self, session_id: &str) -> Option<String> {
        self.session(session_id)?
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Agent)
            .map(|m| m.id.clone())
    }
}
