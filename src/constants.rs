//! Application-wide constants for banter.
//!
//! This module centralizes timing and endpoint constants to improve
//! maintainability and discoverability. Constants are grouped by domain
//! with documentation explaining their purpose.
//!
//! # Categories
//!
//! - **Reveal timing**: pacing of the incremental typing reveal
//! - **Connection**: reconnect and endpoint configuration

use std::time::Duration;

// ============================================================================
// Reveal timing
// ============================================================================

/// Base delay between revealed grapheme units.
///
/// Every reveal step waits at least this long before appending the next
/// unit. 35ms reads as natural typing without feeling sluggish on long
/// replies.
pub const REVEAL_BASE_DELAY: Duration = Duration::from_millis(35);

/// Extra delay added to the step that reveals a pause unit.
///
/// Applied on top of [`REVEAL_BASE_DELAY`] when the unit being revealed is
/// sentence-terminal punctuation (see [`PAUSE_UNITS`]). Total reveal
/// duration is therefore proportional to how much punctuation the text
/// contains.
pub const REVEAL_PAUSE_DELAY: Duration = Duration::from_millis(240);

/// Units that trigger the full pause delay when revealed.
///
/// Each entry is matched against a whole grapheme unit, not a substring.
pub const PAUSE_UNITS: &[&str] = &[".", ",", "!", "?", "…"];

// ============================================================================
// Connection
// ============================================================================

/// Delay before the single automatic reconnect attempt.
///
/// Constant backoff: after an unexpected transport close, exactly one
/// reconnect is scheduled this far in the future. A fresh close after the
/// retry schedules the next one, so repeated failures retry at a steady
/// cadence rather than ramping.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// WebSocket endpoint path on the chat backend.
///
/// The session id is appended as a query attribute:
/// `ws://host/ws/chat?session_id=<id>`.
pub const CHAT_ENDPOINT_PATH: &str = "/ws/chat";

/// Default backend URL used when no config file or override is present.
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8787";
