//! Incremental typing reveal for agent replies.
//!
//! A reveal run discloses text one grapheme unit at a time on a timer chain,
//! with punctuation-aware pacing. Each run is a disposable spawned task: the
//! caller gets a [`RevealHandle`] that owns cancellation, so "when does this
//! stop" is never ambiguous. Skipping (cancelling is the same
//! operation) delivers the full text at once; completion fires exactly once
//! per run no matter how it ends.
//!
//! # Timing
//!
//! The step that reveals unit *i* waits `base` first, plus the full pause
//! delay when the unit is sentence-terminal punctuation and half of it when
//! the unit is a newline. Delays are strictly per-step, so total duration is
//! the sum of per-unit delays.

// Rust guideline compliant 2026-02

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::constants::{PAUSE_UNITS, REVEAL_BASE_DELAY, REVEAL_PAUSE_DELAY};
use crate::segment::Segmenter;

/// Per-step delay parameters for a reveal run.
#[derive(Debug, Clone, Copy)]
pub struct RevealTiming {
    /// Minimum delay before every unit.
    pub base: Duration,
    /// Extra delay for pause units; newlines get half of this.
    pub pause_extra: Duration,
}

impl Default for RevealTiming {
    fn default() -> Self {
        Self {
            base: REVEAL_BASE_DELAY,
            pause_extra: REVEAL_PAUSE_DELAY,
        }
    }
}

impl RevealTiming {
    /// Delay for the step that reveals `unit`.
    fn step_delay(&self, unit: &str) -> Duration {
        if PAUSE_UNITS.contains(&unit) {
            self.base + self.pause_extra
        } else if unit == "\n" || unit == "\r\n" {
            self.base + self.pause_extra / 2
        } else {
            self.base
        }
    }
}

/// Callbacks invoked as a reveal run progresses.
///
/// `on_update` receives the revealed prefix after each step; `on_complete`
/// fires exactly once when the run ends, however it ends.
pub struct RevealCallbacks {
    /// Called with the text revealed so far, a strictly growing prefix chain.
    pub on_update: Box<dyn FnMut(&str) + Send>,
    /// Called exactly once at the end of the run.
    pub on_complete: Box<dyn FnOnce() + Send>,
}

impl std::fmt::Debug for RevealCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevealCallbacks").finish_non_exhaustive()
    }
}

/// Starts reveal runs with a fixed segmentation strategy and timing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scheduler {
    segmenter: Segmenter,
    timing: RevealTiming,
}

impl Scheduler {
    /// Build a scheduler from an already-resolved segmenter and timing.
    pub fn new(segmenter: Segmenter, timing: RevealTiming) -> Self {
        Self { segmenter, timing }
    }

    /// Start revealing `text`.
    ///
    /// With `skip` the full text is delivered immediately and no timed work
    /// happens. Empty text completes immediately with zero updates. The
    /// returned handle cancels the run; dropping it does not.
    pub fn reveal(&self, text: String, skip: bool, callbacks: RevealCallbacks) -> RevealHandle {
        let RevealCallbacks {
            mut on_update,
            on_complete,
        } = callbacks;

        if skip || text.is_empty() {
            if !text.is_empty() {
                on_update(&text);
            }
            on_complete();
            return RevealHandle::finished();
        }

        let token = CancellationToken::new();
        let done = Arc::new(AtomicBool::new(false));
        let segmenter = self.segmenter;
        let timing = self.timing;

        let task = tokio::spawn({
            let token = token.clone();
            let done = Arc::clone(&done);
            async move {
                let units = segmenter.segment(&text);
                let mut shown = String::with_capacity(text.len());
                let mut cut_short = false;

                for unit in units {
                    let delay = timing.step_delay(unit);
                    tokio::select! {
                        () = token.cancelled() => {
                            cut_short = true;
                            break;
                        }
                        () = tokio::time::sleep(delay) => {
                            shown.push_str(unit);
                            on_update(&shown);
                        }
                    }
                }

                if cut_short && shown.len() < text.len() {
                    on_update(&text);
                }

                done.store(true, Ordering::SeqCst);
                on_complete();
            }
        });

        RevealHandle {
            token,
            done,
            task: Some(task),
        }
    }
}

/// Handle to an in-flight reveal run.
#[derive(Debug)]
pub struct RevealHandle {
    token: CancellationToken,
    done: Arc<AtomicBool>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl RevealHandle {
    /// Handle for a run that completed before any timer was created.
    fn finished() -> Self {
        Self {
            token: CancellationToken::new(),
            done: Arc::new(AtomicBool::new(true)),
            task: None,
        }
    }

    /// Force the run to complete now.
    ///
    /// Cancels the pending timer, delivers the full text, and lets the run
    /// finish. Idempotent: skipping an already-finished run does nothing,
    /// and completion never fires a second time.
    pub fn skip(&self) {
        self.token.cancel();
    }

    /// Whether the run has delivered its completion.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Wait for the run to finish. Returns immediately for finished runs.
    pub async fn wait(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}
