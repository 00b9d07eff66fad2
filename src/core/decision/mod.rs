//! # Decision Module
//!
//! Debounced capture decisions and the shared session state.
//!
//! ## State machine
//! Two modes, `Auto` (initial) and `Manual`, toggled only by an external
//! command. The mode is read once per frame, so a toggle takes effect on the
//! next evaluated frame and never interrupts one in flight.
//!
//! - **Auto** - capture when a face is present and the cooldown has elapsed
//! - **Manual** - capture only on an explicit "capture now" request
//!
//! The cooldown clock (`last_capture_at`) only moves when a capture was
//! actually written to disk, so a failed write can be retried on the next frame.

use crate::core::detector::DetectionResult;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Minimum time between automatic captures
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(2);

/// Shortest cooldown that keeps second-resolution capture ids unique
pub const MIN_COOLDOWN: Duration = Duration::from_secs(1);

/// Capture mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    #[default]
    Auto,
    Manual,
}

impl CaptureMode {
    pub fn toggled(self) -> Self {
        match self {
            Self::Auto => Self::Manual,
            Self::Manual => Self::Auto,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Auto => 0,
            Self::Manual => 1,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Manual,
            _ => Self::Auto,
        }
    }
}

impl std::fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureMode::Auto => write!(f, "Auto"),
            CaptureMode::Manual => write!(f, "Manual"),
        }
    }
}

/// What caused a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// A face was seen in auto mode
    Auto,
    /// An explicit capture request
    Manual,
}

/// Session-wide state shared by the capture loop and the command layer.
///
/// Each field has a single writer at a time: `mode` and `auto_email` are
/// written by commands, `last_capture_at` by the decision engine, and
/// `consecutive_read_errors` by the frame source.
#[derive(Debug)]
pub struct SessionState {
    mode: AtomicU8,
    auto_email: AtomicBool,
    last_capture_at: Mutex<Option<DateTime<Local>>>,
    consecutive_read_errors: AtomicU32,
}

impl SessionState {
    pub fn new(mode: CaptureMode, auto_email: bool) -> Self {
        Self {
            mode: AtomicU8::new(mode.to_u8()),
            auto_email: AtomicBool::new(auto_email),
            last_capture_at: Mutex::new(None),
            consecutive_read_errors: AtomicU32::new(0),
        }
    }

    pub fn mode(&self) -> CaptureMode {
        CaptureMode::from_u8(self.mode.load(Ordering::SeqCst))
    }

    pub fn set_mode(&self, mode: CaptureMode) {
        self.mode.store(mode.to_u8(), Ordering::SeqCst);
    }

    /// Flip the mode atomically and return the new one
    pub fn toggle_mode(&self) -> CaptureMode {
        let previous = self.mode.fetch_xor(1, Ordering::SeqCst);
        CaptureMode::from_u8(previous).toggled()
    }

    pub fn auto_email(&self) -> bool {
        self.auto_email.load(Ordering::SeqCst)
    }

    pub fn set_auto_email(&self, enabled: bool) {
        self.auto_email.store(enabled, Ordering::SeqCst);
    }

    pub fn last_capture_at(&self) -> Option<DateTime<Local>> {
        *self.last_capture_at.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_last_capture_at(&self, at: DateTime<Local>) {
        *self.last_capture_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(at);
    }

    pub fn consecutive_read_errors(&self) -> u32 {
        self.consecutive_read_errors.load(Ordering::SeqCst)
    }

    /// Count one more failed read; returns the new streak length
    pub(crate) fn record_read_error(&self) -> u32 {
        self.consecutive_read_errors.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn reset_read_errors(&self) {
        self.consecutive_read_errors.store(0, Ordering::SeqCst);
    }

    /// Point-in-time copy for display
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            mode: self.mode(),
            auto_email: self.auto_email(),
            last_capture_at: self.last_capture_at(),
            consecutive_read_errors: self.consecutive_read_errors(),
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(CaptureMode::Auto, true)
    }
}

/// Serializable copy of [`SessionState`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub mode: CaptureMode,
    pub auto_email: bool,
    pub last_capture_at: Option<DateTime<Local>>,
    pub consecutive_read_errors: u32,
}

/// Auto-mode rule: a face is present and strictly more than `cooldown` has
/// passed since the last capture. Time running backwards never triggers.
pub fn should_capture(
    detection: &DetectionResult,
    now: DateTime<Local>,
    mode: CaptureMode,
    last_capture_at: Option<DateTime<Local>>,
    cooldown: Duration,
) -> bool {
    if mode != CaptureMode::Auto || !detection.face_detected() {
        return false;
    }
    cooldown_elapsed(now, last_capture_at, cooldown)
}

fn cooldown_elapsed(now: DateTime<Local>, last: Option<DateTime<Local>>, cooldown: Duration) -> bool {
    match last {
        None => true,
        Some(last) => now
            .signed_duration_since(last)
            .to_std()
            .map(|elapsed| elapsed > cooldown)
            .unwrap_or(false),
    }
}

/// Stateful wrapper around [`should_capture`] bound to a session
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    cooldown: Duration,
    session: Arc<SessionState>,
}

impl DecisionEngine {
    pub fn new(cooldown: Duration, session: Arc<SessionState>) -> Self {
        Self { cooldown, session }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    /// Decide whether this frame becomes a capture.
    ///
    /// A pending manual request wins in either mode and ignores detection and
    /// cooldown. Otherwise only auto mode can trigger.
    pub fn evaluate(&self, detection: &DetectionResult, now: DateTime<Local>, manual_requested: bool) -> Option<Trigger> {
        if manual_requested {
            return Some(Trigger::Manual);
        }
        let mode = self.session.mode();
        let last = self.session.last_capture_at();
        should_capture(detection, now, mode, last, self.cooldown).then_some(Trigger::Auto)
    }

    /// Consume the cooldown after a capture was persisted
    pub fn commit(&self, captured_at: DateTime<Local>) {
        self.session.set_last_capture_at(captured_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::detector::{detect_attributes, FixedClassifier, Rect};
    use crate::core::frame::Frame;
    use chrono::TimeZone;

    fn t0() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn at_ms(ms: i64) -> DateTime<Local> {
        t0() + chrono::Duration::milliseconds(ms)
    }

    fn detection(face: bool) -> DetectionResult {
        let faces = if face {
            FixedClassifier::with(vec![Rect::new(4, 4, 20, 20)])
        } else {
            FixedClassifier::none()
        };
        detect_attributes(Frame::filled(40, 40, [10, 10, 10]), &faces, &FixedClassifier::none())
    }

    #[test]
    fn initial_mode_is_auto() {
        assert_eq!(SessionState::default().mode(), CaptureMode::Auto);
    }

    #[test]
    fn toggle_flips_between_two_states() {
        let session = SessionState::default();
        assert_eq!(session.toggle_mode(), CaptureMode::Manual);
        assert_eq!(session.mode(), CaptureMode::Manual);
        assert_eq!(session.toggle_mode(), CaptureMode::Auto);
        assert_eq!(session.mode(), CaptureMode::Auto);
    }

    #[test]
    fn no_face_never_triggers() {
        for ms in [0, 500, 2_100, 60_000] {
            assert!(!should_capture(&detection(false), at_ms(ms), CaptureMode::Auto, None, DEFAULT_COOLDOWN));
        }
    }

    #[test]
    fn first_face_triggers() {
        assert!(should_capture(&detection(true), t0(), CaptureMode::Auto, None, DEFAULT_COOLDOWN));
    }

    #[test]
    fn cooldown_is_strict() {
        let last = Some(t0());
        assert!(!should_capture(&detection(true), at_ms(500), CaptureMode::Auto, last, DEFAULT_COOLDOWN));
        assert!(!should_capture(&detection(true), at_ms(2_000), CaptureMode::Auto, last, DEFAULT_COOLDOWN));
        assert!(should_capture(&detection(true), at_ms(2_001), CaptureMode::Auto, last, DEFAULT_COOLDOWN));
    }

    #[test]
    fn clock_running_backwards_does_not_trigger() {
        let last = Some(at_ms(10_000));
        assert!(!should_capture(&detection(true), t0(), CaptureMode::Auto, last, DEFAULT_COOLDOWN));
    }

    #[test]
    fn manual_mode_ignores_faces() {
        assert!(!should_capture(&detection(true), t0(), CaptureMode::Manual, None, DEFAULT_COOLDOWN));
    }

    #[test]
    fn engine_manual_request_ignores_detection_and_cooldown() {
        let session = Arc::new(SessionState::new(CaptureMode::Manual, false));
        let engine = DecisionEngine::new(DEFAULT_COOLDOWN, session);
        engine.commit(t0());

        assert_eq!(engine.evaluate(&detection(false), at_ms(100), true), Some(Trigger::Manual));
        assert_eq!(engine.evaluate(&detection(true), at_ms(100), false), None);
    }

    #[test]
    fn engine_only_consumes_cooldown_on_commit() {
        let session = Arc::new(SessionState::default());
        let engine = DecisionEngine::new(DEFAULT_COOLDOWN, session.clone());

        assert_eq!(engine.evaluate(&detection(true), t0(), false), Some(Trigger::Auto));
        // not committed (e.g. the write failed), so the next frame may retry
        assert_eq!(engine.evaluate(&detection(true), at_ms(100), false), Some(Trigger::Auto));

        engine.commit(at_ms(100));
        assert_eq!(session.last_capture_at(), Some(at_ms(100)));
        assert_eq!(engine.evaluate(&detection(true), at_ms(1_000), false), None);
    }

    #[test]
    fn auto_captures_are_spaced_by_more_than_cooldown() {
        let session = Arc::new(SessionState::default());
        let engine = DecisionEngine::new(DEFAULT_COOLDOWN, session);
        let mut captures = Vec::new();

        for step in 0..200 {
            let now = at_ms(step * 70);
            if engine.evaluate(&detection(true), now, false).is_some() {
                engine.commit(now);
                captures.push(now);
            }
        }

        assert!(captures.len() > 1);
        for pair in captures.windows(2) {
            assert!(pair[1] - pair[0] > chrono::Duration::seconds(2));
        }
    }

    #[test]
    fn read_error_streak_counts_and_resets() {
        let session = SessionState::default();
        assert_eq!(session.record_read_error(), 1);
        assert_eq!(session.record_read_error(), 2);
        session.reset_read_errors();
        assert_eq!(session.consecutive_read_errors(), 0);
    }

    #[test]
    fn snapshot_serializes() {
        let session = SessionState::new(CaptureMode::Manual, false);
        let json = serde_json::to_string(&session.snapshot()).unwrap();
        assert!(json.contains("\"manual\""));
    }
}
