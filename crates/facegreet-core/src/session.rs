//! Two-phase recognition session: initialize once, then process frames.
//!
//! ```text
//! Uninitialized --initialize--> Ready --start_capture--> Capturing
//!        \                        \                         |
//!         `-----------------------`-------- stop ----------`--> Stopped
//! ```

use crate::analyzer::{AnalyzeError, FaceAnalyzer};
use crate::cooldown::{Clock, CooldownController, CooldownState, Notification, NotificationSink};
use crate::matcher::FaceMatcher;
use crate::reference::{BuildReport, ImageSource, ReferenceError, ReferenceSet, ReferenceSetBuilder};
use crate::types::{BoundingBox, MatchResult};
use image::RgbImage;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Uninitialized,
    Ready,
    Capturing,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Ready => "ready",
            SessionState::Capturing => "capturing",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("face model failed to load: {0}")]
    ModelLoad(#[source] AnalyzeError),
    #[error(transparent)]
    Reference(#[from] ReferenceError),
    #[error("frame analysis failed: {0}")]
    Analyze(#[source] AnalyzeError),
    #[error("cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: SessionState,
    },
}

/// One face in a processed frame.
#[derive(Debug, Clone, Serialize)]
pub struct FaceReport {
    pub bbox: BoundingBox,
    pub result: MatchResult,
}

/// Everything one frame produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FrameReport {
    pub faces: Vec<FaceReport>,
    pub notifications: Vec<Notification>,
}

/// Running totals, exposed through the daemon's status call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub frames_processed: u64,
    pub frames_failed: u64,
    pub faces_seen: u64,
    pub notifications_sent: u64,
}

/// Owns the analyzer, the matcher and the cooldown bookkeeping.
pub struct Session<A, C> {
    state: SessionState,
    analyzer: Option<A>,
    matcher: Option<FaceMatcher>,
    controller: CooldownController,
    cooldowns: CooldownState,
    builder: ReferenceSetBuilder,
    clock: C,
    stats: SessionStats,
}

impl<A: FaceAnalyzer, C: Clock> Session<A, C> {
    pub fn new(controller: CooldownController, builder: ReferenceSetBuilder, clock: C) -> Self {
        Self {
            state: SessionState::Uninitialized,
            analyzer: None,
            matcher: None,
            controller,
            cooldowns: CooldownState::new(),
            builder,
            clock,
            stats: SessionStats::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn references(&self) -> Option<&ReferenceSet> {
        self.matcher.as_ref().map(FaceMatcher::references)
    }

    pub fn cooldowns(&self) -> &CooldownState {
        &self.cooldowns
    }

    /// Load the model and build the reference set.
    ///
    /// On failure the session stays uninitialized and nothing is kept.
    pub fn initialize<L>(
        &mut self,
        load_model: L,
        source: &dyn ImageSource,
        identities: &[String],
        threshold: f32,
    ) -> Result<BuildReport, SessionError>
    where
        L: FnOnce() -> Result<A, AnalyzeError>,
    {
        self.expect_state(SessionState::Uninitialized, "initialize")?;

        let mut analyzer = load_model().map_err(SessionError::ModelLoad)?;
        let (references, report) = self.builder.build(identities, source, &mut analyzer)?;

        tracing::info!(
            identities = references.len(),
            dimension = references.dimension(),
            threshold,
            "session ready"
        );
        self.matcher = Some(FaceMatcher::new(references, threshold));
        self.analyzer = Some(analyzer);
        self.state = SessionState::Ready;
        Ok(report)
    }

    pub fn start_capture(&mut self) -> Result<(), SessionError> {
        self.expect_state(SessionState::Ready, "start capture")?;
        self.state = SessionState::Capturing;
        tracing::info!("capture started");
        Ok(())
    }

    /// Detect, match and greet for one frame.
    ///
    /// Cooldowns are only touched once the whole frame has been analyzed, so a
    /// failed frame leaves them as they were.
    pub fn process_frame(
        &mut self,
        frame: &RgbImage,
        sink: &mut dyn NotificationSink,
    ) -> Result<FrameReport, SessionError> {
        self.expect_state(SessionState::Capturing, "process a frame")?;
        let (Some(analyzer), Some(matcher)) = (self.analyzer.as_mut(), self.matcher.as_ref()) else {
            return Err(SessionError::InvalidState {
                action: "process a frame",
                state: self.state,
            });
        };

        let detections = match analyzer.detect_all(frame) {
            Ok(d) => d,
            Err(e) => {
                self.stats.frames_failed += 1;
                return Err(SessionError::Analyze(e));
            }
        };

        let faces: Vec<FaceReport> = detections
            .into_iter()
            .map(|face| FaceReport {
                result: matcher.best_match(&face.descriptor),
                bbox: face.bbox,
            })
            .collect();

        let now = self.clock.now_ms();
        let mut notifications = Vec::new();
        for face in &faces {
            if let Some(n) = self.controller.decide(&face.result, &mut self.cooldowns, now) {
                tracing::info!(identity = %n.identity, distance = face.result.distance, "greeting");
                sink.notify(&n);
                notifications.push(n);
            }
        }

        self.stats.frames_processed += 1;
        self.stats.faces_seen += faces.len() as u64;
        self.stats.notifications_sent += notifications.len() as u64;

        Ok(FrameReport { faces, notifications })
    }

    pub fn reset_cooldowns(&mut self) {
        tracing::info!(cleared = self.cooldowns.len(), "cooldowns reset");
        self.cooldowns.clear();
    }

    /// Terminal from any state.
    pub fn stop(&mut self) {
        if self.state != SessionState::Stopped {
            tracing::info!(from = %self.state, "session stopped");
            self.state = SessionState::Stopped;
        }
    }

    fn expect_state(&self, wanted: SessionState, action: &'static str) -> Result<(), SessionError> {
        if self.state == wanted {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                action,
                state: self.state,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cooldown::ManualClock;
    use crate::reference::tests::{FakeAnalyzer, MemorySource};
    use image::Rgb;

    fn frame(key: u8) -> RgbImage {
        RgbImage::from_pixel(4, 4, Rgb([key, 0, 0]))
    }

    fn ready_session() -> Session<FakeAnalyzer, ManualClock> {
        let mut session = Session::new(
            CooldownController::new(60_000, 0.6),
            ReferenceSetBuilder::new(1),
            ManualClock::new(0),
        );
        let source = MemorySource::new(&[("alice", 1, 1), ("bob", 1, 2)]);
        session
            .initialize(
                || {
                    Ok(FakeAnalyzer::new(&[
                        (1, vec![0.0, 0.0]),
                        (2, vec![1.0, 1.0]),
                        (3, vec![5.0, 5.0]),
                    ])
                    .with_group(10, &[1, 1, 2]))
                },
                &source,
                &["alice".to_string(), "bob".to_string()],
                0.6,
            )
            .unwrap();
        session
    }

    #[test]
    fn test_lifecycle_order() {
        let mut session = ready_session();
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.references().unwrap().len(), 2);

        let mut sink: Vec<Notification> = Vec::new();
        assert!(matches!(
            session.process_frame(&frame(1), &mut sink),
            Err(SessionError::InvalidState { state: SessionState::Ready, .. })
        ));

        session.start_capture().unwrap();
        assert_eq!(session.state(), SessionState::Capturing);
        assert!(session.start_capture().is_err());

        session.stop();
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(session.process_frame(&frame(1), &mut sink).is_err());
        assert!(session.start_capture().is_err());
    }

    #[test]
    fn test_initialize_model_failure_stays_uninitialized() {
        let mut session: Session<FakeAnalyzer, ManualClock> = Session::new(
            CooldownController::default(),
            ReferenceSetBuilder::default(),
            ManualClock::new(0),
        );
        let source = MemorySource::new(&[]);
        let err = session
            .initialize(|| Err(AnalyzeError::Other("no weights".into())), &source, &[], 0.6)
            .unwrap_err();
        assert!(matches!(err, SessionError::ModelLoad(_)));
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert!(session.start_capture().is_err());
    }

    #[test]
    fn test_initialize_without_reference_data_fails() {
        let mut session: Session<FakeAnalyzer, ManualClock> = Session::new(
            CooldownController::default(),
            ReferenceSetBuilder::default(),
            ManualClock::new(0),
        );
        let source = MemorySource::new(&[]);
        let err = session
            .initialize(|| Ok(FakeAnalyzer::new(&[])), &source, &["ghost".to_string()], 0.6)
            .unwrap_err();
        assert!(matches!(err, SessionError::Reference(ReferenceError::NoReferenceData)));
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[test]
    fn test_initialize_twice_is_rejected() {
        let mut session = ready_session();
        let source = MemorySource::new(&[]);
        let err = session
            .initialize(|| Ok(FakeAnalyzer::new(&[])), &source, &[], 0.6)
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidState { state: SessionState::Ready, .. }));
        assert_eq!(session.references().unwrap().len(), 2);
    }

    #[test]
    fn test_process_frame_greets_once_per_window() {
        let mut session = ready_session();
        session.start_capture().unwrap();
        let mut sink: Vec<Notification> = Vec::new();

        let report = session.process_frame(&frame(1), &mut sink).unwrap();
        assert_eq!(report.faces.len(), 1);
        assert_eq!(report.faces[0].result.label.identity(), Some("alice"));
        assert_eq!(report.notifications.len(), 1);
        assert_eq!(sink[0].message, "Hello alice, welcome!");

        session.clock.set(30_000);
        let report = session.process_frame(&frame(1), &mut sink).unwrap();
        assert!(report.notifications.is_empty());

        session.clock.set(61_000);
        session.process_frame(&frame(1), &mut sink).unwrap();
        assert_eq!(sink.len(), 2);
        assert_eq!(session.cooldowns().last_notified("alice"), Some(61_000));

        let stats = session.stats();
        assert_eq!(stats.frames_processed, 3);
        assert_eq!(stats.notifications_sent, 2);
    }

    #[test]
    fn test_unknown_face_is_reported_not_greeted() {
        let mut session = ready_session();
        session.start_capture().unwrap();
        let mut sink: Vec<Notification> = Vec::new();

        let report = session.process_frame(&frame(3), &mut sink).unwrap();
        assert!(report.faces[0].result.label.is_unknown());
        assert!(sink.is_empty());
        assert!(session.cooldowns().is_empty());
    }

    #[test]
    fn test_failed_frame_leaves_cooldowns_untouched() {
        let mut session = ready_session();
        session.start_capture().unwrap();
        let mut sink: Vec<Notification> = Vec::new();
        session.process_frame(&frame(2), &mut sink).unwrap();
        let before = session.cooldowns().clone();

        session.clock.set(120_000);
        let err = session.process_frame(&frame(255), &mut sink).unwrap_err();
        assert!(matches!(err, SessionError::Analyze(_)));
        assert_eq!(session.cooldowns(), &before);
        assert_eq!(session.stats().frames_failed, 1);
        // Still capturing after a bad frame
        assert_eq!(session.state(), SessionState::Capturing);
    }

    #[test]
    fn test_reset_cooldowns_allows_immediate_greeting() {
        let mut session = ready_session();
        session.start_capture().unwrap();
        let mut sink: Vec<Notification> = Vec::new();
        session.process_frame(&frame(2), &mut sink).unwrap();
        session.reset_cooldowns();
        session.process_frame(&frame(2), &mut sink).unwrap();
        assert_eq!(sink.len(), 2);
        assert!(sink.iter().all(|n| n.identity == "bob"));
    }

    #[test]
    fn test_multi_face_frame_greets_in_face_order() {
        let mut session = ready_session();
        session.start_capture().unwrap();
        session.clock.set(5_000);
        let mut sink: Vec<Notification> = Vec::new();

        // alice, alice, bob in one frame
        let report = session.process_frame(&frame(10), &mut sink).unwrap();
        let labels: Vec<_> = report.faces.iter().map(|f| f.result.label.identity()).collect();
        assert_eq!(labels, vec![Some("alice"), Some("alice"), Some("bob")]);
        assert!(report.faces[0].bbox.x < report.faces[1].bbox.x);

        // The second alice face is suppressed by the greeting the first one just fired.
        let greeted: Vec<&str> = sink.iter().map(|n| n.identity.as_str()).collect();
        assert_eq!(greeted, vec!["alice", "bob"]);
        assert_eq!(report.notifications, sink);
        assert_eq!(session.cooldowns().last_notified("alice"), Some(5_000));
        assert_eq!(session.cooldowns().last_notified("bob"), Some(5_000));

        let stats = session.stats();
        assert_eq!(stats.faces_seen, 3);
        assert_eq!(stats.notifications_sent, 2);
    }
}
