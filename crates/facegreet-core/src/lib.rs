//! facegreet-core: recognize known faces and decide when to greet them.
//!
//! Reference descriptors are built once per identity, every detected face is
//! matched against them by Euclidean distance, and a per-identity cooldown
//! keeps greetings from repeating. Detection and descriptors come from SCRFD
//! and ArcFace running on ONNX Runtime, behind the [`FaceAnalyzer`] trait.

pub mod alignment;
pub mod analyzer;
pub mod cooldown;
pub mod detector;
pub mod matcher;
pub mod recognizer;
pub mod reference;
pub mod session;
pub mod types;

pub use analyzer::{AnalyzeError, FaceAnalyzer, OnnxAnalyzer};
pub use cooldown::{
    Clock, CooldownController, CooldownState, GreetingTable, Notification, NotificationSink,
    SpeechParams, SystemClock,
};
pub use matcher::FaceMatcher;
pub use reference::{DirectoryImageSource, ImageSource, ReferenceError, ReferenceSet, ReferenceSetBuilder};
pub use session::{FrameReport, Session, SessionError, SessionState};
pub use types::{BoundingBox, Descriptor, DetectedFace, MatchLabel, MatchResult};

use std::path::PathBuf;

/// `$XDG_DATA_HOME/facegreet/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    data_dir().join("models")
}

/// `$XDG_DATA_HOME/facegreet`, falling back to `~/.local/share/facegreet`.
pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegreet")
}
