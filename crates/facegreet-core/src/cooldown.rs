//! Greeting decisions with a per-identity cooldown.

use crate::matcher::DEFAULT_MATCH_THRESHOLD;
use crate::types::MatchResult;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Minimum time between two greetings for the same identity.
pub const DEFAULT_COOLDOWN_MS: u64 = 60_000;

/// Template for identities without a dedicated greeting.
pub const DEFAULT_GREETING_TEMPLATE: &str = "Hello {identity}, welcome!";

/// Milliseconds since the Unix epoch.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Wall clock backed by `chrono::Utc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock(Cell<u64>);

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self(Cell::new(start_ms))
    }

    pub fn set(&self, ms: u64) {
        self.0.set(ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.get()
    }
}

/// Voice settings passed along with every greeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechParams {
    /// 0.0–1.0
    pub volume: f32,
    /// 1.0 is the engine's normal speed.
    pub rate: f32,
    /// 1.0 is the engine's normal pitch.
    pub pitch: f32,
    /// BCP 47 tag of the preferred voice.
    pub language: String,
}

impl Default for SpeechParams {
    fn default() -> Self {
        Self {
            volume: 1.0,
            rate: 1.0,
            pitch: 1.0,
            language: "en-US".to_string(),
        }
    }
}

/// A greeting the controller decided to speak.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub identity: String,
    pub message: String,
    pub speech: SpeechParams,
}

/// Receives greetings; delivery is fire-and-forget.
pub trait NotificationSink {
    fn notify(&mut self, notification: &Notification);
}

impl<S: NotificationSink + ?Sized> NotificationSink for Box<S> {
    fn notify(&mut self, notification: &Notification) {
        (**self).notify(notification)
    }
}

/// Collects every notification it receives.
impl NotificationSink for Vec<Notification> {
    fn notify(&mut self, notification: &Notification) {
        self.push(notification.clone());
    }
}

#[derive(Error, Debug)]
pub enum GreetingsError {
    #[error("failed to read greetings file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid greetings file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// On-disk greetings, e.g.
///
/// ```toml
/// template = "Good to see you, {identity}!"
/// replace_defaults = false
///
/// [greetings]
/// maria = "Hola Maria!"
/// ```
#[derive(Debug, Default, Deserialize)]
struct GreetingsFile {
    template: Option<String>,
    #[serde(default)]
    replace_defaults: bool,
    #[serde(default)]
    greetings: HashMap<String, String>,
}

/// Per-identity greeting lookup with a templated fallback.
///
/// Special greetings are matched ignoring ASCII case.
#[derive(Debug, Clone, PartialEq)]
pub struct GreetingTable {
    special: HashMap<String, String>,
    template: String,
}

impl Default for GreetingTable {
    fn default() -> Self {
        Self::empty()
            .with_greeting("badhusha", "Hi sir, how are you?")
            .with_greeting("abhishek", "Hi Abhi, how are you? How can I help you today?")
    }
}

impl GreetingTable {
    /// No special greetings, default template only.
    pub fn empty() -> Self {
        Self {
            special: HashMap::new(),
            template: DEFAULT_GREETING_TEMPLATE.to_string(),
        }
    }

    pub fn with_greeting(mut self, identity: &str, message: &str) -> Self {
        self.special.insert(identity.to_ascii_lowercase(), message.to_string());
        self
    }

    /// `{identity}` in the template is replaced with the identity.
    pub fn with_template(mut self, template: &str) -> Self {
        self.template = template.to_string();
        self
    }

    /// Parse a greetings TOML document on top of the built-in table.
    pub fn from_toml_str(text: &str, origin: &str) -> Result<Self, GreetingsError> {
        let file: GreetingsFile = toml::from_str(text).map_err(|source| GreetingsError::Parse {
            path: origin.to_string(),
            source,
        })?;

        let mut table = if file.replace_defaults {
            Self::empty()
        } else {
            Self::default()
        };
        if let Some(template) = file.template {
            table = table.with_template(&template);
        }
        for (identity, message) in &file.greetings {
            table = table.with_greeting(identity, message);
        }
        Ok(table)
    }

    pub fn load(path: &Path) -> Result<Self, GreetingsError> {
        let origin = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| GreetingsError::Io {
            path: origin.clone(),
            source,
        })?;
        let table = Self::from_toml_str(&text, &origin)?;
        tracing::info!(path = %origin, special = table.special.len(), "greetings loaded");
        Ok(table)
    }

    pub fn message_for(&self, identity: &str) -> String {
        match self.special.get(&identity.to_ascii_lowercase()) {
            Some(message) => message.clone(),
            None => self.template.replace("{identity}", identity),
        }
    }
}

/// Last-greeted timestamp per identity, for one capture session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CooldownState {
    last_notified: HashMap<String, u64>,
}

impl CooldownState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_notified(&self, identity: &str) -> Option<u64> {
        self.last_notified.get(identity).copied()
    }

    pub fn len(&self) -> usize {
        self.last_notified.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_notified.is_empty()
    }

    pub fn clear(&mut self) {
        self.last_notified.clear();
    }
}

/// Decides whether a match should be greeted now.
#[derive(Debug, Clone)]
pub struct CooldownController {
    window_ms: u64,
    threshold: f32,
    greetings: GreetingTable,
    speech: SpeechParams,
}

impl Default for CooldownController {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN_MS, DEFAULT_MATCH_THRESHOLD)
    }
}

impl CooldownController {
    pub fn new(window_ms: u64, threshold: f32) -> Self {
        Self {
            window_ms,
            threshold,
            greetings: GreetingTable::default(),
            speech: SpeechParams::default(),
        }
    }

    pub fn with_greetings(mut self, greetings: GreetingTable) -> Self {
        self.greetings = greetings;
        self
    }

    pub fn with_speech(mut self, speech: SpeechParams) -> Self {
        self.speech = speech;
        self
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Greet `result`'s identity if it is admitted and out of cooldown.
    ///
    /// On a greeting the identity's timestamp becomes `now_ms`; otherwise the
    /// state is left untouched.
    pub fn decide(
        &self,
        result: &MatchResult,
        state: &mut CooldownState,
        now_ms: u64,
    ) -> Option<Notification> {
        let identity = result.label.identity()?;
        if result.distance >= self.threshold {
            return None;
        }

        if let Some(last) = state.last_notified(identity) {
            // A clock that went backwards counts as no time passed.
            let elapsed = now_ms.saturating_sub(last);
            if elapsed < self.window_ms {
                tracing::trace!(identity, elapsed, "greeting suppressed by cooldown");
                return None;
            }
        }

        state.last_notified.insert(identity.to_string(), now_ms);
        Some(Notification {
            identity: identity.to_string(),
            message: self.greetings.message_for(identity),
            speech: self.speech.clone(),
        })
    }
}
