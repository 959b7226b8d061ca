//! Spoken greetings through `espeak-ng`.

use facegreet_core::{Notification, NotificationSink};
use std::process::{Command, Stdio};

const ESPEAK_PROGRAM: &str = "espeak-ng";
const ESPEAK_DEFAULT_AMPLITUDE: f32 = 100.0; // range 0–200
const ESPEAK_DEFAULT_WPM: f32 = 175.0;
const ESPEAK_DEFAULT_PITCH: f32 = 50.0; // range 0–99

/// Speaks each greeting with a detached `espeak-ng` process.
///
/// Delivery is fire-and-forget: a failed spawn is logged and dropped.
pub struct SpeechSink {
    program: String,
}

impl Default for SpeechSink {
    fn default() -> Self {
        Self::new(ESPEAK_PROGRAM)
    }
}

impl SpeechSink {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }
}

/// Map volume/rate/pitch multipliers and the language tag onto espeak-ng flags.
pub fn espeak_args(notification: &Notification) -> Vec<String> {
    let speech = &notification.speech;
    let amplitude = (ESPEAK_DEFAULT_AMPLITUDE * speech.volume).round().clamp(0.0, 200.0);
    let wpm = (ESPEAK_DEFAULT_WPM * speech.rate).round().clamp(80.0, 450.0);
    let pitch = (ESPEAK_DEFAULT_PITCH * speech.pitch).round().clamp(0.0, 99.0);

    vec![
        "-v".to_string(),
        speech.language.to_ascii_lowercase(),
        "-a".to_string(),
        format!("{amplitude}"),
        "-s".to_string(),
        format!("{wpm}"),
        "-p".to_string(),
        format!("{pitch}"),
        "--".to_string(),
        notification.message.clone(),
    ]
}

impl NotificationSink for SpeechSink {
    fn notify(&mut self, notification: &Notification) {
        let spawned = Command::new(&self.program)
            .args(espeak_args(notification))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(program = %self.program, error = %e, "speech unavailable");
                return;
            }
        };

        let identity = notification.identity.clone();
        tracing::info!(identity = %identity, "started speaking");
        let waiter = std::thread::Builder::new()
            .name("facegreet-speech".into())
            .spawn(move || match child.wait() {
                Ok(status) if status.success() => {
                    tracing::info!(identity = %identity, "finished speaking");
                }
                Ok(status) => tracing::warn!(identity = %identity, %status, "speech exited abnormally"),
                Err(e) => tracing::warn!(identity = %identity, error = %e, "speech wait failed"),
            });
        if let Err(e) = waiter {
            tracing::warn!(error = %e, "failed to spawn speech waiter");
        }
    }
}

/// Logs greetings instead of speaking them.
#[derive(Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&mut self, notification: &Notification) {
        tracing::info!(
            identity = %notification.identity,
            message = %notification.message,
            "greeting (speech disabled)"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegreet_core::SpeechParams;

    fn notification(speech: SpeechParams) -> Notification {
        Notification {
            identity: "sam".into(),
            message: "Hello sam, welcome!".into(),
            speech,
        }
    }

    #[test]
    fn test_default_params_map_to_espeak_defaults() {
        let args = espeak_args(&notification(SpeechParams::default()));
        assert_eq!(
            args,
            vec!["-v", "en-us", "-a", "100", "-s", "175", "-p", "50", "--", "Hello sam, welcome!"]
        );
    }

    #[test]
    fn test_params_are_scaled_and_clamped() {
        let args = espeak_args(&notification(SpeechParams {
            volume: 0.5,
            rate: 10.0,
            pitch: 3.0,
            language: "en-GB".into(),
        }));
        assert_eq!(&args[..8], &["-v", "en-gb", "-a", "50", "-s", "450", "-p", "99"]);
    }

    #[test]
    fn test_missing_program_is_not_fatal() {
        let mut sink = SpeechSink::new("/nonexistent/espeak-ng");
        sink.notify(&notification(SpeechParams::default()));
    }
}
