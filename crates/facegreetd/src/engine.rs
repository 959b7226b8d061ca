use crate::config::Config;
use crate::overlay::{LogOverlay, OverlayRenderer, SnapshotOverlay};
use crate::speech::{LogSink, SpeechSink};
use facegreet_core::cooldown::GreetingsError;
use facegreet_core::reference::IdentitySummary;
use facegreet_core::session::SessionStats;
use facegreet_core::{
    CooldownController, DirectoryImageSource, GreetingTable, NotificationSink, OnnxAnalyzer,
    ReferenceSetBuilder, Session, SessionError, SessionState, SpeechParams, SystemClock,
};
use facegreet_hw::{Camera, CameraError, Frame};
use serde::Serialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};

type GreeterSession = Session<OnnxAnalyzer, SystemClock>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera unavailable: {0}")]
    DeviceAccess(#[from] CameraError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Greetings(#[from] GreetingsError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Snapshot of the engine for the status call.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: SessionState,
    pub identities: Vec<IdentitySummary>,
    pub stats: SessionStats,
    pub cooling_down: usize,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
    ResetCooldowns {
        reply: oneshot::Sender<()>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Status { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn reset_cooldowns(&self) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::ResetCooldowns { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Ask the capture loop to stop at the next frame boundary.
    pub async fn stop(&self) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Stop { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    async fn send(&self, req: EngineRequest) -> Result<(), EngineError> {
        self.tx.send(req).await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Cadence settings for the capture loop.
#[derive(Debug, Clone, Copy)]
struct Pacing {
    interval: Duration,
    budget: Duration,
    warmup_frames: usize,
    dark_threshold: f32,
}

/// Load models, build the reference set, open the camera, then start the
/// capture loop on a dedicated OS thread.
///
/// Every startup step fails fast; the loop only starts once the reference set
/// is complete.
pub fn spawn_engine(config: &Config) -> Result<(EngineHandle, std::thread::JoinHandle<()>), EngineError> {
    let greetings = match &config.greetings_file {
        Some(path) => GreetingTable::load(path)?,
        None => GreetingTable::default(),
    };
    let speech = SpeechParams {
        language: config.speech_language.clone(),
        ..SpeechParams::default()
    };
    let controller = CooldownController::new(config.cooldown_ms, config.match_threshold)
        .with_greetings(greetings)
        .with_speech(speech);

    let mut session: GreeterSession = Session::new(
        controller,
        ReferenceSetBuilder::new(config.images_per_identity),
        SystemClock,
    );

    let scrfd = config.scrfd_model_path();
    let arcface = config.arcface_model_path();
    let source = DirectoryImageSource::new(&config.reference_dir);
    let report = session.initialize(
        || OnnxAnalyzer::load(&scrfd, &arcface),
        &source,
        &config.identities,
        config.match_threshold,
    )?;
    if !report.omitted.is_empty() {
        tracing::warn!(omitted = ?report.omitted, "some identities have no reference data");
    }

    let camera = Camera::open(&config.camera_device, config.frame_width, config.frame_height)?;
    tracing::info!(
        device = %config.camera_device,
        width = camera.width,
        height = camera.height,
        "camera opened"
    );

    let sink: Box<dyn NotificationSink + Send> = if config.speech_enabled {
        Box::new(SpeechSink::default())
    } else {
        tracing::info!("speech disabled via FACEGREET_SPEECH_ENABLED=0");
        Box::new(LogSink)
    };

    let mut overlays: Vec<Box<dyn OverlayRenderer + Send>> = vec![Box::new(LogOverlay)];
    if let Some(path) = &config.overlay_path {
        tracing::info!(path = %path.display(), "writing overlay snapshots");
        overlays.push(Box::new(SnapshotOverlay::new(path.clone())));
    }

    let pacing = Pacing {
        interval: Duration::from_millis(config.frame_interval_ms),
        budget: Duration::from_millis(config.frame_budget_ms),
        warmup_frames: config.warmup_frames,
        dark_threshold: config.dark_threshold,
    };

    let (tx, rx) = mpsc::channel::<EngineRequest>(8);
    let join = std::thread::Builder::new()
        .name("facegreet-engine".into())
        .spawn(move || run_capture_loop(session, camera, sink, overlays, rx, pacing))
        .map_err(EngineError::Spawn)?;

    Ok((EngineHandle { tx }, join))
}

fn status_of(session: &GreeterSession) -> EngineStatus {
    EngineStatus {
        state: session.state(),
        identities: session.references().map(|r| r.summary()).unwrap_or_default(),
        stats: session.stats(),
        cooling_down: session.cooldowns().len(),
    }
}

/// Serve queued requests. Returns false once a stop was requested or every
/// handle is gone.
fn drain_requests(session: &mut GreeterSession, rx: &mut mpsc::Receiver<EngineRequest>) -> bool {
    loop {
        match rx.try_recv() {
            Ok(EngineRequest::Status { reply }) => {
                let _ = reply.send(status_of(session));
            }
            Ok(EngineRequest::ResetCooldowns { reply }) => {
                session.reset_cooldowns();
                let _ = reply.send(());
            }
            Ok(EngineRequest::Stop { reply }) => {
                session.stop();
                let _ = reply.send(());
                return false;
            }
            Err(TryRecvError::Empty) => return true,
            Err(TryRecvError::Disconnected) => return false,
        }
    }
}

/// Covered lens or a sensor still starting up: nothing to recognize.
fn should_analyze(frame: &Frame, dark_threshold: f32) -> bool {
    if frame.is_dark(dark_threshold) {
        tracing::debug!(seq = frame.sequence, brightness = frame.avg_brightness(), "skipping dark frame");
        return false;
    }
    true
}

fn run_capture_loop(
    mut session: GreeterSession,
    camera: Camera,
    mut sink: Box<dyn NotificationSink + Send>,
    mut overlays: Vec<Box<dyn OverlayRenderer + Send>>,
    mut rx: mpsc::Receiver<EngineRequest>,
    pacing: Pacing,
) {
    tracing::info!("engine thread started");

    let mut stream = match camera.stream() {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to start camera stream");
            session.stop();
            return;
        }
    };

    if pacing.warmup_frames > 0 {
        tracing::info!(count = pacing.warmup_frames, "discarding warmup frames");
        stream.discard(pacing.warmup_frames);
    }

    if let Err(e) = session.start_capture() {
        tracing::error!(error = %e, "capture could not start");
        return;
    }

    while drain_requests(&mut session, &mut rx) {
        let started = Instant::now();

        let frame = match stream.next_frame() {
            Ok(f) => f,
            Err(e) => {
                tracing::error!(error = %e, "camera capture failed; stopping");
                break;
            }
        };

        if should_analyze(&frame, pacing.dark_threshold) {
            match session.process_frame(&frame.image, sink.as_mut()) {
                Ok(report) => {
                    for overlay in overlays.iter_mut() {
                        overlay.render(&frame.image, &report);
                    }
                }
                // The frame is dropped; cooldowns were not touched.
                Err(e) => tracing::warn!(seq = frame.sequence, error = %e, "frame skipped"),
            }

            let latency = frame.timestamp.elapsed();
            if latency > pacing.budget {
                tracing::warn!(
                    seq = frame.sequence,
                    elapsed_ms = latency.as_millis() as u64,
                    "slow frame"
                );
            }
        }

        if let Some(rest) = pacing.interval.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    session.stop();
    tracing::info!(stats = ?session.stats(), "engine thread exiting");
}
