use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use facegreet_core::recognizer::ARCFACE_MATCH_THRESHOLD;
use facegreet_core::reference::{BuildReport, DEFAULT_IMAGES_PER_IDENTITY};
use facegreet_core::{
    CooldownController, CooldownState, DirectoryImageSource, FaceAnalyzer, FaceMatcher,
    OnnxAnalyzer, ReferenceSet, ReferenceSetBuilder,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "facegreet", about = "facegreet face recognition and greeting CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the reference set offline and report skipped images
    References(ReferenceArgs),
    /// Match every face in one image file against the reference set
    Match {
        /// Image file to analyze
        image: PathBuf,
        #[command(flatten)]
        refs: ReferenceArgs,
        /// Euclidean distance threshold for a positive match
        #[arg(short, long, default_value_t = ARCFACE_MATCH_THRESHOLD, value_parser = parse_threshold)]
        threshold: f32,
    },
    /// Show daemon status
    Status(BusArgs),
    /// List identities loaded by the daemon
    Identities(BusArgs),
    /// Clear the daemon's greeting cooldowns
    ResetCooldowns(BusArgs),
    /// List V4L2 capture devices
    Devices,
}

#[derive(Args)]
struct ReferenceArgs {
    /// Directory holding `<identity>/<n>.jpg`
    #[arg(long, default_value = "labeled_images")]
    reference_dir: PathBuf,
    /// Directory holding det_10g.onnx and w600k_r50.onnx
    #[arg(long)]
    model_dir: Option<PathBuf>,
    /// Comma-separated identities, in match-priority order
    #[arg(long, value_delimiter = ',', default_value = "badhusha,abhishek")]
    identities: Vec<String>,
    /// Candidate images tried per identity
    #[arg(long, default_value_t = DEFAULT_IMAGES_PER_IDENTITY)]
    images_per_identity: usize,
}

#[derive(Args)]
struct BusArgs {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long)]
    session_bus: bool,
}

#[zbus::proxy(
    interface = "org.facegreet.Daemon1",
    default_service = "org.facegreet.Daemon1",
    default_path = "/org/facegreet/Daemon1"
)]
trait Daemon {
    async fn status(&self) -> zbus::Result<String>;
    async fn list_identities(&self) -> zbus::Result<String>;
    async fn reset_cooldowns(&self) -> zbus::Result<bool>;
}

impl ReferenceArgs {
    fn load_analyzer(&self) -> Result<OnnxAnalyzer> {
        let model_dir = self
            .model_dir
            .clone()
            .unwrap_or_else(facegreet_core::default_model_dir);
        OnnxAnalyzer::load_from_dir(&model_dir)
            .with_context(|| format!("failed to load models from {}", model_dir.display()))
    }

    fn build(&self, analyzer: &mut OnnxAnalyzer) -> Result<(ReferenceSet, BuildReport)> {
        let source = DirectoryImageSource::new(&self.reference_dir);
        let identities: Vec<String> = self
            .identities
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        ReferenceSetBuilder::new(self.images_per_identity)
            .build(&identities, &source, analyzer)
            .with_context(|| {
                format!("no reference data under {}", self.reference_dir.display())
            })
    }
}

fn parse_threshold(raw: &str) -> Result<f32, String> {
    let value: f32 = raw.parse().map_err(|e| format!("{e}"))?;
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(format!("threshold must be finite and above zero, got {raw}"))
    }
}

fn print_report(set: &ReferenceSet, report: &BuildReport) {
    for summary in set.summary() {
        println!("{:<20} {} descriptor(s)", summary.identity, summary.descriptors);
    }
    for skipped in &report.skipped {
        println!("skipped {}/{}: {}", skipped.identity, skipped.index, skipped.reason);
    }
    for identity in &report.omitted {
        println!("omitted {identity}: no usable reference image");
    }
    for identity in &report.duplicates {
        println!("duplicate {identity}: listed more than once");
    }
}

async fn daemon(bus: &BusArgs) -> Result<DaemonProxy<'static>> {
    let conn = if bus.session_bus {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("failed to connect to D-Bus")?;
    DaemonProxy::new(&conn)
        .await
        .context("facegreetd is not reachable")
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::References(refs) => {
            let mut analyzer = refs.load_analyzer()?;
            let (set, report) = refs.build(&mut analyzer)?;
            print_report(&set, &report);
        }
        Commands::Match {
            image,
            refs,
            threshold,
        } => {
            let mut analyzer = refs.load_analyzer()?;
            let (set, _) = refs.build(&mut analyzer)?;
            let matcher = FaceMatcher::new(set, threshold);

            let frame = image::open(&image)
                .with_context(|| format!("failed to open {}", image.display()))?
                .to_rgb8();
            let faces = analyzer.detect_all(&frame)?;
            if faces.is_empty() {
                println!("no face detected");
                return Ok(());
            }

            let controller = CooldownController::new(
                facegreet_core::cooldown::DEFAULT_COOLDOWN_MS,
                threshold,
            );
            let mut state = CooldownState::new();
            for face in &faces {
                let result = matcher.best_match(&face.descriptor);
                println!(
                    "{result} at ({:.0}, {:.0}) {:.0}x{:.0}",
                    face.bbox.x, face.bbox.y, face.bbox.width, face.bbox.height
                );
                if let Some(n) = controller.decide(&result, &mut state, 0) {
                    println!("  greeting: {}", n.message);
                }
            }
        }
        Commands::Status(bus) => {
            let proxy = daemon(&bus).await?;
            print_json(&proxy.status().await?)?;
        }
        Commands::Identities(bus) => {
            let proxy = daemon(&bus).await?;
            print_json(&proxy.list_identities().await?)?;
        }
        Commands::ResetCooldowns(bus) => {
            let proxy = daemon(&bus).await?;
            if proxy.reset_cooldowns().await? {
                println!("cooldowns cleared");
            }
        }
        Commands::Devices => {
            let devices = facegreet_hw::Camera::list_devices();
            if devices.is_empty() {
                println!("no V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_threshold() {
        assert_eq!(parse_threshold("0.8"), Ok(0.8));
        assert!(parse_threshold("NaN").is_err());
        assert!(parse_threshold("-1").is_err());
        assert!(parse_threshold("0").is_err());
        assert!(parse_threshold("close").is_err());
    }

    #[test]
    fn test_match_defaults_to_arcface_threshold() {
        let cli = Cli::try_parse_from(["facegreet", "match", "face.jpg"]).unwrap();
        match cli.command {
            Commands::Match { threshold, .. } => assert_eq!(threshold, ARCFACE_MATCH_THRESHOLD),
            _ => panic!("expected match subcommand"),
        }
    }
}
