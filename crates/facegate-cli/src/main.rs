use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::{
    DetectionSample, EnrolledIdentity, EmbeddingRepository, MatchEvaluator, MatchThresholds,
};
use facegate_hw::{Camera, Frame, FrameVerdict, QualityGate};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[zbus::proxy(
    interface = "org.facegate.Gate1",
    default_service = "org.facegate.Gate1",
    default_path = "/org/facegate/Gate1"
)]
trait Gate {
    async fn dismiss(&self) -> zbus::Result<bool>;
    async fn restart_camera(&self) -> zbus::Result<()>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "facegate", about = "Facegate access-control CLI")]
struct Cli {
    /// Talk to the daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// Clear the decision currently shown
    Dismiss,
    /// Restart the camera stream
    Restart,
    /// Run the frame quality gate on an image file
    CheckFrame {
        image: PathBuf,
        #[arg(long, default_value_t = facegate_hw::quality::DEFAULT_DARK_THRESHOLD)]
        dark_threshold: f32,
        #[arg(long, default_value_t = facegate_hw::quality::DEFAULT_FLATNESS_THRESHOLD)]
        flatness_threshold: f32,
    },
    /// List V4L2 capture devices
    Devices,
    /// Evaluate detection samples against a gallery offline
    Evaluate {
        /// JSON array of {name, embedding}
        #[arg(long)]
        gallery: PathBuf,
        /// JSON array of {embedding, confidence}
        #[arg(long)]
        samples: PathBuf,
        /// Acceptance threshold (Euclidean distance)
        #[arg(long)]
        threshold: Option<f32>,
    },
}

async fn proxy(session: bool) -> Result<GateProxy<'static>> {
    let conn = if session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("failed to connect to D-Bus")?;
    GateProxy::new(&conn).await.context("facegated is not reachable")
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn check_frame(path: &Path, gate: &QualityGate) -> Result<FrameVerdict> {
    let gray = image::open(path)
        .with_context(|| format!("decoding {}", path.display()))?
        .to_luma8();
    let (width, height) = gray.dimensions();
    let frame = Frame {
        data: gray.into_raw(),
        width,
        height,
        timestamp: std::time::Instant::now(),
        sequence: 0,
    };
    Ok(gate.inspect(&frame, width, height))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Status => {
            let json = proxy(cli.session).await?.status().await?;
            let value: serde_json::Value = serde_json::from_str(&json)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::Dismiss => {
            if proxy(cli.session).await?.dismiss().await? {
                println!("Decision dismissed");
            } else {
                println!("No decision showing");
            }
        }
        Commands::Restart => {
            proxy(cli.session).await?.restart_camera().await?;
            println!("Camera restarted");
        }
        Commands::CheckFrame { image, dark_threshold, flatness_threshold } => {
            let gate = QualityGate::new(dark_threshold, flatness_threshold);
            match check_frame(&image, &gate)? {
                FrameVerdict::Usable(stats) => println!(
                    "usable: mean luma {:.1}, variance {:.1} ({} samples)",
                    stats.mean, stats.variance, stats.samples
                ),
                FrameVerdict::NotReady => println!("not ready: empty or incomplete frame"),
                FrameVerdict::Occluded { mean_luma } => {
                    println!("occluded: mean luma {mean_luma:.1} < {dark_threshold}")
                }
                FrameVerdict::Static { variance } => {
                    println!("static: luma variance {variance:.1} < {flatness_threshold}")
                }
            }
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
        Commands::Evaluate { gallery, samples, threshold } => {
            let gallery: Vec<EnrolledIdentity> = read_json(&gallery)?;
            let samples: Vec<DetectionSample> = read_json(&samples)?;
            let mut thresholds = MatchThresholds::default();
            if let Some(t) = threshold {
                thresholds.acceptance_threshold = t;
            }

            let evaluator = MatchEvaluator::new(Arc::new(EmbeddingRepository::new(gallery)), thresholds);
            let evaluation = evaluator.evaluate(&samples);
            println!("{}", evaluation.decision.display_text());
            if let Some(result) = &evaluation.result {
                println!(
                    "best: {} (distance {:.4}, similarity {:.4}, threshold {})",
                    result.best_name,
                    result.best_distance,
                    result.best_similarity(),
                    thresholds.acceptance_threshold
                );
                for m in &result.competing_matches {
                    println!("  {:<24} {:.4}", m.name, m.similarity);
                }
            }
        }
    }

    Ok(())
}
