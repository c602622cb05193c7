//! VeriFlow KYC - CLI
//!
//! Command-line driver for the verification flow. Camera and gallery are
//! backed by files on disk; each invocation enters the flow home (which
//! re-fetches remote status) and then performs one step action, the same
//! shape a UI shell would drive the orchestrator in.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use veriflow_kyc::capture::CapturedFrame;
use veriflow_kyc::session::CaptureKind;
use veriflow_kyc::{
    CameraDevice, CaptureController, FlowConfig, FlowOrchestrator, GalleryPicker, HttpGateway,
    IdCardFields, ImageRef, KycError, KycResult, StaticToken, VerificationStore, VerifyStep,
};

#[derive(Parser)]
#[command(name = "veriflow")]
#[command(version = veriflow_kyc::VERSION)]
#[command(about = "VeriFlow KYC - ID card, face match and liveness verification flow")]
struct Cli {
    /// Local store directory
    #[arg(short, long, default_value = "./veriflow_data")]
    store: PathBuf,

    /// Verification server base URL
    #[arg(long, default_value = "http://localhost:5000")]
    server: String,

    /// Bearer token (falls back to VERIFLOW_TOKEN)
    #[arg(long)]
    token: Option<String>,

    /// User the session is scoped to
    #[arg(short, long, default_value = "default")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show verification status
    Status,

    /// Capture and submit the front of the ID card
    IdFront {
        /// Image path
        path: PathBuf,

        /// Treat the path as a gallery pick (no capture retry)
        #[arg(short, long)]
        gallery: bool,
    },

    /// Capture and submit the back of the ID card
    IdBack {
        /// Image path
        path: PathBuf,

        /// Treat the path as a gallery pick (no capture retry)
        #[arg(short, long)]
        gallery: bool,
    },

    /// Confirm the extracted ID card data
    Confirm {
        /// Field overrides as name=value (repeatable)
        #[arg(short, long)]
        field: Vec<String>,
    },

    /// Capture and submit the selfie for face matching
    Selfie {
        /// Image path
        path: PathBuf,
    },

    /// Record and submit the liveness check
    Liveness {
        /// Video (or image) path
        path: PathBuf,

        /// Submit a still image instead of a video
        #[arg(short, long)]
        image: bool,
    },

    /// Cancel the in-progress verification
    Cancel,
}

/// Camera backed by a file on disk
struct FileCamera {
    path: PathBuf,
    video: bool,
}

impl FileCamera {
    fn read_frame(&self) -> KycResult<CapturedFrame> {
        Ok(CapturedFrame {
            path: self.path.clone(),
            data: std::fs::read(&self.path)?,
        })
    }
}

impl CameraDevice for FileCamera {
    fn take_picture(&mut self, _quality: f32) -> KycResult<CapturedFrame> {
        self.read_frame()
    }

    fn record_video(&mut self, _max_seconds: u32) -> KycResult<CapturedFrame> {
        self.read_frame()
    }

    fn stop_recording(&mut self) {}

    fn supports_video(&self) -> bool {
        self.video
    }
}

/// Gallery backed by a file on disk
struct FileGallery {
    path: PathBuf,
}

impl GalleryPicker for FileGallery {
    fn pick_image(&mut self) -> KycResult<CapturedFrame> {
        Ok(CapturedFrame {
            path: self.path.clone(),
            data: std::fs::read(&self.path)?,
        })
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e.user_message());
        log::debug!("failure detail: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> KycResult<()> {
    let token = cli
        .token
        .clone()
        .or_else(|| std::env::var("VERIFLOW_TOKEN").ok())
        .unwrap_or_default();

    let store = VerificationStore::open(&cli.store, &cli.user)?;
    let gateway = Arc::new(HttpGateway::new(&cli.server, Arc::new(StaticToken::new(token)))?);
    let config = FlowConfig::default();
    let controller = CaptureController::new(config.capture.clone());
    let mut flow = FlowOrchestrator::new(store, gateway, config)?;

    match cli.command {
        Commands::Status => {
            let view = flow.enter_home().await?;
            println!("📋 Verification status for '{}'", cli.user);
            println!("{:-<44}", "");
            println!("  1. ID card:   {}", mark(view.id_card_complete));
            println!("  2. Face:      {}", mark(view.face_complete));
            println!("  3. Liveness:  {}", mark(view.liveness_complete));
            if view.fully_verified() {
                println!("✅ Fully verified!");
            }
        }

        Commands::IdFront { path, gallery } => {
            flow.enter_home().await?;
            let step = flow.start_id_card()?;
            if step != VerifyStep::IdCardFront {
                println!("⏭️  Front side already done, resuming at {}", step.as_str());
                return Ok(());
            }

            let image = acquire(&controller, &path, gallery, CaptureKind::IdCardFront)?;
            println!("📤 Uploading front of ID card...");
            let fields = flow.submit_front(image).await?;
            print_fields(fields);
            println!("➡️  Next: submit the back side (veriflow id-back <path>)");
        }

        Commands::IdBack { path, gallery } => {
            flow.enter_home().await?;
            let step = flow.start_id_card()?;
            if step != VerifyStep::IdCardBack {
                return Err(KycError::StepLocked(format!(
                    "expected the back-side step, currently at {}",
                    step.as_str()
                )));
            }

            let image = acquire(&controller, &path, gallery, CaptureKind::IdCardBack)?;
            println!("📤 Uploading back of ID card...");
            let fields = flow.submit_back(image).await?;
            print_fields(fields);
            println!("➡️  Next: confirm the data (veriflow confirm [-f name=value])");
        }

        Commands::Confirm { field } => {
            flow.enter_home().await?;
            let step = flow.start_id_card()?;
            if step != VerifyStep::IdCardConfirm {
                return Err(KycError::StepLocked(format!(
                    "nothing to confirm yet, currently at {}",
                    step.as_str()
                )));
            }

            let mut fields = flow
                .session()
                .id_card_fields
                .clone()
                .unwrap_or_else(IdCardFields::new);
            for pair in &field {
                match pair.split_once('=') {
                    Some((name, value)) => fields.set(name.trim(), value.trim()),
                    None => {
                        return Err(KycError::StepLocked(format!(
                            "field override '{pair}' is not name=value"
                        )))
                    }
                }
            }

            flow.confirm_id_card(fields)?;
            println!("✅ ID card data confirmed");
            println!("➡️  Next: take a selfie (veriflow selfie <path>)");
        }

        Commands::Selfie { path } => {
            flow.enter_home().await?;
            flow.start_face()?;

            let mut camera = FileCamera {
                path,
                video: false,
            };
            let image = controller.capture_from_camera(&mut camera, CaptureKind::Selfie)?;
            println!("📤 Matching selfie against ID card photo...");
            flow.submit_selfie(image).await?;
            println!("✅ Face match accepted");
            println!("➡️  Next: liveness check (veriflow liveness <path>)");
        }

        Commands::Liveness { path, image } => {
            flow.enter_home().await?;
            flow.start_liveness()?;

            let mut camera = FileCamera {
                path,
                video: !image,
            };
            let (artifact, as_image) = controller.capture_liveness(&mut camera)?;
            println!("📤 Submitting liveness {}...", if as_image { "image" } else { "video" });
            let outcome = flow.submit_liveness(artifact, as_image).await?;
            println!(
                "✅ Liveness verified (score {:.2}, {} blinks)",
                outcome.score, outcome.blink_count
            );
            println!("🎉 Verification complete!");
        }

        Commands::Cancel => {
            flow.cancel()?;
            println!("🚪 Verification cancelled. Captured artifacts are kept for resumption.");
        }
    }

    Ok(())
}

fn acquire(
    controller: &CaptureController,
    path: &PathBuf,
    gallery: bool,
    kind: CaptureKind,
) -> KycResult<ImageRef> {
    if gallery {
        controller.pick_from_gallery(&mut FileGallery { path: path.clone() }, kind)
    } else {
        let mut camera = FileCamera {
            path: path.clone(),
            video: false,
        };
        controller.capture_from_camera(&mut camera, kind)
    }
}

fn print_fields(fields: &IdCardFields) {
    if fields.is_empty() {
        println!("⚠️  No fields extracted");
        return;
    }
    println!("📄 Extracted fields ({}):", fields.len());
    for (name, value) in fields.iter() {
        println!("   {name}: {value}");
    }
}

fn mark(done: bool) -> &'static str {
    if done {
        "✅ verified"
    } else {
        "⬜ pending"
    }
}
