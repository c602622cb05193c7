//! # VeriFlow KYC
//!
//! Client-side orchestrator for a three-step KYC verification flow:
//! ID card capture + OCR confirmation, face matching, and blink-based
//! liveness detection.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      VERIFLOW KYC                        │
//! │  ┌─────────────┐  ┌──────────────┐  ┌────────────────┐  │
//! │  │  CAPTURE    │  │     FLOW     │  │    STATUS      │  │
//! │  │  CONTROLLER │  │ ORCHESTRATOR │  │   RECONCILER   │  │
//! │  └──────┬──────┘  └──────┬───────┘  └───────┬────────┘  │
//! │         │                │                  │           │
//! │  ┌──────┴────────────────┴──────────────────┴────────┐  │
//! │  │              VERIFICATION SESSION                 │  │
//! │  │    front / back / fields / selfie / liveness      │  │
//! │  └──────────────────┬────────────────┬───────────────┘  │
//! │                     │                │                  │
//! │           ┌─────────┴─────┐  ┌───────┴──────────┐       │
//! │           │  LOCAL STORE  │  │     GATEWAY      │       │
//! │           │   (SQLite)    │  │ (OCR/face/live)  │       │
//! │           └───────────────┘  └──────────────────┘       │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Flow Model
//!
//! - Steps unlock strictly in order; step 1 counts as complete only when
//!   the server verified the card AND the user confirmed the extracted data
//! - Every artifact write is durable before the step advances, so the flow
//!   resumes at the first incomplete step after a crash
//! - Remote status is re-fetched on every home entry and a failed fetch
//!   degrades to "unverified", never blocks the screen
//! - Policy rejections (face mismatch, failed liveness) loop the user back
//!   to the same step with a message naming the failed criterion

pub mod capture;
pub mod error;
pub mod flow;
pub mod gateway;
pub mod session;
pub mod status;
pub mod store;

pub use capture::{CaptureConfig, CaptureController, CameraDevice, GalleryPicker};
pub use error::{KycError, KycResult};
pub use flow::{FlowConfig, FlowOrchestrator, VerifyStep};
pub use gateway::{HttpGateway, RemoteVerifier, StaticToken, TokenProvider};
pub use session::{IdCardFields, ImageRef, LivenessPolicy, VerificationSession};
pub use status::{RemoteKycStatus, StatusView};
pub use store::VerificationStore;

/// VeriFlow KYC version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
