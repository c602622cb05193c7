//! VeriFlow KYC - Error Types

use thiserror::Error;

/// Result type for KYC flow operations
pub type KycResult<T> = Result<T, KycError>;

/// KYC flow error types
#[derive(Error, Debug)]
pub enum KycError {
    // ═══════════════════════════════════════════════════════════════
    // CAPTURE ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Camera capture failed: {0}")]
    CameraFailed(String),

    #[error("Gallery pick cancelled or failed: {0}")]
    GalleryFailed(String),

    #[error("ID card photo must be portrait-oriented ({width}x{height} is landscape)")]
    NonPortraitImage { width: u32, height: u32 },

    #[error("Recording was cancelled before completion")]
    RecordingCancelled,

    #[error("Image processing error: {0}")]
    ImageError(String),

    // ═══════════════════════════════════════════════════════════════
    // GATEWAY ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Server could not extract ID card data - photo needs retaking")]
    ExtractionFailed,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication expired - sign in again to continue")]
    AuthExpired,

    #[error("Server error (status {status})")]
    ServerError { status: u16 },

    // ═══════════════════════════════════════════════════════════════
    // POLICY REJECTIONS
    // ═══════════════════════════════════════════════════════════════

    #[error("Liveness check rejected: {reason}")]
    LivenessRejected { reason: String },

    #[error("Selfie does not match the ID card photo")]
    FaceMismatch { message: Option<String> },

    // ═══════════════════════════════════════════════════════════════
    // FLOW ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Step not unlocked yet: {0}")]
    StepLocked(String),

    #[error("Step already completed: {0}")]
    StepAlreadyComplete(String),

    #[error("No capture available to submit")]
    NothingCaptured,

    // ═══════════════════════════════════════════════════════════════
    // STORE / SERIALIZATION ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl KycError {
    /// Errors fixed by retaking the photo (no session state is lost)
    pub fn is_recoverable_by_retake(&self) -> bool {
        matches!(
            self,
            KycError::ExtractionFailed
                | KycError::NonPortraitImage { .. }
                | KycError::CameraFailed(_)
        )
    }

    /// Errors fixed by re-tapping the action (transient, manual retry)
    pub fn is_recoverable_by_retry(&self) -> bool {
        matches!(self, KycError::Network(_) | KycError::ServerError { .. })
    }

    /// Policy rejections: user is looped back to the same step with an
    /// explanation naming the failed criterion
    pub fn is_policy_rejection(&self) -> bool {
        matches!(
            self,
            KycError::LivenessRejected { .. } | KycError::FaceMismatch { .. }
        )
    }

    /// Fatal: session must be cleared and control returned to sign-in.
    /// Verification artifacts are preserved for resumption.
    pub fn is_fatal(&self) -> bool {
        matches!(self, KycError::AuthExpired)
    }

    /// Curated user-facing message. Backend payload details are logged,
    /// never surfaced verbatim.
    pub fn user_message(&self) -> String {
        match self {
            KycError::ExtractionFailed => {
                "Could not read your ID card. Please retake the photo with better lighting.".into()
            }
            KycError::NonPortraitImage { .. } => {
                "Please photograph your ID card in portrait orientation. Rotate your phone and try again.".into()
            }
            KycError::CameraFailed(_) => {
                "Could not take the photo. Please try again or pick one from your gallery.".into()
            }
            KycError::GalleryFailed(_) => "Could not pick the image. Please try again.".into(),
            KycError::AuthExpired => "Your session has expired. Please sign in again.".into(),
            KycError::Network(_) | KycError::ServerError { .. } => {
                "Could not reach the verification server. Please try again later.".into()
            }
            KycError::LivenessRejected { reason } => format!("Verification failed: {reason}"),
            KycError::FaceMismatch { .. } => {
                "The selfie does not match the face on your ID card. Please retake the selfie \
                 with good lighting and make sure you are using your own ID."
                    .into()
            }
            other => other.to_string(),
        }
    }
}

impl From<rusqlite::Error> for KycError {
    fn from(e: rusqlite::Error) -> Self {
        KycError::StoreError(e.to_string())
    }
}

impl From<serde_json::Error> for KycError {
    fn from(e: serde_json::Error) -> Self {
        KycError::SerializationError(e.to_string())
    }
}

impl From<image::ImageError> for KycError {
    fn from(e: image::ImageError) -> Self {
        KycError::ImageError(e.to_string())
    }
}
