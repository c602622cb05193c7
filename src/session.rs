//! VeriFlow KYC - Verification Session Model
//!
//! The aggregate owned by the flow orchestrator: one session per
//! authenticated user, created on first entry to the flow, destroyed on
//! explicit cancel or full completion.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which artifact a capture belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureKind {
    /// Front of the ID card (portrait required)
    IdCardFront,
    /// Back of the ID card (portrait required)
    IdCardBack,
    /// Selfie for face matching
    Selfie,
    /// Liveness video (or still-image fallback)
    Liveness,
}

impl CaptureKind {
    /// ID-card captures must be portrait-oriented; selfie and liveness
    /// captures have no orientation constraint.
    pub fn requires_portrait(&self) -> bool {
        matches!(self, Self::IdCardFront | Self::IdCardBack)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IdCardFront => "id_card_front",
            Self::IdCardBack => "id_card_back",
            Self::Selfie => "selfie",
            Self::Liveness => "liveness",
        }
    }
}

/// Opaque handle to a captured image: local URI plus the server-side path
/// once uploaded. Never mutated - a retake replaces the whole ref.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Unique capture ID
    pub id: String,
    /// Local file path
    pub local_path: PathBuf,
    /// Server-side stored path (set after upload)
    pub stored_path: Option<String>,
    /// Capture timestamp
    pub captured_at: DateTime<Utc>,
}

impl ImageRef {
    pub fn new(local_path: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            local_path,
            stored_path: None,
            captured_at: Utc::now(),
        }
    }

    /// Returns a copy with the server-side path recorded
    pub fn with_stored_path(mut self, stored_path: String) -> Self {
        self.stored_path = Some(stored_path);
        self
    }
}

/// OCR-extracted ID card fields. User-editable: an edited value is trusted
/// as-is, never re-validated against the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdCardFields(BTreeMap<String, String>);

impl IdCardFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Merge back-side fields into this (front-side) map. Union semantics:
    /// a back-side field never overwrites a front-side field of the same
    /// name.
    pub fn merge_back_side(&mut self, back: IdCardFields) {
        for (name, value) in back.0 {
            self.0.entry(name).or_insert(value);
        }
    }
}

/// Liveness check outcome, derived from the gateway response and the
/// acceptance policy. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivenessOutcome {
    /// Liveness score from the backend (0.0 - 1.0)
    pub score: f64,
    /// Detected blink count
    pub blink_count: u32,
    /// Frames in which a face was detected
    pub frames_with_face: u32,
    /// True when a still image was submitted instead of a video
    pub submitted_as_image: bool,
    /// Final verdict per the acceptance policy
    pub verified: bool,
}

/// Liveness acceptance policy. The numeric threshold and blink minimum are
/// load-bearing business rules; they default to the backend's values and can
/// be overridden through configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessPolicy {
    /// Score must be strictly greater than this
    pub min_score: f64,
    /// Minimum blink count (MIN_BLINK_COUNT on the backend)
    pub min_blinks: u32,
    /// Whether a still-image submission auto-satisfies the blink
    /// requirement. This weakens the anti-spoofing guarantee; kept because
    /// some devices cannot record video.
    pub allow_image_fallback: bool,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            min_score: 0.7,
            min_blinks: 3,
            allow_image_fallback: true,
        }
    }
}

impl LivenessPolicy {
    /// `verified = score > min_score && (blink_count >= min_blinks || submitted_as_image)`
    pub fn evaluate(&self, score: f64, blink_count: u32, submitted_as_image: bool) -> bool {
        let image_pass = submitted_as_image && self.allow_image_fallback;
        score > self.min_score && (blink_count >= self.min_blinks || image_pass)
    }
}

/// The verification session aggregate. All mutation goes through the flow
/// orchestrator; UI layers only ever read this.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationSession {
    /// In-progress marker: set the instant a step screen is entered,
    /// cleared on completion, cancel, or flow-home entry
    pub active: bool,
    /// Front of ID card
    pub id_card_front: Option<ImageRef>,
    /// Back of ID card
    pub id_card_back: Option<ImageRef>,
    /// OCR-extracted (possibly user-edited) fields
    pub id_card_fields: Option<IdCardFields>,
    /// Set ONLY by the explicit confirm action, never inferred from
    /// server-side data
    pub id_card_confirmed: bool,
    /// Selfie used for face matching
    pub selfie: Option<ImageRef>,
    /// Face match result from the backend
    pub face_match: Option<bool>,
    /// Liveness outcome
    pub liveness: Option<LivenessOutcome>,
}

impl VerificationSession {
    /// Front side fully captured and processed: both the image ref and the
    /// extracted fields must be present. A crash between the two writes
    /// leaves the step incomplete, never an error.
    pub fn front_complete(&self) -> bool {
        self.id_card_front.is_some() && self.id_card_fields.is_some()
    }

    /// Back side captured (fields were merged at upload time)
    pub fn back_complete(&self) -> bool {
        self.front_complete() && self.id_card_back.is_some()
    }

    /// Liveness locally verified
    pub fn liveness_complete(&self) -> bool {
        self.liveness.as_ref().map(|l| l.verified).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_back_side_is_union() {
        let mut front = IdCardFields::new();
        front.set("id_number", "001");
        front.set("full_name", "Front Name");

        let mut back = IdCardFields::new();
        back.set("full_name", "Back Name");
        back.set("issue_date", "01/01/2020");

        front.merge_back_side(back);

        // Front-side value wins on collision
        assert_eq!(front.get("full_name"), Some("Front Name"));
        assert_eq!(front.get("id_number"), Some("001"));
        assert_eq!(front.get("issue_date"), Some("01/01/2020"));
    }

    #[test]
    fn test_liveness_policy_boundaries() {
        let policy = LivenessPolicy::default();

        // Exactly at threshold: strictly-greater comparison fails
        assert!(!policy.evaluate(0.70, 5, false));
        // Just above threshold with the minimum blinks
        assert!(policy.evaluate(0.7000001, 3, false));
        // High score but too few blinks
        assert!(!policy.evaluate(0.99, 2, false));
        // Image fallback bypasses the blink requirement
        assert!(policy.evaluate(0.9, 0, true));
        // ...but never the score threshold
        assert!(!policy.evaluate(0.5, 0, true));
    }

    #[test]
    fn test_image_fallback_can_be_disabled() {
        let policy = LivenessPolicy {
            allow_image_fallback: false,
            ..Default::default()
        };
        assert!(!policy.evaluate(0.9, 0, true));
        assert!(policy.evaluate(0.9, 3, true));
    }

    #[test]
    fn test_partial_session_is_incomplete() {
        let mut session = VerificationSession::default();
        session.id_card_front = Some(ImageRef::new("front.jpg".into()));
        // Fields missing: front step must read as incomplete
        assert!(!session.front_complete());

        session.id_card_fields = Some(IdCardFields::new());
        assert!(session.front_complete());
        assert!(!session.back_complete());
    }
}
