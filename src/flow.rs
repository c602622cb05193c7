//! VeriFlow KYC - Flow Orchestrator
//!
//! The state machine at the heart of the flow: computes the current step,
//! enforces step ordering and gating, merges remote status with local
//! confirmation flags, and drives every transition. UI layers are dumb
//! subscribers - they read `current_step()` and call the explicit step
//! methods, never deciding transitions themselves.
//!
//! All methods take `&mut self`: no two gateway calls for one session ever
//! run concurrently, and a step's action is naturally unavailable while its
//! own call is outstanding.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::capture::CaptureConfig;
use crate::error::{KycError, KycResult};
use crate::gateway::{LivenessReport, RemoteVerifier};
use crate::session::{IdCardFields, ImageRef, LivenessOutcome, LivenessPolicy, VerificationSession};
use crate::status::{self, StatusView};
use crate::store::VerificationStore;

/// Flow steps, in order. `Cancelled` is terminal and reachable from any
/// non-completed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerifyStep {
    NotStarted,
    IdCardFront,
    IdCardBack,
    IdCardConfirm,
    FaceVerification,
    Liveness,
    Completed,
    Cancelled,
}

impl VerifyStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::IdCardFront => "id_card_front",
            Self::IdCardBack => "id_card_back",
            Self::IdCardConfirm => "id_card_confirm",
            Self::FaceVerification => "face_verification",
            Self::Liveness => "liveness",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Flow configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Liveness acceptance policy
    pub liveness: LivenessPolicy,
    /// Capture tuning
    pub capture: CaptureConfig,
}

/// Flow Orchestrator - owns the `VerificationSession` and is the only
/// boundary through which it is mutated.
pub struct FlowOrchestrator {
    store: VerificationStore,
    gateway: Arc<dyn RemoteVerifier>,
    policy: LivenessPolicy,
    session: VerificationSession,
    step: VerifyStep,
    view: StatusView,
}

impl FlowOrchestrator {
    /// Build the orchestrator, resuming any persisted session. Partial
    /// state (crash between two key writes) resumes at the first
    /// incomplete step.
    pub fn new(
        store: VerificationStore,
        gateway: Arc<dyn RemoteVerifier>,
        config: FlowConfig,
    ) -> KycResult<Self> {
        let session = store.load_session()?;
        Ok(Self {
            store,
            gateway,
            policy: config.liveness,
            session,
            step: VerifyStep::NotStarted,
            view: StatusView::default(),
        })
    }

    pub fn current_step(&self) -> VerifyStep {
        self.step
    }

    pub fn session(&self) -> &VerificationSession {
        &self.session
    }

    /// The merged status view from the last home-screen reconcile
    pub fn status_view(&self) -> StatusView {
        self.view
    }

    // ═══════════════════════════════════════════════════════════════════════
    // HOME SCREEN
    // ═══════════════════════════════════════════════════════════════════════

    /// (Re)entry to the flow home screen: re-fetch remote status, reconcile
    /// with local confirmation, clear the in-progress marker.
    pub async fn enter_home(&mut self) -> KycResult<StatusView> {
        self.view = status::reconcile(self.gateway.as_ref(), &self.store).await?;
        self.session = self.store.load_session()?;
        self.step = if self.view.fully_verified() {
            VerifyStep::Completed
        } else {
            VerifyStep::NotStarted
        };
        Ok(self.view)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // STEP ENTRY (gating)
    // ═══════════════════════════════════════════════════════════════════════

    /// Step 1: "verify ID card". Resumes at the first incomplete sub-step.
    pub fn start_id_card(&mut self) -> KycResult<VerifyStep> {
        if self.view.id_card_complete {
            return Err(KycError::StepAlreadyComplete("id card".into()));
        }
        self.store.set_active_flag(true)?;
        self.session.active = true;
        self.step = if self.session.back_complete() {
            VerifyStep::IdCardConfirm
        } else if self.session.front_complete() {
            VerifyStep::IdCardBack
        } else {
            VerifyStep::IdCardFront
        };
        Ok(self.step)
    }

    /// Step 2: face verification. Reachable only when step 1 is
    /// effectively complete (remote flag AND local confirmation).
    pub fn start_face(&mut self) -> KycResult<VerifyStep> {
        if self.view.face_complete {
            return Err(KycError::StepAlreadyComplete("face verification".into()));
        }
        if !self.view.id_card_complete {
            return Err(KycError::StepLocked(
                "complete ID card verification first".into(),
            ));
        }
        self.store.set_active_flag(true)?;
        self.session.active = true;
        self.step = VerifyStep::FaceVerification;
        Ok(self.step)
    }

    /// Step 3: liveness. Reachable only when steps 1 and 2 are both
    /// effectively complete.
    pub fn start_liveness(&mut self) -> KycResult<VerifyStep> {
        if self.view.liveness_complete {
            return Err(KycError::StepAlreadyComplete("liveness".into()));
        }
        if !self.view.id_card_complete {
            return Err(KycError::StepLocked(
                "complete ID card verification first".into(),
            ));
        }
        if !self.view.face_complete {
            return Err(KycError::StepLocked(
                "complete face verification first".into(),
            ));
        }
        self.store.set_active_flag(true)?;
        self.session.active = true;
        self.step = VerifyStep::Liveness;
        Ok(self.step)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ID CARD
    // ═══════════════════════════════════════════════════════════════════════

    /// Upload the front of the ID card and persist the extracted fields.
    /// Image path is written before the field map; a crash in between
    /// leaves this step incomplete on resume.
    pub async fn submit_front(&mut self, image: ImageRef) -> KycResult<&IdCardFields> {
        self.ensure_step(VerifyStep::IdCardFront)?;

        let extraction = self
            .gateway
            .upload_and_extract(&image.local_path, true)
            .await?;

        let image = match extraction.stored_path {
            Some(path) => image.with_stored_path(path),
            None => image,
        };
        self.store.set_front_image(&image)?;
        self.store.set_id_card_fields(&extraction.fields)?;

        self.session.id_card_front = Some(image);
        self.step = VerifyStep::IdCardBack;
        log::info!("ID card front processed, moving to back side");
        Ok(self.session.id_card_fields.insert(extraction.fields))
    }

    /// Upload the back of the ID card and merge its fields into the stored
    /// map. Union semantics: a back-side field never overwrites a
    /// front-side field of the same name.
    pub async fn submit_back(&mut self, image: ImageRef) -> KycResult<&IdCardFields> {
        self.ensure_step(VerifyStep::IdCardBack)?;

        let extraction = self
            .gateway
            .upload_and_extract(&image.local_path, false)
            .await?;

        let image = match extraction.stored_path {
            Some(path) => image.with_stored_path(path),
            None => image,
        };
        let mut fields = self.session.id_card_fields.clone().unwrap_or_default();
        fields.merge_back_side(extraction.fields);

        self.store.set_back_image(&image)?;
        self.store.set_id_card_fields(&fields)?;

        self.session.id_card_back = Some(image);
        self.step = VerifyStep::IdCardConfirm;
        log::info!("ID card back processed, awaiting user confirmation");
        Ok(self.session.id_card_fields.insert(fields))
    }

    /// Explicit user confirmation of the (possibly edited) field map. This
    /// is the ONLY place `id_card_confirmed` is ever set; edited values are
    /// trusted as-is, without re-invoking OCR.
    pub fn confirm_id_card(&mut self, edited: IdCardFields) -> KycResult<()> {
        self.ensure_step(VerifyStep::IdCardConfirm)?;

        self.store.set_id_card_fields(&edited)?;
        self.store.set_id_card_confirmed(true)?;

        self.session.id_card_fields = Some(edited);
        self.session.id_card_confirmed = true;
        self.step = VerifyStep::FaceVerification;
        log::info!("ID card data confirmed by user");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // FACE + LIVENESS
    // ═══════════════════════════════════════════════════════════════════════

    /// Submit the selfie for face matching. A mismatch keeps the flow on
    /// this step (self-loop, unlimited manual retries).
    pub async fn submit_selfie(&mut self, image: ImageRef) -> KycResult<()> {
        self.ensure_step(VerifyStep::FaceVerification)?;

        let outcome = self.gateway.match_face(&image.local_path).await?;
        if !outcome.matched {
            self.session.face_match = Some(false);
            log::warn!("face match rejected: {:?}", outcome.message);
            return Err(KycError::FaceMismatch {
                message: outcome.message,
            });
        }

        self.store.set_selfie(&image)?;
        self.session.selfie = Some(image);
        self.session.face_match = Some(true);
        self.step = VerifyStep::Liveness;
        log::info!("face match accepted, moving to liveness");
        Ok(())
    }

    /// Submit the liveness recording (or still-image fallback) and apply
    /// the acceptance policy. Success completes the flow: the in-progress
    /// marker and local step flags are cleared, and remote status becomes
    /// the source of truth.
    pub async fn submit_liveness(
        &mut self,
        artifact: ImageRef,
        as_image: bool,
    ) -> KycResult<LivenessOutcome> {
        self.ensure_step(VerifyStep::Liveness)?;

        let report = self
            .gateway
            .check_liveness(&artifact.local_path, as_image)
            .await?;

        let verified = self.policy.evaluate(report.score, report.blink_count, as_image);
        let outcome = LivenessOutcome {
            score: report.score,
            blink_count: report.blink_count,
            frames_with_face: report.frames_with_face,
            submitted_as_image: as_image,
            verified,
        };

        if !verified {
            let reason = self.rejection_reason(&report);
            log::warn!(
                "liveness rejected: score={} blinks={} frames={} reason={reason}",
                report.score,
                report.blink_count,
                report.frames_with_face
            );
            self.session.liveness = Some(outcome);
            return Err(KycError::LivenessRejected { reason });
        }

        self.store.clear_session()?;
        self.session = VerificationSession {
            liveness: Some(outcome.clone()),
            ..Default::default()
        };
        self.step = VerifyStep::Completed;
        log::info!(
            "liveness verified (score={}, blinks={}), flow complete",
            outcome.score,
            outcome.blink_count
        );
        Ok(outcome)
    }

    /// User backs out: clear the in-progress marker only. Captured
    /// artifacts stay cached for resumption and `id_card_confirmed` is
    /// untouched.
    pub fn cancel(&mut self) -> KycResult<()> {
        self.store.set_active_flag(false)?;
        self.session.active = false;
        self.step = VerifyStep::Cancelled;
        log::info!("verification cancelled by user");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // HELPERS
    // ═══════════════════════════════════════════════════════════════════════

    fn ensure_step(&self, expected: VerifyStep) -> KycResult<()> {
        if self.step != expected {
            return Err(KycError::StepLocked(format!(
                "expected step {}, currently {}",
                expected.as_str(),
                self.step.as_str()
            )));
        }
        Ok(())
    }

    /// Name the specific failed criterion for the user
    fn rejection_reason(&self, report: &LivenessReport) -> String {
        if report.blink_count == 0 {
            "no blink was detected. Blink slowly and completely, with both eyes.".into()
        } else if report.frames_with_face < 10 {
            "your face was not visible in enough frames. Keep your face inside the frame.".into()
        } else if report.score <= self.policy.min_score {
            format!(
                "liveness score {:.2} is below the required threshold. Try again in better lighting.",
                report.score
            )
        } else if report.blink_count < self.policy.min_blinks {
            format!(
                "only {} blink(s) detected, {} required.",
                report.blink_count, self.policy.min_blinks
            )
        } else {
            report
                .rejection_reason
                .clone()
                .unwrap_or_else(|| "please try again with your face centered and well lit.".into())
        }
    }
}
