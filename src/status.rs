//! VeriFlow KYC - Status Reconciler
//!
//! Merges server truth (what the backend has durably verified) with local
//! truth (what the user has actively confirmed) into one authoritative view,
//! and clears stale in-progress markers on entry to the flow home screen.

use serde::{Deserialize, Serialize};

use crate::error::KycResult;
use crate::gateway::RemoteVerifier;
use crate::store::VerificationStore;

/// ID card / liveness status snapshot from `GET /kyc/status`.
/// Not owned locally - re-fetched every time the flow home is entered.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RemoteKycStatus {
    #[serde(default)]
    pub id_card_verified: bool,
    #[serde(default)]
    pub liveness_verified: bool,
}

/// Face-match status snapshot from `GET /face-verification/status`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FaceVerificationStatus {
    #[serde(default)]
    pub face_verified: bool,
    #[serde(default)]
    pub face_match: bool,
    #[serde(default)]
    pub selfie_uploaded: bool,
}

/// The authoritative per-step view shown to the surrounding UI.
///
/// "Effective" means server-reported AND locally confirmed where a local
/// confirmation exists (ID card only; face and liveness have none).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StatusView {
    /// Step 1: remote id_card_verified && local id_card_confirmed
    pub id_card_complete: bool,
    /// Step 2: remote face_match
    pub face_complete: bool,
    /// Step 3: remote liveness_verified
    pub liveness_complete: bool,
}

impl StatusView {
    pub fn merge(remote: RemoteKycStatus, face: FaceVerificationStatus, confirmed: bool) -> Self {
        Self {
            id_card_complete: remote.id_card_verified && confirmed,
            face_complete: face.face_match,
            liveness_complete: remote.liveness_verified,
        }
    }

    pub fn fully_verified(&self) -> bool {
        self.id_card_complete && self.face_complete && self.liveness_complete
    }
}

/// Reconcile on flow-home entry:
/// 1. fetch both status endpoints concurrently (a failed fetch degrades to
///    all-false flags rather than erroring the home screen),
/// 2. clear the active flag unconditionally (home entry means "not
///    mid-step"),
/// 3. if the active flag was already false before this visit, clear the
///    ID-card confirmation too - the user left the flow without being in a
///    step, so stale confirmation must not persist into this session.
pub async fn reconcile(
    gateway: &dyn RemoteVerifier,
    store: &VerificationStore,
) -> KycResult<StatusView> {
    let (kyc_status, face_status) = tokio::join!(gateway.fetch_status(), gateway.fetch_face_status());

    let remote = kyc_status.unwrap_or_else(|e| {
        log::error!("KYC status fetch failed, defaulting to unverified: {e}");
        RemoteKycStatus::default()
    });
    let face = face_status.unwrap_or_else(|e| {
        log::error!("face status fetch failed, defaulting to unverified: {e}");
        FaceVerificationStatus::default()
    });

    let was_active = store.active_flag()?;
    store.set_active_flag(false)?;
    if !was_active {
        store.set_id_card_confirmed(false)?;
    }

    Ok(StatusView::merge(remote, face, store.id_card_confirmed()?))
}
