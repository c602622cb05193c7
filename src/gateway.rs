//! VeriFlow KYC - Verification Gateway
//!
//! Thin typed client for the four remote verification operations. Each
//! operation is a single external call with no internal retry (retry policy
//! belongs to the orchestrator) and at most one request in flight per
//! operation. Backend error payloads are logged in full here and never
//! surfaced verbatim.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::{KycError, KycResult};
use crate::session::IdCardFields;
use crate::status::{FaceVerificationStatus, RemoteKycStatus};

/// OCR upload result: extracted fields plus where the server stored the
/// image
#[derive(Debug, Clone)]
pub struct Extraction {
    pub stored_path: Option<String>,
    pub fields: IdCardFields,
}

/// Face-match result
#[derive(Debug, Clone)]
pub struct FaceMatchOutcome {
    pub matched: bool,
    pub message: Option<String>,
}

/// Raw liveness scoring from the backend, before the acceptance policy is
/// applied
#[derive(Debug, Clone)]
pub struct LivenessReport {
    pub score: f64,
    pub blink_count: u32,
    pub frames_with_face: u32,
    pub rejection_reason: Option<String>,
}

/// The remote collaborator seam. `HttpGateway` is the production
/// implementation; tests script this trait directly.
#[async_trait]
pub trait RemoteVerifier: Send + Sync {
    /// POST /ocr/upload-and-process?front={bool} (multipart image).
    /// An OCR failure is recoverable-by-retake (`ExtractionFailed`), not a
    /// network error.
    async fn upload_and_extract(&self, image: &Path, is_front: bool) -> KycResult<Extraction>;

    /// POST /face-verification/verify (multipart selfie)
    async fn match_face(&self, selfie: &Path) -> KycResult<FaceMatchOutcome>;

    /// POST /kyc/verify/liveness (multipart video, or image fallback)
    async fn check_liveness(&self, artifact: &Path, as_image: bool) -> KycResult<LivenessReport>;

    /// GET /kyc/status
    async fn fetch_status(&self) -> KycResult<RemoteKycStatus>;

    /// GET /face-verification/status
    async fn fetch_face_status(&self) -> KycResult<FaceVerificationStatus>;
}

/// Bearer-token hand-off from the session collaborator. `invalidate` is
/// called on a 401 so the surrounding app can return to sign-in; local
/// verification artifacts are left untouched.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;
    fn invalidate(&self);
}

/// Token provider backed by a plain in-memory slot
pub struct StaticToken(parking_lot::Mutex<Option<String>>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(parking_lot::Mutex::new(Some(token.into())))
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.lock().clone()
    }

    fn invalidate(&self) {
        *self.0.lock() = None;
    }
}

// Wire formats

#[derive(Deserialize)]
struct ExtractionDto {
    image_path: Option<String>,
    id_info: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize)]
struct FaceMatchDto {
    #[serde(rename = "match")]
    matched: bool,
    message: Option<String>,
}

#[derive(Deserialize)]
struct LivenessDto {
    liveness_score: f64,
    #[serde(default)]
    blink_count: u32,
    #[serde(default)]
    face_detected_frames: u32,
    rejection_reason: Option<String>,
}

/// Per-operation in-flight guards
#[derive(Default)]
struct OpGuards {
    upload: tokio::sync::Mutex<()>,
    face: tokio::sync::Mutex<()>,
    liveness: tokio::sync::Mutex<()>,
    status: tokio::sync::Mutex<()>,
    face_status: tokio::sync::Mutex<()>,
}

/// Production HTTP gateway (reqwest, JSON over HTTPS, bearer auth)
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
    guards: OpGuards,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn TokenProvider>) -> KycResult<Self> {
        let client = reqwest::Client::builder()
            // OCR and liveness scoring can be slow; generous timeout
            .timeout(Duration::from_secs(1800))
            .build()
            .map_err(|e| KycError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
            guards: OpGuards::default(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.tokens.token() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn image_part(path: &Path, file_name: &str, mime: &str) -> KycResult<multipart::Part> {
        let data = tokio::fs::read(path).await?;
        multipart::Part::bytes(data)
            .file_name(file_name.to_string())
            .mime_str(mime)
            .map_err(|e| KycError::Network(e.to_string()))
    }

    /// Normalize a non-success response. Logs the full payload, returns the
    /// curated error.
    async fn normalize_failure(&self, op: &str, response: reqwest::Response) -> KycError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        log::error!("{op} failed: status={status} body={body}");

        if status == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate();
            return KycError::AuthExpired;
        }
        KycError::ServerError {
            status: status.as_u16(),
        }
    }
}

#[async_trait]
impl RemoteVerifier for HttpGateway {
    async fn upload_and_extract(&self, image: &Path, is_front: bool) -> KycResult<Extraction> {
        let _guard = self.guards.upload.lock().await;

        let file_name = if is_front {
            "id_card_front.jpg"
        } else {
            "id_card_back.jpg"
        };
        let form = multipart::Form::new()
            .part("image", Self::image_part(image, file_name, "image/jpeg").await?);

        let response = self
            .authorize(
                self.client
                    .post(self.url("/ocr/upload-and-process"))
                    .query(&[("front", is_front)]),
            )
            .multipart(form)
            .send()
            .await
            .map_err(|e| KycError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            // The server answers 4xx when it cannot OCR the image; that is
            // a retake prompt, not a generic failure
            if status.is_client_error() && status != StatusCode::UNAUTHORIZED {
                let body = response.text().await.unwrap_or_default();
                log::warn!("OCR extraction rejected: status={status} body={body}");
                return Err(KycError::ExtractionFailed);
            }
            return Err(self.normalize_failure("upload_and_extract", response).await);
        }

        let dto: ExtractionDto = response
            .json()
            .await
            .map_err(|e| KycError::Network(e.to_string()))?;

        let fields = dto.id_info.ok_or(KycError::ExtractionFailed)?;
        Ok(Extraction {
            stored_path: dto.image_path,
            fields: IdCardFields::from_map(fields),
        })
    }

    async fn match_face(&self, selfie: &Path) -> KycResult<FaceMatchOutcome> {
        let _guard = self.guards.face.lock().await;

        let form = multipart::Form::new()
            .part("image", Self::image_part(selfie, "selfie.jpg", "image/jpeg").await?);

        let response = self
            .authorize(self.client.post(self.url("/face-verification/verify")))
            .multipart(form)
            .send()
            .await
            .map_err(|e| KycError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(self.normalize_failure("match_face", response).await);
        }

        let dto: FaceMatchDto = response
            .json()
            .await
            .map_err(|e| KycError::Network(e.to_string()))?;
        Ok(FaceMatchOutcome {
            matched: dto.matched,
            message: dto.message,
        })
    }

    async fn check_liveness(&self, artifact: &Path, as_image: bool) -> KycResult<LivenessReport> {
        let _guard = self.guards.liveness.lock().await;

        let part = if as_image {
            Self::image_part(artifact, "liveness.jpg", "image/jpeg").await?
        } else {
            Self::image_part(artifact, "liveness.mp4", "video/mp4").await?
        };
        let form = multipart::Form::new().part(if as_image { "image" } else { "video" }, part);

        let response = self
            .authorize(self.client.post(self.url("/kyc/verify/liveness")))
            .multipart(form)
            .send()
            .await
            .map_err(|e| KycError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(self.normalize_failure("check_liveness", response).await);
        }

        let dto: LivenessDto = response
            .json()
            .await
            .map_err(|e| KycError::Network(e.to_string()))?;
        Ok(LivenessReport {
            score: dto.liveness_score,
            blink_count: dto.blink_count,
            frames_with_face: dto.face_detected_frames,
            rejection_reason: dto.rejection_reason,
        })
    }

    async fn fetch_status(&self) -> KycResult<RemoteKycStatus> {
        let _guard = self.guards.status.lock().await;

        let response = self
            .authorize(self.client.get(self.url("/kyc/status")))
            .send()
            .await
            .map_err(|e| KycError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(self.normalize_failure("fetch_status", response).await);
        }
        response
            .json()
            .await
            .map_err(|e| KycError::Network(e.to_string()))
    }

    async fn fetch_face_status(&self) -> KycResult<FaceVerificationStatus> {
        let _guard = self.guards.face_status.lock().await;

        let response = self
            .authorize(self.client.get(self.url("/face-verification/status")))
            .send()
            .await
            .map_err(|e| KycError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(self.normalize_failure("fetch_face_status", response).await);
        }
        response
            .json()
            .await
            .map_err(|e| KycError::Network(e.to_string()))
    }
}

#[cfg(test)]
pub mod testing {
    //! Scripted gateway double for flow and reconciler tests

    use std::collections::VecDeque;

    use parking_lot::Mutex;

    use super::*;

    /// Scripted `RemoteVerifier`. Responses are popped from per-operation
    /// queues; an empty queue yields a benign default. Every call is
    /// recorded so tests can assert "zero gateway calls".
    pub struct ScriptedVerifier {
        pub upload_responses: Mutex<VecDeque<KycResult<Extraction>>>,
        pub face_responses: Mutex<VecDeque<KycResult<FaceMatchOutcome>>>,
        pub liveness_responses: Mutex<VecDeque<KycResult<LivenessReport>>>,
        pub kyc_status: Mutex<Option<RemoteKycStatus>>,
        pub face_status: Mutex<Option<FaceVerificationStatus>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl Default for ScriptedVerifier {
        fn default() -> Self {
            Self {
                upload_responses: Mutex::new(VecDeque::new()),
                face_responses: Mutex::new(VecDeque::new()),
                liveness_responses: Mutex::new(VecDeque::new()),
                kyc_status: Mutex::new(Some(RemoteKycStatus::default())),
                face_status: Mutex::new(Some(FaceVerificationStatus::default())),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl ScriptedVerifier {
        /// Double whose status endpoints fail with a network error
        pub fn failing_status() -> Self {
            Self {
                kyc_status: Mutex::new(None),
                face_status: Mutex::new(None),
                ..Default::default()
            }
        }

        pub fn push_upload(&self, response: KycResult<Extraction>) {
            self.upload_responses.lock().push_back(response);
        }

        pub fn push_face(&self, response: KycResult<FaceMatchOutcome>) {
            self.face_responses.lock().push_back(response);
        }

        pub fn push_liveness(&self, response: KycResult<LivenessReport>) {
            self.liveness_responses.lock().push_back(response);
        }

        pub fn set_kyc_status(&self, status: RemoteKycStatus) {
            *self.kyc_status.lock() = Some(status);
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().len()
        }

        fn record(&self, op: &str) {
            self.calls.lock().push(op.to_string());
        }
    }

    #[async_trait]
    impl RemoteVerifier for ScriptedVerifier {
        async fn upload_and_extract(
            &self,
            _image: &Path,
            is_front: bool,
        ) -> KycResult<Extraction> {
            self.record(if is_front { "upload_front" } else { "upload_back" });
            self.upload_responses.lock().pop_front().unwrap_or_else(|| {
                Ok(Extraction {
                    stored_path: Some("uploads/id.jpg".into()),
                    fields: IdCardFields::new(),
                })
            })
        }

        async fn match_face(&self, _selfie: &Path) -> KycResult<FaceMatchOutcome> {
            self.record("match_face");
            self.face_responses.lock().pop_front().unwrap_or(Ok(FaceMatchOutcome {
                matched: true,
                message: None,
            }))
        }

        async fn check_liveness(
            &self,
            _artifact: &Path,
            _as_image: bool,
        ) -> KycResult<LivenessReport> {
            self.record("check_liveness");
            self.liveness_responses
                .lock()
                .pop_front()
                .unwrap_or(Ok(LivenessReport {
                    score: 0.9,
                    blink_count: 4,
                    frames_with_face: 40,
                    rejection_reason: None,
                }))
        }

        async fn fetch_status(&self) -> KycResult<RemoteKycStatus> {
            self.record("fetch_status");
            (*self.kyc_status.lock())
                .ok_or_else(|| KycError::Network("status endpoint unreachable".into()))
        }

        async fn fetch_face_status(&self) -> KycResult<FaceVerificationStatus> {
            self.record("fetch_face_status");
            (*self.face_status.lock())
                .ok_or_else(|| KycError::Network("face status endpoint unreachable".into()))
        }
    }
}
