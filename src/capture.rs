//! VeriFlow KYC - Capture Controller
//!
//! Per-step acquisition of images and video from the camera or gallery.
//! Validates basic constraints (portrait orientation for ID cards) and
//! applies the device-level retry policy. A successful capture never
//! uploads anything; it only yields an artifact the orchestrator submits.

use std::io::Cursor;
use std::path::PathBuf;

use image::ImageReader;
use serde::{Deserialize, Serialize};

use crate::error::{KycError, KycResult};
use crate::session::{CaptureKind, ImageRef};

/// Capture tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// First-attempt camera quality (0.0 - 1.0)
    pub initial_quality: f32,
    /// Quality for the single automatic retry after a camera failure
    pub retry_quality: f32,
    /// Maximum liveness recording length in seconds
    pub max_video_seconds: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            initial_quality: 1.0,
            retry_quality: 0.9,
            max_video_seconds: 5,
        }
    }
}

/// A raw frame or clip as it comes off the device
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Where the device wrote the file
    pub path: PathBuf,
    /// File contents
    pub data: Vec<u8>,
}

/// Camera seam. Platform layers implement this; tests use scripted doubles.
pub trait CameraDevice {
    /// Take a still picture at the given quality
    fn take_picture(&mut self, quality: f32) -> KycResult<CapturedFrame>;

    /// Record a clip, blocking until it finishes or is stopped.
    /// Returns `Err(KycError::RecordingCancelled)` when stopped early.
    fn record_video(&mut self, max_seconds: u32) -> KycResult<CapturedFrame>;

    /// Cooperative cancel: implementations MUST stop the capture device
    /// before discarding any in-memory buffer. A cancelled recording is
    /// never submitted.
    fn stop_recording(&mut self);

    /// Some devices cannot record video; liveness then degrades to a still
    /// image
    fn supports_video(&self) -> bool {
        true
    }
}

/// Gallery seam
pub trait GalleryPicker {
    /// Pick an existing image. A cancelled pick is an error, not a retry
    /// candidate.
    fn pick_image(&mut self) -> KycResult<CapturedFrame>;
}

/// Capture Controller
pub struct CaptureController {
    config: CaptureConfig,
}

impl CaptureController {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    /// Capture a still from the camera for the given step.
    ///
    /// A camera failure triggers exactly one automatic retry at reduced
    /// quality before the error is surfaced.
    pub fn capture_from_camera(
        &self,
        device: &mut dyn CameraDevice,
        kind: CaptureKind,
    ) -> KycResult<ImageRef> {
        let frame = match device.take_picture(self.config.initial_quality) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("camera capture failed, retrying at reduced quality: {e}");
                device.take_picture(self.config.retry_quality)?
            }
        };
        self.validate_orientation(&frame, kind)?;
        Ok(ImageRef::new(frame.path))
    }

    /// Pick from the gallery. No retry: a failure here is a cancelled user
    /// action or a device I/O error, not a transient camera issue.
    pub fn pick_from_gallery(
        &self,
        picker: &mut dyn GalleryPicker,
        kind: CaptureKind,
    ) -> KycResult<ImageRef> {
        let frame = picker.pick_image()?;
        self.validate_orientation(&frame, kind)?;
        Ok(ImageRef::new(frame.path))
    }

    /// Record the liveness clip, or fall back to a still image when the
    /// device cannot record video. The second element is true for the
    /// still-image fallback.
    pub fn capture_liveness(&self, device: &mut dyn CameraDevice) -> KycResult<(ImageRef, bool)> {
        if device.supports_video() {
            let frame = device.record_video(self.config.max_video_seconds)?;
            Ok((ImageRef::new(frame.path), false))
        } else {
            log::info!("device cannot record video, falling back to still-image liveness");
            let image = self.capture_from_camera(device, CaptureKind::Liveness)?;
            Ok((image, true))
        }
    }

    /// Stop an in-flight liveness recording. The device stops before the
    /// buffer is discarded.
    pub fn stop_liveness(&self, device: &mut dyn CameraDevice) {
        device.stop_recording();
    }

    /// ID-card steps must be portrait. If the dimensions cannot be read the
    /// capture is allowed through (the server gets the final say).
    fn validate_orientation(&self, frame: &CapturedFrame, kind: CaptureKind) -> KycResult<()> {
        if !kind.requires_portrait() {
            return Ok(());
        }
        match read_dimensions(&frame.data) {
            Some((width, height)) if height <= width => {
                Err(KycError::NonPortraitImage { width, height })
            }
            Some(_) => Ok(()),
            None => {
                log::warn!(
                    "could not read dimensions of {} capture, allowing upload",
                    kind.as_str()
                );
                Ok(())
            }
        }
    }
}

/// Decode just the dimensions of an in-memory image
fn read_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat};

    fn encoded_png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::new_rgb8(width, height);
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    /// Camera double that fails a configurable number of times first
    struct FlakyCamera {
        failures_left: u32,
        frame_data: Vec<u8>,
        qualities_seen: Vec<f32>,
    }

    impl CameraDevice for FlakyCamera {
        fn take_picture(&mut self, quality: f32) -> KycResult<CapturedFrame> {
            self.qualities_seen.push(quality);
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(KycError::CameraFailed("shutter jam".into()));
            }
            Ok(CapturedFrame {
                path: "capture.png".into(),
                data: self.frame_data.clone(),
            })
        }

        fn record_video(&mut self, _max_seconds: u32) -> KycResult<CapturedFrame> {
            Ok(CapturedFrame {
                path: "clip.mp4".into(),
                data: vec![0u8; 16],
            })
        }

        fn stop_recording(&mut self) {}
    }

    struct FailingPicker;

    impl GalleryPicker for FailingPicker {
        fn pick_image(&mut self) -> KycResult<CapturedFrame> {
            Err(KycError::GalleryFailed("user cancelled".into()))
        }
    }

    #[test]
    fn test_camera_retries_once_at_lower_quality() {
        let controller = CaptureController::new(CaptureConfig::default());
        let mut camera = FlakyCamera {
            failures_left: 1,
            frame_data: encoded_png(600, 800),
            qualities_seen: Vec::new(),
        };

        let image = controller
            .capture_from_camera(&mut camera, CaptureKind::IdCardFront)
            .unwrap();
        assert_eq!(camera.qualities_seen, vec![1.0, 0.9]);
        assert!(image.stored_path.is_none());
    }

    #[test]
    fn test_camera_gives_up_after_one_retry() {
        let controller = CaptureController::new(CaptureConfig::default());
        let mut camera = FlakyCamera {
            failures_left: 2,
            frame_data: encoded_png(600, 800),
            qualities_seen: Vec::new(),
        };

        let err = controller
            .capture_from_camera(&mut camera, CaptureKind::IdCardFront)
            .unwrap_err();
        assert!(matches!(err, KycError::CameraFailed(_)));
        assert_eq!(camera.qualities_seen.len(), 2);
    }

    #[test]
    fn test_landscape_id_card_rejected() {
        let controller = CaptureController::new(CaptureConfig::default());
        let mut camera = FlakyCamera {
            failures_left: 0,
            frame_data: encoded_png(800, 600),
            qualities_seen: Vec::new(),
        };

        let err = controller
            .capture_from_camera(&mut camera, CaptureKind::IdCardFront)
            .unwrap_err();
        assert!(matches!(
            err,
            KycError::NonPortraitImage {
                width: 800,
                height: 600
            }
        ));
    }

    #[test]
    fn test_landscape_selfie_allowed() {
        let controller = CaptureController::new(CaptureConfig::default());
        let mut camera = FlakyCamera {
            failures_left: 0,
            frame_data: encoded_png(800, 600),
            qualities_seen: Vec::new(),
        };

        assert!(controller
            .capture_from_camera(&mut camera, CaptureKind::Selfie)
            .is_ok());
    }

    #[test]
    fn test_unreadable_dimensions_allowed_through() {
        let controller = CaptureController::new(CaptureConfig::default());
        let mut camera = FlakyCamera {
            failures_left: 0,
            frame_data: vec![0xde, 0xad, 0xbe, 0xef],
            qualities_seen: Vec::new(),
        };

        assert!(controller
            .capture_from_camera(&mut camera, CaptureKind::IdCardFront)
            .is_ok());
    }

    #[test]
    fn test_gallery_failure_has_no_retry() {
        let controller = CaptureController::new(CaptureConfig::default());
        let err = controller
            .pick_from_gallery(&mut FailingPicker, CaptureKind::IdCardFront)
            .unwrap_err();
        assert!(matches!(err, KycError::GalleryFailed(_)));
    }

    struct NoVideoCamera {
        frame_data: Vec<u8>,
    }

    impl CameraDevice for NoVideoCamera {
        fn take_picture(&mut self, _quality: f32) -> KycResult<CapturedFrame> {
            Ok(CapturedFrame {
                path: "still.png".into(),
                data: self.frame_data.clone(),
            })
        }

        fn record_video(&mut self, _max_seconds: u32) -> KycResult<CapturedFrame> {
            Err(KycError::CameraFailed("video unsupported".into()))
        }

        fn stop_recording(&mut self) {}

        fn supports_video(&self) -> bool {
            false
        }
    }

    struct StopTrackingCamera {
        stopped: bool,
    }

    impl CameraDevice for StopTrackingCamera {
        fn take_picture(&mut self, _quality: f32) -> KycResult<CapturedFrame> {
            unreachable!()
        }

        fn record_video(&mut self, _max_seconds: u32) -> KycResult<CapturedFrame> {
            Err(KycError::RecordingCancelled)
        }

        fn stop_recording(&mut self) {
            self.stopped = true;
        }
    }

    #[test]
    fn test_stop_reaches_the_device() {
        let controller = CaptureController::new(CaptureConfig::default());
        let mut camera = StopTrackingCamera { stopped: false };
        controller.stop_liveness(&mut camera);
        assert!(camera.stopped);
    }

    #[test]
    fn test_cancelled_recording_is_an_error() {
        let controller = CaptureController::new(CaptureConfig::default());
        let mut camera = StopTrackingCamera { stopped: false };
        let err = controller.capture_liveness(&mut camera).unwrap_err();
        assert!(matches!(err, KycError::RecordingCancelled));
    }

    #[test]
    fn test_liveness_image_fallback_flagged() {
        let controller = CaptureController::new(CaptureConfig::default());
        let mut camera = NoVideoCamera {
            frame_data: encoded_png(600, 800),
        };

        let (_, is_image) = controller.capture_liveness(&mut camera).unwrap();
        assert!(is_image);
    }
}
