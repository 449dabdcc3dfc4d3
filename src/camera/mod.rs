use std::sync::{mpsc::Sender, Arc};

use image::{imageops::flip_horizontal, RgbaImage};

mod capture;
mod provider;
pub mod yuv;

#[cfg(target_os = "android")]
pub mod camera2;

#[cfg(not(target_os = "android"))]
pub mod pcam;

pub use capture::{CaptureError, ImageCapture, OutputFileOptions, OutputFileResults};
pub use provider::{CameraDevice, CameraProvider, LifecycleCameraProvider, LifecycleState};

/// A decoded, upright camera frame.
pub type Frame = Arc<RgbaImage>;

#[cfg(target_os = "android")]
pub type PlatformCameraProvider = LifecycleCameraProvider<camera2::Camera2Device>;

#[cfg(not(target_os = "android"))]
pub type PlatformCameraProvider = LifecycleCameraProvider<pcam::KameraDevice>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LensFacing {
    Front,
    Back,
    External,
}

impl LensFacing {
    /// Map an `ACAMERA_LENS_FACING` value.
    pub fn from_metadata(value: u8) -> Option<Self> {
        match value {
            0 => Some(LensFacing::Front),
            1 => Some(LensFacing::Back),
            2 => Some(LensFacing::External),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraSelector {
    pub lens_facing: LensFacing,
}

impl CameraSelector {
    pub const DEFAULT_FRONT_CAMERA: CameraSelector = CameraSelector {
        lens_facing: LensFacing::Front,
    };
    pub const DEFAULT_BACK_CAMERA: CameraSelector = CameraSelector {
        lens_facing: LensFacing::Back,
    };
}

/// Live preview stream. Frames go to the surface provider if one is attached.
#[derive(Clone, Default)]
pub struct Preview {
    surface: Option<Sender<Frame>>,
}

impl Preview {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_surface_provider(&mut self, surface: Sender<Frame>) {
        self.surface = Some(surface);
    }

    pub fn has_surface(&self) -> bool {
        self.surface.is_some()
    }

    fn deliver(&self, frame: Frame) {
        if let Some(surface) = self.surface.as_ref() {
            // receiver gone means the screen is closing
            let _ = surface.send(frame);
        }
    }
}

/// The use cases bound to one camera: a backend pushes every frame here.
#[derive(Clone)]
pub struct UseCases {
    pub preview: Preview,
    pub capture: ImageCapture,
}

impl UseCases {
    pub fn deliver(&self, frame: RgbaImage) {
        let frame = Arc::new(frame);
        self.capture.on_frame(frame.clone());
        self.preview.deliver(frame);
    }

    /// Front-lens frame: the preview shows a mirror image, stills keep the
    /// sensor's handedness.
    pub fn deliver_mirrored(&self, frame: RgbaImage) {
        if self.preview.has_surface() {
            self.preview.deliver(Arc::new(flip_horizontal(&frame)));
        }
        self.capture.on_frame(Arc::new(frame));
    }
}

/// Pick the size closest in area to `target` among `sizes`, preferring the
/// target aspect ratio.
pub fn choose_preview_size(sizes: &[(u32, u32)], target: (u32, u32)) -> Option<(u32, u32)> {
    let target_area = target.0 as i64 * target.1 as i64;
    let target_landscape = target.0 >= target.1;
    sizes
        .iter()
        .copied()
        .filter(|(w, h)| *w > 0 && *h > 0)
        .min_by_key(|&(w, h)| {
            let same_ratio = (w as i64 * target.1 as i64) == (h as i64 * target.0 as i64);
            let same_orientation = (w >= h) == target_landscape;
            let area_diff = (w as i64 * h as i64 - target_area).abs();
            (!same_ratio, !same_orientation, area_diff)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::CameraExecutor;
    use image::Rgba;
    use std::{sync::mpsc::channel, time::Duration};

    #[test]
    fn lens_facing_metadata_values() {
        assert_eq!(LensFacing::from_metadata(0), Some(LensFacing::Front));
        assert_eq!(LensFacing::from_metadata(1), Some(LensFacing::Back));
        assert_eq!(LensFacing::from_metadata(2), Some(LensFacing::External));
        assert_eq!(LensFacing::from_metadata(7), None);
    }

    #[test]
    fn preview_without_surface_drops_frames() {
        let use_cases = UseCases {
            preview: Preview::new(),
            capture: ImageCapture::new(),
        };
        use_cases.deliver(RgbaImage::new(2, 2));
        assert!(!use_cases.preview.has_surface());
    }

    #[test]
    fn frames_reach_preview_surface() {
        let (tx, rx) = channel();
        let mut preview = Preview::new();
        preview.set_surface_provider(tx);
        let use_cases = UseCases {
            preview,
            capture: ImageCapture::new(),
        };
        use_cases.deliver(RgbaImage::new(4, 3));
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.dimensions(), (4, 3));
    }

    #[test]
    fn mirrored_delivery_saves_unmirrored_still() {
        let dir = tempfile::tempdir().unwrap();
        let executor = CameraExecutor::new_single_thread("mirror-test").unwrap();
        let (tx, rx) = channel();
        let mut preview = Preview::new();
        preview.set_surface_provider(tx);
        let capture = ImageCapture::new();
        capture.attach();
        let use_cases = UseCases {
            preview,
            capture: capture.clone(),
        };

        let (done_tx, done_rx) = channel();
        let path = dir.path().join("front.jpg");
        capture.take_picture(OutputFileOptions::new(&path), &executor, move |r| {
            done_tx.send(r).unwrap();
        });
        // left half red, right half black
        let frame = RgbaImage::from_fn(16, 8, |x, _| {
            if x < 8 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 0, 255])
            }
        });
        use_cases.deliver_mirrored(frame);

        let shown = rx.try_recv().unwrap();
        assert_eq!(shown.get_pixel(15, 4).0, [255, 0, 0, 255]);
        assert_eq!(shown.get_pixel(0, 4).0, [0, 0, 0, 255]);

        done_rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        let saved = image::open(&path).unwrap().to_rgb8();
        let left = saved.get_pixel(1, 4).0;
        let right = saved.get_pixel(14, 4).0;
        assert!(left[0] > 180 && left[1] < 80, "{left:?}");
        assert!(right[0] < 80, "{right:?}");
    }

    #[test]
    fn preview_size_prefers_exact_match() {
        let sizes = [(640, 480), (1280, 720), (1920, 1080)];
        assert_eq!(choose_preview_size(&sizes, (1280, 720)), Some((1280, 720)));
    }

    #[test]
    fn preview_size_prefers_aspect_ratio_over_area() {
        let sizes = [(1280, 960), (1920, 1080)];
        assert_eq!(choose_preview_size(&sizes, (1280, 720)), Some((1920, 1080)));
    }

    #[test]
    fn preview_size_empty() {
        assert_eq!(choose_preview_size(&[], (1280, 720)), None);
    }
}
