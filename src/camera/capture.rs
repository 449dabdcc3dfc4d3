use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::{Arc, Condvar, Mutex, MutexGuard},
};

use image::{codecs::jpeg::JpegEncoder, ColorType, DynamicImage};
use log::{debug, info};
use thiserror::Error;

use super::Frame;
use crate::{constants::DEFAULT_JPEG_QUALITY, executor::CameraExecutor};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera is not running")]
    CameraClosed,
    #[error("camera executor has been shut down")]
    ExecutorShutdown,
    #[error("write {path}: {source}")]
    FileIo {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("jpeg encoding failed: {0}")]
    Encoding(#[from] image::ImageError),
}

#[derive(Debug, Clone)]
pub struct OutputFileOptions {
    file: PathBuf,
}

impl OutputFileOptions {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self { file: file.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFileResults {
    pub saved_path: PathBuf,
}

#[derive(Default)]
struct SlotState {
    latest: Option<Frame>,
    generation: u64,
    open: bool,
}

/// Latest frame from the running camera plus a wakeup for waiters.
#[derive(Default)]
struct FrameSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl FrameSlot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        // a panicking writer only ever leaves a stale frame behind
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn generation(&self) -> u64 {
        self.lock().generation
    }

    fn publish(&self, frame: Frame) {
        let mut state = self.lock();
        if !state.open {
            return;
        }
        state.latest = Some(frame);
        state.generation += 1;
        self.ready.notify_all();
    }

    fn set_open(&self, open: bool) {
        let mut state = self.lock();
        state.open = open;
        if !open {
            state.latest = None;
        }
        self.ready.notify_all();
    }

    /// Block until a frame newer than `after` arrives or the camera stops.
    fn next_frame(&self, after: u64) -> Result<Frame, CaptureError> {
        let mut state = self.lock();
        loop {
            if !state.open {
                return Err(CaptureError::CameraClosed);
            }
            if state.generation > after {
                if let Some(frame) = state.latest.clone() {
                    return Ok(frame);
                }
            }
            state = self
                .ready
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

/// Still-photo use case. Clones share the same frame slot.
#[derive(Clone)]
pub struct ImageCapture {
    slot: Arc<FrameSlot>,
    jpeg_quality: u8,
}

impl Default for ImageCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageCapture {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(FrameSlot::default()),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    /// Whether a camera is currently feeding this use case.
    pub fn is_attached(&self) -> bool {
        self.slot.lock().open
    }

    pub(crate) fn attach(&self) {
        self.slot.set_open(true);
    }

    pub(crate) fn detach(&self) {
        self.slot.set_open(false);
    }

    pub(crate) fn on_frame(&self, frame: Frame) {
        self.slot.publish(frame);
    }

    /// Write the next frame to `options.file` as JPEG.
    ///
    /// `callback` receives at most one outcome: none if the executor is shut
    /// down after the job is queued but before it starts. It runs on
    /// `executor`, or immediately on the calling thread when the executor no
    /// longer accepts work.
    pub fn take_picture<F>(&self, options: OutputFileOptions, executor: &CameraExecutor, callback: F)
    where
        F: FnOnce(Result<OutputFileResults, CaptureError>) + Send + 'static,
    {
        if executor.is_shutdown() {
            callback(Err(CaptureError::ExecutorShutdown));
            return;
        }
        let slot = self.slot.clone();
        let after = slot.generation();
        let quality = self.jpeg_quality;
        debug!("capture requested: {}", options.file.display());
        executor.execute(move || {
            let result = slot
                .next_frame(after)
                .and_then(|frame| write_jpeg(&frame, &options.file, quality))
                .map(|()| OutputFileResults {
                    saved_path: options.file,
                });
            callback(result);
        });
    }
}

fn write_jpeg(frame: &Frame, path: &Path, quality: u8) -> Result<(), CaptureError> {
    let io_err = |source| CaptureError::FileIo {
        path: path.to_path_buf(),
        source,
    };
    let rgb = DynamicImage::ImageRgba8(frame.as_ref().clone()).to_rgb8();
    let file = File::create(path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    let mut encoder = JpegEncoder::new_with_quality(&mut writer, quality);
    let encoded = encoder
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)
        .map_err(CaptureError::from);
    drop(encoder);
    let encoded = encoded.and_then(|()| writer.flush().map_err(io_err));
    if encoded.is_err() {
        drop(writer);
        let _ = std::fs::remove_file(path);
    } else {
        info!("saved {}x{} photo to {}", rgb.width(), rgb.height(), path.display());
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgba, RgbaImage};
    use std::{sync::mpsc, time::Duration};

    fn frame(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba([200, 40, 10, 255]))
    }

    #[test]
    fn waits_for_next_frame_and_writes_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let executor = CameraExecutor::new_single_thread("capture-test").unwrap();
        let capture = ImageCapture::new();
        capture.attach();
        // frame before the request must not be used
        capture.on_frame(Arc::new(frame(2, 2)));

        let (tx, rx) = mpsc::channel();
        let path = dir.path().join("shot.jpg");
        capture.take_picture(OutputFileOptions::new(&path), &executor, move |r| {
            tx.send(r).unwrap();
        });
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        capture.on_frame(Arc::new(frame(16, 8)));
        let saved = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(saved.saved_path, path);
        let decoded = image::open(&path).unwrap();
        assert_eq!(decoded.dimensions(), (16, 8));
    }

    #[test]
    fn detached_camera_fails_pending_capture() {
        let dir = tempfile::tempdir().unwrap();
        let executor = CameraExecutor::new_single_thread("capture-test").unwrap();
        let capture = ImageCapture::new();
        capture.attach();
        let (tx, rx) = mpsc::channel();
        let path = dir.path().join("never.jpg");
        capture.take_picture(OutputFileOptions::new(&path), &executor, move |r| {
            tx.send(r).unwrap();
        });
        capture.detach();
        let err = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap_err();
        assert!(matches!(err, CaptureError::CameraClosed));
        assert!(!path.exists());
    }

    #[test]
    fn missing_directory_is_io_error_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let executor = CameraExecutor::new_single_thread("capture-test").unwrap();
        let capture = ImageCapture::new();
        capture.attach();
        let (tx, rx) = mpsc::channel();
        let path = dir.path().join("gone").join("x.jpg");
        capture.take_picture(OutputFileOptions::new(&path), &executor, move |r| {
            tx.send(r).unwrap();
        });
        capture.on_frame(Arc::new(frame(4, 4)));
        let err = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap_err();
        assert!(matches!(err, CaptureError::FileIo { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn shut_down_executor_reports_inline() {
        let mut executor = CameraExecutor::new_single_thread("capture-test").unwrap();
        executor.shutdown();
        let capture = ImageCapture::new();
        let (tx, rx) = mpsc::channel();
        capture.take_picture(OutputFileOptions::new("/tmp/x.jpg"), &executor, move |r| {
            tx.send(r).unwrap();
        });
        let err = rx.try_recv().unwrap().unwrap_err();
        assert!(matches!(err, CaptureError::ExecutorShutdown));
    }

    #[test]
    fn frames_ignored_while_detached() {
        let capture = ImageCapture::new();
        capture.on_frame(Arc::new(frame(1, 1)));
        assert_eq!(capture.slot.generation(), 0);
        assert!(!capture.is_attached());
    }
}
