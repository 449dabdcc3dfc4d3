use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::sync_channel,
        Arc,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Result};
use image::RgbaImage;
use kamera::Camera as KCamera;
use log::{debug, info, warn};

use super::{yuv::bgra_to_rgba, CameraDevice, CameraSelector, LensFacing, UseCases};

/// Desktop webcam through kamera. Frames are pumped on a dedicated thread
/// until the device is dropped.
pub struct KameraDevice {
    running: Arc<AtomicBool>,
    camera_task: Option<JoinHandle<()>>,
}

fn device_index(selector: CameraSelector) -> usize {
    // desktops report no lens facing; the built-in webcam is device 0
    match selector.lens_facing {
        LensFacing::Front | LensFacing::External => 0,
        LensFacing::Back => 1,
    }
}

impl CameraDevice for KameraDevice {
    fn open(selector: CameraSelector, use_cases: UseCases) -> Result<Self> {
        let index = device_index(selector);
        let running = Arc::new(AtomicBool::new(true));
        let running_flag = running.clone();
        let (opened_tx, opened_rx) = sync_channel::<Result<()>>(1);

        let camera_task = std::thread::Builder::new()
            .name("kamera-preview".to_string())
            .spawn(move || {
                let camera = match KCamera::new_device(index) {
                    None => {
                        let _ = opened_tx.send(Err(anyhow!("camera {index} does not exist")));
                        return;
                    }
                    Some(v) => v,
                };
                camera.start();
                let _ = opened_tx.send(Ok(()));

                let mut count = 0;
                let mut timer = Instant::now();
                while running_flag.load(Ordering::Acquire) {
                    let frame = match camera.wait_for_frame() {
                        Some(f) => f,
                        None => {
                            warn!("no frame from camera {index}");
                            std::thread::sleep(Duration::from_millis(10));
                            continue;
                        }
                    };

                    let (width, height) = frame.size_u32();
                    let mut data = frame.data().data_u8().to_vec();
                    bgra_to_rgba(&mut data);
                    match RgbaImage::from_raw(width, height, data) {
                        Some(image) => use_cases.deliver(image),
                        None => warn!("short frame buffer {width}x{height}"),
                    }

                    count += 1;
                    if timer.elapsed() >= Duration::from_secs(1) {
                        debug!("preview FPS:{count}");
                        count = 0;
                        timer = Instant::now();
                    }
                }
                camera.stop();
                info!("camera {index} stopped");
            })?;

        match opened_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                running,
                camera_task: Some(camera_task),
            }),
            Ok(Err(err)) => {
                let _ = camera_task.join();
                Err(err)
            }
            Err(_) => {
                let _ = camera_task.join();
                Err(anyhow!("camera thread exited before opening"))
            }
        }
    }
}

impl Drop for KameraDevice {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.camera_task.take() {
            if handle.join().is_err() {
                warn!("camera thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn front_selector_maps_to_first_device() {
        assert_eq!(device_index(CameraSelector::DEFAULT_FRONT_CAMERA), 0);
        assert_eq!(device_index(CameraSelector::DEFAULT_BACK_CAMERA), 1);
    }
}
