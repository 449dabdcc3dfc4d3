use std::{
    cell::RefCell,
    path::PathBuf,
    rc::Rc,
    sync::{
        mpsc::{channel, Receiver, Sender},
        Arc, Mutex,
    },
};

use anyhow::Result;
use log::{error, info};
use slint::{ComponentHandle, Image, Rgba8Pixel, SharedPixelBuffer, Timer, TimerMode};

use crate::{
    camera::{Frame, PlatformCameraProvider},
    constants::{DISPATCH_INTERVAL, TOAST_DURATION},
    controller::{CameraScreenController, Dispatcher, Notifier, Platform},
};

slint::slint! {
    import { Button } from "std-widgets.slint";
    export component MainWindow inherits Window {
        in-out property <image> camera-texture <=> view-finder.source;
        in-out property <string> toast-text;
        callback take-photo();

        title: "Photo Camera";
        preferred-width: 720px;
        preferred-height: 960px;
        background: black;

        view-finder := Image {
            width: 100%;
            height: 100%;
            image-fit: contain;
        }

        Button {
            text: "Take Photo";
            width: 160px;
            height: 48px;
            x: (parent.width - self.width) / 2;
            y: parent.height - self.height - 32px;
            clicked => {
                root.take-photo();
            }
        }

        if root.toast-text != "" : Rectangle {
            width: parent.width - 48px;
            height: 48px;
            x: 24px;
            y: parent.height - 160px;
            border-radius: 24px;
            background: #323232e6;
            Text {
                text: root.toast-text;
                color: white;
                horizontal-alignment: center;
                vertical-alignment: center;
                wrap: word-wrap;
                width: parent.width - 24px;
            }
        }
    }
}

/// Toast overlay in the main window.
struct SlintToast {
    window: Mutex<slint::Weak<MainWindow>>,
}

impl Notifier for SlintToast {
    fn show(&self, message: &str) {
        info!("toast: {message}");
        let Ok(window) = self.window.lock().map(|w| w.clone()) else {
            return;
        };
        let message: slint::SharedString = message.into();
        let res = slint::invoke_from_event_loop(move || {
            let Some(app) = window.upgrade() else {
                return;
            };
            app.set_toast_text(message.clone());
            Timer::single_shot(TOAST_DURATION, move || {
                if let Some(app) = window.upgrade() {
                    if app.get_toast_text() == message {
                        app.set_toast_text(Default::default());
                    }
                }
            });
        });
        if let Err(err) = res {
            error!("toast not shown: {err}");
        }
    }
}

struct SlintPlatform {
    #[cfg(target_os = "android")]
    android_app: slint::android::AndroidApp,
    preview_surface: Sender<Frame>,
    notifier: Arc<SlintToast>,
}

impl Platform for SlintPlatform {
    type Provider = PlatformCameraProvider;

    fn check_self_permission(&self, permission: &str) -> bool {
        #[cfg(target_os = "android")]
        {
            match crate::camera::camera2::check_self_permission(&self.android_app, permission) {
                Ok(granted) => granted,
                Err(err) => {
                    error!("checkSelfPermission {permission}: {err:?}");
                    false
                }
            }
        }
        #[cfg(not(target_os = "android"))]
        {
            let _ = permission;
            true
        }
    }

    fn request_permissions(
        &self,
        permissions: &'static [&'static str],
        request_code: i32,
        reply: Dispatcher<Self::Provider>,
    ) -> Result<()> {
        #[cfg(target_os = "android")]
        {
            use crate::camera::camera2;
            let sdk_version = camera2::sdk_version(&self.android_app)?;
            info!("sdk version:{sdk_version}");
            camera2::request_permissions(&self.android_app, permissions, request_code)?;
            android_permissions::watch_result(self.android_app.clone(), permissions, request_code, reply);
        }
        #[cfg(not(target_os = "android"))]
        {
            // no runtime permission store on desktop
            reply.permissions_result(request_code, vec![true; permissions.len()]);
        }
        Ok(())
    }

    fn acquire_camera_provider(&self, reply: Dispatcher<Self::Provider>) {
        let spawned = std::thread::Builder::new()
            .name("camera-provider".to_string())
            .spawn(move || reply.camera_provider_ready(Ok(PlatformCameraProvider::new())));
        if let Err(err) = spawned {
            error!("camera provider thread: {err}");
        }
    }

    fn external_media_dir(&self) -> Option<PathBuf> {
        #[cfg(target_os = "android")]
        {
            crate::camera::camera2::external_media_dir(&self.android_app)
                .unwrap_or_else(|err| {
                    error!("getExternalMediaDirs: {err:?}");
                    None
                })
        }
        #[cfg(not(target_os = "android"))]
        {
            dirs::picture_dir()
        }
    }

    fn files_dir(&self) -> PathBuf {
        #[cfg(target_os = "android")]
        {
            crate::camera::camera2::files_dir(&self.android_app).unwrap_or_else(|err| {
                error!("getFilesDir: {err:?}");
                PathBuf::from(".")
            })
        }
        #[cfg(not(target_os = "android"))]
        {
            dirs::data_local_dir()
                .map(|dir| dir.join(crate::constants::APP_NAME))
                .filter(|dir| std::fs::create_dir_all(dir).is_ok())
                .unwrap_or_else(|| PathBuf::from("."))
        }
    }

    fn preview_surface(&self) -> Sender<Frame> {
        self.preview_surface.clone()
    }

    fn notifier(&self) -> Arc<dyn Notifier> {
        self.notifier.clone()
    }

    fn finish(&self) {
        // keep the window up long enough for the toast
        #[cfg(target_os = "android")]
        let android_app = self.android_app.clone();
        Timer::single_shot(TOAST_DURATION, move || {
            #[cfg(target_os = "android")]
            if let Err(err) = crate::camera::camera2::finish_activity(&android_app) {
                error!("finish: {err:?}");
            }
            if let Err(err) = slint::quit_event_loop() {
                error!("quit: {err}");
            }
        });
    }
}

/// Tracks window focus while the permission dialog is up.
///
/// The dialog counts as shown only once focus is lost after having been held,
/// since the window may not be focused yet when the request goes out.
#[cfg(any(target_os = "android", test))]
#[derive(Debug, Default)]
struct DialogWatch {
    had_focus: bool,
    dialog_shown: bool,
}

#[cfg(any(target_os = "android", test))]
impl DialogWatch {
    /// Feed one focus sample; true once the answer can be read back.
    fn dialog_closed(&mut self, focused: bool, elapsed: std::time::Duration) -> bool {
        if !focused {
            if self.had_focus {
                self.dialog_shown = true;
            }
            return false;
        }
        self.had_focus = true;
        self.dialog_shown || elapsed >= crate::constants::PERMISSION_DIALOG_GRACE
    }
}

#[cfg(target_os = "android")]
mod android_permissions {
    use std::time::Instant;

    use log::{debug, error, warn};

    use super::DialogWatch;
    use crate::{
        camera::{camera2, PlatformCameraProvider},
        constants::PERMISSION_POLL_INTERVAL,
        controller::Dispatcher,
    };

    /// NativeActivity does not forward `onRequestPermissionsResult`, so the
    /// answer is read back once the system dialog has come and gone.
    pub fn watch_result(
        app: slint::android::AndroidApp,
        permissions: &'static [&'static str],
        request_code: i32,
        reply: Dispatcher<PlatformCameraProvider>,
    ) {
        let spawned = std::thread::Builder::new()
            .name("permission-watch".to_string())
            .spawn(move || {
                let started = Instant::now();
                let mut watch = DialogWatch::default();
                loop {
                    std::thread::sleep(PERMISSION_POLL_INTERVAL);
                    let focused = camera2::has_window_focus(&app).unwrap_or_else(|err| {
                        warn!("hasWindowFocus: {err:?}");
                        true
                    });
                    if watch.dialog_closed(focused, started.elapsed()) {
                        break;
                    }
                }
                let grant_results = permissions
                    .iter()
                    .map(|p| camera2::check_self_permission(&app, p).unwrap_or(false))
                    .collect();
                debug!("permission dialog closed");
                reply.permissions_result(request_code, grant_results);
            });
        if let Err(err) = spawned {
            error!("permission watch thread: {err}");
        }
    }
}

pub fn run(
    #[cfg(target_os = "android")]
    android_app: slint::android::AndroidApp,
) -> Result<()> {
    let app = MainWindow::new()?;

    let (frame_sender, frame_receiver) = channel::<Frame>();
    let platform = SlintPlatform {
        #[cfg(target_os = "android")]
        android_app,
        preview_surface: frame_sender,
        notifier: Arc::new(SlintToast {
            window: Mutex::new(app.as_weak()),
        }),
    };

    let controller = Rc::new(RefCell::new(CameraScreenController::initialize(platform)?));

    let ui_controller = controller.clone();
    let app_weak = app.as_weak();
    let timer = Timer::default();
    timer.start(TimerMode::Repeated, DISPATCH_INTERVAL, move || {
        ui_controller.borrow_mut().dispatch_pending();
        if let (Some(frame), Some(app)) = (latest_frame(&frame_receiver), app_weak.upgrade()) {
            app.set_camera_texture(frame_to_image(&frame));
        }
    });

    let photo_controller = controller.clone();
    app.on_take_photo(move || photo_controller.borrow_mut().take_photo());

    app.show()?;
    controller.borrow_mut().on_visible();
    slint::run_event_loop()?;
    app.hide()?;

    timer.stop();
    let mut controller = controller.borrow_mut();
    controller.on_hidden();
    controller.teardown();
    Ok(())
}

/// Only the newest queued frame is worth drawing.
fn latest_frame(frames: &Receiver<Frame>) -> Option<Frame> {
    frames.try_iter().last()
}

fn frame_to_image(frame: &Frame) -> Image {
    let buffer = SharedPixelBuffer::<Rgba8Pixel>::clone_from_slice(
        frame.as_raw(),
        frame.width(),
        frame.height(),
    );
    Image::from_rgba8(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PERMISSION_DIALOG_GRACE;
    use std::time::Duration;

    const TICK: Duration = Duration::from_millis(200);

    #[test]
    fn startup_focus_gain_is_not_a_closed_dialog() {
        let mut watch = DialogWatch::default();
        // window not focused yet when the request goes out
        assert!(!watch.dialog_closed(false, TICK));
        assert!(!watch.dialog_closed(true, TICK * 2));
        // system dialog takes focus, then hands it back
        assert!(!watch.dialog_closed(false, TICK * 3));
        assert!(!watch.dialog_closed(false, TICK * 20));
        assert!(watch.dialog_closed(true, TICK * 21));
    }

    #[test]
    fn no_dialog_ends_after_grace() {
        let mut watch = DialogWatch::default();
        assert!(!watch.dialog_closed(true, TICK));
        assert!(watch.dialog_closed(true, PERMISSION_DIALOG_GRACE));
    }

    #[test]
    fn unfocused_window_waits_past_grace() {
        let mut watch = DialogWatch::default();
        assert!(!watch.dialog_closed(false, PERMISSION_DIALOG_GRACE * 3));
    }
}
