//! The one screen: permission flow, camera binding and photo capture.

use std::{
    path::{Path, PathBuf},
    sync::{
        mpsc::{channel, Receiver, Sender},
        Arc,
    },
};

use anyhow::Result;
use chrono::Local;
use log::{debug, error, info, warn};

use crate::{
    camera::{
        CameraProvider, CameraSelector, Frame, ImageCapture, LifecycleState, OutputFileOptions,
        Preview,
    },
    constants::{
        APP_NAME, EXECUTOR_THREAD_NAME, PERMISSIONS_DENIED_MESSAGE, PHOTO_SAVED_MESSAGE,
        REQUEST_CODE_PERMISSIONS, REQUIRED_PERMISSIONS,
    },
    executor::CameraExecutor,
    storage::{file_uri, photo_file_name, resolve_output_directory},
};

/// Transient user-visible message. Callable from any thread.
pub trait Notifier: Send + Sync {
    fn show(&self, message: &str);
}

/// What the screen needs from its host.
pub trait Platform {
    type Provider: CameraProvider + Send + 'static;

    fn check_self_permission(&self, permission: &str) -> bool;

    /// Ask the user; the answer comes back through `reply`.
    fn request_permissions(
        &self,
        permissions: &'static [&'static str],
        request_code: i32,
        reply: Dispatcher<Self::Provider>,
    ) -> Result<()>;

    /// Build the camera provider off the UI thread and hand it to `reply`.
    fn acquire_camera_provider(&self, reply: Dispatcher<Self::Provider>);

    fn external_media_dir(&self) -> Option<PathBuf>;

    fn files_dir(&self) -> PathBuf;

    fn preview_surface(&self) -> Sender<Frame>;

    fn notifier(&self) -> Arc<dyn Notifier>;

    /// Close the screen.
    fn finish(&self);
}

enum ScreenEvent<P> {
    PermissionsResult {
        request_code: i32,
        grant_results: Vec<bool>,
    },
    CameraProviderReady(Result<P>),
}

/// Posts completions back to the UI thread.
pub struct Dispatcher<P> {
    sender: Sender<ScreenEvent<P>>,
}

impl<P> Clone for Dispatcher<P> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<P> Dispatcher<P> {
    pub fn permissions_result(&self, request_code: i32, grant_results: Vec<bool>) {
        if self
            .sender
            .send(ScreenEvent::PermissionsResult {
                request_code,
                grant_results,
            })
            .is_err()
        {
            debug!("screen gone, permission result dropped");
        }
    }

    pub fn camera_provider_ready(&self, provider: Result<P>) {
        if self
            .sender
            .send(ScreenEvent::CameraProviderReady(provider))
            .is_err()
        {
            debug!("screen gone, camera provider dropped");
        }
    }
}

pub struct CameraScreenController<P: Platform> {
    platform: P,
    output_directory: PathBuf,
    image_capture: Option<ImageCapture>,
    camera_provider: Option<P::Provider>,
    camera_executor: CameraExecutor,
    lifecycle: LifecycleState,
    events: Receiver<ScreenEvent<P::Provider>>,
    dispatcher: Dispatcher<P::Provider>,
}

impl<P: Platform> CameraScreenController<P> {
    /// Screen activation: resolve the output directory, start the executor
    /// and either start the camera or ask for permissions.
    pub fn initialize(platform: P) -> Result<Self> {
        let output_directory = resolve_output_directory(
            platform.external_media_dir().as_deref(),
            APP_NAME,
            &platform.files_dir(),
        );
        let camera_executor = CameraExecutor::new_single_thread(EXECUTOR_THREAD_NAME)?;
        let (sender, events) = channel();

        let mut controller = Self {
            platform,
            output_directory,
            image_capture: None,
            camera_provider: None,
            camera_executor,
            lifecycle: LifecycleState::Created,
            events,
            dispatcher: Dispatcher { sender },
        };

        if controller.all_permissions_granted() {
            controller.start_camera();
        } else if let Err(err) = controller.platform.request_permissions(
            REQUIRED_PERMISSIONS,
            REQUEST_CODE_PERMISSIONS,
            controller.dispatcher.clone(),
        ) {
            error!("request permissions failed: {err:?}");
        }
        Ok(controller)
    }

    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }

    pub fn has_image_capture(&self) -> bool {
        self.image_capture.is_some()
    }

    fn all_permissions_granted(&self) -> bool {
        REQUIRED_PERMISSIONS
            .iter()
            .all(|permission| self.platform.check_self_permission(permission))
    }

    pub fn on_request_permissions_result(&mut self, request_code: i32, grant_results: &[bool]) {
        if request_code != REQUEST_CODE_PERMISSIONS {
            debug!("ignoring permission result for request {request_code}");
            return;
        }
        debug!("permission results: {grant_results:?}");
        if self.all_permissions_granted() {
            self.start_camera();
        } else {
            self.platform.notifier().show(PERMISSIONS_DENIED_MESSAGE);
            self.platform.finish();
        }
    }

    /// Acquire the provider; binding happens when it is ready.
    pub fn start_camera(&mut self) {
        info!("starting camera");
        self.platform
            .acquire_camera_provider(self.dispatcher.clone());
    }

    fn on_camera_provider_ready(&mut self, acquired: Result<P::Provider>) {
        let acquired = match acquired {
            Ok(provider) => provider,
            Err(err) => {
                error!("startCamera: Fail: {err:?}");
                return;
            }
        };
        let lifecycle = self.lifecycle;
        let provider = self.camera_provider.get_or_insert(acquired);

        let mut preview = Preview::new();
        preview.set_surface_provider(self.platform.preview_surface());
        let image_capture = ImageCapture::new();
        let camera_selector = CameraSelector::DEFAULT_FRONT_CAMERA;

        provider.unbind_all();
        match provider.bind_to_lifecycle(lifecycle, camera_selector, preview, image_capture.clone()) {
            Ok(()) => {
                info!("camera bound");
                self.image_capture = Some(image_capture);
            }
            Err(err) => {
                self.image_capture = None;
                error!("startCamera: Fail: {err:?}");
            }
        }
    }

    pub fn take_photo(&mut self) {
        let Some(image_capture) = self.image_capture.as_ref() else {
            return;
        };
        let photo_file = self.output_directory.join(photo_file_name(&Local::now()));
        let notifier = self.platform.notifier();
        image_capture.take_picture(
            OutputFileOptions::new(photo_file),
            &self.camera_executor,
            move |result| match result {
                Ok(output) => {
                    notifier.show(&format!("{PHOTO_SAVED_MESSAGE}, {}", file_uri(&output.saved_path)))
                }
                Err(err) => error!("onError: {err}"),
            },
        );
    }

    /// Handle everything posted by the platform since the last call.
    pub fn dispatch_pending(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                ScreenEvent::PermissionsResult {
                    request_code,
                    grant_results,
                } => self.on_request_permissions_result(request_code, &grant_results),
                ScreenEvent::CameraProviderReady(provider) => self.on_camera_provider_ready(provider),
            }
        }
    }

    pub fn on_visible(&mut self) {
        self.set_lifecycle(LifecycleState::Visible);
    }

    pub fn on_hidden(&mut self) {
        self.set_lifecycle(LifecycleState::Hidden);
    }

    fn set_lifecycle(&mut self, state: LifecycleState) {
        if self.lifecycle == LifecycleState::Destroyed {
            warn!("lifecycle change to {state:?} after destroy ignored");
            return;
        }
        self.lifecycle = state;
        if let Some(provider) = self.camera_provider.as_mut() {
            provider.on_lifecycle(state);
        }
    }

    /// Release the camera and the background executor.
    pub fn teardown(&mut self) {
        if self.lifecycle == LifecycleState::Destroyed {
            return;
        }
        self.set_lifecycle(LifecycleState::Destroyed);
        self.camera_executor.shutdown();
        info!("camera screen destroyed");
    }
}

impl<P: Platform> Drop for CameraScreenController<P> {
    fn drop(&mut self) {
        self.teardown();
    }
}
