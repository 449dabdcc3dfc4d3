use anyhow::{anyhow, Result};
use log::{error, info};

use super::{CameraSelector, ImageCapture, Preview, UseCases};

/// Visible state of the screen the camera is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Visible,
    Hidden,
    Destroyed,
}

/// Owns the camera use cases of one screen.
pub trait CameraProvider {
    fn unbind_all(&mut self);

    /// Bind `preview` and `capture` to the camera picked by `selector`. The
    /// camera runs while the lifecycle is `Visible`.
    fn bind_to_lifecycle(
        &mut self,
        lifecycle: LifecycleState,
        selector: CameraSelector,
        preview: Preview,
        capture: ImageCapture,
    ) -> Result<()>;

    fn on_lifecycle(&mut self, state: LifecycleState);

    fn is_bound(&self) -> bool;
}

/// An opened camera that pushes frames into its use cases until dropped.
pub trait CameraDevice: Sized {
    fn open(selector: CameraSelector, use_cases: UseCases) -> Result<Self>;
}

struct Binding {
    selector: CameraSelector,
    use_cases: UseCases,
}

/// Opens the device while the screen is visible and closes it otherwise.
pub struct LifecycleCameraProvider<D: CameraDevice> {
    binding: Option<Binding>,
    device: Option<D>,
    state: LifecycleState,
}

impl<D: CameraDevice> Default for LifecycleCameraProvider<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: CameraDevice> LifecycleCameraProvider<D> {
    pub fn new() -> Self {
        Self {
            binding: None,
            device: None,
            state: LifecycleState::Created,
        }
    }

    pub fn is_running(&self) -> bool {
        self.device.is_some()
    }

    fn open_device(&mut self) -> Result<()> {
        let Some(binding) = self.binding.as_ref() else {
            return Ok(());
        };
        if self.device.is_some() {
            return Ok(());
        }
        binding.use_cases.capture.attach();
        match D::open(binding.selector, binding.use_cases.clone()) {
            Ok(device) => {
                info!("camera opened ({:?})", binding.selector.lens_facing);
                self.device = Some(device);
                Ok(())
            }
            Err(err) => {
                binding.use_cases.capture.detach();
                Err(err)
            }
        }
    }

    fn close_device(&mut self) {
        if let Some(device) = self.device.take() {
            drop(device);
            info!("camera closed");
        }
        if let Some(binding) = self.binding.as_ref() {
            binding.use_cases.capture.detach();
        }
    }
}

impl<D: CameraDevice> CameraProvider for LifecycleCameraProvider<D> {
    fn unbind_all(&mut self) {
        self.close_device();
        self.binding = None;
    }

    fn bind_to_lifecycle(
        &mut self,
        lifecycle: LifecycleState,
        selector: CameraSelector,
        preview: Preview,
        capture: ImageCapture,
    ) -> Result<()> {
        if lifecycle == LifecycleState::Destroyed {
            return Err(anyhow!("cannot bind to a destroyed lifecycle"));
        }
        if self.binding.is_some() {
            return Err(anyhow!("use cases already bound, unbind first"));
        }
        self.state = lifecycle;
        self.binding = Some(Binding {
            selector,
            use_cases: UseCases { preview, capture },
        });
        if self.state == LifecycleState::Visible {
            if let Err(err) = self.open_device() {
                self.binding = None;
                return Err(err);
            }
        }
        Ok(())
    }

    fn on_lifecycle(&mut self, state: LifecycleState) {
        self.state = state;
        match state {
            LifecycleState::Visible => {
                if let Err(err) = self.open_device() {
                    error!("camera open failed: {err:?}");
                }
            }
            LifecycleState::Hidden => self.close_device(),
            LifecycleState::Destroyed => self.unbind_all(),
            LifecycleState::Created => {}
        }
    }

    fn is_bound(&self) -> bool {
        self.binding.is_some()
    }
}
