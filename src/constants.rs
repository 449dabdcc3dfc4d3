use std::time::Duration;

/// Directory created under the external media dir for saved photos.
pub const APP_NAME: &str = "PhotoCamera";

/// Android log tag.
pub const LOG_TAG: &str = "photo_camera";

pub const REQUEST_CODE_PERMISSIONS: i32 = 10;

pub const REQUIRED_PERMISSIONS: &[&str] = &["android.permission.CAMERA"];

/// chrono pattern for `yyyy-MM-dd-HH-mm-ss-SSS`
pub const FILE_NAME_FORMAT: &str = "%Y-%m-%d-%H-%M-%S-%3f";

pub const PHOTO_EXTENSION: &str = "jpg";

pub const DEFAULT_JPEG_QUALITY: u8 = 95;

pub const PREVIEW_WIDTH: u32 = 1280;
pub const PREVIEW_HEIGHT: u32 = 720;

/// Same as a short Android toast.
pub const TOAST_DURATION: Duration = Duration::from_millis(2000);

/// How often the UI thread drains controller events and preview frames.
pub const DISPATCH_INTERVAL: Duration = Duration::from_millis(10);

pub const PERMISSION_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// If the activity never loses focus within this window the system answered
/// the permission request without showing a dialog.
pub const PERMISSION_DIALOG_GRACE: Duration = Duration::from_millis(2000);

pub const EXECUTOR_THREAD_NAME: &str = "camera-executor";

pub const PERMISSIONS_DENIED_MESSAGE: &str = "Permissions not granted by the user.";

pub const PHOTO_SAVED_MESSAGE: &str = "Photo saved";
