use anyhow::{anyhow, Result};
use core::slice;
use jni::{
    objects::{JObject, JObjectArray, JString, JValueGen},
    sys::{jint, JNIInvokeInterface_, _jobject},
    JNIEnv, JavaVM,
};
use log::{debug, error, info, warn};
use ndk_sys::{
    acamera_metadata_tag, camera_status_t, media_status_t, ACameraCaptureSession,
    ACameraCaptureSession_close, ACameraCaptureSession_setRepeatingRequest,
    ACameraCaptureSession_stateCallbacks, ACameraCaptureSession_stopRepeating, ACameraDevice,
    ACameraDevice_StateCallbacks, ACameraDevice_close, ACameraDevice_createCaptureRequest,
    ACameraDevice_createCaptureSession, ACameraDevice_getId, ACameraDevice_request_template,
    ACameraIdList, ACameraManager, ACameraManager_create, ACameraManager_delete,
    ACameraManager_deleteCameraIdList, ACameraManager_getCameraCharacteristics,
    ACameraManager_getCameraIdList, ACameraManager_openCamera, ACameraMetadata,
    ACameraMetadata_const_entry, ACameraMetadata_free, ACameraMetadata_getConstEntry,
    ACameraOutputTarget, ACameraOutputTarget_create, ACameraOutputTarget_free, ACaptureRequest,
    ACaptureRequest_addTarget, ACaptureRequest_free, ACaptureSessionOutput,
    ACaptureSessionOutputContainer, ACaptureSessionOutputContainer_add,
    ACaptureSessionOutputContainer_create, ACaptureSessionOutputContainer_free,
    ACaptureSessionOutput_create, ACaptureSessionOutput_free, AImage, AImageReader,
    AImageReader_ImageListener, AImageReader_acquireLatestImage, AImageReader_delete,
    AImageReader_getWindow, AImageReader_new, AImageReader_setImageListener, AImage_delete,
    AImage_getHeight, AImage_getPlaneData, AImage_getPlanePixelStride, AImage_getPlaneRowStride,
    AImage_getWidth, ANativeWindow, AIMAGE_FORMATS,
};
use std::{
    ffi::{c_char, c_int, c_void, CStr},
    mem::zeroed,
    path::PathBuf,
    ptr::null_mut,
    time::Instant,
};

use super::{
    choose_preview_size,
    yuv::{rotate_upright, yuv420_to_rgba, YuvPlanes},
    CameraDevice, CameraSelector, LensFacing, UseCases,
};
use crate::constants::{PREVIEW_HEIGHT, PREVIEW_WIDTH};

#[link(name = "camera2ndk")]
extern "C" {}

#[link(name = "mediandk")]
extern "C" {}

fn check(status: camera_status_t, what: &str) -> Result<()> {
    if status != camera_status_t::ACAMERA_OK {
        return Err(anyhow!("{what} failed (reason: {:?})", status));
    }
    Ok(())
}

fn check_media(status: media_status_t, what: &str) -> Result<()> {
    if status != media_status_t::AMEDIA_OK {
        return Err(anyhow!("{what} failed (reason: {:?})", status));
    }
    Ok(())
}

/// `ACameraManager` plus its id list, released on drop.
struct CameraManager {
    manager: *mut ACameraManager,
    id_list: *mut ACameraIdList,
}

impl CameraManager {
    fn new() -> Result<Self> {
        unsafe {
            let mut manager = Self {
                manager: ACameraManager_create(),
                id_list: null_mut(),
            };
            check(
                ACameraManager_getCameraIdList(manager.manager, &mut manager.id_list),
                "ACameraManager_getCameraIdList",
            )?;
            if manager.id_list.is_null() {
                return Err(anyhow!("camera id list is null"));
            }
            Ok(manager)
        }
    }

    fn camera_ids(&self) -> &[*const c_char] {
        unsafe {
            let list = &*self.id_list;
            if list.numCameras < 1 || list.cameraIds.is_null() {
                return &[];
            }
            slice::from_raw_parts(list.cameraIds, list.numCameras as usize)
        }
    }

    /// First camera whose lens faces the selector's way, with its sensor
    /// orientation and YUV stream sizes.
    fn select(&self, selector: CameraSelector) -> Result<SelectedCamera> {
        let ids = self.camera_ids();
        if ids.is_empty() {
            return Err(anyhow!("No camera device detected."));
        }
        for &id in ids {
            let name = unsafe { get_cstr(id) }.unwrap_or("?");
            let metadata = match self.characteristics(id) {
                Ok(m) => m,
                Err(err) => {
                    warn!("camera {name}: {err}");
                    continue;
                }
            };
            let facing = lens_facing(metadata.0);
            debug!("camera {name}: lens facing {facing:?}");
            if facing == Some(selector.lens_facing) {
                return Ok(SelectedCamera {
                    id,
                    sensor_orientation: sensor_orientation(metadata.0),
                    yuv_sizes: yuv_stream_sizes(metadata.0),
                });
            }
        }
        Err(anyhow!("no camera with lens facing {:?}", selector.lens_facing))
    }

    fn characteristics(&self, id: *const c_char) -> Result<Metadata> {
        let mut metadata = null_mut();
        unsafe {
            check(
                ACameraManager_getCameraCharacteristics(self.manager, id, &mut metadata),
                "ACameraManager_getCameraCharacteristics",
            )?;
        }
        Ok(Metadata(metadata))
    }
}

impl Drop for CameraManager {
    fn drop(&mut self) {
        unsafe {
            if !self.id_list.is_null() {
                ACameraManager_deleteCameraIdList(self.id_list);
            }
            ACameraManager_delete(self.manager);
        }
    }
}

struct Metadata(*mut ACameraMetadata);

impl Drop for Metadata {
    fn drop(&mut self) {
        unsafe { ACameraMetadata_free(self.0) };
    }
}

struct SelectedCamera {
    id: *const c_char,
    sensor_orientation: i32,
    yuv_sizes: Vec<(u32, u32)>,
}

fn const_entry(metadata: *mut ACameraMetadata, tag: u32) -> Option<ACameraMetadata_const_entry> {
    unsafe {
        let mut entry: ACameraMetadata_const_entry = zeroed();
        let status = ACameraMetadata_getConstEntry(metadata, tag, &mut entry);
        (status == camera_status_t::ACAMERA_OK && entry.count > 0).then_some(entry)
    }
}

fn lens_facing(metadata: *mut ACameraMetadata) -> Option<LensFacing> {
    let entry = const_entry(metadata, acamera_metadata_tag::ACAMERA_LENS_FACING.0)?;
    let value = unsafe { *entry.data.u8_ };
    LensFacing::from_metadata(value)
}

fn sensor_orientation(metadata: *mut ACameraMetadata) -> i32 {
    const_entry(metadata, acamera_metadata_tag::ACAMERA_SENSOR_ORIENTATION.0)
        .map(|entry| unsafe { *entry.data.i32_ })
        .unwrap_or(0)
}

fn yuv_stream_sizes(metadata: *mut ACameraMetadata) -> Vec<(u32, u32)> {
    let Some(entry) = const_entry(
        metadata,
        acamera_metadata_tag::ACAMERA_SCALER_AVAILABLE_STREAM_CONFIGURATIONS.0,
    ) else {
        return vec![];
    };
    // format, width, height, is_input
    let data = unsafe { slice::from_raw_parts(entry.data.i32_, entry.count as usize) };
    data.chunks_exact(4)
        .filter(|c| c[3] == 0 && c[0] == AIMAGE_FORMATS::AIMAGE_FORMAT_YUV_420_888.0 as i32)
        .map(|c| (c[1] as u32, c[2] as u32))
        .collect()
}

/// Listener context. Boxed so its address is stable for the NDK callback.
struct FrameSink {
    use_cases: UseCases,
    sensor_orientation: i32,
    lens_facing: LensFacing,
    timer: Instant,
    frame_count: u32,
}

impl FrameSink {
    fn on_image_available(&mut self, reader: *mut AImageReader) -> Result<()> {
        unsafe {
            let mut image: *mut AImage = null_mut();
            let status = AImageReader_acquireLatestImage(reader, &mut image);
            if status == media_status_t::AMEDIA_IMGREADER_NO_BUFFER_AVAILABLE {
                return Ok(());
            }
            check_media(status, "AImageReader_acquireLatestImage")?;
            let decoded = decode_image(image);
            AImage_delete(image);
            let frame = rotate_upright(decoded?, self.sensor_orientation);
            if self.lens_facing == LensFacing::Front {
                self.use_cases.deliver_mirrored(frame);
            } else {
                self.use_cases.deliver(frame);
            }
        }

        self.frame_count += 1;
        if self.timer.elapsed().as_millis() > 1000 {
            debug!("preview FPS:{}", self.frame_count);
            self.timer = Instant::now();
            self.frame_count = 0;
        }
        Ok(())
    }
}

unsafe fn decode_image(image: *mut AImage) -> Result<image::RgbaImage> {
    let (mut width, mut height) = (0, 0);
    check_media(AImage_getWidth(image, &mut width), "AImage_getWidth")?;
    check_media(AImage_getHeight(image, &mut height), "AImage_getHeight")?;

    let mut planes: [(*mut u8, c_int); 3] = [(null_mut(), 0); 3];
    for (index, plane) in planes.iter_mut().enumerate() {
        check_media(
            AImage_getPlaneData(image, index as c_int, &mut plane.0, &mut plane.1),
            "AImage_getPlaneData",
        )?;
    }
    let (mut y_row_stride, mut uv_row_stride, mut uv_pixel_stride) = (0, 0, 0);
    AImage_getPlaneRowStride(image, 0, &mut y_row_stride);
    AImage_getPlaneRowStride(image, 1, &mut uv_row_stride);
    AImage_getPlanePixelStride(image, 1, &mut uv_pixel_stride);

    let plane = |i: usize| slice::from_raw_parts(planes[i].0 as *const u8, planes[i].1 as usize);
    let yuv = YuvPlanes {
        y: plane(0),
        u: plane(1),
        v: plane(2),
        y_row_stride: y_row_stride as usize,
        uv_row_stride: uv_row_stride as usize,
        uv_pixel_stride: uv_pixel_stride as usize,
    };
    Ok(yuv420_to_rgba(&yuv, width as u32, height as u32))
}

unsafe extern "C" fn on_image_available(context: *mut c_void, reader: *mut AImageReader) {
    let sink = &mut *(context as *mut FrameSink);
    if let Err(err) = sink.on_image_available(reader) {
        warn!("preview frame dropped: {err}");
    }
}

unsafe extern "C" fn on_disconnected(_context: *mut c_void, device: *mut ACameraDevice) {
    info!("Camera(id: {:?}) is disconnected.", get_cstr(ACameraDevice_getId(device)));
}

unsafe extern "C" fn on_error(_context: *mut c_void, device: *mut ACameraDevice, error: c_int) {
    error!(
        "Error(code: {}) on Camera(id: {:?}).",
        error,
        get_cstr(ACameraDevice_getId(device))
    );
}

unsafe extern "C" fn on_session_closed(_context: *mut c_void, session: *mut ACameraCaptureSession) {
    debug!("Session is closed. {:?}", session);
}

unsafe extern "C" fn on_session_ready(_context: *mut c_void, session: *mut ACameraCaptureSession) {
    debug!("Session is ready. {:?}", session);
}

unsafe extern "C" fn on_session_active(_context: *mut c_void, session: *mut ACameraCaptureSession) {
    debug!("Session is activated. {:?}", session);
}

/// A Camera2 NDK device streaming YUV preview frames into bound use cases.
pub struct Camera2Device {
    camera_device: *mut ACameraDevice,
    image_reader: *mut AImageReader,
    capture_request: *mut ACaptureRequest,
    output_target: *mut ACameraOutputTarget,
    session_output: *mut ACaptureSessionOutput,
    output_container: *mut ACaptureSessionOutputContainer,
    capture_session: *mut ACameraCaptureSession,
    device_callbacks: Box<ACameraDevice_StateCallbacks>,
    session_callbacks: Box<ACameraCaptureSession_stateCallbacks>,
    image_listener: Box<AImageReader_ImageListener>,
    sink: Box<FrameSink>,
}

// NDK camera handles may be used from any thread; the listener context is
// only touched by the NDK callback thread while the reader is alive.
unsafe impl Send for Camera2Device {}

impl CameraDevice for Camera2Device {
    fn open(selector: CameraSelector, use_cases: UseCases) -> Result<Self> {
        let manager = CameraManager::new()?;
        let selected = manager.select(selector)?;
        let (width, height) = choose_preview_size(&selected.yuv_sizes, (PREVIEW_WIDTH, PREVIEW_HEIGHT))
            .unwrap_or((PREVIEW_WIDTH, PREVIEW_HEIGHT));
        info!(
            "opening camera {:?} {width}x{height} orientation {}",
            unsafe { get_cstr(selected.id) },
            selected.sensor_orientation
        );

        let mut device = Camera2Device {
            camera_device: null_mut(),
            image_reader: null_mut(),
            capture_request: null_mut(),
            output_target: null_mut(),
            session_output: null_mut(),
            output_container: null_mut(),
            capture_session: null_mut(),
            device_callbacks: Box::new(unsafe { zeroed() }),
            session_callbacks: Box::new(unsafe { zeroed() }),
            image_listener: Box::new(AImageReader_ImageListener {
                context: null_mut(),
                onImageAvailable: None,
            }),
            sink: Box::new(FrameSink {
                use_cases,
                sensor_orientation: selected.sensor_orientation,
                lens_facing: selector.lens_facing,
                timer: Instant::now(),
                frame_count: 0,
            }),
        };
        // on error, Drop releases whatever was created so far
        unsafe {
            device.device_callbacks.onDisconnected = Some(on_disconnected);
            device.device_callbacks.onError = Some(on_error);
            check(
                ACameraManager_openCamera(
                    manager.manager,
                    selected.id,
                    &mut *device.device_callbacks,
                    &mut device.camera_device,
                ),
                "ACameraManager_openCamera",
            )?;
            device.start_repeating(width, height)?;
        }
        Ok(device)
    }
}

impl Camera2Device {
    unsafe fn start_repeating(&mut self, width: u32, height: u32) -> Result<()> {
        check_media(
            AImageReader_new(
                width as i32,
                height as i32,
                AIMAGE_FORMATS::AIMAGE_FORMAT_YUV_420_888.0 as i32,
                2,
                &mut self.image_reader,
            ),
            "AImageReader_new",
        )?;
        self.image_listener.context = (&mut *self.sink as *mut FrameSink).cast();
        self.image_listener.onImageAvailable = Some(on_image_available);
        check_media(
            AImageReader_setImageListener(self.image_reader, &mut *self.image_listener),
            "AImageReader_setImageListener",
        )?;

        let mut window: *mut ANativeWindow = null_mut();
        check_media(
            AImageReader_getWindow(self.image_reader, &mut window),
            "AImageReader_getWindow",
        )?;

        check(
            ACameraDevice_createCaptureRequest(
                self.camera_device,
                ACameraDevice_request_template::TEMPLATE_PREVIEW,
                &mut self.capture_request,
            ),
            "ACameraDevice_createCaptureRequest",
        )?;
        check(
            ACameraOutputTarget_create(window, &mut self.output_target),
            "ACameraOutputTarget_create",
        )?;
        check(
            ACaptureRequest_addTarget(self.capture_request, self.output_target),
            "ACaptureRequest_addTarget",
        )?;

        check(
            ACaptureSessionOutput_create(window, &mut self.session_output),
            "ACaptureSessionOutput_create",
        )?;
        check(
            ACaptureSessionOutputContainer_create(&mut self.output_container),
            "ACaptureSessionOutputContainer_create",
        )?;
        check(
            ACaptureSessionOutputContainer_add(self.output_container, self.session_output),
            "ACaptureSessionOutputContainer_add",
        )?;

        self.session_callbacks.onClosed = Some(on_session_closed);
        self.session_callbacks.onReady = Some(on_session_ready);
        self.session_callbacks.onActive = Some(on_session_active);
        check(
            ACameraDevice_createCaptureSession(
                self.camera_device,
                self.output_container,
                &*self.session_callbacks,
                &mut self.capture_session,
            ),
            "ACameraDevice_createCaptureSession",
        )?;

        check(
            ACameraCaptureSession_setRepeatingRequest(
                self.capture_session,
                null_mut(),
                1,
                &mut self.capture_request,
                null_mut(),
            ),
            "ACameraCaptureSession_setRepeatingRequest",
        )
    }
}

impl Drop for Camera2Device {
    fn drop(&mut self) {
        unsafe {
            if !self.capture_session.is_null() {
                ACameraCaptureSession_stopRepeating(self.capture_session);
                ACameraCaptureSession_close(self.capture_session);
                self.capture_session = null_mut();
            }
            if !self.camera_device.is_null() {
                if ACameraDevice_close(self.camera_device) != camera_status_t::ACAMERA_OK {
                    error!("Failed to close CameraDevice.");
                }
                self.camera_device = null_mut();
            }
            if !self.capture_request.is_null() {
                ACaptureRequest_free(self.capture_request);
                self.capture_request = null_mut();
            }
            if !self.output_target.is_null() {
                ACameraOutputTarget_free(self.output_target);
                self.output_target = null_mut();
            }
            if !self.output_container.is_null() {
                ACaptureSessionOutputContainer_free(self.output_container);
                self.output_container = null_mut();
            }
            if !self.session_output.is_null() {
                ACaptureSessionOutput_free(self.session_output);
                self.session_output = null_mut();
            }
            if !self.image_reader.is_null() {
                // blocks until a running listener returns, so the sink outlives it
                AImageReader_delete(self.image_reader);
                self.image_reader = null_mut();
            }
        }
        info!("Close Camera");
    }
}

pub unsafe fn get_cstr<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    CStr::from_ptr(s).to_str().ok()
}

// --- JNI helpers ----------------------------------------------------------

fn with_activity<T>(
    app: &slint::android::AndroidApp,
    f: impl FnOnce(&mut JNIEnv, &JObject) -> Result<T>,
) -> Result<T> {
    unsafe {
        let vm = JavaVM::from_raw(app.vm_as_ptr() as *mut *const JNIInvokeInterface_)?;
        let mut env = vm.attach_current_thread()?;
        let activity: JObject<'_> = JObject::from_raw(app.activity_as_ptr() as *mut _jobject);
        f(&mut env, &activity)
    }
}

pub fn sdk_version(app: &slint::android::AndroidApp) -> Result<i32> {
    with_activity(app, |env, _| {
        Ok(env
            .get_static_field("android/os/Build$VERSION", "SDK_INT", "I")?
            .i()?)
    })
}

pub fn check_self_permission(app: &slint::android::AndroidApp, permission: &str) -> Result<bool> {
    with_activity(app, |env, activity| {
        let granted_int = env
            .get_static_field(
                "android/content/pm/PackageManager",
                "PERMISSION_GRANTED",
                "I",
            )?
            .i()?;
        let permission_str = env.new_string(permission)?;
        let result = env
            .call_method(
                activity,
                "checkSelfPermission",
                "(Ljava/lang/String;)I",
                &[JValueGen::Object(&JObject::from(permission_str))],
            )?
            .i()?;
        Ok(result == granted_int)
    })
}

pub fn request_permissions(
    app: &slint::android::AndroidApp,
    permissions: &[&str],
    request_code: i32,
) -> Result<()> {
    with_activity(app, |env, activity| {
        let java_permission_array =
            env.new_object_array(permissions.len() as jint, "java/lang/String", JObject::null())?;
        for (index, permission) in permissions.iter().enumerate() {
            let permission_str = env.new_string(*permission)?;
            env.set_object_array_element(&java_permission_array, index as jint, permission_str)?;
        }
        env.call_method(
            activity,
            "requestPermissions",
            "([Ljava/lang/String;I)V",
            &[
                JValueGen::Object(&JObject::from(java_permission_array)),
                request_code.into(),
            ],
        )?;
        Ok(())
    })
}

/// False while a system dialog (such as the permission prompt) covers the
/// activity.
pub fn has_window_focus(app: &slint::android::AndroidApp) -> Result<bool> {
    with_activity(app, |env, activity| {
        Ok(env.call_method(activity, "hasWindowFocus", "()Z", &[])?.z()?)
    })
}

fn absolute_path(env: &mut JNIEnv, file: &JObject) -> Result<PathBuf> {
    if file.is_null() {
        return Err(anyhow!("file is null"));
    }
    let path = env
        .call_method(file, "getAbsolutePath", "()Ljava/lang/String;", &[])?
        .l()?;
    let path: JString = path.into();
    let path: String = env.get_string(&path)?.into();
    Ok(PathBuf::from(path))
}

/// First entry of `Context.getExternalMediaDirs()`, if mounted.
pub fn external_media_dir(app: &slint::android::AndroidApp) -> Result<Option<PathBuf>> {
    with_activity(app, |env, activity| {
        let dirs = env
            .call_method(activity, "getExternalMediaDirs", "()[Ljava/io/File;", &[])?
            .l()?;
        if dirs.is_null() {
            return Ok(None);
        }
        let dirs = JObjectArray::from(dirs);
        if env.get_array_length(&dirs)? < 1 {
            return Ok(None);
        }
        let first = env.get_object_array_element(&dirs, 0)?;
        if first.is_null() {
            return Ok(None);
        }
        absolute_path(env, &first).map(Some)
    })
}

pub fn files_dir(app: &slint::android::AndroidApp) -> Result<PathBuf> {
    with_activity(app, |env, activity| {
        let file = env
            .call_method(activity, "getFilesDir", "()Ljava/io/File;", &[])?
            .l()?;
        absolute_path(env, &file)
    })
}

pub fn finish_activity(app: &slint::android::AndroidApp) -> Result<()> {
    with_activity(app, |env, activity| {
        env.call_method(activity, "finish", "()V", &[])?;
        Ok(())
    })
}
