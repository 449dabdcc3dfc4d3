pub mod app;
pub mod camera;
pub mod constants;
pub mod controller;
pub mod executor;
pub mod storage;

#[cfg(target_os = "android")]
#[no_mangle]
fn android_main(app: slint::android::AndroidApp) {
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(log::LevelFilter::Info)
            .with_tag(constants::LOG_TAG),
    );
    if let Err(err) = slint::android::init(app.clone()) {
        log::error!("slint init failed: {err}");
        return;
    }
    if let Err(err) = app::run(app) {
        log::error!("camera screen failed: {err:?}");
    }
}
