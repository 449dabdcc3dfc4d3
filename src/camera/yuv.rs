//! YUV_420_888 to RGBA conversion and sensor rotation.

use image::{
    imageops::{rotate180, rotate270, rotate90},
    RgbaImage,
};

/// Plane views of one YUV_420_888 image as handed out by `AImage`.
pub struct YuvPlanes<'a> {
    pub y: &'a [u8],
    pub u: &'a [u8],
    pub v: &'a [u8],
    pub y_row_stride: usize,
    pub uv_row_stride: usize,
    pub uv_pixel_stride: usize,
}

/// BT.601 limited range, fixed point. Out-of-range plane reads become black
/// or neutral chroma instead of panicking.
pub fn yuv420_to_rgba(planes: &YuvPlanes, width: u32, height: u32) -> RgbaImage {
    let mut rgba = RgbaImage::new(width, height);
    for row in 0..height as usize {
        let y_row = row * planes.y_row_stride;
        let uv_row = (row >> 1) * planes.uv_row_stride;
        for col in 0..width as usize {
            let y = planes.y.get(y_row + col).copied().unwrap_or(16) as i32;
            let uv_index = uv_row + (col >> 1) * planes.uv_pixel_stride;
            let u = planes.u.get(uv_index).copied().unwrap_or(128) as i32 - 128;
            let v = planes.v.get(uv_index).copied().unwrap_or(128) as i32 - 128;

            let y1192 = 1192 * (y - 16).max(0);
            let r = (y1192 + 1634 * v).clamp(0, 262143);
            let g = (y1192 - 833 * v - 400 * u).clamp(0, 262143);
            let b = (y1192 + 2066 * u).clamp(0, 262143);

            rgba.put_pixel(
                col as u32,
                row as u32,
                image::Rgba([(r >> 10) as u8, (g >> 10) as u8, (b >> 10) as u8, 255]),
            );
        }
    }
    rgba
}

/// Rotate a sensor frame upright. Handedness is left as the sensor saw it.
pub fn rotate_upright(frame: RgbaImage, sensor_orientation: i32) -> RgbaImage {
    match sensor_orientation.rem_euclid(360) {
        90 => rotate90(&frame),
        180 => rotate180(&frame),
        270 => rotate270(&frame),
        _ => frame,
    }
}

/// kamera hands out BGRA; swap to RGBA in place.
pub fn bgra_to_rgba(data: &mut [u8]) {
    for px in data.chunks_exact_mut(4) {
        px.swap(0, 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planes<'a>(y: &'a [u8], u: &'a [u8], v: &'a [u8], w: usize, pixel_stride: usize) -> YuvPlanes<'a> {
        YuvPlanes {
            y,
            u,
            v,
            y_row_stride: w,
            uv_row_stride: w / 2 * pixel_stride,
            uv_pixel_stride: pixel_stride,
        }
    }

    #[test]
    fn neutral_chroma_is_grey() {
        let y = [16u8, 235, 16, 235, 16, 235, 16, 235];
        let u = [128u8; 2];
        let v = [128u8; 2];
        let img = yuv420_to_rgba(&planes(&y, &u, &v, 4, 1), 4, 2);
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 0, 255]);
        let white = img.get_pixel(1, 0).0;
        assert!(white[0] >= 254 && white[1] >= 254 && white[2] >= 254);
    }

    #[test]
    fn strong_v_is_red() {
        let y = [82u8; 4];
        let u = [90u8];
        let v = [240u8];
        let img = yuv420_to_rgba(&planes(&y, &u, &v, 2, 1), 2, 2);
        let px = img.get_pixel(1, 1).0;
        assert!(px[0] > 200 && px[1] < 60 && px[2] < 60, "{px:?}");
    }

    #[test]
    fn interleaved_chroma_uses_pixel_stride() {
        // NV21-like layout: v and u share a buffer offset by one
        let y = [128u8; 8];
        let vu = [200u8, 60, 128, 128];
        let planes = YuvPlanes {
            y: &y,
            u: &vu[1..],
            v: &vu[..],
            y_row_stride: 4,
            uv_row_stride: 4,
            uv_pixel_stride: 2,
        };
        let img = yuv420_to_rgba(&planes, 4, 2);
        assert_ne!(img.get_pixel(0, 0), img.get_pixel(2, 0));
        assert_eq!(img.get_pixel(0, 0), img.get_pixel(1, 1));
    }

    #[test]
    fn short_planes_do_not_panic() {
        let img = yuv420_to_rgba(&planes(&[], &[], &[], 4, 1), 4, 2);
        assert_eq!(img.dimensions(), (4, 2));
    }

    #[test]
    fn orientation_swaps_dimensions() {
        let frame = RgbaImage::new(6, 4);
        assert_eq!(rotate_upright(frame.clone(), 90).dimensions(), (4, 6));
        assert_eq!(rotate_upright(frame.clone(), -90).dimensions(), (4, 6));
        assert_eq!(rotate_upright(frame, 0).dimensions(), (6, 4));
    }

    #[test]
    fn rotation_keeps_handedness() {
        let mut frame = RgbaImage::new(2, 1);
        frame.put_pixel(0, 0, image::Rgba([255, 0, 0, 255]));
        let out = rotate_upright(frame, 180);
        assert_eq!(out.get_pixel(1, 0).0, [255, 0, 0, 255]);
        let out = rotate_upright(out, 0);
        assert_eq!(out.get_pixel(0, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn bgra_swap() {
        let mut px = [1u8, 2, 3, 4, 5, 6, 7, 8];
        bgra_to_rgba(&mut px);
        assert_eq!(px, [3, 2, 1, 4, 7, 6, 5, 8]);
    }
}
