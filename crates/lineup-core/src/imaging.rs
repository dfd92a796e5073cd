//! Pixel transforms on `image` buffers: luma, YCrCb round trip, histogram
//! equalization, smoothing, resize and region statistics.
//!
//! Buffers are row-major and interleaved. Neighbourhood operations reflect at
//! the border without repeating the edge pixel (`gfedcb|abcdefgh|gfedcba`).

use crate::types::FaceRect;
use image::{GrayImage, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

/// Rec. 601 luma weights.
const LUMA_R: f32 = 0.299;
const LUMA_G: f32 = 0.587;
const LUMA_B: f32 = 0.114;

const CR_SCALE: f32 = 0.713;
const CB_SCALE: f32 = 0.564;
const CHROMA_OFFSET: f32 = 128.0;

/// Edge-preserving smoothing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BilateralParams {
    /// Neighbourhood diameter in pixels.
    pub diameter: u32,
    pub sigma_color: f32,
    pub sigma_space: f32,
}

impl Default for BilateralParams {
    fn default() -> Self {
        Self {
            diameter: 9,
            sigma_color: 75.0,
            sigma_space: 75.0,
        }
    }
}

fn luma(r: u8, g: u8, b: u8) -> f32 {
    LUMA_R * r as f32 + LUMA_G * g as f32 + LUMA_B * b as f32
}

fn to_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Mirror an out-of-range index back into `0..n`.
fn reflect101(mut i: i64, n: usize) -> usize {
    let n = n as i64;
    if n <= 1 {
        return 0;
    }
    loop {
        if i < 0 {
            i = -i;
        } else if i >= n {
            i = 2 * n - 2 - i;
        } else {
            return i as usize;
        }
    }
}

/// Convert a color image to single-channel luma.
pub fn to_gray(image: &RgbImage) -> GrayImage {
    let (w, h) = image.dimensions();
    let data = image
        .pixels()
        .map(|Rgb([r, g, b])| to_u8(luma(*r, *g, *b)))
        .collect();
    GrayImage::from_raw(w, h, data).unwrap_or_else(|| GrayImage::new(w, h))
}

/// Equalize the histogram of an 8-bit plane in place.
///
/// The darkest occupied level maps to 0 and the cumulative distribution of
/// the remaining levels is stretched to 255. A constant plane is left as is.
pub fn equalize_histogram(plane: &mut [u8]) {
    if plane.is_empty() {
        return;
    }

    let mut hist = [0u32; 256];
    for &p in plane.iter() {
        hist[p as usize] += 1;
    }

    let total = plane.len() as u32;
    let first = hist.iter().position(|&c| c > 0).unwrap_or(0);
    if hist[first] == total {
        return;
    }

    let scale = 255.0 / (total - hist[first]) as f32;
    let mut lut = [0u8; 256];
    let mut sum = 0u32;
    for level in (first + 1)..256 {
        sum += hist[level];
        lut[level] = to_u8(sum as f32 * scale);
    }

    for p in plane.iter_mut() {
        *p = lut[*p as usize];
    }
}

/// Equalize only the luminance of a color image, leaving chroma untouched.
///
/// Converts to YCrCb, equalizes Y, converts back.
pub fn equalize_luminance(image: &mut RgbImage) {
    let mut y_plane: Vec<u8> = Vec::with_capacity((image.width() * image.height()) as usize);
    let mut chroma: Vec<(f32, f32)> = Vec::with_capacity(y_plane.capacity());

    for Rgb([r, g, b]) in image.pixels() {
        let y = luma(*r, *g, *b);
        let cr = (*r as f32 - y) * CR_SCALE + CHROMA_OFFSET;
        let cb = (*b as f32 - y) * CB_SCALE + CHROMA_OFFSET;
        y_plane.push(to_u8(y));
        chroma.push((cr, cb));
    }

    equalize_histogram(&mut y_plane);

    for ((pixel, &y), &(cr, cb)) in image.pixels_mut().zip(y_plane.iter()).zip(chroma.iter()) {
        let y = y as f32;
        let dcr = cr - CHROMA_OFFSET;
        let dcb = cb - CHROMA_OFFSET;
        *pixel = Rgb([
            to_u8(y + 1.403 * dcr),
            to_u8(y - 0.714 * dcr - 0.344 * dcb),
            to_u8(y + 1.773 * dcb),
        ]);
    }
}

/// 3×3 Gaussian blur (binomial 1-2-1 kernel) over every channel.
pub fn gaussian_blur_3x3(data: &[u8], width: usize, height: usize, channels: usize) -> Vec<u8> {
    if width == 0 || height == 0 {
        return data.to_vec();
    }

    let row = width * channels;
    let mut horizontal = vec![0u16; data.len()];
    for y in 0..height {
        for x in 0..width {
            let xl = reflect101(x as i64 - 1, width);
            let xr = reflect101(x as i64 + 1, width);
            for c in 0..channels {
                let at = |xx: usize| data[y * row + xx * channels + c] as u16;
                horizontal[y * row + x * channels + c] = at(xl) + 2 * at(x) + at(xr);
            }
        }
    }

    let mut out = vec![0u8; data.len()];
    for y in 0..height {
        let yu = reflect101(y as i64 - 1, height);
        let yd = reflect101(y as i64 + 1, height);
        for i in 0..row {
            let sum = horizontal[yu * row + i] + 2 * horizontal[y * row + i] + horizontal[yd * row + i];
            out[y * row + i] = ((sum + 8) / 16) as u8;
        }
    }
    out
}

/// Bilinear resize of an interleaved buffer to `new_w` × `new_h`.
pub fn resize_bilinear(
    data: &[u8],
    width: usize,
    height: usize,
    channels: usize,
    new_w: usize,
    new_h: usize,
) -> Vec<u8> {
    let mut resized = vec![0u8; new_w * new_h * channels];
    if width == 0 || height == 0 {
        return resized;
    }

    let scale_x = width as f32 / new_w as f32;
    let scale_y = height as f32 / new_h as f32;

    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);
        let fy = if src_y < 0.0 { 0.0 } else { fy };

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);
            let fx = if src_x < 0.0 { 0.0 } else { fx };

            for c in 0..channels {
                let px = |xx: usize, yy: usize| data[(yy * width + xx) * channels + c] as f32;
                let val = px(x0, y0) * (1.0 - fx) * (1.0 - fy)
                    + px(x1, y0) * fx * (1.0 - fy)
                    + px(x0, y1) * (1.0 - fx) * fy
                    + px(x1, y1) * fx * fy;
                resized[(y * new_w + x) * channels + c] = to_u8(val);
            }
        }
    }

    resized
}

/// Resize a grayscale image with bilinear interpolation.
pub fn resize_gray(image: &GrayImage, new_w: u32, new_h: u32) -> GrayImage {
    let (w, h) = image.dimensions();
    if (w, h) == (new_w, new_h) {
        return image.clone();
    }
    let data = resize_bilinear(image.as_raw(), w as usize, h as usize, 1, new_w as usize, new_h as usize);
    GrayImage::from_raw(new_w, new_h, data).unwrap_or_else(|| GrayImage::new(new_w, new_h))
}

/// Resize a color image with bilinear interpolation.
pub fn resize_rgb(image: &RgbImage, new_w: u32, new_h: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    let data = resize_bilinear(image.as_raw(), w as usize, h as usize, 3, new_w as usize, new_h as usize);
    RgbImage::from_raw(new_w, new_h, data).unwrap_or_else(|| RgbImage::new(new_w, new_h))
}

/// Copy out the pixels under `rect`, or `None` if it leaves the image or is empty.
pub fn crop_rgb(image: &RgbImage, rect: &FaceRect) -> Option<RgbImage> {
    if !rect.fits_within(image.width(), image.height()) {
        return None;
    }
    Some(image::imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image())
}

/// Copy out the grayscale pixels under `rect`.
pub fn crop_gray(image: &GrayImage, rect: &FaceRect) -> Option<GrayImage> {
    if !rect.fits_within(image.width(), image.height()) {
        return None;
    }
    Some(image::imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image())
}

/// Edge-preserving bilateral filter on a grayscale image.
///
/// Each output pixel is a weighted mean over a circular neighbourhood, the
/// weight falling off with both spatial distance and intensity difference.
pub fn bilateral_filter(image: &GrayImage, params: &BilateralParams) -> GrayImage {
    let (w, h) = image.dimensions();
    let (w, h) = (w as usize, h as usize);
    let src = image.as_raw();
    if w == 0 || h == 0 {
        return image.clone();
    }

    let radius = (params.diameter / 2).max(1) as i64;
    let space_coeff = -0.5 / (params.sigma_space * params.sigma_space);
    let color_coeff = -0.5 / (params.sigma_color * params.sigma_color);

    let mut offsets: Vec<(i64, i64, f32)> = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let r2 = (dx * dx + dy * dy) as f32;
            if r2 > (radius * radius) as f32 {
                continue;
            }
            offsets.push((dx, dy, (r2 * space_coeff).exp()));
        }
    }

    let color_weight: Vec<f32> = (0..256)
        .map(|d| ((d * d) as f32 * color_coeff).exp())
        .collect();

    let mut out = vec![0u8; w * h];
    for y in 0..h {
        for x in 0..w {
            let center = src[y * w + x] as i32;
            let mut sum = 0.0f32;
            let mut wsum = 0.0f32;
            for &(dx, dy, ws) in &offsets {
                let sx = reflect101(x as i64 + dx, w);
                let sy = reflect101(y as i64 + dy, h);
                let v = src[sy * w + sx] as i32;
                let weight = ws * color_weight[(v - center).unsigned_abs() as usize];
                sum += weight * v as f32;
                wsum += weight;
            }
            out[y * w + x] = if wsum > 0.0 { to_u8(sum / wsum) } else { center as u8 };
        }
    }

    GrayImage::from_raw(w as u32, h as u32, out).unwrap_or_else(|| image.clone())
}

/// Mean and population standard deviation of a grayscale plane.
pub fn mean_std(plane: &[u8]) -> (f64, f64) {
    if plane.is_empty() {
        return (0.0, 0.0);
    }
    let n = plane.len() as f64;
    let (sum, sum_sq) = plane.iter().fold((0.0f64, 0.0f64), |(s, sq), &p| {
        let v = p as f64;
        (s + v, sq + v * v)
    });
    let mean = sum / n;
    let variance = (sum_sq / n - mean * mean).max(0.0);
    (mean, variance.sqrt())
}

/// Variance of the 4-neighbour Laplacian response; low values mean blur.
pub fn laplacian_variance(plane: &[u8], width: usize, height: usize) -> f64 {
    if width == 0 || height == 0 || plane.len() < width * height {
        return 0.0;
    }

    let mut responses = Vec::with_capacity(width * height);
    for y in 0..height {
        let yu = reflect101(y as i64 - 1, height);
        let yd = reflect101(y as i64 + 1, height);
        for x in 0..width {
            let xl = reflect101(x as i64 - 1, width);
            let xr = reflect101(x as i64 + 1, width);
            let at = |xx: usize, yy: usize| plane[yy * width + xx] as f64;
            responses.push(at(x, yu) + at(x, yd) + at(xl, y) + at(xr, y) - 4.0 * at(x, y));
        }
    }

    let n = responses.len() as f64;
    let mean = responses.iter().sum::<f64>() / n;
    responses.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n
}
