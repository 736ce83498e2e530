//! Frame conditioning ahead of face detection: tiled contrast-limited
//! histogram equalization on luma, a light Gaussian blur against
//! compression blocking, and a width cap.

use image::{imageops, imageops::FilterType, Rgb, RgbImage};

use crate::camera::CameraFrame;
use crate::config::PipelineConfig;

#[derive(Debug, Clone, Copy)]
pub struct EnhanceSettings {
    pub clip_limit: f32,
    pub tiles: u32,
    pub blur_sigma: f32,
    pub max_width: u32,
}

impl From<&PipelineConfig> for EnhanceSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            clip_limit: config.clahe_clip_limit,
            tiles: config.clahe_tiles,
            blur_sigma: config.blur_sigma,
            max_width: config.max_detection_width,
        }
    }
}

/// Returns the conditioned frame and the scale factor applied to it
/// (1.0 when no downscale happened).
pub fn prepare_for_detection(frame: &CameraFrame, settings: &EnhanceSettings) -> (CameraFrame, f32) {
    let equalized = equalize_local_contrast(&frame.image, settings.clip_limit, settings.tiles);
    let blurred = if settings.blur_sigma > 0.0 {
        imageops::blur(&equalized, settings.blur_sigma)
    } else {
        equalized
    };
    let (image, scale) = downscale(blurred, settings.max_width);

    (
        CameraFrame {
            camera_id: frame.camera_id,
            image,
            timestamp_ms: frame.timestamp_ms,
            sequence_num: frame.sequence_num,
        },
        scale,
    )
}

pub fn downscale(image: RgbImage, max_width: u32) -> (RgbImage, f32) {
    let (width, height) = image.dimensions();
    if max_width == 0 || width <= max_width {
        return (image, 1.0);
    }
    let scale = max_width as f32 / width as f32;
    let new_height = ((height as f32 * scale) as u32).max(1);
    (
        imageops::resize(&image, max_width, new_height, FilterType::Triangle),
        scale,
    )
}

fn luma(pixel: &Rgb<u8>) -> u8 {
    let [r, g, b] = pixel.0;
    (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32).round().min(255.0) as u8
}

pub fn equalize_local_contrast(image: &RgbImage, clip_limit: f32, tiles: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    let tile_w = (width + tiles.clamp(1, width) - 1) / tiles.clamp(1, width);
    let tile_h = (height + tiles.clamp(1, height) - 1) / tiles.clamp(1, height);
    let tiles_x = (width + tile_w - 1) / tile_w;
    let tiles_y = (height + tile_h - 1) / tile_h;

    let lumas: Vec<u8> = image.pixels().map(luma).collect();

    let mut luts = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let (x0, y0) = (tx * tile_w, ty * tile_h);
            let (x1, y1) = ((x0 + tile_w).min(width), (y0 + tile_h).min(height));
            let mut histogram = [0u32; 256];
            for y in y0..y1 {
                let row = (y * width) as usize;
                for x in x0..x1 {
                    histogram[lumas[row + x as usize] as usize] += 1;
                }
            }
            luts.push(clipped_lut(&mut histogram, (x1 - x0) * (y1 - y0), clip_limit));
        }
    }

    let lut = |tx: u32, ty: u32, value: u8| luts[(ty * tiles_x + tx) as usize][value as usize] as f32;
    let neighbours = |pos: u32, tile: u32, count: u32| {
        let grid = ((pos as f32 + 0.5) / tile as f32 - 0.5).max(0.0);
        let lo = (grid.floor() as u32).min(count - 1);
        let hi = (lo + 1).min(count - 1);
        let frac = if hi == lo { 0.0 } else { (grid - lo as f32).min(1.0) };
        (lo, hi, frac)
    };

    let mut output = RgbImage::new(width, height);
    for (x, y, pixel) in image.enumerate_pixels() {
        let value = lumas[(y * width + x) as usize];
        let (tx0, tx1, fx) = neighbours(x, tile_w, tiles_x);
        let (ty0, ty1, fy) = neighbours(y, tile_h, tiles_y);

        let top = lut(tx0, ty0, value) * (1.0 - fx) + lut(tx1, ty0, value) * fx;
        let bottom = lut(tx0, ty1, value) * (1.0 - fx) + lut(tx1, ty1, value) * fx;
        let equalized = top * (1.0 - fy) + bottom * fy;

        let out = if value == 0 {
            let level = equalized.round().clamp(0.0, 255.0) as u8;
            Rgb([level, level, level])
        } else {
            let ratio = equalized / value as f32;
            let [r, g, b] = pixel.0;
            Rgb([r, g, b].map(|c| (c as f32 * ratio).round().clamp(0.0, 255.0) as u8))
        };
        output.put_pixel(x, y, out);
    }
    output
}

fn clipped_lut(histogram: &mut [u32; 256], count: u32, clip_limit: f32) -> [u8; 256] {
    let limit = (clip_limit * count as f32 / 256.0).max(1.0) as u32;

    let mut excess = 0u32;
    for bin in histogram.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }
    let bonus = excess / 256;
    let mut residual = excess % 256;
    for bin in histogram.iter_mut() {
        *bin += bonus;
        if residual > 0 {
            *bin += 1;
            residual -= 1;
        }
    }

    let mut lut = [0u8; 256];
    let mut cdf = 0u32;
    for (value, bin) in histogram.iter().enumerate() {
        cdf += bin;
        lut[value] = ((cdf as u64 * 255) / count.max(1) as u64).min(255) as u8;
    }
    lut
}
