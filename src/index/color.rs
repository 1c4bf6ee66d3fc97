//! Dominant color extraction: quantize pixels into a coarse RGB
//! histogram, pick the most populated bucket, and average its members.
//! Runs over a downscaled copy, with rayon splitting the pixel rows.

use image::DynamicImage;
use rayon::prelude::*;

const SAMPLE_EDGE: u32 = 64;
// 3 bits per channel: 512 buckets.
const BUCKET_BITS: u32 = 3;
const BUCKETS: usize = 1 << (3 * BUCKET_BITS);

#[derive(Clone, Copy, Default)]
struct Bucket {
    count: u64,
    r: u64,
    g: u64,
    b: u64,
}

/// Packed 0xRRGGBB of the image's most prominent color. Never returns
/// zero: zero is the catalog's "not computed yet" sentinel, so pure
/// black maps to 0x000001.
pub fn dominant_color(img: &DynamicImage) -> u32 {
    let small = img.thumbnail(SAMPLE_EDGE, SAMPLE_EDGE).to_rgb8();
    let width = small.width() as usize;
    let rows: Vec<&[u8]> = small.as_raw().chunks(width * 3).collect();

    let histogram = rows
        .par_iter()
        .fold(
            || vec![Bucket::default(); BUCKETS],
            |mut acc, row| {
                for px in row.chunks_exact(3) {
                    let (r, g, b) = (px[0] as u64, px[1] as u64, px[2] as u64);
                    let bucket = bucket_index(px[0], px[1], px[2]);
                    let slot = &mut acc[bucket];
                    slot.count += 1;
                    slot.r += r;
                    slot.g += g;
                    slot.b += b;
                }
                acc
            },
        )
        .reduce(
            || vec![Bucket::default(); BUCKETS],
            |mut left, right| {
                for (l, r) in left.iter_mut().zip(right) {
                    l.count += r.count;
                    l.r += r.r;
                    l.g += r.g;
                    l.b += r.b;
                }
                left
            },
        );

    let best = histogram
        .iter()
        .max_by_key(|bucket| bucket.count)
        .copied()
        .unwrap_or_default();
    if best.count == 0 {
        return 0x000001;
    }
    let r = (best.r / best.count) as u32;
    let g = (best.g / best.count) as u32;
    let b = (best.b / best.count) as u32;
    let packed = (r << 16) | (g << 8) | b;
    packed.max(0x000001)
}

fn bucket_index(r: u8, g: u8, b: u8) -> usize {
    let shift = 8 - BUCKET_BITS;
    (((r as usize >> shift) << (2 * BUCKET_BITS))
        | ((g as usize >> shift) << BUCKET_BITS)
        | (b as usize >> shift)) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid(r: u8, g: u8, b: u8) -> DynamicImage {
        let mut img = RgbImage::new(16, 16);
        for px in img.pixels_mut() {
            *px = Rgb([r, g, b]);
        }
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_solid_color_comes_back_exact() {
        assert_eq!(dominant_color(&solid(200, 40, 120)), 0xC82878);
    }

    #[test]
    fn test_majority_color_wins() {
        let mut img = RgbImage::new(10, 10);
        for (i, px) in img.pixels_mut().enumerate() {
            // 70 red pixels, 30 blue.
            *px = if i < 70 {
                Rgb([220, 10, 10])
            } else {
                Rgb([10, 10, 220])
            };
        }
        let packed = dominant_color(&DynamicImage::ImageRgb8(img));
        let red = (packed >> 16) & 0xFF;
        let blue = packed & 0xFF;
        assert!(red > 180 && blue < 60, "expected red dominance, got {:06x}", packed);
    }

    #[test]
    fn test_black_never_returns_zero() {
        let packed = dominant_color(&solid(0, 0, 0));
        assert_ne!(packed, 0, "zero is reserved for 'not computed'");
    }
}
