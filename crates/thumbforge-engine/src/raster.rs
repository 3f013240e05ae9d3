//! In-process raster operations: decode, fit, trim, flatten, enhance, encode.
//!
//! Everything here is CPU-bound and synchronous; callers go through
//! [`render_file`], which runs on the blocking pool.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader, Rgb, RgbImage, Rgba, RgbaImage};
use thumbforge_core::types::{FitMode, ThumbnailFormat, ThumbnailOptions};

use crate::error::ConversionError;

/// Geometry produced by [`plan_fit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitPlan {
    /// Size to resample the source to.
    pub resize: (u32, u32),
    /// Centered crop `(x, y, width, height)` applied after resampling.
    pub crop: Option<(u32, u32, u32, u32)>,
    /// Canvas the result is centered on.
    pub canvas: Option<(u32, u32)>,
}

impl FitPlan {
    /// Final output dimensions.
    pub fn output(&self) -> (u32, u32) {
        if let Some(canvas) = self.canvas {
            canvas
        } else if let Some((_, _, w, h)) = self.crop {
            (w, h)
        } else {
            self.resize
        }
    }
}

/// Map a source size onto a target box.
///
/// Without `allow_enlarge` the source is never scaled up; `contain` still
/// pads to the exact box.
pub fn plan_fit(src: (u32, u32), target: (u32, u32), fit: FitMode, allow_enlarge: bool) -> FitPlan {
    let (sw, sh) = (src.0.max(1), src.1.max(1));
    let (tw, th) = (target.0.max(1), target.1.max(1));
    let wr = f64::from(tw) / f64::from(sw);
    let hr = f64::from(th) / f64::from(sh);

    let limit = |scale: f64| if allow_enlarge { scale } else { scale.min(1.0) };
    let scaled = |scale: f64| {
        (
            (f64::from(sw) * scale).round().max(1.0) as u32,
            (f64::from(sh) * scale).round().max(1.0) as u32,
        )
    };

    match fit {
        FitMode::Cover => {
            let (rw, rh) = scaled(limit(wr.max(hr)));
            let (cw, ch) = (rw.min(tw), rh.min(th));
            let crop = ((cw, ch) != (rw, rh)).then(|| ((rw - cw) / 2, (rh - ch) / 2, cw, ch));
            FitPlan {
                resize: (rw, rh),
                crop,
                canvas: None,
            }
        }
        FitMode::Contain => {
            let (rw, rh) = scaled(limit(wr.min(hr)));
            FitPlan {
                resize: (rw.min(tw), rh.min(th)),
                crop: None,
                canvas: Some((tw, th)),
            }
        }
        FitMode::Fill => {
            let resize = if allow_enlarge {
                (tw, th)
            } else {
                (tw.min(sw), th.min(sh))
            };
            FitPlan {
                resize,
                crop: None,
                canvas: None,
            }
        }
        FitMode::Inside => {
            let (rw, rh) = scaled(limit(wr.min(hr)));
            FitPlan {
                resize: (rw.min(tw), rh.min(th)),
                crop: None,
                canvas: None,
            }
        }
        FitMode::Outside => FitPlan {
            resize: scaled(limit(wr.max(hr))),
            crop: None,
            canvas: None,
        },
    }
}

/// Apply a [`FitPlan`] with a Lanczos3 resampler.
pub fn apply_fit(img: DynamicImage, plan: &FitPlan) -> DynamicImage {
    let mut out = if (img.width(), img.height()) == plan.resize {
        img
    } else {
        img.resize_exact(plan.resize.0, plan.resize.1, FilterType::Lanczos3)
    };

    if let Some((x, y, w, h)) = plan.crop {
        out = out.crop_imm(x, y, w, h);
    }

    if let Some((cw, ch)) = plan.canvas {
        if (out.width(), out.height()) != (cw, ch) {
            let mut canvas = RgbaImage::from_pixel(cw, ch, Rgba([0, 0, 0, 0]));
            let x = i64::from((cw - out.width().min(cw)) / 2);
            let y = i64::from((ch - out.height().min(ch)) / 2);
            image::imageops::overlay(&mut canvas, &out.to_rgba8(), x, y);
            out = DynamicImage::ImageRgba8(canvas);
        }
    }

    out
}

/// Crop away uniform near-black borders.
///
/// A pixel counts as border when it is transparent or no channel exceeds
/// `threshold`. An image that is border everywhere is returned unchanged.
pub fn trim_dark_borders(img: DynamicImage, threshold: u8) -> DynamicImage {
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();

    let mut min_x = w;
    let mut min_y = h;
    let mut max_x = 0;
    let mut max_y = 0;

    for (x, y, px) in rgba.enumerate_pixels() {
        let [r, g, b, a] = px.0;
        if a > 0 && r.max(g).max(b) > threshold {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }

    if min_x > max_x || min_y > max_y {
        return img;
    }

    let (cw, ch) = (max_x - min_x + 1, max_y - min_y + 1);
    if (cw, ch) == (w, h) {
        return img;
    }
    img.crop_imm(min_x, min_y, cw, ch)
}

/// Composite onto a white background and drop alpha.
pub fn flatten_white(img: &DynamicImage) -> DynamicImage {
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();
    let out = RgbImage::from_fn(w, h, |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let blend = |c: u8| -> u8 {
            let a = u32::from(a);
            ((u32::from(c) * a + 255 * (255 - a)) / 255) as u8
        };
        Rgb([blend(r), blend(g), blend(b)])
    });
    DynamicImage::ImageRgb8(out)
}

/// Stretch levels so the 0.5% darkest and brightest values span 0..=255.
///
/// Images with almost no tonal range are left alone.
pub fn normalize_levels(img: DynamicImage) -> DynamicImage {
    let mut rgba = img.to_rgba8();
    let mut histogram = [0u64; 256];
    let mut total = 0u64;

    for px in rgba.pixels() {
        let [r, g, b, a] = px.0;
        if a == 0 {
            continue;
        }
        histogram[usize::from(r)] += 1;
        histogram[usize::from(g)] += 1;
        histogram[usize::from(b)] += 1;
        total += 3;
    }
    if total == 0 {
        return DynamicImage::ImageRgba8(rgba);
    }

    let tail = total / 200;
    let low = percentile_index(&histogram, tail);
    let high = 255 - percentile_index_rev(&histogram, tail);
    if u16::from(high) <= u16::from(low) + 8 {
        return DynamicImage::ImageRgba8(rgba);
    }

    let span = f32::from(high - low);
    let lut: Vec<u8> = (0..=255u16)
        .map(|v| {
            let v = v as u8;
            let scaled = (f32::from(v.saturating_sub(low)) * 255.0 / span).round();
            scaled.clamp(0.0, 255.0) as u8
        })
        .collect();

    for px in rgba.pixels_mut() {
        for c in 0..3 {
            px.0[c] = lut[usize::from(px.0[c])];
        }
    }
    DynamicImage::ImageRgba8(rgba)
}

fn percentile_index(histogram: &[u64; 256], tail: u64) -> u8 {
    let mut seen = 0;
    for (i, count) in histogram.iter().enumerate() {
        seen += count;
        if seen > tail {
            return i as u8;
        }
    }
    255
}

fn percentile_index_rev(histogram: &[u64; 256], tail: u64) -> u8 {
    let mut seen = 0;
    for (i, count) in histogram.iter().rev().enumerate() {
        seen += count;
        if seen > tail {
            return i as u8;
        }
    }
    255
}

/// Mild unsharp mask.
pub fn sharpen(img: &DynamicImage) -> DynamicImage {
    img.unsharpen(0.8, 2)
}

/// Encode to the thumbnail format.
pub fn encode(
    img: &DynamicImage,
    format: ThumbnailFormat,
    quality: u8,
) -> Result<Vec<u8>, ConversionError> {
    let mut buf = Vec::new();

    match format {
        ThumbnailFormat::Png => {
            img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
        }
        ThumbnailFormat::Jpg => {
            let flat = if img.color().has_alpha() {
                flatten_white(img)
            } else {
                DynamicImage::ImageRgb8(img.to_rgb8())
            };
            flat.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;
        }
        ThumbnailFormat::Webp => {
            let rgba = img.to_rgba8();
            let memory = webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height())
                .encode(f32::from(quality));
            // WebPMemory is !Send; copy out before returning.
            buf.extend_from_slice(&memory);
        }
    }

    if buf.is_empty() {
        return Err(ConversionError::PostProcessing(format!(
            "{format} encoder produced no data"
        )));
    }
    Ok(buf)
}

/// Decode a raster, honoring EXIF orientation.
pub fn decode(path: &Path) -> Result<DynamicImage, ConversionError> {
    let mut decoder = ImageReader::open(path)?
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);
    Ok(img)
}

/// Dimensions read from the header only.
pub fn dimensions(path: &Path) -> Result<(u32, u32), ConversionError> {
    Ok(ImageReader::open(path)?
        .with_guessed_format()?
        .into_dimensions()?)
}

/// Thumbnail format a file is actually encoded in, from its leading bytes.
pub async fn sniff_format(path: &Path) -> Option<ThumbnailFormat> {
    use tokio::io::AsyncReadExt;

    let mut header = [0u8; 16];
    let mut file = tokio::fs::File::open(path).await.ok()?;
    let mut filled = 0;
    while filled < header.len() {
        match file.read(&mut header[filled..]).await.ok()? {
            0 => break,
            n => filled += n,
        }
    }

    match image::guess_format(&header[..filled]).ok()? {
        ImageFormat::Png => Some(ThumbnailFormat::Png),
        ImageFormat::Jpeg => Some(ThumbnailFormat::Jpg),
        ImageFormat::WebP => Some(ThumbnailFormat::Webp),
        _ => None,
    }
}

/// Steps applied between decode and fit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostProcess {
    /// Trim near-black borders at this threshold.
    pub trim_dark_borders: Option<u8>,
    /// Flatten onto white.
    pub flatten: bool,
    /// Normalize levels before the fit and sharpen after it.
    pub enhance: bool,
}

/// Post-process, fit, and encode a decoded image.
pub fn render(
    img: DynamicImage,
    options: &ThumbnailOptions,
    allow_enlarge: bool,
    post: PostProcess,
) -> Result<Vec<u8>, ConversionError> {
    let mut img = img;

    if let Some(threshold) = post.trim_dark_borders {
        img = trim_dark_borders(img, threshold);
    }
    if post.flatten {
        img = flatten_white(&img);
    }
    if post.enhance {
        img = normalize_levels(img);
    }

    let plan = plan_fit(
        (img.width(), img.height()),
        (options.width, options.height),
        options.fit,
        allow_enlarge,
    );
    img = apply_fit(img, &plan);

    if post.enhance {
        img = sharpen(&img);
    }

    encode(&img, options.format, options.quality)
}

/// Decode a file and [`render`] it on the blocking pool.
pub async fn render_file(
    path: &Path,
    options: &ThumbnailOptions,
    allow_enlarge: bool,
    post: PostProcess,
) -> Result<Vec<u8>, ConversionError> {
    let path: PathBuf = path.to_path_buf();
    let options = *options;

    tokio::task::spawn_blocking(move || {
        let img = decode(&path)?;
        render(img, &options, allow_enlarge, post)
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contain_large_jpeg_into_medium_box() {
        let plan = plan_fit((4000, 3000), (300, 300), FitMode::Contain, false);
        assert_eq!(plan.resize, (300, 225));
        assert_eq!(plan.output(), (300, 300));
    }

    #[test]
    fn test_inside_never_enlarges() {
        let plan = plan_fit((100, 50), (300, 300), FitMode::Inside, false);
        assert_eq!(plan.output(), (100, 50));

        let plan = plan_fit((100, 50), (300, 300), FitMode::Inside, true);
        assert_eq!(plan.output(), (300, 150));
    }

    #[test]
    fn test_cover_crops_center() {
        let plan = plan_fit((400, 200), (100, 100), FitMode::Cover, false);
        assert_eq!(plan.resize, (200, 100));
        assert_eq!(plan.crop, Some((50, 0, 100, 100)));
        assert_eq!(plan.output(), (100, 100));
    }

    #[test]
    fn test_outside_covers_without_crop() {
        let plan = plan_fit((400, 200), (100, 100), FitMode::Outside, false);
        assert_eq!(plan.output(), (200, 100));
    }

    #[test]
    fn test_fill_without_enlarge_clamps_to_source() {
        let plan = plan_fit((120, 80), (300, 60), FitMode::Fill, false);
        assert_eq!(plan.output(), (120, 60));
    }

    #[test]
    fn test_trim_dark_borders() {
        let mut img = RgbImage::from_pixel(20, 10, Rgb([5, 5, 5]));
        for x in 5..15 {
            for y in 2..8 {
                img.put_pixel(x, y, Rgb([200, 200, 200]));
            }
        }
        let trimmed = trim_dark_borders(DynamicImage::ImageRgb8(img), 24);
        assert_eq!((trimmed.width(), trimmed.height()), (10, 6));
    }

    #[test]
    fn test_trim_all_black_is_noop() {
        let img = RgbImage::from_pixel(8, 8, Rgb([0, 0, 0]));
        let trimmed = trim_dark_borders(DynamicImage::ImageRgb8(img), 24);
        assert_eq!((trimmed.width(), trimmed.height()), (8, 8));
    }

    #[test]
    fn test_flatten_transparent_is_white() {
        let img = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 0]));
        let flat = flatten_white(&DynamicImage::ImageRgba8(img));
        assert_eq!(flat.to_rgb8().get_pixel(0, 0).0, [255, 255, 255]);
    }

    #[test]
    fn test_normalize_stretches_pale_image() {
        let img = RgbImage::from_fn(16, 16, |x, _| {
            let v = 150 + (x as u8) * 4;
            Rgb([v, v, v])
        });
        let out = normalize_levels(DynamicImage::ImageRgb8(img)).to_rgb8();
        assert_eq!(out.get_pixel(0, 0).0[0], 0);
        assert_eq!(out.get_pixel(15, 0).0[0], 255);
    }

    #[test]
    fn test_encode_formats() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 128])));
        let webp = encode(&img, ThumbnailFormat::Webp, 80).expect("webp");
        assert_eq!(&webp[0..4], b"RIFF");
        let jpg = encode(&img, ThumbnailFormat::Jpg, 80).expect("jpg");
        assert_eq!(&jpg[0..2], &[0xFFu8, 0xD8]);
        let png = encode(&img, ThumbnailFormat::Png, 80).expect("png");
        assert_eq!(&png[1..4], b"PNG");
    }
}
