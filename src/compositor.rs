// ============================================================================
// ANNOTATION COMPOSITOR: builds the instruction image for the edit service
// ============================================================================
//
// Everything here works in image space: buffers are sized to the image's
// logical width/height, never to its zoomed on-screen size.

use font8x8::{BASIC_FONTS, UnicodeFonts};
use image::imageops::{self, FilterType};
use image::{ImageOutputFormat, Rgba, RgbaImage};
use rayon::prelude::*;
use std::io::Cursor;

use crate::generation::ReferenceImage;
use crate::model::{Annotation, AnnotationKind, Image, ImagePoint};

/// Opacity of the original photo underneath the annotations.
pub const BASE_OPACITY: f32 = 0.4;

const STAMP_RADIUS_FRACTION: f32 = 0.015;
const STAMP_MIN_RADIUS: f32 = 6.0;
const LABEL_FILL: Rgba<u8> = Rgba([255, 255, 255, 255]);
const LABEL_OUTLINE: Rgba<u8> = Rgba([0, 0, 0, 255]);
const GLYPH_SIZE: i32 = 8;

// ============================================================================
// Public entry points
// ============================================================================

/// Rasterize only the annotations onto a transparent buffer.
///
/// `None` means "no annotations": the edit applies to the whole image.
pub fn rasterize_annotations(width: u32, height: u32, annotations: &[Annotation]) -> Option<RgbaImage> {
    if annotations.is_empty() {
        return None;
    }
    let mut layer = RgbaImage::new(width.max(1), height.max(1));

    for annotation in annotations {
        match annotation.kind() {
            AnnotationKind::Stroke { points, width: stroke_w, color } => {
                draw_polyline(&mut layer, points, *stroke_w, Rgba(*color));
            }
            AnnotationKind::Stamp { at, color, .. } => {
                let radius = stamp_radius(width);
                draw_disc(&mut layer, at.x, at.y, radius, Rgba(*color));
            }
            // Reference images travel separately; only their label is drawn.
            AnnotationKind::Reference { .. } => {}
        }
    }

    let scale = label_scale(width);
    for annotation in annotations {
        if let Some(label) = annotation.label() {
            draw_label(&mut layer, annotation.anchor(), label, scale);
        }
    }

    Some(layer)
}

/// Original image at [`BASE_OPACITY`] with the annotations on top at full opacity.
pub fn compose_context(
    base: &RgbaImage,
    width: u32,
    height: u32,
    annotations: &[Annotation],
) -> Option<RgbaImage> {
    let overlay = rasterize_annotations(width, height, annotations)?;
    let mut out = faded_base(base, overlay.width(), overlay.height());

    let dst: &mut [u8] = &mut out;
    dst.par_chunks_exact_mut(4)
        .zip(overlay.as_raw().par_chunks_exact(4))
        .for_each(|(d, s)| {
            let blended = blend_pixel(
                Rgba([d[0], d[1], d[2], d[3]]),
                Rgba([s[0], s[1], s[2], s[3]]),
            );
            d.copy_from_slice(&blended.0);
        });

    Some(out)
}

/// PNG-encoded context composite for `image`, or `None` when there is nothing
/// to send (no annotations, no pixels yet, or encoding failed).
pub fn context_png(image: &Image) -> Option<Vec<u8>> {
    let base = image.pixels.as_ref()?;
    let composite = compose_context(base, image.width, image.height, &image.annotations)?;
    match encode_png(&composite) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            crate::log_warn!("context mask for {} not encoded: {}", image.id, e);
            None
        }
    }
}

/// Every attached reference image, PNG-encoded, with its label.
pub fn reference_images(annotations: &[Annotation]) -> Vec<ReferenceImage> {
    annotations
        .iter()
        .filter_map(|a| match a.kind() {
            AnnotationKind::Reference { image, .. } => match encode_png(image) {
                Ok(png) => Some(ReferenceImage {
                    png,
                    label: a.label().map(str::to_string),
                }),
                Err(e) => {
                    crate::log_warn!("reference image {} skipped: {}", a.id, e);
                    None
                }
            },
            _ => None,
        })
        .collect()
}

pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>, image::ImageError> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)?;
    Ok(bytes)
}

// ============================================================================
// Helpers
// ============================================================================

fn stamp_radius(image_width: u32) -> f32 {
    (image_width as f32 * STAMP_RADIUS_FRACTION).max(STAMP_MIN_RADIUS)
}

fn label_scale(image_width: u32) -> i32 {
    (image_width / 240).max(1) as i32
}

fn faded_base(base: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let mut img = if base.dimensions() == (width, height) {
        base.clone()
    } else {
        imageops::resize(base, width, height, FilterType::Triangle)
    };
    let buf: &mut [u8] = &mut img;
    buf.par_chunks_exact_mut(4).for_each(|px| {
        px[3] = (px[3] as f32 * BASE_OPACITY).round() as u8;
    });
    img
}

/// Source-over blend of straight-alpha colours.
fn blend_pixel(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let sa = src[3] as f32 / 255.0;
    if sa <= 0.0 {
        return dst;
    }
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    let channel = |s: u8, d: u8| -> u8 {
        let c = (s as f32 * sa + d as f32 * da * (1.0 - sa)) / out_a;
        c.round().clamp(0.0, 255.0) as u8
    };
    Rgba([
        channel(src[0], dst[0]),
        channel(src[1], dst[1]),
        channel(src[2], dst[2]),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}

fn blend_at(img: &mut RgbaImage, x: i32, y: i32, color: Rgba<u8>) {
    if x < 0 || y < 0 || x >= img.width() as i32 || y >= img.height() as i32 {
        return;
    }
    let dst = *img.get_pixel(x as u32, y as u32);
    img.put_pixel(x as u32, y as u32, blend_pixel(dst, color));
}

/// Opaque-coverage disc; overlapping discs do not darken each other because
/// coverage is binary.
fn draw_disc(img: &mut RgbaImage, cx: f32, cy: f32, radius: f32, color: Rgba<u8>) {
    let radius = radius.max(0.5);
    let min_x = (cx - radius).floor() as i32;
    let max_x = (cx + radius).ceil() as i32;
    let min_y = (cy - radius).floor() as i32;
    let max_y = (cy + radius).ceil() as i32;
    let r2 = radius * radius;
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let dx = x as f32 + 0.5 - cx;
            let dy = y as f32 + 0.5 - cy;
            if dx * dx + dy * dy <= r2 {
                if x < 0 || y < 0 || x >= img.width() as i32 || y >= img.height() as i32 {
                    continue;
                }
                img.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

/// Round-capped, round-joined polyline: a disc swept along every segment.
fn draw_polyline(img: &mut RgbaImage, points: &[ImagePoint], width: f32, color: Rgba<u8>) {
    let radius = width.max(1.0) / 2.0;
    if let [only] = points {
        draw_disc(img, only.x, only.y, radius, color);
        return;
    }
    for pair in points.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let dx = b.x - a.x;
        let dy = b.y - a.y;
        let steps = (dx * dx + dy * dy).sqrt().max(1.0).ceil() as i32;
        for step in 0..=steps {
            let t = step as f32 / steps as f32;
            draw_disc(img, a.x + dx * t, a.y + dy * t, radius, color);
        }
    }
}

fn draw_bitmap_text(img: &mut RgbaImage, x: i32, y: i32, text: &str, color: Rgba<u8>, scale: i32) {
    let mut cursor_x = x;
    for ch in text.chars() {
        let Some(glyph) = BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?')) else {
            cursor_x += GLYPH_SIZE * scale;
            continue;
        };
        for (row_idx, row_bits) in glyph.iter().enumerate() {
            for col in 0..GLYPH_SIZE {
                if (row_bits >> col) & 1 == 0 {
                    continue;
                }
                let px = cursor_x + col * scale;
                let py = y + row_idx as i32 * scale;
                // Second column of pixels makes the face bold.
                for sy in 0..scale {
                    for sx in 0..=scale {
                        blend_at(img, px + sx, py + sy, color);
                    }
                }
            }
        }
        cursor_x += GLYPH_SIZE * scale;
    }
}

/// Bold monospace label centred on `anchor`: black outline, white face.
fn draw_label(img: &mut RgbaImage, anchor: ImagePoint, label: &str, scale: i32) {
    let text: String = label
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let chars = text.chars().count() as i32;
    let text_w = chars * GLYPH_SIZE * scale + 1;
    let text_h = GLYPH_SIZE * scale;
    let x = anchor.x.round() as i32 - text_w / 2;
    let y = anchor.y.round() as i32 - text_h / 2;

    let outline = scale.max(1);
    for dy in -outline..=outline {
        for dx in -outline..=outline {
            if (dx == 0 && dy == 0) || dx * dx + dy * dy > outline * outline {
                continue;
            }
            draw_bitmap_text(img, x + dx, y + dy, &text, LABEL_OUTLINE, scale);
        }
    }
    draw_bitmap_text(img, x, y, &text, LABEL_FILL, scale);
}
