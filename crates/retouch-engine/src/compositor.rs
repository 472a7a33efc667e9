//! Local raster operations. Each takes an [`ImageBlob`] and returns a new one;
//! inputs are never modified.

use std::io::Cursor;

use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{load_from_memory, DynamicImage, ImageFormat, ImageReader, Rgba, RgbaImage};
use retouch_contracts::ImageBlob;

use crate::error::EditorError;

const GLYPH_CELL: f64 = 8.0;
const WRAP_WIDTH_RATIO: f64 = 0.9;
const LINE_HEIGHT_RATIO: f64 = 1.2;
const OUTLINE_OFFSET_PX: f64 = 2.0;
const JPEG_QUALITY_MIN: f32 = 0.1;
const JPEG_QUALITY_MAX: f32 = 1.0;

/// Rectangle in the coordinate space the image is displayed at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Size the image was displayed at when the crop rect was drawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplaySize {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Fill {
    Color(Rgba<u8>),
    /// Stretched to the canvas; aspect ratio is not preserved.
    Image(ImageBlob),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShadowSpec {
    None,
    Drop {
        offset_x: f64,
        offset_y: f64,
        blur: f64,
        color: Rgba<u8>,
    },
    /// Four solid copies offset 2px diagonally, drawn under the fill.
    Outline { color: Rgba<u8> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextOverlay {
    pub text: String,
    /// Horizontal centre and vertical centre of the text block, in percent of
    /// the output canvas.
    pub position_pct: (f64, f64),
    pub font: String,
    pub color: Rgba<u8>,
    pub shadow: ShadowSpec,
    /// Font size in percent of the canvas width.
    pub font_size_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExportFormat {
    Png,
    Jpeg { quality: f32 },
}

pub fn crop(
    image: &ImageBlob,
    rect: CropRect,
    display: DisplaySize,
) -> Result<ImageBlob, EditorError> {
    check_crop_area(rect, display)?;
    let source = decode(image)?;
    let cropped = crop_pixels(&source, rect, display);
    encode_png(&cropped, derived_name(image.name(), "cropped", "png"))
}

pub fn composite_background(
    foreground: &ImageBlob,
    fill: &Fill,
) -> Result<ImageBlob, EditorError> {
    let front = decode(foreground)?;
    let (width, height) = front.dimensions();
    let mut canvas = match fill {
        Fill::Color(color) => RgbaImage::from_pixel(width, height, *color),
        Fill::Image(background) => {
            let back = decode(background)?;
            imageops::resize(&back, width, height, FilterType::Triangle)
        }
    };
    imageops::overlay(&mut canvas, &front, 0, 0);
    encode_png(&canvas, derived_name(foreground.name(), "background", "png"))
}

pub fn composite_text(
    image: &ImageBlob,
    crop_area: Option<(CropRect, DisplaySize)>,
    overlay: &TextOverlay,
) -> Result<ImageBlob, EditorError> {
    if overlay.text.trim().is_empty() {
        return Err(EditorError::InvalidInput("text is empty".to_string()));
    }
    if !overlay.font_size_pct.is_finite() || overlay.font_size_pct <= 0.0 {
        return Err(EditorError::InvalidInput(
            "font size must be a positive number".to_string(),
        ));
    }
    let source = decode(image)?;
    let mut canvas = match crop_area {
        Some((rect, display)) if narrows(rect, display) => {
            check_crop_area(rect, display)?;
            crop_pixels(&source, rect, display)
        }
        _ => source,
    };

    let width = f64::from(canvas.width());
    let height = f64::from(canvas.height());
    let font_px = overlay.font_size_pct * width / 100.0;
    let lines = wrap_words(&overlay.text, width * WRAP_WIDTH_RATIO, |line| {
        measure_text(line, font_px)
    });
    let center_x = overlay.position_pct.0.clamp(0.0, 100.0) * width / 100.0;
    let center_y = overlay.position_pct.1.clamp(0.0, 100.0) * height / 100.0;
    let layout = TextLayout {
        lines: &lines,
        font_px,
        center_x,
        center_y,
    };

    match overlay.shadow {
        ShadowSpec::None => {}
        ShadowSpec::Drop {
            offset_x,
            offset_y,
            blur,
            color,
        } => {
            let mut shadow = layout.render(canvas.dimensions(), color, (offset_x, offset_y));
            if blur > 0.0 {
                shadow = imageops::blur(&shadow, (blur / 2.0) as f32);
            }
            imageops::overlay(&mut canvas, &shadow, 0, 0);
        }
        ShadowSpec::Outline { color } => {
            for (dx, dy) in [(-1.0, -1.0), (1.0, -1.0), (-1.0, 1.0), (1.0, 1.0)] {
                let offset = (dx * OUTLINE_OFFSET_PX, dy * OUTLINE_OFFSET_PX);
                let copy = layout.render(canvas.dimensions(), color, offset);
                imageops::overlay(&mut canvas, &copy, 0, 0);
            }
        }
    }
    let fill = layout.render(canvas.dimensions(), overlay.color, (0.0, 0.0));
    imageops::overlay(&mut canvas, &fill, 0, 0);

    encode_png(&canvas, derived_name(image.name(), "text", "png"))
}

/// PNG passes a PNG blob through untouched; JPEG re-encodes at `quality`,
/// clamped to `[0.1, 1.0]`.
pub fn export(image: &ImageBlob, format: ExportFormat) -> Result<ImageBlob, EditorError> {
    match format {
        ExportFormat::Png => {
            if image.mime_type().eq_ignore_ascii_case("image/png") {
                return Ok(image.clone());
            }
            let pixels = decode(image)?;
            encode_png(&pixels, derived_name(image.name(), "export", "png"))
        }
        ExportFormat::Jpeg { quality } => {
            let quality = quality.clamp(JPEG_QUALITY_MIN, JPEG_QUALITY_MAX);
            let level = (quality * 100.0).round().clamp(1.0, 100.0) as u8;
            let rgb = DynamicImage::ImageRgba8(decode(image)?).to_rgb8();
            let mut out = Vec::new();
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, level))
                .map_err(|err| {
                    EditorError::LocalEncodeFailure(format!("jpeg encode failed: {err}"))
                })?;
            Ok(ImageBlob::new(
                out,
                "image/jpeg",
                derived_name(image.name(), "export", "jpg"),
            ))
        }
    }
}

/// Native size read from the image header, without decoding pixels.
pub fn image_dimensions(image: &ImageBlob) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(image.bytes()))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

pub fn decode(image: &ImageBlob) -> Result<RgbaImage, EditorError> {
    load_from_memory(image.bytes())
        .map(|decoded| decoded.to_rgba8())
        .map_err(|err| {
            EditorError::LocalEncodeFailure(format!("cannot decode {}: {err}", image.name()))
        })
}

pub fn encode_png(pixels: &RgbaImage, name: String) -> Result<ImageBlob, EditorError> {
    let mut out = Cursor::new(Vec::new());
    pixels
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|err| EditorError::LocalEncodeFailure(format!("png encode failed: {err}")))?;
    Ok(ImageBlob::new(out.into_inner(), "image/png", name))
}

/// Parses `#rgb`, `#rrggbb`, `#rrggbbaa`, `rgb(...)`, `rgba(...)` and a few names.
pub fn parse_color(raw: &str) -> Option<Rgba<u8>> {
    let value = raw.trim().to_ascii_lowercase();
    match value.as_str() {
        "black" => return Some(Rgba([0, 0, 0, 255])),
        "white" => return Some(Rgba([255, 255, 255, 255])),
        "red" => return Some(Rgba([255, 0, 0, 255])),
        "green" => return Some(Rgba([0, 128, 0, 255])),
        "blue" => return Some(Rgba([0, 0, 255, 255])),
        "yellow" => return Some(Rgba([255, 255, 0, 255])),
        "transparent" => return Some(Rgba([0, 0, 0, 0])),
        _ => {}
    }
    if let Some(hex) = value.strip_prefix('#') {
        let digits: Vec<u8> = hex
            .chars()
            .map(|ch| ch.to_digit(16).map(|digit| digit as u8))
            .collect::<Option<Vec<u8>>>()?;
        return match digits.len() {
            3 => Some(Rgba([digits[0] * 17, digits[1] * 17, digits[2] * 17, 255])),
            6 | 8 => {
                let byte = |idx: usize| digits[idx] * 16 + digits[idx + 1];
                let alpha = if digits.len() == 8 { byte(6) } else { 255 };
                Some(Rgba([byte(0), byte(2), byte(4), alpha]))
            }
            _ => None,
        };
    }
    let (body, has_alpha) = if let Some(rest) = value.strip_prefix("rgba(") {
        (rest.strip_suffix(')')?, true)
    } else if let Some(rest) = value.strip_prefix("rgb(") {
        (rest.strip_suffix(')')?, false)
    } else {
        return None;
    };
    let parts: Vec<&str> = body.split(',').map(str::trim).collect();
    if parts.len() != if has_alpha { 4 } else { 3 } {
        return None;
    }
    let channel = |text: &str| text.parse::<f64>().ok().map(|v| v.round().clamp(0.0, 255.0) as u8);
    let alpha = if has_alpha {
        let a = parts[3].parse::<f64>().ok()?;
        (a.clamp(0.0, 1.0) * 255.0).round() as u8
    } else {
        255
    };
    Some(Rgba([
        channel(parts[0])?,
        channel(parts[1])?,
        channel(parts[2])?,
        alpha,
    ]))
}

impl ShadowSpec {
    /// Parses the shadow string of the text tool. Anything unrecognised is a
    /// plain fill.
    pub fn parse(raw: &str) -> Self {
        let value = raw.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("none") {
            return ShadowSpec::None;
        }
        let lowered = value.to_ascii_lowercase();
        if let Some(rest) = lowered.strip_prefix("outline").map(str::trim) {
            let color = if rest.is_empty() {
                Some(Rgba([0, 0, 0, 255]))
            } else {
                parse_color(rest)
            };
            return color
                .map(|color| ShadowSpec::Outline { color })
                .unwrap_or(ShadowSpec::None);
        }

        let layers = split_shadow_layers(value);
        match layers.len() {
            1 => parse_drop_shadow(layers[0]).unwrap_or(ShadowSpec::None),
            4 => parse_outline_layers(&layers).unwrap_or(ShadowSpec::None),
            _ => ShadowSpec::None,
        }
    }
}

/// Splits on top-level commas, leaving `rgba(a, b, c, d)` intact.
fn split_shadow_layers(value: &str) -> Vec<&str> {
    let mut layers = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (idx, ch) in value.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                layers.push(value[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    layers.push(value[start..].trim());
    layers
}

fn parse_drop_shadow(layer: &str) -> Option<ShadowSpec> {
    let mut rest = layer.trim();
    let mut lengths = [0.0f64; 3];
    for slot in &mut lengths {
        let (token, tail) = rest.split_once(char::is_whitespace)?;
        *slot = parse_length(token)?;
        rest = tail.trim_start();
    }
    let [offset_x, offset_y, blur] = lengths;
    let color = parse_color(rest)?;
    if blur < 0.0 {
        return None;
    }
    Some(ShadowSpec::Drop {
        offset_x,
        offset_y,
        blur,
        color,
    })
}

fn parse_outline_layers(layers: &[&str]) -> Option<ShadowSpec> {
    let mut color: Option<Rgba<u8>> = None;
    let mut corners = Vec::new();
    for layer in layers {
        let ShadowSpec::Drop {
            offset_x,
            offset_y,
            blur,
            color: layer_color,
        } = parse_drop_shadow(layer)?
        else {
            return None;
        };
        let diagonal = offset_x.abs() == OUTLINE_OFFSET_PX && offset_y.abs() == OUTLINE_OFFSET_PX;
        if blur != 0.0 || !diagonal {
            return None;
        }
        if color.is_some_and(|existing| existing != layer_color) {
            return None;
        }
        color = Some(layer_color);
        let corner = (offset_x > 0.0, offset_y > 0.0);
        if corners.contains(&corner) {
            return None;
        }
        corners.push(corner);
    }
    color.map(|color| ShadowSpec::Outline { color })
}

fn parse_length(token: &str) -> Option<f64> {
    token.trim().trim_end_matches("px").parse::<f64>().ok()
}

fn check_crop_area(rect: CropRect, display: DisplaySize) -> Result<(), EditorError> {
    let message = if rect.width <= 0.0 || rect.height <= 0.0 {
        "crop area must have a positive width and height"
    } else if display.width <= 0.0 || display.height <= 0.0 {
        "display size must be positive"
    } else {
        return Ok(());
    };
    Err(EditorError::InvalidInput(message.to_string()))
}

fn narrows(rect: CropRect, display: DisplaySize) -> bool {
    rect.x > 0.0 || rect.y > 0.0 || rect.width < display.width || rect.height < display.height
}

fn crop_pixels(source: &RgbaImage, rect: CropRect, display: DisplaySize) -> RgbaImage {
    let (native_w, native_h) = source.dimensions();
    let scale_x = f64::from(native_w) / display.width;
    let scale_y = f64::from(native_h) / display.height;
    let x = ((rect.x * scale_x).round().max(0.0) as u32).min(native_w.saturating_sub(1));
    let y = ((rect.y * scale_y).round().max(0.0) as u32).min(native_h.saturating_sub(1));
    let width = ((rect.width * scale_x).round() as u32).clamp(1, native_w - x);
    let height = ((rect.height * scale_y).round() as u32).clamp(1, native_h - y);
    imageops::crop_imm(source, x, y, width, height).to_image()
}

/// Greedy word wrap: a word joins the current line while the measured width
/// stays within `max_width`. A single oversized word keeps its own line.
pub fn wrap_words(text: &str, max_width: f64, measure: impl Fn(&str) -> f64) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
            continue;
        }
        let candidate = format!("{current} {word}");
        if measure(&candidate) <= max_width {
            current = candidate;
        } else {
            lines.push(std::mem::replace(&mut current, word.to_string()));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn measure_text(line: &str, font_px: f64) -> f64 {
    line.chars().count() as f64 * font_px
}

struct TextLayout<'a> {
    lines: &'a [String],
    font_px: f64,
    center_x: f64,
    center_y: f64,
}

impl TextLayout<'_> {
    /// Draws every line in `color` on a transparent layer the size of the canvas.
    fn render(&self, size: (u32, u32), color: Rgba<u8>, offset: (f64, f64)) -> RgbaImage {
        let mut layer = RgbaImage::new(size.0, size.1);
        let line_height = self.font_px * LINE_HEIGHT_RATIO;
        let block_top = self.center_y - line_height * self.lines.len() as f64 / 2.0;
        for (idx, line) in self.lines.iter().enumerate() {
            let left = self.center_x - measure_text(line, self.font_px) / 2.0 + offset.0;
            let top = block_top
                + idx as f64 * line_height
                + (line_height - self.font_px) / 2.0
                + offset.1;
            draw_line(&mut layer, line, left, top, self.font_px, color);
        }
        layer
    }
}

fn draw_line(
    layer: &mut RgbaImage,
    line: &str,
    left: f64,
    top: f64,
    font_px: f64,
    color: Rgba<u8>,
) {
    let cell = font_px / GLYPH_CELL;
    let (width, height) = (f64::from(layer.width()), f64::from(layer.height()));
    for (char_idx, ch) in line.chars().enumerate() {
        let Some(glyph) = BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?')) else {
            continue;
        };
        let glyph_left = left + char_idx as f64 * font_px;
        for (row_idx, row) in glyph.iter().copied().enumerate() {
            for col_idx in 0..8u32 {
                if (row >> col_idx) & 1 == 0 {
                    continue;
                }
                let x0 = (glyph_left + f64::from(col_idx) * cell).round().max(0.0);
                let x1 = (glyph_left + f64::from(col_idx + 1) * cell).round().min(width);
                let y0 = (top + row_idx as f64 * cell).round().max(0.0);
                let y1 = (top + (row_idx + 1) as f64 * cell).round().min(height);
                let mut py = y0;
                while py < y1 {
                    let mut px = x0;
                    while px < x1 {
                        layer.put_pixel(px as u32, py as u32, color);
                        px += 1.0;
                    }
                    py += 1.0;
                }
            }
        }
    }
}

fn derived_name(original: &str, suffix: &str, ext: &str) -> String {
    let stem = original
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .filter(|stem| !stem.is_empty())
        .unwrap_or(original);
    let stem = stem.strip_suffix(&format!("-{suffix}")).unwrap_or(stem);
    format!("{stem}-{suffix}.{ext}")
}
