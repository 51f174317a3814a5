//! CPU image decode/encode for the simulated runtime.

use std::path::Path;

use image::{DynamicImage, ExtendedColorType, ImageFormat as CrateFormat};

use deepsight_core::{ImageDesc, ImageFormat, PixelDepth};

/// A decoded image held by the simulation: tightly packed pixel rows.
#[derive(Debug, Clone)]
pub(crate) struct SimImage {
    pub desc: ImageDesc,
    pub pixels: Vec<u8>,
}

/// Decode an encoded PNG/BMP/TIFF blob. Errors are plain strings; the
/// runtime layer attaches them to a status code.
pub(crate) fn decode(data: &[u8]) -> Result<SimImage, String> {
    let img = image::load_from_memory(data).map_err(|e| format!("image decode failed: {e}"))?;
    Ok(flatten(img))
}

fn flatten(img: DynamicImage) -> SimImage {
    match img {
        DynamicImage::ImageLuma8(gray) => {
            let (w, h) = (gray.width(), gray.height());
            SimImage {
                desc: ImageDesc::packed(w, h, 1, PixelDepth::U8),
                pixels: gray.into_raw(),
            }
        }
        DynamicImage::ImageLuma16(gray) => {
            let (w, h) = (gray.width(), gray.height());
            let pixels = gray.into_raw().iter().flat_map(|v| v.to_le_bytes()).collect();
            SimImage {
                desc: ImageDesc::packed(w, h, 1, PixelDepth::U16),
                pixels,
            }
        }
        DynamicImage::ImageRgba8(rgba) => {
            let (w, h) = (rgba.width(), rgba.height());
            SimImage {
                desc: ImageDesc::packed(w, h, 4, PixelDepth::U8),
                pixels: rgba.into_raw(),
            }
        }
        other => {
            let rgb = other.to_rgb8();
            let (w, h) = (rgb.width(), rgb.height());
            SimImage {
                desc: ImageDesc::packed(w, h, 3, PixelDepth::U8),
                pixels: rgb.into_raw(),
            }
        }
    }
}

/// Drop row padding so the buffer matches the packed layout the encoders
/// expect.
pub(crate) fn packed_rows(desc: &ImageDesc, data: &[u8]) -> Vec<u8> {
    let row = desc.min_step();
    if desc.step == row {
        return data.to_vec();
    }
    let mut packed = Vec::with_capacity(row * desc.height as usize);
    for y in 0..desc.height as usize {
        let start = y * desc.step;
        packed.extend_from_slice(&data[start..start + row]);
    }
    packed
}

/// Encode to a file; the container format follows the file extension.
pub(crate) fn encode_to_path(path: &Path, desc: &ImageDesc, data: &[u8]) -> Result<(), String> {
    let format = CrateFormat::from_path(path)
        .map_err(|_| format!("unsupported image extension: {}", path.display()))?;
    if !matches!(
        format,
        CrateFormat::Png | CrateFormat::Bmp | CrateFormat::Tiff
    ) {
        return Err(format!("unsupported image format: {format:?}"));
    }

    let color = color_type(desc)?;
    if desc.depth == PixelDepth::U16 && format == CrateFormat::Bmp {
        return Err("BMP cannot carry 16-bit channels".to_string());
    }

    let packed = packed_rows(desc, data);
    image::save_buffer_with_format(path, &packed, desc.width, desc.height, color, format)
        .map_err(|e| format!("image encode failed: {e}"))
}

fn color_type(desc: &ImageDesc) -> Result<ExtendedColorType, String> {
    match (desc.channels, desc.depth) {
        (1, PixelDepth::U8) => Ok(ExtendedColorType::L8),
        (1, PixelDepth::U16) => Ok(ExtendedColorType::L16),
        (3, PixelDepth::U8) => Ok(ExtendedColorType::Rgb8),
        (3, PixelDepth::U16) => Ok(ExtendedColorType::Rgb16),
        (4, PixelDepth::U8) => Ok(ExtendedColorType::Rgba8),
        (c, d) => Err(format!("unsupported pixel layout: {c} channels at {d:?}")),
    }
}

/// Detect the declared container format against the blob's magic bytes.
pub(crate) fn verify_format(data: &[u8], declared: ImageFormat) -> Result<(), String> {
    match ImageFormat::from_magic(data) {
        Some(actual) if actual == declared => Ok(()),
        Some(actual) => Err(format!(
            "blob is {actual:?} but was declared {declared:?}"
        )),
        None => Err("blob matches no supported container format".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::GrayImage::from_fn(width, height, |x, y| image::Luma([(x + y) as u8]));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, CrateFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn decodes_gray_png() {
        let img = decode(&png_bytes(6, 4)).unwrap();
        assert_eq!(img.desc.width, 6);
        assert_eq!(img.desc.height, 4);
        assert_eq!(img.desc.channels, 1);
        assert_eq!(img.desc.depth, PixelDepth::U8);
        assert_eq!(img.pixels.len(), 24);
    }

    #[test]
    fn packed_rows_strips_padding() {
        let desc = ImageDesc {
            step: 8,
            ..ImageDesc::packed(6, 2, 1, PixelDepth::U8)
        };
        let mut data = vec![0u8; 16];
        data[0..6].copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        data[8..14].copy_from_slice(&[7, 8, 9, 10, 11, 12]);
        assert_eq!(packed_rows(&desc, &data), (1..=12).collect::<Vec<u8>>());
    }

    #[test]
    fn format_verification() {
        let png = png_bytes(2, 2);
        assert!(verify_format(&png, ImageFormat::Png).is_ok());
        assert!(verify_format(&png, ImageFormat::Bmp).is_err());
        assert!(verify_format(b"garbage", ImageFormat::Png).is_err());
    }
}
