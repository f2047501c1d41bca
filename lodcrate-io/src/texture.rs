//! PNG texture reading and writing

use std::path::Path;

use image::{ImageBuffer, ImageFormat, Luma, Rgb, Rgba};
use lodcrate_core::{Color, ImageData, Result};
use serde::{Deserialize, Serialize};

use crate::error::IoError;

/// Channel layout and depth of a written texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    R8,
    R8G8B8,
    #[default]
    R8G8B8A8,
    R16G16B16,
}

impl PixelFormat {
    pub fn name(&self) -> &'static str {
        match self {
            PixelFormat::R8 => "R8",
            PixelFormat::R8G8B8 => "R8G8B8",
            PixelFormat::R8G8B8A8 => "R8G8B8A8",
            PixelFormat::R16G16B16 => "R16G16B16",
        }
    }
}

fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn to_u16(v: f32) -> u16 {
    (v.clamp(0.0, 1.0) * 65535.0).round() as u16
}

/// Decode any image format the `image` crate understands into RGBA floats
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<ImageData> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(IoError::FileNotFound {
            path: path.display().to_string(),
        }
        .into());
    }
    let decoded = image::open(path).map_err(IoError::from)?.into_rgba32f();
    let (width, height) = decoded.dimensions();
    let pixels = decoded
        .pixels()
        .map(|p| Color::new(p[0], p[1], p[2], p[3]))
        .collect();
    Ok(ImageData {
        width: width as usize,
        height: height as usize,
        pixels,
    })
}

/// Encode `image` as PNG in the requested pixel format
pub fn save_image<P: AsRef<Path>>(image: &ImageData, path: P, format: PixelFormat) -> Result<()> {
    let path = path.as_ref();
    let (w, h) = (image.width as u32, image.height as u32);
    let px = |x: u32, y: u32| image.get(x as usize, y as usize);
    let result = match format {
        PixelFormat::R8 => ImageBuffer::<Luma<u8>, Vec<u8>>::from_fn(w, h, |x, y| {
            Luma([to_u8(px(x, y).x)])
        })
        .save_with_format(path, ImageFormat::Png),
        PixelFormat::R8G8B8 => ImageBuffer::<Rgb<u8>, Vec<u8>>::from_fn(w, h, |x, y| {
            let c = px(x, y);
            Rgb([to_u8(c.x), to_u8(c.y), to_u8(c.z)])
        })
        .save_with_format(path, ImageFormat::Png),
        PixelFormat::R8G8B8A8 => ImageBuffer::<Rgba<u8>, Vec<u8>>::from_fn(w, h, |x, y| {
            let c = px(x, y);
            Rgba([to_u8(c.x), to_u8(c.y), to_u8(c.z), to_u8(c.w)])
        })
        .save_with_format(path, ImageFormat::Png),
        PixelFormat::R16G16B16 => ImageBuffer::<Rgb<u16>, Vec<u16>>::from_fn(w, h, |x, y| {
            let c = px(x, y);
            Rgb([to_u16(c.x), to_u16(c.y), to_u16(c.z)])
        })
        .save_with_format(path, ImageFormat::Png),
    };
    result.map_err(IoError::from)?;
    log::debug!(
        "wrote {}x{} {} texture to {}",
        w,
        h,
        format.name(),
        path.display()
    );
    Ok(())
}

/// Encode an image as 8-bit RGBA PNG bytes, for containers that embed textures
pub fn encode_png(image: &ImageData) -> Result<Vec<u8>> {
    let (w, h) = (image.width as u32, image.height as u32);
    let buffer = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_fn(w, h, |x, y| {
        let c = image.get(x as usize, y as usize);
        Rgba([to_u8(c.x), to_u8(c.y), to_u8(c.z), to_u8(c.w)])
    });
    let mut bytes = Vec::new();
    buffer
        .write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(IoError::from)?;
    Ok(bytes)
}
