//! Decoded images and the scene texture table

use serde::{Deserialize, Serialize};

use crate::point::*;

/// RGBA image with linear `f32` channels, row 0 at the top
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageData {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<Color>,
}

impl ImageData {
    pub fn new(width: usize, height: usize) -> Self {
        Self::filled(width, height, Color::zeros())
    }

    pub fn filled(width: usize, height: usize, value: Color) -> Self {
        Self {
            width,
            height,
            pixels: vec![value; width * height],
        }
    }

    pub fn get(&self, x: usize, y: usize) -> Color {
        self.pixels[y * self.width + x]
    }

    pub fn set(&mut self, x: usize, y: usize, value: Color) {
        let w = self.width;
        self.pixels[y * w + x] = value;
    }

    fn wrapped(&self, x: i64, y: i64) -> Color {
        let w = self.width as i64;
        let h = self.height as i64;
        self.get(x.rem_euclid(w) as usize, y.rem_euclid(h) as usize)
    }

    /// Bilinear lookup with wrap addressing. `v = 0` is the bottom row.
    pub fn sample_bilinear(&self, uv: Vector2f) -> Color {
        if self.width == 0 || self.height == 0 {
            return white();
        }
        let x = uv.x * self.width as f32 - 0.5;
        let y = (1.0 - uv.y) * self.height as f32 - 0.5;
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);
        let top = self.wrapped(x0, y0) * (1.0 - fx) + self.wrapped(x0 + 1, y0) * fx;
        let bottom = self.wrapped(x0, y0 + 1) * (1.0 - fx) + self.wrapped(x0 + 1, y0 + 1) * fx;
        top * (1.0 - fy) + bottom * fy
    }
}

/// A named texture referencing an image file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Texture {
    pub name: String,
    pub file_path: String,
    /// Decoded pixels, loaded on import or after casting
    pub image: Option<ImageData>,
}

impl Texture {
    pub fn new(name: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file_path: file_path.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: ImageData) -> Self {
        self.image = Some(image);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextureTable {
    textures: Vec<Texture>,
}

impl TextureTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_texture(&mut self, texture: Texture) -> usize {
        self.textures.push(texture);
        self.textures.len() - 1
    }

    pub fn texture(&self, id: usize) -> Option<&Texture> {
        self.textures.get(id)
    }

    pub fn texture_mut(&mut self, id: usize) -> Option<&mut Texture> {
        self.textures.get_mut(id)
    }

    pub fn find(&self, name: &str) -> Option<&Texture> {
        self.textures.iter().find(|t| t.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Texture> {
        self.textures.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Texture> {
        self.textures.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    pub fn clear(&mut self) {
        self.textures.clear();
    }

    pub fn copy_from(&mut self, other: &TextureTable) {
        self.textures = other.textures.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bilinear_center_of_texel() {
        let mut img = ImageData::new(2, 1);
        img.set(0, 0, Color::new(1.0, 0.0, 0.0, 1.0));
        img.set(1, 0, Color::new(0.0, 0.0, 1.0, 1.0));
        let c = img.sample_bilinear(Vector2f::new(0.25, 0.5));
        assert_relative_eq!(c, Color::new(1.0, 0.0, 0.0, 1.0), epsilon = 1e-6);
        // halfway between the two texel centres
        let mid = img.sample_bilinear(Vector2f::new(0.5, 0.5));
        assert_relative_eq!(mid.x, 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_wrap_addressing() {
        let img = ImageData::filled(4, 4, Color::new(0.2, 0.4, 0.6, 1.0));
        let c = img.sample_bilinear(Vector2f::new(-3.7, 12.1));
        assert_relative_eq!(c, Color::new(0.2, 0.4, 0.6, 1.0), epsilon = 1e-6);
    }

    #[test]
    fn test_v_axis_points_up() {
        let mut img = ImageData::new(1, 2);
        img.set(0, 0, Color::new(1.0, 1.0, 1.0, 1.0));
        // v near 1 reads the top row
        let c = img.sample_bilinear(Vector2f::new(0.5, 0.75));
        assert_relative_eq!(c.x, 1.0, epsilon = 1e-6);
    }
}
