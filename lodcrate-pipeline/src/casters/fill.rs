//! Dilation and empty-texel filling for cast textures

use std::collections::VecDeque;

use lodcrate_core::{Color, ImageData};
use serde::{Deserialize, Serialize};

/// How texels left empty after dilation are filled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FillMode {
    /// Smooth pull-push interpolation of the covered texels
    #[default]
    Interpolate,
    /// Copy the closest covered texel
    NearestNeighbor,
    /// Leave empty texels black and transparent
    NoFill,
}

const NEIGHBOURS: [(i64, i64); 8] = [(-1, -1), (0, -1), (1, -1), (-1, 0), (1, 0), (-1, 1), (0, 1), (1, 1)];

/// Grow covered areas by `iterations` texels, each new texel averaging its
/// covered neighbours
pub(crate) fn dilate(image: &mut ImageData, covered: &mut [bool], iterations: usize) {
    let (w, h) = (image.width as i64, image.height as i64);
    for _ in 0..iterations {
        let mut grown = Vec::new();
        for y in 0..h {
            for x in 0..w {
                if covered[(y * w + x) as usize] {
                    continue;
                }
                let mut sum = Color::zeros();
                let mut count = 0;
                for (dx, dy) in NEIGHBOURS {
                    let (nx, ny) = (x + dx, y + dy);
                    if nx >= 0 && ny >= 0 && nx < w && ny < h && covered[(ny * w + nx) as usize] {
                        sum += image.pixels[(ny * w + nx) as usize];
                        count += 1;
                    }
                }
                if count > 0 {
                    grown.push(((y * w + x) as usize, sum / count as f32));
                }
            }
        }
        if grown.is_empty() {
            break;
        }
        for (index, value) in grown {
            image.pixels[index] = value;
            covered[index] = true;
        }
    }
}

pub(crate) fn fill(image: &mut ImageData, covered: &[bool], mode: FillMode) {
    if covered.iter().all(|&c| c) || !covered.iter().any(|&c| c) {
        return;
    }
    match mode {
        FillMode::NoFill => {}
        FillMode::NearestNeighbor => nearest_fill(image, covered),
        FillMode::Interpolate => pull_push(image, covered),
    }
}

/// Breadth-first flood from every covered texel at once
fn nearest_fill(image: &mut ImageData, covered: &[bool]) {
    let (w, h) = (image.width, image.height);
    let mut done = covered.to_vec();
    let mut queue: VecDeque<usize> = (0..w * h).filter(|&i| covered[i]).collect();
    while let Some(i) = queue.pop_front() {
        let (x, y) = (i % w, i / w);
        let mut visit = |j: usize| {
            if !done[j] {
                done[j] = true;
                image.pixels[j] = image.pixels[i];
                queue.push_back(j);
            }
        };
        if x > 0 {
            visit(i - 1);
        }
        if x + 1 < w {
            visit(i + 1);
        }
        if y > 0 {
            visit(i - w);
        }
        if y + 1 < h {
            visit(i + w);
        }
    }
}

struct Level {
    width: usize,
    height: usize,
    colors: Vec<Color>,
    weights: Vec<f32>,
}

impl Level {
    fn downsample(&self) -> Level {
        let (width, height) = (self.width.div_ceil(2), self.height.div_ceil(2));
        let mut colors = vec![Color::zeros(); width * height];
        let mut weights = vec![0.0; width * height];
        for y in 0..height {
            for x in 0..width {
                let mut sum = Color::zeros();
                let mut weight = 0.0;
                for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                    let (fx, fy) = (x * 2 + dx, y * 2 + dy);
                    if fx < self.width && fy < self.height {
                        let i = fy * self.width + fx;
                        sum += self.colors[i] * self.weights[i];
                        weight += self.weights[i];
                    }
                }
                if weight > 0.0 {
                    colors[y * width + x] = sum / weight;
                    weights[y * width + x] = weight.min(1.0);
                }
            }
        }
        Level {
            width,
            height,
            colors,
            weights,
        }
    }
}

/// Fill empty texels from successively coarser averages of the covered ones
fn pull_push(image: &mut ImageData, covered: &[bool]) {
    let mut levels = vec![Level {
        width: image.width,
        height: image.height,
        colors: image.pixels.clone(),
        weights: covered.iter().map(|&c| if c { 1.0 } else { 0.0 }).collect(),
    }];
    loop {
        let last = &levels[levels.len() - 1];
        if last.width <= 1 && last.height <= 1 {
            break;
        }
        let next = last.downsample();
        levels.push(next);
    }

    for i in (0..levels.len() - 1).rev() {
        let (fine, coarse) = levels.split_at_mut(i + 1);
        let (fine, coarse) = (&mut fine[i], &coarse[0]);
        for y in 0..fine.height {
            for x in 0..fine.width {
                let index = y * fine.width + x;
                let weight = fine.weights[index];
                if weight < 1.0 {
                    let pushed = coarse.colors[(y / 2) * coarse.width + x / 2];
                    fine.colors[index] = fine.colors[index] * weight + pushed * (1.0 - weight);
                    fine.weights[index] = 1.0;
                }
            }
        }
    }

    for (i, pixel) in image.pixels.iter_mut().enumerate() {
        if !covered[i] {
            *pixel = levels[0].colors[i];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 8x8 image with only the left column covered in red
    fn left_column() -> (ImageData, Vec<bool>) {
        let mut image = ImageData::new(8, 8);
        let mut covered = vec![false; 64];
        for y in 0..8 {
            image.set(0, y, Color::new(1.0, 0.0, 0.0, 1.0));
            covered[y * 8] = true;
        }
        (image, covered)
    }

    #[test]
    fn test_dilation_grows_by_iterations() {
        let (mut image, mut covered) = left_column();
        dilate(&mut image, &mut covered, 2);
        assert!(covered[2] && !covered[3]);
        assert_eq!(image.get(2, 5), Color::new(1.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn test_fill_modes_cover_everything_but_nofill() {
        for mode in [FillMode::Interpolate, FillMode::NearestNeighbor] {
            let (mut image, covered) = left_column();
            fill(&mut image, &covered, mode);
            assert!(image.pixels.iter().all(|p| (p.x - 1.0).abs() < 1e-5 && p.w > 0.99), "{:?}", mode);
        }
        let (mut image, covered) = left_column();
        fill(&mut image, &covered, FillMode::NoFill);
        assert_eq!(image.get(7, 7), Color::zeros());
    }

    #[test]
    fn test_covered_texels_are_untouched() {
        let (mut image, mut covered) = left_column();
        image.set(4, 4, Color::new(0.0, 1.0, 0.0, 1.0));
        covered[4 * 8 + 4] = true;
        fill(&mut image, &covered, FillMode::Interpolate);
        assert_eq!(image.get(4, 4), Color::new(0.0, 1.0, 0.0, 1.0));
        assert_eq!(image.get(0, 0), Color::new(1.0, 0.0, 0.0, 1.0));
    }
}
