//! Sample-grid triangle rasterisation shared by the mapping builders

use lodcrate_core::Vector2f;

const INSIDE_EPSILON: f32 = 1e-6;

/// Offsets of `level²` samples inside a unit texel, row-major
pub(crate) fn subsample_offsets(level: usize) -> Vec<(f32, f32)> {
    let level = level.max(1);
    let step = 1.0 / level as f32;
    (0..level)
        .flat_map(|j| (0..level).map(move |i| ((i as f32 + 0.5) * step, (j as f32 + 0.5) * step)))
        .collect()
}

/// Texture coordinate to pixel position; `v = 0` is the bottom row
pub(crate) fn uv_to_pixel(uv: Vector2f, width: usize, height: usize) -> (f32, f32) {
    (uv.x * width as f32, (1.0 - uv.y) * height as f32)
}

fn edge(a: (f32, f32), b: (f32, f32), p: (f32, f32)) -> f32 {
    (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0)
}

/// Visit every sample of a `width` x `height` grid covered by the triangle
/// `corners` (pixel coordinates). `visit` receives the texel, the sample
/// index within the texel and the barycentric weights of the corners.
pub(crate) fn rasterize_triangle(
    corners: [(f32, f32); 3],
    width: usize,
    height: usize,
    offsets: &[(f32, f32)],
    mut visit: impl FnMut(usize, usize, usize, [f32; 3]),
) {
    let [a, b, c] = corners;
    let area = edge(a, b, c);
    if !area.is_finite() || area.abs() < 1e-12 {
        return;
    }
    let min_x = a.0.min(b.0).min(c.0).floor().max(0.0) as usize;
    let min_y = a.1.min(b.1).min(c.1).floor().max(0.0) as usize;
    let max_x = (a.0.max(b.0).max(c.0).ceil().max(0.0) as usize).min(width);
    let max_y = (a.1.max(b.1).max(c.1).ceil().max(0.0) as usize).min(height);

    for y in min_y..max_y {
        for x in min_x..max_x {
            for (s, &(ox, oy)) in offsets.iter().enumerate() {
                let p = (x as f32 + ox, y as f32 + oy);
                let w0 = edge(b, c, p) / area;
                let w1 = edge(c, a, p) / area;
                let w2 = 1.0 - w0 - w1;
                if w0 >= -INSIDE_EPSILON && w1 >= -INSIDE_EPSILON && w2 >= -INSIDE_EPSILON {
                    visit(x, y, s, [w0, w1, w2]);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_offsets_are_centred() {
        assert_eq!(subsample_offsets(1), vec![(0.5, 0.5)]);
        let two = subsample_offsets(2);
        assert_eq!(two.len(), 4);
        assert_eq!(two[1], (0.75, 0.25));
    }

    #[test]
    fn test_half_square_coverage() {
        let offsets = subsample_offsets(1);
        let mut covered = Vec::new();
        rasterize_triangle([(0.0, 0.0), (4.0, 0.0), (0.0, 4.0)], 4, 4, &offsets, |x, y, _, bary| {
            assert_relative_eq!(bary.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
            covered.push((x, y));
        });
        // texel centres with x + y + 1 <= 4
        assert_eq!(covered.len(), 10);
        assert!(covered.contains(&(3, 0)));
        assert!(!covered.contains(&(3, 1)));
    }

    #[test]
    fn test_winding_does_not_matter() {
        let offsets = subsample_offsets(2);
        let mut cw = 0;
        let mut ccw = 0;
        rasterize_triangle([(0.0, 0.0), (3.0, 0.0), (0.0, 3.0)], 8, 8, &offsets, |_, _, _, _| cw += 1);
        rasterize_triangle([(0.0, 0.0), (0.0, 3.0), (3.0, 0.0)], 8, 8, &offsets, |_, _, _, _| ccw += 1);
        assert_eq!(cw, ccw);
        assert!(cw > 0);
    }

    #[test]
    fn test_clipped_to_grid() {
        let offsets = subsample_offsets(1);
        let mut count = 0;
        rasterize_triangle([(-10.0, -10.0), (20.0, -10.0), (-10.0, 20.0)], 2, 2, &offsets, |x, y, _, _| {
            assert!(x < 2 && y < 2);
            count += 1;
        });
        assert_eq!(count, 4);
    }
}
