use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::TallerError;

/// A lasso sample in image pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LassoPoint {
    pub x: f32,
    pub y: f32,
}

impl LassoPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Parses a lasso path written as space separated `x,y` pairs, e.g. `"1,1 9,1 9,9"`.
pub fn parse_lasso(path: &str) -> Result<Vec<LassoPoint>, TallerError> {
    path.split_whitespace()
        .map(|pair| -> Result<LassoPoint, TallerError> {
            let invalid = || TallerError::InvalidUserInput {
                field: "lasso".to_string(),
                reason: format!("expected x,y but got {:?}", pair),
            };
            let (x, y) = pair.split_once(',').ok_or_else(invalid)?;
            let coordinate = |raw: &str| match raw.trim().parse::<f32>() {
                Ok(value) if value.is_finite() => Ok(value),
                _ => Err(invalid()),
            };
            Ok(LassoPoint::new(coordinate(x)?, coordinate(y)?))
        })
        .collect()
}

/// Even-odd test of `(px, py)` against the polygon closed from its last point back to the first.
pub fn polygon_contains(polygon: &[LassoPoint], px: f32, py: f32) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (a, b) = (polygon[i], polygon[j]);
        if (a.y > py) != (b.y > py) {
            let x_cross = a.x + (py - a.y) * (b.x - a.x) / (b.y - a.y);
            if px < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Crops `image` to the closed lasso polygon.
///
/// Pixels whose center falls inside the polygon (even-odd rule) keep their RGBA value, every
/// other pixel becomes fully transparent. Returns `None` when the polygon has fewer than three
/// points.
pub fn lasso_cut(image: &RgbaImage, polygon: &[LassoPoint]) -> Option<RgbaImage> {
    if polygon.len() < 3 {
        return None;
    }

    Some(RgbaImage::from_fn(image.width(), image.height(), |x, y| {
        if polygon_contains(polygon, x as f32 + 0.5, y as f32 + 0.5) {
            *image.get_pixel(x, y)
        } else {
            Rgba([0, 0, 0, 0])
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_lasso_path() {
        let points = parse_lasso(" 1,2  3.5,4\t0,0 ").unwrap();
        assert_eq!(
            points,
            vec![
                LassoPoint::new(1., 2.),
                LassoPoint::new(3.5, 4.),
                LassoPoint::new(0., 0.)
            ]
        );
        assert!(parse_lasso("").unwrap().is_empty());
        assert!(matches!(
            parse_lasso("1,2 3"),
            Err(TallerError::InvalidUserInput { .. })
        ));
        assert!(parse_lasso("a,b").is_err());
        for path in ["NaN,1 2,2 3,3", "1,inf 2,2 3,3", "1,2 -infinity,2"] {
            assert!(matches!(
                parse_lasso(path),
                Err(TallerError::InvalidUserInput { .. })
            ));
        }
    }

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 20) as u8, (y * 20) as u8, 100, 255])
        })
    }

    fn points(coords: &[(f32, f32)]) -> Vec<LassoPoint> {
        coords.iter().map(|(x, y)| LassoPoint::new(*x, *y)).collect()
    }

    #[test]
    fn test_rectangle_keeps_inside_only() {
        let image = gradient(10, 10);
        let polygon = points(&[(2., 2.), (7., 2.), (7., 6.), (2., 6.)]);
        let cut = lasso_cut(&image, &polygon).unwrap();

        for (x, y, pixel) in cut.enumerate_pixels() {
            if (2..7).contains(&x) && (2..6).contains(&y) {
                assert_eq!(pixel, image.get_pixel(x, y));
            } else {
                assert_eq!(pixel[3], 0, "pixel {},{} should be transparent", x, y);
            }
        }
    }

    #[test]
    fn test_open_chain_is_closed() {
        // the last edge (0,10) -> (0,0) is never sampled explicitly
        let image = gradient(10, 10);
        let polygon = points(&[(0., 0.), (10., 0.), (10., 10.), (0., 10.)]);
        let cut = lasso_cut(&image, &polygon).unwrap();
        assert_eq!(cut, image);
    }

    #[test]
    fn test_too_few_points_is_rejected() {
        let image = gradient(4, 4);
        assert!(lasso_cut(&image, &[]).is_none());
        assert!(lasso_cut(&image, &points(&[(0., 0.), (3., 3.)])).is_none());
    }

    #[test]
    fn test_self_intersecting_bowtie_uses_even_odd() {
        // a bowtie: a left and a right triangle meeting at the center (5,5)
        let polygon = points(&[(0., 0.), (10., 10.), (10., 0.), (0., 10.)]);
        assert!(polygon_contains(&polygon, 1., 5.));
        assert!(polygon_contains(&polygon, 9., 5.));
        assert!(!polygon_contains(&polygon, 5., 2.));
        assert!(!polygon_contains(&polygon, 5., 8.));
    }

    #[test]
    fn test_cut_does_not_touch_source() {
        let image = gradient(5, 5);
        let before = image.clone();
        let _ = lasso_cut(&image, &points(&[(0., 0.), (2., 0.), (0., 2.)]));
        assert_eq!(image, before);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_rectangle_crop_is_total(
            x0 in 0u32..8,
            y0 in 0u32..8,
            w in 1u32..8,
            h in 1u32..8,
        ) {
            let image = gradient(16, 16);
            let (x1, y1) = (x0 + w, y0 + h);
            let polygon = points(&[
                (x0 as f32, y0 as f32),
                (x1 as f32, y0 as f32),
                (x1 as f32, y1 as f32),
                (x0 as f32, y1 as f32),
            ]);
            let cut = lasso_cut(&image, &polygon).unwrap();
            for (x, y, pixel) in cut.enumerate_pixels() {
                let inside = x >= x0 && x < x1 && y >= y0 && y < y1;
                if inside {
                    prop_assert_eq!(pixel, image.get_pixel(x, y));
                } else {
                    prop_assert_eq!(pixel[3], 0);
                }
            }
        }
    }
}
