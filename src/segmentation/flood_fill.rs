use image::RgbaImage;

/// Makes the 4-connected region of pixels around `seed` whose color is close to the seed color
/// fully transparent.
///
/// A pixel belongs to the region when the sum of its absolute RGB differences to the seed color
/// is at most `tolerance * 3` and it is not already transparent. Only the alpha channel of
/// matched pixels is changed.
///
/// Returns the number of erased pixels. Seeding outside the image or on a transparent pixel
/// erases nothing.
pub fn flood_erase(image: &mut RgbaImage, seed_x: u32, seed_y: u32, tolerance: u32) -> usize {
    let (width, height) = image.dimensions();
    if seed_x >= width || seed_y >= height {
        return 0;
    }

    let seed = *image.get_pixel(seed_x, seed_y);
    if seed[3] == 0 {
        return 0;
    }

    let target = [seed[0], seed[1], seed[2]];
    let max_distance = tolerance.saturating_mul(3);
    let matches = |pixel: &image::Rgba<u8>| {
        pixel[3] != 0
            && pixel[0].abs_diff(target[0]) as u32
                + pixel[1].abs_diff(target[1]) as u32
                + pixel[2].abs_diff(target[2]) as u32
                <= max_distance
    };

    let mut visited = vec![false; width as usize * height as usize];
    let mut stack = vec![(seed_x, seed_y)];
    let mut erased = 0;

    while let Some((x, y)) = stack.pop() {
        let idx = y as usize * width as usize + x as usize;
        if visited[idx] {
            continue;
        }
        let pixel = image.get_pixel_mut(x, y);
        if !matches(&*pixel) {
            // neighbours that don't match are left unvisited, another direction may reach them
            continue;
        }
        visited[idx] = true;
        pixel[3] = 0;
        erased += 1;

        if x > 0 {
            stack.push((x - 1, y));
        }
        if x + 1 < width {
            stack.push((x + 1, y));
        }
        if y > 0 {
            stack.push((x, y - 1));
        }
        if y + 1 < height {
            stack.push((x, y + 1));
        }
    }

    erased
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use proptest::prelude::*;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
    const RED: Rgba<u8> = Rgba([200, 30, 30, 255]);

    /// Two white halves separated by a black vertical line at x == 4
    fn split_image() -> RgbaImage {
        RgbaImage::from_fn(9, 5, |x, _| if x == 4 { BLACK } else { WHITE })
    }

    fn transparent_set(image: &RgbaImage) -> Vec<(u32, u32)> {
        image
            .enumerate_pixels()
            .filter(|(_, _, p)| p[3] == 0)
            .map(|(x, y, _)| (x, y))
            .collect()
    }

    #[test]
    fn test_erases_whole_uniform_image() {
        let mut image = RgbaImage::from_pixel(6, 4, WHITE);
        assert_eq!(flood_erase(&mut image, 2, 2, 5), 24);
        assert!(image.pixels().all(|p| p[3] == 0));
        // color channels are left alone
        assert!(image.pixels().all(|p| p[0] == 255 && p[1] == 255 && p[2] == 255));
    }

    #[test]
    fn test_border_contains_region() {
        let mut image = split_image();
        let erased = flood_erase(&mut image, 0, 0, 10);
        assert_eq!(erased, 4 * 5);
        for (x, y, pixel) in image.enumerate_pixels() {
            if x < 4 {
                assert_eq!(pixel[3], 0, "pixel {},{} should be erased", x, y);
            } else {
                assert_eq!(pixel[3], 255, "pixel {},{} should be kept", x, y);
            }
        }
    }

    #[test]
    fn test_diagonal_neighbours_are_not_connected() {
        let mut image = RgbaImage::from_pixel(3, 3, BLACK);
        image.put_pixel(0, 0, WHITE);
        image.put_pixel(1, 1, WHITE);
        assert_eq!(flood_erase(&mut image, 0, 0, 0), 1);
        assert_eq!(image.get_pixel(1, 1)[3], 255);
    }

    #[test]
    fn test_transparent_seed_is_noop() {
        let mut image = RgbaImage::from_pixel(4, 4, WHITE);
        image.put_pixel(1, 1, Rgba([255, 255, 255, 0]));
        let before = image.clone();
        assert_eq!(flood_erase(&mut image, 1, 1, 100), 0);
        assert_eq!(image, before);
    }

    #[test]
    fn test_seed_outside_image_is_noop() {
        let mut image = RgbaImage::from_pixel(4, 4, WHITE);
        assert_eq!(flood_erase(&mut image, 4, 0, 100), 0);
        assert_eq!(flood_erase(&mut image, 0, 9, 100), 0);
    }

    #[test]
    fn test_tolerance_uses_channel_sum() {
        // distance between WHITE and (245, 245, 245) is 30
        let mut image = RgbaImage::from_pixel(2, 1, WHITE);
        image.put_pixel(1, 0, Rgba([245, 245, 245, 255]));

        let mut strict = image.clone();
        assert_eq!(flood_erase(&mut strict, 0, 0, 9), 1);

        assert_eq!(flood_erase(&mut image, 0, 0, 10), 2);
    }

    #[test]
    fn test_second_application_is_noop() {
        let mut image = split_image();
        flood_erase(&mut image, 0, 0, 20);
        let once = image.clone();
        assert_eq!(flood_erase(&mut image, 0, 0, 20), 0);
        assert_eq!(image, once);
    }

    fn arb_image() -> impl Strategy<Value = RgbaImage> {
        (1u32..10, 1u32..10).prop_flat_map(|(w, h)| {
            proptest::collection::vec(0u8..4, (w * h) as usize).prop_map(move |palette| {
                // a small palette makes connected regions likely
                RgbaImage::from_fn(w, h, |x, y| match palette[(y * w + x) as usize] {
                    0 => WHITE,
                    1 => BLACK,
                    2 => RED,
                    _ => Rgba([240, 240, 235, 255]),
                })
            })
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_tolerance_is_monotonic(
            image in arb_image(),
            seed in (0u32..10, 0u32..10),
            low in 0u32..60,
            extra in 1u32..60,
        ) {
            let (sx, sy) = (seed.0 % image.width(), seed.1 % image.height());

            let mut strict = image.clone();
            flood_erase(&mut strict, sx, sy, low);
            let mut loose = image.clone();
            flood_erase(&mut loose, sx, sy, low + extra);

            let loose_set = transparent_set(&loose);
            for point in transparent_set(&strict) {
                prop_assert!(loose_set.contains(&point));
            }
        }

        #[test]
        fn prop_erasing_is_idempotent(
            image in arb_image(),
            seed in (0u32..10, 0u32..10),
            tolerance in 0u32..100,
        ) {
            let (sx, sy) = (seed.0 % image.width(), seed.1 % image.height());
            let mut image = image;
            flood_erase(&mut image, sx, sy, tolerance);
            let once = image.clone();
            prop_assert_eq!(flood_erase(&mut image, sx, sy, tolerance), 0);
            prop_assert_eq!(image, once);
        }
    }
}
