// THEORY:
// The `SampleBuffer` bridges a raw camera frame and the cluster classifier. A frame
// has hundreds of thousands of pixels, most of them background; the sticker sits
// roughly in the middle of the viewfinder. The buffer draws a fixed number of
// random samples from a centred square so that:
// 1.  **Bounded Work**: k-means cost depends on `sample_count`, not on resolution.
// 2.  **Spatial Focus**: the centred crop discards most of the table, hands and
//     packaging around the sticker before any color math happens.
// 3.  **Ephemeral**: a buffer lives for one classification call and is never stored.

pub mod sample_buffer {
    use crate::core_modules::pixel::pixel::Pixel;
    use rand::Rng;

    const RGBA_CHANNELS: usize = 4;

    /// A fixed-size collection of RGB samples drawn from one frame region.
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct SampleBuffer {
        samples: Vec<Pixel>,
    }

    impl SampleBuffer {
        pub fn new(samples: Vec<Pixel>) -> Self {
            Self { samples }
        }

        /// Samples a raw, row-major RGBA buffer.
        ///
        /// The region is a square of side `region_fraction * min(width, height)`
        /// centred on the frame. A buffer shorter than `width * height * 4` only
        /// yields the samples that land inside it.
        pub fn from_rgba_frame<R: Rng + ?Sized>(
            frame_buffer: &[u8],
            width: u32,
            height: u32,
            sample_count: usize,
            region_fraction: f64,
            rng: &mut R,
        ) -> Self {
            let mut samples = Vec::with_capacity(sample_count);
            if width == 0 || height == 0 {
                return Self { samples };
            }

            let region = CentredRegion::new(width, height, region_fraction);
            for _ in 0..sample_count {
                let (x, y) = region.draw(rng);
                let byte_index = ((y as usize * width as usize) + x as usize) * RGBA_CHANNELS;
                if let Some(bytes) = frame_buffer.get(byte_index..byte_index + RGBA_CHANNELS) {
                    if let Ok(pixel) = Pixel::try_from(bytes) {
                        samples.push(pixel);
                    }
                }
            }
            Self { samples }
        }

        /// Samples a decoded image with the same centred-region policy.
        pub fn from_image<R: Rng + ?Sized>(
            image: &image::RgbaImage,
            sample_count: usize,
            region_fraction: f64,
            rng: &mut R,
        ) -> Self {
            let (width, height) = image.dimensions();
            let mut samples = Vec::with_capacity(sample_count);
            if width == 0 || height == 0 {
                return Self { samples };
            }

            let region = CentredRegion::new(width, height, region_fraction);
            for _ in 0..sample_count {
                let (x, y) = region.draw(rng);
                samples.push(Pixel::from(*image.get_pixel(x, y)));
            }
            Self { samples }
        }

        pub fn as_slice(&self) -> &[Pixel] {
            &self.samples
        }

        pub fn len(&self) -> usize {
            self.samples.len()
        }

        pub fn is_empty(&self) -> bool {
            self.samples.is_empty()
        }

        pub fn into_samples(self) -> Vec<Pixel> {
            self.samples
        }
    }

    /// Inclusive pixel bounds of the centred sampling square, clipped to the frame.
    struct CentredRegion {
        x_min: u32,
        x_max: u32,
        y_min: u32,
        y_max: u32,
    }

    impl CentredRegion {
        fn new(width: u32, height: u32, region_fraction: f64) -> Self {
            let fraction = if region_fraction.is_finite() {
                region_fraction.clamp(0.0, 1.0)
            } else {
                1.0
            };
            let side = ((width.min(height) as f64) * fraction).max(1.0);
            let half = side / 2.0;
            let centre_x = width as f64 / 2.0;
            let centre_y = height as f64 / 2.0;

            let clip = |low: f64, high: f64, limit: u32| -> (u32, u32) {
                let low = low.floor().max(0.0) as u32;
                let high = (high.ceil() as u32).saturating_sub(1).min(limit - 1);
                (low.min(high), high)
            };
            let (x_min, x_max) = clip(centre_x - half, centre_x + half, width);
            let (y_min, y_max) = clip(centre_y - half, centre_y + half, height);
            Self { x_min, x_max, y_min, y_max }
        }

        fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> (u32, u32) {
            (
                rng.gen_range(self.x_min..=self.x_max),
                rng.gen_range(self.y_min..=self.y_max),
            )
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use rand::SeedableRng;
        use rand::rngs::StdRng;

        /// 10x10 frame: a red 4x4 square in the middle, blue border everywhere else.
        fn framed_square() -> Vec<u8> {
            let mut data = Vec::with_capacity(10 * 10 * 4);
            for y in 0..10 {
                for x in 0..10 {
                    if (3..7).contains(&x) && (3..7).contains(&y) {
                        data.extend_from_slice(&[255, 0, 0, 255]);
                    } else {
                        data.extend_from_slice(&[0, 0, 255, 255]);
                    }
                }
            }
            data
        }

        #[test]
        fn centred_crop_only_sees_the_middle() {
            let mut rng = StdRng::seed_from_u64(7);
            let buffer = SampleBuffer::from_rgba_frame(&framed_square(), 10, 10, 500, 0.4, &mut rng);
            assert_eq!(buffer.len(), 500);
            assert!(buffer.as_slice().iter().all(|p| *p == Pixel::new(255, 0, 0)));
        }

        #[test]
        fn full_region_reaches_the_border() {
            let mut rng = StdRng::seed_from_u64(7);
            let buffer = SampleBuffer::from_rgba_frame(&framed_square(), 10, 10, 2000, 1.0, &mut rng);
            assert!(buffer.as_slice().contains(&Pixel::new(0, 0, 255)));
        }

        #[test]
        fn truncated_frames_yield_fewer_samples() {
            let mut rng = StdRng::seed_from_u64(1);
            let frame = framed_square();
            let buffer = SampleBuffer::from_rgba_frame(&frame[..40], 10, 10, 100, 1.0, &mut rng);
            assert!(buffer.len() < 100);
        }

        #[test]
        fn empty_frames_yield_nothing() {
            let mut rng = StdRng::seed_from_u64(1);
            assert!(SampleBuffer::from_rgba_frame(&[], 0, 0, 100, 0.5, &mut rng).is_empty());
        }

        #[test]
        fn images_sample_like_raw_frames() {
            let image = image::RgbaImage::from_raw(10, 10, framed_square()).expect("valid frame");
            let mut rng = StdRng::seed_from_u64(3);
            let buffer = SampleBuffer::from_image(&image, 300, 0.4, &mut rng);
            assert_eq!(buffer.len(), 300);
            assert!(buffer.as_slice().iter().all(|p| *p == Pixel::new(255, 0, 0)));
        }
    }
}
