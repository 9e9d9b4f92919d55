// THEORY:
// The `cluster` module consolidates a noisy sample buffer into a handful of
// representative colors before anything is judged. Mixed lighting splits one
// physical sticker into many per-pixel readings (specular highlights, shadowed
// edges); k-means pulls those back together.
//
// It solves the same "data association problem" as frame-to-frame tracking: every
// sample is matched to its nearest centroid, then each centroid moves to the mean
// of what it was matched with.
//
// Key principles:
// 1.  **Bounded**: exactly `max_iterations` assignment rounds, no convergence loop.
// 2.  **Injected Randomness**: initial centroids are drawn with replacement from
//     the caller's `Rng`. A seeded source makes a run reproducible.
// 3.  **Honest Counts**: a centroid that attracted nobody in the final round keeps
//     its position but reports zero members, so it cannot win on stale weight.
//     The previous round's count is never carried forward.

use crate::core_modules::pixel::pixel::Pixel;
use rand::Rng;

/// One representative color produced by a k-means run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Centroid {
    pub pixel: Pixel,
    /// Number of samples assigned to this centroid in the final round.
    pub member_count: usize,
}

/// Running per-channel sums for one cluster during a round.
#[derive(Default, Clone, Copy)]
struct ChannelSums {
    red: u64,
    green: u64,
    blue: u64,
    count: usize,
}

impl ChannelSums {
    fn add(&mut self, pixel: &Pixel) {
        self.red += pixel.red as u64;
        self.green += pixel.green as u64;
        self.blue += pixel.blue as u64;
        self.count += 1;
    }

    /// Rounded mean of the accumulated members.
    fn average_pixel(&self) -> Option<Pixel> {
        if self.count == 0 {
            return None;
        }
        let count = self.count as u64;
        let mean = |sum: u64| ((sum + count / 2) / count) as u8;
        Some(Pixel::new(mean(self.red), mean(self.green), mean(self.blue)))
    }
}

/// Runs bounded k-means over `samples`.
///
/// `k` and `max_iterations` below 1 are treated as 1. An empty input yields no
/// centroids.
pub fn run_kmeans<R: Rng + ?Sized>(
    samples: &[Pixel],
    k: usize,
    max_iterations: usize,
    rng: &mut R,
) -> Vec<Centroid> {
    if samples.is_empty() {
        return Vec::new();
    }
    let k = k.max(1);
    let max_iterations = max_iterations.max(1);

    let mut centroids: Vec<Centroid> = (0..k)
        .map(|_| Centroid {
            pixel: samples[rng.gen_range(0..samples.len())],
            member_count: 0,
        })
        .collect();

    for _ in 0..max_iterations {
        let mut sums = vec![ChannelSums::default(); k];

        for sample in samples {
            let nearest = nearest_centroid(&centroids, sample);
            sums[nearest].add(sample);
        }

        for (centroid, cluster) in centroids.iter_mut().zip(&sums) {
            if let Some(mean) = cluster.average_pixel() {
                centroid.pixel = mean;
            }
            centroid.member_count = cluster.count;
        }
    }

    centroids
}

/// Index of the closest centroid; ties go to the lowest index.
fn nearest_centroid(centroids: &[Centroid], sample: &Pixel) -> usize {
    let mut best_index = 0;
    let mut best_distance = u32::MAX;
    for (index, centroid) in centroids.iter().enumerate() {
        let distance = centroid.pixel.distance_squared(sample);
        if distance < best_distance {
            best_distance = distance;
            best_index = index;
        }
    }
    best_index
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn empty_input_has_no_centroids() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(run_kmeans(&[], 5, 5, &mut rng).is_empty());
    }

    #[test]
    fn identical_samples_collapse_into_one_cluster() {
        let mut rng = StdRng::seed_from_u64(11);
        let samples = vec![Pixel::new(0, 200, 50); 64];
        let centroids = run_kmeans(&samples, 5, 5, &mut rng);

        assert_eq!(centroids.len(), 5);
        assert!(centroids.iter().all(|c| c.pixel == Pixel::new(0, 200, 50)));
        assert_eq!(centroids.iter().map(|c| c.member_count).sum::<usize>(), 64);
        assert_eq!(centroids[0].member_count, 64);
    }

    #[test]
    fn two_distinct_colors_separate() {
        let mut samples = vec![Pixel::new(250, 10, 10); 30];
        samples.extend(vec![Pixel::new(10, 10, 250); 70]);

        // With two initial draws we may pick the same color twice; across seeds at
        // least one run has to split them, and every run must account for all samples.
        let mut split_seen = false;
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let centroids = run_kmeans(&samples, 2, 4, &mut rng);
            assert_eq!(centroids.iter().map(|c| c.member_count).sum::<usize>(), 100);
            let counts: Vec<usize> = centroids.iter().map(|c| c.member_count).collect();
            if counts.contains(&30) && counts.contains(&70) {
                split_seen = true;
            }
        }
        assert!(split_seen);
    }

    #[test]
    fn zero_parameters_are_clamped() {
        let mut rng = StdRng::seed_from_u64(2);
        let samples = vec![Pixel::new(1, 2, 3); 4];
        let centroids = run_kmeans(&samples, 0, 0, &mut rng);
        assert_eq!(centroids.len(), 1);
        assert_eq!(centroids[0].member_count, 4);
    }

    #[test]
    fn means_are_rounded() {
        let mut sums = ChannelSums::default();
        sums.add(&Pixel::new(0, 0, 0));
        sums.add(&Pixel::new(1, 3, 255));
        assert_eq!(sums.average_pixel(), Some(Pixel::new(1, 2, 128)));
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let samples: Vec<Pixel> = (0..200u32)
            .map(|i| Pixel::new((i * 7 % 256) as u8, (i * 13 % 256) as u8, (i * 29 % 256) as u8))
            .collect();
        let first = run_kmeans(&samples, 4, 5, &mut StdRng::seed_from_u64(99));
        let second = run_kmeans(&samples, 4, 5, &mut StdRng::seed_from_u64(99));
        assert_eq!(first, second);
    }
}
