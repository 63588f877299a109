use super::problem::{ConeSpec, ProblemSpec};
use nalgebra::{DMatrix, DVector};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::instrument;

/// Produces problem instances on demand. Must be deterministic in `(size, seed)`.
pub trait ProblemSource: Send + Sync {
    fn generate(&self, size: usize, seed: u64) -> ProblemSpec;
}

/// Dense Gaussian least-squares instances with `size` rows and
/// `max(1, size / column_divisor)` columns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RandomLeastSquares {
    pub cone: ConeSpec,
    pub column_divisor: usize,
}

impl Default for RandomLeastSquares {
    fn default() -> Self {
        Self {
            cone: ConeSpec::default(),
            column_divisor: 10,
        }
    }
}

impl RandomLeastSquares {
    pub fn new(cone: ConeSpec) -> Self {
        Self {
            cone,
            ..Self::default()
        }
    }

    pub fn columns_for(&self, size: usize) -> usize {
        (size / self.column_divisor.max(1)).max(1)
    }
}

impl ProblemSource for RandomLeastSquares {
    #[instrument(level = "trace", skip(self))]
    fn generate(&self, size: usize, seed: u64) -> ProblemSpec {
        let rows = size.max(1);
        let cols = self.columns_for(rows);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let a = DMatrix::from_fn(rows, cols, |_, _| standard_normal(&mut rng));
        let b = DVector::from_fn(rows, |_, _| standard_normal(&mut rng));
        ProblemSpec::new(a, b, self.cone)
    }
}

// Box-Muller; `1 - u` keeps the logarithm away from zero.
fn standard_normal(rng: &mut impl Rng) -> f64 {
    let u1: f64 = 1.0 - rng.r#gen::<f64>();
    let u2: f64 = rng.r#gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_is_deterministic_for_a_seed() {
        let source = RandomLeastSquares::default();
        assert_eq!(source.generate(50, 7), source.generate(50, 7));
    }

    #[test]
    fn different_seeds_give_different_instances() {
        let source = RandomLeastSquares::default();
        assert_ne!(source.generate(50, 1), source.generate(50, 2));
    }

    #[test]
    fn shape_follows_size_and_divisor() {
        let source = RandomLeastSquares::default();
        let spec = source.generate(1000, 0);
        assert_eq!(spec.rows(), 1000);
        assert_eq!(spec.cols(), 100);
        assert_eq!(spec.b().len(), 1000);
    }

    #[test]
    fn tiny_sizes_still_have_one_column() {
        let source = RandomLeastSquares::default();
        let spec = source.generate(3, 0);
        assert_eq!(spec.cols(), 1);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn generated_entries_look_standard_normal() {
        let spec = RandomLeastSquares::default().generate(2000, 11);
        let n = spec.a().len() as f64;
        let mean = spec.a().iter().sum::<f64>() / n;
        let var = spec.a().iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        assert!(mean.abs() < 0.05, "mean {}", mean);
        assert!((var - 1.0).abs() < 0.05, "variance {}", var);
    }

    #[test]
    fn configured_cone_is_attached() {
        let spec = RandomLeastSquares::new(ConeSpec::NonNegative).generate(20, 3);
        assert_eq!(spec.cone(), ConeSpec::NonNegative);
    }
}
