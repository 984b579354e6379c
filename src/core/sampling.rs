//! Sampling routines over canonical domains, and an alias table for
//! O(1) draws from discrete distributions.

// lumen
use crate::core::common::{Float, INV_PI, PI};
use crate::core::geometry::{Point2f, Vector3f};
use crate::core::rng::Rng;

pub fn uniform_sample_2d(rng: &mut Rng) -> Point2f {
    Point2f {
        x: rng.uniform_float(),
        y: rng.uniform_float(),
    }
}

/// Uniform direction over the +z hemisphere.
pub fn uniform_sample_hemisphere(u: &Point2f) -> Vector3f {
    let cos_theta: Float = u.x;
    let sin_theta: Float = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
    let phi: Float = 2.0 * PI * u.y;
    Vector3f {
        x: sin_theta * phi.cos(),
        y: sin_theta * phi.sin(),
        z: cos_theta,
    }
}

pub fn uniform_hemisphere_pdf() -> Float {
    1.0 / (2.0 * PI)
}

/// Cosine-weighted direction over the +z hemisphere; samples a disk and
/// projects up.
pub fn cosine_sample_hemisphere(u: &Point2f) -> Vector3f {
    let r: Float = u.x.sqrt();
    let phi: Float = 2.0 * PI * u.y;
    let x: Float = r * phi.cos();
    let y: Float = r * phi.sin();
    let z: Float = (1.0 - x * x - y * y).max(0.0).sqrt();
    Vector3f { x, y, z }
}

pub fn cosine_hemisphere_pdf(cos_theta: Float) -> Float {
    cos_theta * INV_PI
}

#[derive(Debug, Copy, Clone)]
struct TableEntry {
    first_pmf: Float,
    second_pmf: Float,
    /// Ratio of probabilities for just this column.
    ratio: Float,
    second_elem: i32,
}

/// Represents a discrete probability distribution in a way that can be
/// sampled in O(1): each column holds at most two outcomes (Vose's
/// alias method).
pub struct AliasTable {
    entries: Vec<TableEntry>,
    n: usize,
}

impl AliasTable {
    /// `relative_weights` is an unnormalized pmf for the distribution.
    pub fn new(relative_weights: Vec<Float>) -> Self {
        let n: usize = relative_weights.len();
        let sum: Float = relative_weights.iter().sum();
        let inv_sum: Float = 1.0 / sum;
        let avg: Float = sum / n as Float;

        let mut lightweights: Vec<(Float, usize)> = Vec::new();
        let mut heavyweights: Vec<(Float, usize)> = Vec::new();
        for (i, &p) in relative_weights.iter().enumerate() {
            if p > avg {
                heavyweights.push((p, i));
            } else {
                lightweights.push((p, i));
            }
        }

        let mut entries: Vec<TableEntry> = vec![
            TableEntry {
                first_pmf: 0.0,
                second_pmf: 0.0,
                ratio: 1.0,
                second_elem: -1,
            };
            n
        ];
        while let Some((p_l, i_l)) = lightweights.pop() {
            if let Some(&(p_h, i_h)) = heavyweights.last() {
                entries[i_l] = TableEntry {
                    first_pmf: relative_weights[i_l] * inv_sum,
                    second_pmf: relative_weights[i_h] * inv_sum,
                    ratio: p_l / avg,
                    second_elem: i_h as i32,
                };
                // the heavy column donated (avg - p_l); it may now be light
                let p_h: Float = p_h - (avg - p_l);
                heavyweights.pop();
                if p_h <= avg {
                    lightweights.push((p_h, i_h));
                } else {
                    heavyweights.push((p_h, i_h));
                }
            } else {
                entries[i_l] = TableEntry {
                    first_pmf: relative_weights[i_l] * inv_sum,
                    second_pmf: 0.0,
                    ratio: 1.0,
                    second_elem: -1,
                };
            }
        }
        // roundoff can leave a slightly-heavy column behind
        for &(_, i_h) in &heavyweights {
            entries[i_h] = TableEntry {
                first_pmf: relative_weights[i_h] * inv_sum,
                second_pmf: 0.0,
                ratio: 1.0,
                second_elem: -1,
            };
        }

        AliasTable { entries, n }
    }

    /// Draw an index in `[0, n)` together with its exact pmf.
    pub fn sample(&self, rng: &mut Rng) -> (usize, Float) {
        let d: Float = rng.uniform_float() * self.n as Float;
        let i: usize = (d as usize).min(self.n - 1);
        let entry: &TableEntry = &self.entries[i];
        if d - i as Float <= entry.ratio {
            (i, entry.first_pmf)
        } else {
            (entry.second_elem as usize, entry.second_pmf)
        }
    }

    pub fn len(&self) -> usize {
        self.n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::vec3_dot;

    #[test]
    fn test_cosine_sample_is_unit() {
        let mut rng: Rng = Rng::new();
        rng.seed(3, 3);
        for _ in 0..1000 {
            let u: Point2f = uniform_sample_2d(&mut rng);
            let w: Vector3f = cosine_sample_hemisphere(&u);
            assert!((vec3_dot(&w, &w) - 1.0).abs() < 1e-9);
            assert!(w.z >= 0.0);
        }
    }

    // pmf [0.1, 0.2, 0.7]: empirical frequencies of 100k draws must land
    // within +-0.01 of the inputs
    #[test]
    fn test_alias_table_frequencies() {
        let pmf: Vec<Float> = vec![0.1, 0.2, 0.7];
        let table: AliasTable = AliasTable::new(pmf.clone());
        let mut rng: Rng = Rng::new();
        rng.seed(11, 5);
        let n_draws: usize = 100_000;
        let mut counts: [usize; 3] = [0; 3];
        for _ in 0..n_draws {
            let (i, p) = table.sample(&mut rng);
            counts[i] += 1;
            assert!((p - pmf[i]).abs() < 1e-12);
        }
        for i in 0..3 {
            let freq: Float = counts[i] as Float / n_draws as Float;
            assert!(
                (freq - pmf[i]).abs() < 0.01,
                "index {}: {} vs {}",
                i,
                freq,
                pmf[i]
            );
        }
    }

    #[test]
    fn test_alias_table_unnormalized_input() {
        // weights scale out; pmf is the normalized ratio
        let table: AliasTable = AliasTable::new(vec![2.0, 6.0]);
        let mut rng: Rng = Rng::new();
        rng.seed(1, 9);
        let mut seen: [bool; 2] = [false; 2];
        for _ in 0..1000 {
            let (i, p) = table.sample(&mut rng);
            seen[i] = true;
            let expected: Float = if i == 0 { 0.25 } else { 0.75 };
            assert!((p - expected).abs() < 1e-12);
        }
        assert!(seen[0] && seen[1]);
    }

    #[test]
    fn test_alias_table_uniform() {
        let table: AliasTable = AliasTable::new(vec![1.0; 64]);
        let mut rng: Rng = Rng::new();
        rng.seed(4, 4);
        for _ in 0..1000 {
            let (i, p) = table.sample(&mut rng);
            assert!(i < 64);
            assert!((p - 1.0 / 64.0).abs() < 1e-12);
        }
    }
}
