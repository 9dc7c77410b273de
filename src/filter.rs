//! A tensor Walsh-Hadamard two-scale filter.
use crate::traits::TwoScaleFilter;

/// Applies the normalised Walsh-Hadamard matrix across the `2^D` children to every scaling
/// function independently. For order zero this is the Haar basis. The matrix is orthogonal and
/// symmetric, so compression and reconstruction are the same map and preserve the square norm.
#[derive(Debug, Clone)]
pub struct WalshFilter {
    kp1_d: usize,
    t_dim: usize,
    scale: f64,
}

impl WalshFilter {
    /// Create a filter for polynomial `order` in `dim` dimensions.
    pub fn new(order: usize, dim: usize) -> Self {
        let t_dim = 1 << dim;
        Self {
            kp1_d: (order + 1).pow(dim as u32),
            t_dim,
            scale: 1.0 / (t_dim as f64).sqrt(),
        }
    }

    fn apply(&self, input: &[f64], output: &mut [f64]) {
        let n = self.kp1_d;
        assert_eq!(input.len(), n * self.t_dim);
        assert_eq!(output.len(), n * self.t_dim);

        for (row, out) in output.chunks_exact_mut(n).enumerate() {
            out.fill(0.0);
            for (col, block) in input.chunks_exact(n).enumerate() {
                let sign = if (row & col).count_ones() % 2 == 0 {
                    self.scale
                } else {
                    -self.scale
                };
                for (o, i) in out.iter_mut().zip(block) {
                    *o += sign * i;
                }
            }
        }
    }
}

impl TwoScaleFilter for WalshFilter {
    fn kp1_d(&self) -> usize {
        self.kp1_d
    }

    fn t_dim(&self) -> usize {
        self.t_dim
    }

    fn compress(&self, children: &[f64], parent: &mut [f64]) {
        self.apply(children, parent);
    }

    fn reconstruct(&self, parent: &[f64], children: &mut [f64]) {
        self.apply(parent, children);
    }
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_haar_1d() {
        let filter = WalshFilter::new(0, 1);
        let mut parent = [0.0; 2];
        filter.compress(&[1.0, 3.0], &mut parent);

        let s = 1.0 / 2f64.sqrt();
        assert_relative_eq!(parent[0], 4.0 * s, epsilon = 1e-14);
        assert_relative_eq!(parent[1], -2.0 * s, epsilon = 1e-14);
    }

    #[test]
    fn test_reconstruct_inverts_compress() {
        let filter = WalshFilter::new(2, 3);
        let n = filter.kp1_d() * filter.t_dim();
        assert_eq!(n, 27 * 8);

        let children: Vec<f64> = (0..n).map(|i| (i as f64 * 0.37).sin()).collect();
        let mut parent = vec![0.0; n];
        let mut back = vec![0.0; n];
        filter.compress(&children, &mut parent);
        filter.reconstruct(&parent, &mut back);

        for (a, b) in children.iter().zip(&back) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }

        let norm_children: f64 = children.iter().map(|x| x * x).sum();
        let norm_parent: f64 = parent.iter().map(|x| x * x).sum();
        assert_relative_eq!(norm_children, norm_parent, epsilon = 1e-10);
    }
}
