//! Rectangular plate topology.
//!
//! A plate is a `rows x cols` grid of cultures indexed row-major:
//! culture `i` sits at `(i / cols, i % cols)`. Neighbours are the 4-connected
//! lattice neighbours (up/left/right/down) with no wraparound and no
//! diagonals, so the neighbour relation is symmetric by construction.
//!
//! Two equivalent representations are precomputed once per plate shape:
//!
//! - per-culture neighbour index lists (cheap to walk in the ODE hot path)
//! - a dense adjacency matrix (vectorized consumers, cross-checked in tests)
//!
//! The topology is immutable after construction and safe to share across
//! parallel per-culture fits.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::PlateError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridTopology {
    rows: usize,
    cols: usize,
    neighbours: Vec<Vec<usize>>,
}

impl GridTopology {
    /// Build the topology for a `rows x cols` plate.
    ///
    /// Rejects empty plates; any positive shape (including 1x1 and 1xN) is
    /// valid.
    pub fn build(rows: usize, cols: usize) -> Result<Self, PlateError> {
        if rows < 1 || cols < 1 {
            return Err(PlateError::invalid(format!(
                "Plate shape must be at least 1x1, got {rows}x{cols}."
            )));
        }

        let n = rows * cols;
        let mut neighbours = Vec::with_capacity(n);
        for i in 0..n {
            let (r, c) = (i / cols, i % cols);
            let mut nbrs = Vec::with_capacity(4);
            if r > 0 {
                nbrs.push(i - cols);
            }
            if c > 0 {
                nbrs.push(i - 1);
            }
            if c + 1 < cols {
                nbrs.push(i + 1);
            }
            if r + 1 < rows {
                nbrs.push(i + cols);
            }
            neighbours.push(nbrs);
        }

        Ok(Self {
            rows,
            cols,
            neighbours,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Total number of cultures on the plate.
    pub fn no_cultures(&self) -> usize {
        self.rows * self.cols
    }

    /// Neighbour indices of culture `i` (2-4 entries on plates with both
    /// dimensions >= 2; fewer on degenerate 1xN shapes; empty on 1x1).
    pub fn neighbours(&self, i: usize) -> &[usize] {
        &self.neighbours[i]
    }

    /// Whether culture `i` touches the plate boundary (fewer than 4
    /// neighbours). On 1xN plates every culture is an edge culture.
    pub fn is_edge(&self, i: usize) -> bool {
        self.neighbours[i].len() < 4
    }

    /// Indices of internal (non-edge) cultures.
    pub fn internal_indices(&self) -> Vec<usize> {
        (0..self.no_cultures()).filter(|&i| !self.is_edge(i)).collect()
    }

    /// Indices of edge cultures.
    pub fn edge_indices(&self) -> Vec<usize> {
        (0..self.no_cultures()).filter(|&i| self.is_edge(i)).collect()
    }

    /// Dense boolean adjacency as a 0/1 matrix (`no_cultures` square).
    ///
    /// Equivalent to the neighbour lists; the two representations are
    /// cross-checked in tests. Kept dense so vectorized consumers can form
    /// diffusion sums as `(D - A) * n`.
    pub fn adjacency_matrix(&self) -> DMatrix<f64> {
        let n = self.no_cultures();
        let mut a = DMatrix::zeros(n, n);
        for (i, nbrs) in self.neighbours.iter().enumerate() {
            for &j in nbrs {
                a[(i, j)] = 1.0;
            }
        }
        a
    }

    /// Net outward diffusion flux per culture:
    /// `out[i] = sum_{j in neighbours(i)} (values[i] - values[j])`.
    ///
    /// # Panics
    /// Panics if `values` or `out` length differs from `no_cultures()`.
    pub fn net_flux(&self, values: &[f64], out: &mut [f64]) {
        assert_eq!(values.len(), self.no_cultures());
        assert_eq!(out.len(), self.no_cultures());
        for (i, nbrs) in self.neighbours.iter().enumerate() {
            let mut flux = 0.0;
            for &j in nbrs {
                flux += values[i] - values[j];
            }
            out[i] = flux;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_shapes() {
        assert!(GridTopology::build(0, 3).is_err());
        assert!(GridTopology::build(3, 0).is_err());
    }

    #[test]
    fn neighbour_relation_is_symmetric() {
        for (rows, cols) in [(1, 1), (1, 5), (4, 1), (2, 2), (3, 4), (5, 5)] {
            let topo = GridTopology::build(rows, cols).unwrap();
            for i in 0..topo.no_cultures() {
                for &j in topo.neighbours(i) {
                    assert!(
                        topo.neighbours(j).contains(&i),
                        "{rows}x{cols}: {i} -> {j} but not {j} -> {i}"
                    );
                }
            }
        }
    }

    #[test]
    fn neighbour_counts_on_regular_plates() {
        let topo = GridTopology::build(3, 4).unwrap();
        let mut corners = 0;
        for i in 0..topo.no_cultures() {
            let n = topo.neighbours(i).len();
            assert!((2..=4).contains(&n), "culture {i} has {n} neighbours");
            if n == 2 {
                corners += 1;
            }
        }
        assert_eq!(corners, 4);
    }

    #[test]
    fn single_culture_has_no_neighbours() {
        let topo = GridTopology::build(1, 1).unwrap();
        assert!(topo.neighbours(0).is_empty());
        assert!(topo.is_edge(0));
    }

    #[test]
    fn row_plate_neighbour_counts() {
        let topo = GridTopology::build(1, 5).unwrap();
        assert_eq!(topo.neighbours(0).len(), 1);
        assert_eq!(topo.neighbours(2).len(), 2);
        assert_eq!(topo.neighbours(4).len(), 1);
        assert!(topo.internal_indices().is_empty());
    }

    #[test]
    fn edge_and_internal_partition() {
        let topo = GridTopology::build(3, 3).unwrap();
        assert_eq!(topo.internal_indices(), vec![4]);
        assert_eq!(topo.edge_indices().len(), 8);
    }

    #[test]
    fn adjacency_matrix_agrees_with_neighbour_lists() {
        let topo = GridTopology::build(3, 4).unwrap();
        let a = topo.adjacency_matrix();
        let n = topo.no_cultures();
        for i in 0..n {
            for j in 0..n {
                let listed = topo.neighbours(i).contains(&j);
                assert_eq!(a[(i, j)] == 1.0, listed, "disagreement at ({i},{j})");
            }
        }
        // Symmetric, zero diagonal.
        assert_eq!(a.transpose(), a);
        for i in 0..n {
            assert_eq!(a[(i, i)], 0.0);
        }
    }

    #[test]
    fn net_flux_matches_laplacian_product() {
        let topo = GridTopology::build(3, 3).unwrap();
        let n = topo.no_cultures();
        let values: Vec<f64> = (0..n).map(|i| (i as f64).sin() + 1.5).collect();

        let mut flux = vec![0.0; n];
        topo.net_flux(&values, &mut flux);

        let a = topo.adjacency_matrix();
        let v = nalgebra::DVector::from_column_slice(&values);
        let degree: Vec<f64> = (0..n).map(|i| topo.neighbours(i).len() as f64).collect();
        let av = &a * &v;
        for i in 0..n {
            let expected = degree[i] * values[i] - av[i];
            assert!((flux[i] - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn uniform_field_has_zero_flux() {
        let topo = GridTopology::build(4, 4).unwrap();
        let values = vec![0.7; topo.no_cultures()];
        let mut flux = vec![1.0; topo.no_cultures()];
        topo.net_flux(&values, &mut flux);
        assert!(flux.iter().all(|&f| f == 0.0));
    }
}
