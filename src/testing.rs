//! Workset fixtures for tests and benchmarks.
//!
//! A small uniform mesh of bilinear quadrilaterals with a 2×2 Gauss rule,
//! with all host-side arrays (basis values, weighted gradients, metric
//! tensors) precomputed the way a host discretization would hand them over.

use crate::workset::{HostBatch, WorksetDims};
use nalgebra::{Matrix2, Vector2};

/// Gauss point coordinate for the 2-point rule on [-1, 1].
const GAUSS: f64 = 0.577_350_269_189_625_8;

/// Corner signs of the bilinear quad in reference space.
const CORNERS: [[f64; 2]; 4] = [[-1.0, -1.0], [1.0, -1.0], [1.0, 1.0], [-1.0, 1.0]];

fn shape(node: usize, xi: f64, eta: f64) -> f64 {
    let [sx, sy] = CORNERS[node];
    0.25 * (1.0 + sx * xi) * (1.0 + sy * eta)
}

fn shape_gradient(node: usize, xi: f64, eta: f64) -> Vector2<f64> {
    let [sx, sy] = CORNERS[node];
    Vector2::new(0.25 * sx * (1.0 + sy * eta), 0.25 * sy * (1.0 + sx * xi))
}

/// An `nx × ny` uniform quad mesh on the unit square with every host array
/// a [`HostBatch`] needs.
#[derive(Clone, Debug)]
pub struct QuadFixture {
    pub dims: WorksetDims,
    pub num_global_nodes: usize,
    pub connectivity: Vec<usize>,
    /// Global node coordinates, node-major.
    pub node_coordinates: Vec<f64>,
    /// Per-workset coordinates (cell × node × dim).
    pub coordinates: Vec<f64>,
    pub solution: Vec<f64>,
    pub solution_rate: Option<Vec<f64>>,
    pub basis_values: Vec<f64>,
    pub weighted_basis_values: Vec<f64>,
    pub basis_gradients: Vec<f64>,
    pub weighted_basis_gradients: Vec<f64>,
    pub contravariant_metric: Vec<f64>,
    pub jacobian_determinant: Vec<f64>,
    pub delta_time: f64,
}

impl QuadFixture {
    pub fn unit_square(solution_dim: usize) -> Self {
        Self::uniform(1, 1, solution_dim)
    }

    pub fn uniform(nx: usize, ny: usize, solution_dim: usize) -> Self {
        let cells = nx * ny;
        let num_global_nodes = (nx + 1) * (ny + 1);
        let dims = WorksetDims {
            cells,
            nodes_per_cell: 4,
            quad_points: 4,
            dims: 2,
            solution_dim,
        };

        let mut node_coordinates = Vec::with_capacity(num_global_nodes * 2);
        for j in 0..=ny {
            for i in 0..=nx {
                node_coordinates.push(i as f64 / nx as f64);
                node_coordinates.push(j as f64 / ny as f64);
            }
        }

        let mut connectivity = Vec::with_capacity(cells * 4);
        for cj in 0..ny {
            for ci in 0..nx {
                let n0 = cj * (nx + 1) + ci;
                connectivity.extend_from_slice(&[n0, n0 + 1, n0 + nx + 2, n0 + nx + 1]);
            }
        }

        let mut fixture = Self {
            dims,
            num_global_nodes,
            connectivity,
            node_coordinates,
            coordinates: Vec::new(),
            solution: vec![0.0; num_global_nodes * solution_dim],
            solution_rate: None,
            basis_values: Vec::new(),
            weighted_basis_values: Vec::new(),
            basis_gradients: Vec::new(),
            weighted_basis_gradients: Vec::new(),
            contravariant_metric: Vec::new(),
            jacobian_determinant: Vec::new(),
            delta_time: 1.0,
        };
        fixture.precompute_geometry();
        fixture
    }

    /// Sets the solution from a function of the global node coordinates.
    pub fn set_solution_from(&mut self, f: impl Fn(f64, f64) -> Vec<f64>) {
        let ncomp = self.dims.solution_dim;
        for node in 0..self.num_global_nodes {
            let x = self.node_coordinates[2 * node];
            let y = self.node_coordinates[2 * node + 1];
            let values = f(x, y);
            assert_eq!(values.len(), ncomp);
            self.solution[node * ncomp..(node + 1) * ncomp].copy_from_slice(&values);
        }
    }

    /// Sets the solution rate from a function of the global node coordinates.
    pub fn set_rate_from(&mut self, f: impl Fn(f64, f64) -> Vec<f64>) {
        let ncomp = self.dims.solution_dim;
        let mut rate = vec![0.0; self.num_global_nodes * ncomp];
        for node in 0..self.num_global_nodes {
            let x = self.node_coordinates[2 * node];
            let y = self.node_coordinates[2 * node + 1];
            let values = f(x, y);
            assert_eq!(values.len(), ncomp);
            rate[node * ncomp..(node + 1) * ncomp].copy_from_slice(&values);
        }
        self.solution_rate = Some(rate);
    }

    pub fn host(&self) -> HostBatch<'_> {
        HostBatch {
            dims: self.dims,
            connectivity: &self.connectivity,
            num_global_nodes: self.num_global_nodes,
            solution: &self.solution,
            solution_rate: self.solution_rate.as_deref(),
            coordinates: &self.coordinates,
            basis_values: &self.basis_values,
            weighted_basis_values: &self.weighted_basis_values,
            basis_gradients: &self.basis_gradients,
            weighted_basis_gradients: &self.weighted_basis_gradients,
            contravariant_metric: Some(&self.contravariant_metric),
            jacobian_determinant: Some(&self.jacobian_determinant),
            delta_time: self.delta_time,
        }
    }

    fn precompute_geometry(&mut self) {
        let dims = self.dims;
        let qp_coords: [[f64; 2]; 4] = [
            [-GAUSS, -GAUSS],
            [GAUSS, -GAUSS],
            [GAUSS, GAUSS],
            [-GAUSS, GAUSS],
        ];

        for c in 0..dims.cells {
            let mut corners = [Vector2::zeros(); 4];
            for n in 0..4 {
                let node = self.connectivity[c * 4 + n];
                corners[n] = Vector2::new(
                    self.node_coordinates[2 * node],
                    self.node_coordinates[2 * node + 1],
                );
                self.coordinates.push(corners[n].x);
                self.coordinates.push(corners[n].y);
            }

            // Per-(node, qp) arrays, node-major to match the field layouts.
            let mut cell_bf = [[0.0; 4]; 4];
            let mut cell_wbf = [[0.0; 4]; 4];
            let mut cell_grad = [[Vector2::zeros(); 4]; 4];
            let mut cell_wgrad = [[Vector2::zeros(); 4]; 4];
            let mut cell_metric = [Matrix2::zeros(); 4];
            let mut cell_det = [0.0; 4];

            for (q, &[xi, eta]) in qp_coords.iter().enumerate() {
                let mut jac = Matrix2::<f64>::zeros();
                for n in 0..4 {
                    let g = shape_gradient(n, xi, eta);
                    for a in 0..2 {
                        for b in 0..2 {
                            jac[(a, b)] += corners[n][a] * g[b];
                        }
                    }
                }
                let det = jac.determinant();
                let jac_inv = jac.try_inverse().expect("Fixture cells are not degenerate");
                let jac_inv_t = jac_inv.transpose();
                // Gauss weights are all one for the 2x2 rule.
                let weight = det.abs();

                for n in 0..4 {
                    let value = shape(n, xi, eta);
                    let grad = jac_inv_t * shape_gradient(n, xi, eta);
                    cell_bf[n][q] = value;
                    cell_wbf[n][q] = value * weight;
                    cell_grad[n][q] = grad;
                    cell_wgrad[n][q] = grad * weight;
                }
                cell_metric[q] = jac_inv_t * jac_inv;
                cell_det[q] = det;
            }

            for n in 0..4 {
                for q in 0..4 {
                    self.basis_values.push(cell_bf[n][q]);
                    self.weighted_basis_values.push(cell_wbf[n][q]);
                }
            }
            for n in 0..4 {
                for q in 0..4 {
                    self.basis_gradients.push(cell_grad[n][q].x);
                    self.basis_gradients.push(cell_grad[n][q].y);
                    self.weighted_basis_gradients.push(cell_wgrad[n][q].x);
                    self.weighted_basis_gradients.push(cell_wgrad[n][q].y);
                }
            }
            for q in 0..4 {
                for i in 0..2 {
                    for j in 0..2 {
                        self.contravariant_metric.push(cell_metric[q][(i, j)]);
                    }
                }
                self.jacobian_determinant.push(cell_det[q]);
            }
        }
    }
}
