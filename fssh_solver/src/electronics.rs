use ndarray::{s, Array1, Array2, Array3, ArrayView1};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// The electronic structure at a single classical position, in the adiabatic basis.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ElectronicStructure {
    /// Electronic hamiltonian, `[nstates, nstates]`
    pub hamiltonian: Array2<f64>,
    /// Force on each surface, `[nstates, ndim]`
    pub force: Array2<f64>,
    /// Derivative coupling `d_ij = <i|d/dR|j>`, `[nstates, nstates, ndim]`
    pub derivative_coupling: Array3<f64>,
    /// Eigenvectors of the underlying diabatic problem, if any.
    /// Used to keep phases continuous between neighbouring snapshots.
    pub basis: Option<Array2<f64>>,
}

impl ElectronicStructure {
    #[must_use]
    pub fn nstates(&self) -> usize {
        self.hamiltonian.nrows()
    }

    #[must_use]
    pub fn ndim(&self) -> usize {
        self.force.ncols()
    }

    /// Potential energy of the given surface.
    #[must_use]
    pub fn potential(&self, state: usize) -> f64 {
        self.hamiltonian[[state, state]]
    }

    /// Force acting on the given surface.
    #[must_use]
    pub fn force_on(&self, state: usize) -> ArrayView1<'_, f64> {
        self.force.row(state)
    }

    /// The velocity contracted coupling `D_ij = \sum_x d_ijx v_x`
    #[must_use]
    pub fn nac_matrix(&self, velocity: &ArrayView1<f64>) -> Array2<f64> {
        let n = self.nstates();
        Array2::from_shape_fn((n, n), |(i, j)| {
            self.derivative_coupling.slice(s![i, j, ..]).dot(velocity)
        })
    }

    /// Direction along which momentum is exchanged for a hop from `source` to `target`.
    #[must_use]
    pub fn rescale_direction(&self, source: usize, target: usize) -> Array1<f64> {
        self.derivative_coupling.slice(s![source, target, ..]).to_owned()
    }
}

/// A model supplying electronic structure as a function of classical position.
///
/// Models are shared read only between every trajectory of an ensemble.
pub trait ElectronicModel: Send + Sync {
    fn nstates(&self) -> usize;

    fn ndim(&self) -> usize;

    /// Mass of each classical degree of freedom
    fn mass(&self) -> ArrayView1<'_, f64>;

    /// Compute the electronic structure at `position`.
    ///
    /// # Errors
    /// Returns an error if the model cannot be evaluated, for example if a
    /// diagonalization fails.
    fn update(&self, position: &ArrayView1<f64>) -> Result<ElectronicStructure>;

    /// Compute the electronic structure at `position`, continuing from `previous`.
    ///
    /// Models with arbitrary eigenvector phases override this to keep the
    /// couplings smooth along a trajectory.
    ///
    /// # Errors
    /// See [`ElectronicModel::update`].
    #[inline]
    fn update_from(
        &self,
        position: &ArrayView1<f64>,
        _previous: &ElectronicStructure,
    ) -> Result<ElectronicStructure> {
        self.update(position)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{array, Array3};

    use super::ElectronicStructure;

    fn two_state() -> ElectronicStructure {
        let mut derivative_coupling = Array3::zeros((2, 2, 2));
        derivative_coupling[[0, 1, 0]] = 1.0;
        derivative_coupling[[0, 1, 1]] = 2.0;
        derivative_coupling[[1, 0, 0]] = -1.0;
        derivative_coupling[[1, 0, 1]] = -2.0;
        ElectronicStructure {
            hamiltonian: array![[-1.0, 0.0], [0.0, 1.0]],
            force: array![[0.5, 0.0], [-0.5, 0.0]],
            derivative_coupling,
            basis: None,
        }
    }

    #[test]
    fn test_nac_matrix_is_antisymmetric() {
        let electronics = two_state();
        let velocity = array![3.0, -1.0];
        let nac = electronics.nac_matrix(&velocity.view());

        assert_eq!(nac[[0, 1]], 1.0);
        assert_eq!(nac[[1, 0]], -1.0);
        assert_eq!(nac[[0, 0]], 0.0);
        assert_eq!(nac[[1, 1]], 0.0);
    }

    #[test]
    fn test_accessors() {
        let electronics = two_state();
        assert_eq!(electronics.nstates(), 2);
        assert_eq!(electronics.ndim(), 2);
        assert_eq!(electronics.potential(1), 1.0);
        assert_eq!(electronics.force_on(1), array![-0.5, 0.0]);
        assert_eq!(electronics.rescale_direction(1, 0), array![-1.0, -2.0]);
    }
}
