use ndarray::{array, Array1, Array2, Array3, ArrayView1, Axis};
use ndarray_linalg::{Eigh, UPLO};

use crate::{
    electronics::{ElectronicModel, ElectronicStructure},
    error::Result,
};

/// A model defined by a real symmetric diabatic potential matrix.
pub trait DiabaticModel: Send + Sync {
    fn nstates(&self) -> usize;

    fn ndim(&self) -> usize;

    fn mass(&self) -> ArrayView1<'_, f64>;

    /// The diabatic potential `V(R)`, `[nstates, nstates]`
    fn potential(&self, position: &ArrayView1<f64>) -> Array2<f64>;

    /// The gradient `dV/dR`, `[ndim, nstates, nstates]`
    fn potential_gradient(&self, position: &ArrayView1<f64>) -> Array3<f64>;
}

/// Exposes a [`DiabaticModel`] in the adiabatic basis.
///
/// ```latex
/// F_i = -<i|\nabla V|i>
/// d_{ij} = <i|\nabla V|j> / (E_j - E_i)
/// ```
#[derive(Debug, Clone)]
pub struct AdiabaticModel<D>(pub D);

impl<D: DiabaticModel> AdiabaticModel<D> {
    fn compute(
        &self,
        position: &ArrayView1<f64>,
        reference: Option<&Array2<f64>>,
    ) -> Result<ElectronicStructure> {
        let (energies, mut coeff) = self.0.potential(position).eigh(UPLO::Lower)?;

        // Eigenvectors are only defined up to a sign, pick the one closest to the last step
        if let Some(reference) = reference {
            for (mut column, previous) in coeff.columns_mut().into_iter().zip(reference.columns()) {
                if column.dot(&previous) < 0.0 {
                    column.mapv_inplace(|c| -c);
                }
            }
        }

        let nstates = self.0.nstates();
        let ndim = self.0.ndim();
        let mut force = Array2::zeros((nstates, ndim));
        let mut derivative_coupling = Array3::zeros((nstates, nstates, ndim));
        for (x, gradient) in self.0.potential_gradient(position).axis_iter(Axis(0)).enumerate() {
            let rotated = coeff.t().dot(&gradient).dot(&coeff);
            for i in 0..nstates {
                force[[i, x]] = -rotated[[i, i]];
                for j in 0..nstates {
                    if i != j {
                        derivative_coupling[[i, j, x]] =
                            rotated[[i, j]] / (energies[j] - energies[i]);
                    }
                }
            }
        }

        Ok(ElectronicStructure {
            hamiltonian: Array2::from_diag(&energies),
            force,
            derivative_coupling,
            basis: Some(coeff),
        })
    }
}

impl<D: DiabaticModel> ElectronicModel for AdiabaticModel<D> {
    fn nstates(&self) -> usize {
        self.0.nstates()
    }

    fn ndim(&self) -> usize {
        self.0.ndim()
    }

    fn mass(&self) -> ArrayView1<'_, f64> {
        self.0.mass()
    }

    fn update(&self, position: &ArrayView1<f64>) -> Result<ElectronicStructure> {
        self.compute(position, None)
    }

    fn update_from(
        &self,
        position: &ArrayView1<f64>,
        previous: &ElectronicStructure,
    ) -> Result<ElectronicStructure> {
        self.compute(position, previous.basis.as_ref())
    }
}

/// Tully's simple avoided crossing (model I), <https://doi.org/10.1063/1.459170>
///
/// ```latex
/// V_{11} = sgn(x) A (1 - e^{-B|x|}), V_{22} = -V_{11}, V_{12} = C e^{-Dx^2}
/// ```
#[derive(Debug, Clone)]
pub struct TullySimpleAvoidedCrossing {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub mass: Array1<f64>,
}

impl Default for TullySimpleAvoidedCrossing {
    fn default() -> Self {
        Self {
            a: 0.01,
            b: 1.6,
            c: 0.005,
            d: 1.0,
            mass: array![2000.0],
        }
    }
}

impl DiabaticModel for TullySimpleAvoidedCrossing {
    fn nstates(&self) -> usize {
        2
    }

    fn ndim(&self) -> usize {
        1
    }

    fn mass(&self) -> ArrayView1<'_, f64> {
        self.mass.view()
    }

    fn potential(&self, position: &ArrayView1<f64>) -> Array2<f64> {
        let x = position[0];
        let v11 = x.signum() * self.a * (1.0 - (-self.b * x.abs()).exp());
        let v12 = self.c * (-self.d * x * x).exp();
        array![[v11, v12], [v12, -v11]]
    }

    fn potential_gradient(&self, position: &ArrayView1<f64>) -> Array3<f64> {
        let x = position[0];
        let dv11 = self.a * self.b * (-self.b * x.abs()).exp();
        let dv12 = -2.0 * self.c * self.d * x * (-self.d * x * x).exp();
        array![[[dv11, dv12], [dv12, -dv11]]]
    }
}

/// Tully's dual avoided crossing (model II), <https://doi.org/10.1063/1.459170>
///
/// ```latex
/// V_{11} = 0, V_{22} = -A e^{-Bx^2} + E_0, V_{12} = C e^{-Dx^2}
/// ```
#[derive(Debug, Clone)]
pub struct TullyDualAvoidedCrossing {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e0: f64,
    pub mass: Array1<f64>,
}

impl Default for TullyDualAvoidedCrossing {
    fn default() -> Self {
        Self {
            a: 0.1,
            b: 0.28,
            c: 0.015,
            d: 0.06,
            e0: 0.05,
            mass: array![2000.0],
        }
    }
}

impl DiabaticModel for TullyDualAvoidedCrossing {
    fn nstates(&self) -> usize {
        2
    }

    fn ndim(&self) -> usize {
        1
    }

    fn mass(&self) -> ArrayView1<'_, f64> {
        self.mass.view()
    }

    fn potential(&self, position: &ArrayView1<f64>) -> Array2<f64> {
        let x = position[0];
        let v22 = -self.a * (-self.b * x * x).exp() + self.e0;
        let v12 = self.c * (-self.d * x * x).exp();
        array![[0.0, v12], [v12, v22]]
    }

    fn potential_gradient(&self, position: &ArrayView1<f64>) -> Array3<f64> {
        let x = position[0];
        let dv22 = 2.0 * self.a * self.b * x * (-self.b * x * x).exp();
        let dv12 = -2.0 * self.c * self.d * x * (-self.d * x * x).exp();
        array![[[0.0, dv12], [dv12, dv22]]]
    }
}
