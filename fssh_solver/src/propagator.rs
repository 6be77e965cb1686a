use ndarray::{Array2, Zip};
use ndarray_linalg::{Eigh, UPLO};
use num_complex::Complex;

use crate::error::Result;

/// Build the effective hamiltonian `W = H - i D`.
///
/// `D` is the velocity contracted derivative coupling, which is real and
/// antisymmetric, so `-iD` (and therefore `W`) is hermitian.
#[must_use]
pub fn effective_hamiltonian(hamiltonian: &Array2<f64>, nac: &Array2<f64>) -> Array2<Complex<f64>> {
    Zip::from(hamiltonian)
        .and(nac)
        .map_collect(|&h, &d| Complex { re: h, im: -d })
}

#[inline]
fn conjugate_transpose(matrix: &Array2<Complex<f64>>) -> Array2<Complex<f64>> {
    matrix.t().mapv(|c| c.conj())
}

/// The unitary `U = exp(-iW dt)`, computed from the eigendecomposition of `W`.
///
/// # Errors
/// Returns an error if the diagonalization of `W` fails.
pub fn unitary_propagator(
    effective_hamiltonian: &Array2<Complex<f64>>,
    dt: f64,
) -> Result<Array2<Complex<f64>>> {
    let (energies, coeff) = effective_hamiltonian.eigh(UPLO::Lower)?;
    let phases = energies.mapv(|e| Complex { re: 0.0, im: -e * dt }.exp());
    // C diag(phases) C^\dagger
    let scaled = &coeff * &phases;
    Ok(scaled.dot(&conjugate_transpose(&coeff)))
}

/// Propagate `rho(t)` to `rho(t + dt)` as `U rho U^\dagger`.
///
/// The electronic energies and couplings are assumed constant throughout
/// the step, which only holds for fairly small time steps.
///
/// # Errors
/// Returns an error if the diagonalization of `W` fails.
pub fn propagate_density(
    rho: &Array2<Complex<f64>>,
    effective_hamiltonian: &Array2<Complex<f64>>,
    dt: f64,
) -> Result<Array2<Complex<f64>>> {
    let u = unitary_propagator(effective_hamiltonian, dt)?;
    Ok(u.dot(rho).dot(&conjugate_transpose(&u)))
}

#[cfg(test)]
mod tests {
    use ndarray::{array, Array2};
    use num_complex::{Complex, ComplexFloat};
    use proptest::prelude::*;

    use super::{effective_hamiltonian, propagate_density};

    fn trace(rho: &Array2<Complex<f64>>) -> Complex<f64> {
        rho.diag().sum()
    }

    fn max_hermitian_error(rho: &Array2<Complex<f64>>) -> f64 {
        let n = rho.nrows();
        let mut out = 0f64;
        for i in 0..n {
            for j in 0..n {
                out = out.max((rho[[i, j]] - rho[[j, i]].conj()).abs());
            }
        }
        out
    }

    fn ground_state(n: usize) -> Array2<Complex<f64>> {
        let mut rho = Array2::zeros((n, n));
        rho[[0, 0]] = Complex { re: 1.0, im: 0.0 };
        rho
    }

    #[test]
    fn test_uncoupled_propagation_is_a_phase() {
        let hamiltonian = array![[-0.5, 0.0], [0.0, 0.5]];
        let nac = Array2::zeros((2, 2));
        let w = effective_hamiltonian(&hamiltonian, &nac);

        let half = Complex { re: 0.5, im: 0.0 };
        let rho = Array2::from_elem((2, 2), half);
        let dt = 0.3;
        let out = propagate_density(&rho, &w, dt).unwrap();

        // rho_01 -> rho_01 exp(-i (E_0 - E_1) dt)
        let expected = half * Complex { re: 0.0, im: dt }.exp();
        assert!((out[[0, 1]] - expected).abs() < 1e-12);
        assert!((out[[0, 0]] - half).abs() < 1e-12);
        assert!((out[[1, 1]] - half).abs() < 1e-12);
    }

    #[test]
    fn test_coupling_transfers_population() {
        let hamiltonian = Array2::zeros((2, 2));
        let nac = array![[0.0, 1.0], [-1.0, 0.0]];
        let w = effective_hamiltonian(&hamiltonian, &nac);

        // A real rotation by angle dt
        let dt = 0.25;
        let out = propagate_density(&ground_state(2), &w, dt).unwrap();
        assert!((out[[0, 0]].re - dt.cos().powi(2)).abs() < 1e-12);
        assert!((out[[1, 1]].re - dt.sin().powi(2)).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn test_propagation_preserves_trace_and_hermiticity(
            e in prop::array::uniform3(-1.0..1.0f64),
            d in prop::array::uniform3(-2.0..2.0f64),
            dt in 0.0..5.0f64,
        ) {
            let hamiltonian = Array2::from_diag(&array![e[0], e[1], e[2]]);
            let nac = array![
                [0.0, d[0], d[1]],
                [-d[0], 0.0, d[2]],
                [-d[1], -d[2], 0.0],
            ];
            let w = effective_hamiltonian(&hamiltonian, &nac);
            let mut rho = ground_state(3);
            for _ in 0..10 {
                rho = propagate_density(&rho, &w, dt).unwrap();
            }
            let one = Complex { re: 1.0, im: 0.0 };
            prop_assert!((trace(&rho) - one).abs() < 1e-10);
            prop_assert!(max_hermitian_error(&rho) < 1e-10);
            for i in 0..3 {
                prop_assert!(rho[[i, i]].re > -1e-12);
            }
        }
    }
}
