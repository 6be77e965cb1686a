use ndarray::{Array1, ArrayView1, Zip};

use crate::error::{FsshError, Result};

/// Result of an attempted momentum rescale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RescaleOutcome {
    /// The velocity was shifted by `scale * direction / mass`
    Accepted { scale: f64 },
    /// Not enough kinetic energy along the direction, nothing was changed
    Forbidden,
}

impl RescaleOutcome {
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, RescaleOutcome::Accepted { .. })
    }
}

/// `\sum_m 1/2 M_m v_m^2`
#[must_use]
pub fn kinetic_energy(mass: &ArrayView1<f64>, velocity: &ArrayView1<f64>) -> f64 {
    0.5 * Zip::from(mass)
        .and(velocity)
        .fold(0.0, |acc, &m, &v| acc + m * v * v)
}

#[inline]
fn inverse_mass_norm(mass: &ArrayView1<f64>, direction: &ArrayView1<f64>) -> f64 {
    Zip::from(mass)
        .and(direction)
        .fold(0.0, |acc, &m, &d| acc + d * d / m)
}

/// The largest amount of kinetic energy that can be removed by shifting
/// the velocity along `direction / mass`.
///
/// ```latex
/// \frac{(v \cdot d)^2}{2 \sum_m d_m^2 / M_m}
/// ```
#[must_use]
pub fn available_kinetic_energy(
    mass: &ArrayView1<f64>,
    velocity: &ArrayView1<f64>,
    direction: &ArrayView1<f64>,
) -> f64 {
    let projection = velocity.dot(direction);
    projection * projection / (2.0 * inverse_mass_norm(mass, direction))
}

/// Shift `velocity` along `direction` so that the kinetic energy changes by `-delta_v`.
///
/// Solves `a s^2 + b s + c = 0` with `a = \sum d^2/M`, `b = 2 v.d`, `c = 2 delta_v`
/// for a normalized direction `d`, taking the root of smallest magnitude.
/// A hop uphill by more than [`available_kinetic_energy`] is forbidden and leaves
/// `velocity` untouched.
///
/// # Errors
/// Returns an error if the quadratic has no real root despite enough energy being available.
pub fn rescale_velocity(
    velocity: &mut Array1<f64>,
    mass: &ArrayView1<f64>,
    direction: &ArrayView1<f64>,
    delta_v: f64,
) -> Result<RescaleOutcome> {
    let norm = direction.dot(direction).sqrt();
    if !(norm.is_finite() && norm > 0.0) {
        return Ok(RescaleOutcome::Forbidden);
    }
    let direction = direction / norm;

    let available = available_kinetic_energy(mass, &velocity.view(), &direction.view());
    if delta_v > available {
        return Ok(RescaleOutcome::Forbidden);
    }

    let a = inverse_mass_norm(mass, &direction.view());
    let b = 2.0 * velocity.dot(&direction);
    // b^2 - 4ac, written so that it is non-negative whenever the check above passed
    let discriminant = 8.0 * a * (available - delta_v);
    if !(discriminant >= 0.0) {
        return Err(FsshError::NoRealRescaleRoot { discriminant });
    }
    let sqrt_discriminant = discriminant.sqrt();
    let roots = [
        (-b + sqrt_discriminant) / (2.0 * a),
        (-b - sqrt_discriminant) / (2.0 * a),
    ];
    let scale = if roots[0].abs() <= roots[1].abs() {
        roots[0]
    } else {
        roots[1]
    };

    Zip::from(velocity)
        .and(mass)
        .and(&direction)
        .for_each(|v, &m, &d| *v += scale * d / m);

    Ok(RescaleOutcome::Accepted { scale })
}

#[cfg(test)]
mod tests {
    use ndarray::{array, Array1};
    use proptest::prelude::*;

    use super::{available_kinetic_energy, kinetic_energy, rescale_velocity, RescaleOutcome};

    #[test]
    fn test_forbidden_hop_leaves_velocity() {
        let mass = array![2000.0];
        let mut velocity = array![0.001];
        // 1/2 M v^2 = 0.001
        let outcome =
            rescale_velocity(&mut velocity, &mass.view(), &array![1.0].view(), 0.002).unwrap();
        assert_eq!(outcome, RescaleOutcome::Forbidden);
        assert_eq!(velocity, array![0.001]);
    }

    #[test]
    fn test_one_dimensional_uphill_hop() {
        let mass = array![2000.0];
        let mut velocity = array![0.01];
        let before = kinetic_energy(&mass.view(), &velocity.view());
        let outcome =
            rescale_velocity(&mut velocity, &mass.view(), &array![-3.0].view(), 0.04).unwrap();
        assert!(outcome.is_accepted());
        let after = kinetic_energy(&mass.view(), &velocity.view());
        assert!((before - after - 0.04).abs() < 1e-12);
        // The smallest perturbation keeps the direction of travel
        assert!(velocity[0] > 0.0);
    }

    #[test]
    fn test_zero_energy_change_is_identity() {
        let mass = array![1.0, 3.0];
        let mut velocity = array![0.2, -0.4];
        let outcome =
            rescale_velocity(&mut velocity, &mass.view(), &array![1.0, 1.0].view(), 0.0).unwrap();
        let RescaleOutcome::Accepted { scale } = outcome else {
            panic!("a hop with no energy change is always allowed");
        };
        assert!(scale.abs() < 1e-12);
        assert!((&velocity - &array![0.2, -0.4]).iter().all(|dv| dv.abs() < 1e-12));
    }

    #[test]
    fn test_zero_direction_is_forbidden() {
        let mass = array![1.0, 1.0];
        let mut velocity = array![0.2, -0.4];
        let outcome =
            rescale_velocity(&mut velocity, &mass.view(), &Array1::zeros(2).view(), -0.1)
                .unwrap();
        assert_eq!(outcome, RescaleOutcome::Forbidden);
    }

    #[test]
    fn test_available_energy_matches_single_mass() {
        // With one mass this is the kinetic energy of the velocity component along d
        let mass = array![4.0, 4.0];
        let velocity = array![1.0, 2.0];
        let direction = array![0.0, 5.0];
        let available = available_kinetic_energy(&mass.view(), &velocity.view(), &direction.view());
        assert!((available - 0.5 * 4.0 * 4.0).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn test_accepted_hops_conserve_energy(
            mass in prop::array::uniform3(1.0..5000.0f64),
            velocity in prop::array::uniform3(-0.1..0.1f64),
            direction in prop::array::uniform3(-1.0..1.0f64),
            delta_v in -0.05..0.05f64,
        ) {
            let mass = Array1::from(mass.to_vec());
            let direction = Array1::from(direction.to_vec());
            prop_assume!(direction.dot(&direction) > 1e-6);
            let mut velocity = Array1::from(velocity.to_vec());
            let before = kinetic_energy(&mass.view(), &velocity.view());
            let unchanged = velocity.clone();

            let outcome = rescale_velocity(&mut velocity, &mass.view(), &direction.view(), delta_v).unwrap();
            let after = kinetic_energy(&mass.view(), &velocity.view());
            match outcome {
                RescaleOutcome::Accepted { .. } => {
                    prop_assert!((before - delta_v - after).abs() < 1e-9 * (1.0 + before));
                }
                RescaleOutcome::Forbidden => {
                    prop_assert!(delta_v > 0.0);
                    prop_assert_eq!(velocity, unchanged);
                }
            }
        }
    }
}
