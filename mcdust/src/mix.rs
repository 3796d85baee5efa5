//! Optical properties of a dust population at the simulation's wavelengths.

use crate::error::{Error, Result};
use crate::random::RandomSource;
use crate::vec3::Vec3;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// Scattering phase function of a dust population.
///
/// Values are probability densities normalized to a mean of one over the unit
/// sphere, so an isotropic phase function is identically one.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum PhaseFunction {
    /// Direction-independent scattering.
    Isotropic,
    /// The Henyey-Greenstein phase function with asymmetry parameter `g`,
    /// forward-throwing for positive `g`.
    HenyeyGreenstein {
        /// Asymmetry parameter, the mean scattering cosine; `|g| < 1`.
        g: f64,
    },
}

impl Default for PhaseFunction {
    fn default() -> Self {
        Self::Isotropic
    }
}

// below this the Henyey-Greenstein expressions degenerate into the isotropic
// ones
const MIN_ASYMMETRY: f64 = 1e-6;

impl PhaseFunction {
    /// Returns the phase function value for scattering cosine `cos_theta`.
    #[must_use]
    pub fn value(&self, cos_theta: f64) -> f64 {
        match *self {
            Self::Isotropic => 1.0,
            Self::HenyeyGreenstein { g } => {
                if g.abs() < MIN_ASYMMETRY {
                    1.0
                } else {
                    let t = (2.0 * g).mul_add(-cos_theta, g.mul_add(g, 1.0));
                    g.mul_add(-g, 1.0) / (t * t.sqrt())
                }
            }
        }
    }

    /// Draws a scattering cosine from this phase function.
    pub fn sample_cos_theta(&self, random: &mut RandomSource) -> f64 {
        match *self {
            Self::Isotropic => random.uniform().mul_add(2.0, -1.0),
            Self::HenyeyGreenstein { g } => {
                if g.abs() < MIN_ASYMMETRY {
                    random.uniform().mul_add(2.0, -1.0)
                } else {
                    let f = g.mul_add(-g, 1.0) / (2.0 * g).mul_add(random.uniform(), 1.0 - g);
                    ((g.mul_add(g, 1.0) - f * f) / (2.0 * g)).clamp(-1.0, 1.0)
                }
            }
        }
    }
}

/// Per-wavelength optical properties of one dust component.
#[derive(Clone, Debug)]
pub struct DustMix {
    kappa_ext: Vec<f64>,
    kappa_sca: Vec<f64>,
    phase: PhaseFunction,
}

impl DustMix {
    /// Creates a mix from per-wavelength extinction and scattering
    /// coefficients.
    ///
    /// # Errors
    ///
    /// Returns an error when the tables are empty, have different lengths, or
    /// violate `0 <= kappa_sca <= kappa_ext`.
    pub fn new(kappa_ext: Vec<f64>, kappa_sca: Vec<f64>, phase: PhaseFunction) -> Result<Self> {
        if kappa_ext.is_empty() || kappa_ext.len() != kappa_sca.len() {
            return Err(Error::InvalidConfiguration(
                "a dust mix needs equally sized, non-empty extinction and scattering tables"
                    .to_owned(),
            ));
        }
        if kappa_ext
            .iter()
            .zip(&kappa_sca)
            .any(|(&ext, &sca)| !(0.0..=ext).contains(&sca))
        {
            return Err(Error::InvalidConfiguration(
                "a dust mix requires 0 <= kappa_sca <= kappa_ext at every wavelength".to_owned(),
            ));
        }
        Ok(Self {
            kappa_ext,
            kappa_sca,
            phase,
        })
    }

    /// Creates a wavelength-independent mix with `nlambda` identical entries.
    ///
    /// # Errors
    ///
    /// Propagates the validation of [`Self::new`].
    pub fn uniform(
        nlambda: usize,
        kappa_ext: f64,
        kappa_sca: f64,
        phase: PhaseFunction,
    ) -> Result<Self> {
        Self::new(
            vec![kappa_ext; nlambda],
            vec![kappa_sca; nlambda],
            phase,
        )
    }

    /// Returns the number of wavelengths in the tables.
    #[must_use]
    pub fn nlambda(&self) -> usize {
        self.kappa_ext.len()
    }

    /// Returns the extinction coefficient at wavelength index `ell`.
    #[must_use]
    pub fn kappa_ext(&self, ell: usize) -> f64 {
        self.kappa_ext[ell]
    }

    /// Returns the scattering coefficient at wavelength index `ell`.
    #[must_use]
    pub fn kappa_sca(&self, ell: usize) -> f64 {
        self.kappa_sca[ell]
    }

    /// Returns the scattering albedo at wavelength index `ell`; zero for a
    /// transparent bin.
    #[must_use]
    pub fn albedo(&self, ell: usize) -> f64 {
        let ext = self.kappa_ext[ell];
        if ext > 0.0 {
            self.kappa_sca[ell] / ext
        } else {
            0.0
        }
    }

    /// Returns the phase function value for scattering from `k_in` into
    /// `k_out`.
    #[must_use]
    pub fn phase_function(&self, k_in: Vec3, k_out: Vec3) -> f64 {
        self.phase.value(k_in.dot(k_out))
    }

    /// Draws a new propagation direction for a package scattered off this
    /// mix.
    pub fn generate_new_direction(&self, k_in: Vec3, random: &mut RandomSource) -> Vec3 {
        let cos_theta = self.phase.sample_cos_theta(random);
        let sin_theta = cos_theta.mul_add(-cos_theta, 1.0).max(0.0).sqrt();
        let (sin_phi, cos_phi) = (TAU * random.uniform()).sin_cos();
        let (e1, e2) = k_in.orthonormal_basis();
        (k_in * cos_theta + e1 * (sin_theta * cos_phi) + e2 * (sin_theta * sin_phi)).normalized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    // analytic CDF of the Henyey-Greenstein scattering cosine
    fn hg_cdf(g: f64, cos_theta: f64) -> f64 {
        let t = (2.0 * g).mul_add(-cos_theta, g.mul_add(g, 1.0)).sqrt();
        (1.0 - g * g) / (2.0 * g) * (1.0 / t - 1.0 / (1.0 + g))
    }

    #[test]
    fn rejects_inconsistent_tables() {
        assert!(DustMix::new(vec![], vec![], PhaseFunction::Isotropic).is_err());
        assert!(DustMix::new(vec![1.0], vec![0.5, 0.5], PhaseFunction::Isotropic).is_err());
        assert!(DustMix::new(vec![1.0], vec![1.5], PhaseFunction::Isotropic).is_err());
        assert!(DustMix::new(vec![1.0], vec![-0.1], PhaseFunction::Isotropic).is_err());
    }

    #[test]
    fn albedo_handles_transparent_bins() {
        let mix = DustMix::new(vec![2.0, 0.0], vec![0.5, 0.0], PhaseFunction::Isotropic).unwrap();
        assert_approx_eq!(f64, mix.albedo(0), 0.25, ulps = 2);
        assert_eq!(mix.albedo(1), 0.0);
    }

    #[test]
    fn phase_function_normalization() {
        // the sphere average of the phase function value must be one
        let mix = DustMix::uniform(1, 1.0, 1.0, PhaseFunction::HenyeyGreenstein { g: 0.4 })
            .unwrap();
        let k_in = Vec3::new(0.0, 0.0, 1.0);
        let mut random = RandomSource::new(29);
        let n = 200_000;
        let mut sum = 0.0;
        for _ in 0..n {
            sum += mix.phase_function(k_in, random.direction());
        }
        assert_approx_eq!(f64, sum / f64::from(n), 1.0, epsilon = 1e-2);
    }

    #[test]
    fn henyey_greenstein_sampling_matches_distribution() {
        let g = 0.5;
        let phase = PhaseFunction::HenyeyGreenstein { g };
        let mut random = RandomSource::new(31);

        let nbins = 32;
        let nsamples = 100_000;
        let mut counts = vec![0u32; nbins];
        for _ in 0..nsamples {
            let cos_theta = phase.sample_cos_theta(&mut random);
            assert!((-1.0..=1.0).contains(&cos_theta));
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let bin = (((cos_theta + 1.0) / 2.0 * crate::convert::f64_from_usize(nbins)) as usize)
                .min(nbins - 1);
            counts[bin] += 1;
        }

        // chi-squared against the analytic bin probabilities; the bound is
        // the critical value for 31 degrees of freedom at p = 1e-4
        let mut chi2 = 0.0;
        for (bin, &count) in counts.iter().enumerate() {
            let lo = 2.0 * crate::convert::f64_from_usize(bin) / crate::convert::f64_from_usize(nbins) - 1.0;
            let hi = 2.0 * crate::convert::f64_from_usize(bin + 1) / crate::convert::f64_from_usize(nbins) - 1.0;
            let expected = f64::from(nsamples) * (hg_cdf(g, hi) - hg_cdf(g, lo));
            chi2 += (f64::from(count) - expected).powi(2) / expected;
        }
        assert!(chi2 < 66.6, "chi2 = {chi2}");
    }

    #[test]
    fn sampled_directions_have_expected_mean_cosine() {
        let g = 0.3;
        let mix =
            DustMix::uniform(1, 1.0, 1.0, PhaseFunction::HenyeyGreenstein { g }).unwrap();
        let k_in = Vec3::new(1.0, 0.0, 0.0);
        let mut random = RandomSource::new(37);
        let n = 100_000;
        let mut sum = 0.0;
        for _ in 0..n {
            let k_out = mix.generate_new_direction(k_in, &mut random);
            assert_approx_eq!(f64, k_out.norm(), 1.0, ulps = 8);
            sum += k_in.dot(k_out);
        }
        // the mean scattering cosine of Henyey-Greenstein is g itself
        assert_approx_eq!(f64, sum / f64::from(n), g, epsilon = 5e-3);
    }

    #[test]
    fn isotropic_sampling_has_zero_mean_cosine() {
        let mix = DustMix::uniform(1, 1.0, 1.0, PhaseFunction::Isotropic).unwrap();
        let k_in = Vec3::new(0.0, 1.0, 0.0);
        let mut random = RandomSource::new(41);
        let n = 100_000;
        let mut sum = 0.0;
        for _ in 0..n {
            sum += k_in.dot(mix.generate_new_direction(k_in, &mut random));
        }
        assert_approx_eq!(f64, sum / f64::from(n), 0.0, epsilon = 5e-3);
    }
}
