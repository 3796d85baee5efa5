//! Stellar sources launching photon packages into the simulation.

use crate::error::{Error, Result};
use crate::geometry::{Geometry, GeometryEnum};
use crate::photon::{AngularDistribution, PhotonPackage};
use crate::random::RandomSource;
#[cfg(test)]
use crate::vec3::Vec3;
use std::sync::Arc;

/// One emitting population: a spatial distribution together with its
/// per-wavelength luminosities.
#[derive(Clone)]
pub struct StellarComponent {
    geometry: GeometryEnum,
    luminosities: Vec<f64>,
    angular: Option<Arc<dyn AngularDistribution>>,
}

impl StellarComponent {
    /// Creates a component from a geometry and per-wavelength luminosities in
    /// watts.
    ///
    /// # Errors
    ///
    /// Returns an error when the luminosity table is empty or contains
    /// negative entries.
    pub fn new(geometry: GeometryEnum, luminosities: Vec<f64>) -> Result<Self> {
        if luminosities.is_empty() {
            return Err(Error::InvalidConfiguration(
                "a stellar component needs at least one luminosity entry".to_owned(),
            ));
        }
        if luminosities.iter().any(|&luminosity| luminosity < 0.0) {
            return Err(Error::InvalidConfiguration(
                "stellar luminosities must not be negative".to_owned(),
            ));
        }
        Ok(Self {
            geometry,
            luminosities,
            angular: None,
        })
    }

    /// Attaches an angular emission distribution to this component.
    #[must_use]
    pub fn with_angular_distribution(mut self, angular: Arc<dyn AngularDistribution>) -> Self {
        self.angular = Some(angular);
        self
    }

    /// Returns the luminosity at wavelength index `ell`.
    #[must_use]
    pub fn luminosity(&self, ell: usize) -> f64 {
        self.luminosities[ell]
    }
}

/// The collection of stellar components of a simulation.
#[derive(Clone)]
pub struct StellarSystem {
    components: Vec<StellarComponent>,
}

impl StellarSystem {
    /// Creates a system from its components.
    ///
    /// # Errors
    ///
    /// Returns an error when no components are given or their luminosity
    /// tables disagree in length.
    pub fn new(components: Vec<StellarComponent>) -> Result<Self> {
        let Some(first) = components.first() else {
            return Err(Error::MissingCollaborator("stellar system"));
        };
        let nlambda = first.luminosities.len();
        if components
            .iter()
            .any(|component| component.luminosities.len() != nlambda)
        {
            return Err(Error::InvalidConfiguration(
                "all stellar components must cover the same wavelength grid".to_owned(),
            ));
        }
        Ok(Self { components })
    }

    /// Returns the number of wavelengths covered by the components.
    #[must_use]
    pub fn nlambda(&self) -> usize {
        self.components[0].luminosities.len()
    }

    /// Returns the intrinsic dimension of the system symmetry.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.components
            .iter()
            .map(|component| component.geometry.dimension())
            .max()
            .unwrap_or(1)
    }

    /// Returns the total luminosity at wavelength index `ell`.
    #[must_use]
    pub fn luminosity(&self, ell: usize) -> f64 {
        self.components
            .iter()
            .map(|component| component.luminosity(ell))
            .sum()
    }

    /// Launches `pp` at wavelength index `ell` with luminosity `luminosity`.
    ///
    /// The emitting component is drawn from a categorical distribution
    /// weighted by the per-component luminosities at `ell`; the position is
    /// sampled from that component's geometry and the direction is isotropic.
    pub fn launch(
        &self,
        pp: &mut PhotonPackage,
        ell: usize,
        luminosity: f64,
        random: &mut RandomSource,
    ) {
        let index = self.pick_component(ell, random);
        let component = &self.components[index];
        let position = component.geometry.random_position(random);
        pp.launch(luminosity, ell, position, random.direction());
        pp.set_stellar_origin(index);
        if let Some(angular) = &component.angular {
            pp.set_angular_distribution(Arc::clone(angular));
        }
    }

    fn pick_component(&self, ell: usize, random: &mut RandomSource) -> usize {
        if self.components.len() == 1 {
            return 0;
        }
        let total = self.luminosity(ell);
        let mut x = random.uniform() * total;
        for (index, component) in self.components.iter().enumerate() {
            x -= component.luminosity(ell);
            if x < 0.0 {
                return index;
            }
        }
        self.components.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PointGeometry;
    use float_cmp::assert_approx_eq;

    fn point_component(position: Vec3, luminosities: Vec<f64>) -> StellarComponent {
        StellarComponent::new(PointGeometry::new(position).into(), luminosities).unwrap()
    }

    #[test]
    fn rejects_bad_components() {
        assert!(StellarComponent::new(PointGeometry::default().into(), vec![]).is_err());
        assert!(StellarComponent::new(PointGeometry::default().into(), vec![-1.0]).is_err());
        assert!(StellarSystem::new(vec![]).is_err());
        assert!(StellarSystem::new(vec![
            point_component(Vec3::ZERO, vec![1.0]),
            point_component(Vec3::ZERO, vec![1.0, 2.0]),
        ])
        .is_err());
    }

    #[test]
    fn total_luminosity_sums_components() {
        let system = StellarSystem::new(vec![
            point_component(Vec3::ZERO, vec![1.0, 2.0]),
            point_component(Vec3::new(1.0, 0.0, 0.0), vec![3.0, 0.5]),
        ])
        .unwrap();
        assert_eq!(system.nlambda(), 2);
        assert_approx_eq!(f64, system.luminosity(0), 4.0, ulps = 2);
        assert_approx_eq!(f64, system.luminosity(1), 2.5, ulps = 2);
    }

    #[test]
    fn launch_tags_origin_and_position() {
        let position = Vec3::new(0.5, -0.5, 2.0);
        let system = StellarSystem::new(vec![point_component(position, vec![1.0])]).unwrap();
        let mut random = RandomSource::new(3);
        let mut pp = PhotonPackage::new();
        system.launch(&mut pp, 0, 0.125, &mut random);

        assert_eq!(pp.position(), position);
        assert_eq!(pp.stellar_origin(), Some(0));
        assert_approx_eq!(f64, pp.luminosity(), 0.125, ulps = 2);
        assert_approx_eq!(f64, pp.direction().norm(), 1.0, ulps = 4);
    }

    #[test]
    fn component_choice_follows_luminosity_weights() {
        let system = StellarSystem::new(vec![
            point_component(Vec3::ZERO, vec![1.0]),
            point_component(Vec3::new(1.0, 0.0, 0.0), vec![3.0]),
        ])
        .unwrap();
        let mut random = RandomSource::new(47);
        let mut pp = PhotonPackage::new();
        let n = 20_000;
        let mut first = 0u32;
        for _ in 0..n {
            system.launch(&mut pp, 0, 1.0, &mut random);
            if pp.stellar_origin() == Some(0) {
                first += 1;
            }
        }
        assert_approx_eq!(f64, f64::from(first) / f64::from(n), 0.25, epsilon = 0.01);
    }
}
