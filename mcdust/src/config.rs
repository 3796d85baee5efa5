//! Declarative run configuration, deserialized from YAML by the runner.

use crate::dust_system::{DustComponent, DustSystem};
use crate::error::Result;
use crate::geometry::{GeometryEnum, PlummerGeometry, PointGeometry};
use crate::grid::{CartesianGrid, DustGrid, GridEnum, SphericalGrid};
use crate::instrument::{DistantInstrument, InstrumentEnum, InstrumentSystem};
use crate::mix::{DustMix, PhaseFunction};
use crate::simulation::{KernelOptions, MonteCarloSimulation};
use crate::stellar::{StellarComponent, StellarSystem};
use crate::vec3::Vec3;
use crate::wavelength::WavelengthGrid;
use serde::{Deserialize, Serialize};

/// A complete simulation setup.
// no deny_unknown_fields here: it cannot be combined with the flattened
// kernel options
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RunConfig {
    /// Kernel knobs: package count, scattering mode, seed, threads.
    #[serde(flatten)]
    pub kernel: KernelOptions,
    /// The simulated wavelengths in meters, strictly increasing.
    pub wavelengths: Vec<f64>,
    /// The emitting stellar components.
    pub stellar_components: Vec<StellarConfig>,
    /// The dust medium; omit for a transparent model.
    #[serde(default)]
    pub dust: Option<DustConfig>,
    /// The observing instruments.
    pub instruments: Vec<InstrumentConfig>,
}

/// One stellar component.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StellarConfig {
    /// Spatial distribution of the emission.
    pub geometry: GeometryConfig,
    /// Luminosity per wavelength bin, in watts.
    pub luminosities: Vec<f64>,
}

/// Spatial distribution of an emitting component.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum GeometryConfig {
    /// All emission from one position.
    Point {
        /// The emission position; the origin when omitted.
        #[serde(default)]
        position: Vec3,
    },
    /// A Plummer sphere centered on the origin.
    Plummer {
        /// Scale length of the sphere.
        scale: f64,
    },
}

impl GeometryConfig {
    fn build(&self) -> Result<GeometryEnum> {
        Ok(match *self {
            Self::Point { position } => PointGeometry::new(position).into(),
            Self::Plummer { scale } => PlummerGeometry::new(scale)?.into(),
        })
    }
}

/// The dust medium.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DustConfig {
    /// The grid carrying the medium.
    pub grid: GridConfig,
    /// The co-located dust components.
    pub components: Vec<DustComponentConfig>,
    /// Record absorbed energy for a later dust emission phase.
    #[serde(default)]
    pub dust_emission: bool,
}

/// The dust grid shape.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum GridConfig {
    /// Concentric spherical shells.
    Spherical {
        /// Shell border radii, starting at zero.
        borders: Vec<f64>,
    },
    /// Axis-aligned rectangular cells.
    Cartesian {
        /// Cell border planes along the x axis.
        x: Vec<f64>,
        /// Cell border planes along the y axis.
        y: Vec<f64>,
        /// Cell border planes along the z axis.
        z: Vec<f64>,
    },
}

impl GridConfig {
    fn build(&self) -> Result<GridEnum> {
        Ok(match self {
            Self::Spherical { borders } => SphericalGrid::new(borders.clone())?.into(),
            Self::Cartesian { x, y, z } => {
                CartesianGrid::new(x.clone(), y.clone(), z.clone())?.into()
            }
        })
    }
}

/// One dust component.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DustComponentConfig {
    /// Extinction coefficient per wavelength bin.
    pub kappa_ext: Vec<f64>,
    /// Scattering coefficient per wavelength bin.
    pub kappa_sca: Vec<f64>,
    /// Scattering phase function; isotropic when omitted.
    #[serde(default)]
    pub phase: PhaseFunction,
    /// Density field of the component.
    pub density: DensityConfig,
}

/// Density field of a dust component.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum DensityConfig {
    /// The same density in every cell.
    Uniform {
        /// Mass density value.
        value: f64,
    },
    /// A Plummer sphere tabulated on the grid.
    Plummer {
        /// Scale length of the sphere.
        scale: f64,
        /// Total dust mass on the grid.
        total_mass: f64,
    },
}

/// One distant instrument.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct InstrumentConfig {
    /// Instrument name, used for output files.
    pub name: String,
    /// Distance to the observed system.
    pub distance: f64,
    /// Inclination of the viewing direction, in radians.
    #[serde(default)]
    pub inclination: f64,
    /// Azimuth of the viewing direction, in radians.
    #[serde(default)]
    pub azimuth: f64,
}

impl RunConfig {
    /// Builds the simulation described by this configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure of any collaborator.
    pub fn build(&self) -> Result<MonteCarloSimulation> {
        let wavelength_grid = WavelengthGrid::new(self.wavelengths.clone())?;
        let nlambda = wavelength_grid.nlambda();

        let stellar_system = StellarSystem::new(
            self.stellar_components
                .iter()
                .map(|component| {
                    StellarComponent::new(
                        component.geometry.build()?,
                        component.luminosities.clone(),
                    )
                })
                .collect::<Result<Vec<_>>>()?,
        )?;

        let dust_system = match &self.dust {
            None => None,
            Some(dust) => {
                let grid = dust.grid.build()?;
                let components = dust
                    .components
                    .iter()
                    .map(|component| {
                        let mix = DustMix::new(
                            component.kappa_ext.clone(),
                            component.kappa_sca.clone(),
                            component.phase,
                        )?;
                        Ok(match component.density {
                            DensityConfig::Uniform { value } => {
                                DustComponent::new(mix, vec![value; grid.ncells()])
                            }
                            DensityConfig::Plummer { scale, total_mass } => {
                                let geometry: GeometryEnum = PlummerGeometry::new(scale)?.into();
                                DustComponent::from_geometry(mix, &geometry, total_mass, &grid)
                            }
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Some(DustSystem::new(
                    grid,
                    components,
                    nlambda,
                    dust.dust_emission,
                )?)
            }
        };

        let instrument_system = InstrumentSystem::new(
            self.instruments
                .iter()
                .map(|instrument| {
                    Ok(InstrumentEnum::from(DistantInstrument::new(
                        instrument.name.clone(),
                        instrument.distance,
                        instrument.inclination,
                        instrument.azimuth,
                        nlambda,
                    )?))
                })
                .collect::<Result<Vec<_>>>()?,
        );

        MonteCarloSimulation::new(
            self.kernel.clone(),
            wavelength_grid,
            stellar_system,
            instrument_system,
            dust_system,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = "
packages: 1000.0
seed: 7
threads: 1
wavelengths: [1.0e-6, 2.0e-6]
stellar_components:
  - geometry:
      type: point
    luminosities: [1.0, 0.5]
dust:
  grid:
    type: spherical
    borders: [0.0, 5.0, 10.0]
  components:
    - kappa_ext: [1.0, 0.8]
      kappa_sca: [0.5, 0.4]
      phase:
        type: henyey_greenstein
        g: 0.3
      density:
        type: plummer
        scale: 2.0
        total_mass: 1.0
  dust_emission: true
instruments:
  - name: face_on
    distance: 100.0
";

    #[test]
    fn builds_a_complete_simulation_from_yaml() {
        let config: RunConfig = serde_yaml::from_str(EXAMPLE).unwrap();
        let simulation = config.build().unwrap();
        assert_eq!(simulation.wavelength_grid().nlambda(), 2);
        assert_eq!(simulation.nchunks(), 1);
        let dust_system = simulation.dust_system().unwrap();
        assert_eq!(dust_system.grid().ncells(), 2);
        assert!(dust_system.dust_emission());
        assert_eq!(simulation.instrument_system().instruments().len(), 1);
    }

    #[test]
    fn rejects_unknown_component_fields() {
        let text = "geometry:\n  type: point\nluminosities: [1.0]\nbogus: 1";
        assert!(serde_yaml::from_str::<StellarConfig>(text).is_err());
    }

    #[test]
    fn transparent_model_needs_no_dust_block() {
        let text = "
packages: 10.0
wavelengths: [1.0e-6]
stellar_components:
  - geometry:
      type: plummer
      scale: 1.0
    luminosities: [2.0]
instruments: []
";
        let config: RunConfig = serde_yaml::from_str(text).unwrap();
        let simulation = config.build().unwrap();
        assert!(simulation.dust_system().is_none());
    }
}
