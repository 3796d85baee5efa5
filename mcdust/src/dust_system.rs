//! The dust medium: density field, optical-depth integration and absorption
//! bookkeeping.

use crate::atomic_array::AtomicF64Array;
use crate::error::{Error, Result};
use crate::geometry::{Geometry, GeometryEnum};
use crate::grid::{DustGrid, GridEnum};
use crate::mix::DustMix;
use crate::photon::PhotonPackage;
use crate::vec3::Vec3;
use ndarray::Array2;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// One dust population: a mix of optical properties plus its mass density in
/// every grid cell.
#[derive(Clone, Debug)]
pub struct DustComponent {
    mix: DustMix,
    density: Vec<f64>,
}

impl DustComponent {
    /// Creates a component from a mix and a per-cell density table.
    #[must_use]
    pub const fn new(mix: DustMix, density: Vec<f64>) -> Self {
        Self { mix, density }
    }

    /// Creates a component by tabulating an analytic geometry at the cell
    /// centers of `grid`, scaled so the gridded mass equals `total_mass`.
    #[must_use]
    pub fn from_geometry(
        mix: DustMix,
        geometry: &GeometryEnum,
        total_mass: f64,
        grid: &GridEnum,
    ) -> Self {
        let mut density: Vec<f64> = (0..grid.ncells())
            .map(|m| geometry.density(grid.central_position(m)))
            .collect();
        let gridded_mass: f64 = density
            .iter()
            .enumerate()
            .map(|(m, &rho)| rho * grid.volume(m))
            .sum();
        if gridded_mass > 0.0 {
            let factor = total_mass / gridded_mass;
            for rho in &mut density {
                *rho *= factor;
            }
        }
        Self { mix, density }
    }

    /// Returns the optical properties of this component.
    #[must_use]
    pub const fn mix(&self) -> &DustMix {
        &self.mix
    }
}

/// The complete dust medium of a simulation.
///
/// The density tables and mixes are read-only during a transport phase; the
/// absorption buckets are additive aggregates safe for concurrent updates
/// from many worker threads.
#[derive(Debug)]
pub struct DustSystem {
    grid: GridEnum,
    components: Vec<DustComponent>,
    dust_emission: bool,
    nlambda: usize,
    absorbed_stellar: AtomicF64Array,
    absorbed_dust: AtomicF64Array,
}

impl DustSystem {
    /// Creates a dust system over `grid` with the given components.
    ///
    /// # Errors
    ///
    /// Returns an error when no components are given, a density table does
    /// not match the grid, or a mix does not cover `nlambda` wavelengths.
    pub fn new(
        grid: GridEnum,
        components: Vec<DustComponent>,
        nlambda: usize,
        dust_emission: bool,
    ) -> Result<Self> {
        if components.is_empty() {
            return Err(Error::MissingCollaborator("dust components"));
        }
        let ncells = grid.ncells();
        for component in &components {
            if component.density.len() != ncells {
                return Err(Error::InvalidConfiguration(
                    "a dust density table does not match the grid cell count".to_owned(),
                ));
            }
            if component.density.iter().any(|&rho| rho < 0.0) {
                return Err(Error::InvalidConfiguration(
                    "dust densities must not be negative".to_owned(),
                ));
            }
            if component.mix.nlambda() != nlambda {
                return Err(Error::InvalidConfiguration(
                    "a dust mix does not cover the simulation's wavelength grid".to_owned(),
                ));
            }
        }
        Ok(Self {
            grid,
            components,
            dust_emission,
            nlambda,
            absorbed_stellar: AtomicF64Array::zeros(ncells * nlambda),
            absorbed_dust: AtomicF64Array::zeros(ncells * nlambda),
        })
    }

    /// Returns the grid carrying the medium.
    #[must_use]
    pub const fn grid(&self) -> &GridEnum {
        &self.grid
    }

    /// Returns the number of dust components.
    #[must_use]
    pub fn ncomp(&self) -> usize {
        self.components.len()
    }

    /// Returns the mix of component `h`.
    #[must_use]
    pub fn mix(&self, h: usize) -> &DustMix {
        &self.components[h].mix
    }

    /// Returns the density of component `h` in cell `m`.
    #[must_use]
    pub fn density(&self, m: usize, h: usize) -> f64 {
        self.components[h].density[m]
    }

    /// Returns true when absorption is recorded for a later dust emission
    /// phase.
    #[must_use]
    pub const fn dust_emission(&self) -> bool {
        self.dust_emission
    }

    /// Returns the number of wavelengths covered by the absorption buckets.
    #[must_use]
    pub const fn nlambda(&self) -> usize {
        self.nlambda
    }

    /// Returns the cell containing `r`, or `None` outside the grid.
    #[must_use]
    pub fn which_cell(&self, r: Vec3) -> Option<usize> {
        self.grid.which_cell(r)
    }

    /// Fills the photon package's path with the cell crossings from its
    /// current position and computes the optical depth per segment,
    /// `dtau = ds * sum_h rho(m, h) kappa_ext(h, ell)`, together with the
    /// cumulative optical depth.
    ///
    /// # Errors
    ///
    /// Propagates grid traversal failures.
    pub fn fill_optical_depth(&self, pp: &mut PhotonPackage) -> Result<()> {
        let ell = pp.ell();
        let position = pp.position();
        let direction = pp.direction();
        pp.path_mut().clear(position, direction);
        self.grid.fill_path(pp.path_mut())?;
        pp.path_mut().apply_extinction(|m| {
            self.components
                .iter()
                .map(|component| component.density[m] * component.mix.kappa_ext(ell))
                .sum()
        });
        Ok(())
    }

    /// Atomically adds `luminosity` to the absorption bucket of cell `m` at
    /// wavelength index `ell`, routed by the origin of the absorbed energy.
    pub fn absorb(&self, m: usize, ell: usize, luminosity: f64, stellar: bool) {
        let bucket = if stellar {
            &self.absorbed_stellar
        } else {
            &self.absorbed_dust
        };
        bucket.add(m * self.nlambda + ell, luminosity);
    }

    /// Returns the absorbed luminosity of cell `m` at wavelength index
    /// `ell`, summed over both origins.
    #[must_use]
    pub fn absorbed_luminosity(&self, m: usize, ell: usize) -> f64 {
        let index = m * self.nlambda + ell;
        self.absorbed_stellar.get(index) + self.absorbed_dust.get(index)
    }

    /// Returns the total absorbed luminosity over all cells and wavelengths.
    #[must_use]
    pub fn absorbed_total(&self) -> f64 {
        self.absorbed_stellar.total() + self.absorbed_dust.total()
    }

    /// Returns a (cells x wavelengths) snapshot of the stellar absorption
    /// bucket.
    #[must_use]
    pub fn absorbed_stellar_matrix(&self) -> Array2<f64> {
        self.bucket_matrix(&self.absorbed_stellar)
    }

    /// Returns a (cells x wavelengths) snapshot of the dust-emission
    /// absorption bucket.
    #[must_use]
    pub fn absorbed_dust_matrix(&self) -> Array2<f64> {
        self.bucket_matrix(&self.absorbed_dust)
    }

    fn bucket_matrix(&self, bucket: &AtomicF64Array) -> Array2<f64> {
        Array2::from_shape_vec((self.grid.ncells(), self.nlambda), bucket.to_vec())
            .expect("bucket length matches the grid by construction")
    }

    /// Writes the per-cell absorbed luminosities to `dust_absorption.dat` in
    /// `out_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be written.
    pub fn write(&self, out_dir: &Path) -> Result<()> {
        let filename = out_dir.join("dust_absorption.dat");
        tracing::info!("Writing dust absorption to {}", filename.display());
        let mut file = BufWriter::new(File::create(filename)?);
        writeln!(file, "# column 1: cell index")?;
        writeln!(file, "# column 2: absorbed stellar luminosity (W)")?;
        writeln!(file, "# column 3: absorbed dust luminosity (W)")?;
        for m in 0..self.grid.ncells() {
            let stellar: f64 = (0..self.nlambda)
                .map(|ell| self.absorbed_stellar.get(m * self.nlambda + ell))
                .sum();
            let dust: f64 = (0..self.nlambda)
                .map(|ell| self.absorbed_dust.get(m * self.nlambda + ell))
                .sum();
            writeln!(file, "{m}\t{stellar:.8e}\t{dust:.8e}")?;
        }
        Ok(())
    }
}
