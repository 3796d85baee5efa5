//! Synthetic instruments recording peeled-off photon packages.

use crate::atomic_array::AtomicF64Array;
use crate::error::{Error, Result};
use crate::photon::PhotonPackage;
use crate::vec3::Vec3;
use crate::wavelength::WavelengthGrid;
use enum_dispatch::enum_dispatch;
use itertools::izip;
use std::f64::consts::PI;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Capability interface implemented by every instrument.
///
/// Instruments never store the peel-off packages handed to them; they copy
/// out what they need into their own thread-safe accumulators.
#[enum_dispatch]
pub trait Instrument {
    /// Returns the instrument name, used for output files.
    fn name(&self) -> &str;

    /// Returns the direction from the position `r` towards the instrument.
    fn observation_direction(&self, r: Vec3) -> Vec3;

    /// Records a peel-off photon package. Safe to call concurrently.
    fn detect(&self, pp: &PhotonPackage);

    /// Returns the number of wavelengths the accumulators cover.
    fn nlambda(&self) -> usize;

    /// Calibrates the accumulated luminosities and writes them to a file in
    /// `out_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be written.
    fn write(&self, grid: &WavelengthGrid, out_dir: &Path) -> Result<()>;
}

/// The closed set of instrument types known to the engine.
#[enum_dispatch(Instrument)]
#[derive(Debug)]
pub enum InstrumentEnum {
    /// An instrument at large distance with a fixed viewing direction.
    DistantInstrument,
}

/// An instrument so far away that all peel-off rays towards it are parallel.
///
/// The viewing direction is derived from an inclination and azimuth angle;
/// the accumulated luminosities are calibrated into fluxes using the
/// instrument distance.
#[derive(Debug)]
pub struct DistantInstrument {
    name: String,
    distance: f64,
    direction: Vec3,
    ftotv: AtomicF64Array,
    fscav: AtomicF64Array,
}

impl DistantInstrument {
    /// Creates an instrument at `distance` viewing the system from the
    /// direction given by `inclination` and `azimuth` (radians), recording
    /// `nlambda` wavelength bins.
    ///
    /// # Errors
    ///
    /// Returns an error when the distance is not positive.
    pub fn new(
        name: impl Into<String>,
        distance: f64,
        inclination: f64,
        azimuth: f64,
        nlambda: usize,
    ) -> Result<Self> {
        if distance <= 0.0 {
            return Err(Error::InvalidConfiguration(
                "the instrument distance should be positive".to_owned(),
            ));
        }
        Ok(Self {
            name: name.into(),
            distance,
            direction: Vec3::from_spherical(inclination, azimuth),
            ftotv: AtomicF64Array::zeros(nlambda),
            fscav: AtomicF64Array::zeros(nlambda),
        })
    }

    /// Returns the accumulated total luminosities per wavelength, in watts.
    #[must_use]
    pub fn total_sed(&self) -> Vec<f64> {
        self.ftotv.to_vec()
    }

    /// Returns the accumulated scattered-only luminosities per wavelength.
    #[must_use]
    pub fn scattered_sed(&self) -> Vec<f64> {
        self.fscav.to_vec()
    }
}

impl Instrument for DistantInstrument {
    fn name(&self) -> &str {
        &self.name
    }

    fn observation_direction(&self, _r: Vec3) -> Vec3 {
        self.direction
    }

    fn detect(&self, pp: &PhotonPackage) {
        let ell = pp.ell();
        let luminosity = pp.luminosity();
        self.ftotv.add(ell, luminosity);
        if pp.nscatt() > 0 {
            self.fscav.add(ell, luminosity);
        }
    }

    fn nlambda(&self) -> usize {
        self.ftotv.len()
    }

    fn write(&self, grid: &WavelengthGrid, out_dir: &Path) -> Result<()> {
        // calibrate from bolometric luminosities (W) to monochromatic
        // luminosities (W/m) and further to flux densities (W/m3)
        let fourpid2 = 4.0 * PI * self.distance * self.distance;
        let calibrate = |bucket: &AtomicF64Array| -> Vec<f64> {
            bucket
                .to_vec()
                .iter()
                .enumerate()
                .map(|(ell, luminosity)| luminosity / grid.dlambda(ell) / fourpid2)
                .collect()
        };
        let ftotv = calibrate(&self.ftotv);
        let fscav = calibrate(&self.fscav);

        let filename = out_dir.join(format!("{}_sed.dat", self.name));
        tracing::info!("Writing SED to {}", filename.display());
        let mut file = BufWriter::new(File::create(filename)?);
        writeln!(file, "# column 1: lambda (m)")?;
        writeln!(file, "# column 2: total flux; F_lambda (W/m3)")?;
        writeln!(file, "# column 3: scattered flux; F_lambda (W/m3)")?;
        for (lambda, ftot, fsca) in izip!(grid.lambdas(), &ftotv, &fscav) {
            writeln!(file, "{lambda:.8e}\t{ftot:.8e}\t{fsca:.8e}")?;
        }
        Ok(())
    }
}

/// The collection of instruments observing a simulation.
#[derive(Debug)]
pub struct InstrumentSystem {
    instruments: Vec<InstrumentEnum>,
}

impl InstrumentSystem {
    /// Creates a system from its instruments.
    #[must_use]
    pub fn new(instruments: Vec<InstrumentEnum>) -> Self {
        Self { instruments }
    }

    /// Returns the instruments.
    #[must_use]
    pub fn instruments(&self) -> &[InstrumentEnum] {
        &self.instruments
    }

    /// Writes the output files of all instruments.
    ///
    /// # Errors
    ///
    /// Returns the first write failure.
    pub fn write(&self, grid: &WavelengthGrid, out_dir: &Path) -> Result<()> {
        for instrument in &self.instruments {
            instrument.write(grid, out_dir)?;
        }
        Ok(())
    }
}
