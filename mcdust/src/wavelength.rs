//! The simulation's wavelength grid.

use crate::error::{Error, Result};
use itertools::Itertools;

/// Finite ordered sequence of wavelengths, with the bin widths used by the
/// downstream flux calibration. The transport kernel itself only ever sees
/// the integer wavelength index.
#[derive(Clone, Debug)]
pub struct WavelengthGrid {
    lambdav: Vec<f64>,
    dlambdav: Vec<f64>,
}

impl WavelengthGrid {
    /// Creates a grid from strictly increasing, positive wavelengths.
    ///
    /// # Errors
    ///
    /// Returns an error when the sequence is empty, contains non-positive
    /// values, or is not strictly increasing.
    pub fn new(lambdav: Vec<f64>) -> Result<Self> {
        if lambdav.is_empty() {
            return Err(Error::InvalidConfiguration(
                "the wavelength grid must contain at least one wavelength".to_owned(),
            ));
        }
        if lambdav.iter().any(|&lambda| lambda <= 0.0) {
            return Err(Error::InvalidConfiguration(
                "wavelengths must be positive".to_owned(),
            ));
        }
        if lambdav.iter().tuple_windows().any(|(a, b)| a >= b) {
            return Err(Error::InvalidConfiguration(
                "wavelengths must be strictly increasing".to_owned(),
            ));
        }

        // bin widths from the midpoints between neighbouring wavelengths; a
        // single-wavelength grid uses a unit width so that the calibration
        // degenerates to a plain flux
        let n = lambdav.len();
        let dlambdav = if n == 1 {
            vec![1.0]
        } else {
            (0..n)
                .map(|ell| match ell {
                    0 => lambdav[1] - lambdav[0],
                    _ if ell == n - 1 => lambdav[n - 1] - lambdav[n - 2],
                    _ => 0.5 * (lambdav[ell + 1] - lambdav[ell - 1]),
                })
                .collect()
        };

        Ok(Self { lambdav, dlambdav })
    }

    /// Returns the number of wavelengths.
    #[must_use]
    pub fn nlambda(&self) -> usize {
        self.lambdav.len()
    }

    /// Returns the wavelength at index `ell`.
    #[must_use]
    pub fn lambda(&self, ell: usize) -> f64 {
        self.lambdav[ell]
    }

    /// Returns the bin width at index `ell`.
    #[must_use]
    pub fn dlambda(&self, ell: usize) -> f64 {
        self.dlambdav[ell]
    }

    /// Returns all wavelengths.
    #[must_use]
    pub fn lambdas(&self) -> &[f64] {
        &self.lambdav
    }
}
