//! Photon packages, the luminosity packets transported by the kernel.

use crate::path::DustGridPath;
use crate::vec3::Vec3;
use std::sync::Arc;

/// Angular dependence of the emission at a photon package's origin, used to
/// bias emission peel-offs towards instruments. Values are probability
/// densities normalized to a mean of one over the unit sphere.
pub trait AngularDistribution: Send + Sync {
    /// Returns the emission probability density into direction `k`.
    fn probability(&self, k: Vec3) -> f64;
}

/// A monochromatic luminosity packet together with its current path through
/// the dust grid.
///
/// A package object is constructed once per work unit and relaunched for many
/// consecutive life cycles, so the embedded path keeps its allocation. Any
/// mutation of the position or direction restarts the path, invalidating the
/// previously computed crossings.
#[derive(Clone, Default)]
pub struct PhotonPackage {
    luminosity: f64,
    ell: usize,
    nscatt: u32,
    stellar: Option<usize>,
    angular: Option<Arc<dyn AngularDistribution>>,
    path: DustGridPath,
}

impl PhotonPackage {
    /// Creates an idle package; it must be launched before use.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an idle package whose path holds room for `capacity` segments.
    #[must_use]
    pub fn with_path_capacity(capacity: usize) -> Self {
        Self {
            path: DustGridPath::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Starts a new life cycle with the given luminosity, wavelength index,
    /// position and direction. All information about the previous life cycle
    /// is lost; the origin reverts to dust emission.
    pub fn launch(&mut self, luminosity: f64, ell: usize, position: Vec3, direction: Vec3) {
        self.luminosity = luminosity;
        self.ell = ell;
        self.nscatt = 0;
        self.stellar = None;
        self.angular = None;
        self.path.clear(position, direction);
    }

    /// Tags the package as emitted by the stellar component with the given
    /// index. Call only immediately after [`Self::launch`].
    pub fn set_stellar_origin(&mut self, component: usize) {
        self.stellar = Some(component);
    }

    /// Attaches the angular distribution of the emission at the package's
    /// origin. Call only immediately after [`Self::launch`].
    pub fn set_angular_distribution(&mut self, angular: Arc<dyn AngularDistribution>) {
        self.angular = Some(angular);
    }

    /// Initializes this package as an emission peel-off of `pp` towards
    /// `k_obs`, applying the anisotropic emission bias when `pp` carries an
    /// angular distribution. The base package remains unchanged.
    pub fn launch_emission_peel_off(&mut self, pp: &Self, k_obs: Vec3) {
        let bias = pp
            .angular
            .as_ref()
            .map_or(1.0, |angular| angular.probability(k_obs));
        self.luminosity = pp.luminosity * bias;
        self.ell = pp.ell;
        self.nscatt = pp.nscatt;
        self.stellar = pp.stellar;
        self.angular = None;
        self.path.clear(pp.position(), k_obs);
    }

    /// Initializes this package as a scattering peel-off of `pp` towards
    /// `k_obs` with luminosity fraction `w`, incrementing the scattering
    /// counter. The base package remains unchanged.
    pub fn launch_scattering_peel_off(&mut self, pp: &Self, k_obs: Vec3, w: f64) {
        self.launch_scattering_peel_off_at(pp, pp.position(), k_obs, w);
    }

    /// Initializes this package as a scattering peel-off of `pp` occurring at
    /// `position`, towards `k_obs` with luminosity fraction `w`.
    pub fn launch_scattering_peel_off_at(&mut self, pp: &Self, position: Vec3, k_obs: Vec3, w: f64) {
        self.luminosity = pp.luminosity * w;
        self.ell = pp.ell;
        self.nscatt = pp.nscatt + 1;
        self.stellar = pp.stellar;
        self.angular = None;
        self.path.clear(position, k_obs);
    }

    /// Moves the package over a distance `s` along its direction, restarting
    /// the path there.
    pub fn propagate(&mut self, s: f64) {
        let direction = self.path.direction();
        let position = self.path.position() + direction * s;
        self.path.clear(position, direction);
    }

    /// Deflects the package into the new direction, incrementing the
    /// scattering counter and restarting the path.
    pub fn scatter(&mut self, k_new: Vec3) {
        self.nscatt += 1;
        self.path.clear(self.path.position(), k_new);
    }

    /// Sets the luminosity to a new value.
    pub fn set_luminosity(&mut self, luminosity: f64) {
        self.luminosity = luminosity;
    }

    /// Returns the luminosity.
    #[must_use]
    pub fn luminosity(&self) -> f64 {
        self.luminosity
    }

    /// Returns the wavelength index.
    #[must_use]
    pub fn ell(&self) -> usize {
        self.ell
    }

    /// Returns the starting position of the current path.
    #[must_use]
    pub fn position(&self) -> Vec3 {
        self.path.position()
    }

    /// Returns the propagation direction of the current path.
    #[must_use]
    pub fn direction(&self) -> Vec3 {
        self.path.direction()
    }

    /// Returns the number of scattering events experienced so far.
    #[must_use]
    pub fn nscatt(&self) -> u32 {
        self.nscatt
    }

    /// Returns the emitting stellar component, or `None` for dust emission.
    #[must_use]
    pub fn stellar_origin(&self) -> Option<usize> {
        self.stellar
    }

    /// Returns true when the package originates from stellar emission.
    #[must_use]
    pub fn is_stellar(&self) -> bool {
        self.stellar.is_some()
    }

    /// Returns the current path.
    #[must_use]
    pub fn path(&self) -> &DustGridPath {
        &self.path
    }

    /// Returns the current path for filling.
    pub fn path_mut(&mut self) -> &mut DustGridPath {
        &mut self.path
    }
}
