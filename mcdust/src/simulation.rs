//! The Monte Carlo transport kernel: emission, peel-off, absorption,
//! propagation and scattering of photon packages.

use crate::convert;
use crate::dust_system::DustSystem;
use crate::error::{Error, Result};
use crate::grid::DustGrid;
use crate::instrument::{Instrument, InstrumentSystem};
use crate::parallel::ParallelDispatcher;
use crate::photon::PhotonPackage;
use crate::random::RandomSource;
use crate::stellar::StellarSystem;
use crate::wavelength::WavelengthGrid;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Hard upper limit on the requested number of photon packages.
const MAX_PACKAGES: f64 = 1e15;

/// Fraction of the launch luminosity below which a package's life cycle is
/// terminated.
const MIN_LUMINOSITY_FRACTION: f64 = 1e-4;

/// User-facing knobs of the transport kernel.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct KernelOptions {
    /// Requested number of photon packages per wavelength; the actual count
    /// is rounded up to fill an integral number of chunks.
    pub packages: f64,
    /// Peel off scattered radiation along every cell crossing instead of at
    /// the discrete interaction sites.
    #[serde(default)]
    pub continuous_scattering: bool,
    /// Seed of the random streams; reruns with the same seed reproduce the
    /// same simulation.
    #[serde(default)]
    pub seed: u64,
    /// Number of worker threads, or `None` for one per available core.
    #[serde(default)]
    pub threads: Option<usize>,
}

impl Default for KernelOptions {
    fn default() -> Self {
        Self {
            packages: 1e5,
            continuous_scattering: false,
            seed: 0,
            threads: None,
        }
    }
}

/// Thread-safe progress accounting for a transport phase.
///
/// The counter is a plain atomic; the message timer is read without locking,
/// so once in a while two consecutive messages may slip through.
#[derive(Debug)]
struct Progress {
    done: AtomicU64,
    total: f64,
    started: Instant,
    last_log_millis: AtomicU64,
}

const LOG_SPACING_MILLIS: u64 = 3000;

impl Progress {
    fn new(total: f64) -> Self {
        Self {
            done: AtomicU64::new(0),
            total,
            started: Instant::now(),
            last_log_millis: AtomicU64::new(0),
        }
    }

    fn reset(&self) {
        self.done.store(0, Ordering::Relaxed);
        let elapsed = self.elapsed_millis();
        self.last_log_millis.store(elapsed, Ordering::Relaxed);
    }

    fn elapsed_millis(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn add(&self, extra: u64) {
        let done = self.done.fetch_add(extra, Ordering::Relaxed) + extra;
        let elapsed = self.elapsed_millis();
        let last = self.last_log_millis.load(Ordering::Relaxed);
        if elapsed.saturating_sub(last) > LOG_SPACING_MILLIS && self.total > 0.0 {
            self.last_log_millis.store(elapsed, Ordering::Relaxed);
            let completed = convert::f64_from_u64(done) * 100.0 / self.total;
            info!("Launched stellar emission photon packages: {completed:.1}%");
        }
    }
}

/// A complete Monte Carlo radiative transfer simulation.
///
/// The simulation owns its collaborators exclusively. The stellar emission
/// phase decomposes the requested photon packages into chunks, crosses them
/// with the wavelength grid, and hands the resulting work units to the
/// dispatcher; every work unit performs complete package life cycles and only
/// ever writes to the atomic absorption and instrument aggregates.
pub struct MonteCarloSimulation {
    options: KernelOptions,
    wavelength_grid: WavelengthGrid,
    stellar_system: StellarSystem,
    instrument_system: InstrumentSystem,
    dust_system: Option<DustSystem>,
    dispatcher: ParallelDispatcher,
    nchunks: u64,
    chunksize: u64,
    npp: f64,
    log_chunk_size: u64,
    progress: Progress,
}

impl std::fmt::Debug for MonteCarloSimulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonteCarloSimulation")
            .field("nchunks", &self.nchunks)
            .field("chunksize", &self.chunksize)
            .field("npp", &self.npp)
            .field("log_chunk_size", &self.log_chunk_size)
            .finish_non_exhaustive()
    }
}

impl MonteCarloSimulation {
    /// Assembles a simulation and derives its chunk decomposition.
    ///
    /// The number of chunks balances per-chunk overhead against load
    /// balancing across wavelengths: a single-threaded run uses one chunk,
    /// otherwise the chunk count is
    /// `ceil(min(packages / 2e4, max(packages / 1e7, 10 threads / nlambda)))`.
    ///
    /// # Errors
    ///
    /// Returns an error when the package count lies outside `0..=1e15`, when
    /// a collaborator does not cover the wavelength grid, or when the worker
    /// pool cannot be built.
    pub fn new(
        options: KernelOptions,
        wavelength_grid: WavelengthGrid,
        stellar_system: StellarSystem,
        instrument_system: InstrumentSystem,
        dust_system: Option<DustSystem>,
    ) -> Result<Self> {
        if options.packages < 0.0 {
            return Err(Error::NegativePackageCount);
        }
        if options.packages > MAX_PACKAGES {
            return Err(Error::ExcessivePackageCount);
        }
        let nlambda = wavelength_grid.nlambda();
        if stellar_system.nlambda() != nlambda {
            return Err(Error::InvalidConfiguration(
                "the stellar system does not cover the wavelength grid".to_owned(),
            ));
        }
        if let Some(dust_system) = &dust_system {
            if dust_system.nlambda() != nlambda {
                return Err(Error::InvalidConfiguration(
                    "the dust system does not cover the wavelength grid".to_owned(),
                ));
            }
        }
        if instrument_system
            .instruments()
            .iter()
            .any(|instrument| instrument.nlambda() != nlambda)
        {
            return Err(Error::InvalidConfiguration(
                "an instrument does not cover the wavelength grid".to_owned(),
            ));
        }

        let dispatcher = ParallelDispatcher::new(options.threads)?;

        let (nchunks, chunksize) = if options.packages <= 0.0 {
            (0, 0)
        } else {
            let threads = dispatcher.thread_count();
            let nchunks = if threads == 1 {
                1
            } else {
                convert::u64_from_f64(
                    (options.packages / 2e4)
                        .min((options.packages / 1e7).max(
                            10.0 * convert::f64_from_usize(threads)
                                / convert::f64_from_usize(nlambda),
                        ))
                        .ceil(),
                )
            };
            let chunksize =
                convert::u64_from_f64((options.packages / convert::f64_from_u64(nchunks)).ceil());
            (nchunks, chunksize)
        };
        let npp = convert::f64_from_u64(nchunks * chunksize);

        // continuous scattering is much slower, log more often
        let log_chunk_size = if options.continuous_scattering {
            5_000
        } else {
            50_000
        };

        let progress = Progress::new(npp * convert::f64_from_usize(nlambda));
        Ok(Self {
            options,
            wavelength_grid,
            stellar_system,
            instrument_system,
            dust_system,
            dispatcher,
            nchunks,
            chunksize,
            npp,
            log_chunk_size,
            progress,
        })
    }

    /// Returns the wavelength grid.
    #[must_use]
    pub const fn wavelength_grid(&self) -> &WavelengthGrid {
        &self.wavelength_grid
    }

    /// Returns the instrument system.
    #[must_use]
    pub const fn instrument_system(&self) -> &InstrumentSystem {
        &self.instrument_system
    }

    /// Returns the dust system, if the simulation transports through dust.
    #[must_use]
    pub const fn dust_system(&self) -> Option<&DustSystem> {
        self.dust_system.as_ref()
    }

    /// Returns the number of chunks per wavelength.
    #[must_use]
    pub const fn nchunks(&self) -> u64 {
        self.nchunks
    }

    /// Returns the number of photon packages per chunk.
    #[must_use]
    pub const fn chunksize(&self) -> u64 {
        self.chunksize
    }

    /// Returns the actual number of photon packages launched per wavelength.
    #[must_use]
    pub const fn npackages(&self) -> f64 {
        self.npp
    }

    /// Returns the intrinsic dimension of the simulated model.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.stellar_system.dimension().max(
            self.dust_system
                .as_ref()
                .map_or(1, |dust_system| dust_system.grid().dimension()),
        )
    }

    /// Runs the stellar emission phase: every work unit launches a chunk of
    /// packages at one wavelength and follows each package through emission
    /// peel-off and the transport loop.
    ///
    /// # Errors
    ///
    /// Propagates the first fatal error raised inside a work unit.
    pub fn run_stellar_emission(&self) -> Result<()> {
        let started = Instant::now();
        info!("Starting the stellar emission phase");
        let nlambda = self.wavelength_grid.nlambda();
        info!(
            "({:e} photon packages for {})",
            self.npp,
            if nlambda == 1 {
                "a single wavelength".to_owned()
            } else {
                format!("each of {nlambda} wavelengths")
            }
        );
        self.progress.reset();

        let units = self.nchunks * convert::u64_from_usize(nlambda);
        self.dispatcher
            .call(units, |index| self.stellar_emission_chunk(index))?;

        info!(
            "Finished the stellar emission phase in {:.1} s",
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Performs the work unit with the given index: `chunksize` complete
    /// photon package life cycles at wavelength `index % nlambda`.
    fn stellar_emission_chunk(&self, index: u64) -> Result<()> {
        let nlambda = convert::u64_from_usize(self.wavelength_grid.nlambda());
        let ell = convert::usize_from_u64(index % nlambda);
        let luminosity = self.stellar_system.luminosity(ell) / self.npp;
        if luminosity <= 0.0 {
            self.progress.add(self.chunksize);
            return Ok(());
        }
        let lmin = MIN_LUMINOSITY_FRACTION * luminosity;

        let mut random = RandomSource::for_stream(self.options.seed, index);
        let capacity = self
            .dust_system
            .as_ref()
            .map_or(0, |dust_system| dust_system.grid().max_path_segments());
        let mut pp = PhotonPackage::with_path_capacity(capacity);
        let mut ppp = PhotonPackage::new();

        let mut remaining = self.chunksize;
        while remaining > 0 {
            let count = remaining.min(self.log_chunk_size);
            for _ in 0..count {
                self.stellar_system
                    .launch(&mut pp, ell, luminosity, &mut random);
                self.peel_off_emission(&pp, &mut ppp);
                if let Some(dust_system) = &self.dust_system {
                    loop {
                        dust_system.fill_optical_depth(&mut pp)?;
                        if self.options.continuous_scattering {
                            self.continuous_peel_off_scattering(
                                dust_system,
                                &pp,
                                &mut ppp,
                                &mut random,
                            );
                        }
                        simulate_escape_and_absorption(dust_system, &mut pp);
                        if pp.luminosity() <= lmin {
                            break;
                        }
                        simulate_propagation(&mut pp, &mut random);
                        if !self.options.continuous_scattering {
                            self.peel_off_scattering(dust_system, &pp, &mut ppp)?;
                        }
                        simulate_scattering(dust_system, &mut pp, &mut random)?;
                    }
                }
            }
            self.progress.add(count);
            remaining -= count;
        }
        Ok(())
    }

    /// Peels one ray off a freshly emitted package towards every instrument.
    fn peel_off_emission(&self, pp: &PhotonPackage, ppp: &mut PhotonPackage) {
        let position = pp.position();
        for instrument in self.instrument_system.instruments() {
            let k_obs = instrument.observation_direction(position);
            ppp.launch_emission_peel_off(pp, k_obs);
            instrument.detect(ppp);
        }
    }

    /// Peels one ray off a scattering event towards every instrument. The
    /// phase functions of the dust components are weighted by
    /// `kappa_sca(h) rho(m, h)` at the event's cell.
    fn peel_off_scattering(
        &self,
        dust_system: &DustSystem,
        pp: &PhotonPackage,
        ppp: &mut PhotonPackage,
    ) -> Result<()> {
        let ncomp = dust_system.ncomp();
        let ell = pp.ell();
        let position = pp.position();

        let weights = if ncomp == 1 {
            vec![1.0]
        } else {
            let m = dust_system
                .which_cell(position)
                .ok_or(Error::ScatteringOutsideGrid)?;
            let mut weights: Vec<f64> = (0..ncomp)
                .map(|h| dust_system.mix(h).kappa_sca(ell) * dust_system.density(m, h))
                .collect();
            let total: f64 = weights.iter().sum();
            if total > 0.0 {
                for weight in &mut weights {
                    *weight /= total;
                }
            }
            weights
        };

        let k_old = pp.direction();
        for instrument in self.instrument_system.instruments() {
            let k_obs = instrument.observation_direction(position);
            let w: f64 = weights
                .iter()
                .enumerate()
                .map(|(h, weight)| weight * dust_system.mix(h).phase_function(k_old, k_obs))
                .sum();
            ppp.launch_scattering_peel_off(pp, k_obs, w);
            instrument.detect(ppp);
        }
        Ok(())
    }

    /// Peels scattered radiation off every cell crossing of the current path,
    /// attenuated by the optical depth up to the cell and the scattering
    /// probability within it.
    fn continuous_peel_off_scattering(
        &self,
        dust_system: &DustSystem,
        pp: &PhotonPackage,
        ppp: &mut PhotonPackage,
        random: &mut RandomSource,
    ) {
        let ncomp = dust_system.ncomp();
        let ell = pp.ell();
        let position = pp.position();
        let direction = pp.direction();

        let kappa_sca: Vec<f64> = (0..ncomp)
            .map(|h| dust_system.mix(h).kappa_sca(ell))
            .collect();
        let kappa_ext: Vec<f64> = (0..ncomp)
            .map(|h| dust_system.mix(h).kappa_ext(ell))
            .collect();

        let mut tau0: f64 = 0.0;
        let mut s0 = 0.0;
        for segment in pp.path().segments() {
            if let Some(m) = segment.cell {
                let mut weights: Vec<f64> = (0..ncomp)
                    .map(|h| dust_system.density(m, h) * kappa_sca[h])
                    .collect();
                let ksca: f64 = weights.iter().sum();
                let kext: f64 = (0..ncomp)
                    .map(|h| dust_system.density(m, h) * kappa_ext[h])
                    .sum();
                if ksca > 0.0 {
                    for weight in &mut weights {
                        *weight /= ksca;
                    }
                    let albedo = ksca / kext;
                    let factor = albedo * (-tau0).exp() * -(-segment.dtau).exp_m1();
                    // the peel-off position is uniform within the segment;
                    // the intra-segment exponential attenuation is not
                    // corrected for
                    let s = segment.ds.mul_add(random.uniform(), s0);
                    let r_new = position + direction * s;
                    for instrument in self.instrument_system.instruments() {
                        let k_obs = instrument.observation_direction(r_new);
                        let w: f64 = weights
                            .iter()
                            .enumerate()
                            .map(|(h, weight)| {
                                weight * dust_system.mix(h).phase_function(direction, k_obs)
                            })
                            .sum();
                        ppp.launch_scattering_peel_off_at(pp, r_new, k_obs, factor * w);
                        instrument.detect(ppp);
                    }
                }
            }
            tau0 = segment.tau;
            s0 = segment.s;
        }
    }

    /// Writes the output files of all instruments and of the dust system.
    ///
    /// # Errors
    ///
    /// Returns the first write failure.
    pub fn write(&self, out_dir: &Path) -> Result<()> {
        self.instrument_system
            .write(&self.wavelength_grid, out_dir)?;
        if let Some(dust_system) = &self.dust_system {
            dust_system.write(out_dir)?;
        }
        Ok(())
    }
}

/// Splits the package luminosity into the fraction that scatters somewhere
/// along the current path and, when dust emission is enabled, deposits the
/// absorbed fractions into the crossed cells.
///
/// `expm1` keeps `1 - exp(-dtau)` accurate for optically thin segments.
fn simulate_escape_and_absorption(dust_system: &DustSystem, pp: &mut PhotonPackage) {
    let taupath = pp.path().total_tau();
    let ell = pp.ell();
    let luminosity = pp.luminosity();
    let stellar = pp.is_stellar();
    let dust_emission = dust_system.dust_emission();

    // single component: one global albedo covers the whole path
    if dust_system.ncomp() == 1 {
        let albedo = dust_system.mix(0).albedo(ell);
        let expfactor = -(-taupath).exp_m1();
        if dust_emission {
            let mut taustart: f64 = 0.0;
            for segment in pp.path().segments() {
                if let Some(m) = segment.cell {
                    let lint = luminosity * (-taustart).exp() * -(-segment.dtau).exp_m1();
                    dust_system.absorb(m, ell, (1.0 - albedo) * lint, stellar);
                }
                taustart = segment.tau;
            }
        }
        pp.set_luminosity(luminosity * albedo * expfactor);
    }
    // multiple components: the split in each cell is weighted by the density
    // contributions of the components
    else {
        let ncomp = dust_system.ncomp();
        let kappa_sca: Vec<f64> = (0..ncomp)
            .map(|h| dust_system.mix(h).kappa_sca(ell))
            .collect();
        let kappa_ext: Vec<f64> = (0..ncomp)
            .map(|h| dust_system.mix(h).kappa_ext(ell))
            .collect();
        let mut lsca = 0.0;
        let mut taustart: f64 = 0.0;
        for segment in pp.path().segments() {
            if let Some(m) = segment.cell {
                let mut ksca = 0.0;
                let mut kext = 0.0;
                for h in 0..ncomp {
                    let rho = dust_system.density(m, h);
                    ksca += rho * kappa_sca[h];
                    kext += rho * kappa_ext[h];
                }
                let albedo = if kext > 0.0 { ksca / kext } else { 0.0 };
                let lint = luminosity * (-taustart).exp() * -(-segment.dtau).exp_m1();
                lsca += albedo * lint;
                if dust_emission {
                    dust_system.absorb(m, ell, (1.0 - albedo) * lint, stellar);
                }
            }
            taustart = segment.tau;
        }
        pp.set_luminosity(lsca);
    }
}

/// Draws an interaction optical depth from the exponential truncated at the
/// path's total optical depth and moves the package there.
fn simulate_propagation(pp: &mut PhotonPackage, random: &mut RandomSource) {
    let taupath = pp.path().total_tau();
    let tau = random.exponcutoff(taupath);
    let s = pp.path().path_length(tau);
    pp.propagate(s);
}

/// Scatters the package into a new direction drawn from the phase function of
/// a dust component picked with probability `kappa_sca(h) rho(m, h)` at the
/// event's cell.
fn simulate_scattering(
    dust_system: &DustSystem,
    pp: &mut PhotonPackage,
    random: &mut RandomSource,
) -> Result<()> {
    let ell = pp.ell();
    let hmix = if dust_system.ncomp() == 1 {
        0
    } else {
        let m = dust_system
            .which_cell(pp.position())
            .ok_or(Error::ScatteringOutsideGrid)?;
        let weights: Vec<f64> = (0..dust_system.ncomp())
            .map(|h| dust_system.mix(h).kappa_sca(ell) * dust_system.density(m, h))
            .collect();
        let total: f64 = weights.iter().sum();
        let mut x = random.uniform() * total;
        let mut hmix = dust_system.ncomp() - 1;
        for (h, weight) in weights.iter().enumerate() {
            x -= weight;
            if x < 0.0 {
                hmix = h;
                break;
            }
        }
        hmix
    };
    let k_new = dust_system
        .mix(hmix)
        .generate_new_direction(pp.direction(), random);
    pp.scatter(k_new);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dust_system::DustComponent;
    use crate::geometry::PointGeometry;
    use crate::grid::{GridEnum, SphericalGrid};
    use crate::instrument::{DistantInstrument, InstrumentEnum};
    use crate::mix::{DustMix, PhaseFunction};
    use crate::stellar::StellarComponent;
    use crate::vec3::Vec3;
    use float_cmp::assert_approx_eq;

    fn options(packages: f64, threads: usize) -> KernelOptions {
        KernelOptions {
            packages,
            continuous_scattering: false,
            seed: 0,
            threads: Some(threads),
        }
    }

    fn point_stellar(luminosities: Vec<f64>) -> StellarSystem {
        StellarSystem::new(vec![StellarComponent::new(
            PointGeometry::default().into(),
            luminosities,
        )
        .unwrap()])
        .unwrap()
    }

    /// Single spherical shell of radius one with a radial optical depth
    /// `tau`, split evenly over `ncomp` identical components.
    fn slab_system(tau: f64, albedo: f64, ncomp: usize, dust_emission: bool) -> DustSystem {
        let grid: GridEnum = SphericalGrid::with_linear_mesh(1, 1.0).unwrap().into();
        let rho = tau / crate::convert::f64_from_usize(ncomp);
        let components = (0..ncomp)
            .map(|_| {
                DustComponent::new(
                    DustMix::uniform(1, 1.0, albedo, PhaseFunction::Isotropic).unwrap(),
                    vec![rho],
                )
            })
            .collect();
        DustSystem::new(grid, components, 1, dust_emission).unwrap()
    }

    fn simulation(
        packages: f64,
        threads: usize,
        nlambda: usize,
        dust_system: Option<DustSystem>,
    ) -> Result<MonteCarloSimulation> {
        let lambdas: Vec<f64> = (1..=nlambda)
            .map(|ell| 1e-6 * crate::convert::f64_from_usize(ell))
            .collect();
        MonteCarloSimulation::new(
            options(packages, threads),
            WavelengthGrid::new(lambdas).unwrap(),
            point_stellar(vec![1.0; nlambda]),
            InstrumentSystem::new(vec![InstrumentEnum::from(
                DistantInstrument::new("sed", 10.0, 0.0, 0.0, nlambda).unwrap(),
            )]),
            dust_system,
        )
    }

    #[test]
    fn rejects_package_counts_outside_the_limits() {
        let err = simulation(-1.0, 1, 1, None).unwrap_err();
        assert!(matches!(err, Error::NegativePackageCount));

        let err = simulation(1e16, 1, 1, None).unwrap_err();
        assert!(matches!(err, Error::ExcessivePackageCount));
        assert_eq!(
            err.to_string(),
            "number of photon packages is larger than implementation limit of 1e15"
        );
    }

    #[test]
    fn single_threaded_runs_use_one_chunk() {
        let simulation = simulation(1e5, 1, 1, None).unwrap();
        assert_eq!(simulation.nchunks(), 1);
        assert_eq!(simulation.chunksize(), 100_000);
        assert_approx_eq!(f64, simulation.npackages(), 1e5, ulps = 2);
    }

    #[test]
    fn chunk_policy_balances_threads_and_wavelengths() {
        // many packages: bounded below by thread balance
        let simulation1 = simulation(1e6, 8, 2, None).unwrap();
        assert_eq!(simulation1.nchunks(), 40);
        assert_eq!(simulation1.chunksize(), 25_000);
        assert_approx_eq!(f64, simulation1.npackages(), 1e6, ulps = 2);

        // few packages: a single chunk keeps the per-chunk overhead small
        let simulation2 = simulation(1e4, 8, 2, None).unwrap();
        assert_eq!(simulation2.nchunks(), 1);
        assert_eq!(simulation2.chunksize(), 10_000);
    }

    #[test]
    fn actual_package_count_covers_the_request() {
        for (packages, threads, nlambda) in
            [(999.0, 1, 1), (100_001.0, 4, 1), (12_345.0, 3, 2)]
        {
            let simulation = simulation(packages, threads, nlambda, None).unwrap();
            assert!(simulation.npackages() >= packages);
            assert_approx_eq!(
                f64,
                simulation.npackages(),
                convert::f64_from_u64(simulation.nchunks() * simulation.chunksize()),
                ulps = 2
            );
        }
    }

    #[test]
    fn zero_packages_run_is_a_no_op() {
        let simulation = simulation(0.0, 1, 1, None).unwrap();
        assert_eq!(simulation.nchunks(), 0);
        simulation.run_stellar_emission().unwrap();
    }

    #[test]
    fn empty_dust_detects_the_full_stellar_luminosity() {
        // every package is peeled off exactly once at emission
        let simulation = simulation(10.0, 1, 1, None).unwrap();
        simulation.run_stellar_emission().unwrap();

        let InstrumentEnum::DistantInstrument(instrument) =
            &simulation.instrument_system().instruments()[0];
        assert_approx_eq!(f64, instrument.total_sed()[0], 1.0, epsilon = 1e-12);
        assert_eq!(instrument.scattered_sed()[0], 0.0);
    }

    #[test]
    fn escape_and_absorption_matches_the_analytic_single_cell_values() {
        let dust_system = slab_system(1.0, 0.5, 1, true);
        let mut pp = PhotonPackage::new();
        pp.launch(1.0, 0, Vec3::ZERO, Vec3::new(0.0, 0.0, 1.0));
        pp.set_stellar_origin(0);
        dust_system.fill_optical_depth(&mut pp).unwrap();
        assert_approx_eq!(f64, pp.path().total_tau(), 1.0, epsilon = 1e-12);

        simulate_escape_and_absorption(&dust_system, &mut pp);

        let interacted = -(-1.0_f64).exp_m1();
        assert_approx_eq!(
            f64,
            dust_system.absorbed_luminosity(0, 0),
            0.5 * interacted,
            epsilon = 1e-12
        );
        assert_approx_eq!(f64, pp.luminosity(), 0.5 * interacted, epsilon = 1e-12);
    }

    #[test]
    fn multi_component_update_matches_the_single_component_one() {
        let single = slab_system(1.0, 0.5, 1, true);
        let double = slab_system(1.0, 0.5, 2, true);

        for system in [&single, &double] {
            let mut pp = PhotonPackage::new();
            pp.launch(1.0, 0, Vec3::ZERO, Vec3::new(0.0, 0.0, 1.0));
            pp.set_stellar_origin(0);
            system.fill_optical_depth(&mut pp).unwrap();
            simulate_escape_and_absorption(system, &mut pp);
            // both must agree with the analytic value
            assert_approx_eq!(
                f64,
                pp.luminosity(),
                0.5 * -(-1.0_f64).exp_m1(),
                ulps = 4
            );
        }
        assert_approx_eq!(
            f64,
            single.absorbed_luminosity(0, 0),
            double.absorbed_luminosity(0, 0),
            ulps = 4
        );
    }

    #[test]
    fn escape_and_absorption_conserves_energy() {
        // multi-shell path with dust emission: the absorbed, scattered and
        // escaped fractions must add up to the launch luminosity
        let grid: GridEnum = SphericalGrid::with_linear_mesh(5, 10.0).unwrap().into();
        let components = vec![DustComponent::new(
            DustMix::uniform(1, 0.35, 0.21, PhaseFunction::Isotropic).unwrap(),
            vec![0.9, 0.7, 0.5, 0.3, 0.1],
        )];
        let dust_system = DustSystem::new(grid, components, 1, true).unwrap();

        let mut pp = PhotonPackage::new();
        pp.launch(1.0, 0, Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0));
        pp.set_stellar_origin(0);
        dust_system.fill_optical_depth(&mut pp).unwrap();
        let taupath = pp.path().total_tau();
        simulate_escape_and_absorption(&dust_system, &mut pp);

        let absorbed = dust_system.absorbed_total();
        let escaped = (-taupath).exp();
        assert_approx_eq!(
            f64,
            absorbed + pp.luminosity() + escaped,
            1.0,
            epsilon = 1e-10
        );
    }

    #[test]
    fn propagation_stays_within_the_path() {
        let dust_system = slab_system(2.0, 0.5, 1, false);
        let mut random = RandomSource::new(13);
        for _ in 0..100 {
            let mut pp = PhotonPackage::new();
            pp.launch(1.0, 0, Vec3::ZERO, Vec3::new(0.0, 0.0, 1.0));
            dust_system.fill_optical_depth(&mut pp).unwrap();
            simulate_propagation(&mut pp, &mut random);
            assert!(pp.position().norm() <= 1.0);
            assert!(pp.path().is_empty());
        }
    }

    #[test]
    fn scattering_outside_the_grid_is_fatal() {
        let dust_system = slab_system(1.0, 0.5, 2, false);
        let mut random = RandomSource::new(19);
        let mut pp = PhotonPackage::new();
        pp.launch(1.0, 0, Vec3::new(50.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 1.0));
        let err = simulate_scattering(&dust_system, &mut pp, &mut random).unwrap_err();
        assert!(matches!(err, Error::ScatteringOutsideGrid));
        assert_eq!(
            err.to_string(),
            "the scattering event seems to take place outside the dust grid"
        );
    }

    #[test]
    fn scattering_turns_the_package() {
        let dust_system = slab_system(1.0, 0.5, 1, false);
        let mut random = RandomSource::new(23);
        let mut pp = PhotonPackage::new();
        pp.launch(1.0, 0, Vec3::ZERO, Vec3::new(0.0, 0.0, 1.0));
        simulate_scattering(&dust_system, &mut pp, &mut random).unwrap();
        assert_eq!(pp.nscatt(), 1);
        assert_approx_eq!(f64, pp.direction().norm(), 1.0, ulps = 8);
    }

    #[test]
    fn slab_run_absorbs_and_scatters() {
        // full transport through the tau = 1 slab; the first interaction
        // alone absorbs 0.5 (1 - 1/e) of the launched luminosity, further
        // scatterings only add to that
        let simulation = simulation(2000.0, 2, 1, Some(slab_system(1.0, 0.5, 1, true))).unwrap();
        simulation.run_stellar_emission().unwrap();

        let absorbed = simulation.dust_system().unwrap().absorbed_total();
        let first_interaction = 0.5 * -(-1.0_f64).exp_m1();
        assert!(absorbed > first_interaction);
        assert!(absorbed < 1.0);

        let InstrumentEnum::DistantInstrument(instrument) =
            &simulation.instrument_system().instruments()[0];
        assert!(instrument.scattered_sed()[0] > 0.0);
    }
}
