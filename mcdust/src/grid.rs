//! Module containing the dust grid capability and the concrete grid shapes.

use crate::error::{Error, Result};
use crate::path::DustGridPath;
use crate::random::RandomSource;
use crate::vec3::Vec3;
use enum_dispatch::enum_dispatch;
use std::f64::consts::PI;

/// Capability interface implemented by every dust grid shape.
///
/// A grid decomposes space into cells and produces, for a given starting
/// position and direction, the ordered list of cell crossings a photon
/// package traverses. The hot path only ever touches [`Self::which_cell`] and
/// [`Self::fill_path`].
#[enum_dispatch]
pub trait DustGrid {
    /// Returns the cell containing `r`, or `None` when `r` lies outside the
    /// grid.
    fn which_cell(&self, r: Vec3) -> Option<usize>;

    /// Fills `path` with the cell crossings seen from its starting position
    /// along its direction. Segments outside the grid carry cell `None`.
    ///
    /// # Errors
    ///
    /// Returns an error when the starting cell of a position on the grid
    /// boundary cannot be determined.
    fn fill_path(&self, path: &mut DustGridPath) -> Result<()>;

    /// Returns the number of cells.
    fn ncells(&self) -> usize;

    /// Returns the volume of cell `m`.
    fn volume(&self, m: usize) -> f64;

    /// Returns the central position of cell `m`.
    fn central_position(&self, m: usize) -> Vec3;

    /// Returns a random position inside cell `m`.
    fn random_position(&self, m: usize, random: &mut RandomSource) -> Vec3;

    /// Returns the intrinsic dimension of the grid symmetry (1, 2 or 3).
    fn dimension(&self) -> usize;

    /// Returns an upper bound on the number of segments of any path through
    /// this grid, used to pre-size path vectors.
    fn max_path_segments(&self) -> usize;
}

/// The closed set of grid shapes known to the engine.
#[enum_dispatch(DustGrid)]
#[derive(Clone, Debug)]
pub enum GridEnum {
    /// Concentric spherical shells around the origin.
    SphericalGrid,
    /// Axis-aligned rectangular cells.
    CartesianGrid,
}

/// One-dimensional grid of concentric spherical shells.
///
/// Shell `i` spans the radii `borders[i]..borders[i + 1]`; the innermost
/// border is the origin and the outermost border is the grid radius.
#[derive(Clone, Debug)]
pub struct SphericalGrid {
    borders: Vec<f64>,
}

impl SphericalGrid {
    /// Creates a grid from shell border radii starting at zero.
    ///
    /// # Errors
    ///
    /// Returns an error unless the borders start at zero and are strictly
    /// increasing, with at least one shell.
    pub fn new(borders: Vec<f64>) -> Result<Self> {
        if borders.len() < 2 {
            return Err(Error::InvalidConfiguration(
                "a spherical grid needs at least one shell".to_owned(),
            ));
        }
        if borders[0] != 0.0 {
            return Err(Error::InvalidConfiguration(
                "the innermost border of a spherical grid must be zero".to_owned(),
            ));
        }
        if borders.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(Error::InvalidConfiguration(
                "shell borders must be strictly increasing".to_owned(),
            ));
        }
        Ok(Self { borders })
    }

    /// Creates a grid of `nshells` equally thick shells out to `rmax`.
    ///
    /// # Errors
    ///
    /// Returns an error when `nshells` is zero or `rmax` is not positive.
    pub fn with_linear_mesh(nshells: usize, rmax: f64) -> Result<Self> {
        if nshells == 0 || rmax <= 0.0 {
            return Err(Error::InvalidConfiguration(
                "a spherical grid needs a positive shell count and radius".to_owned(),
            ));
        }
        let nr = crate::convert::f64_from_usize(nshells);
        Self::new(
            (0..=nshells)
                .map(|i| rmax * crate::convert::f64_from_usize(i) / nr)
                .collect(),
        )
    }

    fn nshells(&self) -> usize {
        self.borders.len() - 1
    }

    fn rmax(&self) -> f64 {
        *self.borders.last().unwrap()
    }

    /// Returns the shell containing radius `r`, or `None` when `r` lies on or
    /// beyond the outermost border.
    fn which_shell(&self, r: f64) -> Option<usize> {
        let count = self.borders.partition_point(|&border| border <= r);
        (count >= 1 && count <= self.nshells()).then(|| count - 1)
    }
}

impl DustGrid for SphericalGrid {
    fn which_cell(&self, r: Vec3) -> Option<usize> {
        self.which_shell(r.norm())
    }

    fn fill_path(&self, path: &mut DustGridPath) -> Result<()> {
        let nr = self.nshells();
        let rmax = self.rmax();

        let mut r = path.position().norm();
        let mut q = path.position().dot(path.direction());
        let p = ((r - q) * (r + q)).max(0.0).sqrt();

        // a package outside the grid either misses it entirely or is advanced
        // to the outer border (minus a small nudge) over an exterior segment
        if r > rmax {
            if q > 0.0 || p > rmax {
                return Ok(());
            }
            r = rmax - 1e-8 * (self.borders[nr] - self.borders[nr - 1]);
            let qmax = ((rmax - p) * (rmax + p)).sqrt();
            path.add_segment(None, -q - qmax);
            q = -qmax;
        }

        let Some(mut i) = self.which_shell(r) else {
            return Err(Error::PathStartsOutsideGrid);
        };

        // inward leg down to the shell holding the tangent point
        if q < 0.0 {
            let imin = self.which_shell(p).unwrap_or(0);
            while i > imin {
                let r_inner = self.borders[i];
                let q_next = -((r_inner - p) * (r_inner + p)).max(0.0).sqrt();
                path.add_segment(Some(i), q_next - q);
                q = q_next;
                i -= 1;
            }
        }

        // outward leg
        loop {
            let r_outer = self.borders[i + 1];
            let q_next = ((r_outer - p) * (r_outer + p)).max(0.0).sqrt();
            path.add_segment(Some(i), q_next - q);
            i += 1;
            if i >= nr - 1 {
                return Ok(());
            }
            q = q_next;
        }
    }

    fn ncells(&self) -> usize {
        self.nshells()
    }

    fn volume(&self, m: usize) -> f64 {
        let r_inner = self.borders[m];
        let r_outer = self.borders[m + 1];
        4.0 * PI / 3.0
            * (r_outer - r_inner)
            * r_outer.mul_add(r_outer, r_outer.mul_add(r_inner, r_inner * r_inner))
    }

    fn central_position(&self, m: usize) -> Vec3 {
        Vec3::new(0.5 * (self.borders[m] + self.borders[m + 1]), 0.0, 0.0)
    }

    fn random_position(&self, m: usize, random: &mut RandomSource) -> Vec3 {
        let r = (self.borders[m + 1] - self.borders[m]).mul_add(random.uniform(), self.borders[m]);
        random.direction() * r
    }

    fn dimension(&self) -> usize {
        1
    }

    fn max_path_segments(&self) -> usize {
        2 * self.nshells() + 2
    }
}

/// Three-dimensional grid of axis-aligned rectangular cells.
#[derive(Clone, Debug)]
pub struct CartesianGrid {
    xborders: Vec<f64>,
    yborders: Vec<f64>,
    zborders: Vec<f64>,
}

fn validate_axis(borders: &[f64], axis: &str) -> Result<()> {
    if borders.len() < 2 {
        return Err(Error::InvalidConfiguration(format!(
            "the {axis} axis of a cartesian grid needs at least one cell"
        )));
    }
    if borders.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(Error::InvalidConfiguration(format!(
            "the {axis} borders of a cartesian grid must be strictly increasing"
        )));
    }
    Ok(())
}

fn axis_cell(borders: &[f64], v: f64) -> Option<usize> {
    let count = borders.partition_point(|&border| border <= v);
    (count >= 1 && count < borders.len()).then(|| count - 1)
}

fn next_crossing(borders: &[f64], i: usize, r: f64, k: f64) -> f64 {
    if k > 0.0 {
        (borders[i + 1] - r) / k
    } else if k < 0.0 {
        (borders[i] - r) / k
    } else {
        f64::INFINITY
    }
}

impl CartesianGrid {
    /// Creates a grid from the border planes along each axis.
    ///
    /// # Errors
    ///
    /// Returns an error unless every axis has at least one cell with strictly
    /// increasing borders.
    pub fn new(xborders: Vec<f64>, yborders: Vec<f64>, zborders: Vec<f64>) -> Result<Self> {
        validate_axis(&xborders, "x")?;
        validate_axis(&yborders, "y")?;
        validate_axis(&zborders, "z")?;
        Ok(Self {
            xborders,
            yborders,
            zborders,
        })
    }

    fn shape(&self) -> (usize, usize, usize) {
        (
            self.xborders.len() - 1,
            self.yborders.len() - 1,
            self.zborders.len() - 1,
        )
    }

    fn cell_index(&self, ix: usize, iy: usize, iz: usize) -> usize {
        let (_, ny, nz) = self.shape();
        (ix * ny + iy) * nz + iz
    }

    fn diagonal(&self) -> f64 {
        let dx = self.xborders.last().unwrap() - self.xborders[0];
        let dy = self.yborders.last().unwrap() - self.yborders[0];
        let dz = self.zborders.last().unwrap() - self.zborders[0];
        Vec3::new(dx, dy, dz).norm()
    }
}

impl DustGrid for CartesianGrid {
    fn which_cell(&self, r: Vec3) -> Option<usize> {
        let ix = axis_cell(&self.xborders, r.x)?;
        let iy = axis_cell(&self.yborders, r.y)?;
        let iz = axis_cell(&self.zborders, r.z)?;
        Some(self.cell_index(ix, iy, iz))
    }

    fn fill_path(&self, path: &mut DustGridPath) -> Result<()> {
        let r0 = path.position();
        let k = path.direction();
        let (nx, ny, nz) = self.shape();

        // clip the ray against the bounding box
        let mut t_entry = 0.0_f64;
        let mut t_exit = f64::INFINITY;
        for (lo, hi, r, kc) in [
            (self.xborders[0], self.xborders[nx], r0.x, k.x),
            (self.yborders[0], self.yborders[ny], r0.y, k.y),
            (self.zborders[0], self.zborders[nz], r0.z, k.z),
        ] {
            if kc == 0.0 {
                if r < lo || r >= hi {
                    return Ok(());
                }
            } else {
                let t1 = (lo - r) / kc;
                let t2 = (hi - r) / kc;
                t_entry = t_entry.max(t1.min(t2));
                t_exit = t_exit.min(t1.max(t2));
            }
        }
        if t_exit <= t_entry {
            return Ok(());
        }

        // the starting cell is read off a nudged entry point so that a
        // package sitting exactly on a border lands in the cell ahead
        let start = r0 + k * (t_entry + 1e-12 * self.diagonal());
        let (Some(mut ix), Some(mut iy), Some(mut iz)) = (
            axis_cell(&self.xborders, start.x),
            axis_cell(&self.yborders, start.y),
            axis_cell(&self.zborders, start.z),
        ) else {
            return Ok(());
        };
        if t_entry > 0.0 {
            path.add_segment(None, t_entry);
        }

        let mut t = t_entry;
        loop {
            let tx = next_crossing(&self.xborders, ix, r0.x, k.x);
            let ty = next_crossing(&self.yborders, iy, r0.y, k.y);
            let tz = next_crossing(&self.zborders, iz, r0.z, k.z);
            let t_next = tx.min(ty).min(tz);

            path.add_segment(Some(self.cell_index(ix, iy, iz)), t_next - t);
            t = t_next;

            if t_next >= tx {
                if k.x > 0.0 {
                    ix += 1;
                    if ix == nx {
                        return Ok(());
                    }
                } else if ix == 0 {
                    return Ok(());
                } else {
                    ix -= 1;
                }
            }
            if t_next >= ty {
                if k.y > 0.0 {
                    iy += 1;
                    if iy == ny {
                        return Ok(());
                    }
                } else if iy == 0 {
                    return Ok(());
                } else {
                    iy -= 1;
                }
            }
            if t_next >= tz {
                if k.z > 0.0 {
                    iz += 1;
                    if iz == nz {
                        return Ok(());
                    }
                } else if iz == 0 {
                    return Ok(());
                } else {
                    iz -= 1;
                }
            }
        }
    }

    fn ncells(&self) -> usize {
        let (nx, ny, nz) = self.shape();
        nx * ny * nz
    }

    fn volume(&self, m: usize) -> f64 {
        let (_, ny, nz) = self.shape();
        let ix = m / (ny * nz);
        let iy = (m / nz) % ny;
        let iz = m % nz;
        (self.xborders[ix + 1] - self.xborders[ix])
            * (self.yborders[iy + 1] - self.yborders[iy])
            * (self.zborders[iz + 1] - self.zborders[iz])
    }

    fn central_position(&self, m: usize) -> Vec3 {
        let (_, ny, nz) = self.shape();
        let ix = m / (ny * nz);
        let iy = (m / nz) % ny;
        let iz = m % nz;
        Vec3::new(
            0.5 * (self.xborders[ix] + self.xborders[ix + 1]),
            0.5 * (self.yborders[iy] + self.yborders[iy + 1]),
            0.5 * (self.zborders[iz] + self.zborders[iz + 1]),
        )
    }

    fn random_position(&self, m: usize, random: &mut RandomSource) -> Vec3 {
        let (_, ny, nz) = self.shape();
        let ix = m / (ny * nz);
        let iy = (m / nz) % ny;
        let iz = m % nz;
        Vec3::new(
            (self.xborders[ix + 1] - self.xborders[ix])
                .mul_add(random.uniform(), self.xborders[ix]),
            (self.yborders[iy + 1] - self.yborders[iy])
                .mul_add(random.uniform(), self.yborders[iy]),
            (self.zborders[iz + 1] - self.zborders[iz])
                .mul_add(random.uniform(), self.zborders[iz]),
        )
    }

    fn dimension(&self) -> usize {
        3
    }

    fn max_path_segments(&self) -> usize {
        let (nx, ny, nz) = self.shape();
        nx + ny + nz + 2
    }
}
