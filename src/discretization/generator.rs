use tracing::debug;

use super::mesh::{CoordinateSystem, Mesh, SubMesh};
use crate::error::{Error, Result};

/// A named interval of the simulation domain.
#[derive(Clone, Debug, PartialEq)]
pub struct Region {
    pub name: String,
    pub start: f64,
    pub end: f64,
    pub coordinates: CoordinateSystem,
}

/// Ordered regions to be meshed. Regions on the same axis are glued where
/// one ends and the next begins; regions on separate axes (e.g. an electrode
/// and the particles inside it) simply never touch.
#[derive(Clone, Debug, Default)]
pub struct Geometry {
    regions: Vec<Region>,
}

impl Geometry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn region(self, name: impl Into<String>, start: f64, end: f64) -> Self {
        self.with_region(name, start, end, CoordinateSystem::Cartesian)
    }

    pub fn spherical_region(self, name: impl Into<String>, start: f64, end: f64) -> Self {
        self.with_region(name, start, end, CoordinateSystem::Spherical)
    }

    pub fn with_region(
        mut self,
        name: impl Into<String>,
        start: f64,
        end: f64,
        coordinates: CoordinateSystem,
    ) -> Self {
        self.regions.push(Region {
            name: name.into(),
            start,
            end,
            coordinates,
        });
        self
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }
}

/// `npts + 1` evenly spaced edges; the last edge is exactly `end` so the
/// widths add up to the region length.
pub fn uniform_edges(start: f64, end: f64, npts: usize) -> Vec<f64> {
    let length = end - start;
    (0..=npts)
        .map(|i| {
            if i == npts {
                end
            } else {
                start + length * i as f64 / npts as f64
            }
        })
        .collect()
}

/// Builds a uniform mesh with the requested number of cells per region.
pub fn build_mesh(geometry: &Geometry, points: &[(&str, usize)]) -> Result<Mesh> {
    if geometry.regions().is_empty() {
        return Err(Error::InvalidGeometry("geometry has no regions".into()));
    }
    let mut regions = Vec::with_capacity(geometry.regions().len());
    for region in geometry.regions() {
        if regions.iter().any(|(name, _): &(String, SubMesh)| *name == region.name) {
            return Err(Error::InvalidGeometry(format!(
                "region `{}` is defined twice",
                region.name
            )));
        }
        let length = region.end - region.start;
        if !length.is_finite() || length <= 0.0 {
            return Err(Error::InvalidGeometry(format!(
                "region `{}` has non-positive length {length}",
                region.name
            )));
        }
        let npts = points
            .iter()
            .find(|(name, _)| *name == region.name)
            .map(|&(_, n)| n)
            .ok_or_else(|| {
                Error::InvalidGeometry(format!("no point count given for `{}`", region.name))
            })?;
        if npts == 0 {
            return Err(Error::InvalidGeometry(format!(
                "region `{}` needs at least one cell",
                region.name
            )));
        }
        let submesh = SubMesh::from_edges(
            uniform_edges(region.start, region.end, npts),
            region.coordinates,
        )?;
        debug!(region = %region.name, npts, length, "meshed region");
        regions.push((region.name.clone(), submesh));
    }
    Ok(Mesh::from_regions(regions))
}

impl Mesh {
    pub fn build(geometry: &Geometry, points: &[(&str, usize)]) -> Result<Mesh> {
        build_mesh(geometry, points)
    }
}
