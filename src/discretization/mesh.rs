use crate::error::{Error, Result};

/// Coordinate system of a region. Fixes how fluxes and volumes scale with
/// position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CoordinateSystem {
    #[default]
    Cartesian,
    /// Radial coordinate of a sphere.
    Spherical,
}

/// A 1D sequence of cells.
#[derive(Clone, Debug, PartialEq)]
pub struct SubMesh {
    /// Cell boundaries, `npts + 1` entries, strictly increasing.
    pub edges: Vec<f64>,
    /// Cell centres.
    pub nodes: Vec<f64>,
    /// Cell widths (`edges[i + 1] - edges[i]`).
    pub d_edges: Vec<f64>,
    /// Distances between neighbouring cell centres, `npts - 1` entries.
    pub d_nodes: Vec<f64>,
    pub coordinates: CoordinateSystem,
}

impl SubMesh {
    pub fn from_edges(edges: Vec<f64>, coordinates: CoordinateSystem) -> Result<Self> {
        if edges.len() < 2 {
            return Err(Error::InvalidGeometry(
                "a sub-mesh needs at least one cell".into(),
            ));
        }
        if edges.iter().any(|e| !e.is_finite()) || edges.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::InvalidGeometry(
                "cell edges must be finite and strictly increasing".into(),
            ));
        }
        if coordinates == CoordinateSystem::Spherical && edges[0] < 0.0 {
            return Err(Error::InvalidGeometry(
                "spherical regions cannot extend below r = 0".into(),
            ));
        }
        let nodes: Vec<f64> = edges.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect();
        let d_edges = edges.windows(2).map(|w| w[1] - w[0]).collect();
        let d_nodes = nodes.windows(2).map(|w| w[1] - w[0]).collect();
        Ok(Self {
            edges,
            nodes,
            d_edges,
            d_nodes,
            coordinates,
        })
    }

    pub fn npts(&self) -> usize {
        self.nodes.len()
    }

    pub fn start(&self) -> f64 {
        self.edges[0]
    }

    pub fn end(&self) -> f64 {
        self.edges[self.edges.len() - 1]
    }

    pub fn length(&self) -> f64 {
        self.end() - self.start()
    }

    /// Cell measures used for integration: widths in Cartesian coordinates,
    /// shell volumes in spherical ones.
    pub fn volumes(&self) -> Vec<f64> {
        match self.coordinates {
            CoordinateSystem::Cartesian => self.d_edges.clone(),
            CoordinateSystem::Spherical => self
                .edges
                .windows(2)
                .map(|w| 4.0 * std::f64::consts::PI * (w[1].powi(3) - w[0].powi(3)) / 3.0)
                .collect(),
        }
    }
}

/// Shared boundary between two adjacent regions, with the boundary cell on
/// either side (indices local to each region's sub-mesh).
#[derive(Clone, Debug, PartialEq)]
pub struct Interface {
    pub left: String,
    pub right: String,
    pub position: f64,
    pub left_cell: usize,
    pub right_cell: usize,
}

/// Named sub-meshes in geometry order.
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    regions: Vec<(String, SubMesh)>,
}

impl Mesh {
    pub(crate) fn from_regions(regions: Vec<(String, SubMesh)>) -> Self {
        Self { regions }
    }

    pub fn regions(&self) -> impl Iterator<Item = (&str, &SubMesh)> {
        self.regions.iter().map(|(name, mesh)| (name.as_str(), mesh))
    }

    pub fn submesh(&self, name: &str) -> Result<&SubMesh> {
        self.regions
            .iter()
            .find(|(region, _)| region == name)
            .map(|(_, mesh)| mesh)
            .ok_or_else(|| Error::InvalidGeometry(format!("no region named `{name}`")))
    }

    /// Total number of cells over a (possibly composite) domain.
    pub fn npts(&self, domain: &[String]) -> Result<usize> {
        domain
            .iter()
            .map(|name| self.submesh(name).map(SubMesh::npts))
            .sum()
    }

    /// Glues the sub-meshes of `domain` into one, checking that consecutive
    /// regions share their internal boundary.
    pub fn combine(&self, domain: &[String]) -> Result<SubMesh> {
        let Some((first, rest)) = domain.split_first() else {
            return Err(Error::InvalidGeometry("cannot combine an empty domain".into()));
        };
        let mut combined = self.submesh(first)?.clone();
        let mut previous = first;
        for name in rest {
            let next = self.submesh(name)?;
            if next.coordinates != combined.coordinates {
                return Err(Error::InvalidGeometry(format!(
                    "regions `{previous}` and `{name}` use different coordinate systems"
                )));
            }
            if !coincident(combined.end(), next.start()) {
                return Err(Error::InvalidGeometry(format!(
                    "regions `{previous}` and `{name}` are not adjacent ({} vs {})",
                    combined.end(),
                    next.start()
                )));
            }
            let mut edges = combined.edges;
            edges.extend_from_slice(&next.edges[1..]);
            combined = SubMesh::from_edges(edges, next.coordinates)?;
            previous = name;
        }
        Ok(combined)
    }

    /// All internal boundaries between consecutive, touching regions.
    pub fn interfaces(&self) -> Vec<Interface> {
        self.regions
            .windows(2)
            .filter(|pair| coincident(pair[0].1.end(), pair[1].1.start()))
            .map(|pair| interface_between(&pair[0], &pair[1]))
            .collect()
    }

    pub fn interface(&self, left: &str, right: &str) -> Result<Interface> {
        self.interfaces()
            .into_iter()
            .find(|i| i.left == left && i.right == right)
            .ok_or_else(|| {
                Error::InvalidGeometry(format!("regions `{left}` and `{right}` do not touch"))
            })
    }
}

fn interface_between(left: &(String, SubMesh), right: &(String, SubMesh)) -> Interface {
    Interface {
        left: left.0.clone(),
        right: right.0.clone(),
        position: left.1.end(),
        left_cell: left.1.npts() - 1,
        right_cell: 0,
    }
}

fn coincident(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-12 * a.abs().max(b.abs()).max(1.0)
}
