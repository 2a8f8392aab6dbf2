pub mod engine;
pub mod generator;
pub mod mesh;

pub use engine::{Discretisation, DiscretisationOptions};
pub use generator::{build_mesh, uniform_edges, Geometry, Region};
pub use mesh::{CoordinateSystem, Interface, Mesh, SubMesh};
