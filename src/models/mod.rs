//! Ready-made models built on the public authoring surface. Each module
//! provides the geometry the model expects and a function assembling the
//! model with sensible default parameters.

pub mod diffusion;
pub mod electrolyte;
pub mod particle;
