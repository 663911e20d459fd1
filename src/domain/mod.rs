// Domain layer - timing, geometry and encoding models

pub mod model;
pub mod transform;
