pub mod estimate;
pub mod interpolation;
pub mod radiation;
