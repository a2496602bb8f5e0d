pub mod estimate_controller;
pub mod monitoring_controller;
