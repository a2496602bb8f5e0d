pub mod estimate_routes;
pub mod monitoring_routes;
