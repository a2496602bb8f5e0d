pub mod cascade;
pub mod coalescer;
pub mod collaborators;
pub mod exact_cache;
pub mod interpolation_engine;
pub mod metrics;
pub mod model_builder;
pub mod panel_response;
pub mod providers;
pub mod proximity_cache;
pub mod resilience;
pub mod solar_data_service;
pub mod solar_geometry;
