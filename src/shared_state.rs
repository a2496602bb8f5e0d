use std::sync::Arc;

use crate::services::solar_data_service::SolarDataService;

#[derive(Clone)]
pub struct AppState {
    /// Resolution facade shared by every handler
    pub service: Arc<SolarDataService>,
}

impl AppState {
    pub fn new(service: SolarDataService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}
