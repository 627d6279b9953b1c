use std::sync::Arc;

use ecocab_dispatch::{DispatchEngine, RideLifecycle};
use ecocab_domain::{Clock, DeviceRegistry, RideStore};
use ecocab_store::app_config::DispatchRules;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<dyn DeviceRegistry>,
    pub rides: Arc<dyn RideStore>,
    pub engine: Arc<DispatchEngine>,
    pub lifecycle: Arc<RideLifecycle>,
    pub clock: Arc<dyn Clock>,
    pub rules: DispatchRules,
}
