use std::sync::Arc;

use models::{EventBus, RecordStore, StateStore};

use crate::carrier::CarrierClient;
use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StateStore>,
    pub records: Arc<dyn RecordStore>,
    pub events: EventBus,
    pub carrier: Arc<CarrierClient>,
    pub config: Arc<Config>,
}
