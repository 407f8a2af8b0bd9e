use actix::Addr;
use std::sync::Arc;

use crate::config::Config;
use crate::db::MongoDB;
use crate::microclimate_hub::MicroclimateHub;

#[derive(Clone)]
pub struct AppState {
    pub hub: Addr<MicroclimateHub>,
    pub mongodb: Arc<MongoDB>,
    pub config: Config,
}
