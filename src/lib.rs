pub mod config;
pub mod cube_store;
pub mod enriched;
pub mod error;
pub mod handlers;
pub mod models;
pub mod planner;
pub mod preview;
pub mod rolling;
pub mod rounds;
pub mod scanner;
pub mod sql;

use std::path::PathBuf;
use std::sync::Arc;

use config::PlanConfig;
use cube_store::CubeStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<CubeStore>,
    pub rounds_dir: PathBuf,
    pub plan: PlanConfig,
}
