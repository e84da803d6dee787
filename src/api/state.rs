use std::sync::Arc;

use crate::config::FleetConfig;
use crate::detect::Evaluator;
use crate::history::HistoryProvider;
use crate::storage::{Pool, SqliteHistory};

#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub evaluator: Evaluator,
    pub history: Arc<dyn HistoryProvider>,
}

impl AppState {
    pub fn new(pool: Pool, cfg: &FleetConfig) -> Self {
        let history = Arc::new(SqliteHistory::new(pool.clone(), cfg.server.history_limit));
        Self {
            pool,
            evaluator: Evaluator::from_config(cfg),
            history,
        }
    }
}
