use axum::extract::FromRef;

use crate::mixing::MixManager;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedMixManager = Arc<MixManager>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub mix_manager: GuardedMixManager,
}

impl ServerState {
    pub fn new(config: ServerConfig, mix_manager: GuardedMixManager) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            mix_manager,
        }
    }
}

impl FromRef<ServerState> for GuardedMixManager {
    fn from_ref(input: &ServerState) -> Self {
        input.mix_manager.clone()
    }
}
