// src/state.rs

use std::sync::Arc;

use axum::extract::FromRef;

use crate::{
    config::Config,
    repository::Repository,
    services::{backfill::ExplanationBackfill, enrichment::Enricher},
};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repository>,
    pub enricher: Arc<dyn Enricher>,
    pub backfill: Arc<ExplanationBackfill>,
    pub config: Config,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repository>, enricher: Arc<dyn Enricher>, config: Config) -> Self {
        let backfill = Arc::new(ExplanationBackfill::new(repo.clone(), enricher.clone()));
        Self {
            repo,
            enricher,
            backfill,
            config,
        }
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
