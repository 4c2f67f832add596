//! One test session: schema fetch to teardown. Each session owns its own
//! catalog loader, request template cache and run history, so multiple
//! sessions (and multiple runs per session) coexist in one process without
//! shared global state.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use uuid::Uuid;

use crate::catalog::{CatalogLoader, SchemaCatalog};
use crate::error::EngineError;
use crate::metrics::RunSnapshot;
use crate::scheduler::{self, RunHandle};
use crate::synth::RequestTemplates;
use crate::types::{GeneratedRequest, RequestOutcome, RunConfig, RunState};

/// A finalized run: terminal state, last snapshot and the raw outcome list.
/// Read-only once archived, never mutated again.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedRun {
    #[serde(rename = "runId")]
    pub run_id: Uuid,
    pub state: RunState,
    pub snapshot: RunSnapshot,
    pub outcomes: Vec<RequestOutcome>,
}

pub struct TestSession {
    loader: CatalogLoader,
    templates: Arc<Mutex<RequestTemplates>>,
    history: Arc<Mutex<Vec<CompletedRun>>>,
}

impl TestSession {
    pub fn new() -> Self {
        Self::with_templates(RequestTemplates::new())
    }

    /// Session with deterministic request synthesis.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_templates(RequestTemplates::with_seed(seed))
    }

    fn with_templates(templates: RequestTemplates) -> Self {
        Self {
            loader: CatalogLoader::new(),
            templates: Arc::new(Mutex::new(templates)),
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fetches and parses the schema document, cached by URL for the life of
    /// the session.
    pub async fn load_catalog(&mut self, url: &str) -> Result<Arc<SchemaCatalog>, EngineError> {
        self.loader.load(url).await
    }

    /// One request template per catalog endpoint. Calling this twice on an
    /// unchanged catalog yields structurally identical lists.
    pub fn generate_all_requests(
        &self,
        catalog: &SchemaCatalog,
    ) -> Result<Vec<GeneratedRequest>, EngineError> {
        self.templates.lock().unwrap().generate_all(catalog)
    }

    /// Validates the config and starts a run. The returned handle exposes
    /// `snapshot()`, `cancel()` and `wait()`; the finalized run is archived
    /// into this session's history once it reaches a terminal state.
    pub fn start_run(&self, config: RunConfig) -> Result<RunHandle, EngineError> {
        scheduler::start_run(config, self.templates.clone(), self.history.clone())
    }

    pub fn history(&self) -> Vec<CompletedRun> {
        self.history.lock().unwrap().clone()
    }
}

impl Default for TestSession {
    fn default() -> Self {
        Self::new()
    }
}
