//! Collaborator-facing facade.
//!
//! [`Assistant`] wires the bootstrap manager, vector store, embedder, loader
//! and completion proxy together and exposes the operations a route layer
//! or the CLI needs: setup, status, ingest, clear, search, and
//! retrieve-and-generate.

use anyhow::Result;
use futures_util::stream::BoxStream;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::bootstrap::BootstrapManager;
use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::error::{AssistantError, BootstrapError, PipelineError};
use crate::generate::CompletionProxy;
use crate::ingest::{ingest_tree, IngestReport, IngestSettings};
use crate::install::{select_strategy, InstallStrategy};
use crate::loader::{DocumentLoader, FileLoader};
use crate::models::{RuntimePhase, RuntimeState, ScoredRecord, SetupProgress};
use crate::progress::{NoProgress, ProgressReporter};
use crate::registry::is_present;
use crate::retrieve::{build_prompt, retrieve};
use crate::runtime::OllamaRuntime;
use crate::store::{TableSpec, VectorStore};

/// Message returned when generation is requested before setup finished.
pub const MODEL_NOT_INSTALLED: &str = "Model not installed. Please complete setup first.";

/// Snapshot returned by [`Assistant::status`].
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub installed: bool,
    pub running: bool,
    pub models_installed: BTreeMap<String, bool>,
    pub progress: SetupProgress,
    pub error: Option<String>,
    /// Set when the vector store could not be initialised.
    pub store_degraded: Option<String>,
}

pub struct Assistant {
    config: Config,
    bootstrap: Arc<BootstrapManager>,
    store: VectorStore,
    embedder: Arc<dyn Embedder>,
    loader: Arc<dyn DocumentLoader>,
    proxy: CompletionProxy,
}

impl Assistant {
    /// Build the production wiring from `config`.
    pub async fn new(config: Config) -> Result<Self> {
        let installer: Arc<dyn InstallStrategy> = Arc::from(select_strategy(&config.runtime));
        let runtime = Arc::new(OllamaRuntime::new(
            &config.runtime.endpoint,
            config.runtime.binary.clone(),
            installer.executable_path(),
        ));
        let bootstrap = BootstrapManager::new(runtime, installer, config.model_registry())
            .with_grace_period(Duration::from_secs(config.runtime.start_grace_secs));

        let store = VectorStore::open(&config.db.path, Self::table_spec(&config)).await?;
        let embedder = create_embedder(&config)?;

        Self::from_parts(config, Arc::new(bootstrap), store, embedder, Arc::new(FileLoader))
    }

    /// Assemble from explicit components.
    pub fn from_parts(
        config: Config,
        bootstrap: Arc<BootstrapManager>,
        store: VectorStore,
        embedder: Arc<dyn Embedder>,
        loader: Arc<dyn DocumentLoader>,
    ) -> Result<Self> {
        let proxy = CompletionProxy::new(&config.runtime.endpoint, &config.runtime.generation_model)?;
        Ok(Self {
            config,
            bootstrap,
            store,
            embedder,
            loader,
            proxy,
        })
    }

    /// Document table layout for `config`.
    pub fn table_spec(config: &Config) -> TableSpec {
        TableSpec::new(&config.db.table, config.embedding.dims, config.db.metric)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub fn bootstrap(&self) -> &Arc<BootstrapManager> {
        &self.bootstrap
    }

    /// Run setup to completion, reporting progress to `sink`.
    pub async fn ensure_ready(
        &self,
        sink: Arc<dyn ProgressReporter>,
    ) -> Result<RuntimeState, BootstrapError> {
        self.bootstrap.ensure_ready(sink).await
    }

    /// Start setup in the background; poll [`status`](Self::status) for progress.
    pub fn spawn_setup(&self) -> JoinHandle<Result<RuntimeState, BootstrapError>> {
        self.bootstrap.spawn_setup(Arc::new(NoProgress))
    }

    pub async fn status(&self) -> StatusReport {
        let state = self.bootstrap.observe().await;
        let progress = self.bootstrap.progress();
        let models_installed = self
            .bootstrap
            .registry()
            .models()
            .iter()
            .map(|m| (m.clone(), is_present(m, &state.models)))
            .collect();

        StatusReport {
            installed: state.phase >= RuntimePhase::Installed,
            running: state.phase >= RuntimePhase::Running,
            models_installed,
            error: progress.error.clone(),
            progress,
            store_degraded: self.store.degraded_reason(),
        }
    }

    /// Ingest a file or directory. Returns one report per document.
    pub async fn ingest(&self, path: &Path) -> Result<Vec<IngestReport>, AssistantError> {
        let reports = ingest_tree(
            &self.store,
            self.embedder.as_ref(),
            self.loader.as_ref(),
            IngestSettings::from_config(&self.config),
            path,
        )
        .await?;
        Ok(reports)
    }

    pub async fn clear(&self) -> Result<(), AssistantError> {
        self.store.clear().await.map_err(PipelineError::from)?;
        tracing::info!(table = %self.store.spec().name, "vector store cleared");
        Ok(())
    }

    /// Nearest stored chunks for `query`.
    pub async fn search(&self, query: &str, k: i64) -> Result<Vec<ScoredRecord>, AssistantError> {
        Ok(retrieve(&self.store, self.embedder.as_ref(), query, k).await?)
    }

    /// Retrieve context for `query` and stream the model's answer.
    ///
    /// Fails with [`AssistantError::EmptyQuery`] for a blank query and with
    /// [`AssistantError::NotReady`] when the runtime is not serving the
    /// generation model. Failures after the stream starts are
    /// folded into it as a final `Error:` fragment.
    pub async fn retrieve_and_generate(
        &self,
        query: &str,
    ) -> Result<BoxStream<'static, String>, AssistantError> {
        if query.trim().is_empty() {
            return Err(AssistantError::EmptyQuery);
        }
        self.check_generation_ready().await?;
        let records = retrieve(
            &self.store,
            self.embedder.as_ref(),
            query,
            self.config.retrieval.top_k,
        )
        .await?;
        let prompt = build_prompt(query, &records);
        tracing::debug!(context = records.len(), model = self.proxy.model(), "generating answer");
        Ok(self.proxy.generate(&prompt))
    }

    async fn check_generation_ready(&self) -> Result<(), AssistantError> {
        let runtime = self.bootstrap.runtime();
        let models = runtime.installed_models().await.map_err(|e| {
            AssistantError::NotReady(format!(
                "Model runtime is not reachable ({}). Please complete setup first.",
                e
            ))
        })?;
        if !is_present(&self.config.runtime.generation_model, &models) {
            return Err(AssistantError::NotReady(MODEL_NOT_INSTALLED.to_string()));
        }
        Ok(())
    }
}
