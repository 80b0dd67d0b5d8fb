//! Runtime bootstrap: Uninstalled → Installed → Running → ModelReady.
//!
//! [`BootstrapManager::ensure_ready`] probes the current state and performs
//! only the missing steps: install, start (followed by a bounded grace
//! period), then a pull for every registry model the runtime lacks, in
//! registry order. Every transition is recorded in the manager's
//! [`ProgressCell`] and forwarded to the caller's [`ProgressReporter`].
//!
//! At most one attempt runs at a time. Overlapping callers join the
//! in-flight attempt and receive its outcome; only the first caller's
//! reporter sees live progress, the rest can poll [`BootstrapManager::progress`].

use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::error::{BootstrapError, InstallationError};
use crate::install::InstallStrategy;
use crate::models::{RuntimePhase, RuntimeState, SetupProgress, SetupStage};
use crate::progress::{classify_pull_line, ProgressCell, ProgressReporter};
use crate::registry::ModelRegistry;
use crate::runtime::ModelRuntime;

/// Upper bound on the post-start grace period.
pub const MAX_GRACE_PERIOD: Duration = Duration::from_secs(60);

type AttemptResult = Result<RuntimeState, BootstrapError>;
type SharedAttempt = Shared<BoxFuture<'static, AttemptResult>>;

pub struct BootstrapManager {
    runtime: Arc<dyn ModelRuntime>,
    installer: Arc<dyn InstallStrategy>,
    registry: ModelRegistry,
    grace_period: Duration,
    progress: ProgressCell,
    last_state: RwLock<RuntimeState>,
    inflight: tokio::sync::Mutex<Option<SharedAttempt>>,
}

impl BootstrapManager {
    pub fn new(
        runtime: Arc<dyn ModelRuntime>,
        installer: Arc<dyn InstallStrategy>,
        registry: ModelRegistry,
    ) -> Self {
        Self {
            runtime,
            installer,
            registry,
            grace_period: Duration::from_secs(5),
            progress: ProgressCell::new(),
            last_state: RwLock::new(RuntimeState::uninstalled()),
            inflight: tokio::sync::Mutex::new(None),
        }
    }

    /// Wait after `start()` before probing. Clamped to [`MAX_GRACE_PERIOD`].
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace.min(MAX_GRACE_PERIOD);
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn runtime(&self) -> &Arc<dyn ModelRuntime> {
        &self.runtime
    }

    /// Latest progress snapshot.
    pub fn progress(&self) -> SetupProgress {
        self.progress.snapshot()
    }

    /// State recorded by the last attempt or [`observe`](Self::observe).
    pub fn last_state(&self) -> RuntimeState {
        self.last_state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Bring the runtime to `ModelReady`, or join the attempt already doing so.
    pub async fn ensure_ready(self: &Arc<Self>, sink: Arc<dyn ProgressReporter>) -> AttemptResult {
        let attempt = {
            let mut slot = self.inflight.lock().await;
            match slot.as_ref() {
                Some(running) => {
                    tracing::debug!("joining in-flight bootstrap attempt");
                    running.clone()
                }
                None => {
                    let this = Arc::clone(self);
                    let handle = tokio::spawn(async move {
                        let result = this.run_attempt(sink.as_ref()).await;
                        *this.inflight.lock().await = None;
                        result
                    });
                    let shared = async move {
                        handle
                            .await
                            .unwrap_or_else(|e| Err(BootstrapError::Aborted(e.to_string())))
                    }
                    .boxed()
                    .shared();
                    *slot = Some(shared.clone());
                    shared
                }
            }
        };
        attempt.await
    }

    /// Run [`ensure_ready`](Self::ensure_ready) in the background.
    pub fn spawn_setup(self: &Arc<Self>, sink: Arc<dyn ProgressReporter>) -> JoinHandle<AttemptResult> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let result = this.ensure_ready(sink).await;
            if let Err(e) = &result {
                tracing::error!(error = %e, "background setup failed");
            }
            result
        })
    }

    /// Probe the runtime without changing it.
    ///
    /// Logs a warning when the observed phase is behind the last recorded
    /// one (e.g. the server was stopped externally); the next
    /// `ensure_ready` starts from what is observed here.
    pub async fn observe(&self) -> RuntimeState {
        let mut state = RuntimeState::uninstalled();
        if self.runtime.is_installed().await {
            state.phase = RuntimePhase::Installed;
            if self.runtime.is_running().await {
                state.phase = RuntimePhase::Running;
                match self.runtime.installed_models().await {
                    Ok(models) => state.models = models,
                    Err(e) => tracing::debug!(error = %e, "could not list models"),
                }
                if self.registry.all_present(&state.models) {
                    state.phase = RuntimePhase::ModelReady;
                }
            }
        }

        let previous = self.last_state();
        if state.phase < previous.phase {
            tracing::warn!(
                previous = ?previous.phase,
                observed = ?state.phase,
                "runtime regressed since last check"
            );
        }
        self.record_state(state.clone());
        state
    }

    fn record_state(&self, state: RuntimeState) {
        *self.last_state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn advance(&self, sink: &dyn ProgressReporter, stage: SetupStage, percent: u8) {
        let snapshot = self.progress.advance(stage, percent);
        sink.report(&snapshot);
    }

    async fn run_attempt(&self, sink: &dyn ProgressReporter) -> AttemptResult {
        sink.report(&self.progress.begin());
        match self.drive(sink).await {
            Ok(state) => {
                self.record_state(state.clone());
                self.advance(sink, SetupStage::Complete, 100);
                tracing::info!(models = ?state.models, "runtime ready");
                Ok(state)
            }
            Err(e) => {
                tracing::error!(error = %e, "bootstrap failed");
                sink.report(&self.progress.fail(e.to_string()));
                Err(e)
            }
        }
    }

    async fn drive(&self, sink: &dyn ProgressReporter) -> AttemptResult {
        let mut state = RuntimeState::uninstalled();

        if !self.runtime.is_installed().await {
            tracing::info!(strategy = self.installer.name(), "installing runtime");
            let report = |stage: SetupStage, pct: u8| self.advance(sink, stage, pct.clamp(5, 60));
            let exe = self.installer.install(&report).await?;
            if !self.runtime.is_installed().await {
                return Err(InstallationError::ExecutableMissing(exe).into());
            }
        }
        state.phase = RuntimePhase::Installed;
        self.advance(sink, SetupStage::Installing, 60);

        if !self.runtime.is_running().await {
            self.advance(sink, SetupStage::Starting, 70);
            tracing::info!(grace = ?self.grace_period, "starting runtime");
            self.runtime
                .start()
                .await
                .map_err(|e| BootstrapError::RuntimeStart(e.to_string()))?;
            tokio::time::sleep(self.grace_period).await;
            if !self.runtime.is_running().await {
                return Err(BootstrapError::RuntimeStart(format!(
                    "runtime did not respond within {}s of starting",
                    self.grace_period.as_secs()
                )));
            }
        }
        state.phase = RuntimePhase::Running;
        self.advance(sink, SetupStage::Starting, 80);

        let installed = self
            .runtime
            .installed_models()
            .await
            .map_err(|e| BootstrapError::RuntimeStart(e.to_string()))?;
        let missing: Vec<String> = self
            .registry
            .missing(&installed)
            .into_iter()
            .map(str::to_string)
            .collect();
        state.models = installed;

        let count = missing.len() as u32;
        for (i, model) in missing.iter().enumerate() {
            let (lo, span) = pull_window(i as u32, count);
            tracing::info!(model = %model, "pulling model");
            self.advance(sink, SetupStage::PullingModel, lo);

            let on_line = |line: &str| {
                if let Some(stage) = classify_pull_line(line) {
                    let pct = lo as u32 + span * stage.tenths() / 10;
                    self.advance(sink, SetupStage::PullingModel, pct as u8);
                }
            };
            self.runtime
                .pull_model(model, &on_line)
                .await
                .map_err(|e| BootstrapError::ModelPull {
                    model: model.clone(),
                    message: e.to_string(),
                })?;
            state.models.insert(model.clone());
        }

        state.phase = RuntimePhase::ModelReady;
        Ok(state)
    }
}

/// Start percentage and width of model `i` of `count` within 80–99%.
fn pull_window(i: u32, count: u32) -> (u8, u32) {
    let count = count.max(1);
    let span = 19 / count;
    ((80 + i * 19 / count) as u8, span)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pull_windows_stay_below_complete() {
        assert_eq!(pull_window(0, 1), (80, 19));
        assert_eq!(pull_window(0, 2), (80, 9));
        assert_eq!(pull_window(1, 2), (89, 9));
        for count in 1..6 {
            let mut last = 0;
            for i in 0..count {
                let (lo, span) = pull_window(i, count);
                assert!(lo >= last);
                assert!(lo as u32 + span <= 99);
                last = lo;
            }
        }
    }
}
