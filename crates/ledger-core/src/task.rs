//! Process-wide, run-once bootstrap of the secure store.
//!
//! [`BootstrapRegistry::connect`] starts the single run on first use and
//! attaches every later caller to it. The run happens on a blocking worker;
//! callers observe it through [`BootstrapHandle`] and [`BootstrapListener`].

use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::BootstrapConfig;
use crate::coordinator::BootstrapCoordinator;
use crate::database::{DatabaseFiles, StorageHandle, StorageOpener};
use crate::error::BootstrapError;
use crate::key_broker::KeyBroker;
use crate::legacy::LegacyMigrator;
use crate::passphrase::{ConfigPassphraseStore, PassphraseStore};
use crate::progress::{Progress, ProgressSink, Stage};

/// Terminal result shared by every caller of one run.
pub type BootstrapOutcome = Result<StorageHandle, Arc<BootstrapError>>;

/// Observer of a bootstrap run.
///
/// Callbacks are delivered in order on the worker thread (or on the thread
/// attaching the listener, for replays). They must not call back into the
/// handle they are attached to.
pub trait BootstrapListener: Send + Sync {
    fn on_progress(&self, progress: &Progress);
    fn on_complete(&self, outcome: &BootstrapOutcome);
}

/// One bootstrap run: coordinator, then opener, then legacy migration.
pub struct BootstrapTask {
    coordinator: BootstrapCoordinator,
    opener: StorageOpener,
    migrator: LegacyMigrator,
}

impl BootstrapTask {
    pub fn new(
        broker: Arc<dyn KeyBroker>,
        passphrases: Arc<dyn PassphraseStore>,
        opener: StorageOpener,
        migrator: LegacyMigrator,
    ) -> Self {
        let coordinator =
            BootstrapCoordinator::new(broker, passphrases, opener.files().clone());
        Self {
            coordinator,
            opener,
            migrator,
        }
    }

    /// Wire the production collaborators described by `config`.
    pub fn from_config(config: &BootstrapConfig) -> Self {
        let passphrases = Arc::new(ConfigPassphraseStore::new(config.config_store()));
        let files = DatabaseFiles::new(config.databases_dir(), &config.db_name);
        Self::new(
            config.key_broker(),
            passphrases,
            StorageOpener::new(files, config.kdf),
            LegacyMigrator::new(config.legacy_database_path()),
        )
    }

    pub fn coordinator(&self) -> &BootstrapCoordinator {
        &self.coordinator
    }

    /// Run every step on the current thread, reporting checkpoints to `progress`.
    pub fn run(&self, progress: &dyn ProgressSink) -> Result<StorageHandle, BootstrapError> {
        let passphrase = self.coordinator.resolve_passphrase(progress)?;

        progress.report(if self.opener.database_exists() {
            Stage::OpenDatabase
        } else {
            Stage::CreateDatabase
        });
        let handle = self.opener.open(&passphrase)?;
        drop(passphrase);

        if self.migrator.exists() {
            progress.report(Stage::MigrateDatabase);
            // The legacy file survives any failure so a later run can retry.
            self.migrator.migrate_to(&handle)?;
            self.migrator.delete()?;
        }

        progress.report(Stage::Done);
        Ok(handle)
    }
}

struct RunState {
    progress: Option<Progress>,
    outcome: Option<BootstrapOutcome>,
    listeners: Vec<Arc<dyn BootstrapListener>>,
}

struct Shared {
    state: Mutex<RunState>,
    done: watch::Sender<Option<BootstrapOutcome>>,
}

impl Shared {
    fn new() -> Self {
        let (done, _) = watch::channel(None);
        Self {
            state: Mutex::new(RunState {
                progress: None,
                outcome: None,
                listeners: Vec::new(),
            }),
            done,
        }
    }

    fn complete(&self, outcome: BootstrapOutcome) {
        {
            let mut state = self.state.lock();
            for listener in state.listeners.drain(..) {
                listener.on_complete(&outcome);
            }
            state.outcome = Some(outcome.clone());
        }
        self.done.send_replace(Some(outcome));
    }
}

impl ProgressSink for Shared {
    fn report(&self, stage: Stage) {
        let progress = Progress::from(stage);
        let mut state = self.state.lock();
        if let Some(last) = &state.progress {
            if progress.fraction < last.fraction {
                warn!(stage = ?stage, "dropping out-of-order progress");
                return;
            }
        }
        info!(fraction = progress.fraction, label = progress.label, "bootstrap progress");
        for listener in &state.listeners {
            listener.on_progress(&progress);
        }
        state.progress = Some(progress);
    }
}

/// Completes the run with `Aborted` unless [`finish`](Self::finish) is called
/// first, so a worker dropped before it runs still releases every waiter.
struct CompletionGuard(Option<Arc<Shared>>);

impl CompletionGuard {
    fn finish(mut self, outcome: BootstrapOutcome) {
        if let Some(shared) = self.0.take() {
            shared.complete(outcome);
        }
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if let Some(shared) = self.0.take() {
            warn!("bootstrap worker dropped before completing");
            shared.complete(Err(Arc::new(BootstrapError::Aborted(
                "bootstrap worker dropped before completing".into(),
            ))));
        }
    }
}

/// Caller-side view of the shared run. Cheap to clone.
#[derive(Clone)]
pub struct BootstrapHandle {
    shared: Arc<Shared>,
}

impl BootstrapHandle {
    /// Latest checkpoint, if any was reported yet.
    pub fn progress(&self) -> Option<Progress> {
        self.shared.state.lock().progress.clone()
    }

    /// Terminal result without waiting.
    pub fn outcome(&self) -> Option<BootstrapOutcome> {
        self.shared.state.lock().outcome.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.shared.state.lock().outcome.is_some()
    }

    /// Attach an observer. It first receives the latest progress, or the
    /// outcome straight away if the run already finished.
    pub fn add_listener(&self, listener: Arc<dyn BootstrapListener>) {
        let mut state = self.shared.state.lock();
        if let Some(outcome) = &state.outcome {
            listener.on_complete(outcome);
            return;
        }
        if let Some(progress) = &state.progress {
            listener.on_progress(progress);
        }
        state.listeners.push(listener);
    }

    /// Wait for the terminal result.
    pub async fn wait(&self) -> BootstrapOutcome {
        let mut rx = self.shared.done.subscribe();
        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|o| (*o).clone());
        outcome.unwrap_or_else(|| {
            Err(Arc::new(BootstrapError::Aborted(
                "bootstrap result channel closed".into(),
            )))
        })
    }

    /// Same underlying run.
    pub fn same_run(&self, other: &BootstrapHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

/// Holds the single run for its lifetime. Exactly one run is ever started.
pub struct BootstrapRegistry {
    task: Mutex<Option<BootstrapTask>>,
    run: OnceLock<Arc<Shared>>,
}

static GLOBAL: OnceLock<BootstrapRegistry> = OnceLock::new();

impl BootstrapRegistry {
    pub fn new(task: BootstrapTask) -> Self {
        Self {
            task: Mutex::new(Some(task)),
            run: OnceLock::new(),
        }
    }

    pub fn from_config(config: &BootstrapConfig) -> Self {
        Self::new(BootstrapTask::from_config(config))
    }

    /// Install the process-wide registry. Only the first config is used;
    /// later calls return the registry already installed.
    pub fn init_global(config: &BootstrapConfig) -> &'static BootstrapRegistry {
        GLOBAL.get_or_init(|| Self::from_config(config))
    }

    pub fn global() -> Option<&'static BootstrapRegistry> {
        GLOBAL.get()
    }

    /// Attach to the run, starting it if this is the first call.
    pub fn connect(&self) -> BootstrapHandle {
        self.attach(None)
    }

    /// Like [`connect`](Self::connect), with `listener` attached. The first
    /// caller's listener is attached before the run starts and sees every
    /// checkpoint.
    pub fn connect_with(&self, listener: Arc<dyn BootstrapListener>) -> BootstrapHandle {
        self.attach(Some(listener))
    }

    fn attach(&self, listener: Option<Arc<dyn BootstrapListener>>) -> BootstrapHandle {
        let mut first = false;
        let shared = self
            .run
            .get_or_init(|| {
                first = true;
                Arc::new(Shared::new())
            })
            .clone();
        let handle = BootstrapHandle { shared };
        if let Some(listener) = listener {
            handle.add_listener(listener);
        }
        if first {
            self.start(handle.shared.clone());
        }
        handle
    }

    fn start(&self, shared: Arc<Shared>) {
        let Some(task) = self.task.lock().take() else {
            shared.complete(Err(Arc::new(BootstrapError::Aborted(
                "bootstrap task already consumed".into(),
            ))));
            return;
        };

        let guard = CompletionGuard(Some(shared.clone()));
        let job = move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| task.run(&*shared)));
            let outcome = match result {
                Ok(Ok(handle)) => {
                    info!("secure storage ready");
                    Ok(handle)
                }
                Ok(Err(e)) => {
                    error!(error = %e, "bootstrap failed");
                    Err(Arc::new(e))
                }
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "worker panicked".to_string());
                    error!(reason = %reason, "bootstrap worker panicked");
                    Err(Arc::new(BootstrapError::Aborted(reason)))
                }
            };
            guard.finish(outcome);
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                // A job dropped by a shutting-down runtime completes through its guard.
                drop(runtime.spawn_blocking(job));
            }
            Err(_) => {
                if let Err(e) = std::thread::Builder::new()
                    .name("ledger-bootstrap".into())
                    .spawn(job)
                {
                    error!(error = %e, "cannot spawn bootstrap worker");
                }
            }
        }
    }
}
