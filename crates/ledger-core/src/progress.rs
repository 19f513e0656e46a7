use serde::Serialize;

/// Fixed checkpoints of a bootstrap run, in the order they are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    InitKeyStore,
    PassphraseFound,
    CreatePassphrase,
    DecryptPassphrase,
    OpenDatabase,
    CreateDatabase,
    MigrateDatabase,
    Done,
}

impl Stage {
    pub fn fraction(self) -> f32 {
        match self {
            Stage::InitKeyStore => 0.0,
            Stage::PassphraseFound | Stage::CreatePassphrase => 0.2,
            Stage::DecryptPassphrase => 0.4,
            Stage::OpenDatabase | Stage::CreateDatabase => 0.6,
            Stage::MigrateDatabase => 0.8,
            Stage::Done => 1.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::InitKeyStore | Stage::PassphraseFound => "init key store",
            Stage::CreatePassphrase => "create passphrase",
            Stage::DecryptPassphrase => "decrypt passphrase",
            Stage::OpenDatabase => "open database",
            Stage::CreateDatabase => "create and open database",
            Stage::MigrateDatabase => "migrate database",
            Stage::Done => "done",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    pub stage: Stage,
    pub fraction: f32,
    pub label: &'static str,
}

impl From<Stage> for Progress {
    fn from(stage: Stage) -> Self {
        Self {
            stage,
            fraction: stage.fraction(),
            label: stage.label(),
        }
    }
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:>3}% {}", (self.fraction * 100.0).round() as u32, self.label)
    }
}

/// Receiver of checkpoints emitted while the bootstrap runs.
pub trait ProgressSink: Send + Sync {
    fn report(&self, stage: Stage);
}

/// Sink that drops every checkpoint.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _stage: Stage) {}
}

impl<F> ProgressSink for F
where
    F: Fn(Stage) + Send + Sync,
{
    fn report(&self, stage: Stage) {
        self(stage)
    }
}
