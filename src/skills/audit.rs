//! Best-effort audit recording.
//!
//! Every invocation attempt produces one [`AuditRecord`]. Store failures are
//! logged and dropped; they never change an invocation's result.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::store::{AuditRecord, AuditStore};

/// When the audit insert happens relative to returning the result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditMode {
    /// Await the insert before `invoke` returns.
    Inline,
    /// Spawn the insert on the runtime and return immediately.
    #[default]
    Background,
}

impl std::str::FromStr for AuditMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(AuditMode::Inline),
            "background" => Ok(AuditMode::Background),
            other => Err(format!("unknown audit mode: {}", other)),
        }
    }
}

/// Writes audit records to an [`AuditStore`].
#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn AuditStore>,
    mode: AuditMode,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn AuditStore>, mode: AuditMode) -> Self {
        Self { store, mode }
    }

    pub fn mode(&self) -> AuditMode {
        self.mode
    }

    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    /// Persist `record`, swallowing failures.
    pub async fn record(&self, record: AuditRecord) {
        match self.mode {
            AuditMode::Inline => write(self.store.as_ref(), &record).await,
            AuditMode::Background => {
                let store = Arc::clone(&self.store);
                tokio::spawn(async move {
                    write(store.as_ref(), &record).await;
                });
            }
        }
    }
}

async fn write(store: &dyn AuditStore, record: &AuditRecord) {
    if let Err(e) = store.insert(record).await {
        log::error!(
            "Failed to record invocation of {}@{} for {}: {}",
            record.skill,
            record.version,
            record.org_id,
            e
        );
    }
}

impl std::fmt::Debug for AuditRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditRecorder")
            .field("mode", &self.mode)
            .finish()
    }
}
