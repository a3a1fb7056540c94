//! State Management - Write the engine status file for dashboards

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::engine::EngineStatus;

const STATUS_FILE: &str = "status.json";

/// Writes observability files under the state directory
pub struct StateManager {
    state_dir: PathBuf,
}

impl StateManager {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn status_path(&self) -> PathBuf {
        self.state_dir.join(STATUS_FILE)
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.state_dir).await?;
        Ok(())
    }

    /// Replace `status.json`. Readers never see a half-written file.
    pub async fn write_status(&self, status: &EngineStatus) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(status)?;
        write_atomic(&self.status_path(), json.as_bytes()).await?;
        debug!("Wrote {} ({} active bots)", STATUS_FILE, status.active_bots);
        Ok(())
    }
}

async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents).await?;
    fs::rename(&tmp, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_write_status_creates_readable_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StateManager::new(dir.path().join("state"));
        manager.init().await.unwrap();

        let status = EngineStatus {
            timestamp: Utc::now(),
            active_bots: 0,
            ticks: 3,
            bots: Vec::new(),
        };
        manager.write_status(&status).await.unwrap();
        manager.write_status(&status).await.unwrap();

        let raw = std::fs::read_to_string(manager.status_path()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["ticks"], 3);
        assert_eq!(parsed["active_bots"], 0);
        assert!(!manager.status_path().with_extension("json.tmp").exists());
    }
}
