//! Per-session download gate.

use crate::error::{Result, VaultError};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Tracks which sessions currently have a download running.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    downloading: Mutex<HashSet<String>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the session's download slot. A second claim while the first
    /// guard is alive is rejected rather than queued.
    pub fn begin_download(self: &Arc<Self>, session_id: &str) -> Result<DownloadGuard> {
        let mut downloading = self
            .downloading
            .lock()
            .map_err(|_| VaultError::Internal("session registry poisoned".to_string()))?;

        if !downloading.insert(session_id.to_string()) {
            return Err(VaultError::DownloadInProgress);
        }

        Ok(DownloadGuard {
            sessions: self.clone(),
            session_id: session_id.to_string(),
        })
    }

    pub fn is_downloading(&self, session_id: &str) -> bool {
        self.downloading
            .lock()
            .map(|downloading| downloading.contains(session_id))
            .unwrap_or(false)
    }
}

/// Releases the session's download slot when dropped.
#[derive(Debug)]
pub struct DownloadGuard {
    sessions: Arc<SessionRegistry>,
    session_id: String,
}

impl Drop for DownloadGuard {
    fn drop(&mut self) {
        if let Ok(mut downloading) = self.sessions.downloading.lock() {
            downloading.remove(&self.session_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_download_in_same_session_is_rejected() {
        let sessions = Arc::new(SessionRegistry::new());
        let guard = sessions.begin_download("alice").expect("first");

        assert!(matches!(
            sessions.begin_download("alice"),
            Err(VaultError::DownloadInProgress)
        ));
        let other = sessions.begin_download("bob").expect("other session");

        drop(guard);
        assert!(!sessions.is_downloading("alice"));
        sessions.begin_download("alice").expect("after release");
        drop(other);
    }
}
