//! One-time backend setup with an explicit lifecycle
//!
//! Vendor backends often need process-wide setup before the first `open`
//! (loading a driver, registering a session). `BackendInitializer` runs that
//! setup at most once until it is torn down, and only runs it again through
//! an explicit [`BackendInitializer::reinitialize`].

use crate::error::{PlcError, Result};
use std::future::Future;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Lifecycle of a backend initializer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    Uninitialized,
    Initialized,
    TornDown,
}

#[derive(Debug)]
pub struct BackendInitializer {
    name: String,
    state: Mutex<InitState>,
}

impl BackendInitializer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(InitState::Uninitialized),
        }
    }

    pub async fn state(&self) -> InitState {
        *self.state.lock().await
    }

    /// Run `init` unless already initialized
    ///
    /// Returns whether `init` ran. Concurrent callers wait for the first one.
    /// A torn down initializer stays down until `reinitialize`.
    pub async fn ensure_initialized<F, Fut>(&self, init: F) -> Result<bool>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut state = self.state.lock().await;
        match *state {
            InitState::Initialized => Ok(false),
            InitState::TornDown => Err(PlcError::backend(format!(
                "{} was torn down, reinitialize it first",
                self.name
            ))),
            InitState::Uninitialized => {
                init().await?;
                *state = InitState::Initialized;
                debug!(backend = %self.name, "Backend initialized");
                Ok(true)
            },
        }
    }

    /// Run `teardown` if initialized, returning whether it ran
    pub async fn teardown<F, Fut>(&self, teardown: F) -> Result<bool>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut state = self.state.lock().await;
        if *state != InitState::Initialized {
            return Ok(false);
        }
        teardown().await?;
        *state = InitState::TornDown;
        info!(backend = %self.name, "Backend torn down");
        Ok(true)
    }

    /// Run `init` whatever the current state
    pub async fn reinitialize<F, Fut>(&self, init: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut state = self.state.lock().await;
        init().await?;
        *state = InitState::Initialized;
        info!(backend = %self.name, "Backend reinitialized");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_runs_once() {
        let init = BackendInitializer::new("test");
        let runs = AtomicUsize::new(0);

        for _ in 0..3 {
            init.ensure_initialized(|| async {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(init.state().await, InitState::Initialized);
    }

    #[tokio::test]
    async fn test_failed_init_can_be_retried() {
        let init = BackendInitializer::new("test");
        let err = init
            .ensure_initialized(|| async { Err(PlcError::backend("driver missing")) })
            .await
            .unwrap_err();
        assert!(matches!(err, PlcError::Backend(_)));
        assert_eq!(init.state().await, InitState::Uninitialized);

        assert!(init.ensure_initialized(|| async { Ok(()) }).await.unwrap());
    }

    #[tokio::test]
    async fn test_teardown_and_reinitialize() {
        let init = BackendInitializer::new("test");
        assert!(!init.teardown(|| async { Ok(()) }).await.unwrap());

        init.ensure_initialized(|| async { Ok(()) }).await.unwrap();
        assert!(init.teardown(|| async { Ok(()) }).await.unwrap());
        assert_eq!(init.state().await, InitState::TornDown);

        assert!(init.ensure_initialized(|| async { Ok(()) }).await.is_err());

        init.reinitialize(|| async { Ok(()) }).await.unwrap();
        assert_eq!(init.state().await, InitState::Initialized);
    }

    #[tokio::test]
    async fn test_concurrent_callers_initialize_once() {
        let init = Arc::new(BackendInitializer::new("test"));
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let init = init.clone();
            let runs = runs.clone();
            handles.push(tokio::spawn(async move {
                init.ensure_initialized(|| async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    Ok(())
                })
                .await
                .unwrap()
            }));
        }
        let ran: usize = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| usize::from(r.unwrap()))
            .sum();
        assert_eq!(ran, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
