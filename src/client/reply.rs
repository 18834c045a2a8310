use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{SyncError, SyncResult};

pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct Registry {
    pending: HashMap<String, oneshot::Sender<Value>>,
    last: Option<(String, Value)>,
}

/// Correlates backend method calls with the replies that arrive later on
/// the push stream, keyed by the code the backend assigned.
///
/// The most recent reply is kept so a waiter that registers after its reply
/// was already delivered still receives it.
#[derive(Debug, Clone)]
pub struct ReplyRegistry {
    inner: Arc<Mutex<Registry>>,
    timeout: Duration,
}

impl Default for ReplyRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_REPLY_TIMEOUT)
    }
}

impl ReplyRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry::default())),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn resolve(&self, code: &str, data: Value) -> bool {
        let mut registry = self.inner.lock();
        registry.last = Some((code.to_string(), data.clone()));
        match registry.pending.remove(code) {
            Some(waiter) => waiter.send(data).is_ok(),
            None => {
                tracing::debug!(code, "no pending request for reply");
                false
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_executing(&self) -> bool {
        self.pending_count() > 0
    }

    pub fn last_code(&self) -> Option<String> {
        self.inner.lock().last.as_ref().map(|(code, _)| code.clone())
    }

    /// Waits for the reply to `code`, failing after the registry timeout.
    pub async fn wait(&self, code: &str) -> SyncResult<Value> {
        let receiver = {
            let mut registry = self.inner.lock();
            if let Some((last_code, data)) = &registry.last {
                if last_code == code {
                    return Ok(data.clone());
                }
            }
            let (sender, receiver) = oneshot::channel();
            registry.pending.insert(code.to_string(), sender);
            receiver
        };
        match tokio::time::timeout(self.timeout, receiver).await {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(_)) => Err(SyncError::ReplyDropped {
                code: code.to_string(),
            }),
            Err(_) => {
                self.inner.lock().pending.remove(code);
                tracing::warn!(code, timeout = ?self.timeout, "reply timed out");
                Err(SyncError::ReplyTimeout {
                    code: code.to_string(),
                    waited: self.timeout,
                })
            }
        }
    }

    pub async fn execute<F>(&self, trigger: F) -> SyncResult<Value>
    where
        F: Future<Output = SyncResult<String>>,
    {
        let code = trigger.await?;
        self.wait(&code).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[tokio::test]
    async fn waiter_receives_later_reply() {
        let registry = ReplyRegistry::default();
        let resolver = registry.clone();
        let waiter = tokio::spawn({
            let registry = registry.clone();
            async move { registry.wait("c1").await }
        });
        while registry.pending_count() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(registry.is_executing());
        assert!(resolver.resolve("c1", json!({"ok": true})));
        let value = waiter.await.expect("join").expect("reply");
        assert_eq!(value, json!({"ok": true}));
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn reply_before_registration_is_served_from_last_result() {
        let registry = ReplyRegistry::default();
        assert!(!registry.resolve("early", json!(7)));
        let value = registry
            .execute(async { Ok("early".to_string()) })
            .await
            .expect("cached reply");
        assert_eq!(value, json!(7));
        assert_eq!(registry.last_code().as_deref(), Some("early"));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_reply_times_out_and_unregisters() {
        let registry = ReplyRegistry::new(Duration::from_secs(30));
        let err = registry.wait("never").await.expect_err("timeout");
        assert!(err.is_timeout());
        assert_matches!(err, SyncError::ReplyTimeout { ref code, .. } if code == "never");
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn trigger_failure_is_returned_without_waiting() {
        let registry = ReplyRegistry::default();
        let err = registry
            .execute(async {
                Err(SyncError::Status {
                    status: 500,
                    body: "down".into(),
                })
            })
            .await
            .expect_err("trigger failed");
        assert_matches!(err, SyncError::Status { status: 500, .. });
        assert!(!registry.is_executing());
    }
}
