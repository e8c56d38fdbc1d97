//! Approval Manager (§4.6, C7): request/response protocol for per-
//! invocation tool approval, with auto-approval rules and timeout-as-denial.
//!
//! Event emission (`ToolApprovalRequest`/`Granted`/`Denied`) is left to the
//! agent loop, which owns the event channel; this module only tracks
//! pending approvals and resolves the single-shot response primitive.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::event::ApprovalResponse;

/// One pattern in the `execute_command` whitelist (§4.6, §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternKind {
    Exact,
    Prefix,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPattern {
    pub kind: PatternKind,
    pub value: String,
}

impl CommandPattern {
    pub fn exact(value: impl Into<String>) -> Self {
        Self {
            kind: PatternKind::Exact,
            value: value.into(),
        }
    }

    pub fn prefix(value: impl Into<String>) -> Self {
        Self {
            kind: PatternKind::Prefix,
            value: value.into(),
        }
    }

    fn matches(&self, command: &str) -> bool {
        match self.kind {
            PatternKind::Exact => self.value == command,
            PatternKind::Prefix => {
                command == self.value || command.starts_with(&format!("{} ", self.value))
            }
        }
    }
}

/// Tracks open approvals and applies auto-approval rules.
pub struct ApprovalManager {
    pending: Mutex<HashMap<String, oneshot::Sender<ApprovalResponse>>>,
    next_id: AtomicU64,
    auto_approve: HashMap<String, bool>,
    whitelist: Vec<CommandPattern>,
}

impl ApprovalManager {
    pub fn new(auto_approve: HashMap<String, bool>, whitelist: Vec<CommandPattern>) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            auto_approve,
            whitelist,
        }
    }

    /// Auto-approval rules (§4.6), applied before opening a `PendingApproval`.
    /// `execute_command` is never auto-approved by the per-tool flag, only
    /// by the whitelist; every other tool defaults to `false` on first
    /// sight (default-deny).
    pub fn auto_grant(&self, tool_name: &str, command: Option<&str>) -> bool {
        if tool_name == "execute_command" {
            return command.is_some_and(|c| self.whitelist.iter().any(|p| p.matches(c)));
        }
        self.auto_approve.get(tool_name).copied().unwrap_or(false)
    }

    /// Open a new pending approval, returning its id and response receiver.
    pub fn open(&self) -> (String, oneshot::Receiver<ApprovalResponse>) {
        let id = format!("appr-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("approval lock poisoned")
            .insert(id.clone(), tx);
        (id, rx)
    }

    /// Resolve a pending approval. Single-shot: returns `true` only for the
    /// call that actually delivered the response; any later call (or a call
    /// after expiry cleanup) for the same id is a no-op and returns `false`.
    pub fn resolve(&self, id: &str, response: ApprovalResponse) -> bool {
        let sender = self
            .pending
            .lock()
            .expect("approval lock poisoned")
            .remove(id);
        match sender {
            Some(tx) => {
                let _ = tx.send(response);
                true
            }
            None => false,
        }
    }

    fn cleanup(&self, id: &str) {
        self.pending.lock().expect("approval lock poisoned").remove(id);
    }

    /// Wait for a response with a timeout; an elapsed timeout (or the
    /// sender being dropped) is treated as `Denied` (§4.6 outcome 4) and
    /// removes the pending entry so a late `resolve` is a no-op.
    pub async fn await_response(
        &self,
        id: &str,
        rx: oneshot::Receiver<ApprovalResponse>,
        timeout: Duration,
    ) -> ApprovalResponse {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            _ => {
                self.cleanup(id);
                ApprovalResponse::Denied
            }
        }
    }

    pub fn open_count(&self) -> usize {
        self.pending.lock().expect("approval lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_command_ignores_the_per_tool_flag() {
        let mut auto = HashMap::new();
        auto.insert("execute_command".to_string(), true);
        let manager = ApprovalManager::new(auto, Vec::new());
        assert!(!manager.auto_grant("execute_command", Some("git status")));
    }

    #[test]
    fn execute_command_honors_exact_whitelist_pattern() {
        let manager = ApprovalManager::new(
            HashMap::new(),
            vec![CommandPattern::exact("git status")],
        );
        assert!(manager.auto_grant("execute_command", Some("git status")));
        assert!(!manager.auto_grant("execute_command", Some("git status --short")));
    }

    #[test]
    fn execute_command_honors_prefix_whitelist_pattern() {
        let manager =
            ApprovalManager::new(HashMap::new(), vec![CommandPattern::prefix("git status")]);
        assert!(manager.auto_grant("execute_command", Some("git status --short")));
        assert!(!manager.auto_grant("execute_command", Some("git statuses")));
    }

    #[test]
    fn other_tools_default_deny_until_configured() {
        let manager = ApprovalManager::new(HashMap::new(), Vec::new());
        assert!(!manager.auto_grant("list_files", None));
        let mut auto = HashMap::new();
        auto.insert("list_files".to_string(), true);
        let manager = ApprovalManager::new(auto, Vec::new());
        assert!(manager.auto_grant("list_files", None));
    }

    #[tokio::test]
    async fn resolve_is_single_shot() {
        let manager = ApprovalManager::new(HashMap::new(), Vec::new());
        let (id, rx) = manager.open();
        assert!(manager.resolve(&id, ApprovalResponse::Granted));
        assert!(!manager.resolve(&id, ApprovalResponse::Denied));
        let resolved = manager.await_response(&id, rx, Duration::from_secs(1)).await;
        assert_eq!(resolved, ApprovalResponse::Granted);
    }

    #[tokio::test]
    async fn timeout_is_treated_as_denied_and_cleans_up() {
        let manager = ApprovalManager::new(HashMap::new(), Vec::new());
        let (id, rx) = manager.open();
        let resolved = manager
            .await_response(&id, rx, Duration::from_millis(10))
            .await;
        assert_eq!(resolved, ApprovalResponse::Denied);
        assert_eq!(manager.open_count(), 0);
        // a late resolve after expiry cleanup is a no-op.
        assert!(!manager.resolve(&id, ApprovalResponse::Granted));
    }
}
