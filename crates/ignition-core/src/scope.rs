//! Cancellation-scope tree.
//!
//! A scope wraps a [`tokio_util::sync::CancellationToken`] so in-flight
//! `tokio::select!` waits get native, zero-poll cancellation, while the scope
//! itself separately tracks *why* it was cancelled, since a bare token only
//! answers "is it cancelled", never "by whom, and with what reason".

use std::sync::Mutex;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Why a scope (or the signal running under it) ended up cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationReason {
    /// The caller's own token, passed into `wait_all`, fired.
    ExternalCancellation,
    /// A sibling signal bound to this scope (or an ancestor) failed, and
    /// `cancel_scope_on_failure` was set for that binding.
    SignalFailure,
    /// A timeout (global or per-signal) elapsed.
    Timeout,
    /// An ancestor scope was cancelled and this node inherited it.
    ParentCancelled,
    /// `scope.cancel` was called directly by a caller for no other tracked
    /// reason.
    ManualCancel,
}

/// Terminal or live state of a [`CancellationScope`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeStatus {
    Active,
    Cancelled {
        reason: CancellationReason,
        message: Option<String>,
    },
}

struct ScopeState {
    status: ScopeStatus,
}

/// One node in the cancellation-scope tree. Scopes are always held behind an
/// `Arc` since children keep a strong reference to their parent's children
/// list and callers keep references to scopes they bound signals to.
pub struct CancellationScope {
    name: String,
    token: CancellationToken,
    children: Mutex<Vec<Arc<CancellationScope>>>,
    state: Mutex<ScopeState>,
}

impl CancellationScope {
    /// Creates a fresh, unparented, `Active` scope.
    pub fn new_root(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            token: CancellationToken::new(),
            children: Mutex::new(Vec::new()),
            state: Mutex::new(ScopeState {
                status: ScopeStatus::Active,
            }),
        })
    }

    /// Creates a child scope whose token is derived from this one via
    /// [`CancellationToken::child_token`], so cancelling this scope (or any
    /// ancestor) cancels the child's token immediately, with no extra task.
    ///
    /// If this scope is already cancelled, the child is created already
    /// cancelled with reason `ParentCancelled` rather than racing the caller.
    pub fn child(self: &Arc<Self>, name: impl Into<String>) -> Arc<Self> {
        let child = Arc::new(Self {
            name: name.into(),
            token: self.token.child_token(),
            children: Mutex::new(Vec::new()),
            state: Mutex::new(ScopeState {
                status: ScopeStatus::Active,
            }),
        });
        self.children.lock().unwrap().push(child.clone());
        if matches!(self.status(), ScopeStatus::Cancelled { .. }) {
            child.cancel_cascade(CancellationReason::ParentCancelled, None);
        }
        child
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The live cancellation token for this scope. Cloning is cheap; the
    /// clone observes the same cancellation.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn status(&self) -> ScopeStatus {
        self.state.lock().unwrap().status.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.status(), ScopeStatus::Cancelled { .. })
    }

    /// Cancels this scope and every transitive descendant. First
    /// cancellation wins: calling this on an already-cancelled scope is a
    /// no-op and does not overwrite the recorded reason (see DESIGN.md).
    ///
    /// All descendant state is updated before this call returns.
    pub fn cancel(&self, reason: CancellationReason, message: Option<String>) {
        self.cancel_cascade(reason, message);
    }

    fn cancel_cascade(&self, reason: CancellationReason, message: Option<String>) {
        let became_cancelled = {
            let mut state = self.state.lock().unwrap();
            if matches!(state.status, ScopeStatus::Active) {
                state.status = ScopeStatus::Cancelled {
                    reason,
                    message: message.clone(),
                };
                true
            } else {
                false
            }
        };
        if !became_cancelled {
            return;
        }
        debug!(scope = %self.name, ?reason, "scope cancelled");
        self.token.cancel();
        let children = self.children.lock().unwrap().clone();
        for child in children {
            child.cancel_cascade(CancellationReason::ParentCancelled, None);
        }
    }
}
