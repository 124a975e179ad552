use tokio::sync::oneshot;

/// A lock operation requested by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockOp {
    /// Acquire a read lock.
    AcquireRead,
    /// Release a read lock.
    ReleaseRead,
    /// Acquire the write lock.
    AcquireWrite,
    /// Release the write lock.
    ReleaseWrite,
}

impl LockOp {
    /// True if the operation is an acquisition and thus may be queued.
    pub fn is_acquire(&self) -> bool {
        matches!(self, Self::AcquireRead | Self::AcquireWrite)
    }
}

/// Outcome of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reply {
    /// The operation took effect on the lock state.
    Granted,
    /// The lock was terminated before the operation could take effect.
    Aborted,
}

/// A command from a caller to the lock task.
///
/// Once the task has accepted the command, it replies exactly once.
pub(crate) struct LockCommand {
    /// Requested operation.
    pub op: LockOp,
    /// Reply channel to the caller.
    pub reply_tx: oneshot::Sender<Reply>,
}
