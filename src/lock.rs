use futures::future;
use lazy_static::lazy_static;
use std::{
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicU16, Ordering},
        Arc, Mutex,
    },
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    cfg::Cfg,
    command::{LockCommand, LockOp, Reply},
    task::LockTask,
};

/// Error closing a lock.
#[derive(Debug, Clone)]
pub enum CloseError {
    /// The lock task ended abnormally.
    TaskFailed,
}

impl fmt::Display for CloseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::TaskFailed => write!(f, "lock task failed"),
        }
    }
}

impl Error for CloseError {}

/// A reader-writer lock that can be closed as part of a coordinated
/// shutdown process.
///
/// Any number of readers or a single writer may hold the lock. Once a
/// writer is waiting, new readers queue behind it.
///
/// Once the lock is closed, its task exits, all blocked calls return
/// `false` and all subsequent operations fail, returning `false`. Closing
/// a lock is a destructive, non-recoverable operation on the lock
/// instance.
///
/// The handle is cheap to clone; all clones refer to the same lock.
#[derive(Clone)]
pub struct RwLock {
    /// Identifier for trace logging.
    trace_id: String,
    /// Command sender to the lock task.
    cmd_tx: mpsc::Sender<LockCommand>,
    /// Global termination signal.
    terminate: CancellationToken,
    /// Internal abort signal, cancelled when a waiting caller gives up.
    lock_abort: CancellationToken,
    /// Cancelled when the lock task has exited.
    done: CancellationToken,
    /// Join handle of an eagerly spawned lock task.
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl fmt::Debug for RwLock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RwLock")
            .field("trace_id", &self.trace_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl RwLock {
    /// Creates a new lock and spawns its task onto the current tokio
    /// runtime.
    ///
    /// # Panics
    /// Panics when called outside of a tokio runtime.
    pub fn new() -> Self {
        Self::with_cfg(Cfg::default())
    }

    /// Creates a new lock with the given configuration and spawns its task
    /// onto the current tokio runtime.
    ///
    /// # Panics
    /// Panics when called outside of a tokio runtime.
    pub fn with_cfg(cfg: Cfg) -> Self {
        let (task, lock) = Self::build(cfg, CancellationToken::new());
        lock.spawn(task)
    }

    /// Creates a new lock that is closed when the supplied shutdown token
    /// is cancelled and spawns its task onto the current tokio runtime.
    ///
    /// Cancelling `shutdown` is equivalent in effect to [close](Self::close),
    /// except that it does not wait for the lock task to exit.
    ///
    /// # Panics
    /// Panics when called outside of a tokio runtime.
    pub fn with_shutdown(cfg: Cfg, shutdown: CancellationToken) -> Self {
        let (task, lock) = Self::build(cfg, shutdown.child_token());
        lock.spawn(task)
    }

    /// Creates a new lock whose task is driven by the caller.
    ///
    /// The returned [LockTask] must be awaited, usually from a newly
    /// spawned task, for the lock to function; see [LockTask::run].
    pub fn start(cfg: Cfg) -> (LockTask, RwLock) {
        Self::build(cfg, CancellationToken::new())
    }

    fn build(cfg: Cfg, terminate: CancellationToken) -> (LockTask, RwLock) {
        let trace_id = cfg.trace_id.clone().unwrap_or_else(generate_trace_id);
        let (cmd_tx, cmd_rx) = mpsc::channel(cfg.command_queue.get());
        let lock_abort = CancellationToken::new();
        let done = CancellationToken::new();

        let task = LockTask::new(
            trace_id.clone(),
            cmd_rx,
            terminate.clone(),
            lock_abort.clone(),
            done.clone(),
        );
        let lock =
            RwLock { trace_id, cmd_tx, terminate, lock_abort, done, task: Arc::new(Mutex::new(None)) };

        log::trace!("{}: lock created", &lock.trace_id);
        (task, lock)
    }

    fn spawn(self, task: LockTask) -> Self {
        let handle = tokio::spawn(task.run());
        *self.task.lock().unwrap() = Some(handle);
        self
    }

    /// Acquires a read lock and returns whether it succeeded.
    ///
    /// Waits until no writer holds or awaits the lock. The optional abort
    /// signal cancels waiting; see the crate documentation for the
    /// consequences of aborting a queued acquisition.
    pub async fn acquire_read(&self, abort: Option<&CancellationToken>) -> bool {
        self.request(LockOp::AcquireRead, abort).await
    }

    /// Releases a read lock and returns whether it succeeded.
    ///
    /// Fails only when the lock has been terminated. Releasing a read lock
    /// that is not held is a programming error and fails the lock task.
    pub async fn release_read(&self) -> bool {
        self.request(LockOp::ReleaseRead, None).await
    }

    /// Acquires the write lock and returns whether it succeeded.
    ///
    /// Waits until no reader and no writer holds the lock. While the
    /// acquisition is waiting, new read acquisitions queue behind it.
    pub async fn acquire_write(&self, abort: Option<&CancellationToken>) -> bool {
        self.request(LockOp::AcquireWrite, abort).await
    }

    /// Releases the write lock and returns whether it succeeded.
    ///
    /// Fails only when the lock has been terminated. Releasing the write
    /// lock when it is not held is a programming error and fails the lock
    /// task.
    pub async fn release_write(&self) -> bool {
        self.request(LockOp::ReleaseWrite, None).await
    }

    /// True once the lock has been closed or its task has exited.
    pub fn is_closed(&self) -> bool {
        self.terminate.is_cancelled() || self.done.is_cancelled()
    }

    /// Closes the lock.
    ///
    /// Every blocked and every subsequent operation on the lock fails,
    /// returning `false`. Closing is idempotent.
    ///
    /// Waits for the lock task to exit. An abnormal task exit is reported
    /// as [CloseError].
    pub async fn close(&self) -> Result<(), CloseError> {
        log::trace!("{}: close", &self.trace_id);
        self.terminate.cancel();
        self.done.cancelled().await;

        let task = self.task.lock().unwrap().take();
        match task {
            Some(task) => task.await.map_err(|_| CloseError::TaskFailed),
            None => Ok(()),
        }
    }

    /// Delivers a command to the lock task and awaits its outcome.
    async fn request(&self, op: LockOp, abort: Option<&CancellationToken>) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        let cmd = LockCommand { op, reply_tx };

        tokio::select! {
            biased;

            () = self.terminate.cancelled() => return false,

            () = Self::aborted(abort) => {
                log::trace!("{}: {:?} aborted before delivery", &self.trace_id, op);
                self.lock_abort.cancel();
                return false;
            }

            res = self.cmd_tx.send(cmd) => {
                if res.is_err() {
                    // Task has exited.
                    return false;
                }
            }
        }

        tokio::select! {
            biased;

            () = Self::aborted(abort) => {
                log::trace!("{}: {:?} aborted while waiting", &self.trace_id, op);
                self.lock_abort.cancel();
                false
            }

            reply = reply_rx => matches!(reply, Ok(Reply::Granted)),
        }
    }

    /// Waits for the optional abort signal, forever when absent.
    async fn aborted(abort: Option<&CancellationToken>) {
        match abort {
            Some(abort) => abort.cancelled().await,
            None => future::pending().await,
        }
    }
}

/// Generate trace id.
fn generate_trace_id() -> String {
    lazy_static! {
        static ref ID: AtomicU16 = AtomicU16::new(0);
    }

    let id = ID.fetch_add(1, Ordering::SeqCst);
    format!("{:04x}", id)
}
