//! # Closable reader-writer lock
//!
//! A reader-writer lock that takes part in a coordinated shutdown process.
//! Any number of readers or a single writer may hold the lock. Once the
//! lock is closed, all blocked calls return `false` and all subsequent
//! operations fail, returning `false`, instead of deadlocking.
//!
//! All lock state is owned by a single dispatch task, the [LockTask].
//! Callers deliver commands to it over a channel and await the reply;
//! the task is the synchronization, so the lock itself contains no locks.
//!
//! # Writer preference
//!
//! Once a write acquisition is waiting, new read acquisitions queue behind
//! it, even while other readers still hold the lock. This prevents writer
//! starvation under sustained read load. Waiters are otherwise served in
//! arrival order.
//!
//! # Aborting and closing
//!
//! Every acquisition accepts an optional [CancellationToken] that cancels
//! waiting for the lock. Aborting an acquisition that has already been
//! queued is treated as catastrophic: the lock shuts down and fails all
//! waiters, because a single queued command cannot be removed without
//! corrupting the waiter order under writer preference.
//!
//! Closing the lock, either through [RwLock::close] or through an external
//! shutdown token supplied at construction, is a destructive,
//! non-recoverable operation on the lock instance.
//!
//! # Example
//!
//! ```
//! use shutlock::RwLock;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let lock = RwLock::new();
//!
//!     // many readers may hold the lock at once
//!     assert!(lock.acquire_read(None).await);
//!     assert!(lock.acquire_read(None).await);
//!     assert!(lock.release_read().await);
//!     assert!(lock.release_read().await);
//!
//!     // a writer holds it exclusively
//!     assert!(lock.acquire_write(None).await);
//!     assert!(lock.release_write().await);
//!
//!     // closing fails every blocked and subsequent operation
//!     lock.close().await.unwrap();
//!     assert!(!lock.acquire_read(None).await);
//! }
//! ```

#![warn(missing_docs)]

mod cfg;
mod command;
mod lock;
mod task;

pub use cfg::Cfg;
pub use lock::{CloseError, RwLock};
pub use task::LockTask;

/// One-shot abort signal accepted by the acquisition operations.
pub use tokio_util::sync::CancellationToken;
