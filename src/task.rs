use std::{collections::VecDeque, fmt};

use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::command::{LockCommand, LockOp, Reply};

/// The task driving a lock.
///
/// All lock state is owned by this task and only mutated from its event
/// loop. Obtain one together with its [RwLock](crate::RwLock) handle from
/// [RwLock::start](crate::RwLock::start) and drive it with [run](Self::run),
/// or let [RwLock::new](crate::RwLock::new) spawn it.
pub struct LockTask {
    /// Identifier for trace logging.
    trace_id: String,
    /// Command receiver from the lock handles.
    cmd_rx: mpsc::Receiver<LockCommand>,
    /// Global termination signal, cancelled when the lock is closed.
    terminate: CancellationToken,
    /// Internal abort signal, cancelled when a waiting caller gives up.
    lock_abort: CancellationToken,
    /// Number of readers if > 0, unlocked when 0, write-locked when -1.
    state: isize,
    /// A write-acquire is queued, blocking and enqueuing further
    /// read-acquires.
    writer_pending: bool,
    /// Blocked acquisitions in arrival order.
    pending: VecDeque<LockCommand>,
    /// Cancels the done token when the task finishes or is dropped unrun.
    _done: DropGuard,
}

impl fmt::Debug for LockTask {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("LockTask")
            .field("trace_id", &self.trace_id)
            .field("state", &self.state)
            .field("writer_pending", &self.writer_pending)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl LockTask {
    pub(crate) fn new(
        trace_id: String, cmd_rx: mpsc::Receiver<LockCommand>, terminate: CancellationToken,
        lock_abort: CancellationToken, done: CancellationToken,
    ) -> Self {
        Self {
            trace_id,
            cmd_rx,
            terminate,
            lock_abort,
            state: 0,
            writer_pending: false,
            pending: VecDeque::new(),
            _done: done.drop_guard(),
        }
    }

    /// Runs the lock event loop.
    ///
    /// Returns when the lock has been closed, a waiting caller has aborted
    /// or all handles have been dropped. Afterwards the lock stops
    /// functioning and all operations on it fail.
    pub async fn run(mut self) {
        log::trace!("{}: lock task started", &self.trace_id);

        loop {
            self.check_state();

            tokio::select! {
                biased;

                () = self.terminate.cancelled() => {
                    log::trace!("{}: close requested", &self.trace_id);
                    break;
                }

                () = self.lock_abort.cancelled() => {
                    log::trace!("{}: a waiting caller aborted", &self.trace_id);
                    break;
                }

                cmd_opt = self.cmd_rx.recv() => match cmd_opt {
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        log::trace!("{}: all lock handles dropped", &self.trace_id);
                        break;
                    }
                }
            }
        }

        self.shutdown();
    }

    /// Executes or enqueues a single command.
    fn handle_command(&mut self, cmd: LockCommand) {
        match cmd.op {
            LockOp::AcquireRead => {
                if self.state < 0 || self.writer_pending {
                    log::trace!("{}: read acquire blocked, queuing", &self.trace_id);
                    self.pending.push_back(cmd);
                } else {
                    self.execute(cmd);
                }
            }
            LockOp::AcquireWrite => {
                if self.state != 0 {
                    log::trace!("{}: write acquire blocked, queuing", &self.trace_id);
                    self.writer_pending = true;
                    self.pending.push_back(cmd);
                } else {
                    self.execute(cmd);
                }
            }
            LockOp::ReleaseRead | LockOp::ReleaseWrite => {
                self.execute(cmd);
                self.drain();
            }
        }
    }

    /// Grants queued acquisitions for as long as the head of the queue is
    /// executable under the current state.
    fn drain(&mut self) {
        while let Some(next) = self.pending.front() {
            let executable = match next.op {
                LockOp::AcquireRead => self.state >= 0,
                LockOp::AcquireWrite => self.state == 0,
                LockOp::ReleaseRead | LockOp::ReleaseWrite => {
                    panic!("release command in lock queue")
                }
            };
            if !executable {
                break;
            }

            let cmd = self.pending.pop_front().unwrap();
            self.execute(cmd);
        }
    }

    /// Applies a command to the lock state and replies to its caller.
    fn execute(&mut self, cmd: LockCommand) {
        match cmd.op {
            LockOp::AcquireRead => {
                self.state += 1;
                log::trace!("{}: read lock acquired, {} readers", &self.trace_id, self.state);
            }
            LockOp::ReleaseRead => {
                if self.state <= 0 {
                    panic!("read lock released but not held");
                }
                self.state -= 1;
                log::trace!("{}: read lock released, {} readers", &self.trace_id, self.state);
            }
            LockOp::AcquireWrite => {
                debug_assert_eq!(self.state, 0);
                self.state = -1;
                self.writer_pending = self.pending.iter().any(|c| c.op == LockOp::AcquireWrite);
                log::trace!("{}: write lock acquired", &self.trace_id);
            }
            LockOp::ReleaseWrite => {
                if self.state != -1 {
                    panic!("write lock released but not held");
                }
                self.state = 0;
                log::trace!("{}: write lock released", &self.trace_id);
            }
        }

        // The caller may have aborted and dropped its reply receiver, in
        // which case the lock is about to shut down anyway.
        let _ = cmd.reply_tx.send(Reply::Granted);
    }

    /// Verifies the state invariants at a loop iteration boundary.
    fn check_state(&self) {
        assert!(self.state >= -1, "lock state {} out of range", self.state);
        debug_assert!(self.pending.iter().all(|cmd| cmd.op.is_acquire()));
        debug_assert!(
            !self.writer_pending || self.pending.iter().any(|cmd| cmd.op == LockOp::AcquireWrite)
        );
    }

    /// Fails all queued and undelivered commands and freezes the lock.
    fn shutdown(&mut self) {
        log::trace!(
            "{}: lock shutting down, aborting {} pending ops",
            &self.trace_id,
            self.pending.len()
        );

        self.cmd_rx.close();
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            let _ = cmd.reply_tx.send(Reply::Aborted);
        }

        for cmd in self.pending.drain(..) {
            let _ = cmd.reply_tx.send(Reply::Aborted);
        }
    }
}
