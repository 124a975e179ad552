use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Once,
};

use futures::future::join_all;
use tokio::{
    sync::{mpsc, oneshot},
    task,
};
use tokio_util::sync::CancellationToken;

use shutlock::{Cfg, RwLock};

static INIT: Once = Once::new();

fn init() {
    INIT.call_once(env_logger::init);
}

/// Gives spawned tasks and the lock task a chance to run until they block.
async fn settle() {
    for _ in 0..50 {
        task::yield_now().await;
    }
}

#[tokio::test]
async fn read_cycle() {
    init();
    let lock = RwLock::new();
    assert!(lock.acquire_read(None).await);
    assert!(lock.release_read().await);
    lock.close().await.unwrap();
}

#[tokio::test]
async fn write_cycle() {
    init();
    let lock = RwLock::new();
    assert!(lock.acquire_write(None).await);
    assert!(lock.release_write().await);
    lock.close().await.unwrap();
}

#[tokio::test]
async fn lock_is_reusable() {
    init();
    let lock = RwLock::new();

    for _ in 0..3 {
        assert!(lock.acquire_read(None).await);
        assert!(lock.release_read().await);
        assert!(lock.acquire_write(None).await);
        assert!(lock.release_write().await);
    }

    lock.close().await.unwrap();
}

#[tokio::test]
async fn writer_preference() {
    init();
    let lock = RwLock::new();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel();
    let (go_tx, go_rx) = oneshot::channel();

    for _ in 0..3 {
        assert!(lock.acquire_read(None).await);
    }

    let wl = lock.clone();
    let wevt = evt_tx.clone();
    let writer = task::spawn(async move {
        assert!(wl.acquire_write(None).await);
        wevt.send("write granted").unwrap();
        go_rx.await.unwrap();
        assert!(wl.release_write().await);
    });
    settle().await;

    let rl = lock.clone();
    let revt = evt_tx.clone();
    let reader = task::spawn(async move {
        assert!(rl.acquire_read(None).await);
        revt.send("read granted").unwrap();
        assert!(rl.release_read().await);
    });
    settle().await;

    // both the writer and the late reader are blocked
    assert!(evt_rx.try_recv().is_err());

    // after the last reader releases, the writer is granted before the
    // queued reader
    for _ in 0..3 {
        assert!(lock.release_read().await);
    }
    settle().await;
    assert_eq!(evt_rx.try_recv().unwrap(), "write granted");
    assert!(evt_rx.try_recv().is_err());

    go_tx.send(()).unwrap();
    settle().await;
    assert_eq!(evt_rx.try_recv().unwrap(), "read granted");

    writer.await.unwrap();
    reader.await.unwrap();
    lock.close().await.unwrap();
}

#[tokio::test]
async fn second_queued_writer_still_blocks_readers() {
    init();
    let lock = RwLock::new();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel();

    assert!(lock.acquire_read(None).await);

    // two writers queue behind the reader in arrival order
    let mut writers = Vec::new();
    for id in ["first writer", "second writer"] {
        let lock = lock.clone();
        let evt = evt_tx.clone();
        writers.push(task::spawn(async move {
            assert!(lock.acquire_write(None).await);
            evt.send(id).unwrap();
            task::yield_now().await;
            assert!(lock.release_write().await);
        }));
        settle().await;
    }

    let rl = lock.clone();
    let revt = evt_tx.clone();
    let reader = task::spawn(async move {
        assert!(rl.acquire_read(None).await);
        revt.send("reader").unwrap();
        assert!(rl.release_read().await);
    });
    settle().await;
    assert!(evt_rx.try_recv().is_err());

    assert!(lock.release_read().await);
    settle().await;

    // both writers complete before the queued reader is granted
    assert_eq!(evt_rx.try_recv().unwrap(), "first writer");
    assert_eq!(evt_rx.try_recv().unwrap(), "second writer");
    assert_eq!(evt_rx.try_recv().unwrap(), "reader");

    for writer in writers {
        writer.await.unwrap();
    }
    reader.await.unwrap();
    lock.close().await.unwrap();
}

#[tokio::test]
async fn abort_of_queued_writer_closes_lock() {
    init();
    let lock = RwLock::new();

    for _ in 0..3 {
        assert!(lock.acquire_read(None).await);
    }

    let abort = CancellationToken::new();
    let wl = lock.clone();
    let wabort = abort.clone();
    let writer = task::spawn(async move { wl.acquire_write(Some(&wabort)).await });
    settle().await;

    abort.cancel();
    assert!(!writer.await.unwrap());
    settle().await;

    // the aborted queued acquisition has terminated the lock
    assert!(lock.is_closed());
    assert!(!lock.acquire_read(None).await);
    assert!(!lock.acquire_write(None).await);
    for _ in 0..3 {
        assert!(!lock.release_read().await);
    }
}

#[tokio::test]
async fn aborted_before_delivery() {
    init();
    let lock = RwLock::new();
    let abort = CancellationToken::new();
    abort.cancel();

    assert!(!lock.acquire_read(Some(&abort)).await);
    settle().await;

    assert!(lock.is_closed());
    assert!(!lock.acquire_write(None).await);
}

#[tokio::test]
async fn close_while_writer_held() {
    init();
    let lock = RwLock::new();
    assert!(lock.acquire_write(None).await);

    let rl = lock.clone();
    let reader = task::spawn(async move { rl.acquire_read(None).await });
    settle().await;

    lock.close().await.unwrap();
    assert!(!reader.await.unwrap());
    assert!(!lock.release_write().await);
}

#[tokio::test]
async fn close_is_idempotent() {
    init();
    let lock = RwLock::new();

    lock.close().await.unwrap();
    lock.close().await.unwrap();

    assert!(lock.is_closed());
    assert!(!lock.acquire_read(None).await);
    assert!(!lock.acquire_write(None).await);
    assert!(!lock.release_read().await);
    assert!(!lock.release_write().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn contending_writers_are_exclusive() {
    init();
    const TASKS: usize = 16;

    let lock = RwLock::new();
    let writers = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..TASKS)
        .map(|_| {
            let lock = lock.clone();
            let writers = writers.clone();
            task::spawn(async move {
                assert!(lock.acquire_write(None).await);
                assert_eq!(writers.fetch_add(1, Ordering::SeqCst), 0);
                task::yield_now().await;
                assert_eq!(writers.fetch_sub(1, Ordering::SeqCst), 1);
                assert!(lock.release_write().await);
            })
        })
        .collect();

    for res in join_all(tasks).await {
        res.unwrap();
    }

    // the lock is idle again
    assert!(lock.acquire_write(None).await);
    assert!(lock.release_write().await);
    lock.close().await.unwrap();
}

#[tokio::test]
async fn caller_managed_task() {
    init();
    let (task, lock) = RwLock::start(Cfg::default());
    let task = tokio::spawn(task.run());

    assert!(lock.acquire_read(None).await);
    assert!(lock.release_read().await);
    assert!(lock.acquire_write(None).await);
    assert!(lock.release_write().await);

    lock.close().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn external_shutdown_token() {
    init();
    let shutdown = CancellationToken::new();
    let lock = RwLock::with_shutdown(Cfg::default(), shutdown.clone());

    assert!(lock.acquire_read(None).await);
    assert!(lock.release_read().await);

    shutdown.cancel();
    settle().await;

    assert!(lock.is_closed());
    assert!(!lock.acquire_read(None).await);
    lock.close().await.unwrap();
}

#[tokio::test]
async fn release_without_hold_fails_task() {
    init();
    let lock = RwLock::new();

    // the task detects the misuse and halts
    assert!(!lock.release_read().await);
    settle().await;

    assert!(lock.is_closed());
    assert!(lock.close().await.is_err());
}
