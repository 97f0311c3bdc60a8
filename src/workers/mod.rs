//! Ordered parallel block pipeline.
//!
//! The calling thread reads jobs from the source, hands them to a fixed pool of
//! scoped worker threads over a bounded channel, and commits results strictly
//! in index order from a reorder buffer. At most `threads * 2` blocks are in
//! flight (queued, being processed, or waiting to be committed) at any time.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_channel::bounded;

use crate::progress::ProgressTracker;
use crate::{ArchiverError, Result};

/// Blocks allowed in flight per worker.
const WINDOW_PER_WORKER: usize = 2;

enum Message<O> {
    Finished(u64, O),
    Failed(ArchiverError),
}

/// Run `source` through a pool of `threads` workers and commit in order.
///
/// `make_worker` runs once on each worker thread to build its per-thread state
/// (codec contexts and the like). `commit` runs on the calling thread for block
/// 0, 1, 2, ... and returns the number of original bytes the block accounts
/// for, which is fed to `tracker`.
///
/// The first error from the source, a worker, or `commit` stops the pipeline:
/// queued jobs are skipped, in-flight ones are drained, and that error is
/// returned. Returns the number of committed blocks.
pub fn run_ordered<I, O, S, M, W, C>(
    threads: usize,
    source: S,
    make_worker: M,
    mut commit: C,
    tracker: &mut ProgressTracker<'_>,
) -> Result<u64>
where
    I: Send,
    O: Send,
    S: IntoIterator<Item = Result<I>>,
    M: Fn() -> Result<W> + Sync,
    W: FnMut(u64, I) -> Result<O>,
    C: FnMut(u64, O) -> Result<u64>,
{
    let threads = threads.max(1);
    let window = threads * WINDOW_PER_WORKER;
    let cancelled = AtomicBool::new(false);

    let (job_tx, job_rx) = bounded::<(u64, I)>(window);
    let (done_tx, done_rx) = bounded::<Message<O>>(window);

    thread::scope(|s| {
        for _ in 0..threads {
            let job_rx = job_rx.clone();
            let done_tx = done_tx.clone();
            let cancelled = &cancelled;
            let make_worker = &make_worker;
            s.spawn(move || {
                let mut work = match guarded(make_worker) {
                    Ok(w) => w,
                    Err(e) => {
                        cancelled.store(true, Ordering::SeqCst);
                        let _ = done_tx.send(Message::Failed(e));
                        return;
                    }
                };
                for (index, item) in job_rx.iter() {
                    if cancelled.load(Ordering::SeqCst) {
                        continue;
                    }
                    let msg = match guarded(|| work(index, item)) {
                        Ok(out) => Message::Finished(index, out),
                        Err(e) => {
                            cancelled.store(true, Ordering::SeqCst);
                            Message::Failed(e)
                        }
                    };
                    if done_tx.send(msg).is_err() {
                        break;
                    }
                }
            });
        }
        drop(job_rx);
        drop(done_tx);

        let mut source = source.into_iter();
        let mut pending: BTreeMap<u64, O> = BTreeMap::new();
        let mut sent = 0u64;
        let mut committed = 0u64;
        let mut exhausted = false;

        let outcome = 'pipeline: loop {
            while !exhausted && ((sent - committed) as usize) < window {
                match source.next() {
                    Some(Ok(item)) => {
                        // Capacity equals the window, so this never blocks.
                        if job_tx.send((sent, item)).is_err() {
                            break 'pipeline Err(ArchiverError::Cancelled);
                        }
                        sent += 1;
                    }
                    Some(Err(e)) => break 'pipeline Err(e),
                    None => exhausted = true,
                }
            }
            if committed == sent {
                break Ok(committed);
            }

            match done_rx.recv() {
                Ok(Message::Finished(index, out)) => {
                    pending.insert(index, out);
                }
                Ok(Message::Failed(e)) => break Err(e),
                Err(_) => break Err(ArchiverError::Cancelled),
            }

            let mut failed = None;
            while let Some(out) = pending.remove(&committed) {
                match commit(committed, out) {
                    Ok(bytes) => {
                        committed += 1;
                        tracker.advance(bytes);
                    }
                    Err(e) => {
                        failed = Some(e);
                        break;
                    }
                }
            }
            if let Some(e) = failed {
                break Err(e);
            }
        };

        if outcome.is_err() {
            cancelled.store(true, Ordering::SeqCst);
        }
        drop(job_tx);
        // Wait for every worker to observe the cancellation and exit.
        let mut first_worker_error = None;
        for msg in done_rx.iter() {
            if let Message::Failed(e) = msg {
                first_worker_error.get_or_insert(e);
            }
        }

        match outcome {
            Err(ArchiverError::Cancelled) => Err(first_worker_error.unwrap_or(ArchiverError::Cancelled)),
            other => other,
        }
    })
}

/// Run `f`, turning a panic into an error instead of tearing down the scope.
fn guarded<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(ArchiverError::Integrity(format!("worker panicked: {}", msg)))
    })
}
