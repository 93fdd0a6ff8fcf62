//! A bounded worker pool: N workers consume no-argument fallible tasks from
//! a handoff channel, run each at most once, and never let one task's
//! failure cancel its siblings.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// A unit of work: no arguments, fallible, boxed so the pool can hold a
/// heterogeneous mix of create/update/delete closures.
pub type Task = Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send>>;

/// The aggregated outcome of a run: every task error collected, in
/// completion order (which is not enqueue order).
#[derive(Debug, Default)]
pub struct JoinedError {
    pub errors: Vec<anyhow::Error>,
}

impl JoinedError {
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl std::fmt::Display for JoinedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} task(s) failed:", self.errors.len())?;
        for (i, err) in self.errors.iter().enumerate() {
            writeln!(f, "  {}. {err}", i + 1)?;
        }
        Ok(())
    }
}

impl std::error::Error for JoinedError {}

/// Runs `tasks` across `worker_count` concurrent workers.
///
/// Cancelling `cancellation` stops the producer from handing out any task
/// that hasn't started yet; tasks already in flight run to completion and
/// their errors are still collected. Returns `Ok(())` iff every task that
/// ran returned `Ok`.
pub async fn run(
    worker_count: usize,
    tasks: Vec<Task>,
    cancellation: CancellationToken,
) -> Result<(), JoinedError> {
    let worker_count = worker_count.max(1);
    // Capacity 1, not `worker_count`: a true rendezvous handoff isn't
    // expressible with `mpsc`, whose minimum buffer is 1 slot, but a wider
    // buffer would let that many already-enqueued tasks start after
    // cancellation was observed. Capacity 1 bounds that leak to at most one
    // task in flight per producer check.
    let (tx, rx) = mpsc::channel::<Task>(1);
    let rx = Arc::new(Mutex::new(rx));

    let mut workers = JoinSet::new();
    for _ in 0..worker_count {
        let rx = rx.clone();
        workers.spawn(async move {
            let mut errors = Vec::new();
            loop {
                let next = rx.lock().await.recv().await;
                let Some(task) = next else { break };
                if let Err(err) = task.await {
                    errors.push(err);
                }
            }
            errors
        });
    }

    // Producer: the cancellation check lives here, per the contract - no
    // task that hasn't started yet will start once cancelled.
    for task in tasks {
        tokio::select! {
            () = cancellation.cancelled() => {
                tracing::debug!("cancellation observed, draining remaining enqueue");
                break;
            }
            send_result = tx.send(task) => {
                if send_result.is_err() {
                    break;
                }
            }
        }
    }
    drop(tx);

    let mut joined = JoinedError::default();
    while let Some(result) = workers.join_next().await {
        match result {
            Ok(errors) => joined.errors.extend(errors),
            Err(join_err) => joined.errors.push(anyhow::anyhow!("worker task panicked: {join_err}")),
        }
    }

    if joined.is_empty() { Ok(()) } else { Err(joined) }
}
