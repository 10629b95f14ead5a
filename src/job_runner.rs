//! Two-lane job scheduler
//!
//! All asynchronous load/validate work is serialized into a single logical
//! stream: one drain task pops jobs one at a time, so no two jobs ever
//! mutate the graph concurrently. Two LIFO stacks feed it — "fast" for
//! interactive single-file work, "slow" for bulk loads. A tick always pops
//! from the fast stack first, so freshly enqueued fast work preempts both
//! older fast work and all slow work. This is deliberately neither FIFO
//! nor fair.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{BinderyError, Result};
use crate::fileish::AnyNode;

pub type JobFn = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// What a job is about, for logging
pub enum JobContext {
    Node(AnyNode),
    Doc { workspace: String, doc: String },
}

impl fmt::Display for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobContext::Node(node) => f.write_str(node.abs_path()),
            JobContext::Doc { doc, .. } => f.write_str(doc),
        }
    }
}

pub struct Job {
    pub kind: &'static str,
    pub context: JobContext,
    pub slow: bool,
    pub run: JobFn,
}

type SettleResult = std::result::Result<(), (String, String)>;

#[derive(Default)]
struct Shared {
    fast: Vec<Job>,
    slow: Vec<Job>,
    draining: bool,
    waiters: Vec<oneshot::Sender<SettleResult>>,
}

/// Handle to the single global run loop. Clones share the same stream.
#[derive(Clone, Default)]
pub struct JobRunner {
    shared: Arc<Mutex<Shared>>,
}

impl JobRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a job onto its lane and make sure the drain task is running.
    /// Must be called from within a tokio runtime.
    pub fn enqueue(&self, job: Job) {
        debug!(
            kind = job.kind,
            context = %job.context,
            lane = if job.slow { "slow" } else { "fast" },
            "job enqueued"
        );
        let spawn_drain = {
            let mut shared = self.shared.lock().unwrap();
            if job.slow {
                shared.slow.push(job);
            } else {
                shared.fast.push(job);
            }
            if shared.draining {
                false
            } else {
                shared.draining = true;
                true
            }
        };
        if spawn_drain {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(Self::drain(shared));
        }
    }

    /// Jobs currently queued (not counting one in flight)
    pub fn queue_len(&self) -> usize {
        let shared = self.shared.lock().unwrap();
        shared.fast.len() + shared.slow.len()
    }

    /// Resolves once the run loop drains to idle — immediately when nothing
    /// is queued or in flight. If a job faults during this drain cycle the
    /// future carries that fault; a later `done()` settles clean once the
    /// loop quiesces again.
    pub async fn done(&self) -> Result<()> {
        let receiver = {
            let mut shared = self.shared.lock().unwrap();
            if !shared.draining && shared.fast.is_empty() && shared.slow.is_empty() {
                None
            } else {
                let (tx, rx) = oneshot::channel();
                shared.waiters.push(tx);
                Some(rx)
            }
        };
        match receiver {
            None => Ok(()),
            Some(rx) => match rx.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err((kind, details))) => Err(BinderyError::JobFailed { kind, details }),
                // runner dropped mid-flight; nothing left to wait for
                Err(_) => Ok(()),
            },
        }
    }

    async fn drain(shared: Arc<Mutex<Shared>>) {
        loop {
            let job = {
                let mut s = shared.lock().unwrap();
                s.fast.pop().or_else(|| s.slow.pop())
            };
            let Some(job) = job else {
                let waiters = {
                    let mut s = shared.lock().unwrap();
                    if !s.fast.is_empty() || !s.slow.is_empty() {
                        // something was enqueued between the pops; keep going
                        continue;
                    }
                    s.draining = false;
                    std::mem::take(&mut s.waiters)
                };
                debug!("no more pending jobs, run loop settling");
                for waiter in waiters {
                    let _ = waiter.send(Ok(()));
                }
                return;
            };

            let kind = job.kind;
            let context = job.context.to_string();
            debug!(
                kind,
                context = %context,
                lane = if job.slow { "slow" } else { "fast" },
                "job started"
            );
            let started = Instant::now();
            let outcome = std::panic::AssertUnwindSafe((job.run)())
                .catch_unwind()
                .await;
            let elapsed_ms = started.elapsed().as_millis();
            let fault = match outcome {
                Ok(Ok(())) => {
                    debug!(kind, context = %context, elapsed_ms, "job finished");
                    None
                }
                Ok(Err(err)) => Some(err.to_string()),
                Err(panic) => Some(panic_message(panic)),
            };
            // A fault never stops the loop: reject the waiters of this drain
            // cycle and keep running whatever is still queued.
            if let Some(details) = fault {
                warn!(kind, context = %context, details = %details, "job failed");
                let waiters = {
                    let mut s = shared.lock().unwrap();
                    std::mem::take(&mut s.waiters)
                };
                for waiter in waiters {
                    let _ = waiter.send(Err((kind.to_string(), details.clone())));
                }
            }
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "job panicked".to_string()
    }
}
