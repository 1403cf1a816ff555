//! Single-worker serialized executor.
//!
//! The browser connection must be driven from one execution context. The
//! [`SyncBridge`] owns a dedicated OS thread with a single-threaded tokio
//! runtime; the worker state `S` is built on that thread and never leaves
//! it. Callers submit jobs over an unbounded FIFO queue and await the reply.
//!
//! Jobs run one at a time and to completion. Dropping the caller's future
//! only abandons the wait; the job itself keeps running.

use futures::future::{FutureExt, LocalBoxFuture};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::result::{ProbeError, ProbeResult};

type Job<S> = Box<dyn for<'a> FnOnce(&'a mut S) -> LocalBoxFuture<'a, ()> + Send>;

fn boxed_job<S, F>(f: F) -> Job<S>
where
    F: for<'a> FnOnce(&'a mut S) -> LocalBoxFuture<'a, ()> + Send + 'static,
{
    Box::new(f)
}

/// Handle to the serialized worker
pub struct SyncBridge<S> {
    tx: Option<mpsc::UnboundedSender<Job<S>>>,
    worker: Option<JoinHandle<()>>,
    name: String,
}

impl<S> fmt::Debug for SyncBridge<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncBridge")
            .field("name", &self.name)
            .field("running", &self.tx.is_some())
            .finish_non_exhaustive()
    }
}

impl<S: 'static> SyncBridge<S> {
    /// Start the worker thread and build its state with `init`
    pub fn spawn<F>(name: impl Into<String>, init: F) -> ProbeResult<Self>
    where
        F: FnOnce() -> S + Send + 'static,
    {
        let name = name.into();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ProbeError::bridge(format!("worker runtime: {e}")))?;
        let (tx, mut rx) = mpsc::unbounded_channel::<Job<S>>();

        let thread_name = name.clone();
        let worker = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let mut state = init();
                runtime.block_on(async {
                    while let Some(job) = rx.recv().await {
                        job(&mut state).await;
                    }
                });
                debug!(worker = %thread_name, "worker queue closed");
            })
            .map_err(|e| ProbeError::bridge(format!("worker thread: {e}")))?;

        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
            name,
        })
    }

    /// Run `op` on the worker with exclusive access to the state
    ///
    /// ```ignore
    /// let title = bridge
    ///     .run(|sessions| Box::pin(async move { sessions.navigate(&url).await }))
    ///     .await?;
    /// ```
    pub async fn run<T, F>(&self, op: F) -> ProbeResult<T>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(&'a mut S) -> LocalBoxFuture<'a, ProbeResult<T>> + Send + 'static,
    {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| ProbeError::bridge("worker has been shut down"))?;
        let (reply_tx, reply_rx) = oneshot::channel::<ProbeResult<T>>();

        let job = boxed_job(move |state: &mut S| {
            async move {
                let outcome = AssertUnwindSafe(op(state)).catch_unwind().await;
                let reply = outcome.unwrap_or_else(|panic| {
                    let message = panic_message(panic.as_ref());
                    error!(message = %message, "worker job panicked");
                    Err(ProbeError::bridge(format!("job panicked: {message}")))
                });
                if reply_tx.send(reply).is_err() {
                    debug!("caller went away before the job finished");
                }
            }
            .boxed_local()
        });

        tx.send(job)
            .map_err(|_| ProbeError::bridge("worker stopped"))?;
        reply_rx
            .await
            .map_err(|_| ProbeError::bridge("worker stopped before replying"))?
    }

    /// Close the queue, let queued jobs finish and join the worker
    pub async fn shutdown(mut self) -> ProbeResult<()> {
        drop(self.tx.take());
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || worker.join())
            .await
            .map_err(|e| ProbeError::bridge(format!("join task: {e}")))?
            .map_err(|panic| ProbeError::bridge(panic_message(panic.as_ref())))
    }
}

impl<S> Drop for SyncBridge<S> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            warn!(worker = %self.name, "bridge dropped without shutdown, worker detached");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("unknown panic"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::rc::Rc;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct Counter {
        value: u32,
        // Rc keeps the state !Send
        log: Rc<std::cell::RefCell<Vec<u32>>>,
    }

    fn traced_job(
        id: u32,
        trace: Arc<Mutex<Vec<String>>>,
    ) -> impl for<'a> FnOnce(&'a mut Counter) -> LocalBoxFuture<'a, ProbeResult<()>> + Send + 'static
    {
        move |c| {
            Box::pin(async move {
                trace.lock().unwrap().push(format!("start-{id}"));
                tokio::time::sleep(Duration::from_millis(20)).await;
                c.log.borrow_mut().push(id);
                trace.lock().unwrap().push(format!("end-{id}"));
                Ok(())
            })
        }
    }

    mod ordering_tests {
        use super::*;

        #[tokio::test]
        async fn test_jobs_see_shared_state() {
            let bridge = SyncBridge::spawn("test-worker", Counter::default).unwrap();
            for _ in 0..3 {
                bridge
                    .run(|c: &mut Counter| {
                        Box::pin(async move {
                            c.value += 1;
                            Ok(())
                        })
                    })
                    .await
                    .unwrap();
            }
            let value = bridge
                .run(|c: &mut Counter| Box::pin(async move { Ok(c.value) }))
                .await
                .unwrap();
            assert_eq!(value, 3);
            bridge.shutdown().await.unwrap();
        }

        #[tokio::test]
        async fn test_concurrent_jobs_do_not_interleave() {
            let bridge = SyncBridge::spawn("test-worker", Counter::default).unwrap();
            let trace = Arc::new(Mutex::new(Vec::<String>::new()));

            let (a, b, c) = tokio::join!(
                bridge.run(traced_job(1, trace.clone())),
                bridge.run(traced_job(2, trace.clone())),
                bridge.run(traced_job(3, trace.clone())),
            );
            a.unwrap();
            b.unwrap();
            c.unwrap();

            let trace = trace.lock().unwrap().clone();
            for pair in trace.chunks(2) {
                let start_id = pair[0].trim_start_matches("start-");
                let end_id = pair[1].trim_start_matches("end-");
                assert_eq!(start_id, end_id, "jobs interleaved: {trace:?}");
            }
            bridge.shutdown().await.unwrap();
        }
    }

    mod failure_tests {
        use super::*;

        #[tokio::test]
        async fn test_panic_becomes_bridge_error() {
            let bridge = SyncBridge::spawn("test-worker", Counter::default).unwrap();
            let err = bridge
                .run(|c: &mut Counter| {
                    Box::pin(async move {
                        if c.value == 0 {
                            panic!("boom");
                        }
                        Ok(())
                    })
                })
                .await
                .unwrap_err();
            assert!(matches!(err, ProbeError::Bridge { .. }));
            assert!(err.to_string().contains("boom"));

            // The worker survives a panicking job
            let value = bridge
                .run(|c: &mut Counter| Box::pin(async move { Ok(c.value) }))
                .await
                .unwrap();
            assert_eq!(value, 0);
            bridge.shutdown().await.unwrap();
        }

        #[tokio::test]
        async fn test_job_errors_pass_through() {
            let bridge = SyncBridge::spawn("test-worker", Counter::default).unwrap();
            let err = bridge
                .run(|_c: &mut Counter| Box::pin(async move { Err::<(), _>(ProbeError::NoSession) }))
                .await
                .unwrap_err();
            assert!(matches!(err, ProbeError::NoSession));
            bridge.shutdown().await.unwrap();
        }

        #[tokio::test]
        async fn test_abandoned_caller_does_not_cancel_job() {
            let bridge = SyncBridge::spawn("test-worker", Counter::default).unwrap();
            let abandoned = bridge.run(|c: &mut Counter| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    c.value = 42;
                    Ok(())
                })
            });
            let timed_out = tokio::time::timeout(Duration::from_millis(1), abandoned).await;
            assert!(timed_out.is_err());

            let value = bridge
                .run(|c: &mut Counter| Box::pin(async move { Ok(c.value) }))
                .await
                .unwrap();
            assert_eq!(value, 42);
            bridge.shutdown().await.unwrap();
        }

        #[tokio::test]
        async fn test_shutdown_drains_queue() {
            let bridge = SyncBridge::spawn("test-worker", Counter::default).unwrap();
            let seen = Arc::new(Mutex::new(0u32));
            let seen_in_job = seen.clone();
            bridge
                .run(move |_c: &mut Counter| {
                    Box::pin(async move {
                        *seen_in_job.lock().unwrap() += 1;
                        Ok(())
                    })
                })
                .await
                .unwrap();
            bridge.shutdown().await.unwrap();
            assert_eq!(*seen.lock().unwrap(), 1);
        }
    }
}
