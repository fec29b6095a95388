use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Queue depth before `submit` applies backpressure.
const CHAIN_CAPACITY: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("edit chain closed")]
    Closed,
}

type ChainTask = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Serialized task chain for one document.
///
/// Every submitted task runs after all previously submitted tasks, in
/// FIFO order, on a single worker. Task outcomes (including errors) travel
/// only to the submitter through its own oneshot, so a failing task never
/// prevents the next one from starting.
pub struct EditChain {
    tx: mpsc::Sender<ChainTask>,
}

impl EditChain {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let (tx, mut rx) = mpsc::channel::<ChainTask>(CHAIN_CAPACITY);
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                task.await;
            }
            debug!(chain = %name, "edit chain closed");
        });
        Self { tx }
    }

    /// Enqueue a task and return a handle to its own outcome. The send
    /// resolves once the task is queued (not once it ran); await the
    /// returned [`Submitted`] for the result.
    pub async fn submit<F, T>(&self, fut: F) -> Result<Submitted<T>, ChainError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let task: ChainTask = Box::pin(async move {
            let out = fut.await;
            // Submitter may have gone away; the chain doesn't care.
            let _ = done_tx.send(out);
        });
        self.tx.send(task).await.map_err(|_| ChainError::Closed)?;
        Ok(Submitted { rx: done_rx })
    }

    /// Enqueue and wait for the task's own result.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, ChainError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit(fut).await?.outcome().await
    }
}

/// Handle to one submitted task's result.
pub struct Submitted<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Submitted<T> {
    pub async fn outcome(self) -> Result<T, ChainError> {
        self.rx.await.map_err(|_| ChainError::Closed)
    }
}
