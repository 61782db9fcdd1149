mod task;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::RequestError;
use crate::types::{RegisterRequest, RegisterResponse};

/// Anything that can carry out a single register transaction against the
/// field device. The production implementation is [`crate::serial::RtuLink`].
#[async_trait::async_trait]
pub trait RegisterLink: Send {
    /// perform one request/response exchange with the device
    async fn execute(
        &mut self,
        request: &RegisterRequest,
    ) -> Result<RegisterResponse, RequestError>;
}

type TransactionResult = Result<RegisterResponse, RequestError>;

/// completes the caller's oneshot exactly once
pub(crate) struct Promise {
    tx: Option<oneshot::Sender<TransactionResult>>,
}

impl Promise {
    fn new(tx: oneshot::Sender<TransactionResult>) -> Self {
        Self { tx: Some(tx) }
    }

    pub(crate) fn complete(&mut self, result: TransactionResult) {
        if let Some(tx) = self.tx.take() {
            // a failed send means the caller gave up on the request
            let _ = tx.send(result);
        }
    }
}

impl Drop for Promise {
    fn drop(&mut self) {
        self.complete(Err(RequestError::Shutdown));
    }
}

pub(crate) struct Transaction {
    pub(crate) request: RegisterRequest,
    pub(crate) promise: Promise,
    pub(crate) retried: bool,
}

/// Cloneable handle used to submit transactions to the broker queue.
///
/// Requests from concurrent TCP sessions funnel into a bounded FIFO
/// consumed by a single task, so at most one transaction is ever in
/// flight on the serial bus.
#[derive(Clone)]
pub struct Broker {
    tx: mpsc::Sender<Transaction>,
}

impl Broker {
    /// spawn the broker task around `link` and return a handle to its queue
    pub fn spawn<L>(link: L, queue_size: usize) -> (Self, JoinHandle<()>)
    where
        L: RegisterLink + 'static,
    {
        let (tx, rx) = mpsc::channel(queue_size);
        let handle = tokio::spawn(task::BrokerLoop::new(rx, link).run());
        (Broker { tx }, handle)
    }

    /// enqueue a request and wait for its outcome
    pub async fn submit(&self, request: RegisterRequest) -> TransactionResult {
        let (tx, rx) = oneshot::channel();
        let transaction = Transaction {
            request,
            promise: Promise::new(tx),
            retried: false,
        };
        if self.tx.send(transaction).await.is_err() {
            return Err(RequestError::Shutdown);
        }
        rx.await.unwrap_or(Err(RequestError::Shutdown))
    }
}
