use std::sync::Arc;

use tokio::sync::{
    mpsc::{self, error::TrySendError},
    Mutex,
};

use common::error::AppError;

/// A request to run a document through the processing pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub workspace_id: String,
    pub document_id: String,
    pub force: bool,
}

/// Receiver shared by every worker of the pool.
pub type SharedReceiver = Arc<Mutex<mpsc::Receiver<ProcessRequest>>>;

/// Bounded hand-off between request handlers and the worker pool.
#[derive(Clone)]
pub struct ProcessingQueue {
    sender: mpsc::Sender<ProcessRequest>,
}

impl ProcessingQueue {
    pub fn new(capacity: usize) -> (Self, SharedReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, Arc::new(Mutex::new(receiver)))
    }

    /// Never waits. A full queue is reported as `Conflict` so callers can retry later.
    pub fn enqueue(&self, request: ProcessRequest) -> Result<(), AppError> {
        match self.sender.try_send(request) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                Err(AppError::Conflict("processing queue is full".into()))
            }
            Err(TrySendError::Closed(_)) => {
                Err(AppError::InternalError("processing queue is closed".into()))
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    pub fn available(&self) -> usize {
        self.sender.capacity()
    }

    /// True once every worker receiver is gone.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &str) -> ProcessRequest {
        ProcessRequest {
            workspace_id: "ws".into(),
            document_id: id.into(),
            force: false,
        }
    }

    #[tokio::test]
    async fn test_enqueue_applies_backpressure() {
        let (queue, receiver) = ProcessingQueue::new(2);
        queue.enqueue(request("a")).expect("first");
        queue.enqueue(request("b")).expect("second");
        assert_eq!(queue.available(), 0);

        let full = queue.enqueue(request("c"));
        assert!(matches!(full, Err(AppError::Conflict(_))));

        let received = receiver.lock().await.recv().await;
        assert_eq!(received, Some(request("a")));
        queue.enqueue(request("c")).expect("room again");
    }

    #[tokio::test]
    async fn test_enqueue_after_close_is_internal_error() {
        let (queue, receiver) = ProcessingQueue::new(1);
        assert!(!queue.is_closed());
        drop(receiver);
        assert!(queue.is_closed());
        let closed = queue.enqueue(request("a"));
        assert!(matches!(closed, Err(AppError::InternalError(_))));
    }
}
