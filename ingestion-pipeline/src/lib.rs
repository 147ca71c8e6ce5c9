#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod chunker;
pub mod content_store;
pub mod extraction;
pub mod pipeline;
pub mod queue;

pub use content_store::{ContentStore, NewDocument, StoredBlob, UploadedDocument};
pub use pipeline::{DocumentProcessor, IngestionConfig, IngestionTuning};
pub use queue::{ProcessRequest, ProcessingQueue, SharedReceiver};

use std::sync::Arc;

use common::error::AppError;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Runs `worker_count` workers over the shared queue until `cancel` fires or every sender
/// is dropped. A document already being processed is finished before its worker stops.
pub async fn run_worker_pool(
    processor: Arc<DocumentProcessor>,
    receiver: SharedReceiver,
    worker_count: usize,
    cancel: CancellationToken,
) {
    let workers = (0..worker_count.max(1)).map(|_| {
        let processor = Arc::clone(&processor);
        let receiver = Arc::clone(&receiver);
        let cancel = cancel.clone();
        tokio::spawn(run_worker(processor, receiver, cancel))
    });

    for result in join_all(workers).await {
        if let Err(err) = result {
            error!(error = %err, "processing worker panicked");
        }
    }
}

async fn run_worker(
    processor: Arc<DocumentProcessor>,
    receiver: SharedReceiver,
    cancel: CancellationToken,
) {
    let worker_id = format!("processing-worker-{}", Uuid::new_v4());
    info!(%worker_id, "processing worker started");

    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break,
            next = async { receiver.lock().await.recv().await } => next,
        };
        let Some(request) = next else {
            break;
        };

        let document_id = request.document_id.clone();
        info!(
            %worker_id,
            %document_id,
            workspace_id = %request.workspace_id,
            force = request.force,
            "claimed processing request"
        );

        match processor
            .process_document(&request.workspace_id, &request.document_id, request.force)
            .await
        {
            Ok(document) => {
                info!(
                    %worker_id,
                    %document_id,
                    chunk_count = document.chunk_count,
                    "processing request finished"
                );
            }
            Err(err @ (AppError::Conflict(_) | AppError::NotFound(_))) => {
                warn!(%worker_id, %document_id, error = %err, "processing request skipped");
            }
            Err(err) => {
                error!(%worker_id, %document_id, error = %err, "processing request failed");
            }
        }
    }

    info!(%worker_id, "processing worker stopped");
}
