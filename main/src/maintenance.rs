use std::{sync::Arc, time::Duration};

use chrono::Duration as ChronoDuration;
use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::document::Document},
};
use ingestion_pipeline::{ContentStore, DocumentProcessor};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub workspaces: usize,
    pub points_reindexed: usize,
    pub blobs_removed: usize,
}

/// Periodic reconciliation and blob garbage collection until `cancel` fires.
/// The first sweep runs one full interval after startup.
pub async fn run_maintenance(
    db: Arc<SurrealDbClient>,
    processor: Arc<DocumentProcessor>,
    content_store: ContentStore,
    interval: Duration,
    cancel: CancellationToken,
) {
    let interval = interval.max(Duration::from_secs(1));
    let gc_grace = ChronoDuration::from_std(interval).unwrap_or_else(|_| ChronoDuration::hours(1));

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    info!(interval_secs = interval.as_secs(), "Maintenance loop started");
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("Maintenance loop stopping");
                break;
            }
            _ = ticker.tick() => {
                match run_sweep(&db, &processor, &content_store, gc_grace).await {
                    Ok(report) => info!(
                        workspaces = report.workspaces,
                        points_reindexed = report.points_reindexed,
                        blobs_removed = report.blobs_removed,
                        "Maintenance sweep finished"
                    ),
                    Err(err) => error!(error = %err, "Maintenance sweep failed"),
                }
            }
        }
    }
}

/// One pass: re-derive vector points for every workspace, then drop unreferenced blobs
/// older than `gc_grace`. A failing workspace does not stop the others.
pub async fn run_sweep(
    db: &SurrealDbClient,
    processor: &DocumentProcessor,
    content_store: &ContentStore,
    gc_grace: ChronoDuration,
) -> Result<SweepReport, AppError> {
    let workspaces = Document::list_workspace_ids(db).await?;
    let mut report = SweepReport {
        workspaces: workspaces.len(),
        ..SweepReport::default()
    };

    for workspace_id in &workspaces {
        match processor.reconcile_workspace(workspace_id).await {
            Ok(points) => report.points_reindexed += points,
            Err(err) => warn!(workspace_id = %workspace_id, error = %err, "Reconciliation failed"),
        }
    }

    report.blobs_removed = content_store.collect_garbage(gc_grace).await?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use common::{
        storage::{
            store::testing::{memory_storage, test_config_memory},
            vector_index::{collection_name, MemoryVectorIndex, VectorIndex},
        },
        utils::embedding::EmbeddingProvider,
    };
    use ingestion_pipeline::NewDocument;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_sweep_restores_points_and_collects_orphans() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized().await.expect("indexes");
        let db = Arc::new(db);

        let config = test_config_memory();
        let content_store = ContentStore::new(Arc::clone(&db), memory_storage(), "documents");
        let index = Arc::new(MemoryVectorIndex::default());
        let processor = DocumentProcessor::new(
            Arc::clone(&db),
            &config,
            content_store.clone(),
            Arc::new(EmbeddingProvider::new_hashed(32)),
            index.clone(),
        );

        let uploaded = content_store
            .upload_document(
                NewDocument {
                    workspace_id: "ws".into(),
                    file_name: "notes.txt".into(),
                    ..NewDocument::default()
                },
                Bytes::from_static(b"Quarterly notes about revenue."),
            )
            .await
            .expect("upload");
        processor
            .process_document("ws", &uploaded.document.id, false)
            .await
            .expect("process");
        content_store
            .put("ws", "orphan.txt", "text/plain", Bytes::from_static(b"orphan"))
            .await
            .expect("orphan");

        let collection = collection_name("ws");
        index
            .delete_by_document(&collection, &uploaded.document.id)
            .await
            .expect("drop points");
        assert_eq!(index.point_count(&collection).await, 0);

        let report = run_sweep(&db, &processor, &content_store, ChronoDuration::zero())
            .await
            .expect("sweep");

        assert_eq!(
            report,
            SweepReport {
                workspaces: 1,
                points_reindexed: 1,
                blobs_removed: 1,
            }
        );
        assert_eq!(index.point_count(&collection).await, 1);
    }

    #[tokio::test]
    async fn test_maintenance_loop_stops_on_cancel() {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        let content_store = ContentStore::new(Arc::clone(&db), memory_storage(), "documents");
        let processor = Arc::new(DocumentProcessor::new(
            Arc::clone(&db),
            &test_config_memory(),
            content_store.clone(),
            Arc::new(EmbeddingProvider::new_hashed(8)),
            Arc::new(MemoryVectorIndex::default()),
        ));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_maintenance(
            db,
            processor,
            content_store,
            Duration::from_secs(3600),
            cancel.clone(),
        ));
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop stopped")
            .expect("join");
    }
}
