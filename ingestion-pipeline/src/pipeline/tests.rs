use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            document::{Document, ProcessingStatus},
            document_chunk::DocumentChunk,
        },
        vector_index::VectorPoint,
    },
    utils::embedding::EmbeddingBatch,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    config::{IngestionConfig, IngestionTuning},
    services::{LoadedContent, PipelineServices},
    DocumentProcessor,
};
use crate::extraction::PageText;

const WORKSPACE: &str = "ws-test";
const TEST_EMBEDDING_DIM: usize = 8;

struct MockServices {
    pages: Vec<PageText>,
    short_embeddings: bool,
    fail_extraction: bool,
    fail_remove: bool,
    points: Mutex<Vec<VectorPoint>>,
    calls: Mutex<Vec<&'static str>>,
    embedded_batches: Mutex<Vec<usize>>,
    /// Forces the document back into `processing` on the next embedding call.
    restart_on_embed: Mutex<Option<(Arc<SurrealDbClient>, String)>>,
}

impl MockServices {
    fn new(pages: Vec<PageText>) -> Self {
        Self {
            pages,
            short_embeddings: false,
            fail_extraction: false,
            fail_remove: false,
            points: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            embedded_batches: Mutex::new(Vec::new()),
            restart_on_embed: Mutex::new(None),
        }
    }

    fn two_pages() -> Self {
        Self::new(vec![
            PageText {
                page_number: 1,
                text: "Revenue grew in the third quarter. Costs stayed flat.".into(),
            },
            PageText {
                page_number: 3,
                text: "Headcount rose by twelve percent. Hiring slowed in December.".into(),
            },
        ])
    }

    async fn record(&self, stage: &'static str) {
        self.calls.lock().await.push(stage);
    }
}

#[async_trait]
impl PipelineServices for MockServices {
    async fn load_content(&self, _document: &Document) -> Result<LoadedContent, AppError> {
        self.record("load").await;
        Ok(LoadedContent {
            bytes: Bytes::from_static(b"%PDF-mock"),
            mime_type: "application/pdf".into(),
        })
    }

    async fn extract_pages(
        &self,
        _bytes: Bytes,
        _mime_type: &str,
    ) -> Result<Vec<PageText>, AppError> {
        self.record("extract").await;
        if self.fail_extraction {
            return Err(AppError::DataIntegrity(
                crate::extraction::pdf::NO_TEXT_MESSAGE.into(),
            ));
        }
        Ok(self.pages.clone())
    }

    async fn embed_chunks(&self, texts: &[String]) -> Result<EmbeddingBatch, AppError> {
        self.record("embed").await;
        self.embedded_batches.lock().await.push(texts.len());
        if let Some((db, document_id)) = self.restart_on_embed.lock().await.take() {
            Document::begin_processing(&document_id, WORKSPACE, true, &db)
                .await
                .expect("restart processing");
        }
        let count = if self.short_embeddings {
            texts.len().saturating_sub(1)
        } else {
            texts.len()
        };
        Ok(EmbeddingBatch {
            embeddings: vec![vec![0.25; TEST_EMBEDDING_DIM]; count],
            dimension: TEST_EMBEDDING_DIM,
            model: Some("mock-embedder".into()),
        })
    }

    async fn index_chunks(
        &self,
        _collection: &str,
        dimension: usize,
        points: Vec<VectorPoint>,
    ) -> Result<(), AppError> {
        self.record("index").await;
        assert_eq!(dimension, TEST_EMBEDDING_DIM);
        let mut stored = self.points.lock().await;
        for point in points {
            stored.retain(|existing| existing.id != point.id);
            stored.push(point);
        }
        Ok(())
    }

    async fn remove_indexed_document(
        &self,
        _collection: &str,
        document_id: &str,
    ) -> Result<(), AppError> {
        self.record("remove").await;
        if self.fail_remove {
            return Err(AppError::upstream("qdrant", Some(503), "unavailable"));
        }
        self.points
            .lock()
            .await
            .retain(|point| point.payload.document_id != document_id);
        Ok(())
    }

    async fn indexed_point_ids(
        &self,
        _collection: &str,
        document_id: &str,
    ) -> Result<Vec<String>, AppError> {
        Ok(self
            .points
            .lock()
            .await
            .iter()
            .filter(|point| point.payload.document_id == document_id)
            .map(|point| point.id.clone())
            .collect())
    }
}

async fn setup_db() -> Arc<SurrealDbClient> {
    let namespace = "pipeline_test";
    let database = Uuid::new_v4().to_string();
    let db = SurrealDbClient::memory(namespace, &database)
        .await
        .expect("Failed to create in-memory SurrealDB");
    db.ensure_initialized()
        .await
        .expect("Failed to build indexes");
    Arc::new(db)
}

fn pipeline_config() -> IngestionConfig {
    IngestionConfig {
        tuning: IngestionTuning {
            chunk_size: 40,
            chunk_overlap: 5,
            ..IngestionTuning::default()
        },
    }
}

async fn store_document(db: &SurrealDbClient) -> Document {
    let document = Document::new(
        WORKSPACE.into(),
        "report.pdf".into(),
        None,
        vec!["finance".into()],
        "blob-1".into(),
    );
    db.store_item(document.clone())
        .await
        .expect("store document");
    document
}

fn processor(db: &Arc<SurrealDbClient>, services: Arc<MockServices>) -> DocumentProcessor {
    DocumentProcessor::with_services(Arc::clone(db), pipeline_config(), services)
}

#[tokio::test]
async fn test_processing_happy_path_persists_chunks_and_points() {
    let db = setup_db().await;
    let services = Arc::new(MockServices::two_pages());
    let processor = processor(&db, services.clone());
    let document = store_document(&db).await;

    let processed = processor
        .process_document(WORKSPACE, &document.id, false)
        .await
        .expect("pipeline succeeds");

    assert_eq!(processed.status, ProcessingStatus::Processed);
    assert!(processed.processed_at.is_some());

    let chunks = DocumentChunk::list_for_document(&document.id, &db)
        .await
        .expect("chunks");
    assert_eq!(chunks.len() as u32, processed.chunk_count);
    assert!(chunks.len() >= 4, "each page should split at the chunk size");
    for (position, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index as usize, position);
        assert!(chunk.page_number == 1 || chunk.page_number == 3);
    }
    assert_eq!(chunks[0].page_number, 1);
    assert_eq!(chunks.last().map(|c| c.page_number), Some(3));

    let points = services.points.lock().await.clone();
    assert_eq!(points.len(), chunks.len());
    let chunk = &chunks[1];
    let point = points
        .iter()
        .find(|point| point.id == chunk.id)
        .expect("point shares the chunk id");
    assert_eq!(point.payload.chunk_index, chunk.chunk_index);
    assert_eq!(point.payload.page_number, chunk.page_number);
    assert_eq!(point.payload.workspace_id, WORKSPACE);

    let call_log = services.calls.lock().await.clone();
    assert_eq!(call_log, ["remove", "load", "extract", "embed", "index"]);

    let status = processor
        .get_status(WORKSPACE, &document.id)
        .await
        .expect("status");
    assert_eq!(status.status, ProcessingStatus::Processed);
    assert_eq!(
        status.progress.map(|p| p.chunks_created),
        Some(processed.chunk_count)
    );
}

#[tokio::test]
async fn test_embedding_count_mismatch_marks_document_failed() {
    let db = setup_db().await;
    let mut services = MockServices::two_pages();
    services.short_embeddings = true;
    let services = Arc::new(services);
    let processor = processor(&db, services.clone());
    let document = store_document(&db).await;

    let result = processor
        .process_document(WORKSPACE, &document.id, false)
        .await;
    assert!(matches!(result, Err(AppError::DataIntegrity(_))));

    let stored: Document = db
        .get_item(&document.id)
        .await
        .expect("fetch")
        .expect("document present");
    assert_eq!(stored.status, ProcessingStatus::Failed);
    assert!(stored
        .error_message
        .as_deref()
        .is_some_and(|message| message.contains("embedding count mismatch")));

    assert!(services.points.lock().await.is_empty());
    let call_log = services.calls.lock().await.clone();
    assert!(!call_log.contains(&"index"));
}

#[tokio::test]
async fn test_extraction_failure_is_recorded() {
    let db = setup_db().await;
    let mut services = MockServices::two_pages();
    services.fail_extraction = true;
    let processor = processor(&db, Arc::new(services));
    let document = store_document(&db).await;

    let result = processor
        .process_document(WORKSPACE, &document.id, false)
        .await;
    assert!(result.is_err());

    let status = processor
        .get_status(WORKSPACE, &document.id)
        .await
        .expect("status");
    assert_eq!(status.status, ProcessingStatus::Failed);
    assert!(status
        .error_message
        .is_some_and(|message| message.contains("no text found in PDF")));
    assert!(status.progress.is_none());
}

#[tokio::test]
async fn test_blank_pages_produce_no_chunks_and_fail() {
    let db = setup_db().await;
    let services = Arc::new(MockServices::new(vec![PageText {
        page_number: 1,
        text: "   ".into(),
    }]));
    let processor = processor(&db, services);
    let document = store_document(&db).await;

    let result = processor
        .process_document(WORKSPACE, &document.id, false)
        .await;
    assert!(matches!(result, Err(AppError::DataIntegrity(_))));
}

#[tokio::test]
async fn test_processing_guard_rejects_concurrent_run_unless_forced() {
    let db = setup_db().await;
    let services = Arc::new(MockServices::two_pages());
    let processor = processor(&db, services.clone());
    let document = store_document(&db).await;

    // leftovers from an interrupted run
    let stale: Vec<DocumentChunk> = (0..6)
        .map(|index| {
            DocumentChunk::new(
                document.id.clone(),
                WORKSPACE.into(),
                index,
                9,
                format!("stale chunk {index}"),
            )
        })
        .collect();
    DocumentChunk::insert_batch(stale, &db)
        .await
        .expect("insert stale chunks");
    Document::begin_processing(&document.id, WORKSPACE, false, &db)
        .await
        .expect("mark processing");

    let rejected = processor
        .process_document(WORKSPACE, &document.id, false)
        .await;
    assert!(matches!(rejected, Err(AppError::Conflict(_))));
    assert!(services.calls.lock().await.is_empty());

    let still_processing: Document = db
        .get_item(&document.id)
        .await
        .expect("fetch")
        .expect("document present");
    assert_eq!(still_processing.status, ProcessingStatus::Processing);

    let forced = processor
        .process_document(WORKSPACE, &document.id, true)
        .await
        .expect("forced run succeeds");
    assert_eq!(forced.status, ProcessingStatus::Processed);

    let chunks = DocumentChunk::list_for_document(&document.id, &db)
        .await
        .expect("chunks");
    assert_eq!(chunks.len() as u32, forced.chunk_count);
    assert!(chunks.iter().all(|chunk| !chunk.content.starts_with("stale")));
}

#[tokio::test]
async fn test_reprocessing_a_processed_document_replaces_its_chunks() {
    let db = setup_db().await;
    let services = Arc::new(MockServices::two_pages());
    let processor = processor(&db, services.clone());
    let document = store_document(&db).await;

    let first = processor
        .process_document(WORKSPACE, &document.id, false)
        .await
        .expect("first run");
    let first_ids: Vec<String> = DocumentChunk::list_for_document(&document.id, &db)
        .await
        .expect("chunks")
        .into_iter()
        .map(|chunk| chunk.id)
        .collect();

    let second = processor
        .process_document(WORKSPACE, &document.id, false)
        .await
        .expect("second run");
    assert_eq!(first.chunk_count, second.chunk_count);

    let second_chunks = DocumentChunk::list_for_document(&document.id, &db)
        .await
        .expect("chunks");
    assert!(second_chunks.iter().all(|chunk| !first_ids.contains(&chunk.id)));
    assert_eq!(services.points.lock().await.len(), second_chunks.len());
}

#[tokio::test]
async fn test_missing_document_is_not_found() {
    let db = setup_db().await;
    let services = Arc::new(MockServices::two_pages());
    let processor = processor(&db, services.clone());
    let document = store_document(&db).await;

    let result = processor.process_document(WORKSPACE, "missing", false).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));

    let other_workspace = processor
        .process_document("another-ws", &document.id, false)
        .await;
    assert!(matches!(other_workspace, Err(AppError::NotFound(_))));
    assert!(services.calls.lock().await.is_empty());
}

#[tokio::test]
async fn test_chunk_listing_requires_processed_document() {
    let db = setup_db().await;
    let processor = processor(&db, Arc::new(MockServices::two_pages()));
    let document = store_document(&db).await;

    let early = processor.list_chunks(WORKSPACE, &document.id, 1, 20).await;
    assert!(matches!(early, Err(AppError::Conflict(_))));

    let processed = processor
        .process_document(WORKSPACE, &document.id, false)
        .await
        .expect("pipeline succeeds");

    let page = processor
        .list_chunks(WORKSPACE, &document.id, 1, 2)
        .await
        .expect("chunk page");
    assert_eq!(page.total, u64::from(processed.chunk_count));
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.items[0].chunk_index, 0);
}

#[tokio::test]
async fn test_delete_document_removes_points_chunks_and_row() {
    let db = setup_db().await;
    let services = Arc::new(MockServices::two_pages());
    let processor = processor(&db, services.clone());
    let document = store_document(&db).await;
    processor
        .process_document(WORKSPACE, &document.id, false)
        .await
        .expect("pipeline succeeds");

    processor
        .delete_document(WORKSPACE, &document.id)
        .await
        .expect("delete");

    assert!(services.points.lock().await.is_empty());
    assert!(DocumentChunk::list_for_document(&document.id, &db)
        .await
        .expect("chunks")
        .is_empty());
    assert!(db
        .get_item::<Document>(&document.id)
        .await
        .expect("fetch")
        .is_none());

    let again = processor.delete_document(WORKSPACE, &document.id).await;
    assert!(matches!(again, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_delete_continues_when_point_removal_fails() {
    let db = setup_db().await;
    let mut services = MockServices::two_pages();
    services.fail_remove = true;
    let services = Arc::new(services);
    let processor = processor(&db, services.clone());
    let document = store_document(&db).await;
    let chunks: Vec<DocumentChunk> = (0..3)
        .map(|index| {
            DocumentChunk::new(
                document.id.clone(),
                WORKSPACE.into(),
                index,
                1,
                format!("chunk {index}"),
            )
        })
        .collect();
    DocumentChunk::insert_batch(chunks, &db)
        .await
        .expect("insert chunks");

    processor
        .delete_document(WORKSPACE, &document.id)
        .await
        .expect("relational delete still succeeds");

    assert_eq!(services.calls.lock().await.clone(), ["remove"]);
    assert!(DocumentChunk::list_for_document(&document.id, &db)
        .await
        .expect("chunks")
        .is_empty());
    assert!(db
        .get_item::<Document>(&document.id)
        .await
        .expect("fetch")
        .is_none());
}

#[tokio::test]
async fn test_reconcile_restores_only_missing_points() {
    let db = setup_db().await;
    let services = Arc::new(MockServices::two_pages());
    let processor = processor(&db, services.clone());
    let document = store_document(&db).await;
    let pending = store_document(&db).await;
    processor
        .process_document(WORKSPACE, &document.id, false)
        .await
        .expect("pipeline succeeds");

    let chunks = DocumentChunk::list_for_document(&document.id, &db)
        .await
        .expect("chunks");
    let lost = chunks[1].id.clone();
    services.points.lock().await.retain(|point| point.id != lost);
    services.embedded_batches.lock().await.clear();

    let reconciled = processor
        .reconcile_workspace(WORKSPACE)
        .await
        .expect("reconcile");
    assert_eq!(reconciled, 1);
    assert_eq!(services.embedded_batches.lock().await.clone(), [1]);

    let points = services.points.lock().await.clone();
    let mut point_ids: Vec<String> = points.iter().map(|p| p.id.clone()).collect();
    let mut chunk_ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
    point_ids.sort();
    chunk_ids.sort();
    assert_eq!(point_ids, chunk_ids);
    assert!(points
        .iter()
        .all(|point| point.payload.document_id != pending.id));

    // a complete index needs no embedding work
    let again = processor
        .reconcile_workspace(WORKSPACE)
        .await
        .expect("second reconcile");
    assert_eq!(again, 0);
    assert_eq!(services.embedded_batches.lock().await.len(), 1);
}

#[tokio::test]
async fn test_reconcile_skips_document_restarted_meanwhile() {
    let db = setup_db().await;
    let services = Arc::new(MockServices::two_pages());
    let processor = processor(&db, services.clone());
    let document = store_document(&db).await;
    processor
        .process_document(WORKSPACE, &document.id, false)
        .await
        .expect("pipeline succeeds");

    services.points.lock().await.clear();
    *services.restart_on_embed.lock().await = Some((Arc::clone(&db), document.id.clone()));

    let reconciled = processor
        .reconcile_workspace(WORKSPACE)
        .await
        .expect("reconcile");
    assert_eq!(reconciled, 0);
    assert!(services.points.lock().await.is_empty());
    assert_eq!(
        services.calls.lock().await.iter().filter(|call| **call == "index").count(),
        1,
        "only the original run indexed points"
    );
}

#[tokio::test]
async fn test_worker_pool_drains_queue_until_senders_drop() {
    use crate::{run_worker_pool, ProcessRequest, ProcessingQueue};
    use tokio_util::sync::CancellationToken;

    let db = setup_db().await;
    let services = Arc::new(MockServices::two_pages());
    let processor = Arc::new(processor(&db, services));
    let first = store_document(&db).await;
    let second = store_document(&db).await;

    let (queue, receiver) = ProcessingQueue::new(4);
    for document in [&first, &second] {
        queue
            .enqueue(ProcessRequest {
                workspace_id: WORKSPACE.into(),
                document_id: document.id.clone(),
                force: false,
            })
            .expect("enqueue");
    }
    drop(queue);

    run_worker_pool(processor, receiver, 2, CancellationToken::new()).await;

    for document in [&first, &second] {
        let stored: Document = db
            .get_item(&document.id)
            .await
            .expect("fetch")
            .expect("document present");
        assert_eq!(stored.status, ProcessingStatus::Processed);
    }
}

#[tokio::test]
async fn test_worker_pool_stops_on_cancellation() {
    use crate::{run_worker_pool, ProcessingQueue};
    use tokio_util::sync::CancellationToken;

    let db = setup_db().await;
    let processor = Arc::new(processor(&db, Arc::new(MockServices::two_pages())));
    let (_queue, receiver) = ProcessingQueue::new(1);
    let cancel = CancellationToken::new();
    cancel.cancel();

    tokio::time::timeout(
        std::time::Duration::from_secs(5),
        run_worker_pool(processor, receiver, 3, cancel),
    )
    .await
    .expect("pool stops once cancelled");
}
