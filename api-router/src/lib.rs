#![allow(clippy::missing_docs_in_private_items)]

use api_state::ApiState;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    routing::{delete, get, post},
    Router,
};
use routes::{
    chats::{create_chat, list_chats, list_messages, message_sources, send_message},
    documents::{
        delete_document, get_status, list_chunks, list_documents, process_document,
        upload_document,
    },
    liveness::live,
    readiness::ready,
    search::search,
};

pub mod api_state;
pub mod error;
mod routes;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Probes for k8s/systemd
    let probes = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live));

    let documents = Router::new()
        .route(
            "/workspaces/{workspace_id}/documents",
            post(upload_document)
                .layer(DefaultBodyLimit::max(app_state.config.max_upload_bytes))
                .get(list_documents),
        )
        .route(
            "/workspaces/{workspace_id}/documents/{document_id}",
            delete(delete_document),
        )
        .route(
            "/workspaces/{workspace_id}/documents/{document_id}/process",
            post(process_document),
        )
        .route(
            "/workspaces/{workspace_id}/documents/{document_id}/status",
            get(get_status),
        )
        .route(
            "/workspaces/{workspace_id}/documents/{document_id}/chunks",
            get(list_chunks),
        );

    let retrieval = Router::new()
        .route("/workspaces/{workspace_id}/search", post(search))
        .route(
            "/workspaces/{workspace_id}/chats",
            post(create_chat).get(list_chats),
        )
        .route(
            "/workspaces/{workspace_id}/chats/{chat_id}/messages",
            post(send_message).get(list_messages),
        )
        .route(
            "/workspaces/{workspace_id}/chats/{chat_id}/messages/{message_id}/sources",
            get(message_sources),
        );

    probes.merge(documents).merge(retrieval)
}
