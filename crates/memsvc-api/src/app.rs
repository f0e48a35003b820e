use std::sync::Arc;

use axum::routing::{delete, get, patch, post};
use axum::{middleware, Router};
use memsvc_access::AccessControl;
use memsvc_attachments::AttachmentService;
use memsvc_core::config::MemsvcConfig;
use memsvc_eviction::EvictionEngine;
use memsvc_recorder::ResponseRecorder;
use memsvc_store::ConversationStore;
use memsvc_sync::MemorySyncCore;
use memsvc_tasks::TaskQueue;

use crate::auth::{ApiKeyResolver, OidcResolver};

/// Central shared state: every core service the handlers need, `Arc`-wrapped
/// once in `main.rs` and cloned cheaply into each request.
pub struct AppState {
    pub config: MemsvcConfig,
    pub store: Arc<ConversationStore>,
    pub access: Arc<AccessControl>,
    pub sync: Arc<MemorySyncCore>,
    pub recorder: Arc<ResponseRecorder>,
    pub tasks: Arc<TaskQueue>,
    pub eviction: Arc<EvictionEngine>,
    pub attachments: Arc<AttachmentService>,
    pub api_key_resolver: ApiKeyResolver,
    pub oidc_resolver: Option<OidcResolver>,
}

/// Assembles the full router: unauthenticated routes (liveness, signed
/// attachment download) plus the identity-gated routes covering spec.md
/// §6's table, each with `Extension<Identity>` available via
/// `auth::resolve_identity`.
pub fn build_router(state: Arc<AppState>) -> Router {
    let authenticated = Router::new()
        .route(
            "/v1/conversations",
            post(crate::http::conversations::create_conversation).get(crate::http::conversations::list_conversations),
        )
        .route(
            "/v1/conversations/{id}",
            get(crate::http::conversations::get_conversation).delete(crate::http::conversations::delete_conversation),
        )
        .route(
            "/v1/conversations/{id}/entries",
            get(crate::http::conversations::get_entries).post(crate::http::conversations::append_entry),
        )
        .route(
            "/v1/conversations/{id}/entries/bulk",
            post(crate::http::conversations::append_entries_bulk),
        )
        .route(
            "/v1/conversations/{id}/memory/sync",
            post(crate::http::conversations::sync_memory),
        )
        .route(
            "/v1/conversations/{id}/entries/{entryId}/fork",
            post(crate::http::conversations::fork_conversation),
        )
        .route("/v1/conversations/{id}/forks", get(crate::http::conversations::list_forks))
        .route(
            "/v1/conversations/{id}/summaries",
            post(crate::http::conversations::add_summary),
        )
        .route("/v1/conversations/search", post(crate::http::conversations::search_conversations))
        .route(
            "/v1/conversations/{id}/memberships",
            get(crate::http::memberships::list_memberships).post(crate::http::memberships::share_conversation),
        )
        .route(
            "/v1/conversations/{id}/memberships/{userId}",
            patch(crate::http::memberships::update_membership).delete(crate::http::memberships::delete_membership),
        )
        .route("/v1/ownership-transfers", post(crate::http::transfers::create_transfer))
        .route(
            "/v1/ownership-transfers/{id}/accept",
            post(crate::http::transfers::accept_transfer),
        )
        .route(
            "/v1/ownership-transfers/{id}",
            delete(crate::http::transfers::decline_or_cancel_transfer),
        )
        .route("/v1/admin/evict", post(crate::http::admin::evict))
        .route("/v1/conversations/{id}/resume", get(crate::http::resume::resume))
        .route("/v1/conversations/resume-check", post(crate::http::resume::resume_check))
        .route("/v1/conversations/{id}/cancel", post(crate::http::resume::cancel))
        .route("/v1/attachments/{id}", get(crate::http::attachments::download))
        .route_layer(middleware::from_fn_with_state(state.clone(), crate::auth::resolve_identity));

    let unauthenticated = Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/v1/attachments/download/{token}/{filename}",
            get(crate::http::attachments::resolve_signed_download),
        );

    Router::new()
        .merge(authenticated)
        .merge(unauthenticated)
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
