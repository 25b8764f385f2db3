//! JSON API routes: resolution, prefetch, metadata and stats.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::cache::{CacheSizes, ResolutionEntry};
use crate::error::Error;
use crate::ids::ContentId;
use crate::resolver::MediaMetadata;
use crate::scheduler::{Priority, SchedulerStats};
use crate::server::{AppContext, AppError};

pub fn api_routes() -> Router<AppContext> {
    Router::new()
        .route("/health", get(health))
        .route("/resolve/:id", get(resolve))
        .route("/metadata/:id", get(metadata))
        .route("/prefetch", get(prefetch))
        .route("/stats", get(stats))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn resolve(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<ResolutionEntry>, AppError> {
    let id = ContentId::parse(&id)?;
    let entry = ctx.coordinator.resolve(&id).await?;
    Ok(Json(entry))
}

#[derive(Debug, Serialize)]
struct MetadataResponse {
    id: ContentId,
    #[serde(flatten)]
    metadata: MediaMetadata,
}

async fn metadata(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<MetadataResponse>, AppError> {
    let id = ContentId::parse(&id)?;
    let metadata = ctx
        .coordinator
        .metadata(&id)
        .await?
        .ok_or_else(|| Error::empty(id.as_str(), "resolver returned no metadata"))?;

    Ok(Json(MetadataResponse { id, metadata }))
}

#[derive(Debug, Deserialize)]
struct PrefetchQuery {
    ids: Option<String>,
    priority: Option<String>,
}

#[derive(Debug, Serialize)]
struct Rejected {
    id: String,
    reason: String,
}

#[derive(Debug, Serialize)]
struct PrefetchResponse {
    accepted: Vec<ContentId>,
    rejected: Vec<Rejected>,
    priority: Priority,
}

async fn prefetch(
    State(ctx): State<AppContext>,
    Query(params): Query<PrefetchQuery>,
) -> Result<Json<PrefetchResponse>, AppError> {
    let priority = match params.priority.as_deref() {
        Some(raw) if !raw.trim().is_empty() => raw.parse::<Priority>()?,
        _ => Priority::default(),
    };

    let raw_ids: Vec<&str> = params
        .ids
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    if raw_ids.is_empty() {
        return Err(Error::invalid_input("ids must name at least one content id").into());
    }

    let max_batch = ctx.config.scheduler.max_prefetch_batch;
    let mut seen = HashSet::new();
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();

    for raw in raw_ids {
        if !seen.insert(raw) {
            continue;
        }

        if accepted.len() >= max_batch {
            rejected.push(Rejected {
                id: raw.to_string(),
                reason: format!("batch limit of {} exceeded", max_batch),
            });
            continue;
        }

        let id = match ContentId::parse(raw) {
            Ok(id) => id,
            Err(e) => {
                rejected.push(Rejected {
                    id: raw.to_string(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let coordinator = ctx.coordinator.clone();
        let task_id = id.clone();
        let submitted = ctx.scheduler.submit(priority, id.as_str(), async move {
            coordinator.resolve(&task_id).await?;
            Ok::<(), anyhow::Error>(())
        });

        match submitted {
            Ok(()) => accepted.push(id),
            Err(e) => rejected.push(Rejected {
                id: raw.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    tracing::info!(
        priority = %priority,
        accepted = accepted.len(),
        rejected = rejected.len(),
        "Prefetch submitted"
    );

    Ok(Json(PrefetchResponse {
        accepted,
        rejected,
        priority,
    }))
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    scheduler: SchedulerStats,
    cache: CacheSizes,
    locks: usize,
    resolver_calls: u64,
}

async fn stats(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(StatsResponse {
        scheduler: ctx.scheduler.stats(),
        cache: ctx.coordinator.cache().sizes(),
        locks: ctx.coordinator.locks().len(),
        resolver_calls: ctx.coordinator.resolver_calls(),
    })
}
