//! Media streaming module.
//!
//! Relays resolved media through the server so clients never see the signed
//! upstream URL.
//!
//! # Routes
//!
//! - `GET /stream/{id}` - Stream the audio for a content id, honouring `Range`

mod proxy;

pub use proxy::{content_disposition, ProxiedStream, StreamProxy};

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap},
    routing::get,
    Router,
};

use crate::ids::ContentId;
use crate::server::{AppContext, AppError};

/// Create the streaming router.
pub fn stream_router() -> Router<AppContext> {
    Router::new().route("/:id", get(stream_content))
}

/// Stream the media for `id`, forwarding the client's `Range` header.
pub async fn stream_content(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<ProxiedStream, AppError> {
    let id = ContentId::parse(&id)?;
    let range = headers.get(header::RANGE).and_then(|h| h.to_str().ok());

    Ok(ctx.proxy.open(&id, range).await?)
}
