//! HTTP front-end mapping REST calls onto the core operations.
//!
//! Routes:
//!
//! - `GET /kv-store/snapshot` - textual diagnostic (node id, shard groups,
//!   store contents)
//! - `GET /kv-store/key/{key}` - quorum read, JSON value
//! - `PUT|POST /kv-store/key/{key}` - replicated write, body
//!   `{"Key":…,"Value":…}`
//! - `DELETE /kv-store/key/{key}` - `400`, deletes are not implemented

use std::fmt::Write as _;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};

use strata_node::{proto, Node};
use strata_types::{Action, Entry, Message};

/// Build the front-end router over a running node.
pub fn router(node: Arc<Node>) -> Router {
    Router::new()
        .route("/kv-store/snapshot", get(snapshot))
        .route(
            "/kv-store/key/:key",
            get(get_key).put(put_key).post(put_key).delete(delete_key),
        )
        .route("/kv-store/key/:key/*rest", any(bad_path))
        .with_state(node)
}

/// Human-readable node state: identity, shard layout, store contents.
async fn snapshot(State(node): State<Arc<Node>>) -> Response {
    let mut out = String::new();
    let _ = writeln!(out, "Node id: {{{}}}", node.id());
    let _ = writeln!(out, "Node status: running");
    let _ = writeln!(out, "shards: {:?}", node.oracle().shard_groups());
    let _ = writeln!(out, "Database state:");
    for (key, value) in node.store().snapshot() {
        let _ = writeln!(out, "    {key} -> {value}");
    }
    out.into_response()
}

/// Quorum read: fan the key to its shard, inline our own answer when we are
/// a replica, block until quorum, return the causally chosen value.
async fn get_key(State(node): State<Arc<Node>>, Path(key): Path<String>) -> Response {
    let (stream_id, rx) = node.engine().new_event_stream();
    let msg = Message::with_stream(
        node.id(),
        Action::Get,
        key.clone().into_bytes(),
        stream_id.clone(),
    );

    let local = proto::key_op(&node, &msg);
    if local {
        let value = node.store().get(&key).unwrap_or_default();
        let mut own = Message::with_stream(
            node.id(),
            Action::Read,
            value.into_bytes(),
            stream_id.clone(),
        );
        own.context = node.engine().clock_snapshot();
        if let Err(err) = node.engine().deliver(own) {
            tracing::warn!(%err, "own read response dropped");
        }
    }

    let best = node.engine().order_events(&stream_id, rx).await;
    tracing::debug!(key = %key, chosen_src = %best.src_addr, "read arbitrated");
    Json(best.payload_str()).into_response()
}

/// Replicated write: fan `key:value` to the owning shard; apply locally
/// when this node is a replica of it. Fire-and-forget: `200` acknowledges
/// acceptance, not replication.
async fn put_key(
    State(node): State<Arc<Node>>,
    Path(_key): Path<String>,
    body: Result<Json<Entry>, JsonRejection>,
) -> StatusCode {
    let Ok(Json(entry)) = body else {
        return StatusCode::BAD_REQUEST;
    };

    let payload = format!("{}:{}", entry.key, entry.value);
    let msg = Message::new(node.id(), Action::Put, payload.into_bytes());

    let local = proto::key_op(&node, &msg);
    if local {
        node.store().put(entry.key, entry.value);
    }
    StatusCode::OK
}

/// Deletes are not part of the core.
async fn delete_key() -> StatusCode {
    StatusCode::BAD_REQUEST
}

/// A key path with extra segments is a client error, not a missing route.
async fn bad_path() -> StatusCode {
    StatusCode::BAD_REQUEST
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    use strata_transport::Datagram;

    /// A self-contained single-node cluster: quorum of one, every key local.
    async fn single_node() -> Arc<Node> {
        let transport = Arc::new(Datagram::bind("127.0.0.1:0").await.expect("bind"));
        let id = transport.local_addr().to_string();
        let node =
            Arc::new(Node::new(id.clone(), vec![id], 1, transport).expect("valid cluster"));
        tokio::spawn(Arc::clone(&node).serve());
        node
    }

    #[tokio::test]
    async fn test_put_then_get_roundtrip() {
        let node = single_node().await;
        let app = router(Arc::clone(&node));

        let put = Request::builder()
            .method("PUT")
            .uri("/kv-store/key/foo")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"Key":"foo","Value":"bar"}"#))
            .expect("request");
        let response = app.clone().oneshot(put).await.expect("handler");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(node.store().get("foo").as_deref(), Some("bar"));

        let get = Request::builder()
            .uri("/kv-store/key/foo")
            .body(Body::empty())
            .expect("request");
        let response = app.oneshot(get).await.expect("handler");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_bad_body_is_400() {
        let node = single_node().await;
        let app = router(node);

        let put = Request::builder()
            .method("POST")
            .uri("/kv-store/key/foo")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"Key":"foo"}"#))
            .expect("request");
        let response = app.oneshot(put).await.expect("handler");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_is_400() {
        let node = single_node().await;
        let app = router(node);

        let delete = Request::builder()
            .method("DELETE")
            .uri("/kv-store/key/foo")
            .body(Body::empty())
            .expect("request");
        let response = app.oneshot(delete).await.expect("handler");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_extra_path_segments_are_400() {
        let node = single_node().await;
        let app = router(node);

        let request = Request::builder()
            .uri("/kv-store/key/foo/extra")
            .body(Body::empty())
            .expect("request");
        let response = app.oneshot(request).await.expect("handler");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_snapshot_renders() {
        let node = single_node().await;
        node.store().put("k", "v");
        let app = router(node);

        let request = Request::builder()
            .uri("/kv-store/snapshot")
            .body(Body::empty())
            .expect("request");
        let response = app.oneshot(request).await.expect("handler");
        assert_eq!(response.status(), StatusCode::OK);
    }
}
