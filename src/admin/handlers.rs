use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use crate::admin::AdminState;
use crate::pipeline::TopologyNode;

pub async fn get_health() -> &'static str {
    "OK"
}

pub async fn get_metrics(State(state): State<AdminState>) -> Result<String, StatusCode> {
    state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn get_graph(State(state): State<AdminState>) -> Json<TopologyNode> {
    Json(TopologyNode::from_module(state.pipeline.as_ref()))
}
