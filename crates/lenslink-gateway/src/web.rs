//! HTTP adapters over the config and capability stores.
//!
//! These are thin surfaces for the viewer UI: they read or mutate the
//! shared documents and nudge the producer over its signaling connection.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::registry::SharedRegistry;
use crate::signal;
use crate::state::{AspectMode, CapsDoc, ConfigDoc, SharedCaps, SharedConfig};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    pub connected: bool,
    pub android_connected: bool,
    pub browser_connected: bool,
    #[serde(flatten)]
    pub config: ConfigDoc,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapsResponse {
    #[serde(flatten)]
    pub caps: CapsDoc,
    pub current: CurrentSelection,
}

/// The slice of the configuration the capability UI needs to highlight the
/// active selection.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentSelection {
    pub camera_name: Option<String>,
    pub aspect: AspectMode,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub active_connections: usize,
    pub producer_bound: bool,
    pub viewer_bound: bool,
}

pub async fn get_config(
    State(registry): State<SharedRegistry>,
    State(config): State<SharedConfig>,
) -> impl IntoResponse {
    let (android_connected, browser_connected) = {
        let reg = registry.read().await;
        (reg.producer().is_some(), reg.viewer().is_some())
    };
    let config = config.read().await.clone();
    debug!(android_connected, browser_connected, "config read");
    Json(ConfigResponse {
        connected: android_connected || browser_connected,
        android_connected,
        browser_connected,
        config,
    })
}

pub async fn post_config(
    State(registry): State<SharedRegistry>,
    State(config): State<SharedConfig>,
    Json(patch): Json<Value>,
) -> impl IntoResponse {
    let updated = {
        let mut doc = config.write().await;
        doc.apply(&patch);
        doc.clone()
    };
    // Push the merged document to the producer. Delivery is best-effort:
    // the producer re-syncs on its next role claim anyway.
    let reg = registry.read().await;
    match reg.producer() {
        Some(producer) => signal::send_json(producer, &signal::config_push(&updated)),
        None => debug!("config updated with no producer bound"),
    }
    Json(OkResponse { ok: true })
}

pub async fn get_caps(
    State(config): State<SharedConfig>,
    State(caps): State<SharedCaps>,
) -> impl IntoResponse {
    let caps = caps.read().await.clone();
    let current = {
        let doc = config.read().await;
        CurrentSelection {
            camera_name: doc.camera_name.clone(),
            aspect: doc.aspect,
            width: doc.width,
            height: doc.height,
            fps: doc.fps,
        }
    };
    Json(CapsResponse { caps, current })
}

/// Capability-refresh trigger: ask the bound producer to re-report its
/// hardware snapshot.
pub async fn refresh_caps(State(registry): State<SharedRegistry>) -> impl IntoResponse {
    let reg = registry.read().await;
    match reg.producer() {
        Some(producer) => {
            signal::send_json(producer, &json!({ "type": "request-caps" }));
            (StatusCode::OK, Json(OkResponse { ok: true }))
        }
        None => {
            warn!("capability refresh requested with no producer bound");
            (StatusCode::SERVICE_UNAVAILABLE, Json(OkResponse { ok: false }))
        }
    }
}

pub async fn health(State(registry): State<SharedRegistry>) -> impl IntoResponse {
    let reg = registry.read().await;
    Json(HealthResponse {
        active_connections: reg.len(),
        producer_bound: reg.producer().is_some(),
        viewer_bound: reg.viewer().is_some(),
    })
}
