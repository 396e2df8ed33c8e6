//! Capture configuration and camera capability documents.
//!
//! Both documents are process-lifetime only and live behind shared locks;
//! every mutation is a whole-document merge or replace, so readers never
//! observe a torn document.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

pub type SharedConfig = Arc<RwLock<ConfigDoc>>;
pub type SharedCaps = Arc<RwLock<CapsDoc>>;

pub const BITRATE_KBPS_MIN: u32 = 300;
pub const BITRATE_KBPS_MAX: u32 = 20_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectMode {
    #[serde(rename = "AUTO_MAX")]
    AutoMax,
    #[serde(rename = "R16_9")]
    R16x9,
    #[serde(rename = "R4_3")]
    R4x3,
    #[serde(rename = "R1_1")]
    R1x1,
}

impl AspectMode {
    /// The modes every producer is assumed to support until it reports
    /// otherwise.
    pub const CANONICAL: [AspectMode; 4] = [
        AspectMode::AutoMax,
        AspectMode::R16x9,
        AspectMode::R4x3,
        AspectMode::R1x1,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    Back,
    Front,
}

/// The shared capture configuration. Field names are the wire names used by
/// both the producer push and the HTTP surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDoc {
    pub mic_enabled: bool,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_kbps: u32,
    pub aspect: AspectMode,
    pub camera: CameraFacing,
    /// Exact device name; overrides `camera` facing when present.
    pub camera_name: Option<String>,
}

impl Default for ConfigDoc {
    fn default() -> Self {
        Self {
            mic_enabled: false,
            width: 1280,
            height: 720,
            fps: 30,
            bitrate_kbps: 6000,
            aspect: AspectMode::AutoMax,
            camera: CameraFacing::Back,
            camera_name: None,
        }
    }
}

impl ConfigDoc {
    /// Merge a partial JSON document field by field. An unparseable or
    /// out-of-range field keeps the previous value while the rest of the
    /// partial still applies; bitrate is clamped into its legal range.
    pub fn apply(&mut self, patch: &Value) {
        let Some(obj) = patch.as_object() else {
            return;
        };
        if let Some(v) = obj.get("micEnabled").and_then(Value::as_bool) {
            self.mic_enabled = v;
        }
        if let Some(v) = obj.get("width").and_then(positive_u32) {
            self.width = v;
        }
        if let Some(v) = obj.get("height").and_then(positive_u32) {
            self.height = v;
        }
        if let Some(v) = obj.get("fps").and_then(positive_u32) {
            self.fps = v;
        }
        if let Some(v) = obj.get("bitrateKbps").and_then(positive_u32) {
            self.bitrate_kbps = v.clamp(BITRATE_KBPS_MIN, BITRATE_KBPS_MAX);
        }
        if let Some(v) = obj.get("aspect").and_then(parse::<AspectMode>) {
            self.aspect = v;
        }
        if let Some(v) = obj.get("camera").and_then(parse::<CameraFacing>) {
            self.camera = v;
        }
        match obj.get("cameraName") {
            Some(Value::String(name)) if !name.is_empty() => {
                self.camera_name = Some(name.clone());
            }
            Some(Value::Null) | Some(Value::String(_)) => self.camera_name = None,
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub facing: Option<CameraFacing>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraFormat {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub fps_options: Vec<u32>,
}

/// Last-reported hardware snapshot from the producer. Fully replaced on
/// each report, never merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapsDoc {
    pub cameras: Vec<CameraInfo>,
    pub formats_by_camera_name: HashMap<String, Vec<CameraFormat>>,
    pub supported_aspects: Vec<AspectMode>,
}

impl Default for CapsDoc {
    fn default() -> Self {
        Self {
            cameras: Vec::new(),
            formats_by_camera_name: HashMap::new(),
            supported_aspects: AspectMode::CANONICAL.to_vec(),
        }
    }
}

impl CapsDoc {
    /// Build a document from a raw capability report. A malformed or
    /// missing section falls back to its default: empty camera list, empty
    /// format table, the canonical aspect modes.
    pub fn from_report(report: &Value) -> Self {
        let cameras = report
            .get("cameras")
            .and_then(parse::<Vec<CameraInfo>>)
            .unwrap_or_default();
        let formats_by_camera_name = report
            .get("formatsByCameraName")
            .and_then(parse::<HashMap<String, Vec<CameraFormat>>>)
            .unwrap_or_default();
        let supported_aspects = report
            .get("supportedAspects")
            .and_then(parse::<Vec<AspectMode>>)
            .filter(|modes| !modes.is_empty())
            .unwrap_or_else(|| AspectMode::CANONICAL.to_vec());
        Self {
            cameras,
            formats_by_camera_name,
            supported_aspects,
        }
    }
}

fn positive_u32(value: &Value) -> Option<u32> {
    value
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .filter(|n| *n > 0)
}

fn parse<T: serde::de::DeserializeOwned>(value: &Value) -> Option<T> {
    serde_json::from_value(value.clone()).ok()
}
