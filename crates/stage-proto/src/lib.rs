//! Message protocol spoken with a streamed stage application.
//!
//! Every message on the channel is a JSON object `{event_type, payload}`.
//! Outbound instructions form a closed set. Inbound events are classified by
//! `event_type`; kinds this crate does not know are handed back as
//! [`InboundEvent::Unclassified`] so newer remotes keep working.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Path of the implicit stage root.
pub const ROOT_PATH: &str = "/World";

/// Filter attached to every child listing request; only geometry-bearing
/// nodes are returned.
pub const GEOMETRY_FILTER: &str = "USDGeom";

pub mod kinds {
    pub const OPEN_STAGE_REQUEST: &str = "openStageRequest";
    pub const GET_CHILDREN_REQUEST: &str = "getChildrenRequest";
    pub const MAKE_PRIMS_PICKABLE: &str = "makePrimsPickable";
    pub const SELECT_PRIMS_REQUEST: &str = "selectPrimsRequest";
    pub const RESET_STAGE: &str = "resetStage";
    pub const LOADING_STATE_QUERY: &str = "loadingStateQuery";

    pub const OPENED_STAGE_RESULT: &str = "openedStageResult";
    pub const LOADING_STATE_RESPONSE: &str = "loadingStateResponse";
    pub const UPDATE_PROGRESS_AMOUNT: &str = "updateProgressAmount";
    pub const UPDATE_PROGRESS_ACTIVITY: &str = "updateProgressActivity";
    pub const STAGE_SELECTION_CHANGED: &str = "stageSelectionChanged";
    pub const GET_CHILDREN_RESPONSE: &str = "getChildrenResponse";
}

/// Instructions sent to the remote application. None of them carries a
/// correlation id; replies are matched by event kind and payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "payload")]
pub enum OutboundMessage {
    #[serde(rename = "openStageRequest")]
    OpenAsset { url: String },
    #[serde(rename = "getChildrenRequest")]
    GetChildren {
        prim_path: String,
        filters: Vec<String>,
    },
    #[serde(rename = "makePrimsPickable")]
    MakePickable { paths: Vec<String> },
    #[serde(rename = "selectPrimsRequest")]
    SelectPaths { paths: Vec<String> },
    #[serde(rename = "resetStage")]
    ResetStage {},
    #[serde(rename = "loadingStateQuery")]
    LoadingStateQuery {},
}

impl OutboundMessage {
    pub fn open_asset(url: impl Into<String>) -> Self {
        OutboundMessage::OpenAsset { url: url.into() }
    }

    /// Child listing for `path`, or for the stage root when `path` is `None`.
    pub fn get_children(path: Option<&str>) -> Self {
        OutboundMessage::GetChildren {
            prim_path: path.unwrap_or(ROOT_PATH).to_string(),
            filters: vec![GEOMETRY_FILTER.to_string()],
        }
    }

    pub fn make_pickable(paths: Vec<String>) -> Self {
        OutboundMessage::MakePickable { paths }
    }

    pub fn select_paths(paths: Vec<String>) -> Self {
        OutboundMessage::SelectPaths { paths }
    }

    pub fn reset_stage() -> Self {
        OutboundMessage::ResetStage {}
    }

    pub fn loading_state_query() -> Self {
        OutboundMessage::LoadingStateQuery {}
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            OutboundMessage::OpenAsset { .. } => kinds::OPEN_STAGE_REQUEST,
            OutboundMessage::GetChildren { .. } => kinds::GET_CHILDREN_REQUEST,
            OutboundMessage::MakePickable { .. } => kinds::MAKE_PRIMS_PICKABLE,
            OutboundMessage::SelectPaths { .. } => kinds::SELECT_PRIMS_REQUEST,
            OutboundMessage::ResetStage {} => kinds::RESET_STAGE,
            OutboundMessage::LoadingStateQuery {} => kinds::LOADING_STATE_QUERY,
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Inbound notification after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    AssetOpened(AssetOpened),
    LoadingState(LoadingStateReport),
    ProgressAmount(ProgressAmount),
    ProgressActivity(ProgressActivity),
    SelectionChanged(SelectionChanged),
    Children(ChildrenResponse),
    Unclassified { event_type: String, payload: Value },
}

impl InboundEvent {
    pub fn event_type(&self) -> &str {
        match self {
            InboundEvent::AssetOpened(_) => kinds::OPENED_STAGE_RESULT,
            InboundEvent::LoadingState(_) => kinds::LOADING_STATE_RESPONSE,
            InboundEvent::ProgressAmount(_) => kinds::UPDATE_PROGRESS_AMOUNT,
            InboundEvent::ProgressActivity(_) => kinds::UPDATE_PROGRESS_ACTIVITY,
            InboundEvent::SelectionChanged(_) => kinds::STAGE_SELECTION_CHANGED,
            InboundEvent::Children(_) => kinds::GET_CHILDREN_RESPONSE,
            InboundEvent::Unclassified { event_type, .. } => event_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenResult {
    Success,
    Error,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AssetOpened {
    pub result: OpenResult,
    #[serde(default, deserialize_with = "string_or_empty")]
    pub url: String,
}

impl AssetOpened {
    pub fn succeeded(&self) -> bool {
        self.result == OpenResult::Success
    }
}

/// Load state as reported by the remote application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteLoadState {
    Idle,
    Loading,
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoadingStateReport {
    #[serde(default, deserialize_with = "string_or_empty")]
    pub url: String,
    #[serde(default)]
    pub loading_state: RemoteLoadState,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProgressAmount {
    /// Fraction in `0.0..=1.0`.
    pub progress: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProgressActivity {
    #[serde(default, deserialize_with = "string_or_empty")]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SelectionChanged {
    /// Selected paths. A missing or non-list value means "nothing selected".
    #[serde(default, deserialize_with = "lenient_paths")]
    pub prims: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChildrenResponse {
    #[serde(default)]
    pub prim_path: Option<String>,
    #[serde(default, deserialize_with = "lenient_nodes")]
    pub children: Vec<WireNode>,
}

/// A scene node as it appears in a children listing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WireNode {
    #[serde(default)]
    pub name: Option<String>,
    pub path: String,
    #[serde(default, deserialize_with = "wire_children")]
    pub children: WireChildren,
}

/// The remote sends a list only when it has already enumerated a node's
/// children; any other value (or none) means they have not been fetched.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum WireChildren {
    #[default]
    Unexpanded,
    Listed(Vec<WireNode>),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("message is not an event envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("malformed {event_type} payload: {source}")]
    Payload {
        event_type: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct Envelope {
    event_type: String,
    #[serde(default)]
    payload: Value,
}

/// Classify one inbound text message.
pub fn decode(text: &str) -> Result<InboundEvent, DecodeError> {
    let Envelope {
        event_type,
        payload,
    } = serde_json::from_str(text).map_err(DecodeError::Envelope)?;

    let event = match event_type.as_str() {
        kinds::OPENED_STAGE_RESULT => {
            InboundEvent::AssetOpened(payload_as(kinds::OPENED_STAGE_RESULT, payload)?)
        }
        kinds::LOADING_STATE_RESPONSE => {
            InboundEvent::LoadingState(payload_as(kinds::LOADING_STATE_RESPONSE, payload)?)
        }
        kinds::UPDATE_PROGRESS_AMOUNT => {
            InboundEvent::ProgressAmount(payload_as(kinds::UPDATE_PROGRESS_AMOUNT, payload)?)
        }
        kinds::UPDATE_PROGRESS_ACTIVITY => {
            InboundEvent::ProgressActivity(payload_as(kinds::UPDATE_PROGRESS_ACTIVITY, payload)?)
        }
        kinds::STAGE_SELECTION_CHANGED => {
            InboundEvent::SelectionChanged(payload_as(kinds::STAGE_SELECTION_CHANGED, payload)?)
        }
        kinds::GET_CHILDREN_RESPONSE => {
            InboundEvent::Children(payload_as(kinds::GET_CHILDREN_RESPONSE, payload)?)
        }
        _ => InboundEvent::Unclassified {
            event_type,
            payload,
        },
    };
    Ok(event)
}

fn payload_as<T: de::DeserializeOwned>(
    event_type: &'static str,
    payload: Value,
) -> Result<T, DecodeError> {
    // Payload-less events still have to satisfy struct defaults.
    let payload = if payload.is_null() {
        Value::Object(Default::default())
    } else {
        payload
    };
    serde_json::from_value(payload).map_err(|source| DecodeError::Payload { event_type, source })
}

fn string_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_paths<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(path) => Some(path),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    })
}

fn lenient_nodes<'de, D>(deserializer: D) -> Result<Vec<WireNode>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Array(items) => nodes_from(items).map_err(de::Error::custom),
        _ => Ok(Vec::new()),
    }
}

fn wire_children<'de, D>(deserializer: D) -> Result<WireChildren, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Array(items) => nodes_from(items)
            .map(WireChildren::Listed)
            .map_err(de::Error::custom),
        _ => Ok(WireChildren::Unexpanded),
    }
}

fn nodes_from(items: Vec<Value>) -> Result<Vec<WireNode>, serde_json::Error> {
    items.into_iter().map(serde_json::from_value).collect()
}
