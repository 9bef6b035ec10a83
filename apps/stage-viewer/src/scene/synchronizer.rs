//! Keeps the local scene tree, selection and loading state in step with the
//! remote application.
//!
//! All outbound instructions are fire-and-forget and carry no correlation id,
//! so every inbound event is reconciled against whatever the local state is
//! when it arrives. After the tree is reset, children listings are only
//! accepted for nodes with a request in flight; anything else is a reply
//! meant for the previous stage and is dropped.

use stage_proto::{InboundEvent, LoadingStateReport, OutboundMessage, RemoteLoadState};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::catalog::{AssetCatalog, AssetEntry};
use super::loading::LoadingState;
use super::selection::SelectionSet;
use super::tree::{ChildState, MergeOutcome, SceneTree};
use super::{SceneError, SceneSnapshot};
use crate::channel::MessageChannel;
use crate::config::{ViewerConfig, ViewerMode};
use crate::readiness::{LivenessPhase, LivenessPoller};

const LOADING_ASSET: &str = "Loading Asset...";

pub struct SceneSynchronizer<C> {
    channel: C,
    mode: ViewerMode,
    tree: SceneTree,
    selection: SelectionSet,
    loading: LoadingState,
    catalog: AssetCatalog,
    liveness: LivenessPoller,
    tree_generation: u64,
}

impl<C: MessageChannel> SceneSynchronizer<C> {
    pub fn new(
        channel: C,
        catalog: AssetCatalog,
        mode: ViewerMode,
        query_interval: Duration,
    ) -> Self {
        Self {
            channel,
            mode,
            tree: SceneTree::new(),
            selection: SelectionSet::new(),
            loading: LoadingState::new(),
            catalog,
            liveness: LivenessPoller::new(query_interval),
            tree_generation: 0,
        }
    }

    pub fn from_config(channel: C, config: &ViewerConfig) -> Result<Self, SceneError> {
        let catalog = AssetCatalog::new(config.assets.clone()).ok_or(SceneError::EmptyCatalog)?;
        Ok(Self::new(
            channel,
            catalog,
            config.mode,
            config.liveness_query_interval,
        ))
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn into_channel(self) -> C {
        self.channel
    }

    pub fn tree(&self) -> &SceneTree {
        &self.tree
    }

    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    pub fn loading(&self) -> &LoadingState {
        &self.loading
    }

    pub fn selected_asset(&self) -> &AssetEntry {
        self.catalog.selected()
    }

    pub fn is_remote_ready(&self) -> bool {
        self.liveness.is_ready()
    }

    /// Bumped every time the tree is discarded.
    pub fn tree_generation(&self) -> u64 {
        self.tree_generation
    }

    pub fn snapshot(&self) -> SceneSnapshot {
        SceneSnapshot {
            tree: self.tree.clone(),
            selection: self.selection.paths(),
            loading: self.loading.clone(),
            asset: self.catalog.selected().clone(),
            remote_ready: self.liveness.is_ready(),
        }
    }

    /// The channel is open; start querying the remote for signs of life.
    pub fn on_stream_started(&mut self, now: Instant) {
        info!(target: "stage_viewer::scene", "stream started; querying remote application");
        let query = self.liveness.query(now);
        self.send(query);
    }

    pub fn fire_due(&mut self, now: Instant) {
        if let Some(query) = self.liveness.fire_due(now) {
            self.send(query);
        }
    }

    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.liveness.next_deadline()
    }

    /// Stops every pending timer; nothing is sent afterwards on its behalf.
    pub fn shutdown(&mut self) {
        self.liveness.cancel();
    }

    /// Decodes and applies one inbound text frame. Frames that fail to decode
    /// are logged and dropped.
    pub fn handle_text(&mut self, text: &str, now: Instant) {
        match stage_proto::decode(text) {
            Ok(event) => self.handle_event(event, now),
            Err(err) => {
                warn!(target: "stage_viewer::scene", error = %err, "dropping undecodable message");
            }
        }
    }

    pub fn handle_event(&mut self, event: InboundEvent, now: Instant) {
        match event {
            InboundEvent::AssetOpened(opened) => {
                if opened.succeeded() {
                    info!(target: "stage_viewer::scene", url = %opened.url, "remote opened asset");
                    match self.mode {
                        ViewerMode::WebUi => {
                            let query = self.liveness.query(now);
                            self.send(query);
                        }
                        ViewerMode::StreamOnly => {
                            self.request_children(None);
                        }
                    }
                } else {
                    warn!(target: "stage_viewer::scene", url = %opened.url, "remote failed to open asset");
                    self.loading
                        .fail(format!("error loading {}", opened.url));
                }
            }
            InboundEvent::LoadingState(report) => match self.liveness.on_response() {
                LivenessPhase::FirstContact => {
                    info!(target: "stage_viewer::scene", "remote application is ready");
                    self.loading.is_kit_ready = true;
                    let query = self.liveness.query(now);
                    self.send(query);
                }
                LivenessPhase::StateReport => self.reconcile_loading_state(report, now),
            },
            InboundEvent::ProgressAmount(amount) => {
                self.loading.set_progress(amount.progress);
            }
            InboundEvent::ProgressActivity(activity) => {
                self.loading.note_activity(activity.text);
            }
            InboundEvent::SelectionChanged(changed) => {
                self.apply_remote_selection(changed.prims);
            }
            InboundEvent::Children(response) => {
                let target = response.prim_path.as_deref();
                match self.tree.merge_children(target, response.children) {
                    MergeOutcome::Merged(paths) => {
                        debug!(
                            target: "stage_viewer::scene",
                            path = target.unwrap_or(stage_proto::ROOT_PATH),
                            count = paths.len(),
                            "merged children"
                        );
                        if !paths.is_empty() {
                            self.send(OutboundMessage::make_pickable(paths));
                        }
                    }
                    MergeOutcome::Stale => {
                        debug!(
                            target: "stage_viewer::scene",
                            path = ?target,
                            "desync: children for a node that is gone or was not requested"
                        );
                    }
                    MergeOutcome::AlreadySettled => {
                        debug!(
                            target: "stage_viewer::scene",
                            path = ?target,
                            "ignoring children for an already settled node"
                        );
                    }
                }
            }
            InboundEvent::Unclassified { event_type, .. } => {
                debug!(target: "stage_viewer::scene", event_type = %event_type, "ignoring unclassified event");
            }
        }
    }

    fn reconcile_loading_state(&mut self, report: LoadingStateReport, now: Instant) {
        let resolved = self.catalog.resolve(&report.url);
        let idle = report.loading_state == RemoteLoadState::Idle;

        if let Some(index) = resolved {
            if self.catalog.select(index) {
                info!(
                    target: "stage_viewer::scene",
                    asset = %self.catalog.selected().name,
                    "remote has another catalog asset open; following it"
                );
            }
        }

        if report.url.is_empty() {
            self.open_selected_asset(now);
        } else if resolved.is_none() && idle {
            info!(target: "stage_viewer::scene", url = %report.url, "remote stage is not in the catalog");
            self.open_selected_asset(now);
        }

        if resolved.is_some() && idle {
            self.request_children(None);
            self.loading.finish_load();
        }
    }

    fn apply_remote_selection(&mut self, prims: Vec<String>) {
        let mut resolved = Vec::with_capacity(prims.len());
        for path in prims {
            if self.tree.contains(&path) {
                resolved.push(path);
            } else {
                debug!(
                    target: "stage_viewer::scene",
                    path = %path,
                    "desync: remote selected a node not in the local tree"
                );
            }
        }
        self.selection.replace(resolved);
    }

    /// Discards the tree and selection and asks the remote to open the
    /// selected catalog asset.
    pub fn open_selected_asset(&mut self, now: Instant) {
        self.tree.reset();
        self.selection.clear();
        self.tree_generation += 1;
        self.liveness.rearm(now);
        self.loading.begin_load(LOADING_ASSET);
        let url = self.catalog.selected().url.clone();
        info!(target: "stage_viewer::scene", url = %url, "requesting asset open");
        self.send(OutboundMessage::open_asset(url));
    }

    pub fn select_asset(&mut self, name: &str, now: Instant) -> Result<(), SceneError> {
        let index = self
            .catalog
            .position_by_name(name)
            .ok_or_else(|| SceneError::UnknownAsset(name.to_string()))?;
        self.catalog.select(index);
        self.open_selected_asset(now);
        Ok(())
    }

    /// Switches the catalog selection without asking the remote for
    /// anything; the next state report decides whether it gets opened.
    pub fn preselect_asset(&mut self, name: &str) -> Result<(), SceneError> {
        let index = self
            .catalog
            .position_by_name(name)
            .ok_or_else(|| SceneError::UnknownAsset(name.to_string()))?;
        self.catalog.select(index);
        Ok(())
    }

    pub fn reload_asset(&mut self, now: Instant) {
        self.open_selected_asset(now);
    }

    /// Requests the children of `path` (the root when `None`) unless they are
    /// already known or on their way. Returns true when a request went out.
    pub fn request_children(&mut self, path: Option<&str>) -> bool {
        if !self.tree.begin_loading(path) {
            return false;
        }
        self.send(OutboundMessage::get_children(path));
        true
    }

    /// Flips one node in or out of the selection and mirrors the result to
    /// the remote. Selected nodes whose children are still unknown get
    /// expanded.
    pub fn toggle_selection(&mut self, path: &str) -> Result<bool, SceneError> {
        if !self.tree.contains(path) {
            return Err(SceneError::UnknownPath(path.to_string()));
        }
        let selected = self.selection.toggle(path);
        let paths = self.selection.paths();
        self.send(OutboundMessage::select_paths(paths.clone()));

        for path in paths {
            let unexpanded = self
                .tree
                .find_node_by_path(&path)
                .is_some_and(|node| node.children == ChildState::Unknown);
            if unexpanded {
                self.request_children(Some(&path));
            }
        }
        Ok(selected)
    }

    pub fn reset_selection(&mut self) {
        self.selection.clear();
        self.send(OutboundMessage::select_paths(Vec::new()));
        self.send(OutboundMessage::reset_stage());
    }

    fn send(&self, message: OutboundMessage) {
        let text = match message.to_text() {
            Ok(text) => text,
            Err(err) => {
                warn!(target: "stage_viewer::scene", error = %err, "failed to encode outbound message");
                return;
            }
        };
        if let Err(err) = self.channel.send(text) {
            warn!(
                target: "stage_viewer::scene",
                event_type = message.event_type(),
                error = %err,
                "failed to send message"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RecordingChannel;
    use crate::scene::AssetLoadState;
    use serde_json::json;

    fn synchronizer(mode: ViewerMode) -> (SceneSynchronizer<RecordingChannel>, RecordingChannel) {
        let channel = RecordingChannel::new();
        let catalog = AssetCatalog::new(vec![
            AssetEntry::new("Sample 1", "/app/samples/stage01.usd"),
            AssetEntry::new("Sample 2", "/app/samples/stage02.usd"),
        ])
        .unwrap();
        let sync = SceneSynchronizer::new(channel.clone(), catalog, mode, Duration::from_secs(3));
        (sync, channel)
    }

    fn inbound(sync: &mut SceneSynchronizer<RecordingChannel>, event_type: &str, payload: serde_json::Value) {
        let text = json!({ "event_type": event_type, "payload": payload }).to_string();
        sync.handle_text(&text, Instant::now());
    }

    fn ready(sync: &mut SceneSynchronizer<RecordingChannel>, channel: &RecordingChannel) {
        sync.on_stream_started(Instant::now());
        inbound(sync, "loadingStateResponse", json!({ "url": "", "loading_state": "idle" }));
        channel.take_messages();
    }

    #[test]
    fn first_liveness_answer_triggers_second_query() {
        let (mut sync, channel) = synchronizer(ViewerMode::WebUi);
        sync.on_stream_started(Instant::now());
        inbound(&mut sync, "loadingStateResponse", json!({ "url": "", "loading_state": "idle" }));
        assert!(sync.is_remote_ready());
        assert!(sync.loading().is_kit_ready);
        assert_eq!(
            channel.sent_messages(),
            vec![
                OutboundMessage::loading_state_query(),
                OutboundMessage::loading_state_query()
            ]
        );
    }

    #[test]
    fn known_idle_asset_fetches_root_and_follows_remote() {
        let (mut sync, channel) = synchronizer(ViewerMode::WebUi);
        ready(&mut sync, &channel);
        inbound(
            &mut sync,
            "loadingStateResponse",
            json!({ "url": "/srv/kit/stage02.usd", "loading_state": "idle" }),
        );
        assert_eq!(sync.selected_asset().name, "Sample 2");
        assert_eq!(channel.take_messages(), vec![OutboundMessage::get_children(None)]);
        assert_eq!(sync.loading().asset_load_state, AssetLoadState::Loaded);
        assert!(sync.loading().stream_visible);
        assert_eq!(sync.tree().root_state(), &ChildState::Loading);
    }

    #[test]
    fn unknown_idle_asset_forces_selected_open() {
        let (mut sync, channel) = synchronizer(ViewerMode::WebUi);
        ready(&mut sync, &channel);
        inbound(
            &mut sync,
            "loadingStateResponse",
            json!({ "url": "/srv/kit/factory.usd", "loading_state": "idle" }),
        );
        assert_eq!(
            channel.take_messages(),
            vec![OutboundMessage::open_asset("/app/samples/stage01.usd")]
        );
        assert_eq!(sync.loading().asset_load_state, AssetLoadState::Loading);

        inbound(
            &mut sync,
            "loadingStateResponse",
            json!({ "url": "/srv/kit/factory.usd", "loading_state": "loading" }),
        );
        assert!(channel.take_messages().is_empty());
    }

    #[test]
    fn asset_opened_success_queries_or_fetches_by_mode() {
        let (mut sync, channel) = synchronizer(ViewerMode::WebUi);
        ready(&mut sync, &channel);
        inbound(&mut sync, "openedStageResult", json!({ "result": "success", "url": "x" }));
        assert_eq!(channel.take_messages(), vec![OutboundMessage::loading_state_query()]);

        let (mut sync, channel) = synchronizer(ViewerMode::StreamOnly);
        inbound(&mut sync, "openedStageResult", json!({ "result": "success", "url": "x" }));
        assert_eq!(channel.take_messages(), vec![OutboundMessage::get_children(None)]);
    }

    #[test]
    fn asset_opened_failure_stops_loading() {
        let (mut sync, channel) = synchronizer(ViewerMode::WebUi);
        ready(&mut sync, &channel);
        sync.reload_asset(Instant::now());
        inbound(&mut sync, "openedStageResult", json!({ "result": "error", "url": "/bad.usd" }));
        assert_eq!(sync.loading().asset_load_state, AssetLoadState::Error);
        assert!(sync.loading().activity_text.contains("/bad.usd"));
    }

    #[test]
    fn selecting_unexpanded_node_fetches_its_children() {
        let (mut sync, channel) = synchronizer(ViewerMode::WebUi);
        ready(&mut sync, &channel);
        sync.request_children(None);
        inbound(
            &mut sync,
            "getChildrenResponse",
            json!({ "prim_path": "/World", "children": [
                { "path": "/World/A" },
                { "path": "/World/B", "children": [] }
            ] }),
        );
        channel.take_messages();

        assert_eq!(sync.toggle_selection("/World/A"), Ok(true));
        assert_eq!(
            channel.take_messages(),
            vec![
                OutboundMessage::select_paths(vec!["/World/A".into()]),
                OutboundMessage::get_children(Some("/World/A")),
            ]
        );

        assert_eq!(sync.toggle_selection("/World/B"), Ok(true));
        assert_eq!(
            channel.take_messages(),
            vec![OutboundMessage::select_paths(vec![
                "/World/A".into(),
                "/World/B".into()
            ])]
        );

        assert_eq!(
            sync.toggle_selection("/World/Z"),
            Err(SceneError::UnknownPath("/World/Z".into()))
        );
    }

    #[test]
    fn reset_selection_clears_then_resets_stage() {
        let (mut sync, channel) = synchronizer(ViewerMode::WebUi);
        sync.reset_selection();
        assert_eq!(
            channel.take_messages(),
            vec![
                OutboundMessage::select_paths(Vec::new()),
                OutboundMessage::reset_stage()
            ]
        );
    }

    #[test]
    fn duplicate_children_response_is_ignored() {
        let (mut sync, channel) = synchronizer(ViewerMode::WebUi);
        let listing = json!({ "prim_path": "/World", "children": [{ "path": "/World/A" }] });
        inbound(&mut sync, "getChildrenResponse", listing.clone());
        inbound(&mut sync, "getChildrenResponse", listing);
        assert_eq!(
            channel.take_messages(),
            vec![OutboundMessage::make_pickable(vec!["/World/A".into()])]
        );
    }

    #[test]
    fn empty_listing_settles_without_pickability_request() {
        let (mut sync, channel) = synchronizer(ViewerMode::WebUi);
        inbound(&mut sync, "getChildrenResponse", json!({ "prim_path": "/World", "children": [] }));
        assert_eq!(sync.tree().root_state(), &ChildState::Empty);
        assert!(channel.take_messages().is_empty());
    }

    #[test]
    fn select_asset_rejects_unknown_names() {
        let (mut sync, channel) = synchronizer(ViewerMode::WebUi);
        assert_eq!(
            sync.select_asset("Factory", Instant::now()),
            Err(SceneError::UnknownAsset("Factory".into()))
        );
        sync.select_asset("Sample 2", Instant::now()).unwrap();
        assert_eq!(
            channel.take_messages(),
            vec![OutboundMessage::open_asset("/app/samples/stage02.usd")]
        );
        assert_eq!(sync.tree_generation(), 1);
    }

    #[test]
    fn undecodable_and_unclassified_messages_are_ignored() {
        let (mut sync, channel) = synchronizer(ViewerMode::WebUi);
        let before = sync.snapshot();
        sync.handle_text("{ not json", Instant::now());
        inbound(&mut sync, "cameraMoved", json!({ "x": 1 }));
        inbound(&mut sync, "updateProgressAmount", json!({ "progress": "lots" }));
        assert_eq!(sync.snapshot(), before);
        assert!(channel.take_messages().is_empty());
    }

    #[test]
    fn progress_and_activity_update_loading_state() {
        let (mut sync, _channel) = synchronizer(ViewerMode::WebUi);
        inbound(&mut sync, "updateProgressActivity", json!({ "text": "Reading layers" }));
        inbound(&mut sync, "updateProgressAmount", json!({ "progress": 0.25 }));
        let loading = sync.loading();
        assert_eq!(loading.asset_load_state, AssetLoadState::Loading);
        assert_eq!(loading.progress, 25);
        assert_eq!(loading.activity_text, "Reading layers");
    }
}
