#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssetLoadState {
    #[default]
    Idle,
    Loading,
    Loaded,
    Error,
}

/// Client-side view of the remote application's loading progress.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoadingState {
    pub is_kit_ready: bool,
    pub asset_load_state: AssetLoadState,
    /// Percent, `0..=100`, never decreasing within one load.
    pub progress: u8,
    pub activity_text: String,
    pub stream_visible: bool,
    pub ui_visible: bool,
}

impl LoadingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enters `Loading`; progress always restarts from zero.
    pub fn begin_load(&mut self, activity: impl Into<String>) {
        self.asset_load_state = AssetLoadState::Loading;
        self.progress = 0;
        self.activity_text = activity.into();
        self.stream_visible = false;
    }

    /// `fraction` is the remote's `0.0..=1.0` progress value.
    pub fn set_progress(&mut self, fraction: f64) {
        if !fraction.is_finite() {
            return;
        }
        let percent = (fraction.clamp(0.0, 1.0) * 100.0).round() as u8;
        self.progress = self.progress.max(percent);
    }

    /// Activity reported outside a load restarts progress but leaves the
    /// stream and panels as they are; only [`begin_load`](Self::begin_load)
    /// hides the stream.
    pub fn note_activity(&mut self, text: String) {
        if self.asset_load_state != AssetLoadState::Loading {
            self.asset_load_state = AssetLoadState::Loading;
            self.progress = 0;
        }
        self.activity_text = text;
    }

    pub fn finish_load(&mut self) {
        self.asset_load_state = AssetLoadState::Loaded;
        self.progress = 100;
        self.activity_text = "Asset loaded".to_string();
        self.stream_visible = true;
        self.ui_visible = true;
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.asset_load_state = AssetLoadState::Error;
        self.activity_text = message.into();
    }
}
