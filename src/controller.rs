//! Ratio/Enable Controller (§4.4).
//!
//! Holds the two operator-tunable knobs — mirroring enabled/disabled and the
//! margin-ratio multiplier — behind a single lock, with an append-only audit
//! trail of ratio changes. Grounded in `risk.rs`'s halt-flag pattern,
//! generalized from a boolean-only halt into a (bool, f64) pair plus history.

use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct RatioAuditEntry {
    pub at_ms: u64,
    pub previous: f64,
    pub new: f64,
    pub by: String,
    pub delta_pct: f64,
}

pub const MIN_RATIO: f64 = 0.1;
pub const MAX_RATIO: f64 = 10.0;

#[derive(Debug, Clone)]
pub struct ControllerState {
    pub enabled: bool,
    pub ratio: f64,
    pub history: Vec<RatioAuditEntry>,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self { enabled: true, ratio: 1.0, history: Vec::new() }
    }
}

pub struct Controller {
    state: RwLock<ControllerState>,
}

impl Default for Controller {
    fn default() -> Self {
        Self { state: RwLock::new(ControllerState::default()) }
    }
}

impl Controller {
    pub fn new(enabled: bool, ratio: f64) -> Self {
        Self { state: RwLock::new(ControllerState { enabled, ratio, history: Vec::new() }) }
    }

    pub async fn is_enabled(&self) -> bool {
        self.state.read().await.enabled
    }

    pub async fn ratio(&self) -> f64 {
        self.state.read().await.ratio
    }

    pub async fn set_enabled(&self, enabled: bool) {
        self.state.write().await.enabled = enabled;
    }

    /// Clamps to `[0.1, 10.0]` (§4.3) and records the change in the audit
    /// trail, including the operator identity and percentage delta.
    pub async fn set_ratio(&self, requested_ratio: f64, by: impl Into<String>, now_ms: u64) -> Result<(), String> {
        if !requested_ratio.is_finite() {
            return Err(format!("ratio must be finite, got {requested_ratio}"));
        }
        let new_ratio = requested_ratio.clamp(MIN_RATIO, MAX_RATIO);
        let mut st = self.state.write().await;
        let previous = st.ratio;
        let delta_pct = if previous != 0.0 { (new_ratio - previous) / previous * 100.0 } else { 0.0 };
        st.ratio = new_ratio;
        st.history.push(RatioAuditEntry { at_ms: now_ms, previous, new: new_ratio, by: by.into(), delta_pct });
        Ok(())
    }

    pub async fn snapshot(&self) -> ControllerState {
        self.state.read().await.clone()
    }
}
