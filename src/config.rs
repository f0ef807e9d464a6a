//! Configuration (§6, ambient).
//!
//! Loaded via `dotenvy` + `std::env`, deserialized into a typed struct with
//! `#[serde(deny_unknown_fields)]` so unknown options fail fast at load
//! time rather than being silently ignored. Credential fields are redacted
//! in `Debug` output.

use serde::Deserialize;
use std::fmt;

#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub source_api_credentials: String,
    pub mirror_api_credentials: String,
    pub mirror_enabled_default: bool,
    pub ratio_default: f64,
    pub trigger_scan_interval_ms: u64,
    pub position_sync_interval_s: u64,
    pub margin_guard_interval_s: u64,
    pub notification_chat_id: String,
    pub source_contract: String,
    pub mirror_contract: String,
    pub minimum_margin_usd: f64,
    /// Required to keep the canonical hash fair for symbols far from BTC's
    /// price scale (see DESIGN.md's Open Question decision #2). Defaults
    /// approximate `{20,50,100,200}` USD offsets divided by a 50,000 USD
    /// reference price.
    #[serde(default = "default_hash_offset_fractions")]
    pub hash_offset_fractions: Vec<f64>,
}

fn default_hash_offset_fractions() -> Vec<f64> {
    vec![0.0004, 0.001, 0.002, 0.004]
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("source_api_credentials", &"<redacted>")
            .field("mirror_api_credentials", &"<redacted>")
            .field("mirror_enabled_default", &self.mirror_enabled_default)
            .field("ratio_default", &self.ratio_default)
            .field("trigger_scan_interval_ms", &self.trigger_scan_interval_ms)
            .field("position_sync_interval_s", &self.position_sync_interval_s)
            .field("margin_guard_interval_s", &self.margin_guard_interval_s)
            .field("notification_chat_id", &self.notification_chat_id)
            .field("source_contract", &self.source_contract)
            .field("mirror_contract", &self.mirror_contract)
            .field("minimum_margin_usd", &self.minimum_margin_usd)
            .field("hash_offset_fractions", &self.hash_offset_fractions)
            .finish()
    }
}

impl EngineConfig {
    /// Loads `.env` (if present) then builds the typed config from the
    /// process environment, matching the shape `envy`-style crates expect
    /// but hand-rolled to avoid pulling in an unused dependency.
    pub fn load() -> Result<Self, String> {
        dotenvy::dotenv().ok();
        let env_map: std::collections::HashMap<String, String> = std::env::vars().collect();
        let json = serde_json::json!({
            "source_api_credentials": env_map.get("SOURCE_API_CREDENTIALS").cloned().unwrap_or_default(),
            "mirror_api_credentials": env_map.get("MIRROR_API_CREDENTIALS").cloned().unwrap_or_default(),
            "mirror_enabled_default": env_map.get("MIRROR_ENABLED_DEFAULT").map(|v| v == "true").unwrap_or(true),
            "ratio_default": env_map.get("RATIO_DEFAULT").and_then(|v| v.parse::<f64>().ok()).unwrap_or(1.0),
            "trigger_scan_interval_ms": env_map.get("TRIGGER_SCAN_INTERVAL_MS").and_then(|v| v.parse::<u64>().ok()).unwrap_or(200),
            "position_sync_interval_s": env_map.get("POSITION_SYNC_INTERVAL_S").and_then(|v| v.parse::<u64>().ok()).unwrap_or(30),
            "margin_guard_interval_s": env_map.get("MARGIN_GUARD_INTERVAL_S").and_then(|v| v.parse::<u64>().ok()).unwrap_or(300),
            "notification_chat_id": env_map.get("NOTIFICATION_CHAT_ID").cloned().unwrap_or_default(),
            "source_contract": env_map.get("SOURCE_CONTRACT").cloned().unwrap_or_else(|| "BTC_USDT".to_string()),
            "mirror_contract": env_map.get("MIRROR_CONTRACT").cloned().unwrap_or_else(|| "BTC_USDT".to_string()),
            "minimum_margin_usd": env_map.get("MINIMUM_MARGIN_USD").and_then(|v| v.parse::<f64>().ok()).unwrap_or(5.0),
            "hash_offset_fractions": default_hash_offset_fractions(),
        });
        serde_json::from_value(json).map_err(|e| format!("config error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_credentials() {
        let cfg = EngineConfig {
            source_api_credentials: "secret-key".into(),
            mirror_api_credentials: "other-secret".into(),
            mirror_enabled_default: true,
            ratio_default: 1.0,
            trigger_scan_interval_ms: 200,
            position_sync_interval_s: 30,
            margin_guard_interval_s: 300,
            notification_chat_id: "chat".into(),
            source_contract: "BTC_USDT".into(),
            mirror_contract: "BTC_USDT".into(),
            minimum_margin_usd: 5.0,
            hash_offset_fractions: default_hash_offset_fractions(),
        };
        let debug = format!("{cfg:?}");
        assert!(!debug.contains("secret-key"));
        assert!(!debug.contains("other-secret"));
        assert!(debug.contains("<redacted>"));
    }
}
