// src/config/compactor.rs
// Context window budget, lock TTL and checkpoint retention configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactorConfig {
    pub max_tokens: usize,
    pub warning_usage_percent: f32,
    pub critical_usage_percent: f32,
    pub protected_recent_messages: usize,
    pub compaction_trigger_percent: f32,
    pub lock_ttl_seconds: u64,
    pub checkpoint_cap_per_conversation: usize,
    pub checkpoint_expiry_days: i64,
}

impl CompactorConfig {
    pub fn from_env() -> Self {
        Self {
            max_tokens: super::helpers::env_usize("COMPACTOR_MAX_TOKENS", 128_000),
            warning_usage_percent: super::helpers::env_f64("COMPACTOR_WARNING_PERCENT", 70.0) as f32,
            critical_usage_percent: super::helpers::env_f64("COMPACTOR_CRITICAL_PERCENT", 85.0) as f32,
            protected_recent_messages: super::helpers::env_usize(
                "COMPACTOR_PROTECTED_RECENT_MESSAGES",
                10,
            ),
            compaction_trigger_percent: super::helpers::env_f64(
                "COMPACTOR_TRIGGER_PERCENT",
                85.0,
            ) as f32,
            lock_ttl_seconds: super::helpers::env_u64("COMPACTOR_LOCK_TTL", 60),
            checkpoint_cap_per_conversation: super::helpers::env_usize(
                "COMPACTOR_CHECKPOINT_CAP",
                50,
            ),
            checkpoint_expiry_days: super::helpers::env_u64("COMPACTOR_CHECKPOINT_EXPIRY_DAYS", 30)
                as i64,
        }
    }
}
