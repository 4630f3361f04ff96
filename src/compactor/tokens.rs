// src/compactor/tokens.rs
// Deterministic per-message token counting and usage-percent classification.

use crate::utils::estimate_tokens;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageStatus {
    Normal,
    Warning,
    Critical,
}

impl UsageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageStatus::Normal => "normal",
            UsageStatus::Warning => "warning",
            UsageStatus::Critical => "critical",
        }
    }
}

/// Fixed per-role overhead added on top of content tokens, approximating the
/// wrapper tokens a chat-formatted prompt spends on role framing.
fn role_overhead(role: &str) -> usize {
    match role {
        "system" => 4,
        "assistant" => 3,
        "user" => 3,
        _ => 3,
    }
}

/// `tokens(message) = tokens(content) + role_overhead(role)`. Falls back to
/// `ceil(len(content) / 4)` when no precise tokenizer is wired in — this is
/// always the case today, but the signature leaves room for a model-specific
/// tokenizer to replace `estimate_tokens` later.
pub fn count_message_tokens(role: &str, content: &str) -> usize {
    estimate_tokens(content) as usize + role_overhead(role)
}

pub fn usage_percent(current_tokens: usize, max_tokens: usize) -> f32 {
    if max_tokens == 0 {
        return 100.0;
    }
    (current_tokens as f32 / max_tokens as f32) * 100.0
}

pub fn usage_status(usage_percent: f32, warning_percent: f32, critical_percent: f32) -> UsageStatus {
    if usage_percent > critical_percent {
        UsageStatus::Critical
    } else if usage_percent >= warning_percent {
        UsageStatus::Warning
    } else {
        UsageStatus::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_count_includes_role_overhead() {
        let tokens = count_message_tokens("user", "abcd");
        assert_eq!(tokens, 1 + 3);
    }

    #[test]
    fn usage_status_boundaries() {
        assert_eq!(usage_status(50.0, 70.0, 85.0), UsageStatus::Normal);
        assert_eq!(usage_status(70.0, 70.0, 85.0), UsageStatus::Warning);
        assert_eq!(usage_status(85.1, 70.0, 85.0), UsageStatus::Critical);
    }

    #[test]
    fn usage_percent_guards_zero_max() {
        assert_eq!(usage_percent(10, 0), 100.0);
    }
}
