//! Normalizes raw model quota into display rows and tier badges.

use serde::Serialize;

use crate::api::ModelQuota;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModelFamily {
    Claude,
    Gemini,
    Model,
}

impl ModelFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFamily::Claude => "CLAUDE",
            ModelFamily::Gemini => "GEMINI",
            ModelFamily::Model => "MODEL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaRow {
    pub model_id: String,
    pub label: String,
    pub family: ModelFamily,
    /// `None` when the provider reported no remaining fraction.
    pub remaining_pct: Option<f64>,
    pub reset_iso: Option<String>,
    #[serde(skip)]
    sort_key: u8,
}

/// Rows split into the pinned set and the collapsed "other models" set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QuotaRows {
    pub pinned: Vec<QuotaRow>,
    pub other: Vec<QuotaRow>,
}

pub fn model_label(model_id: &str) -> (String, ModelFamily) {
    let id = model_id.to_lowercase();
    let is_claude = id.starts_with("claude-");
    let is_gemini = id.starts_with("gemini-");
    if is_claude && id.contains("opus") {
        ("Claude Opus".to_string(), ModelFamily::Claude)
    } else if is_claude && id.contains("sonnet") {
        ("Claude Sonnet".to_string(), ModelFamily::Claude)
    } else if is_gemini && id.contains("flash") {
        ("Gemini Flash".to_string(), ModelFamily::Gemini)
    } else if is_gemini && (id.contains("pro") || id.contains("premium")) {
        ("Gemini Pro".to_string(), ModelFamily::Gemini)
    } else if is_claude {
        (model_id.to_string(), ModelFamily::Claude)
    } else if is_gemini {
        (model_id.to_string(), ModelFamily::Gemini)
    } else {
        (model_id.to_string(), ModelFamily::Model)
    }
}

pub fn model_sort_key(model_id: &str) -> u8 {
    let id = model_id.to_lowercase();
    if id.contains("claude-opus") {
        0
    } else if id.contains("claude-sonnet") {
        1
    } else if id.contains("gemini") && id.contains("pro") {
        2
    } else if id.contains("gemini") && id.contains("flash") {
        3
    } else if id.starts_with("claude-") {
        10
    } else if id.starts_with("gemini-") {
        11
    } else {
        50
    }
}

pub fn normalize_models<'a>(models: impl IntoIterator<Item = (&'a String, &'a ModelQuota)>) -> QuotaRows {
    let mut rows: Vec<QuotaRow> = models
        .into_iter()
        .map(|(model_id, quota)| {
            let (label, family) = model_label(model_id);
            QuotaRow {
                model_id: model_id.clone(),
                label,
                family,
                remaining_pct: quota
                    .remaining_fraction
                    .filter(|f| f.is_finite())
                    .map(|f| (f * 100.0).clamp(0.0, 100.0)),
                reset_iso: quota.reset_time.clone(),
                sort_key: model_sort_key(model_id),
            }
        })
        .collect();
    rows.sort_by(|a, b| a.sort_key.cmp(&b.sort_key).then_with(|| a.model_id.cmp(&b.model_id)));

    let (pinned, other) = rows.into_iter().partition(|row| {
        let id = row.model_id.to_lowercase();
        row.sort_key <= 3 || id.starts_with("claude-") || id.starts_with("gemini-")
    });
    QuotaRows { pinned, other }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BadgeTone {
    Premium,
    Free,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierBadge {
    pub tier: String,
    pub label: String,
    pub tone: BadgeTone,
}

pub fn tier_badge(tier: &str) -> TierBadge {
    let lower = tier.to_lowercase();
    let tone = if ["ultra", "pro", "paid", "standard", "enterprise"]
        .iter()
        .any(|k| lower.contains(k))
    {
        BadgeTone::Premium
    } else if lower.contains("free") || lower.contains("legacy") {
        BadgeTone::Free
    } else {
        BadgeTone::Unknown
    };
    let label = if tier.trim().is_empty() {
        "UNKNOWN".to_string()
    } else {
        tier.trim().to_uppercase()
    };
    TierBadge {
        tier: tier.to_string(),
        label,
        tone,
    }
}

/// `MM:SS`, or `H:MM:SS` past an hour. Negative input renders as zero.
pub fn format_clock(ms: i64) -> String {
    let total = ms.max(0) / 1000;
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// Time until a quota reset, as `2h 13m`, `45m` or `now`.
pub fn format_reset_in(reset_iso: &str, now_ms: i64) -> Option<String> {
    let reset = chrono::DateTime::parse_from_rfc3339(reset_iso).ok()?;
    let remaining_mins = (reset.timestamp_millis() - now_ms) / 60_000;
    Some(if remaining_mins <= 0 {
        "now".to_string()
    } else if remaining_mins >= 60 {
        format!("{}h {}m", remaining_mins / 60, remaining_mins % 60)
    } else {
        format!("{}m", remaining_mins)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn quota(fraction: Option<f64>) -> ModelQuota {
        ModelQuota {
            display_name: None,
            remaining_fraction: fraction,
            reset_time: None,
        }
    }

    #[test]
    fn test_rows_are_ordered_and_split() {
        let models: BTreeMap<String, ModelQuota> = [
            ("chat_20706", quota(Some(1.0))),
            ("gemini-2.5-flash", quota(Some(0.5))),
            ("claude-sonnet-4-5", quota(Some(0.9))),
            ("gemini-3-pro-high", quota(Some(1.2))),
            ("claude-opus-4-5-thinking", quota(None)),
            ("gemini-embedding", quota(Some(-0.3))),
        ]
        .into_iter()
        .map(|(id, q)| (id.to_string(), q))
        .collect();

        let rows = normalize_models(&models);
        let pinned: Vec<&str> = rows.pinned.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(
            pinned,
            vec!["Claude Opus", "Claude Sonnet", "Gemini Pro", "Gemini Flash", "gemini-embedding"]
        );
        assert_eq!(rows.other.len(), 1);
        assert_eq!(rows.other[0].model_id, "chat_20706");
        assert_eq!(rows.other[0].family, ModelFamily::Model);

        assert_eq!(rows.pinned[0].remaining_pct, None);
        assert_eq!(rows.pinned[2].remaining_pct, Some(100.0));
        assert_eq!(rows.pinned[4].remaining_pct, Some(0.0));
    }

    #[test]
    fn test_tier_badge_tones() {
        assert_eq!(tier_badge("g1-ultra-tier").tone, BadgeTone::Premium);
        assert_eq!(tier_badge("free-tier").tone, BadgeTone::Free);
        assert_eq!(tier_badge("legacy-tier").tone, BadgeTone::Free);
        assert_eq!(tier_badge("unknown").tone, BadgeTone::Unknown);
        assert_eq!(tier_badge("free-tier").label, "FREE-TIER");
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(-500), "00:00");
        assert_eq!(format_clock(29_999), "00:29");
        assert_eq!(format_clock(90_000), "01:30");
        assert_eq!(format_clock(3_725_000), "1:02:05");
    }

    #[test]
    fn test_format_reset_in() {
        let now = chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .timestamp_millis();
        assert_eq!(format_reset_in("2026-01-01T02:13:30Z", now).as_deref(), Some("2h 13m"));
        assert_eq!(format_reset_in("2026-01-01T00:45:00Z", now).as_deref(), Some("45m"));
        assert_eq!(format_reset_in("2025-12-31T23:00:00Z", now).as_deref(), Some("now"));
        assert_eq!(format_reset_in("not a date", now), None);
    }
}
