//! Rendering collaborators and the terminal dashboard.
//!
//! The session controller only talks to [`Dashboard`]; what a status or a
//! quota row looks like is decided here.

use std::io::Write;
use std::sync::Mutex;

use crate::api::UserProfile;
use crate::quota_view::{format_clock, format_reset_in, BadgeTone, QuotaRow, QuotaRows, TierBadge};
use crate::scheduler::CountdownSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Idle,
    Ok,
    Error,
}

pub trait Dashboard: Send + Sync {
    /// Shows the status pill. Empty text hides it.
    fn set_status(&self, text: &str, kind: StatusKind);
    /// Shows or dismisses the error line.
    fn set_error(&self, message: Option<&str>);
    fn set_signed_in(&self, signed_in: bool);
    fn set_online(&self, online: bool);
    fn render_tier(&self, badge: &TierBadge);
    fn render_user(&self, profile: &UserProfile);
    fn render_host(&self, host: &str);
    fn render_quota(&self, rows: &QuotaRows);
    fn set_last_update(&self, stamp: &str);
    fn set_show_other(&self, show: bool);
    /// Resets to the signed-out visual state.
    fn clear(&self);
}

#[derive(Default)]
struct Panel {
    signed_in: bool,
    online: bool,
    tier: Option<TierBadge>,
    user: UserProfile,
    host: Option<String>,
    rows: QuotaRows,
    last_update: Option<String>,
    show_other: bool,
    countdown: Option<String>,
}

/// Prints the dashboard to a terminal.
pub struct ConsoleDashboard {
    out: Mutex<Box<dyn Write + Send>>,
    panel: Mutex<Panel>,
}

impl ConsoleDashboard {
    pub fn stdout(show_other: bool) -> Self {
        Self::with_writer(Box::new(std::io::stdout()), show_other)
    }

    pub fn with_writer(out: Box<dyn Write + Send>, show_other: bool) -> Self {
        Self {
            out: Mutex::new(out),
            panel: Mutex::new(Panel {
                show_other,
                ..Panel::default()
            }),
        }
    }

    fn panel(&self) -> std::sync::MutexGuard<'_, Panel> {
        self.panel.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Writes whole lines, ending any in-place countdown line first.
    fn emit(&self, lines: &[String]) {
        let had_countdown = self.panel().countdown.take().is_some();
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        if had_countdown {
            let _ = writeln!(out);
        }
        for line in lines {
            let _ = writeln!(out, "{}", line);
        }
        let _ = out.flush();
    }

    fn render_panel(&self) -> Vec<String> {
        let panel = self.panel();
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut lines = Vec::new();

        let dot = if panel.online { "●" } else { "○" };
        let tier = panel
            .tier
            .as_ref()
            .map(|b| format!("[{}{}]", b.label, tone_marker(b.tone)))
            .unwrap_or_default();
        lines.push(format!("{} Antigravity quota {}", dot, tier));
        lines.push(format!(
            "  Account: {} <{}>",
            panel.user.name.as_deref().unwrap_or("—"),
            panel.user.email.as_deref().unwrap_or("—")
        ));
        lines.push(format!("  Host:    {}", panel.host.as_deref().unwrap_or("—")));
        for row in &panel.rows.pinned {
            lines.push(row_line(row, now_ms));
        }
        if !panel.rows.other.is_empty() {
            if panel.show_other {
                lines.push("  Other models:".to_string());
                for row in &panel.rows.other {
                    lines.push(row_line(row, now_ms));
                }
            } else {
                lines.push(format!(
                    "  (+{} other models; type `all` to show)",
                    panel.rows.other.len()
                ));
            }
        }
        lines.push(format!(
            "  Last update: {}",
            panel.last_update.as_deref().unwrap_or("—")
        ));
        lines
    }
}

fn tone_marker(tone: BadgeTone) -> &'static str {
    match tone {
        BadgeTone::Premium => " ★",
        BadgeTone::Free | BadgeTone::Unknown => "",
    }
}

fn row_line(row: &QuotaRow, now_ms: i64) -> String {
    let pct = row
        .remaining_pct
        .map(|p| format!("{:>5.1}%", p))
        .unwrap_or_else(|| "    ?".to_string());
    let reset = row
        .reset_iso
        .as_deref()
        .and_then(|iso| format_reset_in(iso, now_ms))
        .map(|r| format!("  resets in {}", r))
        .unwrap_or_default();
    format!("  {:<8} {:<28} {}{}", row.family.as_str(), row.label, pct, reset)
}

impl Dashboard for ConsoleDashboard {
    fn set_status(&self, text: &str, kind: StatusKind) {
        if text.is_empty() {
            return;
        }
        let marker = match kind {
            StatusKind::Idle => "·",
            StatusKind::Ok => "✓",
            StatusKind::Error => "✗",
        };
        self.emit(&[format!("{} {}", marker, text)]);
    }

    fn set_error(&self, message: Option<&str>) {
        if let Some(message) = message {
            self.emit(&[format!("  error: {}", message)]);
        }
    }

    fn set_signed_in(&self, signed_in: bool) {
        self.panel().signed_in = signed_in;
    }

    fn set_online(&self, online: bool) {
        self.panel().online = online;
    }

    fn render_tier(&self, badge: &TierBadge) {
        self.panel().tier = Some(badge.clone());
    }

    fn render_user(&self, profile: &UserProfile) {
        self.panel().user = profile.clone();
    }

    fn render_host(&self, host: &str) {
        self.panel().host = Some(host.to_string());
    }

    fn render_quota(&self, rows: &QuotaRows) {
        self.panel().rows = rows.clone();
    }

    fn set_last_update(&self, stamp: &str) {
        self.panel().last_update = Some(stamp.to_string());
        let lines = self.render_panel();
        self.emit(&lines);
    }

    fn set_show_other(&self, show: bool) {
        let signed_in = {
            let mut panel = self.panel();
            panel.show_other = show;
            panel.signed_in
        };
        if signed_in {
            let lines = self.render_panel();
            self.emit(&lines);
        }
    }

    fn clear(&self) {
        let mut panel = self.panel();
        let show_other = panel.show_other;
        *panel = Panel {
            show_other,
            ..Panel::default()
        };
    }
}

impl CountdownSink for ConsoleDashboard {
    /// Rewrites the countdown line in place when the displayed second changes.
    fn show_countdown(&self, remaining_ms: i64) {
        let text = format_clock(remaining_ms);
        {
            let mut panel = self.panel();
            if !panel.signed_in || panel.countdown.as_deref() == Some(text.as_str()) {
                return;
            }
            panel.countdown = Some(text.clone());
        }
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        let _ = write!(out, "\r  Next refresh in {}", text);
        let _ = out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota_view::{normalize_models, tier_badge};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn signed_in_dashboard(buffer: &SharedBuffer, show_other: bool) -> ConsoleDashboard {
        let dashboard = ConsoleDashboard::with_writer(Box::new(buffer.clone()), show_other);
        dashboard.set_signed_in(true);
        dashboard.render_tier(&tier_badge("g1-pro-tier"));
        dashboard.render_user(&UserProfile {
            name: Some("Ada".to_string()),
            email: Some("ada@example.com".to_string()),
            picture: None,
        });
        dashboard.render_host("cloudcode-pa.googleapis.com");
        let models = [
            ("claude-opus-4".to_string(), crate::api::ModelQuota {
                display_name: None,
                remaining_fraction: Some(0.42),
                reset_time: None,
            }),
            ("chat_1".to_string(), crate::api::ModelQuota::default()),
        ];
        dashboard.render_quota(&normalize_models(models.iter().map(|(k, v)| (k, v))));
        dashboard
    }

    #[test]
    fn test_panel_is_printed_on_last_update() {
        let buffer = SharedBuffer::default();
        let dashboard = signed_in_dashboard(&buffer, false);
        dashboard.set_last_update("Jan 01, 2026 10:00:00");

        let text = buffer.text();
        assert!(text.contains("[G1-PRO-TIER ★]"));
        assert!(text.contains("Ada <ada@example.com>"));
        assert!(text.contains("Claude Opus"));
        assert!(text.contains("42.0%"));
        assert!(text.contains("+1 other models"));
        assert!(!text.contains("chat_1"));
    }

    #[test]
    fn test_other_models_shown_when_toggled() {
        let buffer = SharedBuffer::default();
        let dashboard = signed_in_dashboard(&buffer, false);
        dashboard.set_show_other(true);
        assert!(buffer.text().contains("chat_1"));
    }

    #[test]
    fn test_countdown_only_rewrites_on_change() {
        let buffer = SharedBuffer::default();
        let dashboard = signed_in_dashboard(&buffer, false);
        dashboard.show_countdown(29_900);
        dashboard.show_countdown(29_100);
        dashboard.show_countdown(28_900);

        let text = buffer.text();
        assert_eq!(text.matches("Next refresh in").count(), 2);
        assert!(text.contains("00:28"));
    }

    #[test]
    fn test_clear_hides_countdown() {
        let buffer = SharedBuffer::default();
        let dashboard = signed_in_dashboard(&buffer, false);
        dashboard.clear();
        dashboard.show_countdown(10_000);
        assert!(!buffer.text().contains("Next refresh"));
    }
}
