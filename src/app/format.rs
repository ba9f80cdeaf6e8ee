use chrono::{DateTime, Local};

use crate::progress::PlaybackItem;

pub(crate) fn truncate(s: &str, max: usize) -> String {
    let mut out = s.to_string();
    if out.chars().count() > max {
        out = out.chars().take(max.saturating_sub(3)).collect::<String>() + "...";
    }
    out
}

pub(crate) fn format_updated_at(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| {
            dt.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M %:z")
                .to_string()
        })
        .unwrap_or_else(|_| raw.to_string())
}

/// `m:ss` below an hour, `h:mm:ss` above.
pub(crate) fn format_clock(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

/// Clock position plus the watched share when the duration is known.
pub(crate) fn format_position(item: &PlaybackItem, seconds: f64) -> String {
    let clock = format_clock(seconds);
    match item.progress_ratio(seconds) {
        Some(ratio) => format!("{clock} ({:.0}%)", ratio * 100.0),
        None => clock,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_adds_ellipsis_past_limit() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a rather long title", 10), "a rathe...");
    }

    #[test]
    fn clock_switches_to_hours() {
        assert_eq!(format_clock(0.0), "0:00");
        assert_eq!(format_clock(48.9), "0:48");
        assert_eq!(format_clock(605.0), "10:05");
        assert_eq!(format_clock(3723.0), "1:02:03");
        assert_eq!(format_clock(f64::NAN), "0:00");
    }

    #[test]
    fn position_includes_ratio_when_duration_known() {
        let item = PlaybackItem::movie("1").with_duration(Some(200.0));
        assert_eq!(format_position(&item, 50.0), "0:50 (25%)");
        assert_eq!(format_position(&PlaybackItem::movie("2"), 50.0), "0:50");
    }

    #[test]
    fn unparseable_timestamps_are_shown_raw() {
        assert_eq!(format_updated_at("yesterday"), "yesterday");
        assert!(!format_updated_at("2026-01-02T03:04:05+00:00").is_empty());
    }
}
