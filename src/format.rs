use chrono::{DateTime, NaiveDateTime, Utc};

/// Parses the API's timestamps: RFC 3339, or naive ISO 8601 read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Short relative label for a conversation's last activity.
pub fn conversation_time_status(created_at: &str, now: DateTime<Utc>) -> String {
    let Some(at) = parse_timestamp(created_at) else {
        return String::new();
    };

    let diff_secs = (now - at).num_seconds();
    if diff_secs < 60 {
        return "Just now".into();
    }

    let diff_mins = diff_secs / 60;
    if diff_mins < 60 {
        return format!("{diff_mins} min ago");
    }

    let diff_hours = diff_mins / 60;
    if diff_hours < 24 {
        return format!("{diff_hours} h ago");
    }

    if diff_hours < 48 {
        return "Yesterday".into();
    }

    at.format("%d/%m/%Y").to_string()
}

/// `Mar 05, 2026`. Unparseable input is returned unchanged.
pub fn format_date(raw: &str) -> String {
    match parse_timestamp(raw) {
        Some(at) => at.format("%b %d, %Y").to_string(),
        None => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn relative_labels() {
        assert_eq!(conversation_time_status("2026-03-10T11:59:30Z", now()), "Just now");
        assert_eq!(conversation_time_status("2026-03-10T11:45:00Z", now()), "15 min ago");
        assert_eq!(conversation_time_status("2026-03-10T09:00:00Z", now()), "3 h ago");
        assert_eq!(conversation_time_status("2026-03-09T08:00:00Z", now()), "Yesterday");
        assert_eq!(conversation_time_status("2026-02-01T08:00:00Z", now()), "01/02/2026");
    }

    #[test]
    fn future_timestamps_count_as_just_now() {
        assert_eq!(conversation_time_status("2026-03-10T12:05:00Z", now()), "Just now");
    }

    #[test]
    fn unparseable_is_empty() {
        assert_eq!(conversation_time_status("yesterday-ish", now()), "");
        assert_eq!(conversation_time_status("", now()), "");
    }

    #[test]
    fn naive_timestamps_are_utc() {
        let parsed = parse_timestamp("2026-03-10T11:00:00.123456").unwrap();
        let expected = Utc.with_ymd_and_hms(2026, 3, 10, 11, 0, 0).unwrap()
            + chrono::Duration::microseconds(123_456);
        assert_eq!(parsed, expected);
    }

    #[test]
    fn formats_dates() {
        assert_eq!(format_date("2026-03-05T08:00:00+07:00"), "Mar 05, 2026");
        assert_eq!(format_date("n/a"), "n/a");
    }
}
