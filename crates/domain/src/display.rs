use chrono::{DateTime, Utc};

use crate::models::Comment;

pub const EDITED_PREFIX: &str = "(edited) ";

pub fn timestamp_label(comment: &Comment, now: DateTime<Utc>) -> String {
    let Some(latest) = comment.latest_activity() else {
        return String::new();
    };
    let label = relative_label(latest, now);
    if comment.is_edited() {
        format!("{EDITED_PREFIX}{label}")
    } else {
        label
    }
}

pub fn relative_label(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(at);
    // clock skew between client and server can put `at` slightly in the future
    if elapsed.num_seconds() < 60 {
        return "just now".to_string();
    }
    let minutes = elapsed.num_minutes();
    if minutes < 60 {
        return plural(minutes, "minute");
    }
    let hours = elapsed.num_hours();
    if hours < 24 {
        return plural(hours, "hour");
    }
    let days = elapsed.num_days();
    if days < 7 {
        return plural(days, "day");
    }
    at.format("%d/%m/%Y").to_string()
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{n} {unit}s ago")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuthorIdentity, CommentId, Origin};
    use chrono::{Duration, TimeZone};

    fn comment_at(created: DateTime<Utc>) -> Comment {
        Comment {
            id: CommentId::from("c1"),
            content: String::new(),
            parent_id: None,
            like_count: 0,
            liked: false,
            reply_count: 0,
            author: AuthorIdentity::anonymous(),
            created_at: Some(created),
            updated_at: None,
            edited_at: None,
            timestamp: String::new(),
            origin: Origin::Confirmed,
        }
    }

    #[test]
    fn test_relative_labels() {
        let now = Utc.with_ymd_and_hms(2024, 5, 20, 12, 0, 0).unwrap();
        assert_eq!(relative_label(now - Duration::seconds(5), now), "just now");
        assert_eq!(relative_label(now + Duration::seconds(5), now), "just now");
        assert_eq!(relative_label(now - Duration::minutes(1), now), "1 minute ago");
        assert_eq!(relative_label(now - Duration::minutes(42), now), "42 minutes ago");
        assert_eq!(relative_label(now - Duration::hours(3), now), "3 hours ago");
        assert_eq!(relative_label(now - Duration::days(2), now), "2 days ago");
        assert_eq!(relative_label(now - Duration::days(30), now), "20/04/2024");
    }

    #[test]
    fn test_local_edit_is_latest_and_marked() {
        let now = Utc::now();
        let mut c = comment_at(now - Duration::days(3));
        assert_eq!(timestamp_label(&c, now), "3 days ago");

        c.edited_at = Some(now);
        assert_eq!(timestamp_label(&c, now), "(edited) just now");
    }

    #[test]
    fn test_server_update_marks_edited() {
        let now = Utc::now();
        let mut c = comment_at(now - Duration::hours(5));
        c.updated_at = Some(now - Duration::hours(1));
        assert_eq!(timestamp_label(&c, now), "(edited) 1 hour ago");
    }

    #[test]
    fn test_no_times_gives_empty_label() {
        let mut c = comment_at(Utc::now());
        c.created_at = None;
        assert_eq!(timestamp_label(&c, Utc::now()), "");
    }
}
