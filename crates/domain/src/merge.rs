use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};

use crate::display::timestamp_label;
use crate::models::{Comment, CommentId, Origin, PendingEntry, Viewer};
use crate::overrides::OverrideRecord;
use crate::protocol::normalize_content;

/// Everything one reconciliation pass reads. Borrowed so a view can merge on every render.
pub struct MergeInput<'a> {
    pub server: &'a [Comment],
    pub pending: &'a [PendingEntry],
    pub overrides: &'a HashMap<CommentId, OverrideRecord>,
    /// Ids deleted locally whose deletion the server has not reflected yet.
    pub hidden: &'a HashSet<CommentId>,
    pub viewer: &'a Viewer,
    pub now: DateTime<Utc>,
    pub dedup_skew: Duration,
}

/// Combines pending entries, server data and overrides into one display list.
///
/// Unconfirmed pending entries come first, most recent first, followed by server
/// comments with overrides applied. Pure: the same input always yields the same output.
pub fn merge(input: &MergeInput<'_>) -> Vec<Comment> {
    let matched = match_pending(input.pending, input.server, input.viewer, input.dedup_skew);

    let mut unconfirmed: Vec<&PendingEntry> = input
        .pending
        .iter()
        .filter(|p| !matched.contains(&p.temp_id))
        .collect();
    unconfirmed.reverse();
    // stable: entries created in the same instant keep reverse insertion order
    unconfirmed.sort_by(|a, b| b.created_at_local.cmp(&a.created_at_local));

    let mut out: Vec<Comment> = unconfirmed
        .into_iter()
        .map(|p| pending_view(p, input.viewer, input.now))
        .collect();

    let mut seen = HashSet::new();
    for c in input.server {
        if input.hidden.contains(&c.id) || !seen.insert(&c.id) {
            continue;
        }
        let mut c = c.clone();
        if let Some(record) = input.overrides.get(&c.id) {
            record.apply_to(&mut c);
        }
        c.timestamp = timestamp_label(&c, input.now);
        c.origin = Origin::Confirmed;
        out.push(c);
    }
    out
}

/// Temp ids of pending entries that a server comment already confirms.
///
/// A match needs the viewer as author and equal normalized content. Each server comment
/// confirms at most one pending entry, and a server comment created well before the
/// pending entry (older than `dedup_skew`) is an earlier, unrelated post.
pub fn match_pending(
    pending: &[PendingEntry],
    server: &[Comment],
    viewer: &Viewer,
    dedup_skew: Duration,
) -> HashSet<CommentId> {
    let mut claimed: HashSet<&CommentId> = HashSet::new();
    let mut matched = HashSet::new();
    for entry in pending {
        let key = normalize_content(&entry.content);
        let earliest = entry.created_at_local - dedup_skew;
        let hit = server.iter().find(|c| {
            !claimed.contains(&c.id)
                && c.author.id.as_deref() == Some(viewer.id.as_str())
                && c.created_at.map_or(true, |t| t >= earliest)
                && normalize_content(&c.content) == key
        });
        if let Some(c) = hit {
            claimed.insert(&c.id);
            matched.insert(entry.temp_id.clone());
        }
    }
    matched
}

fn pending_view(entry: &PendingEntry, viewer: &Viewer, now: DateTime<Utc>) -> Comment {
    let mut c = Comment {
        id: entry.temp_id.clone(),
        content: entry.content.clone(),
        parent_id: entry.parent_id.clone(),
        like_count: 0,
        liked: false,
        reply_count: 0,
        author: viewer.identity(),
        created_at: Some(entry.created_at_local),
        updated_at: None,
        edited_at: None,
        timestamp: String::new(),
        origin: Origin::Pending,
    };
    c.timestamp = timestamp_label(&c, now);
    c
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuthorIdentity;

    fn viewer() -> Viewer {
        Viewer {
            id: "u1".into(),
            name: "Lan".into(),
            handle: "lan99".into(),
            avatar: None,
        }
    }

    fn server(id: &str, author: &str, content: &str, created: DateTime<Utc>) -> Comment {
        Comment {
            id: CommentId::from(id),
            content: content.to_string(),
            parent_id: None,
            like_count: 0,
            liked: false,
            reply_count: 0,
            author: AuthorIdentity {
                id: Some(author.to_string()),
                name: author.to_string(),
                handle: author.to_string(),
                avatar: None,
            },
            created_at: Some(created),
            updated_at: None,
            edited_at: None,
            timestamp: String::new(),
            origin: Origin::Confirmed,
        }
    }

    fn pending(id: &str, content: &str, at: DateTime<Utc>) -> PendingEntry {
        PendingEntry {
            temp_id: CommentId::new(format!("temp_{id}")),
            content: content.to_string(),
            parent_id: None,
            created_at_local: at,
            expires_at: at + Duration::seconds(5),
        }
    }

    struct Fixture {
        server: Vec<Comment>,
        pending: Vec<PendingEntry>,
        overrides: HashMap<CommentId, OverrideRecord>,
        hidden: HashSet<CommentId>,
        viewer: Viewer,
        now: DateTime<Utc>,
    }

    impl Fixture {
        fn new(now: DateTime<Utc>) -> Self {
            Self {
                server: Vec::new(),
                pending: Vec::new(),
                overrides: HashMap::new(),
                hidden: HashSet::new(),
                viewer: viewer(),
                now,
            }
        }

        fn merge(&self) -> Vec<Comment> {
            merge(&MergeInput {
                server: &self.server,
                pending: &self.pending,
                overrides: &self.overrides,
                hidden: &self.hidden,
                viewer: &self.viewer,
                now: self.now,
                dedup_skew: Duration::seconds(60),
            })
        }
    }

    #[test]
    fn test_merge_is_idempotent() {
        let now = Utc::now();
        let mut f = Fixture::new(now);
        f.server.push(server("c1", "u2", "first", now - Duration::hours(1)));
        f.pending.push(pending("1", "mine", now));
        f.overrides
            .insert(CommentId::from("c1"), OverrideRecord::like(true, 1));

        let once = f.merge();
        let twice = f.merge();
        assert_eq!(once, twice);
        assert_eq!(once.len(), 2);
    }

    #[test]
    fn test_pending_graduates_without_duplicate() {
        let now = Utc::now();
        let mut f = Fixture::new(now);
        f.pending.push(pending("1", "hello", now));

        let before = f.merge();
        assert_eq!(before.len(), 1);
        assert!(before[0].id.is_temp());
        assert_eq!(before[0].origin, Origin::Pending);

        f.server.push(server("s1", "u1", "hello ", now));
        let after = f.merge();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id.as_str(), "s1");
        assert_eq!(after[0].origin, Origin::Confirmed);
    }

    #[test]
    fn test_same_text_from_other_author_does_not_confirm() {
        let now = Utc::now();
        let mut f = Fixture::new(now);
        f.pending.push(pending("1", "hello", now));
        f.server.push(server("s1", "u2", "hello", now));
        assert_eq!(f.merge().len(), 2);
    }

    #[test]
    fn test_one_server_comment_confirms_one_pending() {
        let now = Utc::now();
        let mut f = Fixture::new(now);
        f.pending.push(pending("1", "ok", now));
        f.pending.push(pending("2", "ok", now));
        f.server.push(server("s1", "u1", "ok", now));

        let matched = match_pending(&f.pending, &f.server, &f.viewer, Duration::seconds(60));
        assert_eq!(matched.len(), 1);
        assert!(matched.contains(&CommentId::from("temp_1")));
        assert_eq!(f.merge().len(), 2);
    }

    #[test]
    fn test_old_identical_comment_does_not_confirm() {
        let now = Utc::now();
        let mut f = Fixture::new(now);
        f.pending.push(pending("1", "thanks", now));
        f.server.push(server("s0", "u1", "thanks", now - Duration::days(2)));
        let merged = f.merge();
        assert_eq!(merged.len(), 2);
        assert!(merged[0].id.is_temp());
    }

    #[test]
    fn test_override_precedence() {
        let now = Utc::now();
        let mut f = Fixture::new(now);
        let mut c = server("c2", "u2", "old text", now - Duration::hours(2));
        c.like_count = 7;
        f.server.push(c);

        let mut record = OverrideRecord::edit("updated text", now);
        record.merge(&OverrideRecord::like(true, 8));
        f.overrides.insert(CommentId::from("c2"), record);

        let merged = f.merge();
        assert_eq!(merged[0].content, "updated text");
        assert_eq!(merged[0].like_count, 8);
        assert!(merged[0].liked);
        assert_eq!(merged[0].timestamp, "(edited) just now");
    }

    #[test]
    fn test_pending_first_most_recent_first() {
        let now = Utc::now();
        let mut f = Fixture::new(now);
        f.server.push(server("s1", "u2", "server", now - Duration::hours(1)));
        f.pending.push(pending("a", "older", now - Duration::seconds(2)));
        f.pending.push(pending("b", "newer", now));

        let contents: Vec<_> = f.merge().into_iter().map(|c| c.content).collect();
        assert_eq!(contents, vec!["newer", "older", "server"]);
    }

    #[test]
    fn test_hidden_and_duplicate_ids_removed() {
        let now = Utc::now();
        let mut f = Fixture::new(now);
        f.server.push(server("s1", "u2", "a", now));
        f.server.push(server("s1", "u2", "a again", now));
        f.server.push(server("s2", "u2", "b", now));
        f.hidden.insert(CommentId::from("s2"));

        let merged = f.merge();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].content, "a");
    }
}
