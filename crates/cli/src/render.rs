use domain::{Comment, Origin, Thread};
use std::fmt::Write;

pub fn format_threads(thread_id: &str, threads: &[Thread]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "── thread {} ──", thread_id);
    if threads.is_empty() {
        out.push_str("  (no comments yet)\n");
        return out;
    }
    for thread in threads {
        write_comment(&mut out, &thread.parent, 0);
        for reply in &thread.replies {
            write_comment(&mut out, reply, 1);
        }
    }
    out
}

fn write_comment(out: &mut String, c: &Comment, depth: usize) {
    let indent = "    ".repeat(depth);
    let marker = if depth > 0 { "↳ " } else { "" };
    let heart = if c.liked { "♥" } else { "♡" };
    let mut header = format!("{indent}{marker}[{}] {}", c.id, c.author.name);
    if !c.author.handle.is_empty() {
        let _ = write!(header, " (@{})", c.author.handle);
    }
    if !c.timestamp.is_empty() {
        let _ = write!(header, " · {}", c.timestamp);
    }
    let _ = write!(header, " · {} {}", heart, c.like_count);
    if depth == 0 && c.reply_count > 0 {
        let _ = write!(header, " · {} replies", c.reply_count);
    }
    if c.origin == Origin::Pending {
        header.push_str(" · sending…");
    }
    let _ = writeln!(out, "{}", header);
    for line in c.content.lines() {
        let _ = writeln!(out, "{indent}    {}", line);
    }
}

pub const HELP: &str = "\
commands:
  post <text>              new top-level comment
  reply <id> <text>        reply to a comment
  edit <id> <text>         change your comment
  delete <id>              remove a comment
  like <id>                like / unlike
  refresh                  refetch the thread
  show                     print the thread
  help                     this text
  quit                     exit";

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{AuthorIdentity, CommentId};

    fn comment(id: &str, content: &str, parent: Option<&str>) -> Comment {
        Comment {
            id: CommentId::from(id),
            content: content.to_string(),
            parent_id: parent.map(CommentId::from),
            like_count: 2,
            liked: true,
            reply_count: 0,
            author: AuthorIdentity {
                id: Some("u2".into()),
                name: "Lan".into(),
                handle: "lan99".into(),
                avatar: None,
            },
            created_at: None,
            updated_at: None,
            edited_at: None,
            timestamp: "just now".into(),
            origin: Origin::Confirmed,
        }
    }

    #[test]
    fn test_format_two_levels() {
        let mut parent = comment("c1", "root text", None);
        parent.reply_count = 1;
        let mut reply = comment("temp_1", "reply text", Some("c1"));
        reply.origin = Origin::Pending;
        let out = format_threads(
            "post-1",
            &[Thread {
                parent,
                replies: vec![reply],
            }],
        );

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "── thread post-1 ──");
        assert_eq!(
            lines[1],
            "[c1] Lan (@lan99) · just now · ♥ 2 · 1 replies"
        );
        assert_eq!(lines[2], "    root text");
        assert!(lines[3].starts_with("    ↳ [temp_1] Lan"));
        assert!(lines[3].ends_with("sending…"));
        assert_eq!(lines[4], "        reply text");
    }

    #[test]
    fn test_format_empty_thread() {
        let out = format_threads("post-1", &[]);
        assert!(out.contains("(no comments yet)"));
    }
}
