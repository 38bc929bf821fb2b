use std::collections::HashMap;

use crate::models::{Comment, CommentId, Thread};

/// Builds the two-level tree from a merged list.
///
/// Replies to replies are listed under their top-level ancestor. A reply whose ancestor
/// chain is broken (parent missing from `merged`) is left out, not deleted: it shows up
/// again once its parent is back in the list.
pub fn assemble(merged: Vec<Comment>) -> Vec<Thread> {
    let parents: HashMap<&CommentId, Option<&CommentId>> = merged
        .iter()
        .map(|c| (&c.id, c.parent_id.as_ref()))
        .collect();

    let roots: Vec<Option<CommentId>> = merged
        .iter()
        .map(|c| root_of(c, &parents, merged.len()).cloned())
        .collect();

    let mut threads: Vec<Thread> = Vec::new();
    let mut slot: HashMap<CommentId, usize> = HashMap::new();
    let mut replies: Vec<Comment> = Vec::new();
    let mut reply_roots: Vec<CommentId> = Vec::new();

    for (comment, root) in merged.into_iter().zip(roots) {
        if comment.is_top_level() {
            slot.insert(comment.id.clone(), threads.len());
            threads.push(Thread {
                parent: comment,
                replies: Vec::new(),
            });
        } else if let Some(root) = root {
            reply_roots.push(root);
            replies.push(comment);
        }
    }

    for (reply, root) in replies.into_iter().zip(reply_roots) {
        if let Some(&i) = slot.get(&root) {
            threads[i].replies.push(reply);
        }
    }

    for thread in &mut threads {
        thread.parent.reply_count = u32::try_from(thread.replies.len()).unwrap_or(u32::MAX);
    }
    threads
}

/// Walks parent links up to the top-level ancestor. `None` when the chain is broken or loops.
fn root_of<'a>(
    comment: &'a Comment,
    parents: &HashMap<&'a CommentId, Option<&'a CommentId>>,
    limit: usize,
) -> Option<&'a CommentId> {
    let mut current = &comment.id;
    for _ in 0..=limit {
        match parents.get(current) {
            Some(&Some(parent)) => current = parent,
            Some(&None) => return Some(current),
            None => return None,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuthorIdentity, Origin};

    fn c(id: &str, parent: Option<&str>) -> Comment {
        Comment {
            id: CommentId::from(id),
            content: id.to_string(),
            parent_id: parent.map(CommentId::from),
            like_count: 0,
            liked: false,
            reply_count: 0,
            author: AuthorIdentity::anonymous(),
            created_at: None,
            updated_at: None,
            edited_at: None,
            timestamp: String::new(),
            origin: Origin::Confirmed,
        }
    }

    fn shape(threads: &[Thread]) -> Vec<(String, Vec<String>)> {
        threads
            .iter()
            .map(|t| {
                (
                    t.parent.id.to_string(),
                    t.replies.iter().map(|r| r.id.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_reply_nested_under_parent() {
        let threads = assemble(vec![c("a", None), c("b", Some("a")), c("z", None)]);
        assert_eq!(
            shape(&threads),
            vec![
                ("a".to_string(), vec!["b".to_string()]),
                ("z".to_string(), vec![]),
            ]
        );
        assert_eq!(threads[0].parent.reply_count, 1);
        assert_eq!(threads[1].parent.reply_count, 0);
    }

    #[test]
    fn test_reply_listed_before_parent_still_attached() {
        // pending replies are merged ahead of their confirmed parent
        let threads = assemble(vec![c("temp_r", Some("a")), c("a", None)]);
        assert_eq!(
            shape(&threads),
            vec![("a".to_string(), vec!["temp_r".to_string()])]
        );
    }

    #[test]
    fn test_deep_replies_flattened_to_ancestor() {
        let threads = assemble(vec![
            c("a", None),
            c("b", Some("a")),
            c("c", Some("b")),
            c("d", Some("c")),
        ]);
        assert_eq!(
            shape(&threads),
            vec![(
                "a".to_string(),
                vec!["b".to_string(), "c".to_string(), "d".to_string()]
            )]
        );
        assert_eq!(threads[0].parent.reply_count, 3);
    }

    #[test]
    fn test_orphan_reply_excluded_until_parent_returns() {
        let without_parent = assemble(vec![c("x", None), c("b", Some("gone"))]);
        assert_eq!(shape(&without_parent), vec![("x".to_string(), vec![])]);

        let with_parent = assemble(vec![c("x", None), c("gone", None), c("b", Some("gone"))]);
        assert_eq!(
            shape(&with_parent),
            vec![
                ("x".to_string(), vec![]),
                ("gone".to_string(), vec!["b".to_string()]),
            ]
        );
    }

    #[test]
    fn test_parent_cycle_is_dropped() {
        let threads = assemble(vec![c("a", None), c("p", Some("q")), c("q", Some("p"))]);
        assert_eq!(shape(&threads), vec![("a".to_string(), vec![])]);
    }
}
