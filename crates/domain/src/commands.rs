use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::models::CommentId;

/// A user action a thread view applies optimistically and then sends to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Create {
        content: String,
        parent_id: Option<CommentId>,
    },
    Edit {
        id: CommentId,
        content: String,
    },
    Delete {
        id: CommentId,
    },
    ToggleLike {
        id: CommentId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Edit,
    Delete,
    Like,
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::Create { .. } => MutationKind::Create,
            Mutation::Edit { .. } => MutationKind::Edit,
            Mutation::Delete { .. } => MutationKind::Delete,
            Mutation::ToggleLike { .. } => MutationKind::Like,
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MutationKind::Create => "create",
            MutationKind::Edit => "edit",
            MutationKind::Delete => "delete",
            MutationKind::Like => "like",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseMutationError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("`{0}` needs {1}")]
    MissingArgument(&'static str, &'static str),
}

/// Line syntax: `post <text>`, `reply <parent-id> <text>`, `edit <id> <text>`,
/// `delete <id>`, `like <id>`.
impl FromStr for Mutation {
    type Err = ParseMutationError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();

        let id_and_text = |verb: &'static str| {
            let (id, text) = rest
                .split_once(char::is_whitespace)
                .ok_or(ParseMutationError::MissingArgument(verb, "an id and a text"))?;
            Ok::<_, ParseMutationError>((CommentId::from(id), text.trim().to_string()))
        };
        let id_only = |verb: &'static str| {
            if rest.is_empty() {
                Err(ParseMutationError::MissingArgument(verb, "an id"))
            } else {
                Ok(CommentId::from(rest))
            }
        };

        match verb {
            "post" if rest.is_empty() => Err(ParseMutationError::MissingArgument("post", "a text")),
            "post" => Ok(Mutation::Create {
                content: rest.to_string(),
                parent_id: None,
            }),
            "reply" => {
                let (parent, content) = id_and_text("reply")?;
                Ok(Mutation::Create {
                    content,
                    parent_id: Some(parent),
                })
            }
            "edit" => {
                let (id, content) = id_and_text("edit")?;
                Ok(Mutation::Edit { id, content })
            }
            "delete" => Ok(Mutation::Delete {
                id: id_only("delete")?,
            }),
            "like" => Ok(Mutation::ToggleLike {
                id: id_only("like")?,
            }),
            other => Err(ParseMutationError::UnknownCommand(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            "post Nice chapter!".parse::<Mutation>(),
            Ok(Mutation::Create {
                content: "Nice chapter!".into(),
                parent_id: None
            })
        );
        assert_eq!(
            "reply c1  me too".parse::<Mutation>(),
            Ok(Mutation::Create {
                content: "me too".into(),
                parent_id: Some(CommentId::from("c1"))
            })
        );
        assert_eq!(
            "edit c2 updated text".parse::<Mutation>(),
            Ok(Mutation::Edit {
                id: CommentId::from("c2"),
                content: "updated text".into()
            })
        );
        assert_eq!(
            " like c1 ".parse::<Mutation>(),
            Ok(Mutation::ToggleLike {
                id: CommentId::from("c1")
            })
        );
        assert_eq!(
            "delete c1".parse::<Mutation>().map(|m| m.kind()),
            Ok(MutationKind::Delete)
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            "post".parse::<Mutation>(),
            Err(ParseMutationError::MissingArgument("post", "a text"))
        );
        assert_eq!(
            "edit c2".parse::<Mutation>(),
            Err(ParseMutationError::MissingArgument("edit", "an id and a text"))
        );
        assert_eq!(
            "shout hi".parse::<Mutation>(),
            Err(ParseMutationError::UnknownCommand("shout".into()))
        );
    }
}
