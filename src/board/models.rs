use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub invite_token: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "user" => Ok(Self::User),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered user. The password hash never leaves the database layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub team_id: String,
    pub profile_picture: String,
    pub created_at: String,
}

impl User {
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.id.clone(),
            team_id: self.team_id.clone(),
            role: self.role,
        }
    }
}

/// The acting principal for store requests and advisory permission checks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub team_id: String,
    pub role: Role,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplateColumn {
    pub id: String,
    pub name: String,
    pub description: String,
    pub image_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Template {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub cover_url: Option<String>,
    pub background_color: Option<String>,
    pub columns: Vec<TemplateColumn>,
    pub created_at: String,
}

impl Template {
    pub fn has_column(&self, column_id: &str) -> bool {
        self.columns.iter().any(|c| c.id == column_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Retro {
    pub id: String,
    pub name: String,
    pub team_id: String,
    pub template_id: String,
    pub created_at: String,
}

/// A sticky note on a retro board.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    pub id: String,
    pub comment: String,
    pub column_id: String,
    pub retro_id: String,
    pub user_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewComment {
    pub comment: String,
    pub column_id: String,
    pub retro_id: String,
    pub user_id: String,
}

// API view types

/// A retro together with its template, team, and current comments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetroDetail {
    #[serde(flatten)]
    pub retro: Retro,
    pub template: Template,
    pub team: Team,
    pub comments: Vec<Comment>,
}

/// Dashboard listing entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetroSummary {
    #[serde(flatten)]
    pub retro: Retro,
    pub template_title: String,
    pub cover_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserWithTeam {
    pub user: User,
    pub team: Team,
}

// Change feed

/// A row-level change to a retro's comments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum CommentChange {
    Insert { comment: Comment },
    Update { comment: Comment },
    Delete { comment_id: String },
}

impl CommentChange {
    pub fn comment_id(&self) -> &str {
        match self {
            Self::Insert { comment } | Self::Update { comment } => &comment.id,
            Self::Delete { comment_id } => comment_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }
}

/// A change tagged with the retro it belongs to, as carried on the broadcast bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedEnvelope {
    pub retro_id: String,
    pub change: CommentChange,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(id: &str) -> Comment {
        Comment {
            id: id.to_string(),
            comment: "Ship it".to_string(),
            column_id: "went-well".to_string(),
            retro_id: "r1".to_string(),
            user_id: "u1".to_string(),
            created_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_role_round_trips_through_str() {
        assert_eq!(Role::from_str("admin").unwrap(), Role::Admin);
        assert_eq!(Role::from_str(Role::User.as_str()).unwrap(), Role::User);
        assert!(Role::from_str("owner").is_err());
    }

    #[test]
    fn test_comment_change_serialization_is_tagged() {
        let json = serde_json::to_string(&CommentChange::Insert {
            comment: comment("c1"),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"Insert\""));
        assert!(json.contains("\"data\""));
        assert!(json.contains("\"column_id\":\"went-well\""));

        let json = serde_json::to_string(&CommentChange::Delete {
            comment_id: "c9".to_string(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"Delete\""));
        assert!(json.contains("\"comment_id\":\"c9\""));
    }

    #[test]
    fn test_comment_change_comment_id() {
        assert_eq!(
            CommentChange::Update { comment: comment("c2") }.comment_id(),
            "c2"
        );
        assert_eq!(
            CommentChange::Delete {
                comment_id: "c3".into()
            }
            .comment_id(),
            "c3"
        );
    }

    #[test]
    fn test_template_has_column() {
        let template = Template {
            id: "t".into(),
            title: "Start Stop Continue".into(),
            description: None,
            cover_url: None,
            background_color: None,
            columns: vec![TemplateColumn {
                id: "start".into(),
                name: "Start".into(),
                description: String::new(),
                image_url: String::new(),
            }],
            created_at: "now".into(),
        };
        assert!(template.has_column("start"));
        assert!(!template.has_column("stop"));
    }

    #[test]
    fn test_retro_detail_flattens_retro_fields() {
        let detail = RetroDetail {
            retro: Retro {
                id: "r1".into(),
                name: "Sprint 12".into(),
                team_id: "t1".into(),
                template_id: "tpl".into(),
                created_at: "now".into(),
            },
            template: Template {
                id: "tpl".into(),
                title: "x".into(),
                description: None,
                cover_url: None,
                background_color: None,
                columns: vec![],
                created_at: "now".into(),
            },
            team: Team {
                id: "t1".into(),
                name: "Team".into(),
                invite_token: None,
                created_at: "now".into(),
            },
            comments: vec![],
        };
        let value = serde_json::to_value(&detail).unwrap();
        assert_eq!(value["name"], "Sprint 12");
        assert_eq!(value["template"]["id"], "tpl");
        let back: RetroDetail = serde_json::from_value(value).unwrap();
        assert_eq!(back.retro.id, "r1");
    }
}
