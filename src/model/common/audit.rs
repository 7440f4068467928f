use std::fmt::Display;

use mongodb::bson::Bson;
use rocket::FromFormField;
use serde::{Deserialize, Serialize};

/// Kinds of events recorded in the audit trail.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, FromFormField)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditKind {
    /// A credential check failed (voter or admin).
    #[field(value = "LOGIN_FAIL")]
    LoginFail,
    /// A ballot was committed.
    #[field(value = "VOTE_SUCCESS")]
    VoteSuccess,
    /// A ballot submission with a valid credential was turned away.
    #[field(value = "VOTE_REJECTED")]
    VoteRejected,
    /// A privileged operation changed election state.
    #[field(value = "ADMIN_ACTION")]
    AdminAction,
    /// An unexpected fault interrupted a voter-facing operation.
    #[field(value = "SYSTEM_ERROR")]
    SystemError,
}

impl Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::LoginFail => "LOGIN_FAIL",
            Self::VoteSuccess => "VOTE_SUCCESS",
            Self::VoteRejected => "VOTE_REJECTED",
            Self::AdminAction => "ADMIN_ACTION",
            Self::SystemError => "SYSTEM_ERROR",
        })
    }
}

impl From<AuditKind> for Bson {
    fn from(kind: AuditKind) -> Self {
        Bson::String(kind.to_string())
    }
}
