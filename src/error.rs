use argon2::Error as Argon2Error;
use jsonwebtoken::errors::{Error as JwtError, ErrorKind as JwtErrorKind};
use log::{error, warn};
use mongodb::error::{
    Error as DbError, ErrorKind as DbErrorKind, TRANSIENT_TRANSACTION_ERROR,
    UNKNOWN_TRANSACTION_COMMIT_RESULT,
};
use rocket::{
    http::Status,
    response::{status::Custom, Responder},
    serde::json::Json,
    Request,
};
use serde::Serialize;
use thiserror::Error;

use crate::model::common::identity::IdentityNumber;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error(transparent)]
    Argon2(#[from] Argon2Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("Storage temporarily unavailable: {0}")]
    TransientStore(String),
    #[error("Identity number already registered: {0}")]
    DuplicateIdentity(IdentityNumber),
    #[error("{1}")]
    Status(Status, String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::Status(Status::NotFound, format!("{} not found", what.into()))
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::Status(Status::BadRequest, msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Status(Status::Unauthorized, msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Status(Status::Conflict, msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Status(Status::InternalServerError, msg.into())
    }

    /// Could the same request succeed if the caller retried it later?
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TransientStore(_) => true,
            Self::Db(err) => {
                err.contains_label(TRANSIENT_TRANSACTION_ERROR)
                    || err.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
                    || matches!(
                        *err.kind,
                        DbErrorKind::Io(_)
                            | DbErrorKind::ServerSelection { .. }
                            | DbErrorKind::ConnectionPoolCleared { .. }
                    )
            }
            _ => false,
        }
    }

    /// The HTTP status this error maps to.
    pub fn status(&self) -> Status {
        match self {
            Self::Status(status, _) => *status,
            Self::DuplicateIdentity(_) => Status::Conflict,
            Self::Jwt(err) => match err.kind() {
                JwtErrorKind::ExpiredSignature | JwtErrorKind::ImmatureSignature => {
                    Status::Unauthorized
                }
                _ => Status::BadRequest,
            },
            _ if self.is_transient() => Status::ServiceUnavailable,
            Self::Db(_) | Self::Argon2(_) | Self::Http(_) | Self::TransientStore(_) => {
                Status::InternalServerError
            }
        }
    }
}

/// Error body returned to clients. Server faults never carry internal detail.
#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> rocket::response::Result<'o> {
        let status = self.status();
        let message = match status.class() {
            rocket::http::StatusClass::ServerError => {
                error!("{self}");
                if status == Status::ServiceUnavailable {
                    "Service temporarily unavailable, please retry.".to_string()
                } else {
                    "Internal server error.".to_string()
                }
            }
            _ => {
                warn!("{self}");
                self.to_string()
            }
        };
        Custom(status, Json(ErrorBody { message })).respond_to(req)
    }
}
