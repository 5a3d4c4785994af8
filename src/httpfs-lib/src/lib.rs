mod config;
mod directory;
mod file;
mod fs;
mod listing;
mod node;
mod origin;

pub use config::*;
pub use directory::*;
pub use file::*;
pub use fs::*;
pub use listing::*;
pub use node::*;
pub use origin::*;

use reqwest::StatusCode;
use thiserror::Error;

#[macro_use]
extern crate log;

#[derive(Error, Debug)]
pub enum HttpFsError {
    #[error("internal error: {0}")]
    Internal(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("is a directory: {0}")]
    IsDirectory(String),
    #[error("interrupted: {0}")]
    Interrupted(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("unsupported directory response: {0}")]
    UnsupportedListing(String),
    #[error("invalid param: {0}")]
    InvalidParam(String),
}

impl HttpFsError {
    /// Maps a non-success status of a listing or metadata request.
    pub fn from_http_status(code: StatusCode, info: String) -> Self {
        match code {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                HttpFsError::PermissionDenied(format!("HTTP {} for {}", code, info))
            }
            _ => HttpFsError::NotFound(format!("HTTP {} for {}", code, info)),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, HttpFsError::NotFound(_))
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, HttpFsError::PermissionDenied(_))
    }
}

pub type HttpFsResult<T> = std::result::Result<T, HttpFsError>;

impl From<std::io::Error> for HttpFsError {
    fn from(err: std::io::Error) -> Self {
        HttpFsError::IoError(err.to_string())
    }
}
