use thiserror::Error;

/// Errors that abort the whole run. Problems with a single lesson are
/// reported as [`crate::download::SkipReason`] instead.
#[derive(Debug, PartialEq, Error)]
pub enum CdlError {
    #[error("Invalid url received : {0}")]
    InvalidUrl(String),
    #[error("invalid cookie, expected NAME=VALUE : {0}")]
    InvalidCookie(String),
    #[error("error creating http client. {0}")]
    ClientBuild(String),
    #[error("error connecting to internet. {url} => {message}")]
    NetworkError { url: String, message: String },
    #[error("not able to find the sitemap. {url} => {status_code}")]
    SitemapUnreachable { status_code: String, url: String },
    #[error("error parsing sitemap. {0}")]
    InvalidSitemap(String),
    #[error("error creating destination directory {path}. {message}")]
    ErrorCreatingDestinationDirectory { path: String, message: String },
    /// parameters are file path, additional error message
    #[error("{message} : {file_name}")]
    FileOperationError { file_name: String, message: String },
}

impl CdlError {
    pub(crate) fn file_operation(file_name: &std::path::Path, e: std::io::Error) -> Self {
        CdlError::FileOperationError {
            file_name: file_name.to_string_lossy().to_string(),
            message: format!("{} | {}", e, e.kind()),
        }
    }
}
