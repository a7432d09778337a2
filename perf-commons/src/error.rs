use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Config(String),

    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error("kubeconfig error: {0}")]
    KubeConfig(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Backend answered but not with what we expected.
    #[error("{0}")]
    Backend(String),

    #[error(transparent)]
    Json(#[from] k8s_openapi::serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("missing field {field} in {object}")]
    MissingField { object: String, field: String },

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("aws signing error: {0}")]
    Aws(String),

    #[error("ssh key error: {0}")]
    Ssh(String),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            context: path.into().display().to_string(),
            source,
        }
    }

    pub fn missing(object: impl Into<String>, field: impl Into<String>) -> Self {
        Error::MissingField {
            object: object.into(),
            field: field.into(),
        }
    }

    /// True for API-server 404s, which callers treat as absence.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(resp)) if resp.code == 404)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> Error {
        Error::Kube(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "NotFound".to_string(),
            code,
        }))
    }

    #[test]
    fn test_is_not_found() {
        assert!(api_error(404).is_not_found());
        assert!(!api_error(500).is_not_found());
        assert!(!Error::Config("x".into()).is_not_found());
    }
}
