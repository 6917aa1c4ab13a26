use kube::Error as KubeError;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] KubeError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("ingress path {path} of {second} collides with {first}")]
    PathCollision {
        path: String,
        first: String,
        second: String,
    },

    #[error("no generator for {recipe} in {adaptor}")]
    UnknownGenerator { recipe: String, adaptor: String },

    #[error("unknown reference kind {0}")]
    UnknownReferenceKind(String),

    #[error("{field} cannot reference {kind}")]
    UnexpectedReferenceKind { field: &'static str, kind: String },

    #[error("cluster-scoped {referrer} cannot reference namespaced {kind} {name}")]
    ScopeViolation {
        referrer: String,
        kind: String,
        name: String,
    },

    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    #[error("secret {name} has no key {key}")]
    MissingSecretKey { name: String, key: String },

    #[error("job {job} failed: {message}")]
    JobFailed { job: String, message: String },

    #[error("container {container} of job {job} reported an invalid result: {reason}")]
    InvalidJobResult {
        job: String,
        container: String,
        reason: String,
    },

    #[error("object is missing {0}")]
    MissingObjectKey(&'static str),
}

impl Error {
    /// Terminal errors need a spec change; waiting will not fix them.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Error::Kube(_) | Error::Serialization(_) | Error::Yaml(_)
        )
    }

    /// Condition reason published for this error.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Kube(_) => "ApiError",
            Error::Serialization(_) | Error::Yaml(_) => "SerializationError",
            Error::PathCollision { .. } => "PathCollision",
            Error::UnknownGenerator { .. } => "UnknownGenerator",
            Error::UnknownReferenceKind(_) | Error::UnexpectedReferenceKind { .. } => {
                "InvalidReference"
            }
            Error::ScopeViolation { .. } => "ScopeViolation",
            Error::InvalidSpec(_) => "InvalidSpec",
            Error::MissingSecretKey { .. } => "MissingSecretKey",
            Error::JobFailed { .. } => "JobFailed",
            Error::InvalidJobResult { .. } => "InvalidJobResult",
            Error::MissingObjectKey(_) => "InvalidObject",
        }
    }
}

fn api_code(err: &KubeError) -> Option<u16> {
    match err {
        KubeError::Api(response) => Some(response.code),
        _ => None,
    }
}

pub fn is_not_found(err: &KubeError) -> bool {
    api_code(err) == Some(404)
}

pub fn is_conflict(err: &KubeError) -> bool {
    api_code(err) == Some(409)
}

/// The API server rejects updates to immutable fields with a 422 whose
/// message names the field as immutable.
pub fn is_immutable_field(err: &Error) -> bool {
    match err {
        Error::Kube(KubeError::Api(response)) => {
            response.code == 422 && response.message.contains("field is immutable")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use kube::core::ErrorResponse;

    use super::*;

    fn api(code: u16, message: &str) -> KubeError {
        KubeError::Api(ErrorResponse {
            status: "Failure".into(),
            message: message.into(),
            reason: "Invalid".into(),
            code,
        })
    }

    #[test]
    fn classifies_api_errors_by_code() {
        assert!(is_not_found(&api(404, "not found")));
        assert!(is_conflict(&api(409, "conflict")));
        assert!(!is_conflict(&api(404, "not found")));
    }

    #[test]
    fn immutable_field_needs_both_code_and_message() {
        let immutable = Error::Kube(api(
            422,
            "ConfigMap \"f-build\" is invalid: data: Forbidden: field is immutable when `immutable` is set",
        ));
        assert!(is_immutable_field(&immutable));
        assert!(!is_immutable_field(&Error::Kube(api(422, "spec.replicas: Invalid value"))));
        assert!(!is_immutable_field(&Error::InvalidSpec("field is immutable".into())));
    }

    #[test]
    fn api_errors_are_retryable_and_domain_errors_are_not() {
        assert!(!Error::Kube(api(500, "boom")).is_terminal());
        let collision = Error::PathCollision {
            path: "/a".into(),
            first: "App/a".into(),
            second: "App/b".into(),
        };
        assert!(collision.is_terminal());
        assert_eq!(collision.reason(), "PathCollision");
    }
}
