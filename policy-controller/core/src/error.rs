use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error("failed to build {kind} {name}: {reason}")]
    Build {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("resource kind {0} is not served by the cluster")]
    UnknownKind(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

// === impl Error ===

impl Error {
    pub fn build(kind: &'static str, name: impl ToString, reason: impl ToString) -> Self {
        Self::Build {
            kind,
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(rsp)) if rsp.code == 404)
    }

    /// Optimistic-concurrency failures surface as 409 Conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(rsp)) if rsp.code == 409)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::api_error;

    #[test]
    fn classifies_api_errors() {
        assert!(api_error(404, "NotFound").is_not_found());
        assert!(!api_error(404, "NotFound").is_conflict());
        assert!(api_error(409, "Conflict").is_conflict());
        assert!(!Error::UnknownKind("Widget".to_string()).is_not_found());
    }

    #[test]
    fn build_errors_name_the_object() {
        let error = Error::build("ValidatingAdmissionPolicy", "p1", "no CEL expressions");
        assert_eq!(
            error.to_string(),
            "failed to build ValidatingAdmissionPolicy p1: no CEL expressions"
        );
    }
}
