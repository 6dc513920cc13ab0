/// Coarse error type used at the application boundary (UI, transport glue).
#[derive(Debug, thiserror::Error)]
pub enum ApataError {
    #[error("not found")]
    NotFound,

    #[error("wrong password")]
    WrongPassword,

    /// Ciphertext failed authentication: tampering or a stale key.
    #[error("message authentication failed")]
    AuthenticationFailed,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    /// An identity-binding signature failed to verify. Must be surfaced to the
    /// user distinctly and never retried automatically.
    #[error("security violation: {0}")]
    SecurityViolation(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = ApataError::NotFound;
        assert_eq!(err.to_string(), "not found");
    }

    #[test]
    fn validation_contains_message() {
        let err = ApataError::Validation("bad input".into());
        assert_eq!(err.to_string(), "validation error: bad input");
    }

    #[test]
    fn security_violation_display() {
        let err = ApataError::SecurityViolation("possible MITM".into());
        assert_eq!(err.to_string(), "security violation: possible MITM");
    }

    #[test]
    fn all_variants_impl_error() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(ApataError::NotFound),
            Box::new(ApataError::WrongPassword),
            Box::new(ApataError::AuthenticationFailed),
            Box::new(ApataError::Validation("x".into())),
            Box::new(ApataError::Internal("y".into())),
            Box::new(ApataError::Crypto("z".into())),
            Box::new(ApataError::SecurityViolation("s".into())),
            Box::new(ApataError::ServiceUnavailable("keychain locked".into())),
        ];
        for e in &errors {
            let _ = e.to_string();
        }
    }
}
