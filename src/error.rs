//! Error types for the kiyomi daemon.

/// Top-level error type for the assistant daemon.
#[derive(Debug, thiserror::Error)]
pub enum KiyomiError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Durable document load/save error.
    #[error("store error: {0}")]
    Store(String),

    /// AI executor setup error (spawn failures are reported as results, not errors).
    #[error("executor error: {0}")]
    Executor(String),

    /// Supervisor / task registry error.
    #[error("supervisor error: {0}")]
    Supervisor(String),

    /// Plugin registration or dispatch error.
    #[error("plugin error: {0}")]
    Plugin(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, KiyomiError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(err: &KiyomiError) -> &'static str {
        match err {
            KiyomiError::Config(_) => "config",
            KiyomiError::Io(_) => "io",
            KiyomiError::Store(_) => "store",
            KiyomiError::Executor(_) => "executor",
            KiyomiError::Supervisor(_) => "supervisor",
            KiyomiError::Plugin(_) => "plugin",
        }
    }

    #[test]
    fn display_prefix_names_the_kind() {
        let errors = [
            KiyomiError::Config("x".to_owned()),
            KiyomiError::Store("x".to_owned()),
            KiyomiError::Executor("x".to_owned()),
            KiyomiError::Supervisor("x".to_owned()),
            KiyomiError::Plugin("x".to_owned()),
        ];
        for err in &errors {
            assert!(err.to_string().starts_with(kind(err)), "{err}");
        }
    }

    #[test]
    fn io_errors_convert_and_keep_their_message() {
        let err: KiyomiError = std::io::Error::other("disk full").into();
        assert!(matches!(err, KiyomiError::Io(_)));
        assert_eq!(err.to_string(), "I/O error: disk full");
        assert_eq!(
            KiyomiError::Store("bad json".to_owned()).to_string(),
            "store error: bad json"
        );
    }
}
