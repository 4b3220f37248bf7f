use std::path::PathBuf;

/// Problems with a request that are reported to the caller before anything is allocated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("working directory '{}' does not exist or is not a directory", .0.display())]
    WorkingDirectory(PathBuf),

    #[error("'{value}' is not a valid {what}")]
    Number { what: &'static str, value: String },

    #[error("no command specified")]
    EmptyCommand,

    #[error("usage: {0}")]
    Usage(&'static str),
}

/// Errors surfaced by the execution engine.
///
/// Everything except [`EngineError::Validation`] is recovered at the pipeline boundary and
/// turned into a single notification line; none of them stop the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to launch process: {0}")]
    LaunchFailure(#[source] std::io::Error),

    #[error("error reading process output: {0}")]
    Stream(#[source] std::io::Error),

    #[error("process {0} has not started yet")]
    NotReady(u32),

    #[error("process {0} does not accept input")]
    NotInteractable(u32),

    #[error("process {0} not found")]
    NotFound(u32),

    #[error("process {id} timed out after {seconds}s")]
    Timeout { id: u32, seconds: u64 },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_messages_name_the_offending_value() {
        let err = EngineError::from(ValidationError::WorkingDirectory(PathBuf::from("/nope")));
        assert!(err.to_string().contains("/nope"));

        let err = ValidationError::Number {
            what: "timeout",
            value: "abc".to_string(),
        };
        assert_eq!(err.to_string(), "'abc' is not a valid timeout");
    }
}
