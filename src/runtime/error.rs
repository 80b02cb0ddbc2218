use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Unknown setter '{name}'")]
    UnknownSetter { name: String },
    #[error("Unknown getter '{name}'")]
    UnknownGetter { name: String },
    #[error("Setter '{setter}' expected {expected} arguments, got {found}")]
    ArgumentCount {
        setter: String,
        expected: usize,
        found: usize,
    },
    #[error("Setter '{setter}' is a {kind} setter")]
    WrongSetterKind { setter: String, kind: String },
    #[error("Setter '{setter}' cannot reach {path}: no container there")]
    MissingContainer { setter: String, path: String },
    #[error("Setter '{setter}' expected an array at {path}, got {got}")]
    NotAnArray {
        setter: String,
        path: String,
        got: String,
    },
    #[error("'{key}' is not a valid key for {container}")]
    InvalidKey { key: String, container: String },
    #[error("Model did not settle after {passes} recalculation passes")]
    Unstable { passes: usize },
    #[error("'{verb}' cannot iterate over {got}")]
    NotIterable { verb: String, got: String },
    #[error("Recursive callback reached key {key} while computing it")]
    RecursiveCycle { key: String },
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
