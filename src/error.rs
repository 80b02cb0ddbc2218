use thiserror::Error;

/// Errors surfaced while splitting, tagging or generating a model.
///
/// Compilation is all-or-nothing: none of these leave a partial program behind.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("Name '{name}' is declared more than once")]
    NameCollision { name: String },
    #[error("Malformed setter '{name}': {reason}")]
    MalformedSetter { name: String, reason: String },
    #[error("Getter '{getter}' references unknown getter '{name}' through topLevel")]
    UnknownGetter { getter: String, name: String },
    #[error("Unknown token '{token}' in '{name}'")]
    UnknownToken { name: String, token: String },
    #[error("'{kind}' in getter '{getter}' expects {expected} arguments, got {found}")]
    Arity {
        getter: String,
        kind: String,
        expected: String,
        found: usize,
    },
    #[error("Getter '{getter}' reads '{token}' as a whole; only keyed reads below it can be tracked")]
    UntrackableReference { getter: String, token: String },
    #[error("'{token}' is not allowed here in getter '{getter}': {reason}")]
    MisplacedToken {
        getter: String,
        token: String,
        reason: String,
    },
    #[error("Condition {condition} in getter '{getter}' has no guarded lookup")]
    UnresolvedCondition { getter: String, condition: u32 },
    #[error("Invalid declaration: {message}")]
    InvalidDeclaration { message: String },
}

pub type CompileResult<T> = Result<T, CompileError>;
