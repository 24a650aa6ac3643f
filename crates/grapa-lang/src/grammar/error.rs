use smol_str::SmolStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GrammarError {
    #[error("Invalid grammar description: {0}")]
    InvalidDescription(String),
    #[error("Unknown token kind \"{0}\"")]
    UnknownKind(String),
    #[error("Unknown token flag \"{0}\"")]
    UnknownFlag(String),
    #[error("Unknown character class \"{0}\"")]
    UnknownClass(String),
    #[error("Literal \"{0}\" does not lex to a single token")]
    InvalidLiteral(String),
    #[error("Token \"{0}\" is not registered")]
    UnknownToken(String),
    #[error("Invalid rule parameter \"{0}\"")]
    InvalidParam(String),
    #[error("Invalid argument template in rule \"{0}\"")]
    InvalidArgument(SmolStr),
    #[error("Rule \"{0}\" not found")]
    RuleNotFound(SmolStr),
    #[error("No start rule defined")]
    MissingStart,
}
