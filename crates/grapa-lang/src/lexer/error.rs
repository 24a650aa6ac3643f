use thiserror::Error;

/// Recoverable lexer diagnostics. The lexer never stops on these; it drops the
/// offending bytes, records the problem and carries on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LexError {
    #[error("Invalid escape sequence `\\{escape}` at offset {offset}")]
    InvalidEscape { escape: char, offset: usize },
    #[error("Unterminated string starting at offset {0}")]
    UnterminatedString(usize),
    #[error("Unknown entity `&{entity};` at offset {offset}")]
    UnknownEntity { entity: String, offset: usize },
    #[error("Unterminated markup section starting at offset {0}")]
    UnterminatedMarkup(usize),
}

impl LexError {
    #[cold]
    pub fn offset(&self) -> usize {
        match self {
            LexError::InvalidEscape { offset, .. } => *offset,
            LexError::UnterminatedString(offset) => *offset,
            LexError::UnknownEntity { offset, .. } => *offset,
            LexError::UnterminatedMarkup(offset) => *offset,
        }
    }
}
