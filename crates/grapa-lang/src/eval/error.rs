use smol_str::SmolStr;
use thiserror::Error;

use crate::{Node, class::ClassError, grammar::error::GrammarError, library::LibraryError};

type FunctionName = SmolStr;

/// Conditions that abort the current evaluation instead of producing a value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FatalError {
    #[error("Dangling pointer to slot {0}")]
    DanglingPointer(usize),
    #[error("Pointer chain through slot {0} forms a cycle")]
    PointerCycle(usize),
    #[error("Maximum evaluation depth {0} exceeded")]
    DepthExceeded(usize),
}

/// Failure raised by a library function. Reported to scripts as an `ERR` value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("\"{0}\" is not defined")]
    NotDefined(FunctionName),
    #[error("Invalid number of arguments in \"{0}\", expected {1}, got {2}")]
    InvalidNumberOfArguments(FunctionName, u8, usize),
    #[error(r#"Invalid types for "{}", got {}"#, name, args.join(", "))]
    InvalidTypes { name: FunctionName, args: Vec<SmolStr> },
    #[error("Divided by 0")]
    ZeroDivision,
    #[error("Arithmetic overflow in \"{0}\"")]
    Overflow(FunctionName),
    #[error(transparent)]
    Library(#[from] LibraryError),
    #[error(transparent)]
    Grammar(#[from] GrammarError),
    #[error(transparent)]
    Class(#[from] ClassError),
    #[error("{0}")]
    User(String),
    #[error("Error {code}: {message}")]
    Code { code: i64, message: String },
    #[error("Evaluation stopped")]
    Stopped,
    #[error("Maximum recursion depth {0} exceeded")]
    RecursionLimit(usize),
    /// An `ERR` value produced while evaluating an argument.
    #[error("{0}")]
    Raised(Node),
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

impl RuntimeError {
    pub fn invalid_types(name: &str, args: &[Node]) -> Self {
        RuntimeError::InvalidTypes {
            name: SmolStr::new(name),
            args: args.iter().map(|arg| SmolStr::new(arg.kind.to_string())).collect(),
        }
    }

    /// Machine-readable code carried by the `ERR` value.
    #[cold]
    pub fn code(&self) -> i64 {
        match self {
            RuntimeError::NotDefined(_) => 1,
            RuntimeError::InvalidNumberOfArguments(..) => 2,
            RuntimeError::InvalidTypes { .. } => 3,
            RuntimeError::ZeroDivision => 4,
            RuntimeError::Overflow(_) => 5,
            RuntimeError::Library(_) => 6,
            RuntimeError::Grammar(_) => 7,
            RuntimeError::Class(_) => 8,
            RuntimeError::User(_) => -1,
            RuntimeError::Code { code, .. } => *code,
            RuntimeError::Stopped => 9,
            RuntimeError::RecursionLimit(_) => 10,
            RuntimeError::Raised(node) => node
                .child("code")
                .and_then(Node::as_number)
                .and_then(|n| match n {
                    crate::number::Number::Int(i) => Some(i),
                    crate::number::Number::Float(_) => None,
                })
                .unwrap_or(-1),
            RuntimeError::Fatal(_) => 11,
        }
    }

    pub fn to_node(&self) -> Node {
        match self {
            RuntimeError::Raised(node) => node.clone(),
            RuntimeError::Code { code, message } => Node::error(*code, message),
            _ => Node::error(self.code(), &self.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::Kind;
    use rstest::rstest;

    #[rstest]
    #[case::not_defined(RuntimeError::NotDefined(SmolStr::new("f")), 1, "\"f\" is not defined")]
    #[case::zero_division(RuntimeError::ZeroDivision, 4, "Divided by 0")]
    #[case::user(RuntimeError::User("boom".to_string()), -1, "boom")]
    #[case::code(RuntimeError::Code { code: 42, message: "custom".to_string() }, 42, "custom")]
    fn test_to_node(#[case] error: RuntimeError, #[case] code: i64, #[case] message: &str) {
        let node = error.to_node();

        assert_eq!(node.kind, Kind::Err);
        assert_eq!(node.child("code"), Some(&Node::int(code).with_name("code")));
        assert_eq!(node.child("message").map(|m| m.text().into_owned()), Some(message.to_string()));
    }

    #[test]
    fn test_raised_keeps_value() {
        let raised = Node::error(7, "inner");
        let error = RuntimeError::Raised(raised.clone());

        assert_eq!(error.code(), 7);
        assert_eq!(error.to_node(), raised);
    }

    #[test]
    fn test_invalid_types_lists_kinds() {
        let error = RuntimeError::invalid_types("add", &[Node::int(1), Node::str("a")]);
        assert_eq!(error.to_string(), r#"Invalid types for "add", got INT, STR"#);
    }
}
