use std::borrow::Cow;

use miette::{Diagnostic, SourceOffset, SourceSpan};

use crate::{
    class::ClassError,
    codec::DecodeError,
    eval::error::{FatalError, RuntimeError},
    grammar::error::GrammarError,
    lexer::error::LexError,
    library::LibraryError,
};

#[allow(clippy::useless_conversion)]
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum InnerError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Grammar(#[from] GrammarError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Fatal(#[from] FatalError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Class(#[from] ClassError),
    #[error(transparent)]
    Library(#[from] LibraryError),
}

impl InnerError {
    /// Byte offset into the input the error points at, when it has one.
    #[cold]
    fn offset(&self) -> Option<usize> {
        match self {
            InnerError::Lex(e) => Some(e.offset()),
            InnerError::Decode(DecodeError::Truncated { offset, .. }) => Some(*offset),
            InnerError::Decode(DecodeError::ComplementMismatch(offset))
            | InnerError::Decode(DecodeError::InvalidHeader(offset))
            | InnerError::Decode(DecodeError::InvalidBlock(offset))
            | InnerError::Decode(DecodeError::TooDeep(offset)) => Some(*offset),
            _ => None,
        }
    }
}

#[derive(PartialEq, Debug, thiserror::Error)]
#[error("{cause}")]
pub struct Error {
    pub cause: InnerError,
    pub source_code: String,
    pub location: SourceSpan,
}

impl Error {
    pub fn from_error(source_code: &str, cause: InnerError) -> Self {
        let offset = cause.offset().unwrap_or(0).min(source_code.len());
        Self {
            cause,
            source_code: source_code.to_string(),
            location: SourceSpan::new(SourceOffset::from(offset), 1),
        }
    }

    /// An error without source text, for binary input.
    pub fn detached(cause: InnerError) -> Self {
        Self::from_error("", cause)
    }
}

impl From<InnerError> for Error {
    fn from(cause: InnerError) -> Self {
        Error::detached(cause)
    }
}

macro_rules! detached_from {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Error {
            fn from(cause: $ty) -> Self {
                Error::detached(cause.into())
            }
        })*
    };
}

detached_from!(LexError, GrammarError, RuntimeError, FatalError, DecodeError, ClassError, LibraryError);

impl Diagnostic for Error {
    fn code<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        let code = match &self.cause {
            InnerError::Lex(LexError::InvalidEscape { .. }) => "LexError::InvalidEscape",
            InnerError::Lex(LexError::UnterminatedString(_)) => "LexError::UnterminatedString",
            InnerError::Lex(LexError::UnknownEntity { .. }) => "LexError::UnknownEntity",
            InnerError::Lex(LexError::UnterminatedMarkup(_)) => "LexError::UnterminatedMarkup",
            InnerError::Grammar(GrammarError::InvalidDescription(_)) => "GrammarError::InvalidDescription",
            InnerError::Grammar(GrammarError::UnknownKind(_)) => "GrammarError::UnknownKind",
            InnerError::Grammar(GrammarError::UnknownFlag(_)) => "GrammarError::UnknownFlag",
            InnerError::Grammar(GrammarError::UnknownClass(_)) => "GrammarError::UnknownClass",
            InnerError::Grammar(GrammarError::InvalidLiteral(_)) => "GrammarError::InvalidLiteral",
            InnerError::Grammar(GrammarError::UnknownToken(_)) => "GrammarError::UnknownToken",
            InnerError::Grammar(GrammarError::InvalidParam(_)) => "GrammarError::InvalidParam",
            InnerError::Grammar(GrammarError::InvalidArgument(_)) => "GrammarError::InvalidArgument",
            InnerError::Grammar(GrammarError::RuleNotFound(_)) => "GrammarError::RuleNotFound",
            InnerError::Grammar(GrammarError::MissingStart) => "GrammarError::MissingStart",
            InnerError::Runtime(RuntimeError::NotDefined(_)) => "RuntimeError::NotDefined",
            InnerError::Runtime(RuntimeError::InvalidNumberOfArguments(..)) => {
                "RuntimeError::InvalidNumberOfArguments"
            }
            InnerError::Runtime(RuntimeError::InvalidTypes { .. }) => "RuntimeError::InvalidTypes",
            InnerError::Runtime(RuntimeError::ZeroDivision) => "RuntimeError::ZeroDivision",
            InnerError::Runtime(RuntimeError::Overflow(_)) => "RuntimeError::Overflow",
            InnerError::Runtime(RuntimeError::Library(_)) => "RuntimeError::Library",
            InnerError::Runtime(RuntimeError::Grammar(_)) => "RuntimeError::Grammar",
            InnerError::Runtime(RuntimeError::Class(_)) => "RuntimeError::Class",
            InnerError::Runtime(RuntimeError::User(_)) => "RuntimeError::User",
            InnerError::Runtime(RuntimeError::Code { .. }) => "RuntimeError::Code",
            InnerError::Runtime(RuntimeError::Stopped) => "RuntimeError::Stopped",
            InnerError::Runtime(RuntimeError::RecursionLimit(_)) => "RuntimeError::RecursionLimit",
            InnerError::Runtime(RuntimeError::Raised(_)) => "RuntimeError::Raised",
            InnerError::Runtime(RuntimeError::Fatal(_)) => "RuntimeError::Fatal",
            InnerError::Fatal(FatalError::DanglingPointer(_)) => "FatalError::DanglingPointer",
            InnerError::Fatal(FatalError::PointerCycle(_)) => "FatalError::PointerCycle",
            InnerError::Fatal(FatalError::DepthExceeded(_)) => "FatalError::DepthExceeded",
            InnerError::Decode(DecodeError::Truncated { .. }) => "DecodeError::Truncated",
            InnerError::Decode(DecodeError::UnsupportedVersion(_)) => "DecodeError::UnsupportedVersion",
            InnerError::Decode(DecodeError::ComplementMismatch(_)) => "DecodeError::ComplementMismatch",
            InnerError::Decode(DecodeError::InvalidHeader(_)) => "DecodeError::InvalidHeader",
            InnerError::Decode(DecodeError::InvalidBlock(_)) => "DecodeError::InvalidBlock",
            InnerError::Decode(DecodeError::TooDeep(_)) => "DecodeError::TooDeep",
            InnerError::Decode(DecodeError::CountMismatch { .. }) => "DecodeError::CountMismatch",
            InnerError::Decode(DecodeError::MissingExpander) => "DecodeError::MissingExpander",
            InnerError::Decode(DecodeError::Expand(_)) => "DecodeError::Expand",
            InnerError::Class(ClassError::NotFound(_)) => "ClassError::NotFound",
            InnerError::Class(ClassError::Io { .. }) => "ClassError::Io",
            InnerError::Class(ClassError::Eval { .. }) => "ClassError::Eval",
            InnerError::Class(ClassError::Recursive(_)) => "ClassError::Recursive",
            InnerError::Library(LibraryError::NotFound(_)) => "LibraryError::NotFound",
            InnerError::Library(LibraryError::Recursive(_)) => "LibraryError::Recursive",
        };

        Some(Box::new(code))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        let msg: Cow<'_, str> = match &self.cause {
            InnerError::Grammar(GrammarError::MissingStart) => {
                "Define a `$start` rule, or a `custom_start` rule variable".into()
            }
            InnerError::Grammar(GrammarError::InvalidDescription(_)) => {
                "Grammar descriptions are TOML with `[classes]`, `[[tokens]]` and `[[rules]]` tables".into()
            }
            InnerError::Decode(DecodeError::MissingExpander) => {
                "GRZ input needs an expander; install one with `Engine::set_expander`".into()
            }
            InnerError::Decode(DecodeError::UnsupportedVersion(version)) => {
                format!("Re-compile the input; version {version} is not readable").into()
            }
            InnerError::Class(ClassError::NotFound(name)) => {
                format!("Place `{name}.grz` or `{name}.grc` in one of the class search paths").into()
            }
            InnerError::Fatal(FatalError::DepthExceeded(_)) => {
                "Check for runaway recursion or raise `max_depth`".into()
            }
            _ => return None,
        };

        Some(Box::new(msg))
    }

    fn source_code(&self) -> Option<&dyn miette::SourceCode> {
        if self.source_code.is_empty() {
            None
        } else {
            Some(&self.source_code)
        }
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = miette::LabeledSpan> + '_>> {
        if self.source_code.is_empty() {
            return None;
        }
        Some(Box::new(std::iter::once(miette::LabeledSpan::at(
            self.location,
            self.cause.to_string(),
        ))))
    }
}
