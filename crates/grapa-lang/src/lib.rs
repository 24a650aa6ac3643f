//! `grapa-lang` is a grammar-driven scripting runtime.
//!
//! Source text is split into tokens by a table-driven lexer, statements are
//! matched against a rule table that scripts can change while they run, and
//! the matches are planned into operation trees that an interpreter reduces
//! to values.
//!
//! ## Examples
//!
//! ```rs
//! use grapa_lang::Engine;
//!
//! let mut engine = Engine::default();
//! assert_eq!(engine.eval("x = 20; x * 2 + 2").unwrap().to_string(), "42");
//!
//! // Functions are values
//! engine.eval("twice = op(v) { v * 2 }").unwrap();
//! assert_eq!(engine.eval("twice(21)").unwrap().to_string(), "42");
//!
//! // Feed input in chunks
//! let mut session = grapa_lang::Session::default();
//! session.feed(b"a = 1").unwrap();
//! session.feed(b"0; a").unwrap();
//! assert_eq!(session.finish().unwrap()[0].to_string(), "10");
//! ```
mod arena;
mod bootstrap;
mod engine;
mod error;
mod eval;
mod plan;
mod session;

pub mod class;
pub mod codec;
pub mod grammar;
pub mod kind;
pub mod lexer;
pub mod library;
pub mod matcher;
pub mod number;
pub mod segment;
pub mod value;

pub use arena::{Arena, ArenaId};
pub use bootstrap::BASE_GRAMMAR;
pub use codec::{DecodeError, Expander, InputKind, from_bytes, to_bytes};
pub use engine::{CUSTOM_START_RULE, Engine, Options, SYNTAX_ERROR_CODE};
pub use error::{Error, InnerError};
pub use eval::env::Env;
pub use eval::error::{FatalError, RuntimeError};
pub use grammar::{Grammar, START_RULE, error::GrammarError};
pub use kind::Kind;
pub use lexer::token::{Token, TokenFlag, TokenFlags};
pub use library::{Library, LibraryLoader, register_library, register_loader, unregister_library};
pub use number::Number;
pub use plan::Planner;
pub use session::{AsyncSession, Input, Session, SessionEvent};
pub use value::Node;

pub type GrapaResult = Result<Node, Error>;
