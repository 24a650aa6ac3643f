//! Interactive shell for [`grapa_lang`].
//!
//! Lines are handed to an [`grapa_lang::AsyncSession`], so statements run on
//! the session's executor thread while the editor stays responsive. An entry
//! that leaves a `$[` block open continues on the next line.
//!
//! ## Example
//!
//! ```rust,no_run
//! let repl = grapa_repl::Repl::new(grapa_lang::Engine::default());
//! repl.run().unwrap();
//! ```
mod command_context;
mod repl;

pub use command_context::{CommandContext, CommandOutput, Entry};
pub use repl::Repl;
