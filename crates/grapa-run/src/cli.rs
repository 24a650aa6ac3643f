use clap::{Parser, Subcommand};
use colored::Colorize;
use grapa_lang::{AsyncSession, Engine, Node, SessionEvent};
use miette::{IntoDiagnostic, miette};
use std::io::{self, IsTerminal, Read, Write};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[derive(Parser, Debug, Default)]
#[command(name = "grapa")]
#[command(author = env!("CARGO_PKG_AUTHORS"))]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(after_help = "# Examples:\n\n\
    ## To run a script:\n\
    grapa script.grc\n\n\
    ## To evaluate code:\n\
    grapa -c 'x = 20; x * 2 + 2'\n\n\
    ## To start a REPL session:\n\
    grapa repl\n\n\
    ## To compile a script:\n\
    grapa compile script.grc -o script.grz")]
#[command(
    about = "grapa runs scripts whose syntax is defined by a grammar that can change while they run.",
    long_about = None
)]
pub struct Cli {
    #[clap(subcommand)]
    commands: Option<Commands>,

    /// Evaluate the given code instead of a file
    #[arg(short = 'c', long = "code", value_name = "CODE")]
    code: Option<String>,

    /// Load a grammar description (TOML) before running
    #[arg(short = 'g', long, value_name = "FILE")]
    grammar: Option<PathBuf>,

    /// Run through a session that lexes and executes on separate threads
    #[arg(long = "async", default_value_t = false)]
    asynchronous: bool,

    /// Disable constant folding while planning
    #[arg(long, default_value_t = false)]
    no_optimize: bool,

    /// Additional directories to search for classes
    #[arg(short = 'L', long = "path", value_name = "DIR")]
    paths: Vec<PathBuf>,

    /// Log statement execution to stderr
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// Script, serialized or compressed input; read from stdin when omitted
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start a REPL session
    Repl,
    /// Compile a script to the binary operation format
    Compile {
        /// Script to compile
        file: PathBuf,
        /// Output to the specified file
        #[arg(short = 'o', long = "output", value_name = "FILE")]
        output: PathBuf,
    },
    /// Print the token stream of a script
    Tokens {
        /// Script to tokenize
        file: PathBuf,
    },
}

impl Cli {
    pub fn run(&self) -> miette::Result<()> {
        self.init_tracing();
        let config = Config::load();

        match &self.commands {
            Some(Commands::Repl) => grapa_repl::Repl::new(self.create_engine(&config)?).run(),
            Some(Commands::Compile { file, output }) => {
                let code = read_script(file)?;
                let bytes = self.create_engine(&config)?.compile_to_bytes(&code)?;
                fs::write(output, bytes).into_diagnostic()
            }
            Some(Commands::Tokens { file }) => {
                let code = read_script(file)?;
                let engine = self.create_engine(&config)?;
                let mut stdout = io::stdout().lock();

                for token in engine.tokenize(&code) {
                    writeln!(
                        stdout,
                        "{:<8}{:<16}{}",
                        token.kind,
                        token.name,
                        token.to_string().escape_debug()
                    )
                    .into_diagnostic()?;
                }
                Ok(())
            }
            None => {
                let input = self.read_input()?;
                let engine = self.create_engine(&config)?;
                let result = if self.asynchronous {
                    run_async(engine, &input)?
                } else {
                    let mut engine = engine;
                    engine.eval_bytes(&input)?
                };
                print(&result)
            }
        }
    }

    fn init_tracing(&self) {
        let default = if self.verbose { "grapa=debug" } else { "grapa=warn" };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

        // a subscriber may already be installed when embedded
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .try_init()
            .ok();
    }

    fn create_engine(&self, config: &Config) -> miette::Result<Engine> {
        let mut options = config.options();

        if self.no_optimize {
            options.optimize = false;
        }
        options.search_paths.extend(self.paths.iter().cloned());
        if let Some(dir) = self
            .file
            .as_ref()
            .and_then(|f| f.parent())
            .filter(|dir| !dir.as_os_str().is_empty())
        {
            options.search_paths.push(dir.to_path_buf());
        }

        let mut engine = Engine::with_options(options);

        if let Some(grammar) = self.grammar.as_ref().or(config.grammar.as_ref()) {
            if !grammar.exists() {
                return Err(miette!("File not found: {}", grammar.display()));
            }
            debug!(path = %grammar.display(), "loading grammar");
            let text = fs::read_to_string(grammar).into_diagnostic()?;
            engine.load_grammar(&text).map_err(grapa_lang::Error::from)?;
        }

        Ok(engine)
    }

    fn read_input(&self) -> miette::Result<Vec<u8>> {
        match (&self.code, &self.file) {
            (Some(code), _) => Ok(code.as_bytes().to_vec()),
            (None, Some(file)) => {
                if !file.exists() {
                    return Err(miette!("File not found: {}", file.display()));
                }
                fs::read(file).into_diagnostic()
            }
            (None, None) if io::stdin().is_terminal() => Err(miette!("No input: pass a FILE, -c CODE or pipe a script")),
            (None, None) => {
                let mut input = Vec::new();
                io::stdin().read_to_end(&mut input).into_diagnostic()?;
                Ok(input)
            }
        }
    }
}

fn read_script(file: &Path) -> miette::Result<String> {
    if !file.exists() {
        return Err(miette!("File not found: {}", file.display()));
    }
    fs::read_to_string(file).into_diagnostic()
}

/// Feeds the whole input through an [`AsyncSession`] and returns the last value.
fn run_async(engine: Engine, input: &[u8]) -> miette::Result<Node> {
    let session = AsyncSession::spawn(engine);
    let events = session.events().clone();

    session.send_input(grapa_lang::Input::Text(input.to_vec()));
    session.finish();
    if session.join().is_none() {
        return Err(miette!("Session worker failed"));
    }

    let mut last = Node::null();
    for event in events.try_iter() {
        match event {
            SessionEvent::Result(value) => last = value,
            SessionEvent::Failed(message) => return Err(miette!(message)),
            SessionEvent::Prompt | SessionEvent::Exited => {}
        }
    }
    Ok(last)
}

fn print(value: &Node) -> miette::Result<()> {
    if value.is_error() {
        return Err(miette!("{}", value.to_string().red()));
    }
    if !value.is_null() {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", value).into_diagnostic()?;
    }
    Ok(())
}
