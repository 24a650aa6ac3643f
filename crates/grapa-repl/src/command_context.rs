use std::{fmt, fs};

use grapa_lang::{
    AsyncSession, Engine, Node, SessionEvent,
    lexer::{Lexicon, tokenize},
    segment::Segmenter,
};
use itertools::Itertools;
use miette::{IntoDiagnostic, miette};
use strum::IntoEnumIterator;

#[derive(Debug, Clone)]
pub enum CommandOutput {
    Value(Vec<Node>),
    String(Vec<String>),
    Exit,
    None,
}

#[derive(Debug, Clone, strum::EnumIter)]
pub enum Command {
    Clear,
    Help,
    Load(String),
    Quit,
    Rules,
    Tokens(String),
    Vars,
    Version,
    Eval(String),
    NotFound(String),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Clear => write!(f, ":clear"),
            Command::Help => write!(f, ":help"),
            Command::Load(_) => write!(f, ":load"),
            Command::Quit => write!(f, ":quit"),
            Command::Rules => write!(f, ":rules"),
            Command::Tokens(_) => write!(f, ":tokens"),
            Command::Vars => write!(f, ":vars"),
            Command::Version => write!(f, ":version"),
            Command::Eval(_) => write!(f, ":eval"),
            Command::NotFound(_) => write!(f, ":not_found"),
        }
    }
}

impl Command {
    pub fn help(&self) -> String {
        let text = match self {
            Command::Clear => "Drop variables and any unfinished input",
            Command::Help => "Print command help",
            Command::Load(_) => "Run a script file",
            Command::Quit => "Quit the session",
            Command::Rules => "List grammar rules",
            Command::Tokens(_) => "Show the tokens of the given text",
            Command::Vars => "List bound variables",
            Command::Version => "Print grapa version",
            Command::Eval(_) | Command::NotFound(_) => "",
        };
        format!("{:<12}{}", self.to_string(), text)
    }

    fn is_hidden(&self) -> bool {
        matches!(self, Command::Eval(_) | Command::NotFound(_))
    }
}

impl From<String> for Command {
    fn from(s: String) -> Self {
        let trimmed = s.trim();

        match trimmed.split_whitespace().collect::<Vec<&str>>().as_slice() {
            [":clear"] => Command::Clear,
            [":help"] => Command::Help,
            [":load", file_path] => Command::Load(file_path.to_string()),
            [":quit"] => Command::Quit,
            [":rules"] => Command::Rules,
            [":tokens", ..] => Command::Tokens(
                trimmed
                    .strip_prefix(":tokens")
                    .unwrap_or_default()
                    .trim_start()
                    .to_string(),
            ),
            [":vars"] => Command::Vars,
            [":version"] => Command::Version,
            _ if trimmed.starts_with(':') => Command::NotFound(s),
            _ => Command::Eval(s),
        }
    }
}

/// What the statement splitter makes of a piece of input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    /// Statements the input completes.
    pub segments: usize,
    /// Tokens left over after the last complete statement, such as an open block.
    pub pending: bool,
}

impl Entry {
    pub fn scan(lexicon: &Lexicon, text: &str) -> Self {
        let mut segmenter = Segmenter::new(true);
        let segments = tokenize(lexicon, text)
            .into_iter()
            .filter_map(|token| segmenter.push(token))
            .count();

        Self {
            segments,
            pending: !segmenter.is_idle(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.segments == 0 && !self.pending
    }
}

pub struct CommandContext {
    pub(crate) session: AsyncSession,
}

impl CommandContext {
    pub fn new(engine: Engine) -> Self {
        Self {
            session: AsyncSession::spawn(engine),
        }
    }

    /// Drops input the session has buffered but not yet run.
    pub fn interrupt(&self) {
        self.session.clear();
    }

    /// Scans a line as the REPL will send it.
    pub fn entry(&self, line: &str) -> Entry {
        Entry::scan(&self.session.lexicon(), &format!("{line}\n"))
    }

    /// Candidates for the word ending at `pos`, with the byte offset the word starts at.
    pub fn completions(&self, line: &str, pos: usize) -> (usize, Vec<String>) {
        let src = &line[..pos];

        if src.starts_with(':') {
            let commands = Command::iter()
                .filter(|c| !c.is_hidden())
                .map(|c| c.to_string())
                .filter(|c| c.starts_with(src))
                .collect();
            return (0, commands);
        }

        let start = src
            .char_indices()
            .rev()
            .find(|(_, c)| !(c.is_alphanumeric() || *c == '_'))
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        let word = src[start..].to_string();
        if word.is_empty() {
            return (start, Vec::new());
        }

        let names = self
            .session
            .inspect(move |engine| {
                engine
                    .variables()
                    .into_iter()
                    .map(|(name, _)| name.to_string())
                    .filter(|name| name.starts_with(&word))
                    .sorted()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        (start, names)
    }

    pub fn execute(&mut self, to_run: &str) -> miette::Result<CommandOutput> {
        match to_run.to_string().into() {
            Command::Clear => {
                self.session.clear();
                self.inspect(Engine::clear)?;
                Ok(CommandOutput::None)
            }
            Command::Help => Ok(CommandOutput::String(
                Command::iter()
                    .filter(|c| !c.is_hidden())
                    .map(|c| c.help())
                    .collect(),
            )),
            Command::Quit => Ok(CommandOutput::Exit),
            Command::NotFound(s) => Err(miette!("Command not found: {}", s.trim())),
            Command::Load(file_path) => {
                let code = fs::read_to_string(&file_path).into_diagnostic()?;
                self.run(&code, true)
            }
            Command::Rules => self
                .inspect(|engine| {
                    let grammar = engine.grammar();
                    grammar
                        .names()
                        .sorted()
                        .map(|name| {
                            let alternatives = grammar
                                .get_rule(name)
                                .map(|rule| rule.alternatives.len())
                                .unwrap_or_default();
                            format!("{:<16}{} alternatives", name, alternatives)
                        })
                        .collect()
                })
                .map(CommandOutput::String),
            Command::Tokens(text) => Ok(CommandOutput::String(
                tokenize(&self.session.lexicon(), &text)
                    .iter()
                    .map(|token| {
                        format!(
                            "{:<8}{:<16}{}",
                            token.kind,
                            token.name,
                            format!("{token}").escape_debug()
                        )
                    })
                    .collect(),
            )),
            Command::Vars => self
                .inspect(|engine| {
                    engine
                        .variables()
                        .into_iter()
                        .sorted_by(|(a, _), (b, _)| a.cmp(b))
                        .map(|(name, value)| format!("{} = {}", name, value))
                        .collect()
                })
                .map(CommandOutput::String),
            Command::Version => Ok(CommandOutput::String(vec![Engine::version().to_string()])),
            Command::Eval(code) => self.run(&code, false),
        }
    }

    /// Sends `code` to the session and collects the values of the statements it completes.
    ///
    /// With `finish`, a trailing statement without a terminator runs too.
    fn run(&mut self, code: &str, finish: bool) -> miette::Result<CommandOutput> {
        let text = if finish { code.to_string() } else { format!("{code}\n") };
        let entry = Entry::scan(&self.session.lexicon(), &text);
        let expected = entry.segments + usize::from(finish && entry.pending);

        self.session.send(&text);
        if finish {
            self.session.finish();
        }

        let mut values = Vec::new();
        let mut failures = Vec::new();
        let mut done = 0;
        while done < expected {
            match self.session.events().recv() {
                Ok(SessionEvent::Result(value)) => values.push(value),
                Ok(SessionEvent::Prompt) => done += 1,
                Ok(SessionEvent::Failed(message)) => failures.push(message),
                Ok(SessionEvent::Exited) | Err(_) => return Ok(CommandOutput::Exit),
            }
        }

        if failures.is_empty() {
            Ok(CommandOutput::Value(values))
        } else {
            Err(miette!("{}", failures.join("\n")))
        }
    }

    fn inspect<R, F>(&self, f: F) -> miette::Result<R>
    where
        F: FnOnce(&mut Engine) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.session
            .inspect(f)
            .ok_or_else(|| miette!("Session has stopped"))
    }
}

#[cfg(test)]
mod tests {
    use scopeguard::defer;

    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn ctx() -> CommandContext {
        CommandContext::new(Engine::default())
    }

    fn values(output: CommandOutput) -> Vec<String> {
        match output {
            CommandOutput::Value(values) => values.iter().map(|v| v.to_string()).collect(),
            other => panic!("Expected Value output, got {other:?}"),
        }
    }

    fn lines(output: CommandOutput) -> Vec<String> {
        match output {
            CommandOutput::String(lines) => lines,
            other => panic!("Expected String output, got {other:?}"),
        }
    }

    #[rstest]
    #[case::clear(":clear", ":clear")]
    #[case::help(":help", ":help")]
    #[case::load(":load test.grc", ":load")]
    #[case::quit(" :quit ", ":quit")]
    #[case::rules(":rules", ":rules")]
    #[case::tokens(":tokens a + 1", ":tokens")]
    #[case::vars(":vars", ":vars")]
    #[case::version(":version", ":version")]
    #[case::eval("1 + 2", ":eval")]
    #[case::not_found(":nope", ":not_found")]
    fn test_command_from_string(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(Command::from(input.to_string()).to_string(), expected);
    }

    #[test]
    fn test_command_arguments() {
        assert!(matches!(Command::from(":load a.grc".to_string()), Command::Load(path) if path == "a.grc"));
        assert!(matches!(Command::from(":tokens x  = 1".to_string()), Command::Tokens(text) if text == "x  = 1"));
        assert!(matches!(Command::from(":load".to_string()), Command::NotFound(_)));
    }

    #[test]
    fn test_command_help() {
        for cmd in Command::iter().filter(|c| !c.is_hidden()) {
            let help = cmd.help();
            assert!(help.starts_with(&cmd.to_string()));
            assert!(help.len() > 12);
        }
    }

    #[rstest]
    #[case::statement("a = 1", 1, false)]
    #[case::blank("   ", 0, false)]
    #[case::open_block("$[ a = 1", 0, true)]
    #[case::closed_block("$[ a = 1\nb = 2 $]", 1, false)]
    fn test_entry(ctx: CommandContext, #[case] line: &str, #[case] segments: usize, #[case] pending: bool) {
        assert_eq!(ctx.entry(line), Entry { segments, pending });
    }

    #[rstest]
    fn test_execute_eval(mut ctx: CommandContext) {
        assert_eq!(values(ctx.execute("x = 20").unwrap()), vec!["null"]);
        assert_eq!(values(ctx.execute("x * 2 + 2").unwrap()), vec!["42"]);
    }

    #[rstest]
    fn test_execute_block(mut ctx: CommandContext) {
        assert_eq!(values(ctx.execute("$[ y = 3\ny * 3 $]").unwrap()), vec!["9"]);
    }

    #[rstest]
    fn test_execute_vars(mut ctx: CommandContext) {
        ctx.execute("answer = 42").unwrap();

        let vars = lines(ctx.execute(":vars").unwrap());
        assert!(vars.iter().any(|s| s == "answer = 42"));
    }

    #[rstest]
    fn test_execute_clear(mut ctx: CommandContext) {
        ctx.execute("gone = 1").unwrap();
        ctx.execute(":clear").unwrap();

        let vars = lines(ctx.execute(":vars").unwrap());
        assert!(!vars.iter().any(|s| s.starts_with("gone")));
    }

    #[rstest]
    fn test_execute_rules(mut ctx: CommandContext) {
        let rules = lines(ctx.execute(":rules").unwrap());
        assert!(rules.iter().any(|s| s.starts_with("$start")));
    }

    #[rstest]
    fn test_execute_tokens(mut ctx: CommandContext) {
        let tokens = lines(ctx.execute(":tokens a == 1").unwrap());
        assert!(tokens.iter().any(|s| s.starts_with("ID") && s.ends_with('a')));
        assert!(tokens.iter().any(|s| s.starts_with("SYM") && s.ends_with("==")));
    }

    #[rstest]
    fn test_execute_version(mut ctx: CommandContext) {
        assert_eq!(lines(ctx.execute(":version").unwrap()), vec![Engine::version().to_string()]);
    }

    #[rstest]
    fn test_execute_quit_and_exit(mut ctx: CommandContext) {
        assert!(matches!(ctx.execute(":quit").unwrap(), CommandOutput::Exit));
        assert!(matches!(ctx.execute("\\exit").unwrap(), CommandOutput::Exit));
    }

    #[rstest]
    fn test_execute_not_found(mut ctx: CommandContext) {
        assert!(ctx.execute(":unknown").is_err());
    }

    #[rstest]
    fn test_execute_load(mut ctx: CommandContext) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loaded.grc");
        std::fs::write(&path, "loaded = 5;\nloaded * 2").unwrap();
        let cleanup = path.clone();
        defer! {
            std::fs::remove_file(&cleanup).ok();
        }

        let output = ctx.execute(&format!(":load {}", path.display())).unwrap();
        assert_eq!(values(output).last().map(String::as_str), Some("10"));
    }

    #[rstest]
    fn test_completions(mut ctx: CommandContext) {
        ctx.execute("counter = 1").unwrap();

        assert_eq!(ctx.completions("cou", 3), (0, vec!["counter".to_string()]));
        assert_eq!(ctx.completions("1 + cou", 7), (4, vec!["counter".to_string()]));

        let (start, commands) = ctx.completions(":v", 2);
        assert_eq!(start, 0);
        assert_eq!(commands, vec![":vars", ":version"]);
    }
}
