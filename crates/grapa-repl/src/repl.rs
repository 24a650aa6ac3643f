use colored::*;
use itertools::Itertools;
use miette::IntoDiagnostic;
use rustyline::{
    At, Cmd, CompletionType, Config, Context, EditMode, Editor, Helper, KeyCode, KeyEvent, Modifiers, Movement, Word,
    completion::{Completer, FilenameCompleter, Pair},
    error::ReadlineError,
    highlight::{CmdKind, Highlighter, MatchingBracketHighlighter},
    hint::Hinter,
    validate::{ValidationContext, ValidationResult, Validator},
};
use std::{borrow::Cow, cell::RefCell, fs, path::PathBuf, rc::Rc};

use crate::command_context::{Command, CommandContext, CommandOutput};

const PROMPT: &str = "> ";
const HISTORY_FILE: &str = "history.txt";

pub struct GrapaLineHelper {
    command_context: Rc<RefCell<CommandContext>>,
    file_completer: FilenameCompleter,
    matching_bracket_highlighter: MatchingBracketHighlighter,
}

impl GrapaLineHelper {
    pub fn new(command_context: Rc<RefCell<CommandContext>>) -> Self {
        Self {
            command_context,
            file_completer: FilenameCompleter::new(),
            matching_bracket_highlighter: MatchingBracketHighlighter::default(),
        }
    }
}

impl Hinter for GrapaLineHelper {
    type Hint = String;
}

impl Highlighter for GrapaLineHelper {
    fn highlight_prompt<'b, 's: 'b, 'p: 'b>(&'s self, prompt: &'p str, _default: bool) -> Cow<'b, str> {
        prompt.cyan().to_string().into()
    }

    fn highlight_char(&self, line: &str, pos: usize, kind: CmdKind) -> bool {
        self.matching_bracket_highlighter.highlight_char(line, pos, kind)
    }
}

impl Validator for GrapaLineHelper {
    fn validate(&self, ctx: &mut ValidationContext<'_>) -> Result<ValidationResult, ReadlineError> {
        let input = ctx.input();
        if input.trim_start().starts_with(':') {
            return Ok(ValidationResult::Valid(None));
        }

        // an open `$[` block or a trailing escape carries on to the next line
        if self.command_context.borrow().entry(input).pending {
            Ok(ValidationResult::Incomplete)
        } else {
            Ok(ValidationResult::Valid(None))
        }
    }

    fn validate_while_typing(&self) -> bool {
        false
    }
}

impl Completer for GrapaLineHelper {
    type Candidate = Pair;

    fn complete(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> Result<(usize, Vec<Pair>), ReadlineError> {
        if line.starts_with(&format!("{} ", Command::Load(String::new()))) {
            return self.file_completer.complete_path(line, pos);
        }

        let (start, candidates) = self.command_context.borrow().completions(line, pos);
        let completions = candidates
            .into_iter()
            .map(|candidate| Pair {
                display: candidate.clone(),
                replacement: candidate,
            })
            .collect_vec();

        Ok((start, completions))
    }
}

impl Helper for GrapaLineHelper {}

pub struct Repl {
    command_context: Rc<RefCell<CommandContext>>,
}

impl Repl {
    pub fn new(engine: grapa_lang::Engine) -> Self {
        Self {
            command_context: Rc::new(RefCell::new(CommandContext::new(engine))),
        }
    }

    pub fn config_dir() -> Option<PathBuf> {
        std::env::var_os("GRAPA_CONFIG_DIR")
            .map(PathBuf::from)
            .or_else(|| dirs::config_dir().map(|d| d.join("grapa")))
    }

    pub fn run(&self) -> miette::Result<()> {
        let config = Config::builder()
            .history_ignore_space(true)
            .completion_type(CompletionType::List)
            .edit_mode(EditMode::Emacs)
            .color_mode(rustyline::ColorMode::Enabled)
            .build();
        let mut editor = Editor::with_config(config).into_diagnostic()?;
        let helper = GrapaLineHelper::new(Rc::clone(&self.command_context));

        editor.set_helper(Some(helper));
        editor.bind_sequence(
            KeyEvent(KeyCode::Left, Modifiers::CTRL),
            Cmd::Move(Movement::BackwardWord(1, Word::Big)),
        );
        editor.bind_sequence(
            KeyEvent(KeyCode::Right, Modifiers::CTRL),
            Cmd::Move(Movement::ForwardWord(1, At::AfterEnd, Word::Big)),
        );

        let history = Self::config_dir().map(|config_dir| {
            fs::create_dir_all(&config_dir).ok();
            config_dir.join(HISTORY_FILE)
        });

        if let Some(history) = &history
            && editor.load_history(history).is_err()
        {
            println!("No previous history.");
        }

        println!("Welcome to grapa {}. For help, type :help", grapa_lang::Engine::version());

        loop {
            let prompt = format!("{}", PROMPT.cyan());

            match editor.readline(&prompt) {
                Ok(line) => {
                    let output = self.command_context.borrow_mut().execute(&line);
                    match output {
                        Ok(CommandOutput::String(s)) => println!("{}", s.join("\n")),
                        Ok(CommandOutput::Value(values)) => {
                            let lines = values
                                .iter()
                                .filter(|value| !value.is_null())
                                .map(|value| {
                                    if value.is_error() {
                                        value.to_string().red().to_string()
                                    } else {
                                        value.to_string()
                                    }
                                })
                                .collect_vec();

                            if !lines.is_empty() {
                                println!("{}", lines.join("\n"));
                            }

                            editor.add_history_entry(&line).into_diagnostic()?;
                        }
                        Ok(CommandOutput::Exit) => break,
                        Ok(CommandOutput::None) => (),
                        Err(e) => eprintln!("{:?}", e),
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    self.command_context.borrow().interrupt();
                    continue;
                }
                Err(ReadlineError::Eof) => break,
                Err(err) => {
                    eprintln!("Error: {:?}", err);
                    break;
                }
            }

            if let Some(history) = &history {
                editor.save_history(history).into_diagnostic()?;
            }
        }

        Ok(())
    }
}
