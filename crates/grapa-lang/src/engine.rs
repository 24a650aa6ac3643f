use std::{
    io::{self, Write},
    mem,
    path::PathBuf,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use itertools::Itertools;
use smol_str::SmolStr;
use tracing::{debug, error, warn};

use crate::{
    GrapaResult, Node, Token, bootstrap,
    arena::Arena,
    codec::{self, DecodeError, Expander, InputKind},
    error::{Error, InnerError},
    eval::{env::Env, error::RuntimeError},
    grammar::{
        Grammar, START_RULE,
        error::GrammarError,
        loader,
        rule::{Alternative, Param, Rule},
    },
    kind::Kind,
    lexer::{
        Lexer, Lexicon, SharedLexicon, charclass::ClassName, read_lexicon, tokenize, token::TokenFlags,
        write_lexicon,
    },
    matcher::{MatchHooks, MatchOptions, Matched, Matcher},
    plan::Planner,
    segment::Segmenter,
    session::{self, Completion},
    value::{Payload, Pointer},
};

/// Start rule a script can install for itself, as a grammar rule or a rule variable.
pub const CUSTOM_START_RULE: &str = "custom_start";

/// `ERR` code of a statement that matched no start alternative.
pub const SYNTAX_ERROR_CODE: i64 = 12;

#[derive(Debug, Clone)]
pub struct Options {
    pub optimize: bool,
    pub prefix_reuse: bool,
    pub wildcard_limit: Option<usize>,
    /// Bound on rule nesting, call depth and pointer chains.
    pub max_depth: usize,
    /// Class directories; empty means the defaults.
    pub search_paths: Vec<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            optimize: true,
            prefix_reuse: true,
            wildcard_limit: None,
            max_depth: 512,
            search_paths: Vec::new(),
        }
    }
}

impl Options {
    pub fn match_options(&self) -> MatchOptions {
        MatchOptions {
            prefix_reuse: self.prefix_reuse,
            wildcard_limit: self.wildcard_limit,
            max_depth: self.max_depth,
        }
    }
}

/// One statement of a segment.
enum Statement {
    /// Only skip tokens remain.
    Done,
    /// A run token nothing matched; resume after it.
    Skip(usize),
    Planned(Node, usize),
    /// No start alternative matched; carries the syntax error value.
    Failed(Node),
}

pub struct Engine {
    pub(crate) lexicon: SharedLexicon,
    pub(crate) grammar: Grammar,
    pub(crate) env: Env,
    pub(crate) arena: Arena<Node>,
    pub(crate) options: Options,
    pub(crate) stop: Arc<AtomicBool>,
    pub(crate) expander: Option<Arc<dyn Expander>>,
    /// Arena slots of the tokens of the segment being run.
    pub(crate) handles: Vec<Pointer>,
    pub(crate) depth: usize,
    nesting: usize,
    pub(crate) exited: bool,
    output: Box<dyn Write + Send>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::with_options(Options::default())
    }
}

impl Engine {
    /// An engine with no tokens and no rules.
    pub fn new() -> Self {
        Self::bare(Options::default())
    }

    /// An engine with the base grammar installed.
    pub fn with_options(options: Options) -> Self {
        let mut engine = Self::bare(options);
        let installed = {
            let mut lexicon = write_lexicon(&engine.lexicon);
            bootstrap::install(&mut lexicon, &mut engine.grammar)
        };
        if let Err(e) = installed {
            error!(error = %e, "failed to install the base grammar");
        }
        engine
    }

    fn bare(options: Options) -> Self {
        Self {
            lexicon: Arc::new(RwLock::new(Lexicon::default())),
            grammar: Grammar::new(),
            env: Env::new(),
            arena: Arena::new(1024),
            options,
            stop: Arc::new(AtomicBool::new(false)),
            expander: None,
            handles: Vec::new(),
            depth: 0,
            nesting: 0,
            exited: false,
            output: Box::new(io::stdout()),
        }
    }

    pub fn set_optimize(&mut self, optimize: bool) {
        self.options.optimize = optimize;
    }

    pub fn set_paths(&mut self, paths: Vec<PathBuf>) {
        self.options.search_paths = paths;
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Where `echo` writes to; stdout by default.
    pub fn set_output(&mut self, output: Box<dyn Write + Send>) {
        self.output = output;
    }

    pub(crate) fn echo(&mut self, line: &str) {
        if let Err(e) = writeln!(self.output, "{line}").and_then(|_| self.output.flush()) {
            warn!(error = %e, "echo failed");
        }
    }

    pub fn set_expander(&mut self, expander: Arc<dyn Expander>) {
        self.expander = Some(expander);
    }

    /// Shared flag that makes running loops give up with a `Stopped` error.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn exited(&self) -> bool {
        self.exited
    }

    pub fn get_var(&self, name: &str) -> Option<&Node> {
        self.env.get(name)
    }

    pub fn set_var(&mut self, name: &str, value: Node) {
        self.env.set(name, value);
    }

    pub fn variables(&self) -> Vec<(SmolStr, Node)> {
        self.env.variables()
    }

    /// Result of the most recent statement.
    pub fn last(&self) -> &Node {
        self.env.last()
    }

    /// Drops all variables and clears the stop and exit state.
    pub fn clear(&mut self) {
        self.env.clear();
        self.exited = false;
        self.stop.store(false, Ordering::Relaxed);
    }

    pub fn set_class(&mut self, class: ClassName, members: &[u8]) {
        write_lexicon(&self.lexicon).classes.set(class, members);
    }

    pub fn add_token(&mut self, kind: Kind, name: &str, flags: TokenFlags, literal: &[u8]) -> u64 {
        debug!(kind = %kind, name, literal = %String::from_utf8_lossy(literal), "add token");
        write_lexicon(&self.lexicon)
            .registry
            .register_with(kind, name, flags, literal)
    }

    pub fn remove_token(&mut self, kind: Kind, literal: &[u8]) -> Option<Token> {
        write_lexicon(&self.lexicon).registry.remove(kind, literal)
    }

    pub fn add_rule(&mut self, name: &str) -> Arc<Rule> {
        self.grammar.add_rule(name)
    }

    pub fn get_rule(&self, name: &str) -> Option<Arc<Rule>> {
        self.grammar.get_rule(name)
    }

    pub fn add_alternative(&mut self, rule: &str, alternative: Alternative) -> Arc<Rule> {
        debug!(rule, params = alternative.params.len(), "add alternative");
        self.grammar.add_alternative(rule, alternative)
    }

    pub fn add_operation(
        &mut self,
        rule: &str,
        params: Vec<Param>,
        library: Option<&str>,
        function: &str,
        markers: &[i64],
    ) -> Arc<Rule> {
        self.grammar.add_operation(rule, params, library, function, markers)
    }

    pub fn remove_rule(&mut self, name: &str) -> Result<Arc<Rule>, GrammarError> {
        self.grammar.remove_rule(name)
    }

    /// Applies a TOML grammar description to the session.
    pub fn load_grammar(&mut self, text: &str) -> Result<(), GrammarError> {
        let mut lexicon = write_lexicon(&self.lexicon);
        loader::load(text, &mut lexicon, &mut self.grammar)
    }

    pub fn parse_param(&self, text: &str) -> Result<Param, GrammarError> {
        loader::parse_param(text, &read_lexicon(&self.lexicon))
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    /// Snapshot of the current character classes and registered tokens.
    pub fn lexicon(&self) -> Lexicon {
        read_lexicon(&self.lexicon).clone()
    }

    pub fn tokenize(&self, text: &str) -> Vec<Token> {
        tokenize(&read_lexicon(&self.lexicon), text)
    }

    #[allow(clippy::result_large_err)]
    pub fn eval(&mut self, code: &str) -> GrapaResult {
        let mut lexer = Lexer::new(Arc::clone(&self.lexicon));
        let mut segmenter = Segmenter::new(false);
        lexer.feed(code.as_bytes());
        lexer.finish();

        let mut results = Vec::new();
        session::drain(self, &mut lexer, &mut segmenter, true, &mut Completion::Inline(&mut results))
            .map_err(|e| Error::from_error(code, e))?;
        Ok(results.pop().unwrap_or_default())
    }

    /// Runs script text, serialized operation trees or GRZ input.
    #[allow(clippy::result_large_err)]
    pub fn eval_bytes(&mut self, bytes: &[u8]) -> GrapaResult {
        match InputKind::detect(bytes) {
            InputKind::Script => self.eval(&String::from_utf8_lossy(bytes)),
            InputKind::Serialized => self.run_serialized(bytes),
            InputKind::Grz => {
                let expander = self.expander.clone().ok_or(DecodeError::MissingExpander)?;
                let expanded = expander.expand(bytes).map_err(DecodeError::Expand)?;
                match InputKind::detect(&expanded) {
                    InputKind::Grz => Err(DecodeError::Expand("expansion produced GRZ input".to_string()).into()),
                    _ => self.eval_bytes(&expanded),
                }
            }
        }
    }

    #[allow(clippy::result_large_err)]
    fn run_serialized(&mut self, bytes: &[u8]) -> GrapaResult {
        let nodes = codec::from_bytes_all(bytes)?;
        debug!(nodes = nodes.len(), "run serialized input");

        let mut results = Vec::with_capacity(nodes.len());
        for node in nodes {
            if self.exited || self.stop.load(Ordering::Relaxed) {
                break;
            }
            let node = self.resolve_rules(node);
            let value = self.process(&node)?;
            if !value.is_null() {
                results.push(value);
            }
        }

        let result = collapse(results);
        self.env.set_last(result.clone());
        Ok(result)
    }

    /// Rules are stored by name; binds each to this session's rule of that name.
    fn resolve_rules(&self, node: Node) -> Node {
        if node.kind == Kind::RuleRef
            && let Some(name) = codec::rule_name(&node)
        {
            return match self.grammar.get_rule(&name) {
                Some(rule) => Node::rule(rule).with_name(node.name),
                None => {
                    debug!(rule = %name, "serialized rule is not in the grammar");
                    node
                }
            };
        }

        match node.payload {
            Payload::List(children) => Node::list(
                node.kind,
                children.into_iter().map(|child| self.resolve_rules(child)).collect(),
            )
            .with_name(node.name),
            payload => Node { payload, ..node },
        }
    }

    /// Parses and plans every statement of `code` without running it.
    #[allow(clippy::result_large_err)]
    pub fn compile(&mut self, code: &str) -> Result<Vec<Node>, Error> {
        let lexicon = self.lexicon();
        let mut segmenter = Segmenter::new(false);
        let mut segments = Vec::new();
        for token in tokenize(&lexicon, code) {
            segments.extend(segmenter.push(token));
        }
        segments.extend(segmenter.finish());

        if self.nesting == 0 {
            self.arena.clear();
        }
        let saved = mem::take(&mut self.handles);
        let mut planned = Vec::new();
        let mut result = Ok(());

        for segment in segments {
            let crate::segment::Segment::Execute(tokens) = segment else {
                break;
            };
            self.handles = tokens.iter().map(|t| self.arena.alloc(t.to_node())).collect();
            let mut pos = 0;
            loop {
                match self.statement(&tokens, pos) {
                    Ok(Statement::Done) => break,
                    Ok(Statement::Skip(next)) => pos = next,
                    Ok(Statement::Planned(node, next)) => {
                        planned.push(node);
                        pos = next;
                    }
                    Ok(Statement::Failed(err)) => {
                        result = Err(InnerError::Runtime(RuntimeError::Raised(err)));
                        break;
                    }
                    Err(e) => {
                        result = Err(e);
                        break;
                    }
                }
            }
            if result.is_err() {
                break;
            }
        }

        self.handles = saved;
        result.map_err(|e| Error::from_error(code, e))?;
        Ok(planned)
    }

    /// Compiles `code` into the binary format, with token pointers resolved.
    #[allow(clippy::result_large_err)]
    pub fn compile_to_bytes(&mut self, code: &str) -> Result<Vec<u8>, Error> {
        let planned = self.compile(code)?;
        Ok(codec::to_bytes_resolved(&planned, &self.arena))
    }

    /// Runs the statements of one segment. Nested calls (a class body, a
    /// script evaluated from a script) keep the outer segment's arena slots.
    pub(crate) fn execute_tokens(&mut self, tokens: &[Token]) -> Result<Node, InnerError> {
        if self.nesting == 0 {
            self.arena.clear();
        }
        self.nesting += 1;
        let saved = mem::take(&mut self.handles);
        self.handles = tokens.iter().map(|t| self.arena.alloc(t.to_node())).collect();

        let result = self.run_statements(tokens);

        self.handles = saved;
        self.nesting -= 1;
        result
    }

    fn run_statements(&mut self, tokens: &[Token]) -> Result<Node, InnerError> {
        let mut results = Vec::new();
        let mut pos = 0;

        while !self.exited && !self.stop.load(Ordering::Relaxed) {
            match self.statement(tokens, pos)? {
                Statement::Done => break,
                Statement::Skip(next) => pos = next,
                Statement::Planned(node, next) => {
                    let value = self.process(&node)?;
                    if !value.is_null() {
                        results.push(value);
                    }
                    pos = next;
                }
                Statement::Failed(err) => {
                    results.push(err);
                    break;
                }
            }
        }

        let result = collapse(results);
        self.env.set_last(result.clone());
        Ok(result)
    }

    fn statement(&mut self, tokens: &[Token], pos: usize) -> Result<Statement, InnerError> {
        let Some(begin) = tokens[pos.min(tokens.len())..]
            .iter()
            .position(|token| !token.flags.skip)
            .map(|offset| pos + offset)
        else {
            return Ok(Statement::Done);
        };

        let start = self.start_rule()?;
        let grammar = self.grammar.clone();
        let options = self.options.match_options();
        let (matched, end, furthest) = {
            let mut matcher = Matcher::new(tokens, grammar, options, self);
            let (matched, end) = matcher.parse(&start, begin);
            (matched, end, matcher.furthest())
        };

        match matched {
            Some(matched) if end > begin => {
                let node = Planner::new(self, tokens)
                    .plan(&matched)
                    .unwrap_or_else(|e| e.to_node());
                Ok(Statement::Planned(node, end))
            }
            _ if tokens[begin].flags.run => Ok(Statement::Skip(begin + 1)),
            _ => {
                let err = syntax_error(tokens, begin, furthest);
                warn!(error = %err, "no start alternative matched");
                Ok(Statement::Failed(err))
            }
        }
    }

    fn start_rule(&self) -> Result<Arc<Rule>, GrammarError> {
        [CUSTOM_START_RULE, START_RULE]
            .iter()
            .find_map(|name| self.env.get(name).and_then(Node::as_rule).cloned())
            .or_else(|| self.grammar.get_rule(CUSTOM_START_RULE))
            .or_else(|| self.grammar.get_rule(START_RULE))
            .ok_or(GrammarError::MissingStart)
    }

    pub const fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}

impl MatchHooks for Engine {
    fn rule_variable(&self, name: &str) -> Option<Arc<Rule>> {
        self.env.get(name).and_then(Node::as_rule).cloned()
    }

    fn lookup(&self, table: &str, token: &Token) -> Option<Node> {
        self.env
            .get(table)
            .filter(|table| table.kind == Kind::List)
            .and_then(|table| table.child(&token.text()))
            .cloned()
    }

    fn guard(&mut self, action: &str, tokens: &[Token], matched: &Matched) -> bool {
        let node = match Planner::new(self, tokens).plan(matched) {
            Ok(node) => node,
            Err(_) => return false,
        };
        matches!(self.run_call(None, action, vec![node]), Ok(value) if !value.is_error())
    }
}

fn collapse(mut results: Vec<Node>) -> Node {
    match results.len() {
        0 => Node::null(),
        1 => results.pop().unwrap_or_default(),
        _ => Node::array(results),
    }
}

/// `ERR` value for a statement nothing matched: what matched before the
/// furthest token reached and every token from there on.
fn syntax_error(tokens: &[Token], begin: usize, furthest: Option<usize>) -> Node {
    let shown = |token: &&Token| !token.flags.skip && !token.flags.run;
    let fail_at = furthest.map(|i| i + 1).unwrap_or(begin).max(begin);

    let matched = tokens[begin..fail_at.min(tokens.len())]
        .iter()
        .filter(shown)
        .join(" ");
    let fail = tokens[fail_at.min(tokens.len())..]
        .iter()
        .filter(shown)
        .join(" ");

    Node::list(
        Kind::Err,
        vec![
            Node::int(SYNTAX_ERROR_CODE).with_name("code"),
            Node::str("Syntax error").with_name("message"),
            Node::str(&matched).with_name("match"),
            Node::str(&fail).with_name("fail"),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_engine_default() {
        let engine = Engine::default();
        assert!(engine.options.optimize);
        assert!(engine.get_rule(START_RULE).is_some());
        assert!(Engine::new().get_rule(START_RULE).is_none());
    }

    #[test]
    fn test_version() {
        assert!(!Engine::version().is_empty());
    }

    #[rstest]
    #[case::arithmetic("1 + 2 * 3", "7")]
    #[case::precedence("(1 + 2) * 3", "9")]
    #[case::variables("a = 4; b = a * 2; b - 1", "7")]
    #[case::string("\"ab\" + \"cd\"", "abcd")]
    #[case::comparison("3 > 2 && 1 == 1", "true")]
    #[case::if_else("if (1 > 2) { 10 } else { 20 }", "20")]
    #[case::while_loop("i = 0; while (i < 5) { i += 1 }; i", "5")]
    #[case::function("f = op(a, b) { a - b }; f(b: 1, 10)", "9")]
    #[case::array("[1, 2] + [3]", "[1, 2, 3]")]
    #[case::list("{ x: 1, y: 2 }", "{x: 1, y: 2}")]
    #[case::len("len(\"héllo\")", "5")]
    fn test_eval(#[case] code: &str, #[case] expected: &str) {
        let mut engine = Engine::default();
        assert_eq!(engine.eval(code).unwrap().to_string(), expected);
    }

    #[test]
    fn test_eval_without_start_rule() {
        let mut engine = Engine::new();
        let error = engine.eval("1").unwrap_err();

        assert_eq!(error.cause, InnerError::Grammar(GrammarError::MissingStart));
        assert!(engine.eval("").unwrap().is_null());
    }

    #[test]
    fn test_syntax_error() {
        let mut engine = Engine::default();
        let result = engine.eval("a = 1 +").unwrap();

        assert_eq!(result.child("code"), Some(&Node::int(SYNTAX_ERROR_CODE).with_name("code")));
        assert_eq!(result.child("fail").map(|n| n.text().into_owned()), Some("+".to_string()));
        assert_eq!(engine.get_var("a").map(|v| v.to_string()), Some("1".to_string()));
    }

    #[test]
    fn test_custom_start_variable() {
        let mut engine = Engine::default();
        let param = engine.parse_param("ID").unwrap();
        let rule = engine.add_alternative("$shout", Alternative::new([param]).with_function(None, "lit"));
        engine.set_var(CUSTOM_START_RULE, Node::rule(rule));

        assert_eq!(engine.eval("hello").unwrap(), Node::bytes(Kind::Id, b"hello".to_vec()));
    }

    #[test]
    fn test_compile_then_run_serialized() {
        let mut engine = Engine::default();
        let bytes = engine.compile_to_bytes("x = 2; x * 21").unwrap();
        assert_eq!(InputKind::detect(&bytes), InputKind::Serialized);

        let mut runner = Engine::default();
        assert_eq!(runner.eval_bytes(&bytes).unwrap(), Node::int(42));
        assert_eq!(runner.get_var("x").map(|v| v.to_string()), Some("2".to_string()));
    }

    #[test]
    fn test_serialized_rule_is_rebound_by_name() {
        let shout = |engine: &mut Engine| {
            let param = engine.parse_param("ID").unwrap();
            engine.add_alternative("$shout", Alternative::new([param]).with_function(None, "lit"))
        };
        let mut writer = Engine::default();
        let program = Node::call(
            None,
            "setvar",
            vec![Node::str(CUSTOM_START_RULE), Node::rule(shout(&mut writer))],
        );
        let bytes = codec::to_bytes(&program);

        let mut runner = Engine::default();
        shout(&mut runner);
        runner.eval_bytes(&bytes).unwrap();

        let start = runner.get_var(CUSTOM_START_RULE).and_then(Node::as_rule).map(|r| r.name.to_string());
        assert_eq!(start, Some("$shout".to_string()));
        assert_eq!(runner.eval("hello").unwrap(), Node::bytes(Kind::Id, b"hello".to_vec()));

        let mut unknown = Engine::default();
        unknown.eval_bytes(&bytes).unwrap();
        assert_eq!(unknown.get_var(CUSTOM_START_RULE).map(|v| v.kind), Some(Kind::RuleRef));
    }

    #[test]
    fn test_grz_needs_expander() {
        struct Strip;
        impl Expander for Strip {
            fn expand(&self, bytes: &[u8]) -> Result<Vec<u8>, String> {
                Ok(bytes[5..].to_vec())
            }
        }

        let mut engine = Engine::default();
        let input = b"GRZ\x01\x00 1 + 1";
        let error = engine.eval_bytes(input).unwrap_err();
        assert_eq!(error.cause, InnerError::Decode(DecodeError::MissingExpander));

        engine.set_expander(Arc::new(Strip));
        assert_eq!(engine.eval_bytes(input).unwrap(), Node::int(2));
    }

    #[test]
    fn test_echo_to_output() {
        #[derive(Clone, Default)]
        struct Shared(Arc<std::sync::Mutex<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let shared = Shared::default();
        let mut engine = Engine::default();
        engine.set_output(Box::new(shared.clone()));
        engine.eval("echo(\"hi\", 1)").unwrap();

        assert_eq!(String::from_utf8(shared.0.lock().unwrap().clone()).unwrap(), "hi 1\n");
    }
}
