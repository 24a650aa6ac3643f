use std::sync::Arc;

use smol_str::SmolStr;
use tracing::{trace, warn};

use crate::{
    Node, Token,
    grammar::{
        Grammar,
        rule::{Alternative, Param, Rule},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOptions {
    /// Reuse the matched prefix shared by adjacent alternatives.
    pub prefix_reuse: bool,
    /// Upper bound on tokens captured by one wildcard.
    pub wildcard_limit: Option<usize>,
    pub max_depth: usize,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            prefix_reuse: true,
            wildcard_limit: None,
            max_depth: 512,
        }
    }
}

/// Callbacks into the session while matching.
pub trait MatchHooks {
    /// A rule stored in a variable, consulted when the grammar has no rule of that name.
    fn rule_variable(&self, _name: &str) -> Option<Arc<Rule>> {
        None
    }

    /// The value stored under the token's text in the named `LIST` variable.
    fn lookup(&self, _table: &str, _token: &Token) -> Option<Node> {
        None
    }

    /// Runs a guard action on a sub-match; `false` rejects it.
    fn guard(&mut self, _action: &str, _tokens: &[Token], _matched: &Matched) -> bool {
        true
    }
}

impl MatchHooks for () {}

#[derive(Debug, Clone, PartialEq)]
pub struct OpMatch {
    pub rule: SmolStr,
    pub alternative: Arc<Alternative>,
    /// One entry per parameter of `alternative`.
    pub params: Vec<Matched>,
}

/// Parameter tree produced by a successful match.
#[derive(Debug, Clone, PartialEq)]
pub enum Matched {
    Token(usize),
    Op(OpMatch),
    Capture(Vec<usize>),
    Lookup { token: usize, value: Node },
}

impl Matched {
    pub fn as_op(&self) -> Option<&OpMatch> {
        match self {
            Matched::Op(op) => Some(op),
            _ => None,
        }
    }

    fn each_token(&self, f: &mut impl FnMut(usize)) {
        match self {
            Matched::Token(i) | Matched::Lookup { token: i, .. } => f(*i),
            Matched::Capture(tokens) => tokens.iter().copied().for_each(f),
            Matched::Op(op) => op.params.iter().for_each(|param| param.each_token(f)),
        }
    }
}

/// Parameters still to be matched after the current one, innermost first.
#[derive(Debug, Clone, Copy)]
struct Follow<'f> {
    params: &'f [Param],
    parent: Option<&'f Follow<'f>>,
}

const END: Follow<'static> = Follow {
    params: &[],
    parent: None,
};

impl<'f> Follow<'f> {
    fn first(&self) -> Option<(&'f Param, Follow<'f>)> {
        match self.params.split_first() {
            Some((first, rest)) => Some((
                first,
                Follow {
                    params: rest,
                    parent: self.parent,
                },
            )),
            None => self.parent.and_then(|parent| parent.first()),
        }
    }
}

type Step = Option<(Matched, usize)>;

/// Backtracking rule matcher over one statement's tokens.
///
/// A failed attempt leaves no trace: the cursor is returned unchanged and
/// touched marks set during the attempt are rolled back.
pub struct Matcher<'a, H: MatchHooks + ?Sized> {
    tokens: &'a [Token],
    grammar: Grammar,
    options: MatchOptions,
    hooks: &'a mut H,
    touched: Vec<bool>,
    journal: Vec<usize>,
    furthest: Option<usize>,
}

impl<'a, H: MatchHooks + ?Sized> Matcher<'a, H> {
    pub fn new(tokens: &'a [Token], grammar: Grammar, options: MatchOptions, hooks: &'a mut H) -> Self {
        Self {
            tokens,
            grammar,
            options,
            hooks,
            touched: vec![false; tokens.len()],
            journal: Vec::new(),
            furthest: None,
        }
    }

    /// Matches `rule` at `pos`, returning the tree and the position just past it,
    /// or `None` and `pos` itself.
    pub fn parse(&mut self, rule: &Arc<Rule>, pos: usize) -> (Option<Matched>, usize) {
        match self.match_rule(rule, pos, &END, 0) {
            Some((matched, end)) => (Some(matched), end),
            None => (None, pos),
        }
    }

    pub fn touched(&self) -> &[bool] {
        &self.touched
    }

    /// Index of the last token any attempt consumed.
    pub fn furthest(&self) -> Option<usize> {
        self.furthest
    }

    /// First position at or after `pos` that is not a skip token.
    pub fn skip(&self, mut pos: usize) -> usize {
        while self.tokens.get(pos).is_some_and(|token| token.flags.skip) {
            pos += 1;
        }
        pos
    }

    fn mark(&mut self, index: usize) {
        if let Some(touched) = self.touched.get_mut(index)
            && !*touched
        {
            *touched = true;
            self.journal.push(index);
        }
        self.furthest = self.furthest.max(Some(index));
    }

    fn rollback(&mut self, checkpoint: usize) {
        for index in self.journal.drain(checkpoint..) {
            self.touched[index] = false;
        }
    }

    fn resolve(&self, name: &str) -> Option<Arc<Rule>> {
        self.grammar
            .get_rule(name)
            .or_else(|| self.hooks.rule_variable(name))
    }

    fn match_rule(&mut self, rule: &Arc<Rule>, pos: usize, follow: &Follow<'_>, depth: usize) -> Step {
        if depth > self.options.max_depth {
            warn!(rule = %rule.name, depth, "match depth exceeded");
            return None;
        }
        trace!(rule = %rule.name, pos, "match rule");

        if !rule.is_left_recursive() {
            return self.match_alternatives(&rule.name, &rule.alternatives, pos, None, follow, depth);
        }

        let (grow, seed): (Vec<_>, Vec<_>) = rule
            .alternatives
            .iter()
            .cloned()
            .partition(|alt| alt.is_left_recursive(&rule.name));

        let (mut matched, mut end) =
            self.match_alternatives(&rule.name, &seed, pos, None, follow, depth)?;

        loop {
            match self.match_alternatives(&rule.name, &grow, pos, Some((matched.clone(), end)), follow, depth) {
                Some((grown, grown_end)) if grown_end > end => {
                    matched = grown;
                    end = grown_end;
                }
                _ => break,
            }
        }

        Some((matched, end))
    }

    /// Tries `alternatives` in order. With a `seed`, every alternative's first
    /// parameter is taken as already matched by it.
    fn match_alternatives(
        &mut self,
        rule: &SmolStr,
        alternatives: &[Arc<Alternative>],
        pos: usize,
        seed: Option<(Matched, usize)>,
        follow: &Follow<'_>,
        depth: usize,
    ) -> Step {
        let checkpoint = self.journal.len();
        let base = seed.is_some() as usize;
        let mut previous: Option<(Arc<Alternative>, Vec<(Matched, usize)>)> = None;

        for alternative in alternatives {
            if alternative.params.len() < base {
                continue;
            }

            let reuse = match &previous {
                Some((prev, progress)) if self.options.prefix_reuse => {
                    shared_prefix(prev, alternative, progress.len(), base)
                }
                _ => base,
            };

            let mut progress = match (&previous, &seed) {
                (Some((_, progress)), _) if reuse > 0 => progress[..reuse].to_vec(),
                (_, Some(seed)) => vec![seed.clone()],
                _ => Vec::new(),
            };
            for (matched, _) in &progress {
                matched.each_token(&mut |i| self.mark(i));
            }

            let mut cursor = progress.last().map(|(_, end)| *end).unwrap_or(pos);
            let mut failed = false;

            for (i, param) in alternative.params.iter().enumerate().skip(progress.len()) {
                let inner = Follow {
                    params: &alternative.params[i + 1..],
                    parent: Some(follow),
                };
                match self.match_param(param, cursor, &inner, depth) {
                    Some((matched, end)) => {
                        progress.push((matched, end));
                        cursor = end;
                    }
                    None => {
                        failed = true;
                        break;
                    }
                }
            }

            if !failed {
                let params = progress.into_iter().map(|(matched, _)| matched).collect();
                return Some((
                    Matched::Op(OpMatch {
                        rule: rule.clone(),
                        alternative: Arc::clone(alternative),
                        params,
                    }),
                    cursor,
                ));
            }

            self.rollback(checkpoint);
            previous = Some((Arc::clone(alternative), progress));
        }

        None
    }

    fn match_param(&mut self, param: &Param, pos: usize, follow: &Follow<'_>, depth: usize) -> Step {
        match param {
            Param::Wildcard => self.match_wildcard(pos, follow, depth),
            Param::Literal(literal) => {
                let pos = self.skip(pos);
                let token = self.tokens.get(pos)?;
                if !literal.matches(token) {
                    return None;
                }
                self.mark(pos);
                Some((Matched::Token(pos), pos + 1))
            }
            Param::Lookup(table) => {
                let pos = self.skip(pos);
                let value = self.hooks.lookup(table, self.tokens.get(pos)?)?;
                self.mark(pos);
                Some((Matched::Lookup { token: pos, value }, pos + 1))
            }
            Param::Group(rule) => self.match_rule(rule, pos, follow, depth + 1),
            Param::RuleRef { name, guard } => {
                let rule = self.resolve(name)?;
                let checkpoint = self.journal.len();
                let (matched, end) = self.match_rule(&rule, pos, follow, depth + 1)?;

                match guard {
                    Some(action) if !self.hooks.guard(action, self.tokens, &matched) => {
                        trace!(rule = %name, action = %action, "guard rejected match");
                        self.rollback(checkpoint);
                        None
                    }
                    _ => Some((matched, end)),
                }
            }
        }
    }

    /// Captures tokens until the following parameter matches, a run token is
    /// reached or the input ends. Skip tokens are passed over but not captured.
    fn match_wildcard(&mut self, pos: usize, follow: &Follow<'_>, depth: usize) -> Step {
        let mut captured = Vec::new();
        let mut cursor = pos;

        loop {
            let Some(next) = self.next_capturable(cursor) else {
                break;
            };
            if !captured.is_empty() && self.probe(follow, next, depth) {
                break;
            }
            if self
                .options
                .wildcard_limit
                .is_some_and(|limit| captured.len() >= limit)
            {
                break;
            }
            captured.push(next);
            cursor = next + 1;
        }

        if captured.is_empty() {
            return None;
        }

        captured.iter().for_each(|i| self.mark(*i));
        Some((Matched::Capture(captured), cursor))
    }

    fn next_capturable(&self, mut pos: usize) -> Option<usize> {
        loop {
            let token = self.tokens.get(pos)?;
            if token.flags.run {
                return None;
            }
            if !token.flags.skip {
                return Some(pos);
            }
            pos += 1;
        }
    }

    /// Whether the parameter following a wildcard matches at `pos`. Leaves no
    /// trace. Counts toward the depth of the wildcard's rule.
    fn probe(&mut self, follow: &Follow<'_>, pos: usize, depth: usize) -> bool {
        let Some((param, rest)) = follow.first() else {
            return false;
        };
        if matches!(param, Param::Wildcard) {
            return true;
        }

        let checkpoint = self.journal.len();
        let furthest = self.furthest;
        let matched = self.match_param(param, pos, &rest, depth + 1).is_some();
        self.rollback(checkpoint);
        self.furthest = furthest;
        matched
    }
}

/// Number of leading parameters of `next` whose matches from `prev` stay valid.
fn shared_prefix(prev: &Alternative, next: &Alternative, matched: usize, base: usize) -> usize {
    let mut len = prev
        .params
        .iter()
        .zip(next.params.iter())
        .take(matched)
        .take_while(|(a, b)| a == b && a.is_reusable())
        .count()
        .max(base);

    // a rule reference may end in a wildcard that stopped at the parameter after it
    let same_follow = prev.params.get(len) == next.params.get(len);
    if len > base
        && !same_follow
        && !matches!(next.params[len - 1], Param::Literal(_) | Param::Lookup(_))
    {
        len -= 1;
    }

    len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        grammar::{loader, rule::Literal},
        kind::Kind,
        lexer::{Lexicon, tokenize},
    };
    use rstest::rstest;

    const GRAMMAR: &str = r#"
        [[tokens]]
        kind = "SYM"
        text = " "
        flags = ["skip"]

        [[tokens]]
        kind = "SYM"
        text = ";"
        flags = ["run"]

        [[tokens]]
        kind = "SYM"
        text = "+"

        [[tokens]]
        kind = "SYM"
        text = "-"

        [[rules]]
        name = "$sum"
        alternatives = [
            { params = ["$sum", "'+'", "INT"], op = "add", args = [1, 3] },
            { params = ["$sum", "'-'", "INT"], op = "sub", args = [1, 3] },
            { params = ["INT"] },
        ]

        [[rules]]
        name = "$greeting"
        alternatives = [{ params = ["'hello'", "$name"], op = "greet" }]

        [[rules]]
        name = "$name"
        alternatives = [{ params = ["ID"] }]

        [[rules]]
        name = "$say"
        alternatives = [
            { params = ["'say'", "*", "';'"], op = "say" },
            { params = ["'say'", "*"], op = "say" },
        ]

        [[rules]]
        name = "$empty"

        [[rules]]
        name = "$optional"
        alternatives = [{ params = [] }]
    "#;

    fn setup(text: &str) -> (Vec<Token>, Grammar) {
        let mut lexicon = Lexicon::default();
        let mut grammar = Grammar::new();
        loader::load(GRAMMAR, &mut lexicon, &mut grammar).unwrap();
        (tokenize(&lexicon, text), grammar)
    }

    fn parse(text: &str, rule: &str, options: MatchOptions) -> (Vec<Token>, Option<Matched>, usize) {
        let (tokens, grammar) = setup(text);
        let rule = grammar.get_rule(rule).unwrap();
        let mut hooks = ();
        let (matched, end) = Matcher::new(&tokens, grammar, options, &mut hooks).parse(&rule, 0);
        (tokens, matched, end)
    }

    fn shape(tokens: &[Token], matched: &Matched) -> String {
        match matched {
            Matched::Token(i) => tokens[*i].text(),
            Matched::Capture(captured) => captured.iter().map(|i| tokens[*i].text()).collect::<Vec<_>>().join(" "),
            Matched::Lookup { value, .. } => value.to_string(),
            Matched::Op(op) if op.params.len() == 1 => shape(tokens, &op.params[0]),
            Matched::Op(op) => format!(
                "({})",
                op.params.iter().map(|p| shape(tokens, p)).collect::<Vec<_>>().join(" ")
            ),
        }
    }

    #[rstest]
    #[case::single("1", "1", 1)]
    #[case::left_assoc("1 + 2 + 3", "((1 + 2) + 3)", 5)]
    #[case::mixed("1 - 2 + 3", "((1 - 2) + 3)", 5)]
    #[case::stops_before_dangling("1 + 2 +", "(1 + 2)", 3)]
    fn test_left_recursion(#[case] text: &str, #[case] expected: &str, #[case] end: usize) {
        let (tokens, matched, consumed) = parse(text, "$sum", MatchOptions::default());
        let end = tokens.iter().enumerate().filter(|(_, t)| !t.flags.skip).nth(end - 1).map(|(i, _)| i + 1).unwrap();

        assert_eq!(shape(&tokens, &matched.unwrap()), expected);
        assert_eq!(consumed, end);
    }

    #[test]
    fn test_no_match_leaves_cursor_and_marks() {
        let (tokens, grammar) = setup("hello 5");
        let rule = grammar.get_rule("$greeting").unwrap();
        let mut hooks = ();
        let mut matcher = Matcher::new(&tokens, grammar, MatchOptions::default(), &mut hooks);

        assert_eq!(matcher.parse(&rule, 0), (None, 0));
        assert!(matcher.touched().iter().all(|t| !t));
        assert_eq!(matcher.furthest(), Some(0));
    }

    #[test]
    fn test_greeting() {
        let (tokens, matched, end) = parse("hello world", "$greeting", MatchOptions::default());
        let op = matched.unwrap();
        let op = op.as_op().unwrap();

        assert_eq!(end, tokens.len());
        assert_eq!(op.alternative.function.as_deref(), Some("greet"));
        assert_eq!(op.params.len(), 2);
        assert_eq!(shape(&tokens, &op.params[1]), "world");
        assert_eq!(op.params[1].as_op().map(|op| op.rule.as_str()), Some("$name"));
    }

    #[rstest]
    #[case::until_follow("say a b c;", "a b c", true)]
    #[case::until_end("say a b c", "a b c", false)]
    fn test_wildcard(#[case] text: &str, #[case] captured: &str, #[case] terminated: bool) {
        let (tokens, matched, _) = parse(text, "$say", MatchOptions::default());
        let op = matched.unwrap();
        let op = op.as_op().unwrap();

        assert_eq!(shape(&tokens, &op.params[1]), captured);
        assert_eq!(op.params.len() == 3, terminated);
    }

    #[test]
    fn test_wildcard_limit() {
        let options = MatchOptions {
            wildcard_limit: Some(2),
            ..MatchOptions::default()
        };
        let (tokens, matched, end) = parse("say a b c;", "$say", options);

        assert_eq!(shape(&tokens, &matched.unwrap().as_op().unwrap().params[1]), "a b");
        assert!(end < tokens.len());
    }

    #[test]
    fn test_empty_and_zero_width_rules() {
        assert_eq!(parse("1", "$empty", MatchOptions::default()).1, None);

        let (_, matched, end) = parse("1", "$optional", MatchOptions::default());
        assert!(matched.unwrap().as_op().unwrap().params.is_empty());
        assert_eq!(end, 0);
    }

    #[rstest]
    #[case("1 + 2 - 3 + 4")]
    #[case("say a b;")]
    #[case("say a b")]
    fn test_prefix_reuse_matches_scratch(#[case] text: &str) {
        for rule in ["$sum", "$say"] {
            let scratch = MatchOptions {
                prefix_reuse: false,
                ..MatchOptions::default()
            };
            let (_, with_reuse, end) = parse(text, rule, MatchOptions::default());
            let (_, without_reuse, scratch_end) = parse(text, rule, scratch);

            assert_eq!(with_reuse, without_reuse);
            assert_eq!(end, scratch_end);
        }
    }

    #[test]
    fn test_shared_prefix_drops_trailing_rule_ref() {
        let plus = Param::Literal(Literal::exact(Kind::Sym, b"+".to_vec()));
        let a = Alternative::new([plus.clone(), Param::rule("$x"), Param::rule("$y")]);
        let b = Alternative::new([plus.clone(), Param::rule("$x"), Param::Wildcard]);
        let c = Alternative::new([plus.clone(), plus.clone()]);

        assert_eq!(shared_prefix(&a, &b, 3, 0), 1);
        assert_eq!(shared_prefix(&a, &c, 3, 0), 1);
        assert_eq!(shared_prefix(&c, &a, 1, 0), 1);
    }

    struct Guarded;

    impl MatchHooks for Guarded {
        fn guard(&mut self, action: &str, tokens: &[Token], matched: &Matched) -> bool {
            let mut text = String::new();
            matched.each_token(&mut |i| text.push_str(&tokens[i].text()));
            action == "not_world" && text != "world"
        }
    }

    #[rstest]
    #[case::accepted("hello there", true)]
    #[case::rejected("hello world", false)]
    fn test_guard(#[case] text: &str, #[case] expected: bool) {
        let (tokens, mut grammar) = setup(text);
        grammar.add_alternative(
            "$guarded",
            Alternative::new([
                Param::Literal(Literal::exact(Kind::Id, b"hello".to_vec())),
                Param::RuleRef {
                    name: SmolStr::new("$name"),
                    guard: Some(SmolStr::new("not_world")),
                },
            ]),
        );
        let rule = grammar.get_rule("$guarded").unwrap();
        let mut hooks = Guarded;
        let mut matcher = Matcher::new(&tokens, grammar, MatchOptions::default(), &mut hooks);

        assert_eq!(matcher.parse(&rule, 0).0.is_some(), expected);
        if !expected {
            assert!(matcher.touched().iter().all(|t| !t));
        }
    }

    #[rstest]
    #[case::default(512, true)]
    #[case::at_limit(4, true)]
    #[case::past_limit(3, false)]
    fn test_wildcard_lookahead_counts_toward_depth(#[case] max_depth: usize, #[case] expected: bool) {
        let (tokens, mut grammar) = setup("go a b end");
        loader::load(
            r#"
            [[rules]]
            name = "$top"
            alternatives = [{ params = ["$inner", "$stop"] }]

            [[rules]]
            name = "$inner"
            alternatives = [{ params = ["$tail"] }]

            [[rules]]
            name = "$tail"
            alternatives = [{ params = ["'go'", "*"] }]

            [[rules]]
            name = "$stop"
            alternatives = [{ params = ["'end'"] }]
            "#,
            &mut Lexicon::default(),
            &mut grammar,
        )
        .unwrap();
        let rule = grammar.get_rule("$top").unwrap();
        let mut hooks = ();
        let options = MatchOptions {
            max_depth,
            ..MatchOptions::default()
        };

        let (matched, _) = Matcher::new(&tokens, grammar, options, &mut hooks).parse(&rule, 0);
        assert_eq!(matched.is_some(), expected);
    }

    #[test]
    fn test_depth_guard() {
        let (tokens, mut grammar) = setup("1");
        grammar.add_alternative("$loop", Alternative::new([Param::rule("$indirect")]));
        grammar.add_alternative("$indirect", Alternative::new([Param::rule("$loop")]));
        let rule = grammar.get_rule("$loop").unwrap();
        let mut hooks = ();
        let options = MatchOptions {
            max_depth: 16,
            ..MatchOptions::default()
        };

        assert_eq!(Matcher::new(&tokens, grammar, options, &mut hooks).parse(&rule, 0), (None, 0));
    }
}
