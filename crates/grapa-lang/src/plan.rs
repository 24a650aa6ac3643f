use smol_str::SmolStr;
use tracing::trace;

use crate::{
    Engine, Node, Token,
    eval::error::RuntimeError,
    grammar::rule::{Alternative, ArgTemplate, FunctionRef, Param, Template},
    kind::Kind,
    library::{self, SYSTEM_LIBRARY},
    matcher::{Matched, OpMatch},
};

/// Turns a parameter tree into an operation tree.
///
/// Captured tokens become pointers into the session arena, so `engine.handles`
/// must hold one handle per token of `tokens`.
pub struct Planner<'a> {
    engine: &'a Engine,
    tokens: &'a [Token],
}

impl<'a> Planner<'a> {
    pub fn new(engine: &'a Engine, tokens: &'a [Token]) -> Self {
        Self { engine, tokens }
    }

    pub fn plan(&self, matched: &Matched) -> Result<Node, RuntimeError> {
        match matched {
            Matched::Token(i) => Ok(self.token(*i)),
            Matched::Capture(captured) => Ok(Node::array(
                captured
                    .iter()
                    .filter_map(|i| self.engine.handles.get(*i).copied())
                    .map(Node::ptr)
                    .collect(),
            )),
            Matched::Lookup { value, .. } => Ok(value.clone()),
            Matched::Op(op) => self.plan_op(op),
        }
    }

    fn token(&self, index: usize) -> Node {
        self.tokens
            .get(index)
            .map(Token::to_node)
            .unwrap_or_default()
    }

    fn plan_op(&self, op: &OpMatch) -> Result<Node, RuntimeError> {
        let alternative = &op.alternative;
        trace!(rule = %op.rule, params = op.params.len(), "plan");

        if let Some(template) = &alternative.lambda {
            return self.plan_template(op, template);
        }

        match &alternative.function {
            Some(function) => {
                let args = op
                    .params
                    .iter()
                    .zip(alternative.params.iter())
                    .map(|(matched, param)| {
                        let node = self.plan(matched)?;
                        Ok(match param {
                            Param::RuleRef { name, .. } if node.name.is_empty() => {
                                node.with_name(name.trim_start_matches('$'))
                            }
                            _ => node,
                        })
                    })
                    .collect::<Result<Vec<_>, RuntimeError>>()?;
                self.call(alternative.library.as_deref(), function, args)
            }
            None => self.plan_sequence(op, alternative),
        }
    }

    /// An unnamed alternative: literal tokens are punctuation, everything
    /// else is kept and nested sequences are flattened.
    fn plan_sequence(&self, op: &OpMatch, alternative: &Alternative) -> Result<Node, RuntimeError> {
        if let [Matched::Token(i)] = op.params.as_slice() {
            return Ok(self.token(*i));
        }

        let mut children = Vec::with_capacity(op.params.len());
        for (matched, param) in op.params.iter().zip(alternative.params.iter()) {
            if matches!((matched, param), (Matched::Token(_), Param::Literal(_))) {
                continue;
            }
            let node = self.plan(matched)?;
            match node.kind {
                Kind::Code => children.extend(node.into_children()),
                _ => children.push(node),
            }
        }

        Ok(match children.len() {
            0 => Node::null(),
            1 => children.pop().unwrap_or_default(),
            _ => Node::list(Kind::Code, children),
        })
    }

    fn plan_template(&self, op: &OpMatch, template: &Template) -> Result<Node, RuntimeError> {
        let function = match &template.function {
            FunctionRef::Name(name) => name.clone(),
            FunctionRef::Marker(pos) => match self.marker(op, *pos)? {
                Some(node) => SmolStr::new(node.text()),
                None => return Err(RuntimeError::NotDefined(SmolStr::new(format!("${pos}")))),
            },
        };

        let mut args = Vec::with_capacity(template.args.len());
        for arg in &template.args {
            match arg {
                ArgTemplate::Const(node) => args.push(node.clone()),
                ArgTemplate::Marker { pos, name, spread } => {
                    let node = self.marker(op, *pos)?.unwrap_or_default();
                    if *spread && matches!(node.kind, Kind::Code | Kind::Array) {
                        args.extend(node.into_children());
                        continue;
                    }
                    args.push(match name {
                        Some(name) => node.with_name(name.clone()),
                        None => node,
                    });
                }
            }
        }

        self.call(template.library.as_deref(), &function, args)
    }

    /// The planned parameter at a 1-based position; `0` and positions past the
    /// end yield `None`.
    fn marker(&self, op: &OpMatch, pos: usize) -> Result<Option<Node>, RuntimeError> {
        match pos.checked_sub(1).and_then(|i| op.params.get(i)) {
            Some(matched) => self.plan(matched).map(Some),
            None => Ok(None),
        }
    }

    fn call(&self, library: Option<&str>, function: &str, args: Vec<Node>) -> Result<Node, RuntimeError> {
        let name = library.unwrap_or(SYSTEM_LIBRARY);
        let resolved = library::load_library(name)?;
        let node = Node::call(library, function, args);

        if self.engine.options.optimize {
            Ok(resolved.optimize(self.engine, node, function))
        } else {
            Ok(node)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Options,
        lexer::{read_lexicon, tokenize},
        matcher::Matcher,
    };
    use rstest::rstest;

    fn plan(engine: &mut Engine, text: &str, rule: &str) -> Node {
        let tokens = tokenize(&read_lexicon(&engine.lexicon), text);
        engine.handles = tokens.iter().map(|t| engine.arena.alloc(t.to_node())).collect();
        let grammar = engine.grammar.clone();
        let rule = grammar.get_rule(rule).unwrap();
        let options = engine.options.match_options();
        let (matched, _) = Matcher::new(&tokens, grammar, options, &mut ()).parse(&rule, 0);
        Planner::new(engine, &tokens).plan(&matched.unwrap()).unwrap()
    }

    #[rstest]
    #[case::folded(true, "3")]
    #[case::call(false, "op(null, add, [1, 2])")]
    fn test_optimize(#[case] optimize: bool, #[case] expected: &str) {
        let mut engine = Engine::with_options(Options {
            optimize,
            ..Options::default()
        });

        assert_eq!(plan(&mut engine, "1 + 2", "$expr").to_string(), expected);
    }

    #[test]
    fn test_sequence_flattens_statements() {
        let mut engine = Engine::with_options(Options {
            optimize: false,
            ..Options::default()
        });
        let node = plan(&mut engine, "a = 1; b = 2; c = 3", "$commands");

        assert_eq!(node.kind, Kind::Code);
        assert_eq!(node.children().len(), 3);
        assert!(node.children().iter().all(|c| c.call_parts().is_some_and(|p| p.function == "setvar")));
    }

    #[test]
    fn test_marker_function_and_spread() {
        let mut engine = Engine::default();
        let node = plan(&mut engine, "f(1, x: 2, 3)", "$expr");
        let parts = node.call_parts().unwrap();

        assert_eq!(parts.function, "f");
        assert_eq!(parts.args.len(), 3);
        assert_eq!(parts.args[1], Node::int(2).with_name("x"));
    }

    #[test]
    fn test_single_token_collapses() {
        let mut engine = Engine::default();
        assert_eq!(plan(&mut engine, "\"hi\"", "$expr"), Node::str("hi"));
    }
}
