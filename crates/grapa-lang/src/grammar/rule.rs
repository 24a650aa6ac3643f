use std::sync::Arc;

use smallvec::SmallVec;
use smol_str::SmolStr;

use crate::{
    Node, Token,
    kind::Kind,
    number::{Number, bytes_to_float, bytes_to_int},
};

/// Matches one token by kind, registry identity and optionally exact value.
#[derive(Debug, Clone, PartialEq)]
pub struct Literal {
    pub kind: Kind,
    /// `0` accepts any identity.
    pub id: u64,
    pub bytes: Option<Vec<u8>>,
}

impl Literal {
    pub fn kind(kind: Kind) -> Self {
        Self {
            kind,
            id: 0,
            bytes: None,
        }
    }

    pub fn exact(kind: Kind, bytes: Vec<u8>) -> Self {
        Self {
            kind,
            id: 0,
            bytes: Some(bytes),
        }
    }

    pub fn token(token: &Token) -> Self {
        Self {
            kind: token.kind,
            id: token.id,
            bytes: Some(token.value.clone()),
        }
    }

    pub fn matches(&self, token: &Token) -> bool {
        if token.kind != self.kind || (self.id != 0 && token.id != self.id) {
            return false;
        }

        match &self.bytes {
            None => true,
            Some(expected) if token.kind.is_numeric() => {
                let expected = numeric(token.kind, expected);
                expected.is_some() && expected == numeric(token.kind, &token.value)
            }
            Some(expected) => *expected == token.value,
        }
    }
}

fn numeric(kind: Kind, bytes: &[u8]) -> Option<Number> {
    match kind {
        Kind::Float => bytes_to_float(bytes).map(Number::Float),
        _ => bytes_to_int(bytes).map(Number::Int),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Literal(Literal),
    /// Reference to a named rule. A guard is a library function run on the
    /// planned sub-match; an error result rejects the match.
    RuleRef {
        name: SmolStr,
        guard: Option<SmolStr>,
    },
    /// Captures tokens up to wherever the following parameter matches.
    Wildcard,
    /// Inline anonymous rule.
    Group(Arc<Rule>),
    /// The current token's text must be a key of the named `LIST` variable.
    Lookup(SmolStr),
}

impl Param {
    pub fn rule(name: &str) -> Self {
        Param::RuleRef {
            name: SmolStr::new(name),
            guard: None,
        }
    }

    pub fn is_self_ref(&self, rule: &str) -> bool {
        matches!(self, Param::RuleRef { name, .. } if name == rule)
    }

    /// Whether a previously computed match of this parameter can be reused by
    /// a sibling alternative that starts the same way.
    pub fn is_reusable(&self) -> bool {
        match self {
            Param::Literal(_) | Param::Lookup(_) | Param::Group(_) => true,
            Param::RuleRef { guard, .. } => guard.is_none(),
            Param::Wildcard => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionRef {
    Name(SmolStr),
    /// Function name taken from the text of the matched parameter at this position.
    Marker(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArgTemplate {
    /// 1-based matched parameter position; `0` passes null.
    Marker {
        pos: usize,
        name: Option<SmolStr>,
        spread: bool,
    },
    Const(Node),
}

impl ArgTemplate {
    pub fn marker(pos: usize) -> Self {
        ArgTemplate::Marker {
            pos,
            name: None,
            spread: false,
        }
    }
}

/// Builds a call from matched parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub library: Option<SmolStr>,
    pub function: FunctionRef,
    pub args: Vec<ArgTemplate>,
}

/// One candidate parameter sequence of a rule.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Alternative {
    pub library: Option<SmolStr>,
    pub function: Option<SmolStr>,
    pub params: SmallVec<[Param; 4]>,
    pub lambda: Option<Template>,
}

impl Alternative {
    pub fn new(params: impl IntoIterator<Item = Param>) -> Self {
        Self {
            params: params.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_function(mut self, library: Option<&str>, function: &str) -> Self {
        self.library = library.map(SmolStr::new);
        self.function = Some(SmolStr::new(function));
        self
    }

    pub fn with_lambda(mut self, lambda: Template) -> Self {
        self.lambda = Some(lambda);
        self
    }

    pub fn is_left_recursive(&self, rule: &str) -> bool {
        self.params
            .first()
            .map(|first| first.is_self_ref(rule))
            .unwrap_or(false)
    }

    /// True when planning produces a call rather than a plain sequence.
    pub fn is_named(&self) -> bool {
        self.function.is_some() || self.lambda.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Rule {
    pub name: SmolStr,
    pub alternatives: Vec<Arc<Alternative>>,
}

impl Rule {
    pub fn new(name: &str) -> Self {
        Self {
            name: SmolStr::new(name),
            alternatives: Vec::new(),
        }
    }

    pub fn with_alternatives(name: &str, alternatives: Vec<Alternative>) -> Self {
        Self {
            name: SmolStr::new(name),
            alternatives: alternatives.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn is_left_recursive(&self) -> bool {
        !self.name.is_empty()
            && self
                .alternatives
                .iter()
                .any(|alt| alt.is_left_recursive(&self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::number::int_to_bytes;
    use rstest::rstest;

    #[rstest]
    #[case::same_number(Literal::exact(Kind::Int, int_to_bytes(1)), Token::new(Kind::Int, vec![0x01]), true)]
    #[case::padded_number(Literal::exact(Kind::Int, vec![0x00, 0x01]), Token::new(Kind::Int, vec![0x01]), true)]
    #[case::other_number(Literal::exact(Kind::Int, int_to_bytes(2)), Token::new(Kind::Int, vec![0x01]), false)]
    #[case::any_of_kind(Literal::kind(Kind::Id), Token::new(Kind::Id, b"x".to_vec()), true)]
    #[case::wrong_kind(Literal::kind(Kind::Id), Token::new(Kind::Str, b"x".to_vec()), false)]
    #[case::text(Literal::exact(Kind::Id, b"if".to_vec()), Token::new(Kind::Id, b"iff".to_vec()), false)]
    fn test_literal_matches(#[case] literal: Literal, #[case] token: Token, #[case] expected: bool) {
        assert_eq!(literal.matches(&token), expected);
    }

    #[test]
    fn test_literal_with_identity() {
        let mut token = Token::new(Kind::Sym, b"+".to_vec());
        token.id = 7;
        let literal = Literal::token(&token);

        assert!(literal.matches(&token));
        token.id = 8;
        assert!(!literal.matches(&token));
    }

    #[test]
    fn test_left_recursion_detection() {
        let rule = Rule::with_alternatives(
            "$sum",
            vec![
                Alternative::new([Param::rule("$sum"), Param::Literal(Literal::exact(Kind::Sym, b"+".to_vec()))]),
                Alternative::new([Param::rule("$num")]),
            ],
        );
        assert!(rule.is_left_recursive());
        assert!(!Rule::with_alternatives("$num", vec![Alternative::new([Param::rule("$sum")])]).is_left_recursive());
    }
}
