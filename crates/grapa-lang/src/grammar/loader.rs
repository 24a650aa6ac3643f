//! TOML grammar descriptions.
//!
//! A description configures character classes, registers literal tokens and
//! appends rule alternatives:
//!
//! ```toml
//! [classes]
//! sym = "+-*/"
//!
//! [[tokens]]
//! kind = "SYM"
//! text = "+="
//! flags = ["run"]
//!
//! [[rules]]
//! name = "$sum"
//! alternatives = [
//!     { params = ["$sum", "'+'", "$num"], op = "add", args = [1, 3] },
//!     { params = ["$num"] },
//! ]
//! ```
use std::str::FromStr;

use rustc_hash::FxHashMap;
use serde::Deserialize;
use smol_str::SmolStr;

use super::{
    Grammar,
    error::GrammarError,
    rule::{Alternative, ArgTemplate, FunctionRef, Literal, Param, Rule, Template},
};
use crate::{
    Node,
    kind::Kind,
    lexer::{
        Lexicon,
        charclass::ClassName,
        token::{TokenFlag, TokenFlags},
        tokenize,
    },
    number::{decimal_to_bytes, float_to_bytes},
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GrammarFile {
    #[serde(default)]
    pub classes: FxHashMap<String, String>,
    #[serde(default)]
    pub tokens: Vec<TokenSpec>,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenSpec {
    pub kind: String,
    pub text: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleSpec {
    pub name: String,
    #[serde(default)]
    pub alternatives: Vec<AlternativeSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlternativeSpec {
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    pub op: Option<OpSpec>,
    pub lib: Option<String>,
    pub args: Option<Vec<ArgSpec>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ParamSpec {
    Text(String),
    Group { group: Vec<Vec<ParamSpec>> },
    Rule { rule: String, guard: Option<String> },
    Lookup { lookup: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OpSpec {
    Name(String),
    Marker { marker: usize },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ArgSpec {
    Pos(usize),
    Marker {
        pos: usize,
        #[serde(default)]
        spread: bool,
        name: Option<String>,
    },
    Str { str: String },
    Int { int: i64 },
    Float { float: f64 },
    Id { id: String },
    Bool { bool: bool },
    Null { null: bool },
}

impl FromStr for GrammarFile {
    type Err = GrammarError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        toml::from_str(text).map_err(|e| GrammarError::InvalidDescription(e.to_string()))
    }
}

impl GrammarFile {
    /// Applies classes, then tokens, then rules, so rule literals lex against
    /// the tokens declared in the same file.
    pub fn apply(&self, lexicon: &mut Lexicon, grammar: &mut Grammar) -> Result<(), GrammarError> {
        for (name, members) in &self.classes {
            let class =
                ClassName::from_str(name).map_err(|_| GrammarError::UnknownClass(name.clone()))?;
            lexicon.classes.set(class, members.as_bytes());
        }

        for token in &self.tokens {
            let kind = parse_kind(&token.kind)?;
            let flags = parse_flags(&token.flags)?;
            lexicon
                .registry
                .register_with(kind, &token.name, flags, token.text.as_bytes());
        }

        for rule in &self.rules {
            grammar.add_rule(&rule.name);
            for alternative in &rule.alternatives {
                let alternative = alternative.build(&rule.name, lexicon)?;
                grammar.add_alternative(&rule.name, alternative);
            }
        }

        Ok(())
    }
}

impl AlternativeSpec {
    pub fn build(&self, rule: &str, lexicon: &Lexicon) -> Result<Alternative, GrammarError> {
        let params = self
            .params
            .iter()
            .map(|param| param.build(lexicon))
            .collect::<Result<Vec<_>, _>>()?;
        let alternative = Alternative::new(params);

        match (&self.op, &self.args) {
            (None, None) => Ok(alternative),
            (None, Some(_)) => Err(GrammarError::InvalidArgument(SmolStr::new(rule))),
            (Some(OpSpec::Name(name)), None) => {
                Ok(alternative.with_function(self.lib.as_deref(), name))
            }
            (Some(op), args) => {
                let function = match op {
                    OpSpec::Name(name) => FunctionRef::Name(SmolStr::new(name)),
                    OpSpec::Marker { marker } => FunctionRef::Marker(*marker),
                };
                let args = args
                    .iter()
                    .flatten()
                    .map(ArgSpec::build)
                    .collect::<Vec<_>>();

                Ok(alternative.with_lambda(Template {
                    library: self.lib.as_deref().map(SmolStr::new),
                    function,
                    args,
                }))
            }
        }
    }
}

impl ParamSpec {
    pub fn build(&self, lexicon: &Lexicon) -> Result<Param, GrammarError> {
        match self {
            ParamSpec::Text(text) => parse_param(text, lexicon),
            ParamSpec::Group { group } => {
                let alternatives = group
                    .iter()
                    .map(|params| {
                        params
                            .iter()
                            .map(|param| param.build(lexicon))
                            .collect::<Result<Vec<_>, _>>()
                            .map(Alternative::new)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Param::Group(Rule::with_alternatives("", alternatives).into()))
            }
            ParamSpec::Rule { rule, guard } => Ok(Param::RuleRef {
                name: SmolStr::new(rule),
                guard: guard.as_deref().map(SmolStr::new),
            }),
            ParamSpec::Lookup { lookup } => Ok(Param::Lookup(SmolStr::new(lookup))),
        }
    }
}

impl ArgSpec {
    fn build(&self) -> ArgTemplate {
        match self {
            ArgSpec::Pos(pos) => ArgTemplate::marker(*pos),
            ArgSpec::Marker { pos, spread, name } => ArgTemplate::Marker {
                pos: *pos,
                name: name.as_deref().map(SmolStr::new),
                spread: *spread,
            },
            ArgSpec::Str { str } => ArgTemplate::Const(Node::str(str)),
            ArgSpec::Int { int } => ArgTemplate::Const(Node::int(*int)),
            ArgSpec::Float { float } => ArgTemplate::Const(Node::float(*float)),
            ArgSpec::Id { id } => ArgTemplate::Const(Node::id(id)),
            ArgSpec::Bool { bool } => ArgTemplate::Const(Node::boolean(*bool)),
            ArgSpec::Null { .. } => ArgTemplate::Const(Node::null()),
        }
    }
}

/// Parses the textual parameter forms: `$rule`, `*`, `'text'`, `@NAME`,
/// `KIND` and `KIND:text`.
pub fn parse_param(text: &str, lexicon: &Lexicon) -> Result<Param, GrammarError> {
    if text == "*" {
        return Ok(Param::Wildcard);
    }

    if let Some(quoted) = text
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
    {
        let tokens = tokenize(lexicon, quoted);
        return match tokens.as_slice() {
            [token] if token.is_registered() => Ok(Param::Literal(Literal::token(token))),
            [token] => Ok(Param::Literal(Literal::exact(token.kind, token.value.clone()))),
            _ => Err(GrammarError::InvalidLiteral(quoted.to_string())),
        };
    }

    if text.len() > 1 && text.starts_with('$') {
        return Ok(Param::rule(text));
    }

    if let Some(name) = text.strip_prefix('@') {
        return lexicon
            .registry
            .find_by_name(name)
            .map(|token| Param::Literal(Literal::token(token)))
            .ok_or_else(|| GrammarError::UnknownToken(name.to_string()));
    }

    match text.split_once(':') {
        Some((kind, value)) => {
            let kind = parse_kind(kind)?;
            let bytes = match kind {
                Kind::Int | Kind::SysInt => decimal_to_bytes(value)
                    .ok_or_else(|| GrammarError::InvalidParam(text.to_string()))?,
                Kind::Float => value
                    .parse::<f64>()
                    .map(float_to_bytes)
                    .map_err(|_| GrammarError::InvalidParam(text.to_string()))?,
                _ => value.as_bytes().to_vec(),
            };
            Ok(Param::Literal(Literal::exact(kind, bytes)))
        }
        None => Ok(Param::Literal(Literal::kind(parse_kind(text)?))),
    }
}

pub fn parse_kind(text: &str) -> Result<Kind, GrammarError> {
    Kind::from_str(&text.to_ascii_uppercase()).map_err(|_| GrammarError::UnknownKind(text.to_string()))
}

pub fn parse_flags(flags: &[String]) -> Result<TokenFlags, GrammarError> {
    flags.iter().try_fold(TokenFlags::default(), |acc, flag| {
        TokenFlag::from_str(&flag.to_ascii_lowercase())
            .map(|flag| acc.with(flag))
            .map_err(|_| GrammarError::UnknownFlag(flag.clone()))
    })
}

/// Parses `text` and applies it in one step.
pub fn load(text: &str, lexicon: &mut Lexicon, grammar: &mut Grammar) -> Result<(), GrammarError> {
    GrammarFile::from_str(text)?.apply(lexicon, grammar)
}
