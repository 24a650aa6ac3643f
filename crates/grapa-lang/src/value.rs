use std::{borrow::Cow, fmt, sync::Arc};

use itertools::Itertools;
use smol_str::SmolStr;

use crate::{
    arena::ArenaId,
    grammar::rule::Rule,
    kind::Kind,
    number::{self, Number},
};

/// Weak reference into the session arena.
pub type Pointer = ArenaId<Node>;

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Bytes(Vec<u8>),
    List(Vec<Node>),
    Ptr(Pointer),
    Rule(Arc<Rule>),
}

/// Borrowed view of a library call node.
#[derive(Debug, Clone, PartialEq)]
pub struct CallParts<'a> {
    pub library: Option<Cow<'a, str>>,
    pub function: Cow<'a, str>,
    pub args: &'a [Node],
}

/// A node of an operation tree or a value tree.
///
/// Leaves carry raw bytes interpreted according to `kind`; containers carry
/// ordered, optionally named children. Null is a `SYSID` with no bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: Kind,
    pub name: SmolStr,
    pub payload: Payload,
}

impl Default for Node {
    fn default() -> Self {
        Self::null()
    }
}

impl Node {
    pub fn null() -> Self {
        Self::bytes(Kind::SysId, Vec::new())
    }

    pub fn bytes(kind: Kind, bytes: Vec<u8>) -> Self {
        Self {
            kind,
            name: SmolStr::default(),
            payload: Payload::Bytes(bytes),
        }
    }

    pub fn list(kind: Kind, children: Vec<Node>) -> Self {
        Self {
            kind,
            name: SmolStr::default(),
            payload: Payload::List(children),
        }
    }

    pub fn int(value: i64) -> Self {
        Self::bytes(Kind::Int, number::int_to_bytes(value))
    }

    pub fn float(value: f64) -> Self {
        Self::bytes(Kind::Float, number::float_to_bytes(value))
    }

    pub fn number(value: Number) -> Self {
        match value {
            Number::Int(i) => Self::int(i),
            Number::Float(f) => Self::float(f),
        }
    }

    pub fn boolean(value: bool) -> Self {
        Self::bytes(Kind::Bool, vec![value as u8])
    }

    pub fn str(value: &str) -> Self {
        Self::bytes(Kind::Str, value.as_bytes().to_vec())
    }

    pub fn id(value: &str) -> Self {
        Self::bytes(Kind::Id, value.as_bytes().to_vec())
    }

    pub fn array(children: Vec<Node>) -> Self {
        Self::list(Kind::Array, children)
    }

    pub fn ptr(target: Pointer) -> Self {
        Self {
            kind: Kind::Ptr,
            name: SmolStr::default(),
            payload: Payload::Ptr(target),
        }
    }

    pub fn rule(rule: Arc<Rule>) -> Self {
        Self {
            kind: Kind::Rule,
            name: rule.name.clone(),
            payload: Payload::Rule(rule),
        }
    }

    /// An `ERR` value carrying a machine-readable code and a message.
    pub fn error(code: i64, message: &str) -> Self {
        Self::list(
            Kind::Err,
            vec![
                Self::int(code).with_name("code"),
                Self::str(message).with_name("message"),
            ],
        )
    }

    /// A library call: `OP[library, function, ARRAY[args]]`.
    pub fn call(library: Option<&str>, function: &str, args: Vec<Node>) -> Self {
        let library = library.map(Node::str).unwrap_or_default();
        Self::list(Kind::Op, vec![library, Self::id(function), Self::array(args)])
    }

    /// A user function value. `params` is an `ID`, a `CODE` or `ARRAY` of
    /// them, or null for no parameters.
    pub fn function(params: &Node, body: Node) -> Self {
        let names = match params.kind {
            Kind::Code | Kind::Array | Kind::List => params.children().iter().map(|p| p.text()).collect(),
            _ if params.is_null() => Vec::new(),
            _ => vec![params.text()],
        };
        let slots = names
            .into_iter()
            .map(|name| Self::null().with_name(name.into_owned()))
            .collect();
        Self::list(Kind::Op, vec![Self::list(Kind::List, slots), body])
    }

    /// Decodes `OP[function]`, `OP[function, ARRAY[args]]` and
    /// `OP[library, function, ARRAY[args]]`. A null library means the default.
    pub fn call_parts(&self) -> Option<CallParts<'_>> {
        if self.kind != Kind::Op || self.is_function() {
            return None;
        }

        let (library, function, args) = match self.children() {
            [function] => (None, function, None),
            [function, args] => (None, function, Some(args)),
            [library, function, args] => (Some(library), function, Some(args)),
            _ => return None,
        };
        if !function.kind.is_textual() {
            return None;
        }

        Some(CallParts {
            library: library.filter(|l| !l.is_null()).map(Node::text),
            function: function.text(),
            args: args.map(Node::children).unwrap_or_default(),
        })
    }

    pub fn with_name(mut self, name: impl Into<SmolStr>) -> Self {
        self.name = name.into();
        self
    }

    pub fn is_null(&self) -> bool {
        self.kind == Kind::SysId && matches!(&self.payload, Payload::Bytes(b) if b.is_empty())
    }

    pub fn is_error(&self) -> bool {
        self.kind == Kind::Err
    }

    pub fn is_list(&self) -> bool {
        matches!(self.payload, Payload::List(_))
    }

    /// A user function value: an `OP` whose first child is the parameter list.
    pub fn is_function(&self) -> bool {
        self.kind == Kind::Op
            && matches!(self.children().first(), Some(first) if first.kind == Kind::List)
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_pointer(&self) -> Option<Pointer> {
        match &self.payload {
            Payload::Ptr(ptr) => Some(*ptr),
            _ => None,
        }
    }

    pub fn as_rule(&self) -> Option<&Arc<Rule>> {
        match &self.payload {
            Payload::Rule(rule) => Some(rule),
            _ => None,
        }
    }

    pub fn children(&self) -> &[Node] {
        match &self.payload {
            Payload::List(children) => children,
            _ => &[],
        }
    }

    pub fn into_children(self) -> Vec<Node> {
        match self.payload {
            Payload::List(children) => children,
            _ => Vec::new(),
        }
    }

    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children().iter().find(|child| child.name == name)
    }

    pub fn as_number(&self) -> Option<Number> {
        let bytes = self.as_bytes()?;
        match self.kind {
            Kind::Int | Kind::SysInt => number::bytes_to_int(bytes).map(Number::Int),
            Kind::Float => number::bytes_to_float(bytes).map(Number::Float),
            Kind::Bool => Some(Number::Int(bytes.first().map(|b| *b as i64).unwrap_or(0))),
            _ => None,
        }
    }

    /// The textual content of a leaf, decoded per kind.
    pub fn text(&self) -> Cow<'_, str> {
        match (&self.payload, self.kind) {
            (Payload::Bytes(bytes), kind) if kind.is_textual() => String::from_utf8_lossy(bytes),
            _ => Cow::Owned(self.to_string()),
        }
    }

    pub fn is_truthy(&self) -> bool {
        if self.is_null() || self.is_error() {
            return false;
        }
        match (&self.payload, self.kind) {
            (Payload::Bytes(_), Kind::Bool | Kind::Int | Kind::SysInt | Kind::Float) => {
                self.as_number().map(|n| !n.is_zero()).unwrap_or(false)
            }
            (Payload::Bytes(bytes), _) => !bytes.is_empty(),
            (Payload::List(children), _) => !children.is_empty(),
            (Payload::Ptr(_), _) | (Payload::Rule(_), _) => true,
        }
    }
}

impl From<Number> for Node {
    fn from(value: Number) -> Self {
        Node::number(value)
    }
}

impl From<bool> for Node {
    fn from(value: bool) -> Self {
        Node::boolean(value)
    }
}

impl From<&str> for Node {
    fn from(value: &str) -> Self {
        Node::str(value)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return write!(f, "null");
        }

        match (&self.payload, self.kind) {
            (Payload::Bytes(bytes), Kind::Bool) => {
                write!(f, "{}", bytes.first().map(|b| *b != 0).unwrap_or(false))
            }
            (Payload::Bytes(_), Kind::Int | Kind::SysInt | Kind::Float) => match self.as_number() {
                Some(n) => write!(f, "{}", n),
                None => write!(f, "0x{}", hex(self.as_bytes().unwrap_or_default())),
            },
            (Payload::Bytes(bytes), kind) if kind.is_textual() => {
                write!(f, "{}", String::from_utf8_lossy(bytes))
            }
            (Payload::Bytes(bytes), _) => write!(f, "0x{}", hex(bytes)),
            (Payload::List(children), Kind::Array | Kind::Tuple | Kind::Vector) => {
                write!(f, "[{}]", children.iter().map(display_item).join(", "))
            }
            (Payload::List(children), Kind::Code) => {
                write!(f, "{}", children.iter().map(display_item).join("; "))
            }
            (Payload::List(children), Kind::Err) => {
                write!(f, "$ERR{{{}}}", children.iter().map(display_item).join(", "))
            }
            (Payload::List(children), Kind::Op) => {
                write!(f, "op({})", children.iter().map(display_item).join(", "))
            }
            (Payload::List(children), _) => {
                write!(f, "{{{}}}", children.iter().map(display_item).join(", "))
            }
            (Payload::Ptr(ptr), _) => write!(f, "$PTR({})", ptr.index()),
            (Payload::Rule(rule), _) => write!(f, "$RULE({})", rule.name),
        }
    }
}

fn display_item(node: &Node) -> String {
    let value = match node.kind {
        Kind::Str | Kind::SysStr => format!("{:?}", node.text()),
        _ => node.to_string(),
    };

    if node.name.is_empty() {
        value
    } else {
        format!("{}: {}", node.name, value)
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).join("")
}
