pub mod env;
pub mod error;

use rustc_hash::FxHashSet;
use smol_str::SmolStr;
use tracing::trace;

use crate::{
    Engine, Node,
    kind::Kind,
    library::{self, SYSTEM_LIBRARY},
    value::Payload,
};
use error::{FatalError, RuntimeError};

impl Engine {
    /// Reduces an operation tree to a value.
    ///
    /// Library failures come back as `ERR` values; only fatal conditions are
    /// returned as `Err`.
    pub fn process(&mut self, node: &Node) -> Result<Node, FatalError> {
        match &node.payload {
            Payload::Ptr(_) => self.deref(node),
            Payload::List(children) => match node.kind {
                Kind::Code => self.process_code(children),
                Kind::Op if node.is_function() => Ok(node.clone()),
                Kind::Op => match node.call_parts() {
                    Some(call) => {
                        let library = call.library.map(SmolStr::new);
                        let function = SmolStr::new(call.function);
                        let args = call.args.to_vec();
                        match self.run_call(library.as_deref(), &function, args) {
                            Ok(value) => Ok(renamed(value, node)),
                            Err(RuntimeError::Fatal(fatal)) => Err(fatal),
                            Err(e) => Ok(e.to_node()),
                        }
                    }
                    None => Ok(node.clone()),
                },
                Kind::Err => Ok(node.clone()),
                _ => self.resolve_children(node),
            },
            _ => Ok(node.clone()),
        }
    }

    fn process_code(&mut self, children: &[Node]) -> Result<Node, FatalError> {
        let mut last = Node::null();
        for child in children {
            if self.exited {
                break;
            }
            last = self.process(child)?;
            if last.is_error() {
                trace!(error = %last, "block short-circuited");
                break;
            }
        }
        Ok(last)
    }

    /// Follows a pointer chain to the value it ends in.
    fn deref(&self, node: &Node) -> Result<Node, FatalError> {
        let mut seen = FxHashSet::default();
        let mut current = node;

        while let Some(ptr) = current.as_pointer() {
            if !seen.insert(ptr.index()) {
                return Err(FatalError::PointerCycle(ptr.index()));
            }
            if seen.len() > self.options.max_depth {
                return Err(FatalError::DepthExceeded(self.options.max_depth));
            }
            current = self
                .arena
                .get(ptr)
                .ok_or(FatalError::DanglingPointer(ptr.index()))?;
        }

        Ok(renamed(current.clone(), node))
    }

    fn resolve_children(&self, node: &Node) -> Result<Node, FatalError> {
        if !node.children().iter().any(|c| c.as_pointer().is_some() || c.is_list()) {
            return Ok(node.clone());
        }

        let children = node
            .children()
            .iter()
            .map(|child| match &child.payload {
                Payload::Ptr(_) => self.deref(child),
                Payload::List(_) if child.kind != Kind::Op => self.resolve_children(child),
                _ => Ok(child.clone()),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Node::list(node.kind, children).with_name(node.name.clone()))
    }

    /// Replaces every pointer in `node` by its target, operation trees included.
    pub fn resolve_pointers(&self, node: &Node) -> Result<Node, FatalError> {
        match &node.payload {
            Payload::Ptr(_) => self.deref(node),
            Payload::List(children) => {
                let children = children
                    .iter()
                    .map(|child| self.resolve_pointers(child))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Node::list(node.kind, children).with_name(node.name.clone()))
            }
            _ => Ok(node.clone()),
        }
    }

    /// Evaluates an argument of an eager call. An `ERR` result is raised so
    /// that the call itself fails with it.
    pub fn eval_arg(&mut self, node: &Node) -> Result<Node, RuntimeError> {
        let value = self.process(node)?;
        if value.is_error() {
            return Err(RuntimeError::Raised(value));
        }
        Ok(value)
    }

    /// Evaluates a branch body; an `ERR` result is returned as a value.
    pub fn eval_branch(&mut self, node: &Node) -> Result<Node, RuntimeError> {
        Ok(self.process(node)?)
    }

    pub fn eval_args(&mut self, args: Vec<Node>) -> Result<Vec<Node>, RuntimeError> {
        args.into_iter()
            .map(|arg| {
                let value = self.eval_arg(&arg)?;
                Ok(if arg.name.is_empty() { value } else { value.with_name(arg.name) })
            })
            .collect()
    }

    /// Runs `function` from `library` (the system library when `None`) with
    /// unevaluated `args`.
    pub fn run_call(&mut self, library: Option<&str>, function: &str, args: Vec<Node>) -> Result<Node, RuntimeError> {
        let library = library::load_library(library.unwrap_or(SYSTEM_LIBRARY))?;
        if self.depth >= self.options.max_depth {
            return Err(RuntimeError::RecursionLimit(self.options.max_depth));
        }

        trace!(library = library.name(), function, args = args.len(), "call");
        self.depth += 1;
        let result = library.run(self, function, args);
        self.depth -= 1;
        result
    }

    /// Calls a user function value with evaluated arguments.
    ///
    /// Named arguments fill the slot of the same name, the rest fill the
    /// remaining slots in order and slots left over are null.
    pub fn invoke(&mut self, function: &Node, args: Vec<Node>) -> Result<Node, RuntimeError> {
        let [slots, body] = function.children() else {
            return Err(RuntimeError::invalid_types("call", std::slice::from_ref(function)));
        };
        let names = slots.children().iter().map(|slot| slot.name.clone()).collect::<Vec<_>>();
        let mut bound: Vec<Option<Node>> = vec![None; names.len()];

        let mut positional = Vec::with_capacity(args.len());
        for arg in args {
            match names.iter().position(|name| *name == arg.name && !arg.name.is_empty()) {
                Some(i) if bound[i].is_none() => bound[i] = Some(arg),
                _ => positional.push(arg),
            }
        }
        let mut positional = positional.into_iter();
        for slot in bound.iter_mut().filter(|slot| slot.is_none()) {
            match positional.next() {
                Some(arg) => *slot = Some(arg),
                None => break,
            }
        }

        if self.depth >= self.options.max_depth {
            return Err(RuntimeError::RecursionLimit(self.options.max_depth));
        }
        self.depth += 1;
        self.env.push();
        for (name, value) in names.iter().zip(bound) {
            self.env.define(name, value.unwrap_or_default());
        }
        let result = self.process(body);
        self.env.pop();
        self.depth -= 1;

        Ok(result?)
    }
}

/// Carries the name of the evaluated node over to its value.
fn renamed(value: Node, from: &Node) -> Node {
    if from.name.is_empty() {
        value
    } else {
        value.with_name(from.name.clone())
    }
}
