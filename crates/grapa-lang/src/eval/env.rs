use itertools::Itertools;
use rustc_hash::{FxBuildHasher, FxHashMap};
use smol_str::SmolStr;

use crate::Node;

type Scope = FxHashMap<SmolStr, Node>;

/// Variable namespace: a stack of scopes, the bottom one global.
#[derive(Debug, Clone)]
pub struct Env {
    scopes: Vec<Scope>,
    last: Node,
}

impl Default for Env {
    fn default() -> Self {
        Self {
            scopes: vec![FxHashMap::with_capacity_and_hasher(64, FxBuildHasher)],
            last: Node::null(),
        }
    }
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn get(&self, name: &str) -> Option<&Node> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    /// Defines `name` in the innermost scope.
    #[inline(always)]
    pub fn define(&mut self, name: &str, value: Node) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(SmolStr::new(name), value.with_name(name));
        }
    }

    /// Updates the nearest existing binding, or defines one in the innermost scope.
    pub fn set(&mut self, name: &str, value: Node) {
        match self.scopes.iter_mut().rev().find(|scope| scope.contains_key(name)) {
            Some(scope) => {
                scope.insert(SmolStr::new(name), value.with_name(name));
            }
            None => self.define(name, value),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Node> {
        self.scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.remove(name))
    }

    pub fn push(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// Pops the innermost scope and returns its bindings sorted by name. The
    /// global scope is never popped.
    pub fn pop(&mut self) -> Vec<Node> {
        if self.scopes.len() <= 1 {
            return Vec::new();
        }
        self.scopes
            .pop()
            .map(|scope| scope.into_values().sorted_by(|a, b| a.name.cmp(&b.name)).collect())
            .unwrap_or_default()
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Visible bindings, inner scopes shadowing outer ones, sorted by name.
    pub fn variables(&self) -> Vec<(SmolStr, Node)> {
        let mut visible: FxHashMap<&SmolStr, &Node> = FxHashMap::default();
        for scope in &self.scopes {
            visible.extend(scope.iter());
        }
        visible
            .into_iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .sorted_by(|a, b| a.0.cmp(&b.0))
            .collect()
    }

    pub fn last(&self) -> &Node {
        &self.last
    }

    pub fn set_last(&mut self, value: Node) {
        self.last = value;
    }

    /// Drops every binding and the last result.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
