pub mod error;
pub mod loader;
pub mod rule;

use std::sync::Arc;

use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use error::GrammarError;
use rule::{Alternative, ArgTemplate, FunctionRef, Param, Rule, Template};

pub const START_RULE: &str = "$start";

/// Named rule table.
///
/// Cloning is cheap: the table is shared until one side mutates it, so a
/// matcher can hold a snapshot while the running script edits the grammar.
#[derive(Debug, Clone, Default)]
pub struct Grammar {
    rules: Arc<FxHashMap<SmolStr, Arc<Rule>>>,
}

impl Grammar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing rule or creates an empty one.
    pub fn add_rule(&mut self, name: &str) -> Arc<Rule> {
        Arc::make_mut(&mut self.rules)
            .entry(SmolStr::new(name))
            .or_insert_with(|| Arc::new(Rule::new(name)))
            .clone()
    }

    pub fn get_rule(&self, name: &str) -> Option<Arc<Rule>> {
        self.rules.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    pub fn add_alternative(&mut self, rule: &str, alternative: Alternative) -> Arc<Rule> {
        let entry = Arc::make_mut(&mut self.rules)
            .entry(SmolStr::new(rule))
            .or_insert_with(|| Arc::new(Rule::new(rule)));
        Arc::make_mut(entry)
            .alternatives
            .push(Arc::new(alternative));
        entry.clone()
    }

    /// Positional shorthand: `markers` are 1-based matched-parameter positions
    /// passed to `function`, `0` passes null and a negative marker ends the list.
    pub fn add_operation(
        &mut self,
        rule: &str,
        params: Vec<Param>,
        library: Option<&str>,
        function: &str,
        markers: &[i64],
    ) -> Arc<Rule> {
        let args = markers
            .iter()
            .take_while(|marker| **marker >= 0)
            .map(|marker| ArgTemplate::marker(*marker as usize))
            .collect();

        self.add_alternative(
            rule,
            Alternative::new(params).with_lambda(Template {
                library: library.map(SmolStr::new),
                function: FunctionRef::Name(SmolStr::new(function)),
                args,
            }),
        )
    }

    pub fn remove_rule(&mut self, name: &str) -> Result<Arc<Rule>, GrammarError> {
        Arc::make_mut(&mut self.rules)
            .remove(name)
            .ok_or_else(|| GrammarError::RuleNotFound(SmolStr::new(name)))
    }

    pub fn names(&self) -> impl Iterator<Item = &SmolStr> {
        self.rules.keys()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
