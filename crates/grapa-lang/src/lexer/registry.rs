use std::hash::Hasher;

use rustc_hash::{FxHashMap, FxHasher};
use smol_str::SmolStr;

use super::token::{Token, TokenFlags};
use crate::kind::Kind;

/// Literal tokens known to the lexer, kept longest first.
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    tokens: FxHashMap<u64, Token>,
    keys: FxHashMap<(Kind, Vec<u8>), u64>,
    order: Vec<u64>,
}

/// Identity hash of a token: its kind tag followed by its bytes.
pub fn token_id(kind: Kind, bytes: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write_u8(kind.tag());
    hasher.write(bytes);
    match hasher.finish() {
        0 => 1,
        id => id,
    }
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Registers a literal. Re-registering the same `(kind, literal)` only updates `skip`.
    pub fn register(&mut self, kind: Kind, name: &str, skip: bool, literal: &[u8]) -> u64 {
        let flags = TokenFlags {
            skip,
            ..TokenFlags::default()
        };
        self.register_with(kind, name, flags, literal)
    }

    pub fn register_with(
        &mut self,
        kind: Kind,
        name: &str,
        flags: TokenFlags,
        literal: &[u8],
    ) -> u64 {
        if let Some(id) = self.keys.get(&(kind, literal.to_vec())).copied() {
            if let Some(existing) = self.tokens.get_mut(&id) {
                existing.flags.skip = flags.skip;
            }
            return id;
        }

        let mut id = token_id(kind, literal);
        while self.tokens.contains_key(&id) {
            id = id.wrapping_add(1).max(1);
        }

        let token = Token {
            kind,
            id,
            name: SmolStr::new(name),
            value: literal.to_vec(),
            flags,
            offset: 0,
        };

        // after every entry at least as long, so equal lengths keep insertion order
        let at = self
            .order
            .partition_point(|other| self.tokens[other].value.len() >= literal.len());
        self.order.insert(at, id);
        self.keys.insert((kind, literal.to_vec()), id);
        self.tokens.insert(id, token);
        id
    }

    pub fn remove(&mut self, kind: Kind, literal: &[u8]) -> Option<Token> {
        let id = self.keys.remove(&(kind, literal.to_vec()))?;
        self.order.retain(|other| *other != id);
        self.tokens.remove(&id)
    }

    pub fn lookup(&self, kind: Kind, literal: &[u8]) -> Option<&Token> {
        self.keys
            .get(&(kind, literal.to_vec()))
            .and_then(|id| self.tokens.get(id))
    }

    pub fn lookup_id(&self, kind: Kind, id: u64) -> Option<&Token> {
        self.tokens.get(&id).filter(|token| token.kind == kind)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Token> {
        self.iter().find(|token| token.name == name)
    }

    /// Entries in longest-first order.
    pub fn iter(&self) -> impl Iterator<Item = &Token> {
        self.order.iter().filter_map(|id| self.tokens.get(id))
    }

    /// The longest registered literal of `kind` that is a prefix of `input`.
    pub fn longest_prefix(&self, kind: Kind, input: &[u8]) -> Option<&Token> {
        self.iter()
            .find(|token| token.kind == kind && !token.value.is_empty() && input.starts_with(&token.value))
    }

    /// True if some literal of `kind` is strictly longer than `prefix` and starts with it.
    pub fn has_longer(&self, kind: Kind, prefix: &[u8]) -> bool {
        self.iter()
            .take_while(|token| token.value.len() > prefix.len())
            .any(|token| token.kind == kind && token.value.starts_with(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = TokenRegistry::new();
        let first = registry.register(Kind::Sym, "$PLUS", false, b"+");
        let second = registry.register(Kind::Sym, "$PLUS", true, b"+");

        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup(Kind::Sym, b"+").unwrap().flags.skip);
    }

    #[test]
    fn test_longest_first_order() {
        let mut registry = TokenRegistry::new();
        registry.register(Kind::Sym, "", false, b"+");
        registry.register(Kind::Sym, "", false, b"+=");
        registry.register(Kind::Sym, "", false, b"-");
        registry.register(Kind::Sym, "", false, b"<<=");

        let order = registry
            .iter()
            .map(|t| String::from_utf8_lossy(&t.value).to_string())
            .collect::<Vec<_>>();
        assert_eq!(order, vec!["<<=", "+=", "+", "-"]);
    }

    #[rstest]
    #[case::longest(b"+=1".as_slice(), Some(b"+=".as_slice()))]
    #[case::single(b"+1".as_slice(), Some(b"+".as_slice()))]
    #[case::none(b"-".as_slice(), None)]
    fn test_longest_prefix(#[case] input: &[u8], #[case] expected: Option<&[u8]>) {
        let mut registry = TokenRegistry::new();
        registry.register(Kind::Sym, "", false, b"+");
        registry.register(Kind::Sym, "", false, b"+=");

        assert_eq!(
            registry.longest_prefix(Kind::Sym, input).map(|t| t.value.as_slice()),
            expected
        );
    }

    #[test]
    fn test_has_longer() {
        let mut registry = TokenRegistry::new();
        registry.register(Kind::Sym, "", false, b"+=");

        assert!(registry.has_longer(Kind::Sym, b"+"));
        assert!(!registry.has_longer(Kind::Sym, b"+="));
        assert!(!registry.has_longer(Kind::SysSym, b"+"));
    }

    #[test]
    fn test_lookup_by_id_and_remove() {
        let mut registry = TokenRegistry::new();
        let id = registry.register(Kind::Id, "$NULL", false, b"null");

        assert_eq!(registry.lookup_id(Kind::Id, id).map(|t| t.name.as_str()), Some("$NULL"));
        assert_eq!(registry.lookup_id(Kind::Sym, id), None);
        assert_eq!(registry.find_by_name("$NULL").map(|t| t.id), Some(id));

        assert!(registry.remove(Kind::Id, b"null").is_some());
        assert!(registry.is_empty());
        assert_eq!(registry.lookup(Kind::Id, b"null"), None);
    }
}
