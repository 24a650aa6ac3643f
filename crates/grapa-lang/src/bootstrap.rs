use crate::{
    grammar::{Grammar, error::GrammarError, loader},
    lexer::Lexicon,
};

/// Tokens and rules every default engine starts with.
pub const BASE_GRAMMAR: &str = include_str!("../grammar/base.toml");

pub fn install(lexicon: &mut Lexicon, grammar: &mut Grammar) -> Result<(), GrammarError> {
    loader::load(BASE_GRAMMAR, lexicon, grammar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{grammar::START_RULE, kind::Kind};
    use rstest::rstest;

    #[test]
    fn test_base_grammar_installs() {
        let mut lexicon = Lexicon::default();
        let mut grammar = Grammar::new();
        install(&mut lexicon, &mut grammar).unwrap();

        assert!(grammar.contains(START_RULE));
        assert!(grammar.get_rule("$sum").is_some_and(|rule| rule.is_left_recursive()));
        assert!(lexicon.registry.lookup(Kind::SysSym, b"[").is_some_and(|t| t.flags.start));
    }

    #[rstest]
    #[case::run(b"\n", true)]
    #[case::space(b" ", false)]
    fn test_newline_runs(#[case] literal: &[u8], #[case] run: bool) {
        let mut lexicon = Lexicon::default();
        install(&mut lexicon, &mut Grammar::new()).unwrap();

        let token = lexicon.registry.lookup(Kind::Sym, literal).unwrap();
        assert!(token.flags.skip);
        assert_eq!(token.flags.run, run);
    }
}
