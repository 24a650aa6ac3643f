pub mod charclass;
pub mod error;
pub mod markup;
pub mod registry;
pub mod token;

use std::{
    collections::VecDeque,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use tracing::warn;

use crate::{
    kind::Kind,
    number::{bin_to_bytes, decimal_to_bytes, float_to_bytes, hex_to_bytes},
};
use charclass::CharClasses;
use error::LexError;
use registry::TokenRegistry;
use token::{Token, TokenFlags};

/// Character classes plus registered literals: everything the lexer consults.
#[derive(Debug, Clone, Default)]
pub struct Lexicon {
    pub classes: CharClasses,
    pub registry: TokenRegistry,
}

pub type SharedLexicon = Arc<RwLock<Lexicon>>;

pub fn read_lexicon(lexicon: &SharedLexicon) -> RwLockReadGuard<'_, Lexicon> {
    lexicon.read().unwrap_or_else(PoisonError::into_inner)
}

pub fn write_lexicon(lexicon: &SharedLexicon) -> RwLockWriteGuard<'_, Lexicon> {
    lexicon.write().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Mode {
    #[default]
    Script,
    Markup {
        in_tag: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumState {
    Int,
    Fraction,
    Exp,
    Hex,
    Bin,
}

#[derive(Debug)]
enum Step {
    /// A complete token and the number of bytes it spans.
    Emit(Token, usize),
    /// Bytes consumed without producing a token.
    Skip(usize),
    /// Switch mode after consuming bytes.
    Switch(Mode, usize),
    /// Emit a token, then switch mode.
    EmitSwitch(Token, usize, Mode),
    /// The token may continue past the buffered input.
    More,
}

/// Resumable tokenizer core.
///
/// Input arrives through [`Scanner::feed`] in arbitrary chunks. A token is
/// only emitted once its end is certain, so the token stream does not depend
/// on how the input was split.
#[derive(Debug, Default)]
pub struct Scanner {
    input: Vec<u8>,
    cursor: usize,
    base: usize,
    eof: bool,
    mode: Mode,
    pending: VecDeque<Token>,
    errors: Vec<LexError>,
}

impl Scanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.input.extend_from_slice(bytes);
    }

    /// Marks the end of the current input; pending partial tokens are flushed.
    pub fn finish(&mut self) {
        self.eof = true;
    }

    /// Drops buffered input, pending tokens and markup mode.
    pub fn clear(&mut self) {
        self.base += self.input.len();
        self.input.clear();
        self.cursor = 0;
        self.eof = false;
        self.mode = Mode::Script;
        self.pending.clear();
    }

    pub fn is_markup(&self) -> bool {
        matches!(self.mode, Mode::Markup { .. })
    }

    pub fn has_pending_input(&self) -> bool {
        self.cursor < self.input.len() || !self.pending.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<LexError> {
        std::mem::take(&mut self.errors)
    }

    pub fn next_token(&mut self, lexicon: &Lexicon) -> Option<Token> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Some(token);
            }

            if self.cursor >= self.input.len() {
                self.eof = false;
                self.compact();
                return None;
            }

            let start = self.cursor;
            let mut scan = Scan {
                input: &self.input[start..],
                eof: self.eof,
                lexicon,
                errors: Vec::new(),
            };
            let step = match self.mode {
                Mode::Script => scan.script(),
                Mode::Markup { in_tag: false } => scan.markup_content(),
                Mode::Markup { in_tag: true } => scan.markup_tag(),
            };
            let errors = std::mem::take(&mut scan.errors);

            let used = match step {
                Step::More => return None,
                Step::Emit(token, used) => {
                    self.push(token, start, lexicon);
                    used
                }
                Step::EmitSwitch(token, used, mode) => {
                    self.push(token, start, lexicon);
                    self.mode = mode;
                    used
                }
                Step::Skip(used) => used,
                Step::Switch(mode, used) => {
                    self.mode = mode;
                    used
                }
            };

            for error in errors {
                let error = relocate(error, self.base + start);
                warn!(error = %error, "Recovered from malformed input");
                self.errors.push(error);
            }
            self.cursor += used.max(1);
        }
    }

    fn push(&mut self, raw: Token, start: usize, lexicon: &Lexicon) {
        let offset = self.base + start;
        let token = match lexicon.registry.lookup(raw.kind, &raw.value) {
            Some(registered) => Token {
                kind: registered.kind,
                id: registered.id,
                name: registered.name.clone(),
                value: raw.value,
                flags: TokenFlags {
                    quote: raw.flags.quote,
                    ..registered.flags
                },
                offset,
            },
            None => Token { offset, ..raw },
        };
        self.pending.push_back(token);
    }

    fn compact(&mut self) {
        self.base += self.cursor;
        self.input.drain(..self.cursor);
        self.cursor = 0;
    }
}

fn relocate(error: LexError, base: usize) -> LexError {
    match error {
        LexError::InvalidEscape { escape, offset } => LexError::InvalidEscape {
            escape,
            offset: base + offset,
        },
        LexError::UnterminatedString(offset) => LexError::UnterminatedString(base + offset),
        LexError::UnknownEntity { entity, offset } => LexError::UnknownEntity {
            entity,
            offset: base + offset,
        },
        LexError::UnterminatedMarkup(offset) => LexError::UnterminatedMarkup(base + offset),
    }
}

/// One scan attempt over the unconsumed input.
struct Scan<'a> {
    input: &'a [u8],
    eof: bool,
    lexicon: &'a Lexicon,
    errors: Vec<LexError>,
}

impl<'a> Scan<'a> {
    fn classes(&self) -> &'a CharClasses {
        &self.lexicon.classes
    }

    /// End index of the run starting at `from` whose bytes satisfy `pred`,
    /// or `None` if the run touches the end of buffered input before eof.
    fn run(&self, from: usize, pred: impl Fn(u8) -> bool) -> Option<usize> {
        let end = self.input[from..]
            .iter()
            .position(|c| !pred(*c))
            .map(|i| from + i);
        match end {
            Some(end) => Some(end),
            None if self.eof => Some(self.input.len()),
            None => None,
        }
    }

    fn script(&mut self) -> Step {
        let c = self.input[0];
        let classes = self.classes();

        if classes.sys.contains(c) {
            return self.system();
        }
        if c == b'r' {
            match self.input.get(1) {
                Some(q) if classes.str.contains(*q) => return self.string(1, Kind::Str, true),
                None if !self.eof => return Step::More,
                _ => {}
            }
        }
        if classes.str.contains(c) {
            return self.string(0, Kind::Str, false);
        }
        if classes.dig.contains(c) {
            return self.number();
        }
        if classes.is_ident_start(c) {
            return self.ident(0, Kind::Id);
        }
        if classes.sym.contains(c) {
            return self.symbol(0, Kind::Sym);
        }

        Step::Emit(Token::new(Kind::Other, vec![c]), 1)
    }

    fn system(&mut self) -> Step {
        let classes = self.classes();
        let Some(&next) = self.input.get(1) else {
            return if self.eof {
                Step::Emit(Token::new(Kind::Sym, self.input[..1].to_vec()), 1)
            } else {
                Step::More
            };
        };

        if next == b'&' {
            return Step::Switch(Mode::Markup { in_tag: false }, 2);
        }
        if classes.sys.contains(next) {
            let mut token = Token::new(Kind::SysInt, Vec::new());
            token.flags.null = true;
            return Step::Emit(token, 2);
        }
        if classes.dig.contains(next) {
            let Some(end) = self.run(1, |c| classes.dig.contains(c)) else {
                return Step::More;
            };
            let digits = String::from_utf8_lossy(&self.input[1..end]).to_string();
            let value = decimal_to_bytes(&digits).unwrap_or_default();
            return Step::Emit(Token::new(Kind::SysInt, value), end);
        }
        if classes.is_ident_start(next) {
            return self.ident(1, Kind::SysId);
        }
        if classes.str.contains(next) {
            return self.string(1, Kind::SysStr, false);
        }
        if classes.sym.contains(next) {
            return self.symbol(1, Kind::SysSym);
        }

        Step::Emit(Token::new(Kind::Sym, self.input[..1].to_vec()), 1)
    }

    fn ident(&mut self, from: usize, kind: Kind) -> Step {
        let classes = self.classes();
        match self.run(from, |c| classes.is_ident_continue(c)) {
            Some(end) => Step::Emit(Token::new(kind, self.input[from..end].to_vec()), end),
            None => Step::More,
        }
    }

    /// Longest registered symbol of `kind`, falling back to one character.
    fn symbol(&mut self, from: usize, kind: Kind) -> Step {
        let classes = self.classes();
        let lexicon = self.lexicon;
        let registry = &lexicon.registry;

        if classes.eol.contains(self.input[from]) {
            return Step::Emit(Token::new(kind, vec![self.input[from]]), from + 1);
        }

        let mut len = 1;
        while registry.has_longer(kind, &self.input[from..from + len]) {
            match self.input.get(from + len) {
                Some(c) if classes.sym.contains(*c) && !classes.eol.contains(*c) => len += 1,
                Some(_) => break,
                None if self.eof => break,
                None => return Step::More,
            }
        }

        let window = &self.input[from..from + len];
        let len = registry
            .longest_prefix(kind, window)
            .map(|token| token.value.len())
            .unwrap_or(1);
        Step::Emit(
            Token::new(kind, self.input[from..from + len].to_vec()),
            from + len,
        )
    }

    fn number(&mut self) -> Step {
        let classes = self.classes();
        let input = self.input;

        let (mut state, mut i) = match (input[0], input.get(1), input.get(2)) {
            (b'0', Some(b'x' | b'X'), Some(c)) if classes.hex.contains(*c) => (NumState::Hex, 2),
            (b'0', Some(b'b' | b'B'), Some(c)) if classes.bin.contains(*c) => (NumState::Bin, 2),
            (b'0', Some(b'x' | b'X' | b'b' | b'B'), None) if !self.eof => return Step::More,
            _ => (NumState::Int, 0),
        };
        let mut float = false;

        loop {
            let Some(&c) = input.get(i) else {
                if self.eof {
                    break;
                }
                return Step::More;
            };

            match state {
                NumState::Int | NumState::Fraction if classes.dig.contains(c) => i += 1,
                NumState::Int if c == b'.' => match input.get(i + 1) {
                    Some(d) if classes.dig.contains(*d) => {
                        state = NumState::Fraction;
                        float = true;
                        i += 2;
                    }
                    None if !self.eof => return Step::More,
                    _ => break,
                },
                NumState::Int | NumState::Fraction if c == b'e' || c == b'E' => {
                    match self.exponent(i + 1) {
                        Ok(Some(len)) => {
                            state = NumState::Exp;
                            float = true;
                            i += 1 + len;
                        }
                        Ok(None) => break,
                        Err(()) => return Step::More,
                    }
                }
                NumState::Exp if classes.dig.contains(c) => i += 1,
                NumState::Hex if classes.hex.contains(c) => i += 1,
                NumState::Bin if classes.bin.contains(c) => i += 1,
                _ => break,
            }
        }

        let text = String::from_utf8_lossy(&input[..i]).to_string();
        let token = match state {
            NumState::Hex => Token::new(Kind::Raw, hex_to_bytes(&text[2..])),
            NumState::Bin => Token::new(Kind::Raw, bin_to_bytes(&text[2..])),
            _ if float => Token::new(
                Kind::Float,
                float_to_bytes(text.parse::<f64>().unwrap_or(f64::NAN)),
            ),
            _ => Token::new(Kind::Int, decimal_to_bytes(&text).unwrap_or_default()),
        };
        Step::Emit(token, i)
    }

    /// Length of `[+-]digit` after an exponent marker; `Err` when more input is needed.
    fn exponent(&self, at: usize) -> Result<Option<usize>, ()> {
        let dig = &self.classes().dig;
        match self.input.get(at) {
            Some(c) if dig.contains(*c) => Ok(Some(1)),
            Some(b'+' | b'-') => match self.input.get(at + 1) {
                Some(c) if dig.contains(*c) => Ok(Some(2)),
                None if !self.eof => Err(()),
                _ => Ok(None),
            },
            None if !self.eof => Err(()),
            _ => Ok(None),
        }
    }

    /// String starting with the quote at `from`; `raw` disables escapes.
    fn string(&mut self, from: usize, kind: Kind, raw: bool) -> Step {
        let classes = self.classes();
        let input = self.input;
        let quote = input[from];
        let mut out = Vec::new();
        let mut i = from + 1;

        loop {
            let Some(&c) = self.input.get(i) else {
                if !self.eof {
                    return Step::More;
                }
                self.errors.push(LexError::UnterminatedString(0));
                break;
            };

            if c == quote {
                i += 1;
                break;
            }
            if raw || !classes.str_esc.contains(c) {
                out.push(c);
                i += 1;
                continue;
            }

            let Some(&e) = self.input.get(i + 1) else {
                if !self.eof {
                    return Step::More;
                }
                i += 1;
                continue;
            };

            if let Some(b) = classes.unescape(e) {
                out.push(b);
                i += 2;
                continue;
            }

            match e {
                b'x' | b'u' | b'U' => {
                    let width = match e {
                        b'x' => 2,
                        b'u' => 4,
                        _ => 8,
                    };
                    let digits = self.input.get(i + 2..i + 2 + width);
                    match digits {
                        None if !self.eof && self.input.len() < i + 2 + width => {
                            return Step::More;
                        }
                        Some(digits) if digits.iter().all(|d| classes.hex.contains(*d)) => {
                            let text = String::from_utf8_lossy(digits);
                            let value = u32::from_str_radix(&text, 16).unwrap_or_default();
                            if e == b'x' {
                                out.push(value as u8);
                            } else if let Some(ch) = char::from_u32(value) {
                                let mut buf = [0u8; 4];
                                out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                            } else {
                                self.errors.push(LexError::InvalidEscape {
                                    escape: e as char,
                                    offset: i,
                                });
                            }
                            i += 2 + width;
                        }
                        _ => {
                            self.errors.push(LexError::InvalidEscape {
                                escape: e as char,
                                offset: i,
                            });
                            i += 2;
                        }
                    }
                }
                e if classes.oct.contains(e) => {
                    let mut end = i + 1;
                    while end < i + 4 {
                        match self.input.get(end) {
                            Some(d) if classes.oct.contains(*d) => end += 1,
                            None if !self.eof => return Step::More,
                            _ => break,
                        }
                    }
                    let text = String::from_utf8_lossy(&self.input[i + 1..end]);
                    out.push((u32::from_str_radix(&text, 8).unwrap_or_default() & 0xff) as u8);
                    i = end;
                }
                e if e == quote || classes.str_esc.contains(e) => {
                    out.push(e);
                    i += 2;
                }
                _ => {
                    self.errors.push(LexError::InvalidEscape {
                        escape: e as char,
                        offset: i,
                    });
                    i += 2;
                }
            }
        }

        let mut token = Token::new(kind, out);
        token.flags.quote = true;
        Step::Emit(token, i)
    }

    fn is_toggle(&self, at: usize) -> Option<bool> {
        if !self.classes().sys.contains(self.input[at]) {
            return Some(false);
        }
        match self.input.get(at + 1) {
            Some(b'&') => Some(true),
            Some(_) => Some(false),
            None if self.eof => Some(false),
            None => None,
        }
    }

    fn markup_content(&mut self) -> Step {
        match self.is_toggle(0) {
            Some(true) => return Step::Switch(Mode::Script, 2),
            None => return Step::More,
            Some(false) => {}
        }

        for (open, close) in [
            (b"<!--".as_slice(), b"-->".as_slice()),
            (b"<![CDATA[".as_slice(), b"]]>".as_slice()),
        ] {
            if self.input.starts_with(open) {
                return self.section(open.len(), close, open[1] == b'!' && open[2] == b'-');
            }
            if open.starts_with(self.input) && !self.eof {
                return Step::More;
            }
        }

        if self.input[0] == b'<' {
            return Step::EmitSwitch(
                Token::new(Kind::Sym, vec![b'<']),
                1,
                Mode::Markup { in_tag: true },
            );
        }

        let mut end = 0;
        while end < self.input.len() {
            if self.input[end] == b'<' {
                break;
            }
            match self.is_toggle(end) {
                Some(true) => break,
                None => return Step::More,
                Some(false) => end += 1,
            }
        }
        if end == self.input.len() && !self.eof {
            return Step::More;
        }

        let text = markup::replace_entities(&self.input[..end], 0, &mut self.errors);
        let mut token = Token::new(Kind::Str, text);
        token.flags.skip = token.value.iter().all(|c| c.is_ascii_whitespace());
        Step::Emit(token, end)
    }

    fn section(&mut self, open: usize, close: &[u8], comment: bool) -> Step {
        let body = &self.input[open..];
        let (content, used) = match body.windows(close.len()).position(|w| w == close) {
            Some(at) => (&body[..at], open + at + close.len()),
            None if self.eof => {
                self.errors.push(LexError::UnterminatedMarkup(0));
                (body, self.input.len())
            }
            None => return Step::More,
        };

        let mut token = Token::new(Kind::Str, content.to_vec());
        token.flags.skip = comment;
        Step::Emit(token, used)
    }

    fn markup_tag(&mut self) -> Step {
        match self.is_toggle(0) {
            Some(true) => return Step::Switch(Mode::Script, 2),
            None => return Step::More,
            Some(false) => {}
        }

        let classes = self.classes();
        let c = self.input[0];
        match c {
            b' ' | b'\t' | b'\r' | b'\n' => Step::Skip(1),
            b'>' => Step::EmitSwitch(
                Token::new(Kind::Sym, vec![c]),
                1,
                Mode::Markup { in_tag: false },
            ),
            c if classes.str.contains(c) => {
                let Some(len) = self.input[1..].iter().position(|b| *b == c) else {
                    if !self.eof {
                        return Step::More;
                    }
                    self.errors.push(LexError::UnterminatedString(0));
                    let value = markup::replace_entities(&self.input[1..], 1, &mut self.errors);
                    return Step::Emit(Token::new(Kind::Str, value), self.input.len());
                };
                let value = markup::replace_entities(&self.input[1..1 + len], 1, &mut self.errors);
                let mut token = Token::new(Kind::Str, value);
                token.flags.quote = true;
                Step::Emit(token, len + 2)
            }
            c if classes.is_ident_continue(c) || c == b'-' || c == b':' || c == b'.' => {
                match self.run(0, |b| {
                    classes.is_ident_continue(b) || b == b'-' || b == b':' || b == b'.'
                }) {
                    Some(end) => Step::Emit(Token::new(Kind::Id, self.input[..end].to_vec()), end),
                    None => Step::More,
                }
            }
            _ => Step::Emit(Token::new(Kind::Sym, vec![c]), 1),
        }
    }
}

/// Streaming lexer bound to a shared [`Lexicon`].
#[derive(Debug)]
pub struct Lexer {
    scanner: Scanner,
    lexicon: SharedLexicon,
}

impl Lexer {
    pub fn new(lexicon: SharedLexicon) -> Self {
        Self {
            scanner: Scanner::new(),
            lexicon,
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.scanner.feed(bytes);
    }

    pub fn finish(&mut self) {
        self.scanner.finish();
    }

    pub fn clear(&mut self) {
        self.scanner.clear();
    }

    pub fn next_token(&mut self) -> Option<Token> {
        let lexicon = read_lexicon(&self.lexicon);
        self.scanner.next_token(&lexicon)
    }

    pub fn has_pending_input(&self) -> bool {
        self.scanner.has_pending_input()
    }

    pub fn take_errors(&mut self) -> Vec<LexError> {
        self.scanner.take_errors()
    }
}

/// Tokenizes a complete text against a lexicon snapshot.
pub fn tokenize(lexicon: &Lexicon, text: &str) -> Vec<Token> {
    let mut scanner = Scanner::new();
    scanner.feed(text.as_bytes());
    scanner.finish();
    std::iter::from_fn(|| scanner.next_token(lexicon)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn lexicon() -> Lexicon {
        let mut lexicon = Lexicon::default();
        for (literal, skip) in [(" ", true), ("\n", true), ("+", false), ("+=", false), ("=", false)] {
            lexicon
                .registry
                .register(Kind::Sym, "", skip, literal.as_bytes());
        }
        lexicon
    }

    fn kinds_and_text(text: &str) -> Vec<(Kind, String)> {
        tokenize(&lexicon(), text)
            .into_iter()
            .filter(|t| !t.flags.skip)
            .map(|t| (t.kind, t.text()))
            .collect()
    }

    #[test]
    fn test_longest_match() {
        assert_eq!(
            kinds_and_text("a+=1"),
            vec![
                (Kind::Id, "a".to_string()),
                (Kind::Sym, "+=".to_string()),
                (Kind::Int, "1".to_string()),
            ]
        );
    }

    #[rstest]
    #[case::int("42", Kind::Int, "42")]
    #[case::leading_zero("007", Kind::Int, "7")]
    #[case::float("1.25", Kind::Float, "1.25")]
    #[case::exponent("15e-1", Kind::Float, "1.5")]
    #[case::signed_exponent("2E+2", Kind::Float, "200.0")]
    #[case::hex("0x1ff", Kind::Raw, "0x01FF")]
    #[case::bin("0b101", Kind::Raw, "0x05")]
    #[case::ident_apostrophe("it's", Kind::Id, "it's")]
    #[case::string("\"a\\tb\"", Kind::Str, "a\tb")]
    #[case::raw_string("r\"a\\tb\"", Kind::Str, "a\\tb")]
    #[case::hex_escape("'\\x41'", Kind::Str, "A")]
    #[case::unicode_escape("'\\u263A'", Kind::Str, "\u{263a}")]
    #[case::octal_escape("'\\101'", Kind::Str, "A")]
    #[case::sysid("$start", Kind::SysId, "start")]
    #[case::sysint("$12", Kind::SysInt, "12")]
    #[case::sysstr("$\"x\"", Kind::SysStr, "x")]
    #[case::syssym("$[", Kind::SysSym, "[")]
    fn test_single_token(#[case] text: &str, #[case] kind: Kind, #[case] expected: &str) {
        assert_eq!(kinds_and_text(text), vec![(kind, expected.to_string())]);
    }

    #[test]
    fn test_exponent_without_digits_is_not_consumed() {
        assert_eq!(
            kinds_and_text("3e"),
            vec![(Kind::Int, "3".to_string()), (Kind::Id, "e".to_string())]
        );
    }

    #[test]
    fn test_empty_sysint_is_null() {
        let tokens = tokenize(&lexicon(), "$$");
        assert_eq!(tokens.len(), 1);
        assert!(tokens[0].flags.null);
        assert!(tokens[0].to_node().is_null());
    }

    #[test]
    fn test_invalid_escape_is_dropped() {
        let mut scanner = Scanner::new();
        scanner.feed(b"'a\\qb'");
        scanner.finish();
        let token = scanner.next_token(&lexicon()).unwrap();

        assert_eq!(token.value, b"ab");
        assert_eq!(
            scanner.take_errors(),
            vec![LexError::InvalidEscape {
                escape: 'q',
                offset: 2
            }]
        );
    }

    #[test]
    fn test_hex_escape_follows_hex_class() {
        let mut lexicon = lexicon();
        lexicon.classes.set(charclass::ClassName::Hex, b"0123456789ABCDEF");
        let mut scanner = Scanner::new();
        scanner.feed(b"'\\x4A\\x4a'");
        scanner.finish();
        let token = scanner.next_token(&lexicon).unwrap();

        assert_eq!(token.value, b"J4a");
        assert_eq!(
            scanner.take_errors(),
            vec![LexError::InvalidEscape {
                escape: 'x',
                offset: 5
            }]
        );
    }

    #[test]
    fn test_unterminated_string_is_flushed_at_eof() {
        let mut scanner = Scanner::new();
        scanner.feed(b"\"abc");
        assert_eq!(scanner.next_token(&lexicon()), None);
        scanner.finish();

        assert_eq!(scanner.next_token(&lexicon()).map(|t| t.value), Some(b"abc".to_vec()));
        assert_eq!(scanner.take_errors(), vec![LexError::UnterminatedString(0)]);
    }

    #[test]
    fn test_chunked_feed_waits_for_token_end() {
        let lexicon = lexicon();
        let mut scanner = Scanner::new();
        scanner.feed(b"ab");
        assert_eq!(scanner.next_token(&lexicon), None);
        scanner.feed(b"c+");
        assert_eq!(scanner.next_token(&lexicon).map(|t| t.text()), Some("abc".to_string()));
        // "+" could still become "+="
        assert_eq!(scanner.next_token(&lexicon), None);
        scanner.feed(b"=");
        scanner.finish();
        assert_eq!(scanner.next_token(&lexicon).map(|t| t.text()), Some("+=".to_string()));
        assert_eq!(scanner.next_token(&lexicon), None);
    }

    #[test]
    fn test_offsets_survive_compaction() {
        let lexicon = lexicon();
        let mut scanner = Scanner::new();
        scanner.feed(b"a ");
        scanner.finish();
        while scanner.next_token(&lexicon).is_some() {}
        scanner.feed(b"bc");
        scanner.finish();

        assert_eq!(scanner.next_token(&lexicon).map(|t| t.offset), Some(2));
    }

    #[test]
    fn test_registered_token_is_promoted() {
        let mut lexicon = lexicon();
        let id = lexicon.registry.register_with(
            Kind::SysSym,
            "$BS",
            TokenFlags {
                start: true,
                ..TokenFlags::default()
            },
            b"[",
        );
        let tokens = tokenize(&lexicon, "$[");

        assert_eq!(tokens[0].id, id);
        assert_eq!(tokens[0].name, "$BS");
        assert!(tokens[0].flags.start);
    }

    #[test]
    fn test_markup_mode() {
        let tokens = kinds_and_text("$&<a href=\"x&amp;y\">1 &lt; 2</a><!-- c --><![CDATA[<raw>]]>$&z");

        assert_eq!(
            tokens,
            vec![
                (Kind::Sym, "<".to_string()),
                (Kind::Id, "a".to_string()),
                (Kind::Id, "href".to_string()),
                (Kind::Sym, "=".to_string()),
                (Kind::Str, "x&y".to_string()),
                (Kind::Sym, ">".to_string()),
                (Kind::Str, "1 < 2".to_string()),
                (Kind::Sym, "<".to_string()),
                (Kind::Sym, "/".to_string()),
                (Kind::Id, "a".to_string()),
                (Kind::Sym, ">".to_string()),
                (Kind::Str, "<raw>".to_string()),
                (Kind::Id, "z".to_string()),
            ]
        );
    }

    #[test]
    fn test_clear_drops_partial_input() {
        let lexicon = lexicon();
        let mut scanner = Scanner::new();
        scanner.feed(b"\"never closed");
        assert_eq!(scanner.next_token(&lexicon), None);
        scanner.clear();
        scanner.feed(b"ok");
        scanner.finish();

        assert_eq!(scanner.next_token(&lexicon).map(|t| t.text()), Some("ok".to_string()));
    }
}
