use std::mem;

use tracing::trace;

use crate::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    Start,
    /// Inside a `start`..`end` region; `run` tokens do not end the statement.
    Block,
    /// After an escape token; the next content token loses its control flags.
    Escape,
}

/// A unit of work produced by the segmenter.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Execute(Vec<Token>),
    Exit,
}

/// Splits a token stream into statements using only the in-band `start`,
/// `end`, `run` and `escape` flags, so the split does not depend on how the
/// input was chunked.
///
/// In synchronous mode `run` tokens stay in the statement and the buffered
/// tokens execute at an `end` token or at [`Segmenter::finish`].
#[derive(Debug, Default)]
pub struct Segmenter {
    state: State,
    return_state: State,
    buffer: Vec<Token>,
    asynchronous: bool,
}

impl Segmenter {
    pub fn new(asynchronous: bool) -> Self {
        Self {
            asynchronous,
            ..Self::default()
        }
    }

    pub fn push(&mut self, token: Token) -> Option<Segment> {
        match self.state {
            State::Escape => self.push_escaped(token),
            _ if token.flags.escape => {
                self.return_state = self.state;
                self.state = State::Escape;
                None
            }
            State::Start if token.flags.start => {
                self.state = State::Block;
                None
            }
            State::Start if token.flags.end => {
                trace!(token = %token, "stray end token");
                None
            }
            State::Block if token.flags.end => {
                self.state = State::Start;
                self.flush()
            }
            State::Start if token.flags.run && self.asynchronous => {
                self.buffer.push(token);
                self.flush()
            }
            _ => {
                self.buffer.push(token);
                None
            }
        }
    }

    fn push_escaped(&mut self, mut token: Token) -> Option<Segment> {
        if token.flags.exit {
            self.state = self.return_state;
            self.buffer.clear();
            return Some(Segment::Exit);
        }

        let stays = token.flags.skip && !token.flags.run;
        token.flags = token.flags.escaped();
        self.buffer.push(token);
        if !stays {
            self.state = self.return_state;
        }
        None
    }

    /// Flushes whatever is buffered, including an unterminated block.
    pub fn finish(&mut self) -> Option<Segment> {
        self.state = State::Start;
        self.return_state = State::Start;
        self.flush()
    }

    pub fn clear(&mut self) {
        self.state = State::Start;
        self.return_state = State::Start;
        self.buffer.clear();
    }

    /// True inside a `start`..`end` region, including an escape within one.
    pub fn in_block(&self) -> bool {
        self.state == State::Block || (self.state == State::Escape && self.return_state == State::Block)
    }

    /// True when nothing but skip tokens is buffered.
    pub fn is_idle(&self) -> bool {
        self.state == State::Start && self.buffer.iter().all(|t| t.flags.skip)
    }

    fn flush(&mut self) -> Option<Segment> {
        let tokens = mem::take(&mut self.buffer);
        if tokens.iter().all(|t| t.flags.skip) {
            return None;
        }
        trace!(tokens = tokens.len(), "segment");
        Some(Segment::Execute(tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        kind::Kind,
        lexer::token::{TokenFlag, TokenFlags},
    };
    use rstest::rstest;

    fn token(text: &str) -> Token {
        let mut token = Token::new(Kind::Sym, text.as_bytes().to_vec());
        token.flags = match text {
            " " => TokenFlags::skip(),
            "\n" => TokenFlags::skip().with(TokenFlag::Run),
            "[" => TokenFlags::default().with(TokenFlag::Start),
            "]" => TokenFlags::default().with(TokenFlag::End).with(TokenFlag::Run),
            "\\" => TokenFlags::default().with(TokenFlag::Escape),
            "exit" => TokenFlags::default().with(TokenFlag::Exit),
            _ => TokenFlags::default(),
        };
        token
    }

    fn segments(tokens: &[&str], asynchronous: bool) -> Vec<String> {
        let mut segmenter = Segmenter::new(asynchronous);
        let mut out = tokens
            .iter()
            .filter_map(|t| segmenter.push(token(t)))
            .collect::<Vec<_>>();
        out.extend(segmenter.finish());

        out.into_iter()
            .map(|segment| match segment {
                Segment::Exit => "EXIT".to_string(),
                Segment::Execute(tokens) => tokens
                    .iter()
                    .filter(|t| !t.flags.skip)
                    .map(|t| t.text())
                    .collect::<Vec<_>>()
                    .join(""),
            })
            .collect()
    }

    #[rstest]
    #[case::run_splits(&["a", "\n", "b", "\n"], true, vec!["a", "b"])]
    #[case::sync_keeps_run(&["a", "\n", "b", "\n"], false, vec!["ab"])]
    #[case::block(&["[", "a", "\n", "b", "]", "c"], true, vec!["ab", "c"])]
    #[case::escaped_run(&["a", "\\", "\n", "b", "\n"], true, vec!["ab"])]
    #[case::escaped_start(&["\\", "[", "a", "\n"], true, vec!["[a"])]
    #[case::exit(&["a", "\\", "exit", "b"], true, vec!["EXIT", "b"])]
    #[case::blank_lines(&["\n", " ", "\n"], true, vec![])]
    #[case::unterminated_block(&["[", "a", "\n"], true, vec!["a"])]
    fn test_segments(#[case] tokens: &[&str], #[case] asynchronous: bool, #[case] expected: Vec<&str>) {
        assert_eq!(segments(tokens, asynchronous), expected);
    }

    #[test]
    fn test_block_state() {
        let mut segmenter = Segmenter::new(true);
        segmenter.push(token("["));
        segmenter.push(token("\\"));

        assert!(segmenter.in_block());
        assert!(!segmenter.is_idle());
        segmenter.clear();
        assert!(segmenter.is_idle());
    }
}
