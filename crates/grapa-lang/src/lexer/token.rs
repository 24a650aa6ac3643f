use std::fmt::{self, Display, Formatter};

use smol_str::SmolStr;
use strum::{Display as StrumDisplay, EnumIter, EnumString};

use crate::{Node, kind::Kind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum TokenFlag {
    Skip,
    Run,
    Start,
    End,
    Escape,
    Exit,
    Null,
    Quote,
}

/// Behaviour flags attached to a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TokenFlags {
    pub skip: bool,
    pub run: bool,
    pub start: bool,
    pub end: bool,
    pub escape: bool,
    pub exit: bool,
    pub null: bool,
    pub quote: bool,
}

impl TokenFlags {
    pub fn skip() -> Self {
        Self {
            skip: true,
            ..Self::default()
        }
    }

    pub fn set(&mut self, flag: TokenFlag) {
        match flag {
            TokenFlag::Skip => self.skip = true,
            TokenFlag::Run => self.run = true,
            TokenFlag::Start => self.start = true,
            TokenFlag::End => self.end = true,
            TokenFlag::Escape => self.escape = true,
            TokenFlag::Exit => self.exit = true,
            TokenFlag::Null => self.null = true,
            TokenFlag::Quote => self.quote = true,
        }
    }

    pub fn with(mut self, flag: TokenFlag) -> Self {
        self.set(flag);
        self
    }

    /// True if the token steers segmentation rather than carrying script content.
    pub fn is_control(&self) -> bool {
        self.run || self.start || self.end || self.escape || self.exit
    }

    /// Strips segmentation meaning from an escaped token.
    pub fn escaped(self) -> Self {
        Self {
            skip: self.skip || self.run,
            run: false,
            start: false,
            end: false,
            escape: false,
            exit: false,
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: Kind,
    /// Registry identity; `0` for tokens that were not promoted.
    pub id: u64,
    pub name: SmolStr,
    pub value: Vec<u8>,
    pub flags: TokenFlags,
    /// Byte offset of the first character in the fed stream.
    pub offset: usize,
}

impl Token {
    pub fn new(kind: Kind, value: Vec<u8>) -> Self {
        Self {
            kind,
            id: 0,
            name: SmolStr::default(),
            value,
            flags: TokenFlags::default(),
            offset: 0,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.id != 0
    }

    pub fn to_node(&self) -> Node {
        if self.flags.null {
            return Node::null();
        }
        Node::bytes(self.kind, self.value.clone())
    }

    pub fn text(&self) -> String {
        self.to_node().text().into_owned()
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self.kind {
            Kind::Str => write!(f, "{:?}", self.text()),
            Kind::SysId | Kind::SysInt | Kind::SysStr | Kind::SysSym if !self.flags.null => {
                write!(f, "${}", self.text())
            }
            _ => write!(f, "{}", self.text()),
        }
    }
}
