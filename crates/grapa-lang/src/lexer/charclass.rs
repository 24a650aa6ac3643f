use strum::{Display, EnumIter, EnumString};

/// Named character classes that drive every lexer transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum ClassName {
    Str,
    Sym,
    Dig,
    Id,
    Hex,
    Oct,
    Bin,
    StrEsc,
    StrFrom,
    StrTo,
    Eol,
    Sys,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CharClass {
    members: Vec<u8>,
    table: [bool; 256],
}

impl CharClass {
    pub fn new(members: &[u8]) -> Self {
        let mut table = [false; 256];
        for b in members {
            table[*b as usize] = true;
        }
        Self {
            members: members.to_vec(),
            table,
        }
    }

    #[inline(always)]
    pub fn contains(&self, c: u8) -> bool {
        self.table[c as usize]
    }

    pub fn position(&self, c: u8) -> Option<usize> {
        self.members.iter().position(|m| *m == c)
    }

    pub fn members(&self) -> &[u8] {
        &self.members
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CharClasses {
    pub str: CharClass,
    pub sym: CharClass,
    pub dig: CharClass,
    pub id: CharClass,
    pub hex: CharClass,
    pub oct: CharClass,
    pub bin: CharClass,
    pub str_esc: CharClass,
    pub str_from: CharClass,
    pub str_to: CharClass,
    pub eol: CharClass,
    pub sys: CharClass,
}

impl Default for CharClasses {
    fn default() -> Self {
        let id = (b'A'..=b'Z')
            .chain(b'a'..=b'z')
            .chain(std::iter::once(b'_'))
            .collect::<Vec<_>>();

        Self {
            str: CharClass::new(b"\"'"),
            sym: CharClass::new(b" \t\r\n!@#$%^&*()-+={}|[]:;<>,.?/\\~"),
            dig: CharClass::new(b"0123456789"),
            id: CharClass::new(&id),
            hex: CharClass::new(b"0123456789ABCDEF0123456789abcdef"),
            oct: CharClass::new(b"01234567"),
            bin: CharClass::new(b"01"),
            str_esc: CharClass::new(b"\\"),
            str_from: CharClass::new(b"t'\"\\rn?abfv/0"),
            str_to: CharClass::new(b"\t'\"\\\r\n?\x07\x08\x0c\x0b/\0"),
            eol: CharClass::new(b"\n"),
            sys: CharClass::new(b"$"),
        }
    }
}

impl CharClasses {
    /// Replaces one class with a new literal character set.
    pub fn set(&mut self, name: ClassName, members: &[u8]) {
        let class = CharClass::new(members);
        match name {
            ClassName::Str => self.str = class,
            ClassName::Sym => self.sym = class,
            ClassName::Dig => self.dig = class,
            ClassName::Id => self.id = class,
            ClassName::Hex => self.hex = class,
            ClassName::Oct => self.oct = class,
            ClassName::Bin => self.bin = class,
            ClassName::StrEsc => self.str_esc = class,
            ClassName::StrFrom => self.str_from = class,
            ClassName::StrTo => self.str_to = class,
            ClassName::Eol => self.eol = class,
            ClassName::Sys => self.sys = class,
        }
    }

    pub fn get(&self, name: ClassName) -> &CharClass {
        match name {
            ClassName::Str => &self.str,
            ClassName::Sym => &self.sym,
            ClassName::Dig => &self.dig,
            ClassName::Id => &self.id,
            ClassName::Hex => &self.hex,
            ClassName::Oct => &self.oct,
            ClassName::Bin => &self.bin,
            ClassName::StrEsc => &self.str_esc,
            ClassName::StrFrom => &self.str_from,
            ClassName::StrTo => &self.str_to,
            ClassName::Eol => &self.eol,
            ClassName::Sys => &self.sys,
        }
    }

    /// Maps an escape letter to the byte it stands for.
    pub fn unescape(&self, c: u8) -> Option<u8> {
        self.str_from
            .position(c)
            .and_then(|i| self.str_to.members().get(i).copied())
    }

    /// Identifier continuation: ID letters, digits, apostrophes and non-ASCII bytes.
    #[inline(always)]
    pub fn is_ident_continue(&self, c: u8) -> bool {
        self.id.contains(c) || self.dig.contains(c) || c == b'\'' || c >= 0x80
    }

    #[inline(always)]
    pub fn is_ident_start(&self, c: u8) -> bool {
        self.id.contains(c) || c >= 0x80
    }
}
