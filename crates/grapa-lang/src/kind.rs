use strum::{Display, EnumString, FromRepr};

/// Type tag shared by tokens, operation trees and value trees.
///
/// The discriminants are the on-disk type bytes of the binary format, so they
/// must never be renumbered.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Display, EnumString, FromRepr,
)]
#[strum(serialize_all = "UPPERCASE")]
#[repr(u8)]
pub enum Kind {
    Start = 0,
    Err = 1,
    #[default]
    Raw = 2,
    Bool = 3,
    Id = 4,
    Str = 5,
    Input = 6,
    Xml = 7,
    Int = 8,
    Float = 9,
    Sym = 10,
    SysSym = 11,
    Time = 12,
    Array = 13,
    List = 14,
    El = 15,
    Tag = 16,
    Table = 17,
    SysId = 18,
    SysStr = 19,
    SysInt = 20,
    Op = 21,
    Code = 22,
    Vector = 23,
    Class = 24,
    Obj = 25,
    Ref = 26,
    Rule = 27,
    Token = 28,
    Widget = 29,
    Tuple = 30,
    X1 = 128,
    Other = 129,
    Ptr = 130,
    RuleRef = 131,
    RuleOp = 132,
}

impl Kind {
    #[inline(always)]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Kinds whose value bytes nest another record stream.
    pub const fn is_container(self) -> bool {
        matches!(
            self,
            Kind::Err
                | Kind::Array
                | Kind::Tuple
                | Kind::List
                | Kind::Xml
                | Kind::El
                | Kind::Tag
                | Kind::Op
                | Kind::Code
                | Kind::Vector
                | Kind::Obj
                | Kind::Class
        )
    }

    pub const fn is_numeric(self) -> bool {
        matches!(self, Kind::Int | Kind::Float | Kind::SysInt)
    }

    /// Kinds whose bytes are UTF-8 text.
    pub const fn is_textual(self) -> bool {
        matches!(
            self,
            Kind::Id
                | Kind::Str
                | Kind::Sym
                | Kind::SysSym
                | Kind::SysId
                | Kind::SysStr
                | Kind::Other
                | Kind::Table
                | Kind::Time
        )
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::int(Kind::Int, 8)]
    #[case::sysid(Kind::SysId, 18)]
    #[case::tuple(Kind::Tuple, 30)]
    #[case::ptr(Kind::Ptr, 130)]
    #[case::ruleop(Kind::RuleOp, 132)]
    fn test_tag(#[case] kind: Kind, #[case] expected: u8) {
        assert_eq!(kind.tag(), expected);
        assert_eq!(Kind::from_repr(expected), Some(kind));
    }

    #[rstest]
    #[case::sym("SYM", Kind::Sym)]
    #[case::sysint("SYSINT", Kind::SysInt)]
    #[case::str("STR", Kind::Str)]
    fn test_from_str(#[case] name: &str, #[case] expected: Kind) {
        assert_eq!(Kind::from_str(name), Ok(expected));
        assert_eq!(expected.to_string(), name);
    }

    #[test]
    fn test_unknown_tag() {
        assert_eq!(Kind::from_repr(31), None);
    }
}
