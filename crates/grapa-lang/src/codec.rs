//! Binary record format.
//!
//! A stream is a header followed by records, all integers big-endian:
//!
//! ```text
//! [version u32][header size u32][count u64][!count u64][class len u64][class]
//! [block size u64][kind u8][name len u64][name][value len u64][value] ...
//! ```
//!
//! Container values hold a complete nested stream. `block size` spans the whole
//! record, so a reader can skip a record without parsing it.
use thiserror::Error;

use crate::{Node, arena::Arena, kind::Kind, value::Payload};

pub const VERSION: u32 = 1;

const HEADER_SIZE: usize = 32;
const RECORD_OVERHEAD: usize = 8 + 1 + 8 + 8;
/// Deepest container nesting a reader accepts.
pub const MAX_NESTING: usize = 512;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Input ends at offset {offset}, {needed} more bytes expected")]
    Truncated { offset: usize, needed: usize },
    #[error("Unsupported format version {0}")]
    UnsupportedVersion(u32),
    #[error("Corrupted header at offset {0}: record count check failed")]
    ComplementMismatch(usize),
    #[error("Header at offset {0} is malformed")]
    InvalidHeader(usize),
    #[error("Record at offset {0} is malformed")]
    InvalidBlock(usize),
    #[error("Record at offset {0} nests deeper than {MAX_NESTING} levels")]
    TooDeep(usize),
    #[error("Header announces {expected} records, found {found}")]
    CountMismatch { expected: u64, found: u64 },
    #[error("Compressed input needs an expander")]
    MissingExpander,
    #[error("Failed to expand compressed input: {0}")]
    Expand(String),
}

/// What an entry point was handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Script,
    /// Starts with the two zero bytes of the format version.
    Serialized,
    /// `GRZ` followed by a version byte with the high bit clear.
    Grz,
}

impl InputKind {
    pub fn detect(bytes: &[u8]) -> Self {
        match bytes {
            [0, 0, ..] => InputKind::Serialized,
            [b'G', b'R', b'Z', flags, _, ..] if flags & 0x80 == 0 => InputKind::Grz,
            _ => InputKind::Script,
        }
    }
}

/// Decompressor for GRZ input. It returns the serialized stream.
pub trait Expander: Send + Sync {
    fn expand(&self, bytes: &[u8]) -> Result<Vec<u8>, String>;
}

/// Serializes one node. Pointers are written as null.
pub fn to_bytes(node: &Node) -> Vec<u8> {
    Encoder { arena: None }.stream(std::slice::from_ref(node), "")
}

/// Serializes several top-level nodes, writing pointers as the nodes they
/// refer to in `arena`.
pub fn to_bytes_resolved(nodes: &[Node], arena: &Arena<Node>) -> Vec<u8> {
    Encoder { arena: Some(arena) }.stream(nodes, "")
}

/// Deserializes a stream. A single record comes back as itself, any other
/// number as an `ARRAY`.
pub fn from_bytes(bytes: &[u8]) -> Result<Node, DecodeError> {
    let mut nodes = from_bytes_all(bytes)?;
    Ok(match nodes.len() {
        1 => nodes.pop().unwrap_or_default(),
        _ => Node::array(nodes),
    })
}

/// Deserializes every top-level record of a stream.
pub fn from_bytes_all(bytes: &[u8]) -> Result<Vec<Node>, DecodeError> {
    Decoder {
        bytes,
        base: 0,
        depth: 0,
    }
    .stream()
}

struct Encoder<'a> {
    arena: Option<&'a Arena<Node>>,
}

impl Encoder<'_> {
    fn stream(&self, nodes: &[Node], class: &str) -> Vec<u8> {
        let count = nodes.len() as u64;
        let mut out = Vec::with_capacity(HEADER_SIZE + class.len() + nodes.len() * RECORD_OVERHEAD);
        out.extend_from_slice(&VERSION.to_be_bytes());
        out.extend_from_slice(&((HEADER_SIZE + class.len()) as u32).to_be_bytes());
        out.extend_from_slice(&count.to_be_bytes());
        out.extend_from_slice(&(!count).to_be_bytes());
        out.extend_from_slice(&(class.len() as u64).to_be_bytes());
        out.extend_from_slice(class.as_bytes());

        for node in nodes {
            self.record(node, &node.name, &mut out, 0);
        }
        out
    }

    fn record(&self, node: &Node, name: &str, out: &mut Vec<u8>, hops: usize) {
        let (kind, value) = match &node.payload {
            Payload::Bytes(bytes) => (node.kind, bytes.clone()),
            Payload::List(children) => (node.kind, self.stream(children, "")),
            Payload::Rule(rule) => (Kind::Rule, rule.name.as_bytes().to_vec()),
            Payload::Ptr(ptr) => {
                match self.arena.and_then(|arena| arena.get(*ptr)) {
                    Some(target) if hops < 64 => return self.record(target, name, out, hops + 1),
                    _ => (Kind::SysId, Vec::new()),
                }
            }
        };

        let block = RECORD_OVERHEAD + name.len() + value.len();
        out.extend_from_slice(&(block as u64).to_be_bytes());
        out.push(kind.tag());
        out.extend_from_slice(&(name.len() as u64).to_be_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&(value.len() as u64).to_be_bytes());
        out.extend_from_slice(&value);
    }
}

struct Decoder<'a> {
    bytes: &'a [u8],
    /// Offset of `bytes` within the outermost stream, for error reporting.
    base: usize,
    depth: usize,
}

impl Decoder<'_> {
    fn take(&self, offset: usize, len: usize) -> Result<&[u8], DecodeError> {
        offset
            .checked_add(len)
            .and_then(|end| self.bytes.get(offset..end))
            .ok_or(DecodeError::Truncated {
                offset: self.base + offset,
                needed: offset.saturating_add(len).saturating_sub(self.bytes.len()),
            })
    }

    fn u64_at(&self, offset: usize) -> Result<u64, DecodeError> {
        let bytes = self.take(offset, 8)?;
        Ok(u64::from_be_bytes(bytes.try_into().map_err(|_| DecodeError::InvalidHeader(self.base + offset))?))
    }

    fn u32_at(&self, offset: usize) -> Result<u32, DecodeError> {
        let bytes = self.take(offset, 4)?;
        Ok(u32::from_be_bytes(bytes.try_into().map_err(|_| DecodeError::InvalidHeader(self.base + offset))?))
    }

    fn len_at(&self, offset: usize) -> Result<usize, DecodeError> {
        usize::try_from(self.u64_at(offset)?).map_err(|_| DecodeError::InvalidBlock(self.base + offset))
    }

    fn stream(&self) -> Result<Vec<Node>, DecodeError> {
        let version = self.u32_at(0)?;
        if version != VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        let header_size = self.u32_at(4)? as usize;
        let count = self.u64_at(8)?;
        if self.u64_at(16)? != !count {
            return Err(DecodeError::ComplementMismatch(self.base + 16));
        }
        let class_len = self.len_at(24)?;
        self.take(HEADER_SIZE, class_len)?;
        if Some(header_size) != HEADER_SIZE.checked_add(class_len) {
            return Err(DecodeError::InvalidHeader(self.base + 4));
        }

        let mut nodes = Vec::new();
        let mut offset = header_size;
        while offset < self.bytes.len() {
            let (node, next) = self.record(offset)?;
            nodes.push(node);
            offset = next;
        }

        if nodes.len() as u64 != count {
            return Err(DecodeError::CountMismatch {
                expected: count,
                found: nodes.len() as u64,
            });
        }
        Ok(nodes)
    }

    fn record(&self, offset: usize) -> Result<(Node, usize), DecodeError> {
        let invalid = DecodeError::InvalidBlock(self.base + offset);
        let block = self.len_at(offset)?;
        if block < RECORD_OVERHEAD {
            return Err(invalid);
        }
        let end = offset.checked_add(block).ok_or(invalid.clone())?;
        self.take(offset, block)?;

        let tag = self.take(offset + 8, 1)?[0];
        let name_len = self.len_at(offset + 9)?;
        let name = self.take(offset + 17, name_len)?;
        let value_offset = offset + 17 + name_len;
        let value_len = self.len_at(value_offset)?;
        let value = self.take(value_offset + 8, value_len)?;
        if value_offset + 8 + value_len != end {
            return Err(invalid);
        }

        let name = std::str::from_utf8(name).map_err(|_| invalid.clone())?;
        let node = match Kind::from_repr(tag) {
            Some(kind) if kind.is_container() => {
                if self.depth >= MAX_NESTING {
                    return Err(DecodeError::TooDeep(self.base + offset));
                }
                let nested = Decoder {
                    bytes: value,
                    base: self.base + value_offset + 8,
                    depth: self.depth + 1,
                };
                Node::list(kind, nested.stream()?)
            }
            Some(Kind::Rule) => Node::bytes(Kind::RuleRef, value.to_vec()),
            Some(kind) => Node::bytes(kind, value.to_vec()),
            None => Node::bytes(Kind::Raw, value.to_vec()),
        };

        Ok((node.with_name(name), end))
    }
}

/// A rule carried by name only can be looked up again by the reader.
pub fn rule_name(node: &Node) -> Option<String> {
    match (&node.payload, node.kind) {
        (Payload::Rule(rule), _) => Some(rule.name.to_string()),
        (Payload::Bytes(_), Kind::RuleRef) => Some(node.text().into_owned()),
        _ => None,
    }
}
