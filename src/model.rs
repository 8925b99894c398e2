use std::collections::HashMap;

use crate::operators::ColorSpace;

pub type Dict = HashMap<String, Obj>;

/// 1-based source position of a parsed element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub line: usize,
    pub col: usize,
}

impl Pos {
    pub fn new(line: usize, col: usize) -> Pos {
        Pos { line, col }
    }
}

impl std::fmt::Display for Pos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Obj {
    pub kind: ObjKind,
    pub pos: Pos,
}

impl Obj {
    pub fn new(kind: ObjKind, pos: Pos) -> Obj {
        Obj { kind, pos }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjKind {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    /// `(...)` string; `\(`, `\)` and `\\` already unescaped.
    LiteralString(Vec<u8>),
    /// `<...>` string, decoded to text while scanning.
    HexString(String),
    /// `/Name` with the slash stripped.
    Name(String),
    Array(Vec<Obj>),
    Dictionary(Dict),
    IndirectRef {
        id: i64,
        gen: i64,
    },
    Indirect(Indirect),
    Stream(Stream),
    Comment(Vec<u8>),
    /// `%%EOF`
    Eof,
    Xref(XrefSection),
    /// A single character code inside a CMap section.
    CodeChar(u32),
    /// Text emitted by a text-showing operator.
    Fragment(String),
    /// A bare word awaiting reduction (CMap machinery, xref entry kinds).
    Keyword(String),
}

impl ObjKind {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ObjKind::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ObjKind::Real(v) => Some(*v),
            ObjKind::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, ObjKind::Integer(_) | ObjKind::Real(_))
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            ObjKind::Name(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            ObjKind::Dictionary(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Obj]> {
        match self {
            ObjKind::Array(v) => Some(v),
            _ => None,
        }
    }

    /// Short descriptor used in expected-vs-found diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            ObjKind::Null => "null",
            ObjKind::Boolean(_) => "a boolean",
            ObjKind::Integer(_) => "an integer",
            ObjKind::Real(_) => "a real",
            ObjKind::LiteralString(_) => "a literal string",
            ObjKind::HexString(_) => "a hex string",
            ObjKind::Name(_) => "a name",
            ObjKind::Array(_) => "an array",
            ObjKind::Dictionary(_) => "a dictionary",
            ObjKind::IndirectRef { .. } => "an indirect reference",
            ObjKind::Indirect(_) => "an indirect object",
            ObjKind::Stream(_) => "a stream",
            ObjKind::Comment(_) => "a comment",
            ObjKind::Eof => "an end-of-file marker",
            ObjKind::Xref(_) => "an xref section",
            ObjKind::CodeChar(_) => "a character code",
            ObjKind::Fragment(_) => "a text fragment",
            ObjKind::Keyword(_) => "a keyword",
        }
    }
}

/// `N G obj ... endobj`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Indirect {
    pub id: i64,
    pub gen: i64,
    pub metadata: Dict,
    pub stream: Option<Stream>,
    pub objs: Vec<Obj>,
}

/// `stream ... endstream`, owned by an [`Indirect`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Stream {
    pub encoded: Vec<u8>,
    pub decoded: Vec<u8>,
    /// Top-level objects of the decoded body, parsed as a sub-document.
    pub objs: Vec<Obj>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefEntryKind {
    Free,
    InUse,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XrefEntry {
    pub offset: i64,
    pub gen: i64,
    pub kind: XrefEntryKind,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct XrefSection {
    pub first_id: i64,
    pub entries: Vec<XrefEntry>,
    pub trailer: Dict,
    pub startxref: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BfRangeDest {
    Code(u32),
    Array(Vec<u32>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BfRange {
    pub start: u32,
    pub end: u32,
    pub dest: BfRangeDest,
}

/// A CMap resource: maps source character codes from hex strings to
/// Unicode code points.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Resource {
    pub cid_system_info: Dict,
    pub cmap_name: String,
    pub cmap_type: i64,
    pub codespace: (u32, u32),
    pub bfranges: Vec<BfRange>,
    pub bfchars: HashMap<u32, u32>,
}

impl Resource {
    pub fn bfchar(&self, code: u32) -> Option<u32> {
        self.bfchars.get(&code).copied()
    }

    pub fn bfrange(&self, code: u32) -> Option<u32> {
        for range in &self.bfranges {
            if range.start <= code && code <= range.end {
                return match &range.dest {
                    BfRangeDest::Code(dest) => Some(dest + (code - range.start)),
                    BfRangeDest::Array(dests) => {
                        dests.get((code - range.start) as usize).copied()
                    }
                };
            }
        }
        None
    }
}

#[derive(Debug, Default)]
pub struct Document {
    pub version: (i64, i64),
    /// Top-level objects, in file order.
    pub objects: Vec<Obj>,
    /// Dictionary promoted by a `ColorSpace` key, consulted by `CS`/`cs`.
    pub color_space: Dict,
    /// Current color space selected by the content-stream operators.
    pub cs: ColorSpace,
    /// Extracted text fragments, in emission order.
    pub text: Vec<String>,
    /// CMap resources discovered during the parse.
    pub resources: Vec<Resource>,
}

impl Document {
    /// First indirect object with the given id; generation is not part of
    /// the lookup, mirroring how length references resolve.
    pub fn get_by_id(&self, id: i64) -> Option<&Indirect> {
        self.objects.iter().find_map(|o| match &o.kind {
            ObjKind::Indirect(ind) if ind.id == id => Some(ind),
            _ => None,
        })
    }
}
