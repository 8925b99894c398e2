use std::io::Read;

use crate::error::ParseError;
use crate::model::{
    BfRange, BfRangeDest, Dict, Document, Indirect, Obj, ObjKind, Pos, Resource, Stream,
    XrefEntry, XrefEntryKind, XrefSection,
};
use crate::operators::{self, ColorSpace};
use crate::tokenizer::{hex_nibble, Lexer, Token};

/// Parse a standalone PDF byte buffer.
pub fn parse(input: &[u8]) -> Result<Document, ParseError> {
    Parser::new(Lexer::new(input)).parse()
}

/// Parse with inherited context, as used for recursive parses of decoded
/// content streams.
pub fn parse_with_context(
    input: &[u8],
    color_space: Dict,
    resources: Vec<Resource>,
) -> Result<Document, ParseError> {
    Parser::with_context(Lexer::new(input), color_space, resources).parse()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CMapSection {
    BfChar,
    BfRange,
    CodeSpaceRange,
}

#[derive(Debug)]
enum FrameKind {
    Root,
    Dict,
    Array,
    Indirect { id: i64, gen: i64 },
    Xref,
    Resource(Resource),
    CMapSection(CMapSection),
    InlineImage,
}

/// One open container awaiting its closing token.
#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    pos: Pos,
    children: Vec<Obj>,
}

impl Frame {
    fn new(kind: FrameKind, pos: Pos) -> Frame {
        Frame {
            kind,
            pos,
            children: Vec::new(),
        }
    }

    fn root() -> Frame {
        Frame::new(FrameKind::Root, Pos::new(1, 1))
    }
}

fn closing_token(kind: &FrameKind) -> &'static str {
    match kind {
        FrameKind::Root => "end of input",
        FrameKind::Dict => ">>",
        FrameKind::Array => "]",
        FrameKind::Indirect { .. } => "endobj",
        FrameKind::Xref => "%%EOF",
        FrameKind::Resource(_) => "end",
        FrameKind::CMapSection(CMapSection::BfChar) => "endbfchar",
        FrameKind::CMapSection(CMapSection::BfRange) => "endbfrange",
        FrameKind::CMapSection(CMapSection::CodeSpaceRange) => "endcodespacerange",
        FrameKind::InlineImage => "ID",
    }
}

fn syntax(pos: Pos, expected: &str, found: &str) -> ParseError {
    ParseError::Syntax {
        pos,
        expected: expected.to_string(),
        found: found.to_string(),
    }
}

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    stack: Vec<Frame>,
    doc: Document,
    /// Resources inherited from the enclosing document; hex strings decode
    /// through these.
    inherited: Vec<Resource>,
    /// FontFile indirect ids paired with the dictionary that referenced them.
    fontfiles: Vec<(i64, Dict)>,
    /// Indices of objects whose stream bodies await the deferred pass.
    deferred: Vec<usize>,
    /// Set between `N dict begin` and its matching `end`.
    dict_begin: bool,
}

impl<'a> Parser<'a> {
    pub fn new(lexer: Lexer<'a>) -> Parser<'a> {
        Parser::with_context(lexer, Dict::new(), Vec::new())
    }

    pub fn with_context(
        lexer: Lexer<'a>,
        color_space: Dict,
        resources: Vec<Resource>,
    ) -> Parser<'a> {
        Parser::with_state(lexer, color_space, resources, ColorSpace::default())
    }

    fn with_state(
        lexer: Lexer<'a>,
        color_space: Dict,
        resources: Vec<Resource>,
        cs: ColorSpace,
    ) -> Parser<'a> {
        let mut doc = Document::default();
        doc.color_space = color_space;
        doc.cs = cs;
        Parser {
            lexer,
            stack: vec![Frame::root()],
            doc,
            inherited: resources,
            fontfiles: Vec::new(),
            deferred: Vec::new(),
            dict_begin: false,
        }
    }

    pub fn parse(mut self) -> Result<Document, ParseError> {
        while let Some(token) = self.lexer.next_token() {
            self.dispatch(token)?;
        }
        self.finish()?;
        self.merge_fontfile_metadata();
        self.decode_deferred_streams()?;
        self.collect_text();
        Ok(self.doc)
    }

    fn dispatch(&mut self, token: Token) -> Result<(), ParseError> {
        match token.text.as_str() {
            "%" => {
                let rest = self.lexer.rest_of_line().to_vec();
                if token.pos.line == 1
                    && token.pos.col == 1
                    && rest.starts_with(b"PDF-")
                    && self.doc.version == (0, 0)
                {
                    self.parse_version(&rest[4..], token.pos)?;
                    self.skip_binary_marker();
                } else if rest.starts_with(b"%EOF") {
                    self.reduce_eof(token.pos)?;
                } else {
                    self.push_child(Obj::new(ObjKind::Comment(rest), token.pos));
                }
            }
            "(" => {
                let bytes = self.lexer.read_literal_string().ok_or(ParseError::Eof {
                    pos: token.pos,
                    expected: "`)`".to_string(),
                })?;
                self.push_child(Obj::new(ObjKind::LiteralString(bytes), token.pos));
            }
            ")" | ">" => log::debug!("{}: stray `{}` ignored", token.pos, token.text),
            "<<" => self.stack.push(Frame::new(FrameKind::Dict, token.pos)),
            ">>" => self.reduce_dict(token.pos)?,
            "<" => self.read_hex(token.pos)?,
            "/" => {
                let name = self.lexer.read_name();
                self.push_child(Obj::new(ObjKind::Name(name), token.pos));
            }
            "[" => self.stack.push(Frame::new(FrameKind::Array, token.pos)),
            "]" => self.reduce_array(token.pos)?,
            "obj" => {
                let gen = self.pop_int_child(token.pos, "obj")?;
                let id = self.pop_int_child(token.pos, "obj")?;
                self.stack
                    .push(Frame::new(FrameKind::Indirect { id, gen }, token.pos));
            }
            "endobj" => self.reduce_indirect(token.pos)?,
            "stream" => self.handle_stream(token.pos)?,
            "endstream" => {}
            "R" => {
                let gen = self.pop_int_child(token.pos, "R")?;
                let id = self.pop_int_child(token.pos, "R")?;
                self.push_child(Obj::new(ObjKind::IndirectRef { id, gen }, token.pos));
            }
            "true" => self.push_child(Obj::new(ObjKind::Boolean(true), token.pos)),
            "false" => self.push_child(Obj::new(ObjKind::Boolean(false), token.pos)),
            "null" => self.push_child(Obj::new(ObjKind::Null, token.pos)),
            "xref" => self.stack.push(Frame::new(FrameKind::Xref, token.pos)),
            "trailer" | "startxref" => {}
            "f" | "n" => {
                // xref entry kind inside an xref section, a path-painting
                // no-op anywhere else
                if matches!(self.stack.last().map(|f| &f.kind), Some(FrameKind::Xref)) {
                    self.push_child(Obj::new(ObjKind::Keyword(token.text.clone()), token.pos));
                }
            }
            "BI" => self
                .stack
                .push(Frame::new(FrameKind::InlineImage, token.pos)),
            "ID" => {
                if matches!(
                    self.stack.last().map(|f| &f.kind),
                    Some(FrameKind::InlineImage)
                ) {
                    self.stack.pop();
                    self.lexer.skip_inline_image();
                } else {
                    log::warn!("{}: `ID` outside an inline image", token.pos);
                }
            }
            "EI" => {}
            "def" => self.handle_def(token.pos)?,
            "begin" => self.handle_begin(token.pos)?,
            "end" => self.handle_end(token.pos)?,
            "begincmap" | "endcmap" => {}
            "pop" => self.handle_pop(token.pos)?,
            "beginbfchar" => self.begin_cmap_section(CMapSection::BfChar, token.pos),
            "beginbfrange" => self.begin_cmap_section(CMapSection::BfRange, token.pos),
            "begincodespacerange" => {
                self.begin_cmap_section(CMapSection::CodeSpaceRange, token.pos)
            }
            "endbfchar" => self.reduce_bfchar(token.pos)?,
            "endbfrange" => self.reduce_bfrange(token.pos)?,
            "endcodespacerange" => self.reduce_codespacerange(token.pos)?,
            "w" | "J" | "j" | "M" | "d" | "ri" | "i" | "gs" | "q" | "Q" | "cm" | "Do" | "MP"
            | "DP" | "BMC" | "BDC" | "EMC" | "BX" | "EX" | "m" | "l" | "c" | "v" | "y" | "h"
            | "re" | "S" | "s" | "F" | "f*" | "B" | "B*" | "b" | "b*" | "W" | "W*" | "BT"
            | "ET" | "Tc" | "Tw" | "Tz" | "TL" | "Tf" | "Tr" | "Ts" | "Td" | "TD" | "Tm"
            | "T*" | "Tj" | "TJ" | "'" | "\"" | "d0" | "d1" | "CS" | "cs" | "SC" | "SCN"
            | "sc" | "scn" | "G" | "g" | "RG" | "rg" | "K" | "k" | "sh" => {
                self.content_operator(&token)?
            }
            // bare words of the CMap machinery stay pending for `begin`/`pop`
            "findresource" | "dict" | "currentdict" | "defineresource" | "CMapName" => self
                .push_child(Obj::new(ObjKind::Keyword(token.text.clone()), token.pos)),
            text => {
                if let Ok(v) = text.parse::<i64>() {
                    self.push_child(Obj::new(ObjKind::Integer(v), token.pos));
                } else if let Ok(v) = text.parse::<f64>() {
                    self.push_child(Obj::new(ObjKind::Real(v), token.pos));
                } else {
                    return Err(ParseError::UnknownOperator {
                        pos: token.pos,
                        operator: text.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn parse_version(&mut self, rest: &[u8], pos: Pos) -> Result<(), ParseError> {
        let text = String::from_utf8_lossy(rest).trim().to_string();
        let mut parts = text.split('.');
        let version = match (parts.next(), parts.next(), parts.next()) {
            (Some(major), Some(minor), None) => {
                match (major.parse::<i64>(), minor.parse::<i64>()) {
                    (Ok(major), Ok(minor)) => Some((major, minor)),
                    _ => None,
                }
            }
            _ => None,
        };
        match version {
            Some(version) => {
                self.doc.version = version;
                Ok(())
            }
            None => Err(ParseError::Header {
                pos,
                found: text,
            }),
        }
    }

    /// The header may be followed by a comment line whose first three
    /// payload bytes have the high bit set, marking binary content. It is
    /// consumed without producing a Comment object.
    fn skip_binary_marker(&mut self) {
        if let Some((start, end)) = self.lexer.line_span(1) {
            let line = &self.lexer.input()[start..end];
            if line.len() >= 4
                && line[0] == b'%'
                && line[1] > 127
                && line[2] > 127
                && line[3] > 127
            {
                self.lexer.set_position(end);
            }
        }
    }

    fn read_hex(&mut self, pos: Pos) -> Result<(), ParseError> {
        let raw = self.lexer.read_hex_string().ok_or(ParseError::Eof {
            pos,
            expected: "`>`".to_string(),
        })?;
        if self.in_cmap_section() {
            match u32::from_str_radix(&raw, 16) {
                Ok(code) => self.push_child(Obj::new(ObjKind::CodeChar(code), pos)),
                Err(_) => log::warn!("{}: `{}` is not a hexadecimal character code", pos, raw),
            }
        } else if !self.inherited.is_empty() {
            let text = decode_hex_groups(&raw, &self.inherited, pos);
            self.push_child(Obj::new(ObjKind::HexString(text), pos));
        } else {
            let text = decode_hex_pairs(&raw, pos);
            self.push_child(Obj::new(ObjKind::HexString(text), pos));
        }
        Ok(())
    }

    /// Hex strings parse as character codes inside a CMap section, also
    /// within an array destination of a bfrange entry.
    fn in_cmap_section(&self) -> bool {
        match self.stack.last().map(|f| &f.kind) {
            Some(FrameKind::CMapSection(_)) => true,
            Some(FrameKind::Array) if self.stack.len() >= 2 => matches!(
                self.stack[self.stack.len() - 2].kind,
                FrameKind::CMapSection(_)
            ),
            _ => false,
        }
    }

    fn reduce_dict(&mut self, pos: Pos) -> Result<(), ParseError> {
        let frame = self.pop_frame(pos, ">>")?;
        if !matches!(frame.kind, FrameKind::Dict) {
            return Err(syntax(
                pos,
                &format!("`{}`", closing_token(&frame.kind)),
                "`>>`",
            ));
        }
        if frame.children.len() % 2 != 0 {
            log::warn!("{}: dictionary has an odd number of entries", frame.pos);
        }
        let mut dict = Dict::new();
        let mut fontfile_ids = Vec::new();
        let mut promote_color_space = false;
        let mut it = frame.children.into_iter();
        while let (Some(key), Some(value)) = (it.next(), it.next()) {
            let Some(name) = key.kind.as_name() else {
                log::warn!(
                    "{}: dictionary key should be a name, found {}",
                    key.pos,
                    key.kind.type_name()
                );
                continue;
            };
            if name == "ColorSpace" {
                promote_color_space = true;
            }
            if name.starts_with("FontFile") {
                if let ObjKind::IndirectRef { id, .. } = value.kind {
                    fontfile_ids.push(id);
                }
            }
            dict.insert(name.to_string(), value);
        }
        for id in fontfile_ids {
            self.fontfiles.push((id, dict.clone()));
        }
        if promote_color_space {
            self.doc.color_space = dict.clone();
        }
        self.push_child(Obj::new(ObjKind::Dictionary(dict), frame.pos));
        Ok(())
    }

    fn reduce_array(&mut self, pos: Pos) -> Result<(), ParseError> {
        let frame = self.pop_frame(pos, "]")?;
        if !matches!(frame.kind, FrameKind::Array) {
            return Err(syntax(
                pos,
                &format!("`{}`", closing_token(&frame.kind)),
                "`]`",
            ));
        }
        self.push_child(Obj::new(ObjKind::Array(frame.children), frame.pos));
        Ok(())
    }

    fn reduce_indirect(&mut self, pos: Pos) -> Result<(), ParseError> {
        let frame = self.pop_frame(pos, "endobj")?;
        let (id, gen) = match frame.kind {
            FrameKind::Indirect { id, gen } => (id, gen),
            other => {
                return Err(syntax(
                    pos,
                    &format!("`{}`", closing_token(&other)),
                    "`endobj`",
                ))
            }
        };
        let mut ind = Indirect {
            id,
            gen,
            ..Default::default()
        };
        let mut have_metadata = false;
        for child in frame.children {
            match child {
                Obj {
                    kind: ObjKind::Dictionary(dict),
                    ..
                } if !have_metadata => {
                    ind.metadata = dict;
                    have_metadata = true;
                }
                Obj {
                    kind: ObjKind::Stream(stream),
                    ..
                } => ind.stream = Some(stream),
                other => ind.objs.push(other),
            }
        }
        self.push_child(Obj::new(ObjKind::Indirect(ind), frame.pos));
        Ok(())
    }

    fn handle_stream(&mut self, pos: Pos) -> Result<(), ParseError> {
        let in_indirect = matches!(
            self.stack.last().map(|f| &f.kind),
            Some(FrameKind::Indirect { .. })
        );
        let (have_dict, filtered, subtyped) = match self
            .stack
            .last()
            .and_then(|f| f.children.last())
            .map(|o| &o.kind)
        {
            Some(ObjKind::Dictionary(dict)) => (
                true,
                dict.contains_key("Filter"),
                dict.contains_key("Subtype"),
            ),
            _ => (false, false, false),
        };
        let body = self.lexer.consume_stream_body().ok_or(ParseError::Eof {
            pos,
            expected: "`endstream`".to_string(),
        })?;

        let mut stream = Stream::default();
        if !have_dict {
            log::warn!("{}: stream without a preceding dictionary", pos);
            stream.decoded = body;
        } else if subtyped {
            // image/font payload; its body never joins the object tree
        } else {
            let enqueue = in_indirect && !body.is_empty();
            if filtered {
                stream.encoded = body;
            } else {
                stream.decoded = body;
            }
            if enqueue {
                let root_pending = self.stack.first().map_or(0, |f| f.children.len());
                self.deferred.push(self.doc.objects.len() + root_pending);
            }
        }
        self.push_child(Obj::new(ObjKind::Stream(stream), pos));
        Ok(())
    }

    fn reduce_eof(&mut self, pos: Pos) -> Result<(), ParseError> {
        if self.stack.len() == 2
            && matches!(self.stack.last().map(|f| &f.kind), Some(FrameKind::Xref))
        {
            if let Some(frame) = self.stack.pop() {
                if frame.children.is_empty() {
                    log::warn!("{}: empty xref section discarded", frame.pos);
                } else {
                    let frame_pos = frame.pos;
                    let section = fold_xref(frame)?;
                    self.push_child(Obj::new(ObjKind::Xref(section), frame_pos));
                }
            }
        }
        if self.stack.len() == 1 {
            self.flush_root();
            self.doc.objects.push(Obj::new(ObjKind::Eof, pos));
        } else {
            self.push_child(Obj::new(ObjKind::Eof, pos));
        }
        Ok(())
    }

    fn handle_def(&mut self, pos: Pos) -> Result<(), ParseError> {
        if !matches!(
            self.stack.last().map(|f| &f.kind),
            Some(FrameKind::Resource(_))
        ) {
            return Err(syntax(pos, "an open CMap resource", "`def`"));
        }
        let Some(value) = self.top_children().pop() else {
            return Err(syntax(pos, "a value before `def`", "nothing"));
        };
        let Some(key) = self.top_children().pop() else {
            return Err(syntax(pos, "a key before `def`", "nothing"));
        };
        let Some(key_name) = key.kind.as_name() else {
            return Err(syntax(key.pos, "a name", key.kind.type_name()));
        };
        let Some(FrameKind::Resource(resource)) =
            self.stack.last_mut().map(|f| &mut f.kind)
        else {
            return Ok(());
        };
        match key_name {
            "CIDSystemInfo" => match value.kind {
                ObjKind::Dictionary(dict) => resource.cid_system_info = dict,
                other => return Err(syntax(value.pos, "a dictionary", other.type_name())),
            },
            "CMapName" => match value.kind {
                ObjKind::Name(name) => resource.cmap_name = name,
                other => return Err(syntax(value.pos, "a name", other.type_name())),
            },
            "CMapType" => match value.kind {
                ObjKind::Integer(v) => resource.cmap_type = v,
                other => return Err(syntax(value.pos, "an integer", other.type_name())),
            },
            other => {
                return Err(syntax(
                    pos,
                    "`CIDSystemInfo`, `CMapName` or `CMapType`",
                    &format!("`{}`", other),
                ))
            }
        }
        Ok(())
    }

    fn handle_begin(&mut self, pos: Pos) -> Result<(), ParseError> {
        let Some(opener) = self.top_children().pop() else {
            return Err(syntax(pos, "`dict` or `findresource` before `begin`", "nothing"));
        };
        let ObjKind::Keyword(word) = &opener.kind else {
            return Err(syntax(
                opener.pos,
                "`dict` or `findresource` before `begin`",
                opener.kind.type_name(),
            ));
        };
        match word.as_str() {
            "dict" => {
                // `N dict begin`: the size operand has no further use
                if let Some(size) = self.top_children().pop() {
                    if size.kind.as_i64().is_none() {
                        log::warn!(
                            "{}: `dict` expected a size integer, found {}",
                            size.pos,
                            size.kind.type_name()
                        );
                    }
                }
                self.dict_begin = true;
            }
            "findresource" => {
                // `/CIDInit /ProcSet findresource begin` opens a resource
                for _ in 0..2 {
                    match self.top_children().pop() {
                        Some(obj) if obj.kind.as_name().is_some() => {}
                        Some(obj) => log::warn!(
                            "{}: `findresource` expected a name, found {}",
                            obj.pos,
                            obj.kind.type_name()
                        ),
                        None => log::warn!("{}: `findresource` with missing operands", pos),
                    }
                }
                self.stack
                    .push(Frame::new(FrameKind::Resource(Resource::default()), pos));
            }
            other => {
                return Err(syntax(
                    pos,
                    "`dict` or `findresource` before `begin`",
                    &format!("`{}`", other),
                ))
            }
        }
        Ok(())
    }

    fn handle_end(&mut self, pos: Pos) -> Result<(), ParseError> {
        if self.dict_begin {
            self.dict_begin = false;
            return Ok(());
        }
        let frame = self.pop_frame(pos, "end")?;
        match frame.kind {
            FrameKind::Resource(resource) => {
                self.doc.resources.push(resource);
                Ok(())
            }
            other => Err(syntax(
                pos,
                &format!("`{}`", closing_token(&other)),
                "`end`",
            )),
        }
    }

    fn handle_pop(&mut self, pos: Pos) -> Result<(), ParseError> {
        // `CMapName currentdict /CMap defineresource pop` epilogue
        let expects: [(&str, bool); 4] = [
            ("defineresource", true),
            ("CMap", false),
            ("currentdict", true),
            ("CMapName", true),
        ];
        for (want, is_keyword) in expects {
            let Some(obj) = self.top_children().pop() else {
                return Err(syntax(pos, &format!("`{}`", want), "nothing"));
            };
            let matched = match (&obj.kind, is_keyword) {
                (ObjKind::Keyword(word), true) => word == want,
                (ObjKind::Name(name), false) => name == want,
                _ => false,
            };
            if !matched {
                return Err(syntax(
                    obj.pos,
                    &format!("`{}`", want),
                    obj.kind.type_name(),
                ));
            }
        }
        Ok(())
    }

    fn begin_cmap_section(&mut self, section: CMapSection, pos: Pos) {
        // the entry-count operand before the section has no further use
        self.top_children().pop();
        self.stack
            .push(Frame::new(FrameKind::CMapSection(section), pos));
    }

    fn reduce_bfchar(&mut self, pos: Pos) -> Result<(), ParseError> {
        let frame = self.pop_frame(pos, "endbfchar")?;
        if !matches!(frame.kind, FrameKind::CMapSection(CMapSection::BfChar)) {
            return Err(syntax(
                pos,
                &format!("`{}`", closing_token(&frame.kind)),
                "`endbfchar`",
            ));
        }
        if frame.children.len() % 2 != 0 {
            return Err(syntax(
                pos,
                "pairs of character codes in bfchar",
                &format!("{} entries", frame.children.len()),
            ));
        }
        let Some(FrameKind::Resource(resource)) =
            self.stack.last_mut().map(|f| &mut f.kind)
        else {
            return Err(syntax(pos, "an open CMap resource", "`endbfchar`"));
        };
        let mut it = frame.children.into_iter();
        while let (Some(src), Some(dst)) = (it.next(), it.next()) {
            match (&src.kind, &dst.kind) {
                (ObjKind::CodeChar(s), ObjKind::CodeChar(d)) => {
                    resource.bfchars.insert(*s, *d);
                }
                _ => log::warn!(
                    "{}: bfchar entry should be two character codes",
                    src.pos
                ),
            }
        }
        Ok(())
    }

    fn reduce_bfrange(&mut self, pos: Pos) -> Result<(), ParseError> {
        let frame = self.pop_frame(pos, "endbfrange")?;
        if !matches!(frame.kind, FrameKind::CMapSection(CMapSection::BfRange)) {
            return Err(syntax(
                pos,
                &format!("`{}`", closing_token(&frame.kind)),
                "`endbfrange`",
            ));
        }
        if frame.children.len() % 3 != 0 {
            return Err(syntax(
                pos,
                "start/end/destination triples in bfrange",
                &format!("{} entries", frame.children.len()),
            ));
        }
        let mut ranges = Vec::with_capacity(frame.children.len() / 3);
        let mut it = frame.children.into_iter();
        while let (Some(start), Some(end), Some(dest)) = (it.next(), it.next(), it.next()) {
            let (ObjKind::CodeChar(s), ObjKind::CodeChar(e)) = (&start.kind, &end.kind) else {
                return Err(syntax(
                    start.pos,
                    "character codes at the start of a bfrange entry",
                    start.kind.type_name(),
                ));
            };
            let dest_pos = dest.pos;
            let dest = match dest.kind {
                ObjKind::CodeChar(d) => BfRangeDest::Code(d),
                ObjKind::Array(items) => BfRangeDest::Array(
                    items
                        .iter()
                        .filter_map(|o| match &o.kind {
                            ObjKind::CodeChar(d) => Some(*d),
                            _ => None,
                        })
                        .collect(),
                ),
                other => {
                    return Err(syntax(
                        dest_pos,
                        "a character code or array destination",
                        other.type_name(),
                    ))
                }
            };
            ranges.push(BfRange {
                start: *s,
                end: *e,
                dest,
            });
        }
        let Some(FrameKind::Resource(resource)) =
            self.stack.last_mut().map(|f| &mut f.kind)
        else {
            return Err(syntax(pos, "an open CMap resource", "`endbfrange`"));
        };
        resource.bfranges.extend(ranges);
        Ok(())
    }

    fn reduce_codespacerange(&mut self, pos: Pos) -> Result<(), ParseError> {
        let frame = self.pop_frame(pos, "endcodespacerange")?;
        if !matches!(
            frame.kind,
            FrameKind::CMapSection(CMapSection::CodeSpaceRange)
        ) {
            return Err(syntax(
                pos,
                &format!("`{}`", closing_token(&frame.kind)),
                "`endcodespacerange`",
            ));
        }
        let mut children = frame.children;
        if children.len() != 2 {
            log::warn!(
                "{}: codespacerange expects one low/high pair, found {} entries",
                frame.pos,
                children.len()
            );
        }
        let high = children.pop();
        let low = children.pop();
        let (Some(low), Some(high)) = (low, high) else {
            return Err(syntax(pos, "a low/high pair", "`endcodespacerange`"));
        };
        let (ObjKind::CodeChar(l), ObjKind::CodeChar(h)) = (&low.kind, &high.kind) else {
            return Err(syntax(
                low.pos,
                "character codes in codespacerange",
                low.kind.type_name(),
            ));
        };
        let Some(FrameKind::Resource(resource)) =
            self.stack.last_mut().map(|f| &mut f.kind)
        else {
            return Err(syntax(pos, "an open CMap resource", "`endcodespacerange`"));
        };
        resource.codespace = (*l, *h);
        Ok(())
    }

    fn content_operator(&mut self, token: &Token) -> Result<(), ParseError> {
        let Some(frame) = self.stack.last_mut() else {
            return Ok(());
        };
        operators::handle_operator(
            &mut frame.children,
            &token.text,
            token.pos,
            &mut self.doc.cs,
            &self.doc.color_space,
        )
    }

    fn finish(&mut self) -> Result<(), ParseError> {
        if self.stack.len() > 1 && self.doc.version != (0, 0) {
            if let Some(frame) = self.stack.last() {
                return Err(ParseError::Eof {
                    pos: frame.pos,
                    expected: format!("`{}`", closing_token(&frame.kind)),
                });
            }
        }
        // headerless byte streams flush whatever the root frame holds
        self.flush_root();
        Ok(())
    }

    fn flush_root(&mut self) {
        if let Some(root) = self.stack.first_mut() {
            self.doc.objects.append(&mut root.children);
        }
    }

    fn merge_fontfile_metadata(&mut self) {
        for (id, dict) in std::mem::take(&mut self.fontfiles) {
            for obj in &mut self.doc.objects {
                if let ObjKind::Indirect(ind) = &mut obj.kind {
                    if ind.id == id {
                        for (key, value) in &dict {
                            ind.metadata.insert(key.clone(), value.clone());
                        }
                    }
                }
            }
        }
    }

    /// Decode and sub-parse the recorded stream bodies. When a sub-parse
    /// discovers new CMap resources the worklist restarts (minus the entry
    /// that produced them) so every other stream observes the new CMaps.
    fn decode_deferred_streams(&mut self) -> Result<(), ParseError> {
        let mut queue = std::mem::take(&mut self.deferred);
        let mut index = 0;
        while index < queue.len() {
            if self.decode_stream_at(queue[index])? {
                queue.remove(index);
                index = 0;
                continue;
            }
            index += 1;
        }
        Ok(())
    }

    /// Returns true when the stream's sub-parse produced new resources.
    fn decode_stream_at(&mut self, index: usize) -> Result<bool, ParseError> {
        let (id, gen, skip, flate, declared, encoded, already_decoded) = {
            let Some(Obj {
                kind: ObjKind::Indirect(ind),
                ..
            }) = self.doc.objects.get(index)
            else {
                return Ok(false);
            };
            let Some(stream) = &ind.stream else {
                return Ok(false);
            };
            let type_name = ind
                .metadata
                .get("Type")
                .and_then(|o| o.kind.as_name())
                .unwrap_or("");
            let skip = matches!(type_name, "Metadata" | "FontDescriptor" | "XRef")
                || type_name.starts_with("FontFile");
            let declared = match ind.metadata.get("Length").map(|o| &o.kind) {
                Some(ObjKind::Integer(v)) => Some(*v),
                Some(ObjKind::IndirectRef { id: rid, .. }) => {
                    resolve_length_ref(&self.doc, *rid)
                }
                _ => None,
            };
            (
                ind.id,
                ind.gen,
                skip,
                filter_is_flate(&ind.metadata),
                declared,
                stream.encoded.clone(),
                !stream.decoded.is_empty(),
            )
        };
        if skip {
            return Ok(false);
        }

        if !already_decoded && !encoded.is_empty() {
            if !flate {
                log::debug!(
                    "object {} {}: unsupported filter, leaving the body raw",
                    id,
                    gen
                );
                return Ok(false);
            }
            if let Some(declared) = declared {
                if declared < 0 || declared as usize != encoded.len() {
                    return Err(ParseError::LengthMismatch {
                        id,
                        gen,
                        declared,
                        actual: encoded.len(),
                    });
                }
            }
            let decoded = flate_decode(&encoded).map_err(|err| ParseError::FlateDecode {
                id,
                gen,
                reason: err.to_string(),
            })?;
            if let Some(Obj {
                kind: ObjKind::Indirect(ind),
                ..
            }) = self.doc.objects.get_mut(index)
            {
                if let Some(stream) = &mut ind.stream {
                    stream.decoded = decoded;
                }
            }
        }

        let body = match self.doc.objects.get(index) {
            Some(Obj {
                kind: ObjKind::Indirect(ind),
                ..
            }) => ind
                .stream
                .as_ref()
                .map(|s| s.decoded.clone())
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        if body.is_empty() {
            return Ok(false);
        }

        let mut resources = self.inherited.clone();
        resources.extend(self.doc.resources.iter().cloned());
        let sub = Parser::with_state(
            Lexer::new(&body),
            self.doc.color_space.clone(),
            resources,
            self.doc.cs,
        )
        .parse()?;
        self.doc.cs = sub.cs;
        let found_resources = !sub.resources.is_empty();
        if let Some(Obj {
            kind: ObjKind::Indirect(ind),
            ..
        }) = self.doc.objects.get_mut(index)
        {
            if let Some(stream) = &mut ind.stream {
                stream.objs = sub.objects;
            }
        }
        if found_resources {
            self.doc.resources.extend(sub.resources);
        }
        Ok(found_resources)
    }

    /// Every string-typed object inside a stream contributes a trimmed
    /// fragment, in document order.
    fn collect_text(&mut self) {
        let mut text = Vec::new();
        for obj in &self.doc.objects {
            let ObjKind::Indirect(ind) = &obj.kind else {
                continue;
            };
            let Some(stream) = &ind.stream else {
                continue;
            };
            for inner in &stream.objs {
                match &inner.kind {
                    ObjKind::Fragment(s) => text.push(s.trim().to_string()),
                    ObjKind::HexString(s) => text.push(s.trim().to_string()),
                    ObjKind::LiteralString(bytes) => {
                        text.push(String::from_utf8_lossy(bytes).trim().to_string())
                    }
                    _ => {}
                }
            }
        }
        self.doc.text = text;
    }

    fn push_child(&mut self, obj: Obj) {
        match self.stack.last_mut() {
            Some(frame) => frame.children.push(obj),
            None => self.doc.objects.push(obj),
        }
    }

    fn top_children(&mut self) -> &mut Vec<Obj> {
        if self.stack.is_empty() {
            self.stack.push(Frame::root());
        }
        let last = self.stack.len() - 1;
        &mut self.stack[last].children
    }

    fn pop_frame(&mut self, pos: Pos, found: &str) -> Result<Frame, ParseError> {
        if self.stack.len() > 1 {
            if let Some(frame) = self.stack.pop() {
                return Ok(frame);
            }
        }
        Err(syntax(pos, "an open container", &format!("`{}`", found)))
    }

    fn pop_int_child(&mut self, pos: Pos, found: &str) -> Result<i64, ParseError> {
        match self.top_children().pop() {
            Some(obj) => obj
                .kind
                .as_i64()
                .ok_or_else(|| syntax(obj.pos, "an integer", obj.kind.type_name())),
            None => Err(syntax(pos, "an integer", &format!("`{}`", found))),
        }
    }
}

fn resolve_length_ref(doc: &Document, id: i64) -> Option<i64> {
    doc.get_by_id(id)?.objs.last()?.kind.as_i64()
}

fn filter_is_flate(dict: &Dict) -> bool {
    match dict.get("Filter").map(|o| &o.kind) {
        Some(ObjKind::Name(name)) => name == "FlateDecode",
        Some(ObjKind::Array(items)) => {
            matches!(items.first().map(|o| &o.kind), Some(ObjKind::Name(name)) if name == "FlateDecode")
        }
        _ => false,
    }
}

fn flate_decode(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

fn fold_xref(frame: Frame) -> Result<XrefSection, ParseError> {
    let pos = frame.pos;
    let mut children = frame.children;
    if children.len() < 2 {
        return Err(syntax(
            pos,
            "an xref subsection header",
            &format!("{} objects", children.len()),
        ));
    }
    let mut rest = children.split_off(2);
    let first_id = children[0]
        .kind
        .as_i64()
        .ok_or_else(|| syntax(children[0].pos, "an integer", children[0].kind.type_name()))?;
    let declared = children[1]
        .kind
        .as_i64()
        .ok_or_else(|| syntax(children[1].pos, "an integer", children[1].kind.type_name()))?;

    let startxref = match rest.pop() {
        Some(obj) => obj
            .kind
            .as_i64()
            .ok_or_else(|| syntax(obj.pos, "a startxref offset", obj.kind.type_name()))?,
        None => return Err(syntax(pos, "a startxref offset", "nothing")),
    };

    // scan back for the trailer dictionary, discarding anything between it
    // and the startxref offset
    let mut trailer = None;
    while let Some(obj) = rest.pop() {
        if let ObjKind::Dictionary(dict) = obj.kind {
            trailer = Some(dict);
            break;
        }
    }
    let Some(trailer) = trailer else {
        return Err(syntax(pos, "a trailer dictionary", "`%%EOF`"));
    };

    if rest.len() % 3 != 0 || declared != (rest.len() / 3) as i64 {
        return Err(syntax(
            pos,
            &format!("{} xref entries", declared),
            &format!("{} objects", rest.len()),
        ));
    }
    let mut entries = Vec::with_capacity(rest.len() / 3);
    let mut it = rest.into_iter();
    while let (Some(offset), Some(gen), Some(kind)) = (it.next(), it.next(), it.next()) {
        let offset_v = offset
            .kind
            .as_i64()
            .ok_or_else(|| syntax(offset.pos, "an integer xref offset", offset.kind.type_name()))?;
        let gen_v = gen
            .kind
            .as_i64()
            .ok_or_else(|| syntax(gen.pos, "an integer generation", gen.kind.type_name()))?;
        let kind_v = match &kind.kind {
            ObjKind::Keyword(word) if word == "f" => XrefEntryKind::Free,
            ObjKind::Keyword(word) if word == "n" => XrefEntryKind::InUse,
            other => return Err(syntax(kind.pos, "`f` or `n`", other.type_name())),
        };
        entries.push(XrefEntry {
            offset: offset_v,
            gen: gen_v,
            kind: kind_v,
        });
    }
    Ok(XrefSection {
        first_id,
        entries,
        trailer,
        startxref,
    })
}

fn decode_hex_pairs(raw: &str, pos: Pos) -> String {
    let mut nibbles = collect_nibbles(raw, pos);
    if nibbles.len() % 2 != 0 {
        nibbles.push(0);
    }
    let mut out = String::new();
    for pair in nibbles.chunks_exact(2) {
        let value = ((pair[0] << 4) | pair[1]) as u32;
        push_unit(&mut out, value);
    }
    out
}

/// Decode a hex string through the active CMap resources: 16-bit codes,
/// bfchar first, then bfranges, unmapped codes pass through. Code points
/// above 0xFFFF split into two 16-bit units.
fn decode_hex_groups(raw: &str, resources: &[Resource], pos: Pos) -> String {
    let nibbles = collect_nibbles(raw, pos);
    if nibbles.len() % 4 != 0 {
        log::warn!(
            "{}: hex string of {} digits is not a whole number of 16-bit codes",
            pos,
            nibbles.len()
        );
    }
    let mut out = String::new();
    for group in nibbles.chunks_exact(4) {
        let code = ((group[0] as u32) << 12)
            | ((group[1] as u32) << 8)
            | ((group[2] as u32) << 4)
            | group[3] as u32;
        let mapped = lookup_code(resources, code);
        if mapped > 0xFFFF {
            push_unit(&mut out, mapped >> 16);
            push_unit(&mut out, mapped & 0xFFFF);
        } else {
            push_unit(&mut out, mapped);
        }
    }
    out
}

fn collect_nibbles(raw: &str, pos: Pos) -> Vec<u8> {
    let mut nibbles = Vec::with_capacity(raw.len());
    for byte in raw.bytes() {
        match hex_nibble(byte) {
            Some(n) => nibbles.push(n),
            None => log::warn!(
                "{}: `{}` is not a hexadecimal digit",
                pos,
                byte as char
            ),
        }
    }
    nibbles
}

fn lookup_code(resources: &[Resource], code: u32) -> u32 {
    for res in resources {
        if let Some(dest) = res.bfchar(code) {
            return dest;
        }
    }
    for res in resources {
        if let Some(dest) = res.bfrange(code) {
            return dest;
        }
    }
    code
}

fn push_unit(out: &mut String, unit: u32) {
    out.push(char::from_u32(unit).unwrap_or(char::REPLACEMENT_CHARACTER));
}
