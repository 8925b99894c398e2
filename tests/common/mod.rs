#![allow(dead_code)]

use std::io::Write;

use pdfq::model::Document;
use pdfq::parser;

pub fn parse_bytes(bytes: &[u8]) -> Document {
    parser::parse(bytes).expect("failed to parse PDF")
}

pub fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).expect("failed to compress");
    encoder.finish().expect("failed to finish compression")
}

/// A minimal document wrapping `content` in one uncompressed content stream.
pub fn doc_with_content(content: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "%PDF-1.4\n1 0 obj\n<< /Length {} >>\nstream\n",
        content.len()
    )
    .into_bytes();
    out.extend_from_slice(content);
    out.extend_from_slice(b"\nendstream\nendobj\n%%EOF\n");
    out
}

/// Same, with the body flate-compressed and the filter declared.
pub fn doc_with_flate_content(content: &[u8]) -> Vec<u8> {
    let compressed = zlib(content);
    let mut out = format!(
        "%PDF-1.4\n1 0 obj\n<< /Length {} /Filter /FlateDecode >>\nstream\n",
        compressed.len()
    )
    .into_bytes();
    out.extend_from_slice(&compressed);
    out.extend_from_slice(b"\nendstream\nendobj\n%%EOF\n");
    out
}

/// A ToUnicode CMap: bfchar 0041→0048 and bfrange 0042..0044→0065.
pub const CMAP_BODY: &[u8] = b"/CIDInit /ProcSet findresource begin
12 dict begin
begincmap
/CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def
/CMapName /Adobe-Identity-UCS def
/CMapType 2 def
1 begincodespacerange
<0000> <FFFF>
endcodespacerange
1 beginbfchar
<0041> <0048>
endbfchar
1 beginbfrange
<0042> <0044> <0065>
endbfrange
endcmap
CMapName currentdict /CMap defineresource pop
end
end";

/// A document holding a content stream followed by extra streams; every
/// stream body is stored uncompressed with an exact /Length.
pub fn doc_with_streams(bodies: &[&[u8]]) -> Vec<u8> {
    let mut out = b"%PDF-1.4\n".to_vec();
    for (index, body) in bodies.iter().enumerate() {
        out.extend_from_slice(
            format!("{} 0 obj\n<< /Length {} >>\nstream\n", index + 1, body.len()).as_bytes(),
        );
        out.extend_from_slice(body);
        out.extend_from_slice(b"\nendstream\nendobj\n");
    }
    out.extend_from_slice(b"%%EOF\n");
    out
}
