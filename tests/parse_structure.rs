mod common;

use pdfq::model::{ObjKind, XrefEntryKind};
use pdfq::parser;

use crate::common::parse_bytes;

#[test]
fn header_version_round_trips() {
    for (input, version) in [
        (b"%PDF-1.4\n%%EOF\n".as_slice(), (1, 4)),
        (b"%PDF-1.7\n%%EOF\n".as_slice(), (1, 7)),
        (b"%PDF-2.0\n%%EOF\n".as_slice(), (2, 0)),
    ] {
        let doc = parse_bytes(input);
        assert_eq!(doc.version, version, "input {:?}", input);
    }
}

#[test]
fn minimal_document_has_single_eof_marker() {
    let doc = parse_bytes(b"%PDF-1.4\n%%EOF\n");
    assert!(doc.text.is_empty());
    assert_eq!(doc.objects.len(), 1);
    assert_eq!(doc.objects[0].kind, ObjKind::Eof);
}

#[test]
fn indirect_object_metadata_is_folded() {
    let doc = parse_bytes(b"%PDF-1.7\n0 1 obj\n<</Myname /k0tto /Age 2>>\nendobj\n%%EOF\n");
    let ObjKind::Indirect(ind) = &doc.objects[0].kind else {
        panic!("expected an indirect object, got {:?}", doc.objects[0].kind);
    };
    assert_eq!((ind.id, ind.gen), (0, 1));
    assert_eq!(
        ind.metadata.get("Myname").map(|o| &o.kind),
        Some(&ObjKind::Name("k0tto".to_string()))
    );
    assert_eq!(
        ind.metadata.get("Age").map(|o| &o.kind),
        Some(&ObjKind::Integer(2))
    );
}

#[test]
fn page_style_dictionary_with_nested_resources() {
    let input = b"%PDF-1.7
4 0 obj
<<  /Type /Page
/Parent 3 0 R
/MediaBox [0 0 612 792]
/Contents 5 0 R
/Resources << /ProcSet 6 0 R
/Font << /F1 7 0 R >>
>>
>>
endobj
%%EOF
";
    let doc = parse_bytes(input);
    let ObjKind::Indirect(ind) = &doc.objects[0].kind else {
        panic!("expected an indirect object");
    };
    assert_eq!((ind.id, ind.gen), (4, 0));
    let resources = ind
        .metadata
        .get("Resources")
        .and_then(|o| o.kind.as_dict())
        .expect("Resources dictionary");
    let font = resources
        .get("Font")
        .and_then(|o| o.kind.as_dict())
        .expect("Font dictionary");
    assert_eq!(
        font.get("F1").map(|o| &o.kind),
        Some(&ObjKind::IndirectRef { id: 7, gen: 0 })
    );
}

#[test]
fn stream_length_resolves_through_forward_reference() {
    let mut input = b"%PDF-1.7\n1 0 obj\n<< /Length 2 0 R /Filter /FlateDecode >>\nstream\n".to_vec();
    let compressed = common::zlib(b"BT (later) Tj ET");
    input.extend_from_slice(&compressed);
    input.extend_from_slice(b"\nendstream\nendobj\n");
    input.extend_from_slice(format!("2 0 obj\n{}\nendobj\n%%EOF\n", compressed.len()).as_bytes());

    let doc = parse_bytes(&input);
    assert_eq!(doc.text, vec!["later".to_string()]);
}

#[test]
fn unresolved_length_reference_is_not_fatal() {
    let doc = parse_bytes(&{
        let mut input =
            b"%PDF-1.7\n1 0 obj\n<< /Length 9 0 R /Filter /FlateDecode >>\nstream\n".to_vec();
        input.extend_from_slice(&common::zlib(b"BT (still works) Tj ET"));
        input.extend_from_slice(b"\nendstream\nendobj\n%%EOF\n");
        input
    });
    assert_eq!(doc.text, vec!["still works".to_string()]);
}

#[test]
fn xref_section_recovers_trailer_and_entries() {
    let input = b"%PDF-1.7
xref
0 2
0000000000 65535 f
0000000017 00000 n
trailer
<< /Size 2 /Root 1 0 R >>
startxref
456
%%EOF
";
    let doc = parse_bytes(input);
    let section = doc
        .objects
        .iter()
        .find_map(|o| match &o.kind {
            ObjKind::Xref(x) => Some(x),
            _ => None,
        })
        .expect("an xref section");
    assert_eq!(section.first_id, 0);
    assert_eq!(section.startxref, 456);
    assert_eq!(section.entries.len(), 2);
    assert_eq!(section.entries[0].kind, XrefEntryKind::Free);
    assert_eq!(section.entries[1].offset, 17);
    assert_eq!(
        section.trailer.get("Root").map(|o| &o.kind),
        Some(&ObjKind::IndirectRef { id: 1, gen: 0 })
    );
}

#[test]
fn startxref_offset_without_xref_section_flushes_to_objects() {
    let input = b"%PDF-1.7\n1 0 obj\n(ok)\nendobj\nstartxref\n123\n%%EOF\n";
    let doc = parse_bytes(input);
    assert!(doc.objects.iter().any(|o| o.kind == ObjKind::Integer(123)));
    assert!(doc
        .objects
        .iter()
        .any(|o| matches!(&o.kind, ObjKind::Indirect(ind) if ind.id == 1)));
}

#[test]
fn incremental_update_sections_parse_in_order() {
    let input = b"%PDF-1.7\n1 0 obj\n<< >>\nendobj\n%%EOF\n2 0 obj\n<< >>\nendobj\n%%EOF\n";
    let doc = parse_bytes(input);
    let ids: Vec<i64> = doc
        .objects
        .iter()
        .filter_map(|o| match &o.kind {
            ObjKind::Indirect(ind) => Some(ind.id),
            _ => None,
        })
        .collect();
    assert_eq!(ids, vec![1, 2]);
}

#[test]
fn malformed_header_is_rejected() {
    assert!(parser::parse(b"%PDF-one.two\n%%EOF\n").is_err());
}

#[test]
fn dangling_container_is_rejected() {
    assert!(parser::parse(b"%PDF-1.7\n1 0 obj\n<< /A [1 2\n").is_err());
}

#[test]
fn repeated_parses_yield_identical_text() {
    let input = common::doc_with_content(b"BT (alpha) Tj (beta) Tj ET");
    let first = parse_bytes(&input);
    let second = parse_bytes(&input);
    assert_eq!(first.text, second.text);
    assert_eq!(first.text, vec!["alpha".to_string(), "beta".to_string()]);
}
