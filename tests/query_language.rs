mod common;

use pdfq::query;

use crate::common::{doc_with_content, parse_bytes};

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn absolute_index_query() {
    let text = strings(&["num 0", "num 1", "num 3"]);
    let program = query::compile("#2").expect("compile");
    let rows = query::run(&program, &text).expect("run");
    assert_eq!(rows, vec![vec!["num 3".to_string()]]);
}

#[test]
fn anchored_loop_prints_everything_after_the_anchor() {
    let text = strings(&[
        "Should skip 0",
        "START TEXT 1",
        "Should Print this 2",
        "And this 3",
    ]);
    let program = query::compile(r#"@"START TEXT 1"[1]"#).expect("compile");
    let rows = query::run(&program, &text).expect("run");
    assert_eq!(
        rows,
        vec![
            vec!["Should Print this 2".to_string()],
            vec!["And this 3".to_string()],
        ]
    );
}

#[test]
fn query_runs_over_extracted_pdf_text() {
    let doc = parse_bytes(&doc_with_content(
        b"BT (HEADER) Tj (alpha) Tj (beta) Tj (gamma) Tj ET",
    ));
    assert_eq!(doc.text, strings(&["HEADER", "alpha", "beta", "gamma"]));

    let program = query::compile(r#"@"HEADER"[3]"#).expect("compile");
    let rows = query::run(&program, &doc.text).expect("run");
    assert_eq!(
        rows,
        vec![vec![
            "alpha".to_string(),
            "beta".to_string(),
            "gamma".to_string()
        ]]
    );
}

#[test]
fn cursor_set_and_advance_compose() {
    let text = strings(&["a", "b", "c", "d", "e"]);
    let program = query::compile("@#1 +2 [1]").expect("compile");
    let rows = query::run(&program, &text).expect("run");
    assert_eq!(rows, vec![vec!["d".to_string()], vec!["e".to_string()]]);
}

#[test]
fn empty_query_over_any_text_is_empty() {
    let text = strings(&["a", "b"]);
    let program = query::compile("").expect("compile");
    assert!(query::run(&program, &text).expect("run").is_empty());
    assert!(query::run(&program, &[]).expect("run").is_empty());
}

#[test]
fn compile_then_run_is_deterministic() {
    let text = strings(&["x", "y", "z"]);
    let program = query::compile("[2]").expect("compile");
    let first = query::run(&program, &text).expect("first");
    let second = query::run(&program, &text).expect("second");
    assert_eq!(first, second);
}

#[test]
fn bad_query_bytes_report_their_offset() {
    let err = query::compile("#1 !").unwrap_err();
    assert!(err.to_string().contains("3"), "got {}", err);
}

#[test]
fn missing_operand_is_a_parse_error() {
    assert!(query::compile("#").is_err());
    assert!(query::compile("@#").is_err());
    assert!(query::compile("$#x").is_err());
    assert!(query::compile("+").is_err());
}
