use crate::error::ParseError;
use crate::model::{Dict, Obj, ObjKind, Pos};

/// PDF operator categories, per the reference:
///  General graphics state  w, J, j, M, d, ri, i, gs
///  Special graphics state  q, Q, cm
///  Path construction       m, l, c, v, y, h, re
///  Path painting           S, s, f, F, f*, B, B*, b, b*, n
///  Clipping paths          W, W*
///  Text objects            BT, ET
///  Text state              Tc, Tw, Tz, TL, Tf, Tr, Ts
///  Text positioning        Td, TD, Tm, T*
///  Text showing            Tj, TJ, ', "
///  Type 3 fonts            d0, d1
///  Color                   CS, cs, SC, SCN, sc, scn, G, g, RG, rg, K, k
///  Shading patterns        sh
///  Inline images           BI, ID, EI
///  XObjects                Do
///  Marked content          MP, DP, BMC, BDC, EMC
///  Compatibility           BX, EX
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorSpace {
    #[default]
    Unset,
    DeviceGray,
    CalGray,
    DeviceRgb,
    CalRgb,
    DeviceCmyk,
    Lab,
    IccBased,
    Indexed,
    Pattern,
    Separation,
    DeviceN,
    DefaultCmyk,
}

impl ColorSpace {
    pub fn from_name(name: &str) -> Option<ColorSpace> {
        match name {
            "DeviceGray" => Some(ColorSpace::DeviceGray),
            "CalGray" => Some(ColorSpace::CalGray),
            "DeviceRGB" => Some(ColorSpace::DeviceRgb),
            "CalRGB" => Some(ColorSpace::CalRgb),
            "DeviceCMYK" => Some(ColorSpace::DeviceCmyk),
            "Lab" => Some(ColorSpace::Lab),
            "ICCBased" => Some(ColorSpace::IccBased),
            "Indexed" => Some(ColorSpace::Indexed),
            "Pattern" => Some(ColorSpace::Pattern),
            "Separation" => Some(ColorSpace::Separation),
            "DeviceN" => Some(ColorSpace::DeviceN),
            "DefaultCMYK" => Some(ColorSpace::DefaultCmyk),
            _ => None,
        }
    }
}

/// Resolve an operand of `CS`/`cs`: a family name directly, or an alias
/// looked up through the document's ColorSpace dictionary.
pub fn resolve_color_space(
    name: &str,
    color_space: &Dict,
    pos: Pos,
) -> Result<ColorSpace, ParseError> {
    if let Some(cs) = ColorSpace::from_name(name) {
        return Ok(cs);
    }
    if let Some(table) = color_space.get("ColorSpace").and_then(|o| o.kind.as_dict()) {
        if let Some(target) = table.get(name).and_then(|o| o.kind.as_name()) {
            if let Some(cs) = ColorSpace::from_name(target) {
                return Ok(cs);
            }
        }
    }
    Err(ParseError::ColorSpace {
        pos,
        name: name.to_string(),
    })
}

/// Apply a content-stream operator to the operand stack (the current
/// frame's pending children). Operand-type mismatches are logged and the
/// operator degrades to a no-op; unknown operators are fatal.
pub fn handle_operator(
    children: &mut Vec<Obj>,
    operator: &str,
    pos: Pos,
    cs: &mut ColorSpace,
    color_space: &Dict,
) -> Result<(), ParseError> {
    match operator {
        "w" | "J" | "j" | "M" | "i" => pop_numbers(children, 1, operator),
        "d" => pop_any(children, 2),
        "ri" | "gs" => pop_any(children, 1),
        "q" | "Q" => {}
        "cm" => pop_numbers(children, 6, operator),

        "m" | "l" => pop_numbers(children, 2, operator),
        "c" => pop_numbers(children, 6, operator),
        "v" | "y" | "re" => pop_numbers(children, 4, operator),
        "h" => {}

        "S" | "s" | "f" | "F" | "f*" | "B" | "B*" | "b" | "b*" | "n" => {}
        "W" | "W*" => {}

        "BT" | "ET" => {}
        "Tc" | "Tw" | "Tz" | "TL" | "Tr" | "Ts" => pop_numbers(children, 1, operator),
        "Tf" => pop_any(children, 2),
        "T*" => {}
        "Td" | "TD" => pop_numbers(children, 2, operator),
        "Tm" => pop_numbers(children, 6, operator),

        // The string shown by Tj is already on the stack and stays there;
        // text collection picks it up from the stream's object list.
        "Tj" => {}
        "TJ" => show_text_array(children, pos),
        "'" => prepend_newline(children),
        "\"" => {
            let text = match children.last().map(|o| &o.kind) {
                Some(ObjKind::LiteralString(_)) | Some(ObjKind::HexString(_)) => children.pop(),
                _ => None,
            };
            pop_numbers(children, 2, operator);
            if let Some(mut obj) = text {
                prepend_newline_to(&mut obj);
                children.push(obj);
            }
        }

        "d0" => pop_numbers(children, 2, operator),
        "d1" => pop_numbers(children, 6, operator),

        "CS" | "cs" => match children.pop() {
            Some(obj) => match obj.kind.as_name() {
                Some(name) => *cs = resolve_color_space(name, color_space, obj.pos)?,
                None => log::warn!(
                    "{}: operator `{}` expected a name, found {}",
                    obj.pos,
                    operator,
                    obj.kind.type_name()
                ),
            },
            None => log::warn!("{}: operator `{}` with no operand", pos, operator),
        },
        "SC" | "sc" => tint_operands(children, *cs, operator, false),
        "SCN" | "scn" => tint_operands(children, *cs, operator, true),
        "RG" | "rg" => {
            *cs = ColorSpace::DeviceRgb;
            pop_numbers(children, 3, operator);
        }
        "K" | "k" => {
            *cs = ColorSpace::DeviceCmyk;
            pop_numbers(children, 4, operator);
        }
        "G" | "g" => pop_any(children, 1),

        "sh" => pop_any(children, 1),
        "Do" => pop_any(children, 1),

        "MP" | "BMC" => pop_any(children, 1),
        "DP" | "BDC" => pop_any(children, 2),
        "EMC" => {}
        "BX" | "EX" => {}

        // Inline images are consumed at the lexer level.
        "BI" | "ID" | "EI" => {}

        _ => {
            return Err(ParseError::UnknownOperator {
                pos,
                operator: operator.to_string(),
            })
        }
    }
    Ok(())
}

/// `TJ`: pop the array operand and fold it into emitted fragments. String
/// elements append to an accumulator; a number in (-450, -200) appends a
/// space; a number below -500 flushes the accumulator as a fragment.
fn show_text_array(children: &mut Vec<Obj>, pos: Pos) {
    let Some(top) = children.pop() else {
        log::warn!("{}: operator `TJ` with no operand", pos);
        return;
    };
    let items = match top.kind {
        ObjKind::Array(items) => items,
        other => {
            log::warn!(
                "{}: operator `TJ` expected an array, found {}",
                top.pos,
                other.type_name()
            );
            return;
        }
    };
    let mut acc = String::new();
    for item in &items {
        match &item.kind {
            ObjKind::LiteralString(bytes) => acc.push_str(&String::from_utf8_lossy(bytes)),
            ObjKind::HexString(text) => acc.push_str(text),
            ObjKind::Integer(_) | ObjKind::Real(_) => {
                let n = item.kind.as_f64().unwrap_or(0.0) as i64;
                if n < -200 && n > -450 {
                    acc.push(' ');
                } else if n < -500 {
                    children.push(Obj::new(
                        ObjKind::Fragment(std::mem::take(&mut acc)),
                        pos,
                    ));
                }
            }
            _ => {}
        }
    }
    children.push(Obj::new(ObjKind::Fragment(acc), pos));
}

fn prepend_newline(children: &mut Vec<Obj>) {
    if let Some(obj) = children.last_mut() {
        prepend_newline_to(obj);
    }
}

fn prepend_newline_to(obj: &mut Obj) {
    match &mut obj.kind {
        ObjKind::LiteralString(bytes) => bytes.insert(0, b'\n'),
        ObjKind::HexString(text) => text.insert(0, '\n'),
        _ => {}
    }
}

/// Pop operands for `SC`/`sc`/`SCN`/`scn`; the arity depends on the
/// current color space. Unlisted families leave the stack untouched.
fn tint_operands(children: &mut Vec<Obj>, cs: ColorSpace, operator: &str, pattern_allowed: bool) {
    match cs {
        ColorSpace::DeviceGray | ColorSpace::CalGray | ColorSpace::Indexed => {
            pop_any(children, 1)
        }
        ColorSpace::DeviceRgb | ColorSpace::CalRgb | ColorSpace::Lab => {
            pop_numbers(children, 3, operator)
        }
        ColorSpace::DeviceCmyk => pop_numbers(children, 4, operator),
        ColorSpace::Pattern if pattern_allowed => {
            pop_any(children, 1);
            pop_numbers(children, 4, operator);
        }
        _ => log::warn!(
            "operator `{}` under color space {:?}: operand count unknown, leaving stack untouched",
            operator,
            cs
        ),
    }
}

/// Pop up to `total` numeric operands; a non-number is consumed, logged,
/// and stops the pops.
fn pop_numbers(children: &mut Vec<Obj>, total: usize, operator: &str) {
    let mut count = 0;
    while count < total {
        let Some(obj) = children.pop() else { return };
        if !obj.kind.is_number() {
            log::warn!(
                "{}: operator `{}` expected a number, found {}",
                obj.pos,
                operator,
                obj.kind.type_name()
            );
            return;
        }
        count += 1;
    }
}

fn pop_any(children: &mut Vec<Obj>, total: usize) {
    for _ in 0..total {
        if children.pop().is_none() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(v: i64) -> Obj {
        Obj::new(ObjKind::Integer(v), Pos::default())
    }

    fn lit(s: &str) -> Obj {
        Obj::new(ObjKind::LiteralString(s.as_bytes().to_vec()), Pos::default())
    }

    fn apply(children: &mut Vec<Obj>, operator: &str) {
        let mut cs = ColorSpace::Unset;
        handle_operator(children, operator, Pos::default(), &mut cs, &Dict::new())
            .expect("operator should apply");
    }

    fn fragments(children: &[Obj]) -> Vec<String> {
        children
            .iter()
            .filter_map(|o| match &o.kind {
                ObjKind::Fragment(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn tj_merges_strings_and_spacing_numbers() {
        let items = vec![lit("AB"), num(-100), lit("CD"), num(-300), lit("EF"), num(-600), lit("GH")];
        let mut children = vec![Obj::new(ObjKind::Array(items), Pos::default())];
        apply(&mut children, "TJ");
        assert_eq!(fragments(&children), vec!["ABCD EF", "GH"]);
    }

    #[test]
    fn tj_minus_500_exactly_emits_single_empty_fragment() {
        let items = vec![num(-500)];
        let mut children = vec![Obj::new(ObjKind::Array(items), Pos::default())];
        apply(&mut children, "TJ");
        assert_eq!(fragments(&children), vec![""]);
    }

    #[test]
    fn tj_real_thresholds_truncate() {
        let items = vec![
            lit("A"),
            Obj::new(ObjKind::Real(-300.7), Pos::default()),
            lit("B"),
        ];
        let mut children = vec![Obj::new(ObjKind::Array(items), Pos::default())];
        apply(&mut children, "TJ");
        assert_eq!(fragments(&children), vec!["A B"]);
    }

    #[test]
    fn tj_without_array_consumes_operand_and_emits_nothing() {
        let mut children = vec![num(3)];
        apply(&mut children, "TJ");
        assert!(children.is_empty());
    }

    #[test]
    fn quote_prepends_newline_to_string_operand() {
        let mut children = vec![lit("line")];
        apply(&mut children, "'");
        assert_eq!(
            children[0].kind,
            ObjKind::LiteralString(b"\nline".to_vec())
        );
    }

    #[test]
    fn quote_on_non_string_is_noop() {
        let mut children = vec![num(7)];
        apply(&mut children, "'");
        assert_eq!(children[0].kind, ObjKind::Integer(7));
    }

    #[test]
    fn double_quote_keeps_string_and_pops_two_numbers() {
        let mut children = vec![num(1), num(2), lit("word")];
        apply(&mut children, "\"");
        assert_eq!(children.len(), 1);
        assert_eq!(
            children[0].kind,
            ObjKind::LiteralString(b"\nword".to_vec())
        );
    }

    #[test]
    fn rg_sets_device_rgb_and_pops_three() {
        let mut children = vec![num(1), num(0), num(0)];
        let mut cs = ColorSpace::Unset;
        handle_operator(&mut children, "rg", Pos::default(), &mut cs, &Dict::new())
            .expect("rg should apply");
        assert_eq!(cs, ColorSpace::DeviceRgb);
        assert!(children.is_empty());
    }

    #[test]
    fn tint_arity_follows_color_space() {
        let mut children = vec![num(1), num(2), num(3), num(4)];
        let mut cs = ColorSpace::DeviceCmyk;
        handle_operator(&mut children, "sc", Pos::default(), &mut cs, &Dict::new())
            .expect("sc should apply");
        assert!(children.is_empty());

        let mut children = vec![num(9)];
        let mut cs = ColorSpace::Unset;
        handle_operator(&mut children, "sc", Pos::default(), &mut cs, &Dict::new())
            .expect("sc should apply");
        assert_eq!(children.len(), 1, "unset color space leaves operands");
    }

    #[test]
    fn scn_pattern_pops_name_and_four_numbers() {
        let mut children = vec![
            num(1),
            num(2),
            num(3),
            num(4),
            Obj::new(ObjKind::Name("P1".to_string()), Pos::default()),
        ];
        let mut cs = ColorSpace::Pattern;
        handle_operator(&mut children, "scn", Pos::default(), &mut cs, &Dict::new())
            .expect("scn should apply");
        assert!(children.is_empty());
    }

    #[test]
    fn cs_resolves_through_document_dictionary() {
        let mut table = Dict::new();
        table.insert(
            "CS0".to_string(),
            Obj::new(ObjKind::Name("DeviceCMYK".to_string()), Pos::default()),
        );
        let mut color_space = Dict::new();
        color_space.insert(
            "ColorSpace".to_string(),
            Obj::new(ObjKind::Dictionary(table), Pos::default()),
        );

        let mut children = vec![Obj::new(ObjKind::Name("CS0".to_string()), Pos::default())];
        let mut cs = ColorSpace::Unset;
        handle_operator(&mut children, "cs", Pos::default(), &mut cs, &color_space)
            .expect("cs should resolve");
        assert_eq!(cs, ColorSpace::DeviceCmyk);
    }

    #[test]
    fn cs_with_unknown_name_is_fatal() {
        let mut children = vec![Obj::new(ObjKind::Name("Nope".to_string()), Pos::default())];
        let mut cs = ColorSpace::Unset;
        let err = handle_operator(&mut children, "cs", Pos::default(), &mut cs, &Dict::new());
        assert!(matches!(err, Err(ParseError::ColorSpace { .. })));
    }

    #[test]
    fn unknown_operator_is_fatal() {
        let mut children = Vec::new();
        let mut cs = ColorSpace::Unset;
        let err = handle_operator(&mut children, "zz9", Pos::default(), &mut cs, &Dict::new());
        assert!(matches!(err, Err(ParseError::UnknownOperator { .. })));
    }

    #[test]
    fn mismatched_operand_stops_pops_without_error() {
        let mut children = vec![lit("x"), num(1)];
        apply(&mut children, "Td");
        // the number popped, the string consumed by the mismatch
        assert!(children.is_empty());
    }
}
