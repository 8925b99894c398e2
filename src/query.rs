use std::fmt;

#[derive(Debug)]
pub enum QueryError {
    /// Unrecognised byte or unterminated construct in the query string.
    Tokenize { offset: usize, message: String },
    Compile { message: String },
    Run { message: String },
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::Tokenize { offset, message } => {
                write!(f, "query:{}: {}", offset, message)
            }
            QueryError::Compile { message } => write!(f, "query: {}", message),
            QueryError::Run { message } => write!(f, "query: {}", message),
        }
    }
}

impl std::error::Error for QueryError {}

fn compile_error(message: impl Into<String>) -> QueryError {
    QueryError::Compile {
        message: message.into(),
    }
}

fn run_error(message: impl Into<String>) -> QueryError {
    QueryError::Run {
        message: message.into(),
    }
}

/// One instruction of a compiled query program.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Backward jump target.
    Label,
    /// Emit a row of up to `n` fragments from the cursor, advancing it.
    Print(usize),
    /// Emit a row holding the fragment at an absolute index.
    PrintIndex(usize),
    IncCursor(usize),
    SetCursor(usize),
    /// Scan forward for an equal fragment; on a hit the cursor lands one
    /// past it.
    SearchSet(String),
    /// Loop conditions; folded into `Jump` by `]`.
    StopAtStr(String),
    StopAtIdx(usize),
    /// Jump back to `label` while `condition` is not met.
    Jump { condition: Condition, label: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eof,
    Index(usize),
    Fragment(String),
}

#[derive(Debug, PartialEq)]
struct QueryToken {
    text: String,
    offset: usize,
}

fn token(text: impl Into<String>, offset: usize) -> QueryToken {
    QueryToken {
        text: text.into(),
        offset,
    }
}

fn tokenize(query: &str) -> Result<Vec<QueryToken>, QueryError> {
    let bytes = query.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'#' | b'+' => {
                let marker = i;
                let mut digits = 0;
                while i + 1 + digits < bytes.len() && bytes[i + 1 + digits].is_ascii_digit() {
                    digits += 1;
                }
                if digits == 0 {
                    return Err(QueryError::Tokenize {
                        offset: marker,
                        message: format!("missing number after `{}`", bytes[marker] as char),
                    });
                }
                tokens.push(token(&query[marker..marker + 1], marker));
                tokens.push(token(&query[marker + 1..marker + 1 + digits], marker + 1));
                i += 1 + digits;
            }
            b'"' => {
                let close = match bytes[i + 1..].iter().position(|&b| b == b'"') {
                    Some(rel) => i + 1 + rel,
                    None => {
                        return Err(QueryError::Tokenize {
                            offset: i,
                            message: "unterminated string".to_string(),
                        })
                    }
                };
                tokens.push(token("\"", i));
                tokens.push(token(&query[i + 1..close], i + 1));
                tokens.push(token("\"", close));
                i = close + 1;
            }
            b'[' | b']' | b'@' | b'$' | b'{' | b'}' | b'|' => {
                tokens.push(token(&query[i..i + 1], i));
                i += 1;
            }
            b' ' | b'\t' | b'\n' | b'\r' | b',' | b'-' => i += 1,
            b'0'..=b'9' => {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                tokens.push(token(&query[start..i], start));
            }
            other => {
                return Err(QueryError::Tokenize {
                    offset: i,
                    message: format!("unrecognised byte `{}`", other as char),
                })
            }
        }
    }
    Ok(tokens)
}

/// Compile a query expression into a linear program.
pub fn compile(query: &str) -> Result<Vec<Op>, QueryError> {
    let tokens = tokenize(query)?;
    let mut program: Vec<Op> = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        match tokens[i].text.as_str() {
            "#" => {
                let n = expect_number(&tokens, i + 1, "`#`")?;
                program.push(Op::PrintIndex(n));
                i += 2;
            }
            "+" => {
                let n = expect_number(&tokens, i + 1, "`+`")?;
                program.push(Op::IncCursor(n));
                i += 2;
            }
            "\"" => {
                // a bare string is a loop terminator literal
                let s = expect_string(&tokens, i)?;
                program.push(Op::StopAtStr(s));
                i += 3;
            }
            "@" => {
                match tokens.get(i + 1).map(|t| t.text.as_str()) {
                    Some("\"") => {
                        let s = expect_string(&tokens, i + 1)?;
                        program.push(Op::SearchSet(s));
                        i += 4;
                    }
                    Some("#") => {
                        let n = expect_number(&tokens, i + 2, "`@#`")?;
                        program.push(Op::SetCursor(n));
                        i += 3;
                    }
                    _ => return Err(compile_error("expected `\"` or `#` after `@`")),
                }
            }
            "$" => {
                match tokens.get(i + 1).map(|t| t.text.as_str()) {
                    Some("\"") => {
                        let s = expect_string(&tokens, i + 1)?;
                        program.push(Op::StopAtStr(s));
                        i += 4;
                    }
                    Some("#") => {
                        let n = expect_number(&tokens, i + 2, "`$#`")?;
                        program.push(Op::StopAtIdx(n));
                        i += 3;
                    }
                    _ => return Err(compile_error("expected `\"` or `#` after `$`")),
                }
            }
            "[" => {
                program.push(Op::Label);
                let n = expect_number(&tokens, i + 1, "`[`")?;
                if n == 0 {
                    return Err(compile_error("fragment count in `[` must be positive"));
                }
                program.push(Op::Print(n));
                i += 2;
            }
            "]" => {
                let label = program
                    .iter()
                    .rposition(|op| matches!(op, Op::Label))
                    .ok_or_else(|| compile_error("`]` without a matching `[`"))?;
                let condition = match program.last() {
                    Some(Op::Print(_)) => Condition::Eof,
                    Some(Op::SearchSet(s)) | Some(Op::StopAtStr(s)) => {
                        Condition::Fragment(s.clone())
                    }
                    Some(Op::SetCursor(n)) | Some(Op::StopAtIdx(n)) => Condition::Index(*n),
                    _ => return Err(compile_error("`]` needs a print or a loop condition")),
                };
                if !matches!(condition, Condition::Eof) {
                    // the condition op folds into the jump
                    program.pop();
                }
                program.push(Op::Jump { condition, label });
                i += 1;
            }
            "{" | "}" | "|" => {
                return Err(compile_error(format!(
                    "`{}` is not supported",
                    tokens[i].text
                )))
            }
            text => {
                let n: usize = text
                    .parse()
                    .map_err(|_| compile_error(format!("invalid token `{}`", text)))?;
                if !program.iter().any(|op| matches!(op, Op::Label)) {
                    return Err(compile_error(format!(
                        "bare number `{}` outside a loop",
                        n
                    )));
                }
                program.push(Op::Print(n));
                i += 1;
            }
        }
    }
    Ok(program)
}

fn expect_number(tokens: &[QueryToken], at: usize, after: &str) -> Result<usize, QueryError> {
    let Some(tok) = tokens.get(at) else {
        return Err(compile_error(format!("missing number after {}", after)));
    };
    tok.text
        .parse()
        .map_err(|_| compile_error(format!("expected a number after {}, found `{}`", after, tok.text)))
}

/// `at` points at the opening quote; the content and closing quote follow.
fn expect_string(tokens: &[QueryToken], at: usize) -> Result<String, QueryError> {
    match (tokens.get(at + 1), tokens.get(at + 2)) {
        (Some(content), Some(close)) if close.text == "\"" => Ok(content.text.clone()),
        _ => Err(compile_error("unterminated string")),
    }
}

/// Execute a compiled program over the extracted text. Pure in
/// `(program, data)`.
pub fn run(program: &[Op], data: &[String]) -> Result<Vec<Vec<String>>, QueryError> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut cursor = 0usize;
    let mut pc = 0usize;
    while pc < program.len() {
        match &program[pc] {
            Op::Label => {}
            Op::Print(k) => {
                let mut row = Vec::new();
                for _ in 0..*k {
                    if cursor >= data.len() {
                        break;
                    }
                    row.push(data[cursor].clone());
                    cursor += 1;
                }
                rows.push(row);
            }
            Op::PrintIndex(i) => {
                let fragment = data.get(*i).ok_or_else(|| {
                    run_error(format!(
                        "index {} out of range, text has {} fragments",
                        i,
                        data.len()
                    ))
                })?;
                rows.push(vec![fragment.clone()]);
            }
            Op::IncCursor(n) => cursor += n,
            Op::SetCursor(n) => cursor = *n,
            Op::SearchSet(s) => {
                // a miss leaves the cursor where it was
                if let Some(hit) = data
                    .iter()
                    .skip(cursor)
                    .position(|fragment| fragment == s)
                {
                    cursor = cursor + hit + 1;
                }
            }
            Op::StopAtStr(_) | Op::StopAtIdx(_) => {
                return Err(run_error("stop condition outside a loop"))
            }
            Op::Jump { condition, label } => match condition {
                Condition::Eof => {
                    if cursor != data.len() {
                        pc = *label;
                    }
                }
                Condition::Index(n) => {
                    if cursor != *n {
                        if cursor >= data.len() {
                            return Err(run_error(format!(
                                "cursor reached the end of text before index {}",
                                n
                            )));
                        }
                        pc = *label;
                    }
                }
                Condition::Fragment(s) => {
                    if cursor == data.len() {
                        return Err(run_error(format!(
                            "reached the end of text while looking for `{}`",
                            s
                        )));
                    }
                    if data[cursor] != *s {
                        pc = *label;
                    }
                }
            },
        }
        pc += 1;
    }
    Ok(rows)
}
