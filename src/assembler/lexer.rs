//! Line classification: splits one logical source line into a
//! [`Statement`] — a directive or an instruction, with its label (if
//! any) and operands already shape-classified.
//!
//! The grammar is small enough to recognize by hand rather than with
//! one large regex: a line is tokenized (treating a quoted character
//! literal as one token even if it contains whitespace), then the
//! token shapes decide whether it is a directive, an instruction, or
//! neither.

use regex::Regex;

use super::Error;

/// A half-open byte range into the (comment-stripped) source line, used
/// to underline the offending token(s) in an error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Span {
        Span { start, end }
    }
}

#[derive(Debug, Clone)]
pub struct Token {
    pub text: String,
    pub span: Span,
}

/// What grammatical role an instruction operand token plays. Decided at
/// lex time so the first pass can tell a label *use* apart from a
/// register or an immediate without re-parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Code,
    Register,
    Immediate,
    Label,
}

#[derive(Debug, Clone)]
pub struct Operand {
    pub token: Token,
    pub kind: OperandKind,
}

#[derive(Debug, Clone)]
pub enum StatementKind {
    Directive {
        directive_type: Token,
        value: Token,
    },
    Instruction {
        mnemonic: Token,
        operands: Vec<Operand>,
    },
}

#[derive(Debug, Clone)]
pub struct Statement {
    pub label: Option<Token>,
    pub kind: StatementKind,
    pub line_number: usize,
    pub line: String,
}

/// Strip a trailing `;…` comment, but only a `;` that falls outside a
/// quoted character literal — `.BYT ';'` must keep its literal semicolon.
fn strip_comment(line: &str) -> &str {
    let quote_re = Regex::new(r"'(?:\\.|.)'").unwrap();
    let quoted_spans: Vec<(usize, usize)> = quote_re.find_iter(line).map(|m| (m.start(), m.end())).collect();
    for (idx, ch) in line.char_indices() {
        if ch == ';' && !quoted_spans.iter().any(|&(start, end)| idx >= start && idx < end) {
            return &line[..idx];
        }
    }
    line
}

fn tokenize(line: &str) -> Vec<Token> {
    let re = Regex::new(r"'(?:\\.|.)'|[^\s]+").unwrap();
    re.find_iter(line)
        .map(|m| Token {
            text: m.as_str().to_string(),
            span: Span::new(m.start(), m.end()),
        })
        .collect()
}

fn is_label_shape(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_ascii_alphanumeric())
}

fn is_mnemonic_shape(text: &str) -> bool {
    (2..=3).contains(&text.len()) && text.chars().all(|c| c.is_ascii_alphabetic())
}

fn is_register(text: &str) -> bool {
    matches!(text, "pc" | "sp" | "st" | "sb" | "fp")
        || ((text.starts_with('r') || text.starts_with('R'))
            && text.len() > 1
            && text[1..].chars().all(|c| c.is_ascii_digit()))
}

fn is_code(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_ascii_digit())
}

fn is_immediate(text: &str) -> bool {
    let Some(rest) = text.strip_prefix('#') else {
        return false;
    };
    let rest = rest.strip_prefix('-').unwrap_or(rest);
    !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit())
}

fn classify_single_operand(token: &Token) -> Option<OperandKind> {
    if is_code(&token.text) {
        Some(OperandKind::Code)
    } else if is_register(&token.text) {
        Some(OperandKind::Register)
    } else if token.text.len() >= 2 && is_label_shape(&token.text) {
        Some(OperandKind::Label)
    } else {
        None
    }
}

fn classify_second_operand(token: &Token) -> Option<OperandKind> {
    if is_immediate(&token.text) {
        Some(OperandKind::Immediate)
    } else if is_register(&token.text) {
        Some(OperandKind::Register)
    } else if is_label_shape(&token.text) {
        Some(OperandKind::Label)
    } else {
        None
    }
}

/// Try to classify `tokens` as an instruction's mnemonic + operand list.
/// Returns the classified operands if the shape matches one of the six
/// operand forms in the grammar.
fn classify_operands(tokens: &[Token]) -> Option<Vec<Operand>> {
    match tokens {
        [single] => classify_single_operand(single).map(|kind| {
            vec![Operand {
                token: single.clone(),
                kind,
            }]
        }),
        [first, second] => {
            if !is_register(&first.text) {
                return None;
            }
            classify_second_operand(second).map(|kind| {
                vec![
                    Operand {
                        token: first.clone(),
                        kind: OperandKind::Register,
                    },
                    Operand {
                        token: second.clone(),
                        kind,
                    },
                ]
            })
        }
        _ => None,
    }
}

fn is_directive_value_shape(text: &str) -> bool {
    let is_int = {
        let rest = text.strip_prefix('-').unwrap_or(text);
        !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit())
    };
    let is_char_literal = {
        let chars: Vec<char> = text.chars().collect();
        match chars.as_slice() {
            ['\'', _, '\''] => true,
            ['\'', '\\', c, '\''] => matches!(c, 'n' | 't' | '0'),
            _ => false,
        }
    };
    is_int || is_char_literal
}

/// Lex one raw source line. Returns `Ok(None)` for a blank or
/// comment-only line, `Ok(Some(statement))` for a recognized directive
/// or instruction, and `Err` if the line matches neither shape.
pub fn lex_line(line_number: usize, raw_line: &str) -> Result<Option<Statement>, Error> {
    let stripped = strip_comment(raw_line).trim();
    if stripped.is_empty() {
        return Ok(None);
    }

    let tokens = tokenize(stripped);
    let line = stripped.to_string();

    let directive_at = if tokens[0].text.starts_with('.') {
        Some(0)
    } else if tokens.len() >= 2 && tokens[1].text.starts_with('.') {
        Some(1)
    } else {
        None
    };

    if let Some(idx) = directive_at {
        let label = if idx == 1 {
            if !is_label_shape(&tokens[0].text) {
                return Err(unknown_instruction(&tokens[0], line_number, &line));
            }
            Some(tokens[0].clone())
        } else {
            None
        };
        let directive_type = tokens[idx].clone();
        let rest = &tokens[idx + 1..];
        if rest.len() != 1 || !is_directive_value_shape(&rest[0].text) {
            return Err(unknown_instruction(&directive_type, line_number, &line));
        }
        return Ok(Some(Statement {
            label,
            kind: StatementKind::Directive {
                directive_type,
                value: rest[0].clone(),
            },
            line_number,
            line,
        }));
    }

    let with_label = if tokens.len() >= 2
        && is_label_shape(&tokens[0].text)
        && is_mnemonic_shape(&tokens[1].text)
    {
        classify_operands(&tokens[2..]).map(|operands| (Some(tokens[0].clone()), tokens[1].clone(), operands))
    } else {
        None
    };

    let without_label = if is_mnemonic_shape(&tokens[0].text) {
        classify_operands(&tokens[1..]).map(|operands| (None, tokens[0].clone(), operands))
    } else {
        None
    };

    if let Some((label, mnemonic, operands)) = with_label.or(without_label) {
        return Ok(Some(Statement {
            label,
            kind: StatementKind::Instruction { mnemonic, operands },
            line_number,
            line,
        }));
    }

    Err(unknown_instruction(&tokens[0], line_number, &line))
}

fn unknown_instruction(token: &Token, line_number: usize, line: &str) -> Error {
    Error::UnknownInstruction {
        text: token.text.clone(),
        span: Some(token.span),
        line_number,
        line: line.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_and_comment_lines_are_ignored() {
        assert!(lex_line(1, "   ").unwrap().is_none());
        assert!(lex_line(1, "; a whole line comment").unwrap().is_none());
    }

    #[test]
    fn directive_without_label() {
        let stmt = lex_line(1, ".INT 42").unwrap().unwrap();
        assert!(stmt.label.is_none());
        match stmt.kind {
            StatementKind::Directive { directive_type, value } => {
                assert_eq!(directive_type.text, ".INT");
                assert_eq!(value.text, "42");
            }
            _ => panic!("expected directive"),
        }
    }

    #[test]
    fn semicolon_character_literal_is_not_mistaken_for_a_comment() {
        let stmt = lex_line(1, "X .BYT ';'").unwrap().unwrap();
        assert_eq!(stmt.label.unwrap().text, "X");
        match stmt.kind {
            StatementKind::Directive { value, .. } => assert_eq!(value.text, "';'"),
            _ => panic!("expected directive"),
        }
    }

    #[test]
    fn trailing_comment_after_a_character_literal_is_still_stripped() {
        let stmt = lex_line(1, "X .BYT ';' ; a real comment").unwrap().unwrap();
        match stmt.kind {
            StatementKind::Directive { value, .. } => assert_eq!(value.text, "';'"),
            _ => panic!("expected directive"),
        }
    }

    #[test]
    fn directive_with_label_and_char_literal() {
        let stmt = lex_line(1, "NL .BYT '\\n'").unwrap().unwrap();
        assert_eq!(stmt.label.unwrap().text, "NL");
        match stmt.kind {
            StatementKind::Directive { value, .. } => assert_eq!(value.text, "'\\n'"),
            _ => panic!("expected directive"),
        }
    }

    #[test]
    fn instruction_with_label_reg_and_label_operand() {
        let stmt = lex_line(1, "main LDR r0 FORTY").unwrap().unwrap();
        assert_eq!(stmt.label.unwrap().text, "main");
        match stmt.kind {
            StatementKind::Instruction { mnemonic, operands } => {
                assert_eq!(mnemonic.text, "LDR");
                assert_eq!(operands.len(), 2);
                assert_eq!(operands[0].kind, OperandKind::Register);
                assert_eq!(operands[1].kind, OperandKind::Label);
            }
            _ => panic!("expected instruction"),
        }
    }

    #[test]
    fn trailing_comment_is_stripped() {
        let stmt = lex_line(1, "TRP 0 ; halt").unwrap().unwrap();
        match stmt.kind {
            StatementKind::Instruction { mnemonic, operands } => {
                assert_eq!(mnemonic.text, "TRP");
                assert_eq!(operands[0].token.text, "0");
            }
            _ => panic!("expected instruction"),
        }
    }

    #[test]
    fn register_indirect_operand_pair_is_classified_as_two_registers() {
        let stmt = lex_line(1, "LDR r1 r2").unwrap().unwrap();
        match stmt.kind {
            StatementKind::Instruction { operands, .. } => {
                assert_eq!(operands[1].kind, OperandKind::Register);
            }
            _ => panic!("expected instruction"),
        }
    }

    #[test]
    fn unrecognized_shape_is_unknown_instruction() {
        assert!(matches!(
            lex_line(1, "r1 r2 r3 r4").unwrap_err(),
            Error::UnknownInstruction { .. }
        ));
    }
}
