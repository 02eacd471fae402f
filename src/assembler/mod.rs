//! Two-pass assembler: translates source text into a flat byte image.
//!
//! [`lexer`] classifies one line at a time into a [`lexer::Statement`].
//! [`first_pass`] walks every statement to size it and populate the
//! symbol table; [`second_pass`] walks them again to encode bytes.
//! [`directives`] and [`instructions`] hold the per-kind encoding
//! logic pass 2 delegates to.

pub mod directives;
pub mod instructions;
pub mod lexer;

use std::collections::HashMap;
use std::fmt;

use colored::Colorize;

use crate::image::{MemoryFault, MemoryImage};
use lexer::{OperandKind, Span, Statement, StatementKind, Token};

/// Label name → (resolved address, referring line numbers). An entry
/// with `None` survives first pass only if the label is never
/// declared, which is reported as [`Error::UndefinedLabel`].
pub type SymbolTable = HashMap<String, (Option<u32>, Vec<usize>)>;

/// A fully assembled program: the image bytes `[0, stack_top)`, plus
/// the `code_seg`/`stack_top` boundaries a caller needs to run it or
/// persist it as an [`crate::image::ImageFile`].
pub struct AssembledImage {
    pub bytes: Vec<u8>,
    pub code_seg: u32,
    pub stack_top: u32,
}

#[derive(Debug)]
pub enum Error {
    DuplicateLabel {
        name: String,
        span: Span,
        line_number: usize,
        line: String,
    },
    UndefinedLabel {
        entries: Vec<(String, Vec<usize>)>,
    },
    ReservedKeyword {
        name: String,
        span: Span,
        line_number: usize,
        line: String,
    },
    UnknownInstruction {
        text: String,
        span: Option<Span>,
        line_number: usize,
        line: String,
    },
    UnknownDirective {
        directive: String,
        span: Span,
        line_number: usize,
        line: String,
    },
    DirectiveInInstructions {
        line_number: usize,
        line: String,
    },
    InvalidRegister {
        name: String,
        span: Span,
        line_number: usize,
        line: String,
    },
    Memory(MemoryFault),
    Io(std::io::Error),
}

impl std::error::Error for Error {}

/// Render a source line with a caret underline beneath one span, in
/// the teacher assembler's green-underline diagnostic style.
fn underline_span(line_number: usize, line: &str, span: Span) -> String {
    let gutter = format!("{line_number}");
    let pad = " ".repeat(gutter.len());
    let marker_len = span.end.saturating_sub(span.start).max(1);
    let underline = format!("{}{}", " ".repeat(span.start), "^".repeat(marker_len));
    format!(
        "\n{gutter} | {line}\n{pad} | {}",
        underline.green().bold()
    )
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DuplicateLabel {
                name,
                span,
                line_number,
                line,
            } => write!(
                f,
                "label '{name}' is already defined{}",
                underline_span(*line_number, line, *span)
            ),
            Error::UndefinedLabel { entries } => {
                writeln!(f, "undefined label(s):")?;
                for (name, lines) in entries {
                    let lines = lines
                        .iter()
                        .map(|n| n.to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    writeln!(f, "  '{name}' referenced on line(s): {lines}")?;
                }
                Ok(())
            }
            Error::ReservedKeyword {
                name,
                span,
                line_number,
                line,
            } => write!(
                f,
                "'{name}' is a reserved name and cannot be used as a label{}",
                underline_span(*line_number, line, *span)
            ),
            Error::UnknownInstruction {
                text,
                span,
                line_number,
                line,
            } => {
                write!(f, "unrecognized instruction or directive '{text}'")?;
                if let Some(span) = span {
                    write!(f, "{}", underline_span(*line_number, line, *span))?;
                }
                Ok(())
            }
            Error::UnknownDirective {
                directive,
                span,
                line_number,
                line,
            } => write!(
                f,
                "unknown directive '{directive}' (expected .INT or .BYT){}",
                underline_span(*line_number, line, *span)
            ),
            Error::DirectiveInInstructions { line_number, line } => write!(
                f,
                "directive follows an already-emitted instruction\n{line_number} | {line}"
            ),
            Error::InvalidRegister {
                name,
                span,
                line_number,
                line,
            } => write!(
                f,
                "'{name}' is not a valid register (registers are r0..r14, or pc/sp/st/sb/fp){}",
                underline_span(*line_number, line, *span)
            ),
            Error::Memory(fault) => write!(f, "{fault}"),
            Error::Io(err) => write!(f, "{err}"),
        }
    }
}

fn is_reserved(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    if instructions::Mnemonic::from_name(&upper).is_some() {
        return true;
    }
    let lower = name.to_ascii_lowercase();
    if matches!(lower.as_str(), "pc" | "sp" | "st" | "sb" | "fp") {
        return true;
    }
    (name.starts_with('r') || name.starts_with('R'))
        && name.len() > 1
        && name[1..].chars().all(|c| c.is_ascii_digit())
}

fn declare_label(
    symbols: &mut SymbolTable,
    label: &Token,
    addr: u32,
    statement: &Statement,
) -> Result<(), Error> {
    if is_reserved(&label.text) {
        return Err(Error::ReservedKeyword {
            name: label.text.clone(),
            span: label.span,
            line_number: statement.line_number,
            line: statement.line.clone(),
        });
    }
    match symbols.get_mut(&label.text) {
        Some((Some(_), _)) => Err(Error::DuplicateLabel {
            name: label.text.clone(),
            span: label.span,
            line_number: statement.line_number,
            line: statement.line.clone(),
        }),
        Some((addr_slot, _)) => {
            *addr_slot = Some(addr);
            Ok(())
        }
        None => {
            symbols.insert(label.text.clone(), (Some(addr), Vec::new()));
            Ok(())
        }
    }
}

fn record_label_use(symbols: &mut SymbolTable, name: &str, line_number: usize) {
    symbols
        .entry(name.to_string())
        .or_insert_with(|| (None, Vec::new()))
        .1
        .push(line_number);
}

/// Size, in bytes, of a directive's encoded value — `4` for `.INT`,
/// `1` for `.BYT`. Any other type is [`Error::UnknownDirective`].
fn directive_size(directive_type: &Token, statement: &Statement) -> Result<u32, Error> {
    match directive_type.text.trim_start_matches('.').to_ascii_uppercase().as_str() {
        "INT" => Ok(4),
        "BYT" => Ok(1),
        other => Err(Error::UnknownDirective {
            directive: other.to_string(),
            span: directive_type.span,
            line_number: statement.line_number,
            line: statement.line.clone(),
        }),
    }
}

/// Walk the source once, sizing every statement and resolving labels.
pub fn first_pass(source: &str) -> Result<(SymbolTable, Vec<Statement>), Error> {
    let mut symbols: SymbolTable = HashMap::new();
    let mut statements = Vec::new();
    let mut pc: u32 = 0;

    for (idx, raw_line) in source.lines().enumerate() {
        let line_number = idx + 1;
        let Some(statement) = lexer::lex_line(line_number, raw_line)? else {
            continue;
        };

        if let Some(label) = &statement.label {
            declare_label(&mut symbols, label, pc, &statement)?;
        }

        match &statement.kind {
            StatementKind::Directive { directive_type, .. } => {
                pc += directive_size(directive_type, &statement)?;
            }
            StatementKind::Instruction { operands, .. } => {
                for operand in operands {
                    if operand.kind == OperandKind::Label {
                        record_label_use(&mut symbols, &operand.token.text, line_number);
                    }
                }
                pc += 12;
            }
        }

        statements.push(statement);
    }

    let mut undefined: Vec<(String, Vec<usize>)> = symbols
        .iter()
        .filter(|(_, (addr, _))| addr.is_none())
        .map(|(name, (_, uses))| (name.clone(), uses.clone()))
        .collect();
    if !undefined.is_empty() {
        undefined.sort_by(|a, b| a.0.cmp(&b.0));
        return Err(Error::UndefinedLabel { entries: undefined });
    }

    Ok((symbols, statements))
}

/// Walk the resolved statements a second time, encoding bytes into a
/// growable image. Returns the used prefix of the image plus the
/// `code_seg`/`stack_top` boundaries.
pub fn second_pass(symbols: &SymbolTable, statements: &[Statement]) -> Result<(Vec<u8>, u32, u32), Error> {
    let mut image = MemoryImage::growable();
    let mut pc: u32 = 0;
    let mut code_seg: Option<u32> = None;

    for statement in statements {
        match &statement.kind {
            StatementKind::Directive { directive_type, value } => {
                if code_seg.is_some() {
                    return Err(Error::DirectiveInInstructions {
                        line_number: statement.line_number,
                        line: statement.line.clone(),
                    });
                }
                match directive_type.text.trim_start_matches('.').to_ascii_uppercase().as_str() {
                    "INT" => {
                        let v: i32 = value.text.parse().expect("lexer validated .INT value shape");
                        image.store_int(v, pc).map_err(Error::Memory)?;
                        pc += 4;
                    }
                    "BYT" => {
                        let b = directives::parse_byte_literal(&value.text);
                        image.store_byte(b, pc).map_err(Error::Memory)?;
                        pc += 1;
                    }
                    other => {
                        return Err(Error::UnknownDirective {
                            directive: other.to_string(),
                            span: directive_type.span,
                            line_number: statement.line_number,
                            line: statement.line.clone(),
                        });
                    }
                }
            }
            StatementKind::Instruction { .. } => {
                if code_seg.is_none() {
                    code_seg = Some(pc);
                }
                let (opcode, op1, op2) = instructions::encode(statement, symbols)?;
                image.store_inst(pc, opcode, op1, op2).map_err(Error::Memory)?;
                pc += 12;
            }
        }
    }

    let stack_top = pc;
    let code_seg = code_seg.unwrap_or(stack_top);
    Ok((image.as_slice()[..stack_top as usize].to_vec(), code_seg, stack_top))
}

/// Assemble a complete source string into an image.
pub fn assemble(source: &str) -> Result<AssembledImage, Error> {
    let (symbols, statements) = first_pass(source)?;
    let (bytes, code_seg, stack_top) = second_pass(&symbols, &statements)?;
    Ok(AssembledImage { bytes, code_seg, stack_top })
}

/// Read `path` and assemble its contents.
pub fn assemble_from_file(path: &str) -> Result<AssembledImage, Error> {
    let source = std::fs::read_to_string(path).map_err(Error::Io)?;
    assemble(&source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_label_is_rejected() {
        let source = "L .INT 1\nL .INT 2\n";
        match assemble(source).unwrap_err() {
            Error::DuplicateLabel { line_number, .. } => assert_eq!(line_number, 2),
            other => panic!("expected DuplicateLabel, got {other:?}"),
        }
    }

    #[test]
    fn reserved_name_cannot_be_a_label() {
        let source = "r1 .INT 1\nTRP 0\n";
        assert!(matches!(
            assemble(source).unwrap_err(),
            Error::ReservedKeyword { .. }
        ));
    }

    #[test]
    fn forward_reference_resolves() {
        let source = "JMP END\nTRP 0\nEND TRP 0\n";
        let image = assemble(source).unwrap();
        assert_eq!(image.code_seg, 0);
        assert_eq!(image.stack_top, 36);
    }

    #[test]
    fn undefined_label_is_reported() {
        let source = "JMP NOWHERE\n";
        assert!(matches!(
            assemble(source).unwrap_err(),
            Error::UndefinedLabel { .. }
        ));
    }

    #[test]
    fn directive_after_instruction_is_rejected() {
        let source = "TRP 0\nX .INT 1\n";
        assert!(matches!(
            assemble(source).unwrap_err(),
            Error::DirectiveInInstructions { .. }
        ));
    }

    #[test]
    fn data_then_code_lays_out_code_seg_after_data() {
        let source = "FORTY .INT 42\nmain LDR r0 FORTY\nTRP 1\nTRP 0\n";
        let image = assemble(source).unwrap();
        assert_eq!(image.code_seg, 4);
        assert_eq!(image.stack_top, 4 + 12 * 3);
        assert_eq!(i32::from_be_bytes(image.bytes[0..4].try_into().unwrap()), 42);
    }
}
