//! Instruction encoding: mnemonic lookup, register-name resolution, and
//! assembling one [`Statement`] of instruction kind into its 12-byte
//! `(opcode, operand1, operand2)` cell.

use super::lexer::{Operand, OperandKind, Statement, StatementKind, Token};
use super::{Error, SymbolTable};

/// The numeric opcode space, as a tagged enum rather than a runtime
/// opcode-to-handler table — the VM's decoder matches the same opcode
/// numbers back out of this enum's discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mnemonic {
    Trp,
    Add,
    Adi,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Cmp,
    Mov,
    Lda,
    Str,
    Ldr,
    Stb,
    Ldb,
    Jmp,
    Jmr,
    Bnz,
    Bgt,
    Blt,
    Brz,
    Ldbi,
    Stbi,
    Ldri,
    Stri,
}

impl Mnemonic {
    pub fn opcode(self) -> i32 {
        match self {
            Mnemonic::Trp => 0,
            Mnemonic::Add => 1,
            Mnemonic::Adi => 2,
            Mnemonic::Sub => 3,
            Mnemonic::Mul => 4,
            Mnemonic::Div => 5,
            Mnemonic::And => 6,
            Mnemonic::Or => 7,
            Mnemonic::Cmp => 8,
            Mnemonic::Mov => 9,
            Mnemonic::Lda => 10,
            Mnemonic::Str => 11,
            Mnemonic::Ldr => 12,
            Mnemonic::Stb => 13,
            Mnemonic::Ldb => 14,
            Mnemonic::Jmp => 15,
            Mnemonic::Jmr => 16,
            Mnemonic::Bnz => 17,
            Mnemonic::Bgt => 18,
            Mnemonic::Blt => 19,
            Mnemonic::Brz => 20,
            Mnemonic::Ldbi => 21,
            Mnemonic::Stbi => 22,
            Mnemonic::Ldri => 23,
            Mnemonic::Stri => 24,
        }
    }

    pub fn from_name(name: &str) -> Option<Mnemonic> {
        Some(match name {
            "TRP" => Mnemonic::Trp,
            "ADD" => Mnemonic::Add,
            "ADI" => Mnemonic::Adi,
            "SUB" => Mnemonic::Sub,
            "MUL" => Mnemonic::Mul,
            "DIV" => Mnemonic::Div,
            "AND" => Mnemonic::And,
            "OR" => Mnemonic::Or,
            "CMP" => Mnemonic::Cmp,
            "MOV" => Mnemonic::Mov,
            "LDA" => Mnemonic::Lda,
            "STR" => Mnemonic::Str,
            "LDR" => Mnemonic::Ldr,
            "STB" => Mnemonic::Stb,
            "LDB" => Mnemonic::Ldb,
            "JMP" => Mnemonic::Jmp,
            "JMR" => Mnemonic::Jmr,
            "BNZ" => Mnemonic::Bnz,
            "BGT" => Mnemonic::Bgt,
            "BLT" => Mnemonic::Blt,
            "BRZ" => Mnemonic::Brz,
            "LDBI" => Mnemonic::Ldbi,
            "STBI" => Mnemonic::Stbi,
            "LDRI" => Mnemonic::Ldri,
            "STRI" => Mnemonic::Stri,
            _ => return None,
        })
    }

    /// The register-indirect variant of a `LDB`/`LDR`/`STB`/`STR` when a
    /// second register operand promotes it (§4.3).
    fn indirect(self) -> Option<Mnemonic> {
        match self {
            Mnemonic::Ldb => Some(Mnemonic::Ldbi),
            Mnemonic::Ldr => Some(Mnemonic::Ldri),
            Mnemonic::Stb => Some(Mnemonic::Stbi),
            Mnemonic::Str => Some(Mnemonic::Stri),
            _ => None,
        }
    }
}

pub fn register_index(text: &str) -> u8 {
    match text {
        "pc" => 10,
        "sp" => 11,
        "st" => 12,
        "sb" => 13,
        "fp" => 14,
        _ => text[1..].parse().unwrap_or(u8::MAX),
    }
}

/// Resolve a register token, rejecting anything outside `r0..r14` (the
/// lexer only validates the `r\d+` *shape*, not the digit range — a
/// register like `r99` must fail here rather than panic on an
/// out-of-bounds register-file index at runtime).
fn resolve_register(token: &Token, statement: &Statement) -> Result<u8, Error> {
    let index = register_index(&token.text);
    if index > 14 {
        return Err(Error::InvalidRegister {
            name: token.text.clone(),
            span: token.span,
            line_number: statement.line_number,
            line: statement.line.clone(),
        });
    }
    Ok(index)
}

fn resolve_label(symbols: &SymbolTable, token: &Token) -> u32 {
    symbols
        .get(&token.text)
        .and_then(|(addr, _)| *addr)
        .expect("pass 1 guarantees every used label is resolved before pass 2 runs")
}

fn unknown_instruction(mnemonic: &Token, statement: &Statement) -> Error {
    Error::UnknownInstruction {
        text: mnemonic.text.clone(),
        span: Some(mnemonic.span),
        line_number: statement.line_number,
        line: statement.line.clone(),
    }
}

fn operand_value(operand: &Operand, symbols: &SymbolTable, statement: &Statement) -> Result<i32, Error> {
    Ok(match operand.kind {
        OperandKind::Code => operand
            .token
            .text
            .parse()
            .expect("lexer only accepts all-digit code tokens"),
        OperandKind::Register => resolve_register(&operand.token, statement)? as i32,
        OperandKind::Label => resolve_label(symbols, &operand.token) as i32,
        OperandKind::Immediate => operand.token.text[1..]
            .parse()
            .expect("lexer only accepts #-prefixed signed-decimal immediates"),
    })
}

/// Encode one instruction statement into its `(opcode, operand1,
/// operand2)` cell.
pub fn encode(statement: &Statement, symbols: &SymbolTable) -> Result<(i32, i32, i32), Error> {
    let (mnemonic_token, operands) = match &statement.kind {
        StatementKind::Instruction { mnemonic, operands } => (mnemonic, operands),
        StatementKind::Directive { .. } => unreachable!("encode is only called on instructions"),
    };
    let upper = mnemonic_token.text.to_ascii_uppercase();

    match operands.as_slice() {
        [single] => {
            let mnemonic =
                Mnemonic::from_name(&upper).ok_or_else(|| unknown_instruction(mnemonic_token, statement))?;
            Ok((mnemonic.opcode(), operand_value(single, symbols, statement)?, 0))
        }
        [reg, second] => {
            let reg_index = resolve_register(&reg.token, statement)? as i32;
            let mut mnemonic =
                Mnemonic::from_name(&upper).ok_or_else(|| unknown_instruction(mnemonic_token, statement))?;
            if second.kind == OperandKind::Register {
                if let Some(indirect) = mnemonic.indirect() {
                    mnemonic = indirect;
                }
            }
            Ok((mnemonic.opcode(), reg_index, operand_value(second, symbols, statement)?))
        }
        _ => unreachable!("the lexer only accepts one or two operands"),
    }
}

#[cfg(test)]
mod tests {
    use super::super::{first_pass, second_pass};

    #[test]
    fn register_indirect_load_promotes_opcode() {
        let source = "LDR r1 r2\nTRP 0\n";
        let (symbols, statements) = first_pass(source).unwrap();
        let (bytes, _code_seg, _stack_top) = second_pass(&symbols, &statements).unwrap();
        let opcode = i32::from_be_bytes(bytes[0..4].try_into().unwrap());
        assert_eq!(opcode, 23); // LDRI, not LDR (12)
    }

    #[test]
    fn plain_register_load_keeps_opcode() {
        let source = "LDR r1 #4\nTRP 0\n";
        let (symbols, statements) = first_pass(source).unwrap();
        let (bytes, _code_seg, _stack_top) = second_pass(&symbols, &statements).unwrap();
        let opcode = i32::from_be_bytes(bytes[0..4].try_into().unwrap());
        assert_eq!(opcode, 12); // plain LDR
    }

    #[test]
    fn out_of_range_register_is_rejected_instead_of_panicking() {
        let source = "ADD r99 r0\nTRP 0\n";
        let (symbols, statements) = first_pass(source).unwrap();
        assert!(matches!(
            second_pass(&symbols, &statements).unwrap_err(),
            super::super::Error::InvalidRegister { .. }
        ));
    }
}
