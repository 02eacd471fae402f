//! Recovers a readable listing from an assembled image. Diagnostic
//! only: has no symbol table, so label references print as raw
//! addresses, and it has no bearing on assemble/run correctness.

use std::fmt::Write as _;

fn mnemonic_and_arity(opcode: i32) -> Option<(&'static str, usize)> {
    Some(match opcode {
        0 => ("TRP", 1),
        1 => ("ADD", 2),
        2 => ("ADI", 2),
        3 => ("SUB", 2),
        4 => ("MUL", 2),
        5 => ("DIV", 2),
        6 => ("AND", 2),
        7 => ("OR", 2),
        8 => ("CMP", 2),
        9 => ("MOV", 2),
        10 => ("LDA", 2),
        11 => ("STR", 2),
        12 => ("LDR", 2),
        13 => ("STB", 2),
        14 => ("LDB", 2),
        15 => ("JMP", 1),
        16 => ("JMR", 1),
        17 => ("BNZ", 2),
        18 => ("BGT", 2),
        19 => ("BLT", 2),
        20 => ("BRZ", 2),
        21 => ("LDBI", 2),
        22 => ("STBI", 2),
        23 => ("LDRI", 2),
        24 => ("STRI", 2),
        _ => return None,
    })
}

fn register_name(index: i32) -> String {
    match index {
        10 => "pc".to_string(),
        11 => "sp".to_string(),
        12 => "st".to_string(),
        13 => "sb".to_string(),
        14 => "fp".to_string(),
        n => format!("r{n}"),
    }
}

fn is_register_operand(mnemonic: &str, slot: usize, opcode: i32) -> bool {
    // Every two-operand instruction takes a register in its first slot;
    // the register-indirect `*I` forms take one in both slots.
    match slot {
        0 => mnemonic != "TRP" && mnemonic != "JMP",
        1 => matches!(opcode, 21 | 22 | 23 | 24),
        _ => false,
    }
}

/// Whether a non-register second operand is an address (printed in
/// hex) or a bare immediate (printed as signed decimal).
fn second_operand_is_address(mnemonic: &str) -> bool {
    matches!(
        mnemonic,
        "LDA" | "STR" | "LDR" | "STB" | "LDB" | "BNZ" | "BGT" | "BLT" | "BRZ"
    )
}

/// Disassemble the code segment `[code_seg, stack_top)` of `image`,
/// one line per 12-byte cell. Cells that don't decode to a known
/// opcode are rendered as a raw `.int` escape.
pub fn disassemble(image: &[u8], code_seg: u32, stack_top: u32) -> String {
    let mut out = String::new();
    let mut addr = code_seg;
    while addr + 12 <= stack_top {
        let base = addr as usize;
        let opcode = i32::from_be_bytes(image[base..base + 4].try_into().unwrap());
        let op1 = i32::from_be_bytes(image[base + 4..base + 8].try_into().unwrap());
        let op2 = i32::from_be_bytes(image[base + 8..base + 12].try_into().unwrap());

        match mnemonic_and_arity(opcode) {
            Some((mnemonic, 1)) => {
                let operand = if is_register_operand(mnemonic, 0, opcode) {
                    register_name(op1)
                } else {
                    op1.to_string()
                };
                let _ = writeln!(out, "{addr:#08x}: {mnemonic} {operand}");
            }
            Some((mnemonic, _)) => {
                let first = if is_register_operand(mnemonic, 0, opcode) {
                    register_name(op1)
                } else {
                    op1.to_string()
                };
                let second = if is_register_operand(mnemonic, 1, opcode) {
                    register_name(op2)
                } else if second_operand_is_address(mnemonic) {
                    format!("{op2:#x}")
                } else {
                    op2.to_string()
                };
                let _ = writeln!(out, "{addr:#08x}: {mnemonic} {first} {second}");
            }
            None => {
                let _ = writeln!(out, "{addr:#08x}: .int {opcode:#x} {op1:#x} {op2:#x}");
            }
        }
        addr += 12;
    }
    out
}

/// Dump the data segment `[0, code_seg)` as one `.byte` line per byte,
/// mirroring the teacher disassembler's data-segment fallback.
pub fn disassemble_data(image: &[u8], code_seg: u32) -> String {
    let mut out = String::new();
    for (addr, byte) in image[..code_seg as usize].iter().enumerate() {
        let _ = writeln!(out, "{addr:#08x}: .byte {byte:#04x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::assemble;

    #[test]
    fn round_trips_a_known_opcode() {
        let assembled = assemble("TRP 1\nTRP 0\n").unwrap();
        let listing = disassemble(&assembled.bytes, assembled.code_seg, assembled.stack_top);
        assert!(listing.contains("TRP 1"));
        assert!(listing.contains("TRP 0"));
    }

    #[test]
    fn register_indirect_forms_print_both_registers() {
        let assembled = assemble("LDR r1 r2\nTRP 0\n").unwrap();
        let listing = disassemble(&assembled.bytes, assembled.code_seg, assembled.stack_top);
        assert!(listing.contains("LDRI r1 r2"));
    }

    #[test]
    fn unrecognized_opcode_falls_back_to_a_raw_int_escape() {
        let mut bytes = vec![0u8; 12];
        bytes[0..4].copy_from_slice(&999i32.to_be_bytes());
        let listing = disassemble(&bytes, 0, 12);
        assert!(listing.contains(".int"));
    }
}
