//! The register-based virtual machine: register file, fetch-decode-
//! execute loop, and the I/O traps that are the machine's only window
//! onto the outside world.

use std::fmt;
use std::io::{BufRead, Read, Write};

use crate::image::{MemoryFault, MemoryImage, DEFAULT_MEM_SIZE};
use crate::logging;

pub const PC: usize = 10;
pub const SP: usize = 11;
pub const ST: usize = 12;
pub const SB: usize = 13;
pub const FP: usize = 14;

const REGISTER_COUNT: usize = 15;

#[derive(Debug)]
pub enum RuntimeError {
    UnknownOpcode(i32),
    UnknownTrap(i32),
    DivideByZero,
    Memory(MemoryFault),
    Io(std::io::Error),
    MalformedInput(String),
}

impl std::error::Error for RuntimeError {}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::UnknownOpcode(op) => write!(f, "unknown opcode {op}"),
            RuntimeError::UnknownTrap(code) => write!(f, "unknown trap code {code}"),
            RuntimeError::DivideByZero => write!(f, "division by zero"),
            RuntimeError::Memory(fault) => write!(f, "{fault}"),
            RuntimeError::Io(err) => write!(f, "{err}"),
            RuntimeError::MalformedInput(text) => write!(f, "malformed input: {text}"),
        }
    }
}

impl From<MemoryFault> for RuntimeError {
    fn from(fault: MemoryFault) -> Self {
        RuntimeError::Memory(fault)
    }
}

/// A decoded instruction cell, matched exhaustively in the execute
/// step rather than dispatched through a runtime opcode table.
#[derive(Debug, Clone, Copy)]
enum Op {
    Trp(i32),
    Add(usize, usize),
    Adi(usize, i32),
    Sub(usize, usize),
    Mul(usize, usize),
    Div(usize, usize),
    And(usize, usize),
    Or(usize, usize),
    Cmp(usize, usize),
    Mov(usize, usize),
    Lda(usize, u32),
    Str(usize, u32),
    Ldr(usize, u32),
    Stb(usize, u32),
    Ldb(usize, u32),
    Jmp(u32),
    Jmr(usize),
    Bnz(usize, u32),
    Bgt(usize, u32),
    Blt(usize, u32),
    Brz(usize, u32),
    Ldbi(usize, usize),
    Stbi(usize, usize),
    Ldri(usize, usize),
    Stri(usize, usize),
}

fn decode(opcode: i32, op1: i32, op2: i32) -> Result<Op, RuntimeError> {
    let r1 = op1 as usize;
    let r2 = op2 as usize;
    Ok(match opcode {
        0 => Op::Trp(op1),
        1 => Op::Add(r1, r2),
        2 => Op::Adi(r1, op2),
        3 => Op::Sub(r1, r2),
        4 => Op::Mul(r1, r2),
        5 => Op::Div(r1, r2),
        6 => Op::And(r1, r2),
        7 => Op::Or(r1, r2),
        8 => Op::Cmp(r1, r2),
        9 => Op::Mov(r1, r2),
        10 => Op::Lda(r1, op2 as u32),
        11 => Op::Str(r1, op2 as u32),
        12 => Op::Ldr(r1, op2 as u32),
        13 => Op::Stb(r1, op2 as u32),
        14 => Op::Ldb(r1, op2 as u32),
        15 => Op::Jmp(op1 as u32),
        16 => Op::Jmr(r1),
        17 => Op::Bnz(r1, op2 as u32),
        18 => Op::Bgt(r1, op2 as u32),
        19 => Op::Blt(r1, op2 as u32),
        20 => Op::Brz(r1, op2 as u32),
        21 => Op::Ldbi(r1, r2),
        22 => Op::Stbi(r1, r2),
        23 => Op::Ldri(r1, r2),
        24 => Op::Stri(r1, r2),
        other => return Err(RuntimeError::UnknownOpcode(other)),
    })
}

/// The machine: the image it runs over, its 15-register file, and the
/// line-buffered stdin state the `TRP 2`/`TRP 4` traps share.
pub struct Vm {
    image: MemoryImage,
    registers: [i32; REGISTER_COUNT],
    input_buffer: String,
    running: bool,
}

impl Vm {
    /// Build a VM over a fresh, fixed-size image, loading `program` at
    /// address 0 and setting up the register file per §3.
    pub fn new(program: &[u8], code_seg: u32, stack_top: u32) -> Self {
        Self::with_mem_size(program, code_seg, stack_top, DEFAULT_MEM_SIZE)
    }

    pub fn with_mem_size(program: &[u8], code_seg: u32, stack_top: u32, mem_size: u32) -> Self {
        let mut image = MemoryImage::fixed(mem_size as usize);
        image.blit(program);
        let mut registers = [0i32; REGISTER_COUNT];
        registers[PC] = code_seg as i32;
        registers[SP] = mem_size as i32;
        registers[SB] = mem_size as i32;
        registers[ST] = stack_top as i32;
        registers[FP] = mem_size as i32;
        Vm {
            image,
            registers,
            input_buffer: String::new(),
            running: true,
        }
    }

    fn reg(&self, index: usize) -> i32 {
        self.registers[index]
    }

    fn set_reg(&mut self, index: usize, value: i32) {
        self.registers[index] = value;
    }

    /// Run to completion (`TRP 0`) or a fatal runtime error, reading
    /// trap input from `input` and writing trap output to `output`.
    pub fn run<R: BufRead, W: Write>(&mut self, input: &mut R, output: &mut W) -> Result<(), RuntimeError> {
        while self.running {
            self.step(input, output)?;
        }
        Ok(())
    }

    fn step<R: BufRead, W: Write>(&mut self, input: &mut R, output: &mut W) -> Result<(), RuntimeError> {
        let pc = self.reg(PC) as u32;
        let (opcode, op1, op2) = self.image.fetch_inst(pc)?;
        self.set_reg(PC, (pc + 12) as i32);
        let op = decode(opcode, op1, op2)?;
        self.execute(op, input, output)
    }

    fn execute<R: BufRead, W: Write>(&mut self, op: Op, input: &mut R, output: &mut W) -> Result<(), RuntimeError> {
        match op {
            Op::Trp(code) => self.trap(code, input, output)?,
            Op::Add(x, y) => self.set_reg(x, self.reg(x).wrapping_add(self.reg(y))),
            Op::Adi(x, k) => self.set_reg(x, self.reg(x).wrapping_add(k)),
            Op::Sub(x, y) => self.set_reg(x, self.reg(x).wrapping_sub(self.reg(y))),
            Op::Mul(x, y) => self.set_reg(x, self.reg(x).wrapping_mul(self.reg(y))),
            Op::Div(x, y) => {
                let divisor = self.reg(y);
                if divisor == 0 {
                    return Err(RuntimeError::DivideByZero);
                }
                self.set_reg(x, self.reg(x).wrapping_div(divisor));
            }
            Op::And(x, y) => self.set_reg(x, ((self.reg(x) != 0) && (self.reg(y) != 0)) as i32),
            Op::Or(x, y) => self.set_reg(x, ((self.reg(x) != 0) || (self.reg(y) != 0)) as i32),
            Op::Cmp(x, y) => self.set_reg(x, self.reg(x).wrapping_sub(self.reg(y))),
            Op::Mov(x, y) => self.set_reg(x, self.reg(y)),
            Op::Lda(x, addr) => self.set_reg(x, addr as i32),
            Op::Str(x, addr) => self.image.store_int(self.reg(x), addr)?,
            Op::Ldr(x, addr) => {
                let v = self.image.fetch_int(addr)?;
                self.set_reg(x, v);
            }
            Op::Stb(x, addr) => self.image.store_byte(low_byte(self.reg(x)), addr)?,
            Op::Ldb(x, addr) => {
                let b = self.image.fetch_byte(addr)?;
                self.set_reg(x, b as i32);
            }
            Op::Jmp(addr) => self.set_reg(PC, addr as i32),
            Op::Jmr(x) => self.set_reg(PC, self.reg(x)),
            Op::Bnz(x, addr) => {
                if self.reg(x) != 0 {
                    self.set_reg(PC, addr as i32);
                }
            }
            Op::Bgt(x, addr) => {
                if self.reg(x) > 0 {
                    self.set_reg(PC, addr as i32);
                }
            }
            Op::Blt(x, addr) => {
                if self.reg(x) < 0 {
                    self.set_reg(PC, addr as i32);
                }
            }
            Op::Brz(x, addr) => {
                if self.reg(x) == 0 {
                    self.set_reg(PC, addr as i32);
                }
            }
            Op::Ldbi(x, y) => {
                let b = self.image.fetch_byte(self.reg(y) as u32)?;
                self.set_reg(x, b as i32);
            }
            Op::Stbi(x, y) => {
                self.image.store_byte(low_byte(self.reg(x)), self.reg(y) as u32)?;
            }
            Op::Ldri(x, y) => {
                let v = self.image.fetch_int(self.reg(y) as u32)?;
                self.set_reg(x, v);
            }
            Op::Stri(x, y) => {
                self.image.store_int(self.reg(x), self.reg(y) as u32)?;
            }
        }
        Ok(())
    }

    fn trap<R: BufRead, W: Write>(&mut self, code: i32, input: &mut R, output: &mut W) -> Result<(), RuntimeError> {
        match code {
            0 => self.running = false,
            1 => {
                write!(output, "{}", self.reg(0)).map_err(RuntimeError::Io)?;
                output.flush().map_err(RuntimeError::Io)?;
            }
            2 => {
                let value = self.read_int(input)?;
                self.set_reg(0, value);
            }
            3 => {
                let byte = low_byte(self.reg(0));
                output.write_all(&[byte]).map_err(RuntimeError::Io)?;
                output.flush().map_err(RuntimeError::Io)?;
            }
            4 => {
                let byte = self.read_char(input)?;
                self.set_reg(0, set_low_byte(self.reg(0), byte));
            }
            99 => {
                let pc = self.reg(PC) as u32;
                logging::warning(format!("register dump: {:?}", self.registers), pc as usize);
            }
            other => return Err(RuntimeError::UnknownTrap(other)),
        }
        Ok(())
    }

    fn fill_input_buffer<R: BufRead>(&mut self, input: &mut R) -> Result<(), RuntimeError> {
        if !self.input_buffer.is_empty() {
            return Ok(());
        }
        let mut line = String::new();
        let read = input.read_line(&mut line).map_err(RuntimeError::Io)?;
        if read == 0 {
            return Ok(());
        }
        if !line.ends_with('\n') {
            line.push('\n');
        }
        self.input_buffer = line;
        Ok(())
    }

    fn read_int<R: BufRead>(&mut self, input: &mut R) -> Result<i32, RuntimeError> {
        self.fill_input_buffer(input)?;
        let text = std::mem::take(&mut self.input_buffer);
        let trimmed = text.trim();
        trimmed
            .parse()
            .map_err(|_| RuntimeError::MalformedInput(trimmed.to_string()))
    }

    fn read_char<R: BufRead>(&mut self, input: &mut R) -> Result<u8, RuntimeError> {
        self.fill_input_buffer(input)?;
        if self.input_buffer.is_empty() {
            return Ok(b'\n');
        }
        let byte = self.input_buffer.as_bytes()[0];
        self.input_buffer.drain(0..1);
        Ok(byte)
    }
}

fn low_byte(value: i32) -> u8 {
    (value & 0xFF) as u8
}

fn set_low_byte(value: i32, byte: u8) -> i32 {
    (value & !0xFF) | byte as i32
}

/// Load an assembled image file and run it, for hosts (the `vm`
/// binary) that don't need to touch the [`Vm`] directly.
pub fn run_image<R: Read, W: Write>(
    bytes: &[u8],
    code_seg: u32,
    stack_top: u32,
    input: R,
    mut output: W,
) -> Result<(), RuntimeError> {
    let mut vm = Vm::new(bytes, code_seg, stack_top);
    let mut reader = std::io::BufReader::new(input);
    vm.run(&mut reader, &mut output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn run(source: &str, stdin: &str) -> String {
        let assembled = crate::assembler::assemble(source).unwrap();
        let mut vm = Vm::new(&assembled.bytes, assembled.code_seg, assembled.stack_top);
        let mut input = Cursor::new(stdin.as_bytes().to_vec());
        let mut output: Vec<u8> = Vec::new();
        vm.run(&mut input, &mut output).unwrap();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn print_42() {
        let source = "FORTY .INT 42\nmain LDR r0 FORTY\nTRP 1\nTRP 0\n";
        assert_eq!(run(source, ""), "42");
    }

    #[test]
    fn echo_char() {
        let source = "TRP 4\nTRP 3\nTRP 0\n";
        assert_eq!(run(source, "A\n"), "A");
    }

    #[test]
    fn sum_two_inputs() {
        let source = "\
            TRP 2\n\
            STR r0 SLOT\n\
            TRP 2\n\
            LDR r1 SLOT\n\
            ADD r0 r1\n\
            TRP 1\n\
            TRP 0\n\
            SLOT .INT 0\n";
        assert_eq!(run(source, "3\n4\n"), "7");
    }

    #[test]
    fn branch_on_zero_takes_else_branch() {
        let source = "\
            LDR r1 ZERO\n\
            BRZ r1 ELSE\n\
            LDA r0 #65\n\
            TRP 3\n\
            TRP 0\n\
            ELSE LDA r0 #66\n\
            TRP 3\n\
            TRP 0\n\
            ZERO .INT 0\n";
        assert_eq!(run(source, ""), "B");
    }

    #[test]
    fn divide_by_zero_is_a_runtime_error() {
        let source = "LDA r0 #10\nLDA r1 #0\nDIV r0 r1\nTRP 0\n";
        let assembled = crate::assembler::assemble(source).unwrap();
        let mut vm = Vm::new(&assembled.bytes, assembled.code_seg, assembled.stack_top);
        let mut input = Cursor::new(Vec::new());
        let mut output: Vec<u8> = Vec::new();
        assert!(matches!(
            vm.run(&mut input, &mut output),
            Err(RuntimeError::DivideByZero)
        ));
    }

    /// A tiny deterministic xorshift generator, standing in for a
    /// property-testing crate the rest of the corpus never pulls in:
    /// it exercises the same "random well-formed programs" property
    /// from many seeds without adding a dependency.
    fn xorshift(seed: &mut u32) -> u32 {
        *seed ^= *seed << 13;
        *seed ^= *seed >> 17;
        *seed ^= *seed << 5;
        *seed
    }

    #[test]
    fn random_int_directive_programs_terminate_and_preserve_their_values() {
        for seed in 1..20u32 {
            let mut state = seed;
            let count = 2 + (xorshift(&mut state) % 5);
            let values: Vec<i32> = (0..count)
                .map(|_| (xorshift(&mut state) as i32) % 1000)
                .collect();

            let mut source = String::new();
            for (i, v) in values.iter().enumerate() {
                source.push_str(&format!("V{i} .INT {v}\n"));
            }
            source.push_str("SUM .INT 0\n");
            source.push_str("main LDR r0 V0\n");
            for i in 1..values.len() {
                source.push_str(&format!("LDR r1 V{i}\nADD r0 r1\n"));
            }
            source.push_str("TRP 1\nTRP 0\n");

            let assembled = crate::assembler::assemble(&source).unwrap();

            for (i, v) in values.iter().enumerate() {
                let addr = (i as u32) * 4;
                assert_eq!(assembled.bytes[addr as usize..addr as usize + 4], v.to_be_bytes());
            }

            let mut vm = Vm::new(&assembled.bytes, assembled.code_seg, assembled.stack_top);
            let mut input = Cursor::new(Vec::new());
            let mut output: Vec<u8> = Vec::new();
            vm.run(&mut input, &mut output).unwrap();

            let expected: i32 = values.iter().sum();
            assert_eq!(String::from_utf8(output).unwrap(), expected.to_string());
        }
    }

    #[test]
    fn mov_copies_the_full_register() {
        let source = "LDA r0 #-7\nMOV r1 r0\nTRP 0\n";
        let assembled = crate::assembler::assemble(source).unwrap();
        let mut vm = Vm::new(&assembled.bytes, assembled.code_seg, assembled.stack_top);
        let mut input = Cursor::new(Vec::new());
        let mut output: Vec<u8> = Vec::new();
        vm.run(&mut input, &mut output).unwrap();
        assert_eq!(vm.reg(0), vm.reg(1));
    }
}
