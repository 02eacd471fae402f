//! A two-stage toolchain for a small register-based virtual machine:
//! - an assembler translating a line-oriented assembly text into a flat
//!   byte image
//! - an interpreter executing that image
//!
//! The syntax and machine contract are documented alongside the modules
//! that implement them: [`assembler`] for the textual grammar and the
//! two-pass encoder, [`vm`] for the register file and instruction
//! semantics, [`image`] for the shared memory layout, and
//! [`disassembler`] for recovering a listing from an encoded image.

pub mod assembler;
pub mod disassembler;
pub mod image;
pub mod logging;
pub mod vm;
