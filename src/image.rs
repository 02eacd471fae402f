//! The shared byte-addressable memory image.
//!
//! The assembler and the VM both see the image as one contiguous buffer:
//! data directives first (from address 0), then instructions (from
//! `code_seg`), then an unused stack region running from `stack_top` up
//! to the buffer's end. [`MemoryImage`] is the typed view both stages
//! use to read and write it; it never panics on an out-of-range access,
//! it faults.

use std::fmt;

/// Default runtime image size used by the `vm` binary: 50 kB, matching
/// the reference machine's fixed stack-plus-program address space.
pub const DEFAULT_MEM_SIZE: u32 = 51_200;

/// Default working-buffer size the assembler grows into while it has no
/// better estimate of the final program size.
pub const DEFAULT_ASSEMBLER_MEM_SIZE: u32 = 52_428_800;

/// An out-of-range memory access. The VM turns this into a fatal,
/// recoverable [`crate::vm::RuntimeError`] rather than panicking or
/// silently wrapping the address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryFault {
    pub addr: u32,
    pub width: usize,
    pub len: usize,
}

impl fmt::Display for MemoryFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "out-of-range memory access at address {} (width {} bytes, image size {})",
            self.addr, self.width, self.len
        )
    }
}

impl std::error::Error for MemoryFault {}

/// A byte-addressable memory image.
///
/// A growable image (the assembler's working buffer) extends itself
/// with zero bytes as writes reach past its current end. A fixed image
/// (the VM's runtime image) never resizes; an access past its end
/// faults instead.
pub struct MemoryImage {
    bytes: Vec<u8>,
    growable: bool,
}

impl MemoryImage {
    /// A fixed-size image backing the VM's address space.
    pub fn fixed(size: usize) -> Self {
        MemoryImage {
            bytes: vec![0u8; size],
            growable: false,
        }
    }

    /// A growable image used while assembling; starts empty and extends
    /// on demand.
    pub fn growable() -> Self {
        MemoryImage {
            bytes: Vec::new(),
            growable: true,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Copy `data` into the front of this image, overwriting whatever
    /// was already there. Used to load an assembled program into a
    /// fresh, larger runtime image.
    pub fn blit(&mut self, data: &[u8]) {
        self.ensure_capacity(data.len())
            .expect("blit target must fit a fixed image");
        self.bytes[..data.len()].copy_from_slice(data);
    }

    fn ensure_capacity(&mut self, end: usize) -> Result<(), MemoryFault> {
        if end <= self.bytes.len() {
            return Ok(());
        }
        if !self.growable {
            return Err(MemoryFault {
                addr: end as u32,
                width: 0,
                len: self.bytes.len(),
            });
        }
        self.bytes.resize(end, 0);
        Ok(())
    }

    fn check_range(&mut self, addr: u32, width: usize) -> Result<(), MemoryFault> {
        let end = addr as usize + width;
        self.ensure_capacity(end).map_err(|_| MemoryFault {
            addr,
            width,
            len: self.bytes.len(),
        })
    }

    /// Store a signed 32-bit value, big-endian, at `addr`.
    pub fn store_int(&mut self, value: i32, addr: u32) -> Result<(), MemoryFault> {
        self.check_range(addr, 4)?;
        let start = addr as usize;
        self.bytes[start..start + 4].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    /// Load a signed 32-bit value, big-endian, from `addr`.
    pub fn fetch_int(&self, addr: u32) -> Result<i32, MemoryFault> {
        let start = addr as usize;
        let end = start + 4;
        if end > self.bytes.len() {
            return Err(MemoryFault {
                addr,
                width: 4,
                len: self.bytes.len(),
            });
        }
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.bytes[start..end]);
        Ok(i32::from_be_bytes(buf))
    }

    /// Store a single byte at `addr`.
    pub fn store_byte(&mut self, value: u8, addr: u32) -> Result<(), MemoryFault> {
        self.check_range(addr, 1)?;
        self.bytes[addr as usize] = value;
        Ok(())
    }

    /// Load a single byte from `addr`.
    pub fn fetch_byte(&self, addr: u32) -> Result<u8, MemoryFault> {
        self.bytes
            .get(addr as usize)
            .copied()
            .ok_or(MemoryFault {
                addr,
                width: 1,
                len: self.bytes.len(),
            })
    }

    /// Store a 12-byte instruction cell (`opcode`, `operand1`,
    /// `operand2`) at `addr`.
    pub fn store_inst(&mut self, addr: u32, opcode: i32, op1: i32, op2: i32) -> Result<(), MemoryFault> {
        self.store_int(opcode, addr)?;
        self.store_int(op1, addr + 4)?;
        self.store_int(op2, addr + 8)?;
        Ok(())
    }

    /// Load a 12-byte instruction cell from `addr`.
    pub fn fetch_inst(&self, addr: u32) -> Result<(i32, i32, i32), MemoryFault> {
        let opcode = self.fetch_int(addr)?;
        let op1 = self.fetch_int(addr + 4)?;
        let op2 = self.fetch_int(addr + 8)?;
        Ok((opcode, op1, op2))
    }
}

const MAGIC: [u8; 4] = *b"RVM1";

/// An assembled program as persisted to disk: the raw image bytes
/// `[0, stack_top)` plus a small header recording `code_seg` and
/// `stack_top`, so the `vm` binary can load a program without
/// re-running the assembler.
pub struct ImageFile {
    pub code_seg: u32,
    pub stack_top: u32,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
pub enum ImageFormatError {
    TooShort,
    BadMagic,
}

impl fmt::Display for ImageFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageFormatError::TooShort => write!(f, "image file is too short to contain a header"),
            ImageFormatError::BadMagic => write!(f, "image file does not start with the expected magic bytes"),
        }
    }
}

impl std::error::Error for ImageFormatError {}

impl ImageFile {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + self.bytes.len());
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&self.code_seg.to_be_bytes());
        out.extend_from_slice(&self.stack_top.to_be_bytes());
        out.extend_from_slice(&self.bytes);
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ImageFormatError> {
        if data.len() < 12 {
            return Err(ImageFormatError::TooShort);
        }
        if data[0..4] != MAGIC {
            return Err(ImageFormatError::BadMagic);
        }
        let code_seg = u32::from_be_bytes(data[4..8].try_into().unwrap());
        let stack_top = u32::from_be_bytes(data[8..12].try_into().unwrap());
        Ok(ImageFile {
            code_seg,
            stack_top,
            bytes: data[12..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_round_trips_through_big_endian_bytes() {
        let mut image = MemoryImage::fixed(16);
        image.store_int(-1, 0).unwrap();
        assert_eq!(&image.as_slice()[0..4], &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(image.fetch_int(0).unwrap(), -1);
    }

    #[test]
    fn growable_image_extends_on_write() {
        let mut image = MemoryImage::growable();
        assert_eq!(image.len(), 0);
        image.store_byte(7, 10).unwrap();
        assert_eq!(image.len(), 11);
        assert_eq!(image.fetch_byte(10).unwrap(), 7);
    }

    #[test]
    fn fixed_image_faults_past_its_end() {
        let image = MemoryImage::fixed(4);
        assert!(image.fetch_int(1).is_err());
    }

    #[test]
    fn image_file_round_trips() {
        let file = ImageFile {
            code_seg: 4,
            stack_top: 16,
            bytes: vec![0, 0, 0, 42, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12],
        };
        let encoded = file.to_bytes();
        let decoded = ImageFile::from_bytes(&encoded).unwrap();
        assert_eq!(decoded.code_seg, 4);
        assert_eq!(decoded.stack_top, 16);
        assert_eq!(decoded.bytes, file.bytes);
    }
}
