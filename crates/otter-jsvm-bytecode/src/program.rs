//! Compiled script programs and the code-cache blob format

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constant::{Constant, ConstantPool};
use crate::error::{BytecodeError, Result};
use crate::instruction::Instruction;
use crate::operand::ConstantIndex;
use crate::{CACHE_FORMAT_VERSION, CACHE_MAGIC};

/// Size of the fixed blob header: magic, version and payload length
const HEADER_LEN: usize = 16;

/// A compiled top-level script
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    /// Resource name the script was compiled under
    pub source_url: String,
    /// SHA-256 of the source text
    pub source_hash: [u8; 32],
    /// Whether the script opened with a `"use strict"` directive
    pub strict: bool,
    /// Constant pool
    pub constants: ConstantPool,
    /// Instruction stream
    pub code: Vec<Instruction>,
}

impl Program {
    /// Create an empty program for `source`
    pub fn new(source_url: impl Into<String>, source: &str) -> Self {
        Self {
            source_url: source_url.into(),
            source_hash: source_hash(source),
            strict: false,
            constants: ConstantPool::new(),
            code: Vec::new(),
        }
    }

    /// Whether this program was compiled from exactly `source`
    pub fn matches_source(&self, source: &str) -> bool {
        self.source_hash == source_hash(source)
    }

    /// Constant string at `idx`, if there is one
    pub fn string(&self, idx: ConstantIndex) -> Option<&str> {
        self.constants.get(idx.index()).and_then(Constant::as_str)
    }

    /// Serialize to a code-cache blob
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let data = serde_json::to_vec(self)?;

        let mut bytes = Vec::with_capacity(HEADER_LEN + data.len());
        bytes.extend_from_slice(&CACHE_MAGIC);
        bytes.extend_from_slice(&CACHE_FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&data);

        Ok(bytes)
    }

    /// Deserialize from a code-cache blob
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(BytecodeError::UnexpectedEnd);
        }

        if bytes[0..8] != CACHE_MAGIC {
            return Err(BytecodeError::InvalidMagic);
        }

        let version = read_u32(&bytes[8..12]);
        if version != CACHE_FORMAT_VERSION {
            return Err(BytecodeError::UnsupportedVersion(version));
        }

        let data_len = read_u32(&bytes[12..16]) as usize;
        let end = HEADER_LEN
            .checked_add(data_len)
            .ok_or(BytecodeError::UnexpectedEnd)?;
        if bytes.len() < end {
            return Err(BytecodeError::UnexpectedEnd);
        }

        Ok(serde_json::from_slice(&bytes[HEADER_LEN..end])?)
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}

/// SHA-256 digest of a script source
pub fn source_hash(source: &str) -> [u8; 32] {
    Sha256::digest(source.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Program {
        let mut program = Program::new("test.js", "'hello'");
        let idx = program.constants.add_string("hello");
        program.code.push(Instruction::LoadConst {
            idx: ConstantIndex::new(idx),
        });
        program.code.push(Instruction::SetCompletion);
        program
    }

    #[test]
    fn test_program_roundtrip() {
        let program = sample();
        let bytes = program.to_bytes().unwrap();
        assert_eq!(&bytes[0..8], &CACHE_MAGIC);

        let restored = Program::from_bytes(&bytes).unwrap();
        assert_eq!(restored.source_url, "test.js");
        assert_eq!(restored.code, program.code);
        assert!(restored.matches_source("'hello'"));
        assert!(!restored.matches_source("'world'"));
    }

    #[test]
    fn test_invalid_magic() {
        let bytes = b"INVALID\0........";
        let result = Program::from_bytes(bytes);
        assert!(matches!(result, Err(BytecodeError::InvalidMagic)));
    }

    #[test]
    fn test_truncated_blob() {
        let bytes = sample().to_bytes().unwrap();
        let result = Program::from_bytes(&bytes[..bytes.len() - 1]);
        assert!(matches!(result, Err(BytecodeError::UnexpectedEnd)));
        assert!(matches!(
            Program::from_bytes(&bytes[..4]),
            Err(BytecodeError::UnexpectedEnd)
        ));
    }

    #[test]
    fn test_version_mismatch() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes[8..12].copy_from_slice(&99u32.to_le_bytes());
        assert!(matches!(
            Program::from_bytes(&bytes),
            Err(BytecodeError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn test_corrupt_payload() {
        let mut bytes = sample().to_bytes().unwrap();
        let last = bytes.len() - 1;
        bytes[last] = b'#';
        assert!(matches!(
            Program::from_bytes(&bytes),
            Err(BytecodeError::Payload(_))
        ));
    }
}
