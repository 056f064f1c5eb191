//! Bytecode operands

use serde::{Deserialize, Serialize};

/// Index into the constant pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ConstantIndex(pub u32);

impl ConstantIndex {
    /// Create a new constant index
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get index value
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Jump offset, relative to the jump instruction itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct JumpOffset(pub i32);

impl JumpOffset {
    /// Create a new jump offset
    #[inline]
    pub const fn new(offset: i32) -> Self {
        Self(offset)
    }

    /// Get offset value
    #[inline]
    pub const fn offset(self) -> i32 {
        self.0
    }

    /// Resolve the absolute target of a jump located at `pc`.
    ///
    /// Returns `None` when the target would fall before the start of the code.
    #[inline]
    pub fn target(self, pc: usize) -> Option<usize> {
        let target = pc as i64 + self.0 as i64;
        usize::try_from(target).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_index() {
        let c = ConstantIndex::new(1000);
        assert_eq!(c.index(), 1000);
    }

    #[test]
    fn test_jump_target() {
        assert_eq!(JumpOffset::new(3).target(2), Some(5));
        assert_eq!(JumpOffset::new(-2).target(2), Some(0));
        assert_eq!(JumpOffset::new(-3).target(2), None);
    }
}
