//! Bytecode generation state

use otter_jsvm_bytecode::{ConstantIndex, Instruction, JumpOffset, Program};

use crate::error::{CompileError, CompileResult};

/// Kind of conditional or unconditional jump to emit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    /// Always jump
    Always,
    /// Pop and jump when falsy
    IfFalse,
    /// Pop and jump when truthy
    IfTrue,
    /// Pop and jump when neither null nor undefined
    IfNotNullish,
}

/// Code generator state for one script
pub struct CodeGen {
    program: Program,
}

impl CodeGen {
    /// Create a new code generator for `source`
    pub fn new(source_url: &str, source: &str) -> Self {
        Self {
            program: Program::new(source_url, source),
        }
    }

    /// Mark the program as strict-mode code
    pub fn set_strict(&mut self, strict: bool) {
        self.program.strict = strict;
    }

    /// Add a string constant
    pub fn add_string(&mut self, s: &str) -> CompileResult<ConstantIndex> {
        self.check_pool()?;
        Ok(ConstantIndex(self.program.constants.add_string(s)))
    }

    /// Add a number constant
    pub fn add_number(&mut self, n: f64) -> CompileResult<ConstantIndex> {
        self.check_pool()?;
        Ok(ConstantIndex(self.program.constants.add_number(n)))
    }

    fn check_pool(&self) -> CompileResult<()> {
        if self.program.constants.len() >= u32::MAX as usize {
            return Err(CompileError::TooManyConstants);
        }
        Ok(())
    }

    /// Emit an instruction
    pub fn emit(&mut self, instruction: Instruction) {
        self.program.code.push(instruction);
    }

    /// Get current instruction index (for patching jumps)
    pub fn current_index(&self) -> usize {
        self.program.code.len()
    }

    /// Emit a placeholder jump (returns index for patching)
    pub fn emit_jump(&mut self, kind: JumpKind) -> usize {
        let idx = self.current_index();
        let offset = JumpOffset(0);
        self.emit(match kind {
            JumpKind::Always => Instruction::Jump { offset },
            JumpKind::IfFalse => Instruction::JumpIfFalse { offset },
            JumpKind::IfTrue => Instruction::JumpIfTrue { offset },
            JumpKind::IfNotNullish => Instruction::JumpIfNotNullish { offset },
        });
        idx
    }

    /// Point the jump at `index` to the next instruction to be emitted
    pub fn patch_jump_here(&mut self, index: usize) -> CompileResult<()> {
        let offset = JumpOffset(self.current_index() as i32 - index as i32);
        match self.program.code.get_mut(index) {
            Some(
                Instruction::Jump { offset: o }
                | Instruction::JumpIfFalse { offset: o }
                | Instruction::JumpIfTrue { offset: o }
                | Instruction::JumpIfNotNullish { offset: o },
            ) => {
                *o = offset;
                Ok(())
            }
            _ => Err(CompileError::internal(format!(
                "instruction {} is not a jump",
                index
            ))),
        }
    }

    /// Finish code generation
    pub fn finish(self) -> Program {
        self.program
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_forward_jump() {
        let mut cg = CodeGen::new("t.js", "");
        cg.emit(Instruction::LoadTrue);
        let jump = cg.emit_jump(JumpKind::IfFalse);
        cg.emit(Instruction::LoadNull);
        cg.emit(Instruction::Pop);
        cg.patch_jump_here(jump).unwrap();

        let program = cg.finish();
        assert_eq!(
            program.code[1],
            Instruction::JumpIfFalse {
                offset: JumpOffset(3)
            }
        );
    }

    #[test]
    fn test_patch_non_jump_is_internal_error() {
        let mut cg = CodeGen::new("t.js", "");
        cg.emit(Instruction::Pop);
        assert!(matches!(
            cg.patch_jump_here(0),
            Err(CompileError::Internal(_))
        ));
    }
}
