//! Bytecode instructions
//!
//! Stack effects are written `[inputs] -> [outputs]`, top of stack last.

use serde::{Deserialize, Serialize};

use crate::operand::{ConstantIndex, JumpOffset};

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `**`
    Pow,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `===`
    StrictEq,
    /// `!==`
    StrictNe,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `>>>`
    Ushr,
    /// `instanceof`
    InstanceOf,
    /// `in`
    In,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `+x`
    ToNumber,
    /// `!x`
    Not,
    /// `~x`
    BitNot,
    /// `typeof x`
    TypeOf,
}

/// A single bytecode instruction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    // ==================== Constants ====================
    /// `[] -> [undefined]`
    LoadUndefined,
    /// `[] -> [null]`
    LoadNull,
    /// `[] -> [true]`
    LoadTrue,
    /// `[] -> [false]`
    LoadFalse,
    /// `[] -> [imm]`
    LoadInt32 {
        /// Immediate value
        value: i32,
    },
    /// `[] -> [constants[idx]]`
    LoadConst {
        /// Constant pool index
        idx: ConstantIndex,
    },
    /// `[] -> [this]` (the global object at top level)
    LoadThis,

    // ==================== Globals ====================
    /// `[] -> [global[name]]`, throws ReferenceError when unbound
    GetGlobal {
        /// Binding name
        name: ConstantIndex,
    },
    /// `[v] -> [v]`, stores into the global object
    SetGlobal {
        /// Binding name
        name: ConstantIndex,
    },
    /// `[] -> []`, creates `global[name] = undefined` when absent
    DeclareGlobal {
        /// Binding name
        name: ConstantIndex,
    },
    /// `[] -> [typeof global[name]]`, never throws for unbound names
    TypeOfGlobal {
        /// Binding name
        name: ConstantIndex,
    },

    // ==================== Properties ====================
    /// `[obj] -> [obj.name]`
    GetProp {
        /// Property name
        name: ConstantIndex,
    },
    /// `[obj, v] -> [v]`
    SetProp {
        /// Property name
        name: ConstantIndex,
    },
    /// `[obj, key] -> [obj[key]]`
    GetElem,
    /// `[obj, key, v] -> [v]`
    SetElem,
    /// `[obj] -> [bool]`
    DeleteProp {
        /// Property name
        name: ConstantIndex,
    },
    /// `[obj, key] -> [bool]`
    DeleteElem,
    /// `[obj, v] -> [obj]`, defines an own enumerable data property
    DefineField {
        /// Property name
        name: ConstantIndex,
    },

    // ==================== Literals ====================
    /// `[] -> [{}]`
    NewObject,
    /// `[e0, .., e(len-1)] -> [array]`
    NewArray {
        /// Element count
        len: u32,
    },
    /// `[] -> [hole]`, only valid immediately inside an array literal
    LoadHole,

    // ==================== Operators ====================
    /// `[a] -> [op a]`
    Unary {
        /// Operator
        op: UnaryOp,
    },
    /// `[a, b] -> [a op b]`
    Binary {
        /// Operator
        op: BinaryOp,
    },

    // ==================== Stack ====================
    /// `[v] -> [v, v]`
    Dup,
    /// `[a, b] -> [a, b, a, b]`
    Dup2,
    /// `[v] -> []`
    Pop,
    /// `[v] -> []`, records the script completion value
    SetCompletion,

    // ==================== Control flow ====================
    /// Unconditional jump
    Jump {
        /// Relative offset
        offset: JumpOffset,
    },
    /// `[v] -> []`, jumps when `v` is falsy
    JumpIfFalse {
        /// Relative offset
        offset: JumpOffset,
    },
    /// `[v] -> []`, jumps when `v` is truthy
    JumpIfTrue {
        /// Relative offset
        offset: JumpOffset,
    },
    /// `[v] -> []`, jumps when `v` is neither null nor undefined
    JumpIfNotNullish {
        /// Relative offset
        offset: JumpOffset,
    },
    /// `[v] -> !`, throws `v`
    Throw,

    // ==================== Calls ====================
    /// `[this, f, a0, .., a(argc-1)] -> [result]`
    Call {
        /// Argument count
        argc: u16,
        /// Source-level callee name, for error messages
        callee: Option<ConstantIndex>,
    },
    /// `[f, a0, .., a(argc-1)] -> [result]`
    Construct {
        /// Argument count
        argc: u16,
        /// Source-level callee name, for error messages
        callee: Option<ConstantIndex>,
    },
}

impl Instruction {
    /// Whether this instruction transfers control through a [`JumpOffset`]
    pub fn is_jump(&self) -> bool {
        matches!(
            self,
            Self::Jump { .. }
                | Self::JumpIfFalse { .. }
                | Self::JumpIfTrue { .. }
                | Self::JumpIfNotNullish { .. }
        )
    }
}
