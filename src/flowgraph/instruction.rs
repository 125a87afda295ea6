//! The closed instruction set.
//!
//! This module defines [`Op`], the operation payload of every instruction in
//! a flow graph. The instruction *is* its own definition: an instruction that
//! produces a value is referenced by its [`InstrId`], there is no separate
//! destination variable.
//!
//! # Design Goals
//!
//! - **Single assignment**: each instruction defines at most one value
//! - **Explicit operands**: all data dependencies are explicit `InstrId`s
//! - **Closed set**: a new operation is a new variant, and every exhaustive
//!   match below stops compiling until it is classified
//!
//! # Field Documentation
//!
//! The struct fields in this module follow a consistent naming convention:
//! - `value`: a value being stored, wrapped, returned or thrown
//! - `object`: the host object for field operations
//! - `array`, `index`: array and index for element operations
//! - `left`, `right`: binary operands
//! - `operand`: unary operand
//! - `env_index`: flat index into the flattened local environment
//! - `target`, `true_target`, `false_target`: successor blocks

use std::fmt;

use bitflags::bitflags;

use super::graph::{BlockId, InstrId};
use super::slot::{FieldId, Slot};
use super::value::{ClassId, ConstValue, FuncId};

bitflags! {
    /// Summary of the observable effects an operation may have.
    ///
    /// Purity, CSE eligibility and forwarding interference are all derived
    /// from these bits plus exhaustive matching on the variant.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Effects: u8 {
        /// May read mutable heap state.
        const READS_HEAP = 0x01;
        /// May write heap state visible to other instructions.
        const WRITES_HEAP = 0x02;
        /// May throw, transferring control to a catch entry.
        const THROWS = 0x04;
        /// Transfers control (block terminator).
        const CONTROL = 0x08;
        /// May have effects outside the function (calls).
        const EXTERNAL = 0x10;
    }
}

/// Kinds of pure binary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Bitwise AND.
    And,
    /// Bitwise OR.
    Or,
    /// Bitwise XOR.
    Xor,
    /// Equality comparison.
    CmpEq,
    /// Signed less-than comparison.
    CmpLt,
}

impl BinaryOp {
    /// Returns `true` if swapping the operands does not change the result.
    #[must_use]
    pub const fn is_commutative(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Mul | BinaryOp::And | BinaryOp::Or | BinaryOp::Xor | BinaryOp::CmpEq
        )
    }

    /// Lowercase mnemonic used by [`fmt::Display`].
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
            BinaryOp::CmpEq => "cmpeq",
            BinaryOp::CmpLt => "cmplt",
        }
    }
}

/// Kinds of pure unary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Arithmetic negation.
    Neg,
    /// Bitwise NOT.
    Not,
}

impl UnaryOp {
    /// Lowercase mnemonic used by [`fmt::Display`].
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Not => "not",
        }
    }
}

/// A flow graph operation.
///
/// Each variant represents a single operation with explicit inputs. The
/// instruction's own [`InstrId`] is its result where one exists.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    // ========================================================================
    // Constants and parameters
    // ========================================================================
    /// Materialize a constant value.
    Constant {
        /// The constant.
        value: ConstValue,
    },

    /// An incoming value materialized at a block entry.
    ///
    /// At the graph entry these are the function's parameters; at a catch
    /// entry they are the initial definitions re-materializing environment
    /// slots for the handler.
    Parameter {
        /// Flat environment index this parameter corresponds to.
        env_index: usize,
    },

    // ========================================================================
    // Allocation
    // ========================================================================
    /// Allocate a new object with all fields null.
    AllocateObject {
        /// Class of the new instance.
        class: ClassId,
    },

    /// Allocate a new array with all elements null.
    AllocateArray {
        /// Element count.
        length: InstrId,
    },

    // ========================================================================
    // Heap access
    // ========================================================================
    /// Load a field: `self = object.field`.
    LoadField {
        /// Host object.
        object: InstrId,
        /// Field being read.
        field: FieldId,
    },

    /// Store a field: `object.field = value`.
    StoreField {
        /// Host object.
        object: InstrId,
        /// Field being written.
        field: FieldId,
        /// Value to store.
        value: InstrId,
    },

    /// Load an array element: `self = array[index]`.
    LoadIndexed {
        /// Host array.
        array: InstrId,
        /// Element index.
        index: InstrId,
    },

    /// Store an array element: `array[index] = value`.
    StoreIndexed {
        /// Host array.
        array: InstrId,
        /// Element index.
        index: InstrId,
        /// Value to store.
        value: InstrId,
    },

    // ========================================================================
    // Local environment access
    // ========================================================================
    /// Read an environment slot: `self = env[env_index]`.
    LoadLocal {
        /// Flat environment index.
        env_index: usize,
    },

    /// Write an environment slot: `env[env_index] = value`.
    StoreLocal {
        /// Flat environment index.
        env_index: usize,
        /// Value to store.
        value: InstrId,
    },

    // ========================================================================
    // Identity-preserving wrappers
    // ========================================================================
    /// Pin a value with extra compiler-known constraints: `self = value`.
    Redefinition {
        /// The wrapped value.
        value: InstrId,
    },

    /// Throw if `value` is null, otherwise `self = value`.
    CheckNull {
        /// The checked value.
        value: InstrId,
    },

    /// Throw if `value` is not an instance of `class`, otherwise
    /// `self = value`.
    AssertAssignable {
        /// The checked value.
        value: InstrId,
        /// Required class.
        class: ClassId,
    },

    // ========================================================================
    // Pure expressions
    // ========================================================================
    /// Binary operation: `self = left <op> right`.
    Binary {
        /// Operation kind.
        op: BinaryOp,
        /// Left operand.
        left: InstrId,
        /// Right operand.
        right: InstrId,
    },

    /// Unary operation: `self = <op> operand`.
    Unary {
        /// Operation kind.
        op: UnaryOp,
        /// The operand.
        operand: InstrId,
    },

    // ========================================================================
    // Calls
    // ========================================================================
    /// Call a statically known function: `self = function(args..)`.
    StaticCall {
        /// Callee.
        function: FuncId,
        /// Argument values.
        args: Vec<InstrId>,
    },

    // ========================================================================
    // Control flow
    // ========================================================================
    /// Return from the function, optionally with a value.
    Return {
        /// Returned value, if any.
        value: Option<InstrId>,
    },

    /// Unconditional jump.
    Goto {
        /// Successor block.
        target: BlockId,
    },

    /// Two-way conditional jump.
    Branch {
        /// Branch condition.
        condition: InstrId,
        /// Successor when the condition is true.
        true_target: BlockId,
        /// Successor when the condition is false.
        false_target: BlockId,
    },

    /// Throw an exception.
    Throw {
        /// Thrown value.
        exception: InstrId,
    },

    // ========================================================================
    // SSA joins
    // ========================================================================
    /// Merge of values from predecessor blocks, in predecessor order.
    Phi {
        /// One input per predecessor.
        inputs: Vec<InstrId>,
    },
}

impl Op {
    /// Returns the operands of this operation, in slot order.
    ///
    /// The returned order is stable and matches [`Op::operand_slots`]; use
    /// lists record positions into it.
    #[must_use]
    pub fn operands(&self) -> Vec<InstrId> {
        match self {
            Op::Constant { .. }
            | Op::Parameter { .. }
            | Op::AllocateObject { .. }
            | Op::LoadLocal { .. }
            | Op::Goto { .. }
            | Op::Return { value: None } => Vec::new(),
            Op::AllocateArray { length } => vec![*length],
            Op::LoadField { object, .. } => vec![*object],
            Op::StoreField { object, value, .. } => vec![*object, *value],
            Op::LoadIndexed { array, index } => vec![*array, *index],
            Op::StoreIndexed { array, index, value } => vec![*array, *index, *value],
            Op::StoreLocal { value, .. } => vec![*value],
            Op::Redefinition { value } | Op::CheckNull { value } | Op::AssertAssignable { value, .. } => {
                vec![*value]
            }
            Op::Binary { left, right, .. } => vec![*left, *right],
            Op::Unary { operand, .. } => vec![*operand],
            Op::StaticCall { args, .. } => args.clone(),
            Op::Return { value: Some(v) } => vec![*v],
            Op::Branch { condition, .. } => vec![*condition],
            Op::Throw { exception } => vec![*exception],
            Op::Phi { inputs } => inputs.clone(),
        }
    }

    /// Returns mutable references to the operand slots, in the same order
    /// as [`Op::operands`].
    pub(crate) fn operand_slots(&mut self) -> Vec<&mut InstrId> {
        match self {
            Op::Constant { .. }
            | Op::Parameter { .. }
            | Op::AllocateObject { .. }
            | Op::LoadLocal { .. }
            | Op::Goto { .. }
            | Op::Return { value: None } => Vec::new(),
            Op::AllocateArray { length } => vec![length],
            Op::LoadField { object, .. } => vec![object],
            Op::StoreField { object, value, .. } => vec![object, value],
            Op::LoadIndexed { array, index } => vec![array, index],
            Op::StoreIndexed { array, index, value } => vec![array, index, value],
            Op::StoreLocal { value, .. } => vec![value],
            Op::Redefinition { value } | Op::CheckNull { value } | Op::AssertAssignable { value, .. } => {
                vec![value]
            }
            Op::Binary { left, right, .. } => vec![left, right],
            Op::Unary { operand, .. } => vec![operand],
            Op::StaticCall { args, .. } => args.iter_mut().collect(),
            Op::Return { value: Some(v) } => vec![v],
            Op::Branch { condition, .. } => vec![condition],
            Op::Throw { exception } => vec![exception],
            Op::Phi { inputs } => inputs.iter_mut().collect(),
        }
    }

    /// Returns the effect summary for this operation.
    #[must_use]
    pub fn effects(&self) -> Effects {
        match self {
            Op::Constant { .. }
            | Op::Parameter { .. }
            | Op::AllocateObject { .. }
            | Op::AllocateArray { .. }
            | Op::LoadLocal { .. }
            | Op::StoreLocal { .. }
            | Op::Redefinition { .. }
            | Op::Binary { .. }
            | Op::Unary { .. }
            | Op::Phi { .. } => Effects::empty(),
            Op::LoadField { .. } | Op::LoadIndexed { .. } => Effects::READS_HEAP,
            Op::StoreField { .. } | Op::StoreIndexed { .. } => Effects::WRITES_HEAP,
            Op::CheckNull { .. } | Op::AssertAssignable { .. } => Effects::THROWS,
            Op::StaticCall { .. } => {
                Effects::READS_HEAP | Effects::WRITES_HEAP | Effects::THROWS | Effects::EXTERNAL
            }
            Op::Return { .. } | Op::Goto { .. } | Op::Branch { .. } => Effects::CONTROL,
            Op::Throw { .. } => Effects::CONTROL | Effects::THROWS,
        }
    }

    /// Returns `true` if this operation is a pure expression eligible for
    /// common subexpression elimination.
    ///
    /// Constants count: two materializations of the same value are
    /// interchangeable. Allocations are deliberately excluded: every
    /// allocation produces a distinct object even when the operands match.
    #[must_use]
    pub fn is_pure_expression(&self) -> bool {
        matches!(self, Op::Constant { .. } | Op::Binary { .. } | Op::Unary { .. })
            && self.effects().is_empty()
    }

    /// Returns `true` if this operation defines a value that other
    /// instructions may reference.
    #[must_use]
    pub fn is_definition(&self) -> bool {
        !matches!(
            self,
            Op::StoreField { .. }
                | Op::StoreIndexed { .. }
                | Op::StoreLocal { .. }
                | Op::Return { .. }
                | Op::Goto { .. }
                | Op::Branch { .. }
                | Op::Throw { .. }
        )
    }

    /// Returns `true` if this operation ends its block.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        self.effects().contains(Effects::CONTROL)
    }

    /// Returns the in-graph successor blocks of a terminator.
    ///
    /// `Return` and `Throw` leave the function and have none.
    #[must_use]
    pub fn branch_targets(&self) -> Vec<BlockId> {
        match self {
            Op::Goto { target } => vec![*target],
            Op::Branch {
                true_target,
                false_target,
                ..
            } => vec![*true_target, *false_target],
            _ => Vec::new(),
        }
    }

    /// Returns the slot a heap access addresses, if this is one.
    #[must_use]
    pub fn slot(&self) -> Option<Slot> {
        match self {
            Op::LoadField { field, .. } | Op::StoreField { field, .. } => Some(Slot::Field(*field)),
            Op::LoadIndexed { .. } | Op::StoreIndexed { .. } => Some(Slot::ArrayElement),
            _ => None,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Constant { value } => write!(f, "const {value}"),
            Op::Parameter { env_index } => write!(f, "param env[{env_index}]"),
            Op::AllocateObject { class } => write!(f, "alloc {class}"),
            Op::AllocateArray { length } => write!(f, "alloc_array {length}"),
            Op::LoadField { object, field } => write!(f, "load {object}.{field}"),
            Op::StoreField { object, field, value } => write!(f, "store {object}.{field} <- {value}"),
            Op::LoadIndexed { array, index } => write!(f, "load {array}[{index}]"),
            Op::StoreIndexed { array, index, value } => write!(f, "store {array}[{index}] <- {value}"),
            Op::LoadLocal { env_index } => write!(f, "load_local env[{env_index}]"),
            Op::StoreLocal { env_index, value } => write!(f, "store_local env[{env_index}] <- {value}"),
            Op::Redefinition { value } => write!(f, "redef {value}"),
            Op::CheckNull { value } => write!(f, "check_null {value}"),
            Op::AssertAssignable { value, class } => write!(f, "assert {value} is {class}"),
            Op::Binary { op, left, right } => write!(f, "{} {left}, {right}", op.mnemonic()),
            Op::Unary { op, operand } => write!(f, "{} {operand}", op.mnemonic()),
            Op::StaticCall { function, args } => {
                write!(f, "call {function}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            Op::Return { value: Some(v) } => write!(f, "return {v}"),
            Op::Return { value: None } => write!(f, "return"),
            Op::Goto { target } => write!(f, "goto {target}"),
            Op::Branch {
                condition,
                true_target,
                false_target,
            } => write!(f, "branch {condition} ? {true_target} : {false_target}"),
            Op::Throw { exception } => write!(f, "throw {exception}"),
            Op::Phi { inputs } => {
                write!(f, "phi(")?;
                for (i, v) in inputs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operand_order_matches_slots() {
        let mut op = Op::StoreIndexed {
            array: InstrId(0),
            index: InstrId(1),
            value: InstrId(2),
        };
        assert_eq!(op.operands(), vec![InstrId(0), InstrId(1), InstrId(2)]);
        {
            let mut slots = op.operand_slots();
            *slots[1] = InstrId(7);
        }
        assert_eq!(op.operands(), vec![InstrId(0), InstrId(7), InstrId(2)]);
    }

    #[test]
    fn test_effects() {
        let load = Op::LoadField {
            object: InstrId(0),
            field: FieldId(0),
        };
        assert!(load.effects().contains(Effects::READS_HEAP));
        assert!(!load.is_pure_expression());

        let add = Op::Binary {
            op: BinaryOp::Add,
            left: InstrId(0),
            right: InstrId(1),
        };
        assert!(add.is_pure_expression());
        assert!(add.effects().is_empty());

        let constant = Op::Constant { value: ConstValue::Int(5) };
        assert!(constant.is_pure_expression());

        let call = Op::StaticCall {
            function: FuncId(0),
            args: vec![],
        };
        assert!(call.effects().contains(Effects::WRITES_HEAP));
        assert!(call.effects().contains(Effects::EXTERNAL));
    }

    #[test]
    fn test_terminators() {
        assert!(Op::Goto { target: BlockId(1) }.is_terminator());
        assert!(Op::Return { value: None }.is_terminator());
        assert!(Op::Throw { exception: InstrId(0) }.is_terminator());
        assert!(!Op::Constant {
            value: ConstValue::Null
        }
        .is_terminator());
        assert_eq!(
            Op::Branch {
                condition: InstrId(0),
                true_target: BlockId(1),
                false_target: BlockId(2),
            }
            .branch_targets(),
            vec![BlockId(1), BlockId(2)]
        );
        assert!(Op::Return { value: None }.branch_targets().is_empty());
    }

    #[test]
    fn test_commutativity() {
        assert!(BinaryOp::Add.is_commutative());
        assert!(BinaryOp::Mul.is_commutative());
        assert!(!BinaryOp::Sub.is_commutative());
        assert!(!BinaryOp::CmpLt.is_commutative());
    }

    #[test]
    fn test_display() {
        let op = Op::StoreField {
            object: InstrId(1),
            field: FieldId(2),
            value: InstrId(3),
        };
        assert_eq!(op.to_string(), "store v1.field#2 <- v3");
        let phi = Op::Phi {
            inputs: vec![InstrId(4), InstrId(5)],
        };
        assert_eq!(phi.to_string(), "phi(v4, v5)");
    }
}
