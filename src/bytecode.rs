//! Instruction set of the csim virtual machine.
//!
//! Every [`Instruction`] is an [`OpCode`] plus one operand.  The operand is a
//! [`Value`] so that `LoadConstant` can carry a pointer-tagged cell; for every
//! other opcode it is a plain `Value::Int` (slot index, argument count,
//! relative branch offset, scale factor ...).
//!
//! Integer arithmetic is width-explicit: the generator picks the opcode whose
//! [`IntForm`] matches the promoted operand types, and the VM wraps the result
//! back to that width.

use std::fmt;

use crate::types::{BasicType, IntForm, IntKind, Signedness};
use crate::value::Value;

// ─────────────────────────────────────────────────────────────────────────────
// OpCode
// ─────────────────────────────────────────────────────────────────────────────

/// Every instruction the csim VM can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    // ── Stack manipulation ────────────────────────────────────────────────────
    /// Duplicate the top stack value.
    Dup,
    /// Discard the top stack value.
    Pop,

    // ── Constants ─────────────────────────────────────────────────────────────
    /// Push the operand.  Argument and local pointers are relocated to the
    /// active frame.
    LoadConstant,
    /// Push the operand verbatim.
    LoadValue,
    /// Push a function pointer to table index `operand`.
    LoadFunction,

    // ── Storage ───────────────────────────────────────────────────────────────
    /// Push argument slot `operand` of the active frame.
    LoadArg,
    /// Pop into argument slot `operand`.
    StoreArg,
    /// Push global slot `operand`.
    LoadGlobal,
    /// Pop into global slot `operand`.
    StoreGlobal,
    /// Push local slot `operand` of the active frame.
    LoadLocal,
    /// Pop into local slot `operand`.
    StoreLocal,
    /// Pop a pointer, push the cell it addresses.
    LoadPointer,
    /// Pop a pointer, pop a value, write the value through the pointer.
    StorePointer,
    /// Pop a pointer, push the `operand` consecutive cells starting at it.
    LoadBlock,
    /// Pop an integer, pop a pointer, push the pointer moved by
    /// `integer * operand` slots.
    OffsetPointer,
    /// Pop two pointers into the same space, push their distance in
    /// elements of `operand` slots.
    PointerDifference,

    // ── Arithmetic ────────────────────────────────────────────────────────────
    AddInt16,
    AddUInt16,
    AddInt32,
    AddUInt32,
    SubtractInt16,
    SubtractUInt16,
    SubtractInt32,
    SubtractUInt32,
    MultiplyInt16,
    MultiplyUInt16,
    MultiplyInt32,
    MultiplyUInt32,
    DivideInt16,
    DivideUInt16,
    DivideInt32,
    DivideUInt32,
    ModuloInt16,
    ModuloUInt16,
    ModuloInt32,
    ModuloUInt32,

    // ── Comparison ────────────────────────────────────────────────────────────
    /// Tag-aware equality; pushes 1 or 0.
    Equal,
    NotEqual,
    LessThanInt16,
    LessThanUInt16,
    LessThanInt32,
    LessThanUInt32,
    LessThanOrEqualInt16,
    LessThanOrEqualUInt16,
    LessThanOrEqualInt32,
    LessThanOrEqualUInt32,
    GreaterThanInt16,
    GreaterThanUInt16,
    GreaterThanInt32,
    GreaterThanUInt32,
    GreaterThanOrEqualInt16,
    GreaterThanOrEqualUInt16,
    GreaterThanOrEqualInt32,
    GreaterThanOrEqualUInt32,
    /// `!x`: pushes 1 if the popped value is falsy, else 0.
    LogicalNot,

    // ── Conversion ────────────────────────────────────────────────────────────
    ConvertInt8,
    ConvertUInt8,
    ConvertInt16,
    ConvertUInt16,
    ConvertInt32,
    ConvertUInt32,

    // ── Control flow ──────────────────────────────────────────────────────────
    /// Continue at `ip + operand`.
    Jump,
    /// Pop; continue at `ip + operand` when the value is falsy.
    BranchIfFalse,
    /// Pop; continue at `ip + operand` when the value is truthy.
    BranchIfTrue,
    /// Pop the callee and transfer control to it.
    /// Operand: number of argument slots already pushed.
    Call,
    /// Leave the active function.
    Return,
}

/// Integer arithmetic operations that come in one opcode per [`IntForm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

/// Ordered comparisons that come in one opcode per [`IntForm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl ComparisonOp {
    pub fn holds(self, a: i64, b: i64) -> bool {
        match self {
            ComparisonOp::LessThan => a < b,
            ComparisonOp::LessThanOrEqual => a <= b,
            ComparisonOp::GreaterThan => a > b,
            ComparisonOp::GreaterThanOrEqual => a >= b,
        }
    }
}

impl OpCode {
    /// The opcode computing `op` in `form`.
    pub fn arithmetic(op: ArithmeticOp, form: IntForm) -> OpCode {
        use ArithmeticOp::*;
        use IntForm::*;
        match (op, form) {
            (Add, Int16) => OpCode::AddInt16,
            (Add, UInt16) => OpCode::AddUInt16,
            (Add, Int32) => OpCode::AddInt32,
            (Add, UInt32) => OpCode::AddUInt32,
            (Subtract, Int16) => OpCode::SubtractInt16,
            (Subtract, UInt16) => OpCode::SubtractUInt16,
            (Subtract, Int32) => OpCode::SubtractInt32,
            (Subtract, UInt32) => OpCode::SubtractUInt32,
            (Multiply, Int16) => OpCode::MultiplyInt16,
            (Multiply, UInt16) => OpCode::MultiplyUInt16,
            (Multiply, Int32) => OpCode::MultiplyInt32,
            (Multiply, UInt32) => OpCode::MultiplyUInt32,
            (Divide, Int16) => OpCode::DivideInt16,
            (Divide, UInt16) => OpCode::DivideUInt16,
            (Divide, Int32) => OpCode::DivideInt32,
            (Divide, UInt32) => OpCode::DivideUInt32,
            (Modulo, Int16) => OpCode::ModuloInt16,
            (Modulo, UInt16) => OpCode::ModuloUInt16,
            (Modulo, Int32) => OpCode::ModuloInt32,
            (Modulo, UInt32) => OpCode::ModuloUInt32,
        }
    }

    /// The opcode comparing in `form`.
    pub fn comparison(op: ComparisonOp, form: IntForm) -> OpCode {
        use ComparisonOp::*;
        use IntForm::*;
        match (op, form) {
            (LessThan, Int16) => OpCode::LessThanInt16,
            (LessThan, UInt16) => OpCode::LessThanUInt16,
            (LessThan, Int32) => OpCode::LessThanInt32,
            (LessThan, UInt32) => OpCode::LessThanUInt32,
            (LessThanOrEqual, Int16) => OpCode::LessThanOrEqualInt16,
            (LessThanOrEqual, UInt16) => OpCode::LessThanOrEqualUInt16,
            (LessThanOrEqual, Int32) => OpCode::LessThanOrEqualInt32,
            (LessThanOrEqual, UInt32) => OpCode::LessThanOrEqualUInt32,
            (GreaterThan, Int16) => OpCode::GreaterThanInt16,
            (GreaterThan, UInt16) => OpCode::GreaterThanUInt16,
            (GreaterThan, Int32) => OpCode::GreaterThanInt32,
            (GreaterThan, UInt32) => OpCode::GreaterThanUInt32,
            (GreaterThanOrEqual, Int16) => OpCode::GreaterThanOrEqualInt16,
            (GreaterThanOrEqual, UInt16) => OpCode::GreaterThanOrEqualUInt16,
            (GreaterThanOrEqual, Int32) => OpCode::GreaterThanOrEqualInt32,
            (GreaterThanOrEqual, UInt32) => OpCode::GreaterThanOrEqualUInt32,
        }
    }

    /// The opcode narrowing a value to `target`.
    pub fn conversion(target: BasicType) -> OpCode {
        match (target.kind, target.signedness) {
            (IntKind::Char, Signedness::Signed) => OpCode::ConvertInt8,
            (IntKind::Char, Signedness::Unsigned) => OpCode::ConvertUInt8,
            (IntKind::Short | IntKind::Int, Signedness::Signed) => OpCode::ConvertInt16,
            (IntKind::Short | IntKind::Int, Signedness::Unsigned) => OpCode::ConvertUInt16,
            (IntKind::Long, Signedness::Signed) => OpCode::ConvertInt32,
            (IntKind::Long, Signedness::Unsigned) => OpCode::ConvertUInt32,
        }
    }

    /// Splits an arithmetic opcode into operation and form.
    pub fn as_arithmetic(self) -> Option<(ArithmeticOp, IntForm)> {
        use ArithmeticOp::*;
        use IntForm::*;
        let parts = match self {
            OpCode::AddInt16 => (Add, Int16),
            OpCode::AddUInt16 => (Add, UInt16),
            OpCode::AddInt32 => (Add, Int32),
            OpCode::AddUInt32 => (Add, UInt32),
            OpCode::SubtractInt16 => (Subtract, Int16),
            OpCode::SubtractUInt16 => (Subtract, UInt16),
            OpCode::SubtractInt32 => (Subtract, Int32),
            OpCode::SubtractUInt32 => (Subtract, UInt32),
            OpCode::MultiplyInt16 => (Multiply, Int16),
            OpCode::MultiplyUInt16 => (Multiply, UInt16),
            OpCode::MultiplyInt32 => (Multiply, Int32),
            OpCode::MultiplyUInt32 => (Multiply, UInt32),
            OpCode::DivideInt16 => (Divide, Int16),
            OpCode::DivideUInt16 => (Divide, UInt16),
            OpCode::DivideInt32 => (Divide, Int32),
            OpCode::DivideUInt32 => (Divide, UInt32),
            OpCode::ModuloInt16 => (Modulo, Int16),
            OpCode::ModuloUInt16 => (Modulo, UInt16),
            OpCode::ModuloInt32 => (Modulo, Int32),
            OpCode::ModuloUInt32 => (Modulo, UInt32),
            _ => return None,
        };
        Some(parts)
    }

    /// Splits an ordered comparison opcode into comparison and form.
    pub fn as_comparison(self) -> Option<(ComparisonOp, IntForm)> {
        use ComparisonOp::*;
        use IntForm::*;
        let parts = match self {
            OpCode::LessThanInt16 => (LessThan, Int16),
            OpCode::LessThanUInt16 => (LessThan, UInt16),
            OpCode::LessThanInt32 => (LessThan, Int32),
            OpCode::LessThanUInt32 => (LessThan, UInt32),
            OpCode::LessThanOrEqualInt16 => (LessThanOrEqual, Int16),
            OpCode::LessThanOrEqualUInt16 => (LessThanOrEqual, UInt16),
            OpCode::LessThanOrEqualInt32 => (LessThanOrEqual, Int32),
            OpCode::LessThanOrEqualUInt32 => (LessThanOrEqual, UInt32),
            OpCode::GreaterThanInt16 => (GreaterThan, Int16),
            OpCode::GreaterThanUInt16 => (GreaterThan, UInt16),
            OpCode::GreaterThanInt32 => (GreaterThan, Int32),
            OpCode::GreaterThanUInt32 => (GreaterThan, UInt32),
            OpCode::GreaterThanOrEqualInt16 => (GreaterThanOrEqual, Int16),
            OpCode::GreaterThanOrEqualUInt16 => (GreaterThanOrEqual, UInt16),
            OpCode::GreaterThanOrEqualInt32 => (GreaterThanOrEqual, Int32),
            OpCode::GreaterThanOrEqualUInt32 => (GreaterThanOrEqual, UInt32),
            _ => return None,
        };
        Some(parts)
    }

    /// The basic type a conversion opcode narrows to.
    pub fn as_conversion(self) -> Option<BasicType> {
        let target = match self {
            OpCode::ConvertInt8 => BasicType::SIGNED_CHAR,
            OpCode::ConvertUInt8 => BasicType::UNSIGNED_CHAR,
            OpCode::ConvertInt16 => BasicType::SIGNED_INT,
            OpCode::ConvertUInt16 => BasicType::UNSIGNED_INT,
            OpCode::ConvertInt32 => BasicType::SIGNED_LONG,
            OpCode::ConvertUInt32 => BasicType::UNSIGNED_LONG,
            _ => return None,
        };
        Some(target)
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Instruction
// ─────────────────────────────────────────────────────────────────────────────

/// One bytecode instruction.  Immutable once emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub op: OpCode,
    pub operand: Value,
}

impl Instruction {
    pub fn new(op: OpCode, operand: impl Into<Value>) -> Self {
        Instruction {
            op,
            operand: operand.into(),
        }
    }

    /// Operand as a non-negative slot index or count.
    ///
    /// Only meaningful for instructions the generator emitted with an integer
    /// operand; anything else maps to `None`.
    pub fn index(&self) -> Option<usize> {
        match self.operand {
            Value::Int(n) => usize::try_from(n).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op, self.operand)
    }
}

/// Renders instructions as assembler text, one `index: opcode operand` per line.
pub fn disassemble(instructions: &[Instruction]) -> String {
    let mut out = String::new();
    for (i, instruction) in instructions.iter().enumerate() {
        out.push_str(&format!("{i}: {instruction}\n"));
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arithmetic_opcode_table_is_consistent() {
        for op in [
            ArithmeticOp::Add,
            ArithmeticOp::Subtract,
            ArithmeticOp::Multiply,
            ArithmeticOp::Divide,
            ArithmeticOp::Modulo,
        ] {
            for form in [IntForm::Int16, IntForm::UInt16, IntForm::Int32, IntForm::UInt32] {
                let code = OpCode::arithmetic(op, form);
                assert_eq!(code.as_arithmetic(), Some((op, form)), "{code}");
            }
        }
        assert_eq!(OpCode::Dup.as_arithmetic(), None);
    }

    #[test]
    fn test_comparison_opcode_table_is_consistent() {
        for op in [
            ComparisonOp::LessThan,
            ComparisonOp::LessThanOrEqual,
            ComparisonOp::GreaterThan,
            ComparisonOp::GreaterThanOrEqual,
        ] {
            for form in [IntForm::Int16, IntForm::UInt16, IntForm::Int32, IntForm::UInt32] {
                let code = OpCode::comparison(op, form);
                assert_eq!(code.as_comparison(), Some((op, form)), "{code}");
            }
        }
        assert_eq!(OpCode::Equal.as_comparison(), None);
    }

    #[test]
    fn test_conversion_targets() {
        assert_eq!(OpCode::conversion(BasicType::UNSIGNED_CHAR), OpCode::ConvertUInt8);
        assert_eq!(
            OpCode::ConvertInt16.as_conversion(),
            Some(BasicType::SIGNED_INT)
        );
    }

    #[test]
    fn test_disassemble() {
        let code = vec![
            Instruction::new(OpCode::LoadConstant, Value::FunctionPointer(2)),
            Instruction::new(OpCode::Call, 0),
            Instruction::new(OpCode::StoreLocal, 1),
            Instruction::new(OpCode::Return, 0),
        ];
        let text = disassemble(&code);
        assert_eq!(
            text,
            "0: LoadConstant &fn[2]\n1: Call 0\n2: StoreLocal 1\n3: Return 0\n"
        );
    }

    #[test]
    fn test_instruction_index() {
        assert_eq!(Instruction::new(OpCode::LoadLocal, 3).index(), Some(3));
        assert_eq!(Instruction::new(OpCode::Jump, -2).index(), None);
        assert_eq!(
            Instruction::new(OpCode::LoadConstant, Value::LocalPointer(1)).index(),
            None
        );
    }
}
