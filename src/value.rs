//! Runtime values for the csim VM.
//!
//! A [`Value`] is one numeric cell.  It is either a plain integer or a pointer
//! tagged with the address space it points into:
//!
//! | Variant | Payload |
//! |---------|---------|
//! | `Int` | the integer itself |
//! | `FunctionPointer` | index into the function table |
//! | `ArgPointer` | offset into the argument space (value stack) |
//! | `GlobalPointer` | offset into global memory |
//! | `LocalPointer` | offset into local memory |
//!
//! Inside emitted bytecode, argument and local pointers are relative to the
//! frame that executes the instruction.  `LoadConstant` relocates them, so every
//! pointer living on the value stack or in memory is absolute.

use std::fmt;

use crate::vm::Fault;

// ─────────────────────────────────────────────────────────────────────────────
// Value
// ─────────────────────────────────────────────────────────────────────────────

/// A runtime value in the csim VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
    /// Integer wide enough for both the signed and unsigned 32-bit ranges.
    Int(i64),
    FunctionPointer(i64),
    ArgPointer(i64),
    GlobalPointer(i64),
    LocalPointer(i64),
}

impl Default for Value {
    fn default() -> Self {
        Value::Int(0)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl Value {
    pub fn is_pointer(self) -> bool {
        !matches!(self, Value::Int(_))
    }

    /// The integer payload, refusing to reinterpret a pointer as a number.
    pub fn as_int(self) -> Result<i64, Fault> {
        match self {
            Value::Int(n) => Ok(n),
            other => Err(Fault::PointerAsInteger(other)),
        }
    }

    /// Raw payload regardless of the tag.
    pub fn payload(self) -> i64 {
        match self {
            Value::Int(n)
            | Value::FunctionPointer(n)
            | Value::ArgPointer(n)
            | Value::GlobalPointer(n)
            | Value::LocalPointer(n) => n,
        }
    }

    /// Moves a data pointer by `delta` slots inside its own address space.
    pub fn offset(self, delta: i64) -> Result<Value, Fault> {
        let moved = |n: i64| n.checked_add(delta).ok_or(Fault::InvalidAddress(self));
        match self {
            Value::ArgPointer(n) => Ok(Value::ArgPointer(moved(n)?)),
            Value::GlobalPointer(n) => Ok(Value::GlobalPointer(moved(n)?)),
            Value::LocalPointer(n) => Ok(Value::LocalPointer(moved(n)?)),
            other => Err(Fault::InvalidAddress(other)),
        }
    }

    /// `true` when both values point into the same address space.
    pub fn same_space(self, other: Value) -> bool {
        std::mem::discriminant(&self) == std::mem::discriminant(&other)
    }

    /// C truthiness: non-zero integers and every pointer are true.
    pub fn is_truthy(self) -> bool {
        match self {
            Value::Int(n) => n != 0,
            _ => true,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::FunctionPointer(n) => write!(f, "&fn[{n}]"),
            Value::ArgPointer(n) => write!(f, "&arg[{n}]"),
            Value::GlobalPointer(n) => write!(f, "&global[{n}]"),
            Value::LocalPointer(n) => write!(f, "&local[{n}]"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_int_rejects_pointers() {
        assert_eq!(Value::Int(5).as_int(), Ok(5));
        assert_eq!(
            Value::LocalPointer(2).as_int(),
            Err(Fault::PointerAsInteger(Value::LocalPointer(2)))
        );
    }

    #[test]
    fn test_offset_stays_in_space() {
        assert_eq!(Value::GlobalPointer(3).offset(2), Ok(Value::GlobalPointer(5)));
        assert_eq!(Value::ArgPointer(3).offset(-1), Ok(Value::ArgPointer(2)));
        assert!(Value::FunctionPointer(0).offset(1).is_err());
        assert!(Value::Int(0).offset(1).is_err());
        assert_eq!(
            Value::GlobalPointer(i64::MAX).offset(1),
            Err(Fault::InvalidAddress(Value::GlobalPointer(i64::MAX)))
        );
    }

    #[test]
    fn test_same_space() {
        assert!(Value::LocalPointer(1).same_space(Value::LocalPointer(9)));
        assert!(!Value::LocalPointer(1).same_space(Value::GlobalPointer(1)));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Int(-3).is_truthy());
        assert!(Value::GlobalPointer(0).is_truthy());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Int(-7).to_string(), "-7");
        assert_eq!(Value::FunctionPointer(1).to_string(), "&fn[1]");
        assert_eq!(Value::LocalPointer(0).to_string(), "&local[0]");
    }
}
