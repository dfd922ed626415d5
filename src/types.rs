//! Static type model for the C dialect.
//!
//! The set of type shapes is closed: basic integers, pointers, fixed-length
//! arrays, functions and `void`.  Every consumer matches over [`CType`]
//! exhaustively instead of asking "is this a subtype of ...".
//!
//! The simulated machine is an 8-bit microcontroller class CPU, so `int` is
//! 16 bits wide and `long` is 32 bits.

use std::fmt;

// ─────────────────────────────────────────────────────────────────────────────
// Basic integer types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signedness {
    Signed,
    Unsigned,
}

/// The width class of a basic integer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntKind {
    Char,
    Short,
    Int,
    Long,
}

impl IntKind {
    /// Width in bits on the simulated machine.
    pub fn bits(self) -> u32 {
        match self {
            IntKind::Char => 8,
            IntKind::Short | IntKind::Int => 16,
            IntKind::Long => 32,
        }
    }
}

/// A basic (arithmetic) type such as `unsigned char` or `long`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BasicType {
    pub signedness: Signedness,
    pub kind: IntKind,
}

impl BasicType {
    pub const SIGNED_CHAR: BasicType = BasicType::new(Signedness::Signed, IntKind::Char);
    pub const UNSIGNED_CHAR: BasicType = BasicType::new(Signedness::Unsigned, IntKind::Char);
    pub const SIGNED_SHORT: BasicType = BasicType::new(Signedness::Signed, IntKind::Short);
    pub const SIGNED_INT: BasicType = BasicType::new(Signedness::Signed, IntKind::Int);
    pub const UNSIGNED_INT: BasicType = BasicType::new(Signedness::Unsigned, IntKind::Int);
    pub const SIGNED_LONG: BasicType = BasicType::new(Signedness::Signed, IntKind::Long);
    pub const UNSIGNED_LONG: BasicType = BasicType::new(Signedness::Unsigned, IntKind::Long);

    pub const fn new(signedness: Signedness, kind: IntKind) -> Self {
        BasicType { signedness, kind }
    }

    pub fn is_signed(self) -> bool {
        self.signedness == Signedness::Signed
    }

    pub fn bits(self) -> u32 {
        self.kind.bits()
    }

    /// Inclusive value range of the type.
    pub fn range(self) -> (i64, i64) {
        let bits = self.bits();
        if self.is_signed() {
            (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1)
        } else {
            (0, (1i64 << bits) - 1)
        }
    }

    /// `true` when every value of `self` is representable in `other`.
    pub fn fits_in(self, other: BasicType) -> bool {
        let (lo, hi) = self.range();
        let (other_lo, other_hi) = other.range();
        lo >= other_lo && hi <= other_hi
    }

    /// Narrows `value` to this type with two's complement wraparound.
    pub fn wrap(self, value: i64) -> i64 {
        match (self.bits(), self.signedness) {
            (8, Signedness::Signed) => value as i8 as i64,
            (8, Signedness::Unsigned) => value as u8 as i64,
            (16, Signedness::Signed) => value as i16 as i64,
            (16, Signedness::Unsigned) => value as u16 as i64,
            (_, Signedness::Signed) => value as i32 as i64,
            (_, Signedness::Unsigned) => value as u32 as i64,
        }
    }

    /// The arithmetic form this type is computed in after integer promotion.
    ///
    /// Anything narrower than `int` promotes to signed `int`.
    pub fn promoted_form(self) -> IntForm {
        match (self.bits(), self.signedness) {
            (8, _) => IntForm::Int16,
            (16, Signedness::Signed) => IntForm::Int16,
            (16, Signedness::Unsigned) => IntForm::UInt16,
            (_, Signedness::Signed) => IntForm::Int32,
            (_, Signedness::Unsigned) => IntForm::UInt32,
        }
    }
}

impl fmt::Display for BasicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_signed() {
            write!(f, "unsigned ")?;
        }
        let name = match self.kind {
            IntKind::Char => "char",
            IntKind::Short => "short",
            IntKind::Int => "int",
            IntKind::Long => "long",
        };
        write!(f, "{name}")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Arithmetic forms
// ─────────────────────────────────────────────────────────────────────────────

/// Width and signedness an arithmetic instruction operates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntForm {
    Int16,
    UInt16,
    Int32,
    UInt32,
}

impl IntForm {
    pub fn bits(self) -> u32 {
        match self {
            IntForm::Int16 | IntForm::UInt16 => 16,
            IntForm::Int32 | IntForm::UInt32 => 32,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, IntForm::Int16 | IntForm::Int32)
    }

    /// Usual arithmetic conversion of two promoted operands.
    pub fn common(a: IntForm, b: IntForm) -> IntForm {
        let bits = a.bits().max(b.bits());
        let unsigned = (a.bits() == bits && !a.is_signed()) || (b.bits() == bits && !b.is_signed());
        match (bits, unsigned) {
            (16, false) => IntForm::Int16,
            (16, true) => IntForm::UInt16,
            (_, false) => IntForm::Int32,
            (_, true) => IntForm::UInt32,
        }
    }

    /// Narrows `value` to this form with two's complement wraparound.
    pub fn wrap(self, value: i64) -> i64 {
        match self {
            IntForm::Int16 => value as i16 as i64,
            IntForm::UInt16 => value as u16 as i64,
            IntForm::Int32 => value as i32 as i64,
            IntForm::UInt32 => value as u32 as i64,
        }
    }

    /// The basic type whose values this form produces.
    pub fn basic_type(self) -> BasicType {
        match self {
            IntForm::Int16 => BasicType::SIGNED_INT,
            IntForm::UInt16 => BasicType::UNSIGNED_INT,
            IntForm::Int32 => BasicType::SIGNED_LONG,
            IntForm::UInt32 => BasicType::UNSIGNED_LONG,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CType
// ─────────────────────────────────────────────────────────────────────────────

/// A named function parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub ty: CType,
}

impl Parameter {
    pub fn new(name: impl Into<String>, ty: CType) -> Self {
        Parameter {
            name: name.into(),
            ty,
        }
    }
}

/// The signature of a function: return type plus ordered parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionType {
    pub return_type: Box<CType>,
    pub parameters: Vec<Parameter>,
}

impl FunctionType {
    pub fn new(return_type: CType, parameters: Vec<Parameter>) -> Self {
        FunctionType {
            return_type: Box::new(return_type),
            parameters,
        }
    }

    /// Value stack slots the arguments occupy; arrays are passed by value.
    pub fn parameter_slots(&self) -> usize {
        self.parameters.iter().map(|p| p.ty.num_values()).sum()
    }

    /// Number of value stack slots a call leaves behind.
    pub fn result_slots(&self) -> usize {
        self.return_type.num_values()
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.return_type)?;
        for (i, p) in self.parameters.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p.ty)?;
        }
        write!(f, ")")
    }
}

/// A static C type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CType {
    Void,
    Basic(BasicType),
    Pointer(Box<CType>),
    /// Element type and element count.
    Array(Box<CType>, usize),
    Function(FunctionType),
}

impl CType {
    pub fn int() -> CType {
        CType::Basic(BasicType::SIGNED_INT)
    }

    pub fn pointer_to(inner: CType) -> CType {
        CType::Pointer(Box::new(inner))
    }

    pub fn array_of(element: CType, len: usize) -> CType {
        CType::Array(Box::new(element), len)
    }

    /// Storage slots occupied by one value of this type.
    pub fn num_values(&self) -> usize {
        match self {
            CType::Void | CType::Function(_) => 0,
            CType::Basic(_) | CType::Pointer(_) => 1,
            CType::Array(element, len) => element.num_values() * len,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, CType::Void)
    }

    /// Scalars and plain pointers are loaded by content.
    pub fn is_scalar(&self) -> bool {
        matches!(self, CType::Basic(_) | CType::Pointer(_))
    }

    /// The function signature reachable from a function or function pointer type.
    pub fn function_type(&self) -> Option<&FunctionType> {
        match self {
            CType::Function(ft) => Some(ft),
            CType::Pointer(inner) => match inner.as_ref() {
                CType::Function(ft) => Some(ft),
                _ => None,
            },
            _ => None,
        }
    }

    /// The type a pointer or array refers to.
    pub fn pointee(&self) -> Option<&CType> {
        match self {
            CType::Pointer(inner) | CType::Array(inner, _) => Some(inner),
            _ => None,
        }
    }

    /// Arrays decay to pointers to their first element in value position.
    pub fn decayed(&self) -> CType {
        match self {
            CType::Array(element, _) => CType::Pointer(element.clone()),
            other => other.clone(),
        }
    }
}

impl fmt::Display for CType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CType::Void => write!(f, "void"),
            CType::Basic(b) => write!(f, "{b}"),
            CType::Pointer(inner) => write!(f, "{inner}*"),
            CType::Array(element, len) => write!(f, "{element}[{len}]"),
            CType::Function(ft) => write!(f, "{ft}"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
