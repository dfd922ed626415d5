//! Variable resolution.
//!
//! Given a name and the lexical context at the point of use, [`resolve`]
//! answers which storage region the name lives in ([`VariableScope`]), its
//! slot index inside that region and its declared type.
//!
//! # Lookup order
//!
//! 1. Block scopes, innermost first (and latest declaration first inside a
//!    block, so shadowing works).
//! 2. Parameters of the enclosing function.
//! 3. File-scope globals.
//! 4. The function table, so a bare function name resolves to
//!    [`VariableScope::Function`].
//!
//! Resolution is a pure lookup over declarations that were already collected;
//! it has no side effects.

use std::fmt;

use crate::bytecode::OpCode;
use crate::compiler::EmitContext;
use crate::types::{CType, FunctionType, Parameter};
use crate::value::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Scope and resolved variable
// ─────────────────────────────────────────────────────────────────────────────

/// The storage region a variable lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableScope {
    Function,
    Argument,
    Global,
    Local,
}

impl fmt::Display for VariableScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VariableScope::Function => "function",
            VariableScope::Argument => "argument",
            VariableScope::Global => "global",
            VariableScope::Local => "local",
        };
        write!(f, "{name}")
    }
}

/// The answer of [`resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVariable {
    pub ty: CType,
    pub scope: VariableScope,
    pub index: usize,
}

impl ResolvedVariable {
    /// The pointer-tagged value naming this variable's storage.
    pub fn address(&self) -> Value {
        let index = self.index as i64;
        match self.scope {
            VariableScope::Function => Value::FunctionPointer(index),
            VariableScope::Argument => Value::ArgPointer(index),
            VariableScope::Global => Value::GlobalPointer(index),
            VariableScope::Local => Value::LocalPointer(index),
        }
    }

    /// Emits code pushing this variable's address.
    pub fn emit(&self, ec: &mut EmitContext<'_>) {
        ec.emit(OpCode::LoadConstant, self.address());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Declaration tables
// ─────────────────────────────────────────────────────────────────────────────

/// A declared name bound to a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub name: String,
    pub ty: CType,
    pub index: usize,
}

/// File-scope declarations: globals and the function table.
///
/// Collected before any function body is generated.  Order is fixed at
/// declaration time and determines slot offsets and table indices.
#[derive(Debug, Clone, Default)]
pub struct Declarations {
    globals: Vec<Binding>,
    functions: Vec<Binding>,
    global_slots: usize,
}

impl Declarations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a global and returns its slot offset.
    pub fn declare_global(&mut self, name: impl Into<String>, ty: CType) -> usize {
        let index = self.global_slots;
        self.global_slots += ty.num_values();
        self.globals.push(Binding {
            name: name.into(),
            ty,
            index,
        });
        index
    }

    /// Adds a function and returns its table index.
    pub fn declare_function(&mut self, name: impl Into<String>, ty: FunctionType) -> usize {
        let index = self.functions.len();
        self.functions.push(Binding {
            name: name.into(),
            ty: CType::Function(ty),
            index,
        });
        index
    }

    pub fn globals(&self) -> &[Binding] {
        &self.globals
    }

    pub fn functions(&self) -> &[Binding] {
        &self.functions
    }

    pub fn global_slot_count(&self) -> usize {
        self.global_slots
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lexical context
// ─────────────────────────────────────────────────────────────────────────────

/// Everything visible at one point inside (or outside) a function body.
#[derive(Debug, Clone, Copy)]
pub struct LexicalContext<'a> {
    /// Open block scopes, outermost first.
    pub blocks: &'a [Vec<Binding>],
    pub parameters: &'a [Parameter],
    pub declarations: &'a Declarations,
}

impl<'a> LexicalContext<'a> {
    /// Context outside of any function (global initializers).
    pub fn file_scope(declarations: &'a Declarations) -> Self {
        LexicalContext {
            blocks: &[],
            parameters: &[],
            declarations,
        }
    }
}

/// Resolves `name` in `ctx`, or `None` when it is not declared anywhere.
pub fn resolve(name: &str, ctx: &LexicalContext<'_>) -> Option<ResolvedVariable> {
    let found = |binding: &Binding, scope| ResolvedVariable {
        ty: binding.ty.clone(),
        scope,
        index: binding.index,
    };

    for block in ctx.blocks.iter().rev() {
        if let Some(b) = block.iter().rev().find(|b| b.name == name) {
            return Some(found(b, VariableScope::Local));
        }
    }

    let mut arg_slot = 0;
    for parameter in ctx.parameters {
        if parameter.name == name {
            return Some(ResolvedVariable {
                ty: parameter.ty.clone(),
                scope: VariableScope::Argument,
                index: arg_slot,
            });
        }
        arg_slot += parameter.ty.num_values();
    }

    if let Some(b) = ctx.declarations.globals.iter().find(|b| b.name == name) {
        return Some(found(b, VariableScope::Global));
    }

    ctx.declarations
        .functions
        .iter()
        .find(|b| b.name == name)
        .map(|b| found(b, VariableScope::Function))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn local(name: &str, index: usize) -> Binding {
        Binding {
            name: name.into(),
            ty: CType::int(),
            index,
        }
    }

    fn declarations() -> Declarations {
        let mut decls = Declarations::new();
        decls.declare_global("buffer", CType::array_of(CType::int(), 4));
        decls.declare_global("count", CType::int());
        decls.declare_function("f", FunctionType::new(CType::int(), vec![]));
        decls
    }

    #[test]
    fn test_global_slots_account_for_array_size() {
        let decls = declarations();
        assert_eq!(decls.global_slot_count(), 5);
        let ctx = LexicalContext::file_scope(&decls);
        let count = resolve("count", &ctx).unwrap();
        assert_eq!(count.scope, VariableScope::Global);
        assert_eq!(count.index, 4);
    }

    #[test]
    fn test_function_name_resolves_to_function_scope() {
        let decls = declarations();
        let ctx = LexicalContext::file_scope(&decls);
        let f = resolve("f", &ctx).unwrap();
        assert_eq!(f.scope, VariableScope::Function);
        assert_eq!(f.index, 0);
        assert_eq!(f.address(), Value::FunctionPointer(0));
    }

    #[test]
    fn test_lookup_order_block_then_param_then_global() {
        let decls = declarations();
        let params = vec![Parameter::new("count", CType::int())];
        let blocks = vec![vec![local("x", 0)], vec![local("y", 1), local("x", 2)]];
        let ctx = LexicalContext {
            blocks: &blocks,
            parameters: &params,
            declarations: &decls,
        };

        let x = resolve("x", &ctx).unwrap();
        assert_eq!((x.scope, x.index), (VariableScope::Local, 2));

        let count = resolve("count", &ctx).unwrap();
        assert_eq!((count.scope, count.index), (VariableScope::Argument, 0));

        let buffer = resolve("buffer", &ctx).unwrap();
        assert_eq!(buffer.scope, VariableScope::Global);
        assert_eq!(buffer.address(), Value::GlobalPointer(0));
    }

    #[test]
    fn test_undeclared_name() {
        let decls = declarations();
        let ctx = LexicalContext::file_scope(&decls);
        assert_eq!(resolve("nope", &ctx), None);
    }

    #[test]
    fn test_argument_slots_follow_parameter_sizes() {
        let decls = declarations();
        let params = vec![
            Parameter::new("first", CType::int()),
            Parameter::new("pair", CType::array_of(CType::int(), 2)),
            Parameter::new("last", CType::int()),
        ];
        let ctx = LexicalContext {
            blocks: &[],
            parameters: &params,
            declarations: &decls,
        };
        let pair = resolve("pair", &ctx).unwrap();
        assert_eq!((pair.scope, pair.index), (VariableScope::Argument, 1));
        assert_eq!(pair.ty, CType::array_of(CType::int(), 2));
        assert_eq!(resolve("last", &ctx).unwrap().index, 3);
    }
}
