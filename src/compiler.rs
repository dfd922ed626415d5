//! Code generator: lowers the typed tree to bytecode.
//!
//! One [`EmitContext`] is created per function.  It walks the function body
//! once and appends [`Instruction`]s, asking the [`resolver`](crate::resolver)
//! where every name lives.  The result is a [`CompiledFunction`]; [`compile`]
//! drives this over a whole [`TranslationUnit`] and assembles the
//! [`Executable`].
//!
//! # Emission modes
//!
//! Every expression can be emitted in *value* mode (push what it evaluates
//! to) and addressable expressions also in *address* mode (push a
//! pointer-tagged value naming its storage).  For a variable, the scope picks
//! the opcode family and the static type picks whether that opcode loads the
//! content or the address.
//!
//! # Errors
//!
//! User errors are reported to the [`Report`] and replaced by a placeholder
//! with the same stack effect, so generation always runs to the end.  An
//! [`EmitError`] is reserved for tree shapes the generator cannot lower at all.
//!
//! # File-scope initializers
//!
//! Global initializers are compiled into a synthetic [`INIT_FUNCTION`] that
//! is appended to the function table.

use tracing::debug;

use crate::ast::{
    BinaryOperator, Expression, FunctionDefinition, GlobalDeclaration, Statement, TranslationUnit,
    UnaryOperator,
};
use crate::bytecode::{ArithmeticOp, ComparisonOp, Instruction, OpCode};
use crate::diagnostics::{codes, Report};
use crate::function::{CompiledFunction, Executable, VariableDeclaration};
use crate::resolver::{resolve, Binding, Declarations, LexicalContext, ResolvedVariable, VariableScope};
use crate::types::{BasicType, CType, FunctionType, IntForm, Parameter};
use crate::value::Value;

/// Name of the synthetic function holding global initializers.
pub const INIT_FUNCTION: &str = "__cinit";

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// A tree the generator cannot lower.
///
/// These point at a mismatch between the type checker and the generator, not
/// at a mistake in the user program.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmitError {
    #[error("variable `{name}` of type `{ty}` cannot be used as a value")]
    UnsupportedVariableType { name: String, ty: CType },
}

// ─────────────────────────────────────────────────────────────────────────────
// Loop context (for break / continue patching)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct LoopCtx {
    /// Jumps to patch to the loop exit.
    break_patches: Vec<usize>,
    /// Jumps to patch to the point where the next iteration starts.
    continue_patches: Vec<usize>,
}

// ─────────────────────────────────────────────────────────────────────────────
// EmitContext
// ─────────────────────────────────────────────────────────────────────────────

/// Code generation state for one function body.
pub struct EmitContext<'a> {
    declarations: &'a Declarations,
    report: &'a mut Report,
    parameters: Vec<Parameter>,
    return_type: CType,
    /// Open block scopes, outermost first.
    blocks: Vec<Vec<Binding>>,
    locals: Vec<VariableDeclaration>,
    next_local_slot: usize,
    instructions: Vec<Instruction>,
    loops: Vec<LoopCtx>,
}

impl<'a> EmitContext<'a> {
    /// A context at file scope: no parameters, no blocks, `void` result.
    pub fn new(declarations: &'a Declarations, report: &'a mut Report) -> Self {
        EmitContext {
            declarations,
            report,
            parameters: Vec::new(),
            return_type: CType::Void,
            blocks: Vec::new(),
            locals: Vec::new(),
            next_local_slot: 0,
            instructions: Vec::new(),
            loops: Vec::new(),
        }
    }

    /// A context for the body of a function with signature `ty`.
    pub fn for_function(declarations: &'a Declarations, report: &'a mut Report, ty: &FunctionType) -> Self {
        let mut ec = EmitContext::new(declarations, report);
        ec.parameters = ty.parameters.clone();
        ec.return_type = (*ty.return_type).clone();
        ec.blocks.push(Vec::new());
        ec
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Consumes the context and builds the finished function.
    pub fn finish(self, name: impl Into<String>, ty: FunctionType) -> CompiledFunction {
        CompiledFunction::new(name, ty, self.locals, self.instructions)
    }

    // ── Emit helpers ──────────────────────────────────────────────────────────

    pub fn emit(&mut self, op: OpCode, operand: impl Into<Value>) {
        self.instructions.push(Instruction::new(op, operand));
    }

    /// Emits a forward branch with an unpatched offset and returns its index.
    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit(op, 0);
        self.instructions.len() - 1
    }

    /// Points the branch at `at` to the next instruction to be emitted.
    fn patch_jump(&mut self, at: usize) {
        let target = self.instructions.len();
        self.patch_jump_to(at, target);
    }

    fn patch_jump_to(&mut self, at: usize, target: usize) {
        self.instructions[at].operand = Value::Int(target as i64 - at as i64);
    }

    /// Emits a backward jump to `target`.
    fn emit_loop(&mut self, target: usize) {
        let at = self.instructions.len();
        self.emit(OpCode::Jump, target as i64 - at as i64);
    }

    /// Pushes a zero standing in for an expression that could not be lowered.
    fn emit_placeholder(&mut self, ty: &CType) {
        if pushes_value(ty) {
            self.emit(OpCode::LoadConstant, 0);
        }
    }

    fn error(&mut self, code: u32, message: impl Into<String>) {
        self.report.error(code, message);
    }

    // ── Name resolution ───────────────────────────────────────────────────────

    pub fn resolve_variable(&self, name: &str) -> Option<ResolvedVariable> {
        let ctx = LexicalContext {
            blocks: &self.blocks,
            parameters: &self.parameters,
            declarations: self.declarations,
        };
        resolve(name, &ctx)
    }

    /// Declares a local in the innermost block and returns its slot offset.
    fn declare_local(&mut self, name: &str, ty: &CType) -> Option<usize> {
        let block = self.blocks.last_mut()?;
        if block.iter().any(|b| b.name == name) {
            return None;
        }
        let index = self.next_local_slot;
        self.next_local_slot += ty.num_values();
        block.push(Binding {
            name: name.to_string(),
            ty: ty.clone(),
            index,
        });
        self.locals.push(VariableDeclaration::new(name, ty.clone()));
        Some(index)
    }

    // ── Static types ──────────────────────────────────────────────────────────

    /// The static type `expr` evaluates to.
    pub fn evaluated_type(&self, expr: &Expression) -> CType {
        match expr {
            Expression::Constant { ty, .. } => ty.clone(),
            Expression::Variable(name) => self
                .resolve_variable(name)
                .map(|v| v.ty)
                .unwrap_or_else(CType::int),
            Expression::Unary { op, operand } => match (op, self.evaluated_type(operand)) {
                (UnaryOperator::Negate, CType::Basic(b)) => CType::Basic(b.promoted_form().basic_type()),
                _ => CType::int(),
            },
            Expression::Binary { op, left, right } => {
                if op.is_boolean() {
                    return CType::int();
                }
                let l = self.evaluated_type(left).decayed();
                let r = self.evaluated_type(right).decayed();
                match (l, r) {
                    (l @ CType::Pointer(_), CType::Basic(_)) => l,
                    (CType::Basic(_), r @ CType::Pointer(_)) => r,
                    (CType::Basic(a), CType::Basic(b)) => CType::Basic(operand_form(a, b).basic_type()),
                    _ => CType::int(),
                }
            }
            Expression::Assign { target, .. } => self.evaluated_type(target),
            Expression::AddressOf(operand) => CType::pointer_to(self.evaluated_type(operand)),
            Expression::Dereference(operand) | Expression::Index { array: operand, .. } => {
                match self.evaluated_type(operand).decayed() {
                    CType::Pointer(inner) => *inner,
                    _ => CType::int(),
                }
            }
            Expression::Call { function, .. } => self
                .evaluated_type(function)
                .function_type()
                .map(|ft| (*ft.return_type).clone())
                .unwrap_or_else(CType::int),
            Expression::Cast { ty, .. } => ty.clone(),
        }
    }

    // ── Value emission ────────────────────────────────────────────────────────

    /// Emits code pushing the value of `expr`.
    pub fn emit_value(&mut self, expr: &Expression) -> Result<(), EmitError> {
        match expr {
            Expression::Constant { value, ty } => {
                let value = match ty {
                    CType::Basic(b) => b.wrap(*value),
                    _ => *value,
                };
                self.emit(OpCode::LoadValue, value);
            }
            Expression::Variable(name) => self.emit_variable(name)?,
            Expression::Unary { op, operand } => match op {
                UnaryOperator::Negate => {
                    let form = match self.evaluated_type(operand) {
                        CType::Basic(b) => b.promoted_form(),
                        _ => IntForm::Int16,
                    };
                    self.emit(OpCode::LoadValue, 0);
                    self.emit_operand(operand, form)?;
                    self.emit(OpCode::arithmetic(ArithmeticOp::Subtract, form), 0);
                }
                UnaryOperator::Not => {
                    self.emit_value(operand)?;
                    self.emit(OpCode::LogicalNot, 0);
                }
            },
            Expression::Binary { op, left, right } => self.emit_binary(*op, left, right)?,
            Expression::Assign { target, value } => self.emit_assign(target, value)?,
            Expression::AddressOf(operand) => self.emit_address(operand)?,
            Expression::Dereference(operand) => {
                self.emit_value(operand)?;
                if loads_content(&self.evaluated_type(expr)) {
                    self.emit(OpCode::LoadPointer, 0);
                }
            }
            Expression::Index { .. } => {
                self.emit_address(expr)?;
                if loads_content(&self.evaluated_type(expr)) {
                    self.emit(OpCode::LoadPointer, 0);
                }
            }
            Expression::Call { function, arguments } => self.emit_call(expr, function, arguments)?,
            Expression::Cast { ty, operand } => {
                let from = self.evaluated_type(operand);
                self.emit_value(operand)?;
                match (&from, ty) {
                    (_, CType::Void) if pushes_value(&from) => self.emit(OpCode::Pop, 0),
                    (CType::Basic(f), CType::Basic(t)) if !f.fits_in(*t) => {
                        self.emit(OpCode::conversion(*t), 0)
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Value emission of a variable reference.
    fn emit_variable(&mut self, name: &str) -> Result<(), EmitError> {
        let Some(var) = self.resolve_variable(name) else {
            self.error(codes::UNDECLARED_NAME, format!("the name `{name}` does not exist in the current context"));
            self.emit(OpCode::LoadConstant, 0);
            return Ok(());
        };

        if var.scope == VariableScope::Function {
            var.emit(self);
            return Ok(());
        }

        match &var.ty {
            CType::Basic(_) | CType::Pointer(_) => {
                let op = match var.scope {
                    VariableScope::Argument => OpCode::LoadArg,
                    VariableScope::Global => OpCode::LoadGlobal,
                    VariableScope::Local | VariableScope::Function => OpCode::LoadLocal,
                };
                self.emit(op, var.index as i64);
            }
            CType::Array(..) => var.emit(self),
            ty @ (CType::Void | CType::Function(_)) => {
                return Err(EmitError::UnsupportedVariableType {
                    name: name.to_string(),
                    ty: ty.clone(),
                })
            }
        }
        Ok(())
    }

    /// Emits `expr` converted to `target` where a basic value may not fit.
    fn emit_converted(&mut self, expr: &Expression, target: &CType) -> Result<(), EmitError> {
        let from = self.evaluated_type(expr);
        self.emit_value(expr)?;
        if let (CType::Basic(f), CType::Basic(t)) = (&from, target) {
            if !f.fits_in(*t) {
                self.emit(OpCode::conversion(*t), 0);
            }
        }
        Ok(())
    }

    fn emit_operand(&mut self, expr: &Expression, form: IntForm) -> Result<(), EmitError> {
        self.emit_converted(expr, &CType::Basic(form.basic_type()))
    }

    fn emit_binary(&mut self, op: BinaryOperator, left: &Expression, right: &Expression) -> Result<(), EmitError> {
        let l = self.evaluated_type(left).decayed();
        let r = self.evaluated_type(right).decayed();
        let form = match (&l, &r) {
            (CType::Basic(a), CType::Basic(b)) => Some(operand_form(*a, *b)),
            _ => None,
        };
        let Some(opcode) = binary_opcode(op, form.unwrap_or(IntForm::Int16)) else {
            return self.emit_logical(op, left, right);
        };

        if matches!(op, BinaryOperator::Add | BinaryOperator::Subtract) {
            match (&l, &r) {
                (CType::Pointer(element), CType::Basic(_)) => {
                    let scale = element.num_values().max(1) as i64;
                    self.emit_value(left)?;
                    self.emit_operand(right, IntForm::Int16)?;
                    let scale = if op == BinaryOperator::Subtract { -scale } else { scale };
                    self.emit(OpCode::OffsetPointer, scale);
                    return Ok(());
                }
                (CType::Basic(_), CType::Pointer(element)) if op == BinaryOperator::Add => {
                    let scale = element.num_values().max(1) as i64;
                    self.emit_value(right)?;
                    self.emit_operand(left, IntForm::Int16)?;
                    self.emit(OpCode::OffsetPointer, scale);
                    return Ok(());
                }
                (CType::Pointer(element), CType::Pointer(_)) if op == BinaryOperator::Subtract => {
                    let scale = element.num_values().max(1) as i64;
                    self.emit_value(left)?;
                    self.emit_value(right)?;
                    self.emit(OpCode::PointerDifference, scale);
                    return Ok(());
                }
                _ => {}
            }
        }

        match form {
            Some(form) => {
                self.emit_operand(left, form)?;
                self.emit_operand(right, form)?;
            }
            None => {
                self.emit_value(left)?;
                self.emit_value(right)?;
            }
        }
        self.emit(opcode, 0);
        Ok(())
    }

    /// Short-circuit `&&` / `||`, yielding 0 or 1.
    fn emit_logical(&mut self, op: BinaryOperator, left: &Expression, right: &Expression) -> Result<(), EmitError> {
        let (branch, short, full) = if op == BinaryOperator::LogicalAnd {
            (OpCode::BranchIfFalse, 0, 1)
        } else {
            (OpCode::BranchIfTrue, 1, 0)
        };

        self.emit_value(left)?;
        let first = self.emit_jump(branch);
        self.emit_value(right)?;
        let second = self.emit_jump(branch);
        self.emit(OpCode::LoadValue, full);
        let end = self.emit_jump(OpCode::Jump);
        self.patch_jump(first);
        self.patch_jump(second);
        self.emit(OpCode::LoadValue, short);
        self.patch_jump(end);
        Ok(())
    }

    fn emit_assign(&mut self, target: &Expression, value: &Expression) -> Result<(), EmitError> {
        let target_ty = self.evaluated_type(target);
        match target {
            Expression::Variable(name) => {
                let Some(var) = self.resolve_variable(name) else {
                    self.error(codes::UNDECLARED_NAME, format!("the name `{name}` does not exist in the current context"));
                    self.emit_discarded(value)?;
                    self.emit_placeholder(&target_ty);
                    return Ok(());
                };
                let store = match (var.scope, var.ty.is_scalar()) {
                    (VariableScope::Argument, true) => OpCode::StoreArg,
                    (VariableScope::Global, true) => OpCode::StoreGlobal,
                    (VariableScope::Local, true) => OpCode::StoreLocal,
                    _ => {
                        self.error(codes::NOT_ASSIGNABLE, format!("cannot assign to `{name}` of type `{}`", var.ty));
                        self.emit_discarded(value)?;
                        self.emit_placeholder(&target_ty);
                        return Ok(());
                    }
                };
                self.emit_converted(value, &var.ty)?;
                self.emit(OpCode::Dup, 0);
                self.emit(store, var.index as i64);
            }
            Expression::Dereference(_) | Expression::Index { .. } if loads_content(&target_ty) => {
                self.emit_converted(value, &target_ty)?;
                self.emit(OpCode::Dup, 0);
                self.emit_address(target)?;
                self.emit(OpCode::StorePointer, 0);
            }
            _ => {
                self.error(codes::NOT_ASSIGNABLE, "the left-hand side of an assignment must be a variable or a dereference");
                self.emit_discarded(value)?;
                self.emit_placeholder(&target_ty);
            }
        }
        Ok(())
    }

    /// Emits `expr` for its side effects and diagnostics only.
    fn emit_discarded(&mut self, expr: &Expression) -> Result<(), EmitError> {
        let ty = self.evaluated_type(expr);
        self.emit_value(expr)?;
        if pushes_value(&ty) {
            self.emit(OpCode::Pop, 0);
        }
        Ok(())
    }

    fn emit_call(&mut self, call: &Expression, function: &Expression, arguments: &[Expression]) -> Result<(), EmitError> {
        let result_ty = self.evaluated_type(call);
        let callee_ty = self.evaluated_type(function);
        let Some(ft) = callee_ty.function_type().cloned() else {
            self.error(codes::NOT_CALLABLE, format!("an expression of type `{callee_ty}` cannot be called"));
            for argument in arguments {
                self.emit_discarded(argument)?;
            }
            self.emit_placeholder(&result_ty);
            return Ok(());
        };
        if ft.parameters.len() != arguments.len() {
            self.error(
                codes::ARGUMENT_COUNT,
                format!(
                    "function of type `{ft}` takes {} arguments but {} were supplied",
                    ft.parameters.len(),
                    arguments.len()
                ),
            );
            for argument in arguments {
                self.emit_discarded(argument)?;
            }
            self.emit_placeholder(&result_ty);
            return Ok(());
        }

        for (argument, parameter) in arguments.iter().zip(&ft.parameters) {
            match &parameter.ty {
                CType::Array(..) => {
                    self.emit_value(argument)?;
                    self.emit(OpCode::LoadBlock, parameter.ty.num_values() as i64);
                }
                ty => self.emit_converted(argument, ty)?,
            }
        }
        self.emit_value(function)?;
        self.emit(OpCode::Call, ft.parameter_slots() as i64);
        Ok(())
    }

    // ── Address emission ──────────────────────────────────────────────────────

    /// Emits code pushing a pointer to the storage of `expr`.
    pub fn emit_address(&mut self, expr: &Expression) -> Result<(), EmitError> {
        match expr {
            Expression::Variable(name) => match self.resolve_variable(name) {
                Some(var) => var.emit(self),
                None => {
                    self.error(codes::UNDECLARED_NAME, format!("the name `{name}` does not exist in the current context"));
                    self.emit(OpCode::LoadConstant, 0);
                }
            },
            Expression::Dereference(operand) => self.emit_value(operand)?,
            Expression::Index { array, index } => {
                let scale = match self.evaluated_type(array).decayed() {
                    CType::Pointer(element) => element.num_values().max(1) as i64,
                    _ => 1,
                };
                self.emit_value(array)?;
                self.emit_operand(index, IntForm::Int16)?;
                self.emit(OpCode::OffsetPointer, scale);
            }
            _ => {
                self.error(codes::NOT_ADDRESSABLE, "cannot take the address of an expression without storage");
                self.emit(OpCode::LoadConstant, 0);
            }
        }
        Ok(())
    }

    // ── Statements ────────────────────────────────────────────────────────────

    pub fn emit_statement(&mut self, stmt: &Statement) -> Result<(), EmitError> {
        match stmt {
            Statement::Expression(expr) => self.emit_discarded(expr)?,
            Statement::Declaration { name, ty, initializer } => {
                let Some(slot) = self.declare_local(name, ty) else {
                    self.error(codes::DUPLICATE_LOCAL, format!("a local variable named `{name}` is already defined in this scope"));
                    return Ok(());
                };
                match (initializer, ty) {
                    (None, _) => {}
                    (Some(_), CType::Array(..)) => {
                        self.error(codes::CANNOT_CONVERT, format!("cannot initialize array `{name}` of type `{ty}`"));
                    }
                    (Some(init), _) => {
                        self.emit_converted(init, ty)?;
                        self.emit(OpCode::StoreLocal, slot as i64);
                    }
                }
            }
            Statement::Block(stmts) => {
                self.blocks.push(Vec::new());
                let result = stmts.iter().try_for_each(|s| self.emit_statement(s));
                self.blocks.pop();
                result?;
            }
            Statement::If { condition, then_branch, else_branch } => {
                self.emit_value(condition)?;
                let else_jump = self.emit_jump(OpCode::BranchIfFalse);
                self.emit_statement(then_branch)?;
                match else_branch {
                    Some(else_branch) => {
                        let end_jump = self.emit_jump(OpCode::Jump);
                        self.patch_jump(else_jump);
                        self.emit_statement(else_branch)?;
                        self.patch_jump(end_jump);
                    }
                    None => self.patch_jump(else_jump),
                }
            }
            Statement::While { condition, body } => {
                let loop_start = self.instructions.len();
                self.emit_value(condition)?;
                let exit_jump = self.emit_jump(OpCode::BranchIfFalse);
                self.loops.push(LoopCtx::default());
                self.emit_statement(body)?;
                self.emit_loop(loop_start);
                self.patch_jump(exit_jump);
                self.end_loop(loop_start);
            }
            Statement::For { init, condition, next, body } => {
                self.blocks.push(Vec::new());
                let result = self.emit_for(init.as_deref(), condition.as_ref(), next.as_ref(), body);
                self.blocks.pop();
                result?;
            }
            Statement::Break | Statement::Continue => {
                let is_break = matches!(stmt, Statement::Break);
                if self.loops.is_empty() {
                    let keyword = if is_break { "break" } else { "continue" };
                    self.error(codes::NO_ENCLOSING_LOOP, format!("no enclosing loop out of which to {keyword}"));
                    return Ok(());
                }
                let patch = self.emit_jump(OpCode::Jump);
                if let Some(ctx) = self.loops.last_mut() {
                    if is_break {
                        ctx.break_patches.push(patch);
                    } else {
                        ctx.continue_patches.push(patch);
                    }
                }
            }
            Statement::Return(value) => self.emit_return(value.as_ref())?,
        }
        Ok(())
    }

    fn emit_for(
        &mut self,
        init: Option<&Statement>,
        condition: Option<&Expression>,
        next: Option<&Expression>,
        body: &Statement,
    ) -> Result<(), EmitError> {
        if let Some(init) = init {
            self.emit_statement(init)?;
        }
        let loop_start = self.instructions.len();
        let exit_jump = match condition {
            Some(condition) => {
                self.emit_value(condition)?;
                Some(self.emit_jump(OpCode::BranchIfFalse))
            }
            None => None,
        };
        self.loops.push(LoopCtx::default());
        self.emit_statement(body)?;
        let continue_target = self.instructions.len();
        if let Some(next) = next {
            self.emit_statement(&Statement::Expression(next.clone()))?;
        }
        self.emit_loop(loop_start);
        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
        }
        self.end_loop(continue_target);
        Ok(())
    }

    /// Pops the innermost loop and patches its `break`s and `continue`s.
    fn end_loop(&mut self, continue_target: usize) {
        let Some(ctx) = self.loops.pop() else { return };
        for patch in ctx.break_patches {
            self.patch_jump(patch);
        }
        for patch in ctx.continue_patches {
            self.patch_jump_to(patch, continue_target);
        }
    }

    fn emit_return(&mut self, value: Option<&Expression>) -> Result<(), EmitError> {
        let return_type = self.return_type.clone();
        match (value, return_type.is_void()) {
            (Some(value), false) => self.emit_converted(value, &return_type)?,
            (None, false) => {
                self.error(codes::MISSING_RETURN_VALUE, format!("a value of type `{return_type}` must be returned"));
                self.emit_placeholder(&return_type);
            }
            (Some(_), true) => {
                self.error(codes::UNEXPECTED_RETURN_VALUE, "a function returning void cannot return a value");
            }
            (None, true) => {}
        }
        self.emit(OpCode::Return, 0);
        Ok(())
    }

    /// Lowers a file-scope initializer into a store to its global slot.
    fn emit_global_initializer(&mut self, global: &GlobalDeclaration, slot: usize) -> Result<(), EmitError> {
        let Some(init) = &global.initializer else {
            return Ok(());
        };
        if let CType::Array(..) = global.ty {
            self.error(codes::CANNOT_CONVERT, format!("cannot initialize array `{}` of type `{}`", global.name, global.ty));
            return Ok(());
        }
        self.emit_converted(init, &global.ty)?;
        self.emit(OpCode::StoreGlobal, slot as i64);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// `true` when value emission of an expression of type `ty` pushes one cell.
fn pushes_value(ty: &CType) -> bool {
    !ty.is_void()
}

/// Scalars are read through a pointer; arrays and functions are their address.
fn loads_content(ty: &CType) -> bool {
    ty.is_scalar()
}

/// The instruction computing `op` in `form`; `None` for the short-circuit operators.
fn binary_opcode(op: BinaryOperator, form: IntForm) -> Option<OpCode> {
    let opcode = match op {
        BinaryOperator::Add => OpCode::arithmetic(ArithmeticOp::Add, form),
        BinaryOperator::Subtract => OpCode::arithmetic(ArithmeticOp::Subtract, form),
        BinaryOperator::Multiply => OpCode::arithmetic(ArithmeticOp::Multiply, form),
        BinaryOperator::Divide => OpCode::arithmetic(ArithmeticOp::Divide, form),
        BinaryOperator::Modulo => OpCode::arithmetic(ArithmeticOp::Modulo, form),
        BinaryOperator::Equal => OpCode::Equal,
        BinaryOperator::NotEqual => OpCode::NotEqual,
        BinaryOperator::LessThan => OpCode::comparison(ComparisonOp::LessThan, form),
        BinaryOperator::LessThanOrEqual => OpCode::comparison(ComparisonOp::LessThanOrEqual, form),
        BinaryOperator::GreaterThan => OpCode::comparison(ComparisonOp::GreaterThan, form),
        BinaryOperator::GreaterThanOrEqual => OpCode::comparison(ComparisonOp::GreaterThanOrEqual, form),
        BinaryOperator::LogicalAnd | BinaryOperator::LogicalOr => return None,
    };
    Some(opcode)
}

/// The form a binary arithmetic operation over `a` and `b` is computed in.
fn operand_form(a: BasicType, b: BasicType) -> IntForm {
    IntForm::common(a.promoted_form(), b.promoted_form())
}

// ─────────────────────────────────────────────────────────────────────────────
// Translation unit
// ─────────────────────────────────────────────────────────────────────────────

fn compile_function(
    declarations: &Declarations,
    report: &mut Report,
    function: &FunctionDefinition,
) -> Result<CompiledFunction, EmitError> {
    let mut ec = EmitContext::for_function(declarations, report, &function.ty);
    for stmt in &function.body {
        ec.emit_statement(stmt)?;
    }
    if function.ty.return_type.is_void() {
        ec.emit(OpCode::Return, 0);
    }
    let compiled = ec.finish(function.name.clone(), function.ty.clone());
    debug!(
        function = %compiled.name,
        instructions = compiled.instructions().len(),
        local_slots = compiled.local_slot_count(),
        "compiled function"
    );
    Ok(compiled)
}

/// Compiles every function and global initializer of `unit`.
///
/// User errors land in `report`; the returned executable is only meaningful
/// when `report` has no errors.
pub fn compile(unit: &TranslationUnit, report: &mut Report) -> Result<Executable, EmitError> {
    let mut declarations = Declarations::new();
    let global_slots: Vec<usize> = unit
        .globals
        .iter()
        .map(|g| declarations.declare_global(g.name.clone(), g.ty.clone()))
        .collect();
    for function in &unit.functions {
        declarations.declare_function(function.name.clone(), function.ty.clone());
    }
    let has_initializers = unit.globals.iter().any(|g| g.initializer.is_some());
    let init_type = FunctionType::new(CType::Void, vec![]);
    if has_initializers {
        declarations.declare_function(INIT_FUNCTION, init_type.clone());
    }

    let mut functions = unit
        .functions
        .iter()
        .map(|f| compile_function(&declarations, report, f))
        .collect::<Result<Vec<_>, _>>()?;

    if has_initializers {
        let mut ec = EmitContext::new(&declarations, report);
        for (global, slot) in unit.globals.iter().zip(&global_slots) {
            ec.emit_global_initializer(global, *slot)?;
        }
        ec.emit(OpCode::Return, 0);
        functions.push(ec.finish(INIT_FUNCTION, init_type));
    }

    let globals = unit
        .globals
        .iter()
        .map(|g| VariableDeclaration::new(g.name.clone(), g.ty.clone()))
        .collect();
    debug!(functions = functions.len(), errors = report.diagnostics().len(), "compiled translation unit");
    Ok(Executable::new(functions, globals))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
