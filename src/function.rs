//! Compiled functions and the decode loop that runs them.
//!
//! A [`CompiledFunction`] is the unit of callable code the generator produces:
//! a name, a signature, the local variables it declares and its instructions.
//! It is immutable after construction and shared read-only by every frame
//! executing it.
//!
//! [`CompiledFunction::step`] runs the active frame cooperatively: it decodes
//! instructions until the time budget is spent or control crosses a
//! call/return boundary, then persists the instruction pointer and hands
//! control back to the host driver.

use tracing::debug;

use crate::bytecode::{disassemble, ArithmeticOp, Instruction, OpCode};
use crate::types::{CType, FunctionType, IntForm};
use crate::value::Value;
use crate::vm::{ExecutionError, ExecutionState, Fault, FrameState};

// ─────────────────────────────────────────────────────────────────────────────
// VariableDeclaration
// ─────────────────────────────────────────────────────────────────────────────

/// Name and type of a declared variable; sizes its storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableDeclaration {
    pub name: String,
    pub ty: CType,
}

impl VariableDeclaration {
    pub fn new(name: impl Into<String>, ty: CType) -> Self {
        VariableDeclaration {
            name: name.into(),
            ty,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CompiledFunction
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    pub name: String,
    pub function_type: FunctionType,
    locals: Vec<VariableDeclaration>,
    instructions: Vec<Instruction>,
    local_slots: usize,
}

impl CompiledFunction {
    pub fn new(
        name: impl Into<String>,
        function_type: FunctionType,
        locals: Vec<VariableDeclaration>,
        instructions: Vec<Instruction>,
    ) -> Self {
        let local_slots = locals.iter().map(|l| l.ty.num_values()).sum();
        CompiledFunction {
            name: name.into(),
            function_type,
            locals,
            instructions,
            local_slots,
        }
    }

    pub fn locals(&self) -> &[VariableDeclaration] {
        &self.locals
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Local storage slots a frame of this function needs.
    pub fn local_slot_count(&self) -> usize {
        self.local_slots
    }

    /// Assembler listing, one `index: opcode operand` line per instruction.
    pub fn assembler(&self) -> String {
        disassemble(&self.instructions)
    }

    /// Called when a frame for this function becomes active.
    pub fn init(&self, state: &mut ExecutionState) {
        state.allocate_locals(self.local_slots);
    }

    /// Runs the active frame until the budget is spent or control leaves it.
    pub fn step(&self, state: &mut ExecutionState) -> Result<FrameState, ExecutionError> {
        let depth = state.frames().len().saturating_sub(1);
        let (mut ip, args_base, locals_base) = match state.active_frame() {
            Some(frame) => (frame.ip, frame.args_base, frame.locals_base),
            None => return Ok(FrameState::Returned),
        };

        let mut frame_state = FrameState::Running;

        while frame_state == FrameState::Running
            && ip < self.instructions.len()
            && state.remaining_time > 0
        {
            let instruction = self.instructions[ip];
            let at = ip;
            match self.execute(state, instruction, &mut ip, args_base, locals_base) {
                Ok(next) => frame_state = next,
                Err(fault) => {
                    if let Some(frame) = state.frame_mut(depth) {
                        frame.ip = at;
                    }
                    return Err(ExecutionError::Fault {
                        function: self.name.clone(),
                        ip: at,
                        fault,
                    });
                }
            }
            state.remaining_time -= state.cost(instruction.op);
        }

        if frame_state != FrameState::Returned {
            if let Some(frame) = state.frame_mut(depth) {
                frame.ip = ip;
            }
        }

        if frame_state == FrameState::Running {
            if ip >= self.instructions.len() {
                return Err(ExecutionError::NeverReturned {
                    function: self.name.clone(),
                });
            }
            frame_state = FrameState::Suspended;
            debug!(function = %self.name, ip, "suspended");
        }
        Ok(frame_state)
    }

    /// Executes one instruction, advancing `ip`.
    fn execute(
        &self,
        state: &mut ExecutionState,
        instruction: Instruction,
        ip: &mut usize,
        args_base: usize,
        locals_base: usize,
    ) -> Result<FrameState, Fault> {
        let at = *ip;
        *ip += 1;
        let operand = instruction.operand;
        let slot = || instruction.index().ok_or(Fault::InvalidOperand(instruction.op, operand));
        let address = |base: usize| {
            slot().and_then(|s| {
                base.checked_add(s)
                    .and_then(|a| i64::try_from(a).ok())
                    .ok_or(Fault::InvalidOperand(instruction.op, operand))
            })
        };

        match instruction.op {
            OpCode::Dup => {
                let v = state.peek()?;
                state.push(v)?;
            }
            OpCode::Pop => {
                state.pop()?;
            }
            OpCode::Call => {
                let callee = state.pop()?;
                state.call(callee, slot()?)?;
                return Ok(FrameState::AwaitingCall);
            }
            OpCode::Return => {
                state.return_to_caller()?;
                return Ok(FrameState::Returned);
            }

            OpCode::LoadFunction => state.push(Value::FunctionPointer(operand.payload()))?,
            OpCode::LoadValue => state.push(operand)?,
            OpCode::LoadConstant => {
                let value = match operand {
                    Value::ArgPointer(n) => Value::ArgPointer(n).offset(args_base as i64)?,
                    Value::LocalPointer(n) => Value::LocalPointer(n).offset(locals_base as i64)?,
                    other => other,
                };
                state.push(value)?;
            }

            OpCode::LoadArg => {
                let v = state.read(Value::ArgPointer(address(args_base)?))?;
                state.push(v)?;
            }
            OpCode::StoreArg => {
                let v = state.pop()?;
                state.write(Value::ArgPointer(address(args_base)?), v)?;
            }
            OpCode::LoadGlobal => {
                let v = state.read(Value::GlobalPointer(address(0)?))?;
                state.push(v)?;
            }
            OpCode::StoreGlobal => {
                let v = state.pop()?;
                state.write(Value::GlobalPointer(address(0)?), v)?;
            }
            OpCode::LoadLocal => {
                let v = state.read(Value::LocalPointer(address(locals_base)?))?;
                state.push(v)?;
            }
            OpCode::StoreLocal => {
                let v = state.pop()?;
                state.write(Value::LocalPointer(address(locals_base)?), v)?;
            }
            OpCode::LoadPointer => {
                let pointer = state.pop()?;
                let v = state.read(pointer)?;
                state.push(v)?;
            }
            OpCode::LoadBlock => {
                let pointer = state.pop()?;
                for k in 0..slot()? {
                    let cell = pointer.offset(k as i64)?;
                    let v = state.read(cell)?;
                    state.push(v)?;
                }
            }
            OpCode::StorePointer => {
                let pointer = state.pop()?;
                let v = state.pop()?;
                state.write(pointer, v)?;
            }
            OpCode::OffsetPointer => {
                let delta = state.pop()?.as_int()?;
                let pointer = state.pop()?;
                let scale = operand.as_int()?;
                let delta = delta
                    .checked_mul(scale)
                    .ok_or(Fault::InvalidOperand(instruction.op, operand))?;
                state.push(pointer.offset(delta)?)?;
            }
            OpCode::PointerDifference => {
                let b = state.pop()?;
                let a = state.pop()?;
                if !a.is_pointer() || !a.same_space(b) {
                    return Err(Fault::IncomparablePointers(a, b));
                }
                let scale = operand.as_int()?;
                if scale <= 0 {
                    return Err(Fault::InvalidOperand(instruction.op, operand));
                }
                let distance = a.payload().wrapping_sub(b.payload()) / scale;
                state.push(Value::Int(IntForm::Int16.wrap(distance)))?;
            }

            OpCode::AddInt16
            | OpCode::AddUInt16
            | OpCode::AddInt32
            | OpCode::AddUInt32
            | OpCode::SubtractInt16
            | OpCode::SubtractUInt16
            | OpCode::SubtractInt32
            | OpCode::SubtractUInt32
            | OpCode::MultiplyInt16
            | OpCode::MultiplyUInt16
            | OpCode::MultiplyInt32
            | OpCode::MultiplyUInt32
            | OpCode::DivideInt16
            | OpCode::DivideUInt16
            | OpCode::DivideInt32
            | OpCode::DivideUInt32
            | OpCode::ModuloInt16
            | OpCode::ModuloUInt16
            | OpCode::ModuloInt32
            | OpCode::ModuloUInt32 => {
                let (op, form) = instruction
                    .op
                    .as_arithmetic()
                    .ok_or(Fault::InvalidOperand(instruction.op, operand))?;
                let b = form.wrap(state.pop()?.as_int()?);
                let a = form.wrap(state.pop()?.as_int()?);
                let result = match op {
                    ArithmeticOp::Add => a + b,
                    ArithmeticOp::Subtract => a - b,
                    ArithmeticOp::Multiply => a.wrapping_mul(b),
                    ArithmeticOp::Divide if b == 0 => return Err(Fault::DivisionByZero),
                    ArithmeticOp::Divide => a / b,
                    ArithmeticOp::Modulo if b == 0 => return Err(Fault::DivisionByZero),
                    ArithmeticOp::Modulo => a % b,
                };
                state.push(Value::Int(form.wrap(result)))?;
            }

            OpCode::Equal | OpCode::NotEqual => {
                let b = state.pop()?;
                let a = state.pop()?;
                let equal = a == b;
                let result = if instruction.op == OpCode::Equal { equal } else { !equal };
                state.push(Value::Int(result as i64))?;
            }
            OpCode::LessThanInt16
            | OpCode::LessThanUInt16
            | OpCode::LessThanInt32
            | OpCode::LessThanUInt32
            | OpCode::LessThanOrEqualInt16
            | OpCode::LessThanOrEqualUInt16
            | OpCode::LessThanOrEqualInt32
            | OpCode::LessThanOrEqualUInt32
            | OpCode::GreaterThanInt16
            | OpCode::GreaterThanUInt16
            | OpCode::GreaterThanInt32
            | OpCode::GreaterThanUInt32
            | OpCode::GreaterThanOrEqualInt16
            | OpCode::GreaterThanOrEqualUInt16
            | OpCode::GreaterThanOrEqualInt32
            | OpCode::GreaterThanOrEqualUInt32 => {
                let (cmp, form) = instruction
                    .op
                    .as_comparison()
                    .ok_or(Fault::InvalidOperand(instruction.op, operand))?;
                let b = state.pop()?;
                let a = state.pop()?;
                let holds = match (a, b) {
                    (Value::Int(x), Value::Int(y)) => cmp.holds(form.wrap(x), form.wrap(y)),
                    (x, y) if x.is_pointer() && x.same_space(y) => cmp.holds(x.payload(), y.payload()),
                    (x, y) => return Err(Fault::IncomparablePointers(x, y)),
                };
                state.push(Value::Int(holds as i64))?;
            }
            OpCode::LogicalNot => {
                let v = state.pop()?;
                state.push(Value::Int(!v.is_truthy() as i64))?;
            }

            OpCode::ConvertInt8
            | OpCode::ConvertUInt8
            | OpCode::ConvertInt16
            | OpCode::ConvertUInt16
            | OpCode::ConvertInt32
            | OpCode::ConvertUInt32 => {
                let target = instruction
                    .op
                    .as_conversion()
                    .ok_or(Fault::InvalidOperand(instruction.op, operand))?;
                let v = match state.pop()? {
                    Value::Int(n) => Value::Int(target.wrap(n)),
                    pointer => pointer,
                };
                state.push(v)?;
            }

            OpCode::Jump => *ip = self.branch_target(at, instruction)?,
            OpCode::BranchIfFalse => {
                if !state.pop()?.is_truthy() {
                    *ip = self.branch_target(at, instruction)?;
                }
            }
            OpCode::BranchIfTrue => {
                if state.pop()?.is_truthy() {
                    *ip = self.branch_target(at, instruction)?;
                }
            }
        }

        Ok(FrameState::Running)
    }

    /// Absolute target of a relative branch at `at`.
    fn branch_target(&self, at: usize, instruction: Instruction) -> Result<usize, Fault> {
        let offset = instruction.operand.as_int()?;
        (at as i64)
            .checked_add(offset)
            .and_then(|target| usize::try_from(target).ok())
            .filter(|&target| target <= self.instructions.len())
            .ok_or(Fault::InvalidOperand(instruction.op, instruction.operand))
    }
}

impl std::fmt::Display for CompiledFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Executable
// ─────────────────────────────────────────────────────────────────────────────

/// All compiled functions of one program plus its global declarations.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Executable {
    functions: Vec<CompiledFunction>,
    globals: Vec<VariableDeclaration>,
    global_slots: Vec<usize>,
}

impl Executable {
    pub fn new(functions: Vec<CompiledFunction>, globals: Vec<VariableDeclaration>) -> Self {
        let mut offset = 0;
        let global_slots = globals
            .iter()
            .map(|g| {
                let slot = offset;
                offset += g.ty.num_values();
                slot
            })
            .collect();
        Executable {
            functions,
            globals,
            global_slots,
        }
    }

    pub fn functions(&self) -> &[CompiledFunction] {
        &self.functions
    }

    pub fn function(&self, index: usize) -> Option<&CompiledFunction> {
        self.functions.get(index)
    }

    pub fn function_index(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name == name)
    }

    pub fn function_named(&self, name: &str) -> Option<&CompiledFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn globals(&self) -> &[VariableDeclaration] {
        &self.globals
    }

    /// Slot offset of the global called `name`.
    pub fn global_slot(&self, name: &str) -> Option<usize> {
        self.globals
            .iter()
            .position(|g| g.name == name)
            .map(|i| self.global_slots[i])
    }

    pub fn global_slot_count(&self) -> usize {
        self.globals.iter().map(|g| g.ty.num_values()).sum()
    }

    /// Assembler listing of every function.
    pub fn assembler(&self) -> String {
        let mut out = String::new();
        for function in &self.functions {
            out.push_str(&format!("{}:\n{}", function.name, function.assembler()));
        }
        out
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
