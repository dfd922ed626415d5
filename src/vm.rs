//! Execution state of the csim virtual machine.
//!
//! [`ExecutionState`] owns everything mutable during one simulated run:
//!
//! - a fixed-capacity value stack with stack pointer `sp`,
//! - the frame stack (the last frame is the *active frame*),
//! - global memory and local memory,
//! - the simulated clock (`cpu_speed` and `remaining_time`).
//!
//! The decode loop itself lives in [`CompiledFunction::step`]; this module
//! provides the stack and memory primitives it uses plus the call/return
//! mechanics that move between frames.
//!
//! # Memory model
//!
//! Local memory is a single contiguous region.  Each frame owns the slice
//! `[locals_base, locals_base + locals_len)` from `Call` until `Return`.
//! Arguments stay on the value stack below the callee's working stack, starting
//! at the frame's `args_base`.  Runtime pointers are absolute offsets into
//! their region, so the address of a local can be handed to a callee.
//!
//! [`CompiledFunction::step`]: crate::function::CompiledFunction::step

use std::rc::Rc;

use tracing::trace;

use crate::bytecode::OpCode;
use crate::function::Executable;
use crate::machine::{CostModel, MachineInfo};
use crate::value::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// What went wrong while executing one instruction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    #[error("value stack overflow")]
    StackOverflow,
    #[error("value stack underflow")]
    StackUnderflow,
    #[error("call depth exceeded the limit of {0} frames")]
    CallDepthExceeded(usize),
    #[error("cannot call `{0}`, it is not a function pointer")]
    NotAFunction(Value),
    #[error("function index {0} is not in the function table")]
    UnknownFunction(i64),
    #[error("`{function}` takes {expected} argument slots but {actual} were passed")]
    ArgumentCount {
        function: String,
        expected: usize,
        actual: usize,
    },
    #[error("`{0}` does not address a storage cell")]
    InvalidAddress(Value),
    #[error("pointer `{0}` used where an integer was expected")]
    PointerAsInteger(Value),
    #[error("cannot order `{0}` and `{1}`, they are in different address spaces")]
    IncomparablePointers(Value, Value),
    #[error("invalid operand `{1}` for {0}")]
    InvalidOperand(OpCode, Value),
    #[error("division by zero")]
    DivisionByZero,
}

/// A fatal runtime error.  Once raised the run makes no further progress.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("function `{function}` faulted at instruction {ip}: {fault}")]
    Fault {
        function: String,
        ip: usize,
        fault: Fault,
    },
    #[error("function `{function}` never returned")]
    NeverReturned { function: String },
    #[error("entry function `{0}` does not exist")]
    EntryNotFound(String),
    #[error("entry function `{0}` cannot take arguments")]
    EntryTakesArguments(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Frame states
// ─────────────────────────────────────────────────────────────────────────────

/// Where one invocation of a function's step loop stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Still decoding instructions.
    Running,
    /// A `Call` pushed a new frame; control belongs to the callee.
    AwaitingCall,
    /// A `Return` popped the frame.
    Returned,
    /// The time budget ran out; the instruction pointer was persisted.
    Suspended,
}

// ─────────────────────────────────────────────────────────────────────────────
// StackFrame
// ─────────────────────────────────────────────────────────────────────────────

/// One active call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// Index of the executing function in the function table.
    pub function: usize,
    /// Next instruction to execute.
    pub ip: usize,
    /// Value stack index of argument 0.
    pub args_base: usize,
    /// Local memory index of local slot 0.
    pub locals_base: usize,
    /// Number of local slots owned by this frame.
    pub locals_len: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// ExecutionState
// ─────────────────────────────────────────────────────────────────────────────

/// Mutable state of one simulated run.
#[derive(Debug)]
pub struct ExecutionState {
    executable: Rc<Executable>,
    stack: Vec<Value>,
    sp: usize,
    frames: Vec<StackFrame>,
    globals: Vec<Value>,
    locals: Vec<Value>,
    max_call_depth: usize,
    cost_model: CostModel,
    /// Cost units per executed instruction.
    pub cpu_speed: i64,
    /// Budget left in the current slice; the step loop stops at zero.
    pub remaining_time: i64,
}

impl ExecutionState {
    pub fn new(executable: Rc<Executable>, machine: &MachineInfo) -> Self {
        let globals = vec![Value::default(); executable.global_slot_count()];
        ExecutionState {
            executable,
            stack: vec![Value::default(); machine.stack_size],
            sp: 0,
            frames: Vec::with_capacity(machine.max_call_depth),
            globals,
            locals: Vec::new(),
            max_call_depth: machine.max_call_depth,
            cost_model: machine.cost_model.clone(),
            cpu_speed: machine.cpu_speed,
            remaining_time: 0,
        }
    }

    /// Drops every frame and clears all memory and the clock.
    pub fn reset(&mut self) {
        self.sp = 0;
        self.frames.clear();
        self.locals.clear();
        self.globals.iter_mut().for_each(|g| *g = Value::default());
        self.remaining_time = 0;
    }

    // ── Inspection ────────────────────────────────────────────────────────────

    pub fn executable(&self) -> &Rc<Executable> {
        &self.executable
    }

    /// The live part of the value stack, bottom first.
    pub fn stack(&self) -> &[Value] {
        &self.stack[..self.sp]
    }

    pub fn sp(&self) -> usize {
        self.sp
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    pub fn active_frame(&self) -> Option<&StackFrame> {
        self.frames.last()
    }

    pub fn globals(&self) -> &[Value] {
        &self.globals
    }

    /// The local slots owned by `frame`.
    pub fn frame_locals(&self, frame: &StackFrame) -> &[Value] {
        let end = (frame.locals_base + frame.locals_len).min(self.locals.len());
        &self.locals[frame.locals_base.min(end)..end]
    }

    /// Cost of executing `op` under the configured cost model.
    pub fn cost(&self, op: OpCode) -> i64 {
        self.cost_model.cost(op, self.cpu_speed)
    }

    // ── Value stack ───────────────────────────────────────────────────────────

    #[inline]
    pub fn push(&mut self, value: Value) -> Result<(), Fault> {
        let slot = self.stack.get_mut(self.sp).ok_or(Fault::StackOverflow)?;
        *slot = value;
        self.sp += 1;
        Ok(())
    }

    #[inline]
    pub fn pop(&mut self) -> Result<Value, Fault> {
        let floor = self.frames.last().map_or(0, |f| f.args_base);
        if self.sp <= floor {
            return Err(Fault::StackUnderflow);
        }
        self.sp -= 1;
        Ok(self.stack[self.sp])
    }

    #[inline]
    pub fn peek(&self) -> Result<Value, Fault> {
        let floor = self.frames.last().map_or(0, |f| f.args_base);
        if self.sp <= floor {
            return Err(Fault::StackUnderflow);
        }
        Ok(self.stack[self.sp - 1])
    }

    // ── Memory ────────────────────────────────────────────────────────────────

    /// Reads the cell an absolute pointer addresses.
    pub fn read(&self, pointer: Value) -> Result<Value, Fault> {
        let cell = match pointer {
            Value::ArgPointer(n) => usize::try_from(n)
                .ok()
                .filter(|&i| i < self.sp)
                .map(|i| self.stack[i]),
            Value::GlobalPointer(n) => usize::try_from(n).ok().and_then(|i| self.globals.get(i).copied()),
            Value::LocalPointer(n) => usize::try_from(n).ok().and_then(|i| self.locals.get(i).copied()),
            Value::Int(_) | Value::FunctionPointer(_) => None,
        };
        cell.ok_or(Fault::InvalidAddress(pointer))
    }

    /// Writes the cell an absolute pointer addresses.
    pub fn write(&mut self, pointer: Value, value: Value) -> Result<(), Fault> {
        let sp = self.sp;
        let cell = match pointer {
            Value::ArgPointer(n) => usize::try_from(n)
                .ok()
                .filter(|&i| i < sp)
                .and_then(|i| self.stack.get_mut(i)),
            Value::GlobalPointer(n) => usize::try_from(n).ok().and_then(|i| self.globals.get_mut(i)),
            Value::LocalPointer(n) => usize::try_from(n).ok().and_then(|i| self.locals.get_mut(i)),
            Value::Int(_) | Value::FunctionPointer(_) => None,
        };
        let cell = cell.ok_or(Fault::InvalidAddress(pointer))?;
        *cell = value;
        Ok(())
    }

    /// Sizes the active frame's local storage to `count` zeroed slots.
    pub fn allocate_locals(&mut self, count: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.locals_len = count;
            self.locals.truncate(frame.locals_base);
            self.locals.resize(frame.locals_base + count, Value::default());
        }
    }

    // ── Call / Return ─────────────────────────────────────────────────────────

    /// Pushes a frame for function `index` and initialises it.
    ///
    /// The `argc` topmost stack values become the callee's arguments.
    pub fn enter(&mut self, index: usize, argc: usize) -> Result<(), Fault> {
        if self.frames.len() >= self.max_call_depth {
            return Err(Fault::CallDepthExceeded(self.max_call_depth));
        }
        let executable = Rc::clone(&self.executable);
        let callee = executable
            .function(index)
            .ok_or(Fault::UnknownFunction(index as i64))?;
        let expected = callee.function_type.parameter_slots();
        if argc != expected {
            return Err(Fault::ArgumentCount {
                function: callee.name.clone(),
                expected,
                actual: argc,
            });
        }
        let floor = self.frames.last().map_or(0, |f| f.args_base);
        if self.sp < floor + argc {
            return Err(Fault::StackUnderflow);
        }

        trace!(function = %callee.name, depth = self.frames.len() + 1, "call");
        self.frames.push(StackFrame {
            function: index,
            ip: 0,
            args_base: self.sp - argc,
            locals_base: self.locals.len(),
            locals_len: 0,
        });
        callee.init(self);
        Ok(())
    }

    /// Transfers control to the function `callee` points at.
    pub fn call(&mut self, callee: Value, argc: usize) -> Result<(), Fault> {
        match callee {
            Value::FunctionPointer(n) => {
                let index = usize::try_from(n).map_err(|_| Fault::UnknownFunction(n))?;
                self.enter(index, argc)
            }
            other => Err(Fault::NotAFunction(other)),
        }
    }

    /// Pops the active frame and makes its caller active again.
    ///
    /// The callee's result slots (per its declared return type) are moved down
    /// to where its arguments started; arguments and working values are dropped
    /// and its local storage is released.
    pub fn return_to_caller(&mut self) -> Result<(), Fault> {
        let frame = self.frames.last().cloned().ok_or(Fault::StackUnderflow)?;
        let executable = Rc::clone(&self.executable);
        let function = executable
            .function(frame.function)
            .ok_or(Fault::UnknownFunction(frame.function as i64))?;
        let results = function.function_type.result_slots();
        if self.sp < frame.args_base + results {
            return Err(Fault::StackUnderflow);
        }

        let first = self.sp - results;
        self.stack.copy_within(first..self.sp, frame.args_base);
        self.sp = frame.args_base + results;
        self.locals.truncate(frame.locals_base);
        self.frames.pop();
        trace!(function = %function.name, depth = self.frames.len(), "return");
        Ok(())
    }

    pub(crate) fn frame_mut(&mut self, depth: usize) -> Option<&mut StackFrame> {
        self.frames.get_mut(depth)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Instruction;
    use crate::function::{CompiledFunction, VariableDeclaration};
    use crate::types::{CType, FunctionType, Parameter};

    fn executable() -> Rc<Executable> {
        let add = CompiledFunction::new(
            "add",
            FunctionType::new(
                CType::int(),
                vec![Parameter::new("a", CType::int()), Parameter::new("b", CType::int())],
            ),
            vec![VariableDeclaration::new("t", CType::array_of(CType::int(), 3))],
            vec![Instruction::new(OpCode::Return, 0)],
        );
        Rc::new(Executable::new(
            vec![add],
            vec![VariableDeclaration::new("g", CType::int())],
        ))
    }

    fn state(stack_size: usize) -> ExecutionState {
        let machine = MachineInfo::default().with_stack_size(stack_size);
        ExecutionState::new(executable(), &machine)
    }

    #[test]
    fn test_push_pop_bounds() {
        let mut s = state(2);
        s.push(Value::Int(1)).unwrap();
        s.push(Value::Int(2)).unwrap();
        assert_eq!(s.push(Value::Int(3)), Err(Fault::StackOverflow));
        assert_eq!(s.pop(), Ok(Value::Int(2)));
        assert_eq!(s.pop(), Ok(Value::Int(1)));
        assert_eq!(s.pop(), Err(Fault::StackUnderflow));
    }

    #[test]
    fn test_call_allocates_locals_and_return_moves_result() {
        let mut s = state(16);
        s.push(Value::Int(99)).unwrap();
        s.push(Value::Int(3)).unwrap();
        s.push(Value::Int(4)).unwrap();
        s.call(Value::FunctionPointer(0), 2).unwrap();

        let frame = s.active_frame().unwrap().clone();
        assert_eq!(frame.args_base, 1);
        assert_eq!(frame.locals_len, 3);
        assert_eq!(s.frame_locals(&frame), &[Value::Int(0); 3]);
        assert_eq!(s.read(Value::ArgPointer(2)), Ok(Value::Int(4)));

        s.push(Value::Int(7)).unwrap();
        s.return_to_caller().unwrap();
        assert!(s.active_frame().is_none());
        assert_eq!(s.stack(), &[Value::Int(99), Value::Int(7)]);
        assert_eq!(s.read(Value::LocalPointer(0)), Err(Fault::InvalidAddress(Value::LocalPointer(0))));
    }

    #[test]
    fn test_call_rejects_non_functions_and_bad_arity() {
        let mut s = state(16);
        assert_eq!(
            s.call(Value::GlobalPointer(0), 0),
            Err(Fault::NotAFunction(Value::GlobalPointer(0)))
        );
        assert_eq!(s.call(Value::FunctionPointer(5), 0), Err(Fault::UnknownFunction(5)));
        s.push(Value::Int(1)).unwrap();
        assert!(matches!(
            s.call(Value::FunctionPointer(0), 1),
            Err(Fault::ArgumentCount { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn test_call_depth_limit() {
        let machine = MachineInfo::default().with_max_call_depth(1);
        let mut s = ExecutionState::new(executable(), &machine);
        s.push(Value::Int(1)).unwrap();
        s.push(Value::Int(2)).unwrap();
        s.call(Value::FunctionPointer(0), 2).unwrap();
        s.push(Value::Int(1)).unwrap();
        s.push(Value::Int(2)).unwrap();
        assert_eq!(
            s.call(Value::FunctionPointer(0), 2),
            Err(Fault::CallDepthExceeded(1))
        );
    }

    #[test]
    fn test_global_memory_read_write() {
        let mut s = state(4);
        s.write(Value::GlobalPointer(0), Value::Int(42)).unwrap();
        assert_eq!(s.globals(), &[Value::Int(42)]);
        assert_eq!(s.read(Value::GlobalPointer(0)), Ok(Value::Int(42)));
        assert!(s.read(Value::GlobalPointer(1)).is_err());
        assert!(s.write(Value::Int(0), Value::Int(1)).is_err());
        s.reset();
        assert_eq!(s.globals(), &[Value::Int(0)]);
    }
}
