//! Host driver for the virtual machine.
//!
//! An [`Interpreter`] owns one [`ExecutionState`] and runs it in bounded time
//! slices.  The host calls [`Interpreter::reset`] with an entry function and
//! then [`Interpreter::step`] as often as it likes; every call spends at most
//! one `time_slice` worth of simulated CPU time and returns.  Between slices
//! the host may inspect globals, the value stack and every frame's locals.
//!
//! The last instruction of a slice may overshoot the budget.  The overshoot
//! is carried into the next slice as debt, so splitting a budget into several
//! slices executes exactly the same instructions as spending it at once.

use std::rc::Rc;

use tracing::{debug, error};

use crate::compiler::INIT_FUNCTION;
use crate::function::Executable;
use crate::machine::MachineInfo;
use crate::value::Value;
use crate::vm::{ExecutionError, ExecutionState, Fault, FrameState, StackFrame};

/// Outcome of one slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// The budget ran out; call `step` again to continue.
    Suspended,
    /// No frame is left.
    Finished,
}

#[derive(Debug)]
pub struct Interpreter {
    executable: Rc<Executable>,
    machine: MachineInfo,
    state: ExecutionState,
    fault: Option<ExecutionError>,
}

impl Interpreter {
    pub fn new(executable: Executable, machine: MachineInfo) -> Self {
        let executable = Rc::new(executable);
        let state = ExecutionState::new(Rc::clone(&executable), &machine);
        Interpreter {
            executable,
            machine,
            state,
            fault: None,
        }
    }

    /// Clears all memory and prepares a call of `entry`.
    ///
    /// When the program has global initializers they run first, before the
    /// entry function's first instruction.
    pub fn reset(&mut self, entry: &str) -> Result<(), ExecutionError> {
        self.state.reset();
        self.fault = None;

        let index = self
            .executable
            .function_index(entry)
            .ok_or_else(|| ExecutionError::EntryNotFound(entry.to_string()))?;
        if !self.executable.functions()[index].function_type.parameters.is_empty() {
            return Err(ExecutionError::EntryTakesArguments(entry.to_string()));
        }
        self.enter(index)?;

        if let Some(init) = self.executable.function_index(INIT_FUNCTION) {
            if init != index {
                self.enter(init)?;
            }
        }
        debug!(entry, cpu_speed = self.state.cpu_speed, "reset");
        Ok(())
    }

    fn enter(&mut self, index: usize) -> Result<(), ExecutionError> {
        self.state.enter(index, 0).map_err(|fault| ExecutionError::Fault {
            function: self.executable.functions()[index].name.clone(),
            ip: 0,
            fault,
        })
    }

    /// Runs one slice of `time_slice` cost units.
    pub fn step(&mut self) -> Result<RunState, ExecutionError> {
        self.step_for(self.machine.time_slice)
    }

    /// Runs one slice of `budget` cost units.
    ///
    /// After a fault every further call returns the same fault.
    pub fn step_for(&mut self, budget: i64) -> Result<RunState, ExecutionError> {
        if let Some(fault) = &self.fault {
            return Err(fault.clone());
        }
        match self.run_slice(budget) {
            Ok(run_state) => {
                debug!(?run_state, remaining_time = self.state.remaining_time, "slice finished");
                Ok(run_state)
            }
            Err(e) => {
                error!(error = %e, "execution fault");
                self.fault = Some(e.clone());
                Err(e)
            }
        }
    }

    fn run_slice(&mut self, budget: i64) -> Result<RunState, ExecutionError> {
        if self.state.frames().is_empty() {
            return Ok(RunState::Finished);
        }
        self.state.remaining_time += budget;

        loop {
            let Some(frame) = self.state.active_frame() else {
                return Ok(RunState::Finished);
            };
            if self.state.remaining_time <= 0 {
                return Ok(RunState::Suspended);
            }
            let function = self
                .executable
                .function(frame.function)
                .ok_or_else(|| ExecutionError::Fault {
                    function: format!("#{}", frame.function),
                    ip: frame.ip,
                    fault: Fault::UnknownFunction(frame.function as i64),
                })?;
            if function.step(&mut self.state)? == FrameState::Suspended {
                return Ok(RunState::Suspended);
            }
        }
    }

    /// Steps until the program finishes or `max_slices` slices were spent.
    pub fn run_until_finished(&mut self, max_slices: usize) -> Result<RunState, ExecutionError> {
        for _ in 0..max_slices {
            if self.step()? == RunState::Finished {
                return Ok(RunState::Finished);
            }
        }
        Ok(if self.is_finished() {
            RunState::Finished
        } else {
            RunState::Suspended
        })
    }

    // ── Inspection ────────────────────────────────────────────────────────────

    pub fn is_finished(&self) -> bool {
        self.state.frames().is_empty()
    }

    pub fn fault(&self) -> Option<&ExecutionError> {
        self.fault.as_ref()
    }

    pub fn executable(&self) -> &Executable {
        &self.executable
    }

    pub fn machine(&self) -> &MachineInfo {
        &self.machine
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    pub fn globals(&self) -> &[Value] {
        self.state.globals()
    }

    /// The global cell at slot offset `slot`.
    pub fn global_slot(&self, slot: usize) -> Option<Value> {
        self.state.globals().get(slot).copied()
    }

    /// The first cell of the global called `name`.
    pub fn global(&self, name: &str) -> Option<Value> {
        self.global_slot(self.executable.global_slot(name)?)
    }

    /// The live value stack, bottom first.
    pub fn stack(&self) -> &[Value] {
        self.state.stack()
    }

    /// Active frames, outermost first.
    pub fn frames(&self) -> &[StackFrame] {
        self.state.frames()
    }

    /// Local slots of the frame at `depth` (0 is the outermost).
    pub fn locals(&self, depth: usize) -> Option<&[Value]> {
        let frame = self.state.frames().get(depth)?;
        Some(self.state.frame_locals(frame))
    }

    /// Value of the local called `name` in the frame at `depth`.
    pub fn local(&self, depth: usize, name: &str) -> Option<Value> {
        let frame = self.state.frames().get(depth)?;
        let function = self.executable.function(frame.function)?;
        let mut offset = 0;
        for local in function.locals() {
            if local.name == name {
                return self.state.frame_locals(frame).get(offset).copied();
            }
            offset += local.ty.num_values();
        }
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        BinaryOperator as B, Expression as E, FunctionDefinition, GlobalDeclaration, Statement as S,
        TranslationUnit,
    };
    use crate::compiler::compile;
    use crate::diagnostics::Report;
    use crate::types::{BasicType, CType, FunctionType, Parameter};

    fn void_fn() -> FunctionType {
        FunctionType::new(CType::Void, vec![])
    }

    fn interpreter(unit: &TranslationUnit, machine: MachineInfo) -> Interpreter {
        let mut report = Report::new();
        let exe = compile(unit, &mut report).unwrap();
        assert!(!report.has_errors(), "{:?}", report.diagnostics());
        let mut interp = Interpreter::new(exe, machine);
        interp.reset("start").unwrap();
        interp
    }

    fn run(unit: &TranslationUnit) -> Interpreter {
        let mut interp = interpreter(unit, MachineInfo::default());
        assert_eq!(interp.run_until_finished(100), Ok(RunState::Finished));
        interp
    }

    fn counting_loop() -> TranslationUnit {
        // int total; void start() { int i = 0; while (i < 20) { total = total + i; i = i + 1; } }
        TranslationUnit::new()
            .global(GlobalDeclaration::new("total", CType::int(), None))
            .function(FunctionDefinition::new(
                "start",
                void_fn(),
                vec![
                    S::declare("i", CType::int(), Some(E::int(0))),
                    S::while_loop(
                        E::binary(B::LessThan, E::var("i"), E::int(20)),
                        S::Block(vec![
                            S::expr(E::assign(
                                E::var("total"),
                                E::binary(B::Add, E::var("total"), E::var("i")),
                            )),
                            S::expr(E::assign(E::var("i"), E::binary(B::Add, E::var("i"), E::int(1)))),
                        ]),
                    ),
                ],
            ))
    }

    #[test]
    fn test_call_return_round_trip() {
        // int f() { return 7; } void start() { int x = f(); }
        let unit = TranslationUnit::new()
            .function(FunctionDefinition::new(
                "f",
                FunctionType::new(CType::int(), vec![]),
                vec![S::ret(E::int(7))],
            ))
            .function(FunctionDefinition::new(
                "start",
                void_fn(),
                vec![S::declare("x", CType::int(), Some(E::call(E::var("f"), vec![])))],
            ));
        let mut interp = interpreter(&unit, MachineInfo::default().with_cpu_speed(1));

        // LoadConstant, Call, LoadValue, Return (in f), StoreLocal
        assert_eq!(interp.step_for(5), Ok(RunState::Suspended));
        assert_eq!(interp.frames().len(), 1);
        assert_eq!(interp.local(0, "x"), Some(Value::Int(7)));
        assert!(interp.stack().is_empty());

        assert_eq!(interp.step_for(1), Ok(RunState::Finished));
        assert!(interp.is_finished());
    }

    #[test]
    fn test_int16_addition_wraps() {
        let unit = TranslationUnit::new()
            .global(GlobalDeclaration::new("g", CType::int(), None))
            .global(GlobalDeclaration::new("c", CType::Basic(BasicType::UNSIGNED_CHAR), None))
            .function(FunctionDefinition::new(
                "start",
                void_fn(),
                vec![
                    S::expr(E::assign(E::var("g"), E::binary(B::Add, E::int(32767), E::int(1)))),
                    S::expr(E::assign(E::var("c"), E::binary(B::Add, E::int(250), E::int(10)))),
                ],
            ));
        let interp = run(&unit);
        assert_eq!(interp.global("g"), Some(Value::Int(-32768)));
        assert_eq!(interp.global("c"), Some(Value::Int(4)));
    }

    #[test]
    fn test_split_slices_match_single_slice() {
        let machine = MachineInfo::default().with_cpu_speed(3);
        for budget in [60, 61, 150] {
            let mut whole = interpreter(&counting_loop(), machine.clone());
            whole.step_for(budget).unwrap();

            let mut split = interpreter(&counting_loop(), machine.clone());
            split.step_for(budget / 2).unwrap();
            split.step_for(budget - budget / 2).unwrap();

            assert_eq!(whole.stack(), split.stack(), "budget {budget}");
            assert_eq!(whole.frames(), split.frames(), "budget {budget}");
            assert_eq!(whole.locals(0), split.locals(0), "budget {budget}");
            assert_eq!(whole.globals(), split.globals(), "budget {budget}");
            assert_eq!(whole.state().remaining_time, split.state().remaining_time);
        }
    }

    #[test]
    fn test_loop_runs_to_completion_across_slices() {
        let mut interp = interpreter(&counting_loop(), MachineInfo::default().with_cpu_speed(10).with_time_slice(50));
        let mut slices = 0;
        while interp.step().unwrap() == RunState::Suspended {
            slices += 1;
        }
        assert!(slices > 10);
        assert_eq!(interp.global("total"), Some(Value::Int(190)));
    }

    #[test]
    fn test_fault_is_sticky() {
        let unit = TranslationUnit::new()
            .global(GlobalDeclaration::new("zero", CType::int(), None))
            .global(GlobalDeclaration::new("g", CType::int(), None))
            .function(FunctionDefinition::new(
                "start",
                void_fn(),
                vec![S::expr(E::assign(
                    E::var("g"),
                    E::binary(B::Divide, E::int(1), E::var("zero")),
                ))],
            ));
        let mut interp = interpreter(&unit, MachineInfo::default());
        let first = interp.step().unwrap_err();
        assert!(matches!(
            first,
            ExecutionError::Fault {
                fault: Fault::DivisionByZero,
                ip: 2,
                ..
            }
        ));
        assert_eq!(interp.step(), Err(first.clone()));
        assert_eq!(interp.fault(), Some(&first));
    }

    #[test]
    fn test_swap_through_pointers_with_initializers() {
        // int x = 1; int y = 2; int a; int b;
        // void swap(int* p, int* q) { int t = *p; *p = *q; *q = t; }
        // void start() { int l = 3; int m = 4; swap(&x, &y); swap(&l, &m); a = l; b = m; }
        let int_ptr = CType::pointer_to(CType::int());
        let unit = TranslationUnit::new()
            .global(GlobalDeclaration::new("x", CType::int(), Some(E::int(1))))
            .global(GlobalDeclaration::new("y", CType::int(), Some(E::int(2))))
            .global(GlobalDeclaration::new("a", CType::int(), None))
            .global(GlobalDeclaration::new("b", CType::int(), None))
            .function(FunctionDefinition::new(
                "swap",
                FunctionType::new(
                    CType::Void,
                    vec![Parameter::new("p", int_ptr.clone()), Parameter::new("q", int_ptr)],
                ),
                vec![
                    S::declare("t", CType::int(), Some(E::deref(E::var("p")))),
                    S::expr(E::assign(E::deref(E::var("p")), E::deref(E::var("q")))),
                    S::expr(E::assign(E::deref(E::var("q")), E::var("t"))),
                ],
            ))
            .function(FunctionDefinition::new(
                "start",
                void_fn(),
                vec![
                    S::declare("l", CType::int(), Some(E::int(3))),
                    S::declare("m", CType::int(), Some(E::int(4))),
                    S::expr(E::call(
                        E::var("swap"),
                        vec![E::address_of(E::var("x")), E::address_of(E::var("y"))],
                    )),
                    S::expr(E::call(
                        E::var("swap"),
                        vec![E::address_of(E::var("l")), E::address_of(E::var("m"))],
                    )),
                    S::expr(E::assign(E::var("a"), E::var("l"))),
                    S::expr(E::assign(E::var("b"), E::var("m"))),
                ],
            ));
        let interp = run(&unit);
        assert_eq!(interp.globals(), &[Value::Int(2), Value::Int(1), Value::Int(4), Value::Int(3)]);
        assert!(interp.stack().is_empty());
    }

    #[test]
    fn test_array_sum_and_recursion() {
        // int squares[4]; int sum; int fact_result;
        // int fact(int n) { if (n <= 1) return 1; return n * fact(n - 1); }
        // void start() {
        //   int i;
        //   for (i = 0; i < 4; i = i + 1) squares[i] = i * i;
        //   for (i = 0; i < 4; i = i + 1) { if (i == 2) continue; sum = sum + squares[i]; }
        //   fact_result = fact(7);
        // }
        let unit = TranslationUnit::new()
            .global(GlobalDeclaration::new("squares", CType::array_of(CType::int(), 4), None))
            .global(GlobalDeclaration::new("sum", CType::int(), None))
            .global(GlobalDeclaration::new("fact_result", CType::int(), None))
            .function(FunctionDefinition::new(
                "fact",
                FunctionType::new(CType::int(), vec![Parameter::new("n", CType::int())]),
                vec![
                    S::if_else(
                        E::binary(B::LessThanOrEqual, E::var("n"), E::int(1)),
                        S::ret(E::int(1)),
                        None,
                    ),
                    S::ret(E::binary(
                        B::Multiply,
                        E::var("n"),
                        E::call(E::var("fact"), vec![E::binary(B::Subtract, E::var("n"), E::int(1))]),
                    )),
                ],
            ))
            .function(FunctionDefinition::new(
                "start",
                void_fn(),
                vec![
                    S::declare("i", CType::int(), None),
                    S::for_loop(
                        Some(S::expr(E::assign(E::var("i"), E::int(0)))),
                        Some(E::binary(B::LessThan, E::var("i"), E::int(4))),
                        Some(E::assign(E::var("i"), E::binary(B::Add, E::var("i"), E::int(1)))),
                        S::expr(E::assign(
                            E::index(E::var("squares"), E::var("i")),
                            E::binary(B::Multiply, E::var("i"), E::var("i")),
                        )),
                    ),
                    S::for_loop(
                        Some(S::expr(E::assign(E::var("i"), E::int(0)))),
                        Some(E::binary(B::LessThan, E::var("i"), E::int(4))),
                        Some(E::assign(E::var("i"), E::binary(B::Add, E::var("i"), E::int(1)))),
                        S::Block(vec![
                            S::if_else(E::binary(B::Equal, E::var("i"), E::int(2)), S::Continue, None),
                            S::expr(E::assign(
                                E::var("sum"),
                                E::binary(B::Add, E::var("sum"), E::index(E::var("squares"), E::var("i"))),
                            )),
                        ]),
                    ),
                    S::expr(E::assign(
                        E::var("fact_result"),
                        E::call(E::var("fact"), vec![E::int(7)]),
                    )),
                ],
            ));
        let interp = run(&unit);
        assert_eq!(
            &interp.globals()[..4],
            &[Value::Int(0), Value::Int(1), Value::Int(4), Value::Int(9)]
        );
        assert_eq!(interp.global("sum"), Some(Value::Int(10)));
        assert_eq!(interp.global("fact_result"), Some(Value::Int(5040)));
    }

    #[test]
    fn test_call_through_function_pointer() {
        // int twice(int v) { return v + v; } int r;
        // void start() { int (*fp)(int) = twice; r = (*fp)(21); }
        let twice_ty = FunctionType::new(CType::int(), vec![Parameter::new("v", CType::int())]);
        let unit = TranslationUnit::new()
            .global(GlobalDeclaration::new("r", CType::int(), None))
            .function(FunctionDefinition::new(
                "twice",
                twice_ty.clone(),
                vec![S::ret(E::binary(B::Add, E::var("v"), E::var("v")))],
            ))
            .function(FunctionDefinition::new(
                "start",
                void_fn(),
                vec![
                    S::declare("fp", CType::pointer_to(CType::Function(twice_ty)), Some(E::var("twice"))),
                    S::expr(E::assign(
                        E::var("r"),
                        E::call(E::deref(E::var("fp")), vec![E::int(21)]),
                    )),
                ],
            ));
        let interp = run(&unit);
        assert_eq!(interp.global("r"), Some(Value::Int(42)));
    }

    #[test]
    fn test_short_circuit_skips_right_operand() {
        // int g; int hits; int touch() { hits = hits + 1; return 1; }
        // void start() { g = 0 && touch(); g = g || touch(); }
        let unit = TranslationUnit::new()
            .global(GlobalDeclaration::new("g", CType::int(), None))
            .global(GlobalDeclaration::new("hits", CType::int(), None))
            .function(FunctionDefinition::new(
                "touch",
                FunctionType::new(CType::int(), vec![]),
                vec![
                    S::expr(E::assign(E::var("hits"), E::binary(B::Add, E::var("hits"), E::int(1)))),
                    S::ret(E::int(1)),
                ],
            ))
            .function(FunctionDefinition::new(
                "start",
                void_fn(),
                vec![
                    S::expr(E::assign(
                        E::var("g"),
                        E::binary(B::LogicalAnd, E::int(0), E::call(E::var("touch"), vec![])),
                    )),
                    S::expr(E::assign(
                        E::var("g"),
                        E::binary(B::LogicalOr, E::var("g"), E::call(E::var("touch"), vec![])),
                    )),
                ],
            ));
        let interp = run(&unit);
        assert_eq!(interp.global("g"), Some(Value::Int(1)));
        assert_eq!(interp.global("hits"), Some(Value::Int(1)));
    }

    #[test]
    fn test_reset_errors() {
        let unit = TranslationUnit::new().function(FunctionDefinition::new(
            "takes_one",
            FunctionType::new(CType::Void, vec![Parameter::new("a", CType::int())]),
            vec![],
        ));
        let mut report = Report::new();
        let mut interp = Interpreter::new(compile(&unit, &mut report).unwrap(), MachineInfo::default());
        assert_eq!(
            interp.reset("missing"),
            Err(ExecutionError::EntryNotFound("missing".into()))
        );
        assert_eq!(
            interp.reset("takes_one"),
            Err(ExecutionError::EntryTakesArguments("takes_one".into()))
        );
        assert_eq!(interp.step(), Ok(RunState::Finished));
    }

    #[test]
    fn test_call_depth_fault() {
        // void start() { start(); }
        let unit = TranslationUnit::new().function(FunctionDefinition::new(
            "start",
            void_fn(),
            vec![S::expr(E::call(E::var("start"), vec![]))],
        ));
        let mut interp = interpreter(&unit, MachineInfo::default().with_max_call_depth(8));
        let err = interp.run_until_finished(10).unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Fault {
                fault: Fault::CallDepthExceeded(8),
                ..
            }
        ));
    }

    #[test]
    fn test_array_argument_is_passed_by_value() {
        // int g[2]; int r;
        // int first(int a[2], int k) { a[0] = a[0] + k; return a[0] + a[1]; }
        // void start() { g[0] = 5; g[1] = 6; r = first(g, 100); }
        let a = |i| E::index(E::var("a"), E::int(i));
        let g = |i| E::index(E::var("g"), E::int(i));
        let unit = TranslationUnit::new()
            .global(GlobalDeclaration::new("g", CType::array_of(CType::int(), 2), None))
            .global(GlobalDeclaration::new("r", CType::int(), None))
            .function(FunctionDefinition::new(
                "first",
                FunctionType::new(
                    CType::int(),
                    vec![
                        Parameter::new("a", CType::array_of(CType::int(), 2)),
                        Parameter::new("k", CType::int()),
                    ],
                ),
                vec![
                    S::expr(E::assign(a(0), E::binary(B::Add, a(0), E::var("k")))),
                    S::ret(E::binary(B::Add, a(0), a(1))),
                ],
            ))
            .function(FunctionDefinition::new(
                "start",
                void_fn(),
                vec![
                    S::expr(E::assign(g(0), E::int(5))),
                    S::expr(E::assign(g(1), E::int(6))),
                    S::expr(E::assign(
                        E::var("r"),
                        E::call(E::var("first"), vec![E::var("g"), E::int(100)]),
                    )),
                ],
            ));
        let interp = run(&unit);
        assert_eq!(interp.global("r"), Some(Value::Int(111)));
        assert_eq!(interp.globals()[..2], [Value::Int(5), Value::Int(6)]);
        assert!(interp.stack().is_empty());
    }

    #[test]
    fn test_pointer_difference_counts_elements() {
        // int g[4]; int d; int e;
        // void start() { int* p = &g[3]; int* q = g; d = p - q; e = q - p; }
        let int_ptr = CType::pointer_to(CType::int());
        let unit = TranslationUnit::new()
            .global(GlobalDeclaration::new("g", CType::array_of(CType::int(), 4), None))
            .global(GlobalDeclaration::new("d", CType::int(), None))
            .global(GlobalDeclaration::new("e", CType::int(), None))
            .function(FunctionDefinition::new(
                "start",
                void_fn(),
                vec![
                    S::declare(
                        "p",
                        int_ptr.clone(),
                        Some(E::address_of(E::index(E::var("g"), E::int(3)))),
                    ),
                    S::declare("q", int_ptr, Some(E::var("g"))),
                    S::expr(E::assign(E::var("d"), E::binary(B::Subtract, E::var("p"), E::var("q")))),
                    S::expr(E::assign(E::var("e"), E::binary(B::Subtract, E::var("q"), E::var("p")))),
                ],
            ));
        let interp = run(&unit);
        assert_eq!(interp.global("d"), Some(Value::Int(3)));
        assert_eq!(interp.global("e"), Some(Value::Int(-3)));
    }
}
