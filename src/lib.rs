//! Bytecode compiler and time-sliced virtual machine for a restricted C dialect.
//!
//! This crate provides the back half of a C simulation pipeline:
//!
//! 1. **Types** (`types`): the closed C type model and integer forms.
//! 2. **Tree** (`ast`): the typed expression/statement tree handed over by a parser.
//! 3. **Resolver** (`resolver`): maps names to a scope and slot index.
//! 4. **Compiler** (`compiler`): lowers the tree to [`bytecode`] instructions.
//! 5. **Functions** (`function`): compiled functions, the decode loop and the executable.
//! 6. **VM** (`vm`): value stack, frames, memory and call/return.
//! 7. **Interpreter** (`interpreter`): host driver running the VM in time slices.
//!
//! # Entry point
//!
//! ```rust,ignore
//! use csim::{create_interpreter, machine::MachineInfo};
//! let mut interp = create_interpreter(&unit, MachineInfo::default(), "main")?;
//! while interp.step()? == csim::interpreter::RunState::Suspended {
//!     // simulate peripherals between slices
//! }
//! ```

// ─────────────────────────────────────────────────────────────────────────────
// Modules
// ─────────────────────────────────────────────────────────────────────────────

pub mod ast;
pub mod bytecode;
pub mod compiler;
pub mod diagnostics;
pub mod function;
pub mod interpreter;
pub mod machine;
pub mod resolver;
pub mod types;
pub mod value;
pub mod vm;

// ─────────────────────────────────────────────────────────────────────────────
// Unified error type
// ─────────────────────────────────────────────────────────────────────────────

use crate::compiler::EmitError;
use crate::diagnostics::{Diagnostic, Report};
use crate::function::Executable;
use crate::interpreter::Interpreter;
use crate::machine::MachineInfo;
use crate::vm::ExecutionError;

/// The unified error type for all pipeline stages.
#[derive(Debug, thiserror::Error)]
pub enum CsimError {
    /// One or more user errors found while generating code.
    #[error("Compile error: {}", .0.iter().map(|d| d.to_string()).collect::<Vec<_>>().join("; "))]
    Compile(Vec<Diagnostic>),

    /// The generator met a tree it cannot lower.
    #[error("Emit error: {0}")]
    Emit(#[from] EmitError),

    /// A fatal runtime fault.
    #[error("Runtime error: {0}")]
    Execution(#[from] ExecutionError),
}

/// Shorthand result type for all csim operations.
pub type CsimResult<T> = Result<T, CsimError>;

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Compile a translation unit, failing if any diagnostic was reported.
pub fn compile_unit(unit: &ast::TranslationUnit) -> CsimResult<Executable> {
    let mut report = Report::new();
    let executable = compiler::compile(unit, &mut report)?;
    if report.has_errors() {
        return Err(CsimError::Compile(report.into_diagnostics()));
    }
    Ok(executable)
}

/// Compile `unit` and return an interpreter reset to `entry`.
pub fn create_interpreter(
    unit: &ast::TranslationUnit,
    machine: MachineInfo,
    entry: &str,
) -> CsimResult<Interpreter> {
    let executable = compile_unit(unit)?;
    let mut interpreter = Interpreter::new(executable, machine);
    interpreter.reset(entry)?;
    Ok(interpreter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expression, FunctionDefinition, Statement, TranslationUnit};
    use crate::diagnostics::codes;
    use crate::interpreter::RunState;
    use crate::types::{CType, FunctionType};

    fn unit(body: Vec<Statement>) -> TranslationUnit {
        TranslationUnit::new().function(FunctionDefinition::new(
            "main",
            FunctionType::new(CType::Void, vec![]),
            body,
        ))
    }

    #[test]
    fn test_compile_errors_are_collected() {
        let result = compile_unit(&unit(vec![
            Statement::expr(Expression::var("a")),
            Statement::expr(Expression::var("b")),
        ]));
        match result {
            Err(CsimError::Compile(diagnostics)) => {
                assert_eq!(diagnostics.len(), 2);
                assert!(diagnostics.iter().all(|d| d.code == codes::UNDECLARED_NAME));
            }
            other => panic!("expected compile error, got {other:?}"),
        }
    }

    #[test]
    fn test_create_interpreter_runs_entry() {
        let mut interp = create_interpreter(&unit(vec![]), MachineInfo::default(), "main").unwrap();
        assert_eq!(interp.step().unwrap(), RunState::Finished);
    }

    #[test]
    fn test_missing_entry_is_execution_error() {
        let err = create_interpreter(&unit(vec![]), MachineInfo::default(), "nope").unwrap_err();
        assert!(matches!(err, CsimError::Execution(ExecutionError::EntryNotFound(_))));
        assert_eq!(err.to_string(), "Runtime error: entry function `nope` does not exist");
    }
}
