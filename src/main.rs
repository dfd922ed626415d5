//! csim - runs a small built-in C program on the simulated machine.
//!
//! The program fills an array with squares, sums it and computes a factorial
//! recursively.  It is executed slice by slice the way a host simulator would
//! drive it, and the globals are printed at the end.

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use csim::ast::{BinaryOperator as B, Expression as E, FunctionDefinition, GlobalDeclaration, Statement as S, TranslationUnit};
use csim::interpreter::RunState;
use csim::machine::MachineInfo;
use csim::types::{CType, FunctionType, Parameter};

#[derive(Parser, Debug)]
#[command(name = "csim")]
#[command(about = "Compile and run a demo C program on the time-sliced VM")]
struct Cli {
    /// Cost units consumed per executed instruction
    #[arg(long, default_value = "1000")]
    cpu_speed: i64,

    /// Cost units spent per slice
    #[arg(long, default_value = "50000")]
    time_slice: i64,

    /// Value stack capacity in cells
    #[arg(long, default_value = "1024")]
    stack_size: usize,

    /// Maximum number of nested calls
    #[arg(long, default_value = "128")]
    max_call_depth: usize,

    /// Give up after this many slices
    #[arg(long, default_value = "10000")]
    max_slices: usize,

    /// Number of array elements to square and sum
    #[arg(long, default_value = "8")]
    count: usize,

    /// Argument passed to the recursive factorial
    #[arg(long, default_value = "7")]
    factorial: i64,

    /// Print the assembler listing before running
    #[arg(long)]
    assembler: bool,
}

/// ```c
/// int squares[N]; int sum; int fact_result; int input = F;
/// int fact(int n) { if (n <= 1) return 1; return n * fact(n - 1); }
/// void main() {
///     int i;
///     for (i = 0; i < N; i = i + 1) squares[i] = i * i;
///     for (i = 0; i < N; i = i + 1) sum = sum + squares[i];
///     fact_result = fact(input);
/// }
/// ```
fn demo_program(count: usize, factorial: i64) -> TranslationUnit {
    let n = count as i64;
    let next_i = || Some(E::assign(E::var("i"), E::binary(B::Add, E::var("i"), E::int(1))));
    let reset_i = || Some(S::expr(E::assign(E::var("i"), E::int(0))));
    let below_n = || Some(E::binary(B::LessThan, E::var("i"), E::int(n)));

    TranslationUnit::new()
        .global(GlobalDeclaration::new("squares", CType::array_of(CType::int(), count), None))
        .global(GlobalDeclaration::new("sum", CType::int(), None))
        .global(GlobalDeclaration::new("fact_result", CType::int(), None))
        .global(GlobalDeclaration::new("input", CType::int(), Some(E::int(factorial))))
        .function(FunctionDefinition::new(
            "fact",
            FunctionType::new(CType::int(), vec![Parameter::new("n", CType::int())]),
            vec![
                S::if_else(E::binary(B::LessThanOrEqual, E::var("n"), E::int(1)), S::ret(E::int(1)), None),
                S::ret(E::binary(
                    B::Multiply,
                    E::var("n"),
                    E::call(E::var("fact"), vec![E::binary(B::Subtract, E::var("n"), E::int(1))]),
                )),
            ],
        ))
        .function(FunctionDefinition::new(
            "main",
            FunctionType::new(CType::Void, vec![]),
            vec![
                S::declare("i", CType::int(), None),
                S::for_loop(
                    reset_i(),
                    below_n(),
                    next_i(),
                    S::expr(E::assign(
                        E::index(E::var("squares"), E::var("i")),
                        E::binary(B::Multiply, E::var("i"), E::var("i")),
                    )),
                ),
                S::for_loop(
                    reset_i(),
                    below_n(),
                    next_i(),
                    S::expr(E::assign(
                        E::var("sum"),
                        E::binary(B::Add, E::var("sum"), E::index(E::var("squares"), E::var("i"))),
                    )),
                ),
                S::expr(E::assign(E::var("fact_result"), E::call(E::var("fact"), vec![E::var("input")]))),
            ],
        ))
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "csim=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let machine = MachineInfo::default()
        .with_cpu_speed(cli.cpu_speed)
        .with_time_slice(cli.time_slice)
        .with_stack_size(cli.stack_size)
        .with_max_call_depth(cli.max_call_depth);
    let unit = demo_program(cli.count, cli.factorial);

    let mut interpreter = match csim::create_interpreter(&unit, machine, "main") {
        Ok(i) => i,
        Err(e) => {
            error!("Failed to build the program: {}", e);
            std::process::exit(1);
        }
    };

    if cli.assembler {
        println!("{}", interpreter.executable().assembler());
    }

    let mut slices = 0;
    loop {
        if slices == cli.max_slices {
            error!("Program did not finish within {} slices", cli.max_slices);
            std::process::exit(1);
        }
        match interpreter.step() {
            Ok(RunState::Suspended) => slices += 1,
            Ok(RunState::Finished) => break,
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        }
    }

    info!("Finished after {} slices", slices + 1);
    for global in interpreter.executable().globals() {
        let Some(cells) = interpreter
            .executable()
            .global_slot(&global.name)
            .and_then(|slot| interpreter.globals().get(slot..slot + global.ty.num_values()))
        else {
            continue;
        };
        let rendered: Vec<String> = cells.iter().map(|v| v.to_string()).collect();
        println!("{} {} = {}", global.ty, global.name, rendered.join(", "));
    }
}
