//! Description of the simulated CPU.
//!
//! [`MachineInfo`] is the configuration the host hands to an interpreter.
//! Time is measured in abstract cost units: every executed instruction costs
//! `cpu_speed` units (times its weight under [`CostModel::Weighted`]), and one
//! `step()` spends at most `time_slice` units before yielding.

use std::collections::HashMap;

use crate::bytecode::OpCode;

/// How the cost of one instruction is computed.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CostModel {
    /// Every opcode costs exactly `cpu_speed`.
    #[default]
    Uniform,
    /// Opcode weight multiplied by `cpu_speed`; opcodes missing from the
    /// table weigh 1.
    Weighted(HashMap<OpCode, i64>),
}

impl CostModel {
    pub fn cost(&self, op: OpCode, cpu_speed: i64) -> i64 {
        match self {
            CostModel::Uniform => cpu_speed,
            CostModel::Weighted(weights) => cpu_speed * weights.get(&op).copied().unwrap_or(1),
        }
    }
}

/// Simulated machine parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineInfo {
    /// Cost units consumed per executed instruction.
    pub cpu_speed: i64,
    /// Budget spent by one `step()`.
    pub time_slice: i64,
    /// Value stack capacity in cells.
    pub stack_size: usize,
    /// Maximum number of simultaneously active frames.
    pub max_call_depth: usize,
    pub cost_model: CostModel,
}

impl Default for MachineInfo {
    fn default() -> Self {
        MachineInfo {
            cpu_speed: 1_000,
            time_slice: 1_000_000,
            stack_size: 1_024,
            max_call_depth: 128,
            cost_model: CostModel::Uniform,
        }
    }
}

impl MachineInfo {
    pub fn with_cpu_speed(mut self, cpu_speed: i64) -> Self {
        self.cpu_speed = cpu_speed;
        self
    }

    pub fn with_time_slice(mut self, time_slice: i64) -> Self {
        self.time_slice = time_slice;
        self
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    pub fn with_max_call_depth(mut self, max_call_depth: usize) -> Self {
        self.max_call_depth = max_call_depth;
        self
    }

    pub fn with_cost_model(mut self, cost_model: CostModel) -> Self {
        self.cost_model = cost_model;
        self
    }
}
