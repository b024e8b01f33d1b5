pub mod execution_commands;

pub use execution_commands::ExecutionService;
