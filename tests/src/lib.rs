//! Shared helpers for the integration test targets.

use murk_core::vm::Vm;
use murk_core::{compile, parse, CodeObject};
use tracing_subscriber::EnvFilter;

/// Installs a test-writer subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn compile_source(source: &str) -> CodeObject {
    compile(&parse(source).expect("source parses"), "test.mk").expect("source compiles")
}

/// Runs a compiled module and returns its captured `print` lines.
pub fn run_code(code: &CodeObject) -> Vec<String> {
    let mut vm = Vm::new();
    vm.run(code).expect("program runs");
    vm.take_output()
}

pub fn run_source(source: &str) -> Vec<String> {
    run_code(&compile_source(source))
}
