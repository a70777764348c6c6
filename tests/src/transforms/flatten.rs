use murk_core::ast::{Definition, Module, Stmt, StmtKind};
use murk_core::vm::{Value, Vm};
use murk_core::{compile, parse, unparse};
use murk_tests::{compile_source, init_tracing, run_source};
use murk_transform::flatten::{flatten_definition, ControlFlowFlattener, TERMINAL_STATE};
use murk_transform::obfuscator::{obfuscate, ObfuscationOptions};
use murk_transform::{PassContext, Transform};
use murk_utils::errors::{FlattenError, ObfuscateError, TransformError};

const SUM_TO_N: &str = "def total(n):\n    acc = 0\n    for i in range(1, n + 1):\n        acc += i\n    return acc\n";

fn flatten(source: &str, seed: u64) -> String {
    let mut module = parse(source).unwrap();
    let mut ctx = PassContext::new(seed, &module);
    ControlFlowFlattener.apply(&mut module, &mut ctx).unwrap();
    unparse(&module)
}

fn call(source: &str, name: &str, args: Vec<Value>) -> Value {
    let mut vm = Vm::new();
    vm.run(&compile_source(source)).unwrap();
    vm.call(name, args).unwrap()
}

#[test]
fn flattened_sum_returns_55() {
    init_tracing();
    let flattened = flatten(SUM_TO_N, 42);
    assert!(flattened.contains("while "));
    assert_eq!(call(&flattened, "total", vec![Value::Int(10)]), Value::Int(55));
    for n in 0..20 {
        assert_eq!(
            call(&flattened, "total", vec![Value::Int(n)]),
            call(SUM_TO_N, "total", vec![Value::Int(n)])
        );
    }
}

#[test]
fn zero_statement_definition_terminates() {
    let mut def = Definition {
        name: "empty".to_string(),
        params: Vec::new(),
        body: Vec::new(),
    };
    flatten_definition(&mut def, "_state").unwrap();
    let module = Module {
        body: vec![Stmt::synthetic(StmtKind::Def(def))],
    };
    let code = compile(&module, "empty.mk").unwrap();
    let mut vm = Vm::new().with_recursion_limit(4);
    vm.run(&code).unwrap();
    assert_eq!(vm.call("empty", Vec::new()).unwrap(), Value::None);
    assert!(unparse(&module).contains(&format!("_state = {TERMINAL_STATE}")));
}

#[test]
fn side_effects_keep_their_order() {
    let source = "def trace(a):\n    print(\"start\", a)\n    if a > 2:\n        print(\"big\")\n    else:\n        print(\"small\")\n    b = a * 2\n    print(\"end\", b)\n\ntrace(1)\ntrace(5)\n";
    assert_eq!(run_source(&flatten(source, 7)), run_source(source));
}

#[test]
fn early_return_stops_dispatch() {
    let source = "def pick(x):\n    if x:\n        return 1\n    return 2\n    print(\"unreachable\")\n\nprint(pick(True), pick(False))\n";
    let flattened = flatten(source, 3);
    assert_eq!(run_source(&flattened), vec!["1 2"]);
}

#[test]
fn nested_and_recursive_definitions() {
    let source = "def outer(n):\n    def fact(k):\n        if k <= 1:\n            return 1\n        return k * fact(k - 1)\n    return n\n\ndef fact(k):\n    if k <= 1:\n        return 1\n    return k * fact(k - 1)\n\nprint(outer(3), fact(6))\n";
    let flattened = flatten(source, 11);
    assert_eq!(run_source(&flattened), run_source(source));
    assert_eq!(flattened.matches("while ").count(), 3);
}

#[test]
fn stray_continue_is_an_error_not_a_loop() {
    let source = "def f(x):\n    if x:\n        continue\n    return 1\n\nprint(f(0))\n";
    let options = ObfuscationOptions {
        seed: Some(1),
        ..ObfuscationOptions::default()
    };
    let err = obfuscate(source, &options).unwrap_err();
    assert!(matches!(
        err,
        ObfuscateError::Transform(TransformError::Flatten(FlattenError::LoopControlOutsideLoop {
            line: 3,
            keyword: "continue",
            ..
        }))
    ));
    assert!(err.to_string().starts_with("transform stage failed"));

    let unflattened = ObfuscationOptions {
        flatten: false,
        ..options
    };
    assert!(matches!(
        obfuscate(source, &unflattened),
        Err(ObfuscateError::Compile(_))
    ));
}

#[test]
fn stray_break_is_rejected() {
    let mut module = parse("def g():\n    x = 1\n    break\n").unwrap();
    let original = module.clone();
    let mut ctx = PassContext::new(2, &module);
    let err = ControlFlowFlattener.apply(&mut module, &mut ctx).unwrap_err();
    assert_eq!(
        err,
        TransformError::Flatten(FlattenError::LoopControlOutsideLoop {
            definition: "g".to_string(),
            line: 3,
            keyword: "break",
        })
    );
    assert_eq!(module, original);
}

#[test]
fn loop_control_inside_a_loop_still_flattens() {
    let source = "def first_even(items):\n    found = None\n    for item in items:\n        if item % 2 == 1:\n            continue\n        found = item\n        break\n    return found\n\nprint(first_even([3, 5, 8, 10]))\n";
    let flattened = flatten(source, 5);
    assert_eq!(run_source(&flattened), vec!["8"]);
    assert_eq!(run_source(&flattened), run_source(source));
}
