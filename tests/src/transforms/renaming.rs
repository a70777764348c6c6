use murk_core::builtins::BUILTIN_NAMES;
use murk_core::lexer::KEYWORDS;
use murk_core::{parse, unparse};
use murk_tests::{init_tracing, run_source};
use murk_transform::definition_renamer::DefinitionRenamer;
use murk_transform::local_renamer::LocalRenamer;
use murk_transform::{pass, PassContext, Transform};
use std::collections::HashSet;

const TWO_DEFINITIONS: &str = "def square(x):\n    return x * x\n\ndef sum_squares(n):\n    total = 0\n    for i in range(n):\n        total += square(i)\n    return total\n\nprint(sum_squares(5))\n";

fn rename_all(source: &str, seed: u64) -> (String, PassContext) {
    let mut module = parse(source).unwrap();
    let mut ctx = PassContext::new(seed, &module);
    let passes: Vec<Box<dyn Transform>> = vec![Box::new(DefinitionRenamer), Box::new(LocalRenamer)];
    pass::run(&mut module, &passes, &mut ctx).unwrap();
    (unparse(&module), ctx)
}

#[test]
fn call_site_uses_the_synthetic_name() {
    init_tracing();
    let (text, ctx) = rename_all(TWO_DEFINITIONS, 42);
    let square = ctx.definition_names.get("square").unwrap();
    let sum_squares = ctx.definition_names.get("sum_squares").unwrap();
    assert!(text.contains(&format!("def {square}(x):")));
    assert!(text.contains(&format!("{square}(")));
    assert!(text.contains(&format!("print({sum_squares}(5))")));
    assert!(!text.contains("square("));
    assert_eq!(run_source(&text), run_source(TWO_DEFINITIONS));
    assert_eq!(run_source(&text), vec!["30"]);
}

#[test]
fn protected_names_never_become_keys() {
    let source = "limit = 10\n\ndef clamp(value):\n    top = min(value, limit)\n    low = max(top, 0)\n    return low\n\ndef print_all(items):\n    for item in items:\n        print(clamp(item), len(str(item)))\n    return None\n\nprint_all([3, 30, -4])\n";
    let (text, ctx) = rename_all(source, 9);
    let protected: HashSet<&str> = KEYWORDS
        .iter()
        .chain(BUILTIN_NAMES)
        .copied()
        .chain(["limit", "value", "items"])
        .collect();
    for key in ctx.definition_names.mapping().keys().chain(ctx.local_names.mapping().keys()) {
        assert!(!protected.contains(key.as_str()), "{key} was renamed");
    }
    assert!(ctx.local_names.contains("top"));
    assert!(ctx.local_names.contains("item"));
    assert_eq!(run_source(&text), run_source(source));
}

#[test]
fn synthetic_names_are_distinct_and_fresh() {
    let (text, ctx) = rename_all(TWO_DEFINITIONS, 1);
    let original = parse(TWO_DEFINITIONS).unwrap();
    let existing = murk_core::ast::collect_identifiers(&original);
    let synthetic: Vec<&String> = ctx
        .definition_names
        .mapping()
        .values()
        .chain(ctx.local_names.mapping().values())
        .collect();
    let unique: HashSet<&&String> = synthetic.iter().collect();
    assert_eq!(unique.len(), synthetic.len());
    for name in synthetic {
        assert!(!existing.contains(name.as_str()));
        assert!(text.contains(name.as_str()));
    }
}

#[test]
fn shadowing_local_is_not_redirected() {
    let source = "def helper():\n    return 1\n\ndef f():\n    helper = 5\n    return helper\n\nprint(f(), helper())\n";
    let mut module = parse(source).unwrap();
    let mut ctx = PassContext::new(4, &module);
    DefinitionRenamer.apply(&mut module, &mut ctx).unwrap();
    let text = unparse(&module);
    assert!(text.contains("    helper = 5\n    return helper\n"));
    assert_eq!(run_source(&text), vec!["5 1"]);
}

#[test]
fn seeds_are_reproducible() {
    let (a, _) = rename_all(TWO_DEFINITIONS, 77);
    let (b, _) = rename_all(TWO_DEFINITIONS, 77);
    let (c, _) = rename_all(TWO_DEFINITIONS, 78);
    assert_eq!(a, b);
    assert_ne!(a, c);
}
