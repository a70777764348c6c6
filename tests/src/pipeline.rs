use murk_core::container::{read_container, FormatVersion};
use murk_tests::{init_tracing, run_code, run_source};
use murk_transform::obfuscator::{obfuscate, presets, ObfuscationOptions, TransformOrder};
use murk_utils::errors::ObfuscateError;

const PROGRAM: &str = "\
LIMIT = 12

def is_prime(n):
    if n < 2:
        return False
    d = 2
    while d * d <= n:
        if n % d == 0:
            return False
        d += 1
    return True

def primes_below(limit):
    found = []
    for candidate in range(limit):
        if is_prime(candidate):
            found = found + [candidate]
    return found

print(primes_below(LIMIT))
print(len(primes_below(50)))
";

#[test]
fn every_preset_preserves_output() {
    init_tracing();
    let expected = run_source(PROGRAM);
    assert_eq!(expected, vec!["[2, 3, 5, 7, 11]", "15"]);
    for options in [
        presets::default_obfuscation(Some(1)),
        presets::light_obfuscation(Some(2)),
        presets::full_obfuscation(Some(3)),
    ] {
        let result = obfuscate(PROGRAM, &options).unwrap();
        assert_eq!(run_source(&result.rewritten_source), expected);
        if let Some(bytes) = &result.container {
            let (_, code) = read_container(bytes).unwrap();
            assert_eq!(run_code(&code), expected);
            assert_eq!(result.stats.container_size, Some(bytes.len()));
        }
    }
}

#[test]
fn flatten_then_rename_order() {
    let options = ObfuscationOptions {
        order: TransformOrder::FlattenThenRename,
        seed: Some(21),
        ..ObfuscationOptions::default()
    };
    let result = obfuscate(PROGRAM, &options).unwrap();
    assert_eq!(
        result.stats.transforms_applied,
        vec!["ControlFlowFlattener", "DefinitionRenamer", "LocalRenamer"]
    );
    // state variables are bindings too, so they end up renamed
    assert!(result.local_names.keys().any(|name| name.starts_with('_')));
    assert_eq!(run_source(&result.rewritten_source), run_source(PROGRAM));
}

#[test]
fn report_serializes_without_container() {
    let result = obfuscate(PROGRAM, &presets::full_obfuscation(Some(5))).unwrap();
    let json = serde_json::to_value(&result).unwrap();
    assert!(json.get("container").is_none());
    assert_eq!(json["stats"]["seed_used"], 5);
    assert!(json["definition_names"]
        .as_object()
        .unwrap()
        .contains_key("is_prime"));
    assert!(!json["definition_names"]
        .as_object()
        .unwrap()
        .contains_key("LIMIT"));
}

#[test]
fn each_format_version_is_honoured() {
    for version in [FormatVersion::V1, FormatVersion::V2, FormatVersion::V3] {
        let options = ObfuscationOptions {
            emit_container: true,
            format_version: version,
            seed: Some(9),
            ..ObfuscationOptions::default()
        };
        let result = obfuscate(PROGRAM, &options).unwrap();
        let (header, _) = read_container(result.container.as_deref().unwrap()).unwrap();
        assert_eq!(header.version, version);
        let expected_size = (version == FormatVersion::V3).then(|| result.rewritten_source.len() as u32);
        assert_eq!(header.source_size, expected_size);
    }
}

#[test]
fn stage_errors_are_distinguished() {
    let parse = obfuscate("def broken(:\n", &ObfuscationOptions::default()).unwrap_err();
    assert!(matches!(parse, ObfuscateError::Parse(_)));

    let compile = obfuscate("return 1\n", &ObfuscationOptions::default()).unwrap_err();
    assert!(matches!(compile, ObfuscateError::Compile(_)));
    assert!(compile.to_string().starts_with("compile stage failed"));
}
