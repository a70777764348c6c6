use murk_core::code::{CodeObject, CodeParts, Constant};
use murk_core::decoder::Instruction;
use murk_core::encoder::encode;
use murk_core::opcode::Opcode;
use murk_tests::{compile_source, init_tracing, run_code};
use murk_transform::padder::{pad, PadConfig, MAX_FILLER_RATIO, MIN_FILLER_RATIO};
use rand::rngs::StdRng;
use rand::SeedableRng;

const PROGRAM: &str = "def collatz(n):\n    steps = 0\n    while n != 1:\n        if n % 2 == 0:\n            n = n // 2\n        else:\n            n = 3 * n + 1\n        steps += 1\n    return steps\n\nbest = 0\nfor start in range(1, 30):\n    s = collatz(start)\n    if s > best:\n        best = s\n        print(start, s)\n";

fn units(code: &CodeObject) -> Vec<&CodeObject> {
    let mut out = vec![code];
    for nested in code.nested() {
        out.extend(units(nested));
    }
    out
}

#[test]
fn budget_and_behaviour_across_ratios() {
    init_tracing();
    let code = compile_source(PROGRAM);
    let expected = run_code(&code);
    let mut ratio = MIN_FILLER_RATIO;
    while ratio <= MAX_FILLER_RATIO + 1e-9 {
        for seed in [1, 2, 3] {
            let config = PadConfig {
                ratio,
                probability: 0.6,
                ..PadConfig::default()
            };
            let mut rng = StdRng::seed_from_u64(seed);
            let (padded, report) = pad(&code, &config, &mut rng);

            for (before, after) in units(&code).into_iter().zip(units(&padded)) {
                let added = after.instruction_count() - before.instruction_count();
                assert!(added <= config.budget(before.instruction_count()));
                let fillers = after
                    .instructions()
                    .iter()
                    .filter(|ins| ins.opcode == Opcode::Nop)
                    .count();
                assert_eq!(fillers, added, "only fillers are inserted");
            }
            assert_eq!(report.units_skipped, 0);
            assert_eq!(run_code(&padded), expected, "ratio {ratio} seed {seed}");
        }
        ratio += 0.05;
    }
}

#[test]
fn out_of_range_ratio_is_clamped() {
    let code = compile_source(PROGRAM);
    let config = PadConfig {
        ratio: 5.0,
        probability: 1.0,
        ..PadConfig::default()
    };
    let mut rng = StdRng::seed_from_u64(0);
    let (padded, _) = pad(&code, &config, &mut rng);
    let limit = (code.instruction_count() as f64 * MAX_FILLER_RATIO).floor() as usize;
    assert!(padded.instruction_count() - code.instruction_count() <= limit);
}

#[test]
fn invalid_rebuild_falls_back_to_original() {
    let mut instructions = vec![Instruction::new(Opcode::JumpAbsolute, 65_534)];
    instructions.extend(std::iter::repeat_n(Instruction::new(Opcode::Nop, 0), 65_533));
    instructions.push(Instruction::new(Opcode::LoadConst, 0));
    instructions.push(Instruction::new(Opcode::ReturnValue, 0));
    let code = CodeObject::new(CodeParts {
        name: "huge".to_string(),
        filename: "huge.mk".to_string(),
        first_line: 1,
        stack_size: 1,
        code: encode(&instructions),
        constants: vec![Constant::None],
        ..CodeParts::default()
    })
    .unwrap();

    let mut rng = StdRng::seed_from_u64(8);
    let (padded, report) = pad(&code, &PadConfig { probability: 1.0, ..PadConfig::default() }, &mut rng);
    assert_eq!(padded, code);
    assert_eq!(report.units_skipped, 1);
    assert_eq!(report.units_padded, 0);
}
