//! Inserts inert `NOP` runs into compiled code objects.
//!
//! Padding works on the instruction stream of an already validated [`CodeObject`] and on
//! every code object nested in its constant pool, innermost first. Jump operands and the
//! line table are remapped to the new instruction positions. The rebuilt object goes back
//! through [`CodeObject::new`]; if that fails, the original unit is kept as it was.

use murk_core::code::{CodeObject, CodeParts, Constant, LineEntry, LineTable};
use murk_core::decoder::Instruction;
use murk_core::encoder::encode;
use murk_core::opcode::{MAX_ARG, Opcode};
use murk_utils::errors::PadError;
use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Smallest accepted filler ratio.
pub const MIN_FILLER_RATIO: f64 = 0.05;
/// Largest accepted filler ratio.
pub const MAX_FILLER_RATIO: f64 = 0.5;

/// Configuration for instruction padding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PadConfig {
    /// Filler budget per unit as a share of its instruction count
    pub ratio: f64,
    /// Longest run of fillers inserted in one place
    pub max_consecutive: usize,
    /// Chance of starting a run before any given instruction
    pub probability: f64,
}

impl Default for PadConfig {
    fn default() -> Self {
        Self {
            ratio: 0.2,
            max_consecutive: 5,
            probability: 0.3,
        }
    }
}

impl PadConfig {
    /// Clamps the ratio to `[MIN_FILLER_RATIO, MAX_FILLER_RATIO]`, the probability to
    /// `[0, 1]` and the run length to at least one.
    pub fn clamped(self) -> Self {
        Self {
            ratio: self.ratio.clamp(MIN_FILLER_RATIO, MAX_FILLER_RATIO),
            max_consecutive: if self.max_consecutive == 0 { 1 } else { self.max_consecutive },
            probability: self.probability.clamp(0.0, 1.0),
        }
    }

    /// Most fillers a unit of `instructions` instructions may receive.
    pub fn budget(&self, instructions: usize) -> usize {
        (instructions as f64 * self.ratio).floor() as usize
    }
}

/// What a padding run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PadReport {
    /// Fillers inserted across all units.
    pub fillers_inserted: usize,
    /// Units rebuilt with padding.
    pub units_padded: usize,
    /// Units kept unpadded because the rebuilt object failed validation.
    pub units_skipped: usize,
}

/// Pads `code` and its nested units. Never fails: a unit that cannot be rebuilt is
/// returned unpadded and counted in [`PadReport::units_skipped`].
pub fn pad(code: &CodeObject, config: &PadConfig, rng: &mut StdRng) -> (CodeObject, PadReport) {
    let config = config.clamped();
    let mut report = PadReport::default();
    let padded = pad_unit(code, &config, rng, &mut report);
    debug!(
        "padded {} units with {} fillers ({} skipped)",
        report.units_padded, report.fillers_inserted, report.units_skipped
    );
    (padded, report)
}

fn pad_unit(
    code: &CodeObject,
    config: &PadConfig,
    rng: &mut StdRng,
    report: &mut PadReport,
) -> CodeObject {
    let mut nested = PadReport::default();
    match try_pad_unit(code, config, rng, &mut nested) {
        Ok(padded) => {
            report.fillers_inserted += nested.fillers_inserted;
            report.units_padded += nested.units_padded;
            report.units_skipped += nested.units_skipped;
            padded
        }
        Err(err) => {
            warn!("keeping '{}' unpadded: {}", code.name(), err);
            report.units_skipped += 1;
            code.clone()
        }
    }
}

fn try_pad_unit(
    code: &CodeObject,
    config: &PadConfig,
    rng: &mut StdRng,
    report: &mut PadReport,
) -> Result<CodeObject, PadError> {
    let mut parts: CodeParts = code.to_parts();

    parts.constants = code
        .constants()
        .iter()
        .map(|constant| match constant {
            Constant::Code(inner) => Constant::Code(Box::new(pad_unit(inner, config, rng, report))),
            other => other.clone(),
        })
        .collect();

    let original = code.instructions();
    let budget = config.budget(original.len());
    let mut out: Vec<Instruction> = Vec::with_capacity(original.len() + budget);
    let mut new_index = Vec::with_capacity(original.len());
    let mut inserted = 0;

    for ins in &original {
        if inserted < budget && rng.random_bool(config.probability) {
            let run = rng.random_range(1..=config.max_consecutive).min(budget - inserted);
            out.extend(std::iter::repeat_n(Instruction::new(Opcode::Nop, 0), run));
            inserted += run;
        }
        new_index.push(out.len());
        out.push(*ins);
    }

    for (index, ins) in out.iter_mut().enumerate() {
        ins.index = index;
        if ins.opcode.is_jump() {
            let target = new_index[usize::from(ins.arg)];
            ins.arg = u16::try_from(target).map_err(|_| PadError::IndexOverflow(target))?;
        }
    }
    if out.len() > MAX_ARG + 1 {
        return Err(PadError::IndexOverflow(out.len()));
    }

    // Rebuilt tables are always written in the expanded form.
    let lines = code
        .lines()
        .normalized(code.first_line())
        .into_iter()
        .map(|entry| LineEntry {
            start: if entry.start == 0 { 0 } else { new_index[entry.start] },
            line: entry.line,
        })
        .collect();
    parts.lines = LineTable::Expanded(lines);
    parts.code = encode(&out);
    parts.stack_size = code.stack_size().saturating_add(config.max_consecutive as u32);

    let padded = CodeObject::new(parts)?;
    report.fillers_inserted += inserted;
    report.units_padded += 1;
    debug!("'{}': {} fillers in {} instructions", code.name(), inserted, original.len());
    Ok(padded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use murk_core::vm::Vm;
    use murk_core::{compile, parse};
    use rand::SeedableRng;

    const PROGRAM: &str = "def fib(n):\n    a = 0\n    b = 1\n    for i in range(n):\n        t = a + b\n        a = b\n        b = t\n    return a\n\nfor k in range(12):\n    if k % 3 == 0 or k == 11:\n        print(k, fib(k))\n";

    fn run(code: &CodeObject) -> Vec<String> {
        let mut vm = Vm::new();
        vm.run(code).unwrap();
        vm.take_output()
    }

    #[test]
    fn budget_is_respected_per_unit() {
        let code = compile(&parse(PROGRAM).unwrap(), "p.mk").unwrap();
        for ratio in [0.05, 0.1, 0.25, 0.5] {
            let config = PadConfig {
                ratio,
                probability: 1.0,
                ..PadConfig::default()
            };
            let mut rng = StdRng::seed_from_u64(3);
            let (padded, report) = pad(&code, &config, &mut rng);
            let limit: usize = std::iter::once(&code)
                .chain(code.nested())
                .map(|unit| config.budget(unit.instruction_count()))
                .sum();
            assert!(report.fillers_inserted <= limit);
            assert_eq!(
                padded.total_instruction_count(),
                code.total_instruction_count() + report.fillers_inserted
            );
        }
    }

    #[test]
    fn padding_preserves_behaviour() {
        let code = compile(&parse(PROGRAM).unwrap(), "p.mk").unwrap();
        let expected = run(&code);
        for seed in 0..8 {
            let mut rng = StdRng::seed_from_u64(seed);
            let (padded, report) = pad(&code, &PadConfig { ratio: 0.5, ..PadConfig::default() }, &mut rng);
            assert_eq!(report.units_skipped, 0);
            assert_eq!(run(&padded), expected, "seed {seed}");
        }
    }

    #[test]
    fn stack_bound_grows_by_run_length() {
        let code = compile(&parse(PROGRAM).unwrap(), "p.mk").unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let (padded, _) = pad(&code, &PadConfig::default(), &mut rng);
        assert_eq!(padded.stack_size(), code.stack_size() + 5);
        assert!(matches!(padded.lines(), LineTable::Expanded(_)));
    }

    #[test]
    fn ratio_is_clamped() {
        let config = PadConfig {
            ratio: 3.0,
            max_consecutive: 0,
            probability: 2.0,
        }
        .clamped();
        assert_eq!(config.ratio, MAX_FILLER_RATIO);
        assert_eq!(config.max_consecutive, 1);
        assert_eq!(config.probability, 1.0);
    }

    #[test]
    fn unrebuildable_unit_is_kept() {
        // a jump over a long filler-free stretch whose target moves past the operand range
        let mut instructions = vec![Instruction::new(Opcode::JumpAbsolute, 65_533)];
        instructions.extend(std::iter::repeat_n(Instruction::new(Opcode::Nop, 0), 65_532));
        instructions.push(Instruction::new(Opcode::LoadConst, 0));
        instructions.push(Instruction::new(Opcode::ReturnValue, 0));
        let code = CodeObject::new(CodeParts {
            name: "big".to_string(),
            filename: "big.mk".to_string(),
            first_line: 1,
            stack_size: 1,
            code: encode(&instructions),
            constants: vec![Constant::None],
            ..CodeParts::default()
        })
        .unwrap();

        let config = PadConfig {
            ratio: 0.5,
            probability: 1.0,
            ..PadConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(0);
        let (padded, report) = pad(&code, &config, &mut rng);
        assert_eq!(padded, code);
        assert_eq!(report.units_skipped, 1);
        assert_eq!(report.fillers_inserted, 0);
    }
}
