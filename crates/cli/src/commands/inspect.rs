/// Module for the `inspect` subcommand, which prints a container's header and disassembly.
use async_trait::async_trait;
use clap::Args;
use murk_core::container::{read_container, ContainerHeader};
use murk_core::CodeObject;
use std::error::Error;
use std::path::PathBuf;

/// Arguments for the `inspect` subcommand.
#[derive(Args)]
pub struct InspectArgs {
    /// Container file to inspect.
    pub input: PathBuf,
}

#[async_trait]
impl super::Command for InspectArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let bytes = super::read_input(&self.input)?;
        let (header, code) = read_container(&bytes)?;
        print!("{}", describe(&header, &code));
        Ok(())
    }
}

/// Renders header fields followed by the disassembly of every unit.
pub fn describe(header: &ContainerHeader, code: &CodeObject) -> String {
    let mut out = String::new();
    out.push_str(&format!("magic:       0x{}\n", hex::encode(header.version.magic())));
    out.push_str(&format!("version:     {}\n", header.version.to_byte()));
    if header.version.has_flags() {
        out.push_str(&format!("flags:       0x{:08x}\n", header.flags));
    }
    let created = header
        .created_at()
        .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "invalid".to_string());
    out.push_str(&format!("timestamp:   {} ({created})\n", header.timestamp));
    if let Some(size) = header.source_size {
        out.push_str(&format!("source size: {size} bytes\n"));
    }
    out.push_str(&format!(
        "units:       {} ({} instructions)\n\n",
        1 + count_nested(code),
        code.total_instruction_count()
    ));
    out.push_str(&code.disassemble());
    out
}

fn count_nested(code: &CodeObject) -> usize {
    code.nested().map(|inner| 1 + count_nested(inner)).sum()
}
