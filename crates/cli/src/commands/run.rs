/// Module for the `run` subcommand, which executes a source file or a container.
use async_trait::async_trait;
use clap::Args;
use murk_core::container::{is_container, read_container};
use murk_core::vm::Vm;
use murk_core::{compile, parse, CodeObject};
use std::error::Error;
use std::path::PathBuf;

/// Arguments for the `run` subcommand.
#[derive(Args)]
pub struct RunArgs {
    /// Source file or container to execute.
    pub input: PathBuf,
}

#[async_trait]
impl super::Command for RunArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let bytes = super::read_input(&self.input)?;
        let code = load(&bytes, &self.input.display().to_string())?;
        Vm::new().with_echo(true).run(&code)?;
        Ok(())
    }
}

/// Decodes a container, or compiles the bytes as source when they carry no container magic.
pub fn load(bytes: &[u8], filename: &str) -> Result<CodeObject, Box<dyn Error>> {
    if is_container(bytes) {
        let (header, code) = read_container(bytes)?;
        tracing::debug!("loaded {:?} container", header.version);
        return Ok(code);
    }
    let source = std::str::from_utf8(bytes)?;
    Ok(compile(&parse(source)?, filename)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use murk_core::container::{container_bytes, ContainerHeader, FormatVersion};

    const SOURCE: &str = "total = 0\nfor i in range(5):\n    total += i\nprint(total)\n";

    fn output(code: &CodeObject) -> Vec<String> {
        let mut vm = Vm::new();
        vm.run(code).unwrap();
        vm.take_output()
    }

    #[test]
    fn source_and_container_run_the_same() {
        let from_source = load(SOURCE.as_bytes(), "s.mk").unwrap();
        let header = ContainerHeader::new(FormatVersion::V2, SOURCE.len());
        let from_container = load(&container_bytes(&from_source, &header), "s.mrk").unwrap();
        assert_eq!(output(&from_source), vec!["10"]);
        assert_eq!(output(&from_container), vec!["10"]);
    }

    #[test]
    fn bad_source_is_reported() {
        assert!(load(b"def (\n", "bad.mk").is_err());
        assert!(load(&[0xff, 0xfe], "bin").is_err());
    }
}
