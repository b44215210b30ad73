use std::process::Command;

use super::{CommandOutput, CommandRunner};
use crate::errors::Result;

/// Runs commands through `sh -c` on this machine.
#[derive(Debug, Default)]
pub struct LocalShell;

impl CommandRunner for LocalShell {
    fn execute(&mut self, command: &str) -> Result<CommandOutput> {
        let output = Command::new("sh").arg("-c").arg(command).output()?;
        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captures_streams_and_status() -> anyhow::Result<()> {
        let mut shell = LocalShell;
        let output = shell.execute("echo out; echo err >&2; exit 3")?;
        assert_eq!(output.status, 3);
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert!(!output.success());
        Ok(())
    }
}
