use super::ShellLauncher;
use crate::quoting::ShellFamily;
use tokio::process::Command;

/// Runs command lines through `sh -c`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PosixShell;

impl ShellLauncher for PosixShell {
    fn family(&self) -> ShellFamily {
        ShellFamily::Posix
    }

    fn command(&self, command_line: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(command_line);
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_line_as_single_argument() {
        let command = PosixShell.command("echo 'a b' && true");
        let std = command.as_std();
        assert_eq!(std.get_program(), "sh");
        let args: Vec<_> = std.get_args().collect();
        assert_eq!(args, vec!["-c", "echo 'a b' && true"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_interprets_operators() {
        let output = PosixShell
            .command("printf one; printf ' two' | cat")
            .output()
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout), "one two");
    }
}
