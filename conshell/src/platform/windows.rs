use super::ShellLauncher;
use crate::quoting::ShellFamily;
use tokio::process::Command;

/// Runs command lines through `cmd.exe /c`.
///
/// The line is appended verbatim so `cmd.exe` sees the quoting produced by
/// [`crate::quoting`] rather than a second layer of argument escaping.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsShell;

impl ShellLauncher for WindowsShell {
    fn family(&self) -> ShellFamily {
        ShellFamily::Windows
    }

    fn command(&self, command_line: &str) -> Command {
        let mut command = Command::new("cmd.exe");
        command.arg("/c");
        #[cfg(windows)]
        command.raw_arg(command_line);
        #[cfg(not(windows))]
        command.arg(command_line);
        command
    }
}
