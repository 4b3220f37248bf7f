use conshell::{
    ChannelSink, Engine, EngineConfig, console::Console, quoting::ShellFamily,
    utils::logging::init_test_logging,
};
use std::{sync::Arc, time::Duration};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

fn console(dir: &TempDir) -> (Console, UnboundedReceiver<String>) {
    init_test_logging();
    let (sink, rx) = ChannelSink::new();
    let config = EngineConfig {
        process_log_dir: dir.path().join("logs"),
        enable_process_logging: false,
        ..EngineConfig::default()
    };
    let engine = Engine::new(config, Arc::new(sink));
    (Console::new(engine).with_family(ShellFamily::Posix), rx)
}

fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(line) = rx.try_recv() {
        lines.push(line);
    }
    lines
}

#[tokio::test]
async fn test_help_lists_every_verb() {
    let dir = TempDir::new().unwrap();
    let (console, mut rx) = console(&dir);

    console.handle_line("help").await;
    let lines = drain(&mut rx);
    assert_eq!(lines.len(), 5, "{lines:?}");
    assert!(lines[0].ends_with("Shell commands:"));
    for verb in ["run", "input", "list", "stop"] {
        assert!(
            lines.iter().any(|l| l.starts_with(&format!("§f{verb} "))),
            "{verb} missing from {lines:?}"
        );
    }
}

#[tokio::test]
async fn test_validation_errors_use_error_prefix() {
    let dir = TempDir::new().unwrap();
    let (console, mut rx) = console(&dir);
    let missing_dir = format!("run -d {} ls", dir.path().join("missing").display());

    for (line, expected) in [
        ("run -t never ls", "Invalid timeout value"),
        ("stop abc", "Invalid process id"),
        ("run -e dev", "No command specified"),
        ("input 1", "Usage: input <id> <text>"),
        (missing_dir.as_str(), "Working directory does not exist"),
    ] {
        console.handle_line(line).await;
        let lines = drain(&mut rx);
        assert_eq!(lines.len(), 1, "{line}: {lines:?}");
        assert!(lines[0].starts_with("§8[§cShell§8]§c "), "{line}: {lines:?}");
        assert!(lines[0].contains(expected), "{line}: {lines:?}");
    }
    assert!(console.engine().active_ids().await.is_empty());
}

#[tokio::test]
async fn test_input_to_unknown_process_is_reported() {
    let dir = TempDir::new().unwrap();
    let (console, mut rx) = console(&dir);

    console.handle_line("input 4 hello").await;
    console.handle_line("stop 4").await;
    let lines = drain(&mut rx);
    assert_eq!(lines.len(), 2, "{lines:?}");
    assert!(lines.iter().all(|l| l.contains("No running process with that id")));
}

#[tokio::test]
async fn test_empty_list_is_a_warning() {
    let dir = TempDir::new().unwrap();
    let (console, mut rx) = console(&dir);

    console.handle_line("list").await;
    assert_eq!(
        drain(&mut rx),
        vec!["§8[§eShell§8]§e No running processes".to_string()]
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_run_with_redirect_and_quotes() {
    let dir = TempDir::new().unwrap();
    let (console, mut rx) = console(&dir);
    let target = dir.path().join("out.txt");

    console
        .handle_line(&format!(
            "run -d {} echo 'a  b' \"c|d\">out.txt && cat out.txt",
            dir.path().display()
        ))
        .await;

    let mut lines = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(line) = rx.recv().await {
            let done = line.contains("exited with code");
            lines.push(line);
            if done {
                break;
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(std::fs::read_to_string(&target).unwrap(), "a  b c|d\n");
    assert!(lines.iter().any(|l| l.ends_with("[1]§r a  b c|d")), "{lines:?}");
    assert!(lines.last().unwrap().ends_with("exited with code 0"));
}
