//! stdio-relay - run a child behind a line application and relay our stdio to it
//!
//! Every line read from our stdin is written to the child (restarting it if it
//! died), every line the child prints goes to our stdout, and termination info
//! is reported on stderr as JSON.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use stdio_app::{Error, ExitInfo, LineApplication, Result, SpawnSpec};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// How long the child gets to finish after its stdin is closed
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "stdio-relay")]
#[command(about = "Relay stdin lines to a supervised child process")]
struct Cli {
    /// TOML file describing the child to run
    #[arg(required_unless_present = "command", conflicts_with = "command")]
    spec: Option<PathBuf>,

    /// Command and arguments to run instead of a spec file (stderr is logged)
    #[arg(last = true)]
    command: Vec<String>,
}

impl Cli {
    fn spawn_spec(&self) -> Result<SpawnSpec> {
        if let Some((command, args)) = self.command.split_first() {
            return Ok(SpawnSpec::new(command.as_str())
                .args(args.iter().cloned())
                .with_logging(true));
        }
        match &self.spec {
            Some(path) => SpawnSpec::read_from_path(path),
            None => Err(Error::Config("No command or spec file given".to_string())),
        }
    }
}

/// Our exit status mirrors the child's; signals and odd codes map to 1
fn exit_status(info: &ExitInfo) -> u8 {
    info.code
        .and_then(|code| u8::try_from(code).ok())
        .unwrap_or(1)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("stdio_app=info,stdio_relay=info")),
        )
        .init();

    let cli = Cli::parse();
    match run(&cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<ExitCode> {
    let spec = cli.spawn_spec()?;
    let executable = spec.validate()?;
    tracing::info!("Relaying to {:?}", executable);

    let (close_tx, mut closes) = mpsc::unbounded_channel();
    let app = LineApplication::builder(spec)
        .on_stdout(|line| println!("{line}"))
        .on_stderr(|chunk| eprint!("{}", String::from_utf8_lossy(&chunk)))
        .on_close(move |info| {
            match serde_json::to_string(&info) {
                Ok(json) => eprintln!("{json}"),
                Err(e) => tracing::warn!("Failed to encode exit info: {}", e),
            }
            let _ = close_tx.send(info);
        })
        .spawn()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        app.ensure_is_running()?;
        if let Err(e) = app.stdin(&line) {
            tracing::warn!("Dropped input line: {}", e);
        }
    }

    // Forget children that already closed during the session
    while closes.try_recv().is_ok() {}
    if !app.is_running() {
        return Ok(ExitCode::SUCCESS);
    }

    app.close_stdin();
    let info = match tokio::time::timeout(SHUTDOWN_GRACE, closes.recv()).await {
        Ok(info) => info,
        Err(_) => {
            tracing::warn!("Child did not exit after stdin closed, terminating");
            app.terminate();
            closes.recv().await
        }
    };

    Ok(ExitCode::from(info.as_ref().map(exit_status).unwrap_or(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inline_command() {
        let cli = Cli::try_parse_from(["stdio-relay", "--", "cat", "-u"]).unwrap();
        let spec = cli.spawn_spec().unwrap();
        assert_eq!(spec.command, "cat");
        assert_eq!(spec.args, vec!["-u".to_string()]);
        assert!(spec.with_logging);
    }

    #[test]
    fn test_parse_spec_path() {
        let cli = Cli::try_parse_from(["stdio-relay", "relay.toml"]).unwrap();
        assert_eq!(cli.spec, Some(PathBuf::from("relay.toml")));
        assert!(cli.command.is_empty());
    }

    #[test]
    fn test_parse_usage_errors() {
        assert!(Cli::try_parse_from(["stdio-relay"]).is_err());
        assert!(Cli::try_parse_from(["stdio-relay", "relay.toml", "--", "cat"]).is_err());
    }

    #[test]
    fn test_missing_spec_file() {
        let cli = Cli::try_parse_from(["stdio-relay", "/nonexistent/relay.toml"]).unwrap();
        assert!(matches!(cli.spawn_spec(), Err(Error::Config(_))));
    }

    #[test]
    fn test_exit_status() {
        assert_eq!(exit_status(&ExitInfo::exited(0)), 0);
        assert_eq!(exit_status(&ExitInfo::exited(3)), 3);
        assert_eq!(exit_status(&ExitInfo::exited(-1)), 1);
        assert_eq!(exit_status(&ExitInfo::signaled("SIGTERM")), 1);
    }
}
