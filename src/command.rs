use anyhow::{Context, Result, ensure};
use log::{debug, error, info};
use std::process::Stdio;
use tokio::process::Command;

/// Run a command to completion and return its stdout
///
/// # Arguments
/// * `argv` - Program followed by its arguments
///
/// # Returns
/// * `Ok(String)` - stdout if the command exited successfully
/// * `Err` - if the command could not be started or exited with a failure status
pub async fn run_command(argv: &[String]) -> Result<String> {
    let (program, args) = argv.split_first().context("failed to run command: empty argv")?;
    debug!("run {argv:?}");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .context(format!("failed to run {program}"))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

    ensure!(
        output.status.success(),
        "{program} failed with {} and stderr: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr).trim()
    );

    Ok(stdout)
}

/// Launch a command without waiting for it to finish
///
/// Success means the process was started. Its exit status is only logged by a
/// background task that reaps the child.
pub fn launch_command(argv: &[String]) -> Result<()> {
    let (program, args) = argv.split_first().context("failed to launch command: empty argv")?;
    info!("launch {argv:?}");

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context(format!("failed to launch {program}"))?;

    let program = program.clone();
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) if status.success() => debug!("{program} finished"),
            Ok(status) => error!("{program} exited with {status}"),
            Err(e) => error!("failed to wait for {program}: {e:#}"),
        }
    });

    Ok(())
}
