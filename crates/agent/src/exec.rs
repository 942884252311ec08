use std::process::Command;
use std::time::Duration;
use tokio::time::timeout;

/// Runs one shell command to completion (or until `budget` expires) and
/// returns the text an operator would see. `CANCEL_TIMEOUT`/`CANCEL_MANUAL`
/// are not shell commands — they're the hub's own cancellation notices and
/// get a fixed reply instead of being executed.
pub async fn execute_command(cmd: String, budget: Duration) -> String {
    if cmd == "CANCEL_TIMEOUT" {
        return "Command cancelled: exceeded the hub's timeout".to_string();
    }
    if cmd == "CANCEL_MANUAL" {
        return "Command cancelled by the operator".to_string();
    }

    let handle = tokio::task::spawn_blocking(move || run_shell(&cmd));
    match timeout(budget, handle).await {
        Ok(Ok(output)) => output,
        Ok(Err(_)) => "ERROR: command task panicked".to_string(),
        Err(_) => "ERROR: command timed out".to_string(),
    }
}

fn run_shell(cmd: &str) -> String {
    let output = if cfg!(target_os = "windows") {
        Command::new("cmd").arg("/C").arg(cmd).output()
    } else {
        Command::new("sh").arg("-c").arg(cmd).output()
    };

    match output {
        Ok(output) => {
            let mut result = String::from_utf8_lossy(&output.stdout).into_owned();
            if !output.stderr.is_empty() {
                result.push_str("\n[STDERR]:\n");
                result.push_str(&String::from_utf8_lossy(&output.stderr));
            }
            if result.trim().is_empty() {
                result = format!("Command executed. Return code: {}", output.status.code().unwrap_or(-1));
            }
            result
        }
        Err(e) => format!("ERROR running command: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_markers_short_circuit_without_running_a_shell() {
        let out = execute_command("CANCEL_TIMEOUT".to_string(), Duration::from_secs(1)).await;
        assert!(out.contains("timeout"));
        let out = execute_command("CANCEL_MANUAL".to_string(), Duration::from_secs(1)).await;
        assert!(out.contains("operator"));
    }

    #[tokio::test]
    async fn empty_output_falls_back_to_return_code() {
        let out = execute_command("true".to_string(), Duration::from_secs(5)).await;
        assert!(out.contains("Return code: 0"));
    }

    #[tokio::test]
    async fn stdout_is_captured() {
        let out = execute_command("echo hello".to_string(), Duration::from_secs(5)).await;
        assert!(out.contains("hello"));
    }
}
