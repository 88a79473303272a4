//! Runs the binary against a long job and terminates it with SIGTERM.
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// True while the process exists and is not a zombie.
fn process_alive(pid: i32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit_once(')')
            .map(|(_, rest)| !rest.trim_start().starts_with('Z'))
            .unwrap_or(false),
        Err(_) => false,
    }
}

fn wait_for_pid_file(path: &Path) -> i32 {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Ok(raw) = std::fs::read_to_string(path) {
            if let Ok(pid) = raw.trim().parse() {
                return pid;
            }
        }
        assert!(Instant::now() < deadline, "job never wrote its pid");
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn test_sigterm_cancels_running_job_and_exits_with_status_1() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("job.pid");
    let config_path = dir.path().join("jobguard.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
            [watcher]
            poll_interval_ms = 100

            [[jobs]]
            id = "job-X"
            command = "sh"
            args = ["-c", "echo $$ > {}; exec sleep 30"]
            "#,
            pid_file.display()
        ),
    )
    .unwrap();

    let mut child = Command::new(env!("CARGO_BIN_EXE_jobguard"))
        .arg("--config")
        .arg(&config_path)
        .env("LOG_LEVEL", "debug")
        .env("NO_COLOR", "1")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let (tx, rx) = mpsc::channel();
    let stdout = child.stdout.take().unwrap();
    let reader = std::thread::spawn(move || {
        for line in BufReader::new(stdout).lines().map_while(Result::ok) {
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    // Registration is logged right after the job is spawned.
    let mut lines = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(10);
    while !lines.iter().any(|l: &String| l.contains("job registered")) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let line = rx
            .recv_timeout(remaining)
            .expect("job was never registered");
        lines.push(line);
    }
    let job_pid = wait_for_pid_file(&pid_file);
    assert!(process_alive(job_pid));

    kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM).unwrap();
    let status = child.wait().unwrap();
    assert_eq!(status.code(), Some(1));

    reader.join().unwrap();
    lines.extend(rx.try_iter());
    let cancellations = lines
        .iter()
        .filter(|l| l.contains("job-X successfully cancelled"))
        .count();
    assert_eq!(cancellations, 1, "log was:\n{}", lines.join("\n"));

    let deadline = Instant::now() + Duration::from_secs(5);
    while process_alive(job_pid) {
        assert!(Instant::now() < deadline, "job {job_pid} survived shutdown");
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn test_dry_run_prints_resolved_config() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("jobguard.toml");
    std::fs::write(
        &config_path,
        r#"
        [[jobs]]
        id = "job-A"
        command = "true"
        "#,
    )
    .unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_jobguard"))
        .arg("--config")
        .arg(&config_path)
        .arg("--dry-run")
        .env("LOG_LEVEL", "error")
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("id = \"job-A\""));
    assert!(stdout.contains("poll_interval_ms = 1000"));
}
