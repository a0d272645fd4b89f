use anyhow::Result;
use std::fs;
use std::process::Command;
use tempfile::TempDir;

/// Integration tests for `ralph run`, exercised against a real git repo and
/// a stub "agent" (a shell script standing in for a coding-agent CLI).

fn init_repo(dir: &std::path::Path) {
    Command::new("git")
        .args(["init", "--initial-branch=main"])
        .current_dir(dir)
        .output()
        .unwrap();
    Command::new("git")
        .args(["config", "user.email", "test@test.local"])
        .current_dir(dir)
        .output()
        .unwrap();
    Command::new("git")
        .args(["config", "user.name", "Test"])
        .current_dir(dir)
        .output()
        .unwrap();
}

fn write_stub_agent(dir: &std::path::Path, name: &str, script: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, script).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
    }
    path
}

fn ralph_cmd(cwd: &std::path::Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_ralph"));
    cmd.current_dir(cwd).env("HOME", cwd);
    cmd
}

#[test]
fn run_closes_a_single_task_against_a_stub_agent() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let temp_path = temp_dir.path();
    init_repo(temp_path);

    let agent_path = write_stub_agent(
        temp_path,
        "stub-agent.sh",
        "#!/bin/sh\necho '<promise>COMPLETE</promise>'\n",
    );

    fs::create_dir_all(temp_path.join(".ralph-tui"))?;
    fs::write(
        temp_path.join(".ralph-tui/config.toml"),
        format!(
            "agent = \"custom\"\ncommand = \"{}\"\nmaxIterations = 3\n",
            agent_path.display()
        ),
    )?;

    fs::write(
        temp_path.join("PRD.json"),
        r#"{"userStories": [{"id": "TASK-1", "title": "do the thing", "passes": false}]}"#,
    )?;

    let output = ralph_cmd(temp_path).arg("run").output()?;
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "run should succeed, stderr: {stderr}");

    let prd = fs::read_to_string(temp_path.join("PRD.json"))?;
    assert!(prd.contains("\"passes\": true"), "task should be marked closed: {prd}");

    assert!(!temp_path.join(".ralph-tui/session.json").exists());

    Ok(())
}

#[test]
fn run_with_no_tasks_is_a_no_op_success() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let temp_path = temp_dir.path();
    init_repo(temp_path);

    fs::create_dir_all(temp_path.join(".ralph-tui"))?;
    fs::write(
        temp_path.join(".ralph-tui/config.toml"),
        "agent = \"custom\"\ncommand = \"true\"\n",
    )?;
    fs::write(temp_path.join("PRD.json"), r#"{"userStories": []}"#)?;

    let output = ralph_cmd(temp_path).arg("run").arg("--no-setup").output()?;
    assert!(output.status.success());

    Ok(())
}

#[test]
fn run_rejects_missing_agent_configuration() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let temp_path = temp_dir.path();
    init_repo(temp_path);
    fs::write(temp_path.join("PRD.json"), r#"{"userStories": []}"#)?;

    let output = ralph_cmd(temp_path).arg("run").output()?;
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(2));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no agent configured"), "stderr: {stderr}");

    Ok(())
}

#[test]
fn run_rejects_unknown_tracker() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let temp_path = temp_dir.path();
    init_repo(temp_path);

    let output = ralph_cmd(temp_path)
        .arg("run")
        .arg("--agent")
        .arg("custom")
        .arg("--tracker")
        .arg("not-a-real-tracker")
        .output()?;

    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(2));

    Ok(())
}

#[test]
fn second_run_in_the_same_directory_hits_a_lock_conflict() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let temp_path = temp_dir.path();
    init_repo(temp_path);

    let agent_path = write_stub_agent(temp_path, "stub-agent.sh", "#!/bin/sh\nsleep 2\n");

    fs::create_dir_all(temp_path.join(".ralph-tui"))?;
    fs::write(
        temp_path.join(".ralph-tui/config.toml"),
        format!(
            "agent = \"custom\"\ncommand = \"{}\"\nmaxIterations = 1\n",
            agent_path.display()
        ),
    )?;
    fs::write(
        temp_path.join("PRD.json"),
        r#"{"userStories": [{"id": "TASK-1", "title": "slow task", "passes": false}]}"#,
    )?;

    let mut first = ralph_cmd(temp_path).arg("run").arg("--no-setup").spawn()?;

    // Give the first process time to acquire the session lock before the
    // second one tries.
    std::thread::sleep(std::time::Duration::from_millis(400));

    let second = ralph_cmd(temp_path).arg("run").arg("--no-setup").output()?;
    assert!(!second.status.success());
    assert_eq!(second.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&second.stderr);
    assert!(stderr.contains("already holds the lock"), "stderr: {stderr}");

    first.wait()?;
    Ok(())
}
