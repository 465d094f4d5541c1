use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

fn jaiph_command(dir: &Path) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_jaiph"));
    command
        .current_dir(dir)
        .env("JAIPH_ISOLATION", "none")
        .env("JAIPH_RUNS_DIR", dir.join("runs"))
        .env("XDG_CONFIG_HOME", dir.join("xdg"))
        .env("NO_COLOR", "1")
        .env_remove("JAIPH_DEBUG")
        .env_remove("JAIPH_STDLIB")
        .env_remove("JAIPH_AGENT_COMMAND")
        .env_remove("JAIPH_AGENT_MODEL")
        .env_remove("JAIPH_RUN_DIR")
        .env_remove("JAIPH_EVENT_FD");
    command
}

fn jaiph(dir: &Path, args: &[&str]) -> Output {
    jaiph_command(dir).args(args).output().unwrap()
}

fn write(dir: &Path, name: &str, source: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, source).unwrap();
    path
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn run_dirs(dir: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(dir.join("runs"))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    dirs
}

#[test]
fn passing_run_prints_tree_and_banner() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "flow.jph",
        "rule ok {\n  echo checked\n}\n\nworkflow default {\n  ensure ok\n  echo \"hello $1\"\n}\n",
    );

    let output = jaiph(dir.path(), &["run", "flow.jph", "world"]);
    let out = stdout(&output);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert!(out.starts_with("workflow default\n"), "{out}");
    assert!(out.contains("└── rule ok ("), "{out}");
    assert!(out.contains("checked\n"), "{out}");
    assert!(out.contains("hello world\n"), "{out}");
    assert!(out.contains("✓ PASS workflow default ("), "{out}");
}

#[test]
fn file_path_as_first_argument_means_run() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "flow.jph", "workflow default {\n  echo \"args: $*\"\n}\n");

    let output = jaiph(dir.path(), &["flow.jph", "x", "--flag"]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("args: x --flag\n"));
}

#[test]
fn missing_default_workflow_fails() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "flow.jph", "workflow other {\n  echo nope\n}\n");

    let output = jaiph(dir.path(), &["run", "flow.jph"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("jaiph run requires workflow 'default' in the input file"));
}

#[test]
fn failing_rule_reports_summary_and_logs() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "flow.jph",
        "rule broken {\n  echo \"disk is full\" >&2\n  exit 3\n}\n\nworkflow default {\n  ensure broken\n  echo unreachable\n}\n",
    );

    let output = jaiph(dir.path(), &["run", "flow.jph"]);
    let out = stdout(&output);
    let err = stderr(&output);
    assert_eq!(output.status.code(), Some(3), "{err}");
    assert!(out.contains("└── rule broken ("), "{out}");
    assert!(out.contains("failed)"), "{out}");
    assert!(!out.contains("unreachable"));
    assert!(err.contains("✗ FAIL workflow default ("), "{err}");
    assert!(err.contains("\n  disk is full\n"), "{err}");
    assert!(err.contains("  Logs: "), "{err}");
    assert!(err.contains("flow__rule_broken.out"), "{err}");
    assert!(err.contains("flow__rule_broken.err"), "{err}");

    let runs = run_dirs(dir.path());
    assert_eq!(runs.len(), 1);
    let logged: Vec<String> = fs::read_dir(&runs[0])
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    let rule_err = logged
        .iter()
        .find(|name| name.ends_with("-flow__rule_broken.err"))
        .expect("rule stderr captured");
    let captured = fs::read_to_string(runs[0].join(rule_err)).unwrap();
    assert_eq!(captured, "disk is full\n");
}

#[test]
fn prompt_step_invokes_agent_and_logs_prompt() {
    let dir = TempDir::new().unwrap();
    let agent = write(dir.path(), "agent.sh", "#!/bin/sh\nfor last; do :; done\necho \"agent got: $last\"\n");
    fs::set_permissions(&agent, fs::Permissions::from_mode(0o755)).unwrap();
    write(
        dir.path(),
        "flow.jph",
        "workflow default {\n  prompt \"hello from prompt\"\n}\n",
    );

    let output = jaiph_command(dir.path())
        .env("JAIPH_AGENT_COMMAND", &agent)
        .args(["run", "flow.jph"])
        .output()
        .unwrap();
    let out = stdout(&output);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert!(out.contains("└── prompt prompt ("), "{out}");
    assert!(out.contains("agent got: hello from prompt"), "{out}");

    let runs = run_dirs(dir.path());
    assert_eq!(runs.len(), 1);
    let name = runs[0].file_name().unwrap().to_string_lossy().into_owned();
    let bytes = name.as_bytes();
    assert_eq!(bytes[4], b'-');
    assert_eq!(bytes[10], b'T');
    assert_eq!(&name[19..21], "Z-");

    let prompt_log = fs::read_dir(&runs[0])
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .find(|path| path.to_string_lossy().ends_with("-jaiph__prompt.out"))
        .expect("prompt log");
    let logged = fs::read_to_string(prompt_log).unwrap();
    assert!(logged.starts_with("Prompt:\nhello from prompt\n\n"), "{logged}");
    assert!(logged.contains("agent got: hello from prompt\n"));
}

#[test]
fn debug_mode_traces_the_entrypoint() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "flow.jph", "workflow default {\n  echo traced\n}\n");

    let output = jaiph_command(dir.path())
        .env("JAIPH_DEBUG", "true")
        .args(["run", "flow.jph"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
    let err = stderr(&output);
    assert!(
        err.lines().any(|line| line.starts_with('+') && line.contains("flow__workflow_default")),
        "{err}"
    );
}

#[test]
fn interrupt_stops_the_whole_process_group() {
    let dir = TempDir::new().unwrap();
    let pid_file = dir.path().join("sleeper.pid");
    write(
        dir.path(),
        "flow.jph",
        "workflow default {\n  sleep 30 &\n  echo \"$!\" > \"$JAIPH_WORKSPACE/sleeper.pid\"\n  wait\n}\n",
    );

    let mut child: Child = jaiph_command(dir.path())
        .args(["run", "flow.jph"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let sleeper: i32 = loop {
        if let Some(pid) = fs::read_to_string(&pid_file)
            .ok()
            .and_then(|text| text.trim().parse().ok())
        {
            break pid;
        }
        assert!(Instant::now() < deadline, "workflow never started");
        thread::sleep(Duration::from_millis(50));
    };

    unsafe {
        libc::kill(child.id() as i32, libc::SIGINT);
    }
    let deadline = Instant::now() + Duration::from_secs(10);
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break status;
        }
        assert!(Instant::now() < deadline, "jaiph did not exit after SIGINT");
        thread::sleep(Duration::from_millis(50));
    };
    assert_ne!(status.code(), Some(0));

    let deadline = Instant::now() + Duration::from_secs(5);
    while is_alive(sleeper) {
        assert!(Instant::now() < deadline, "background job survived the interrupt");
        thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn mutually_importing_modules_run_to_completion() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.jph", "import \"b\" as b\nworkflow default {\n  ensure b.ready\n}\n");
    write(dir.path(), "b.jph", "import \"a\" as a\nrule ready {\n  echo ready\n}\n");

    let mut child = jaiph_command(dir.path())
        .args(["run", "a.jph"])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    let deadline = Instant::now() + Duration::from_secs(20);
    while child.try_wait().unwrap().is_none() {
        if Instant::now() >= deadline {
            child.kill().unwrap();
            panic!("run of cyclic imports did not finish");
        }
        thread::sleep(Duration::from_millis(50));
    }
    let output = child.wait_with_output().unwrap();
    let out = stdout(&output);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert!(out.contains("└── rule b.ready ("), "{out}");
    assert!(out.contains("✓ PASS workflow default ("), "{out}");
}

fn is_alive(pid: i32) -> bool {
    match fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .is_some_and(|state| state != "Z"),
        Err(_) => unsafe { libc::kill(pid, 0) == 0 },
    }
}

#[test]
fn build_reports_outputs_and_errors() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "flow.jph", "workflow default {\n  echo hi\n}\n");

    let output = jaiph(dir.path(), &["build", "--target", "out", "."]);
    assert_eq!(output.status.code(), Some(0));
    let expected = dir.path().join("out/flow.sh");
    assert_eq!(stdout(&output), format!("built {}\n", expected.display()));

    let empty = TempDir::new().unwrap();
    let output = jaiph(empty.path(), &["build"]);
    assert_eq!(stdout(&output), "no .jph files found\n");

    write(dir.path(), "bad.jph", "workflow default {\n  run bad!ref\n}\n");
    let output = jaiph(dir.path(), &["build", "bad.jph"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("bad.jph:2:1 E_PARSE run must target a workflow reference"), "{}", stderr(&output));
}

#[test]
fn init_scaffolds_workspace() {
    let dir = TempDir::new().unwrap();
    let output = jaiph(dir.path(), &["init"]);
    assert_eq!(output.status.code(), Some(0));
    assert!(stdout(&output).contains("Jaiph init"));
    assert!(dir.path().join(".jaiph/bootstrap.jph").is_file());
    assert!(dir.path().join(".jaiph/config.toml").is_file());
}

#[test]
fn version_flag() {
    let dir = TempDir::new().unwrap();
    let output = jaiph(dir.path(), &["--version"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout(&output), format!("jaiph {}\n", env!("CARGO_PKG_VERSION")));
}
