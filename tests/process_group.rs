use std::io::{BufRead, BufReader};
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use jaiph::harness::process::{ProcessGroup, Signal, exit_code};

fn is_gone(pid: i32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .is_some_and(|state| state == "Z"),
        Err(_) => unsafe { libc::kill(pid, 0) != 0 },
    }
}

#[test]
fn group_signal_reaches_background_children() {
    let mut leader = Command::new("sh")
        .args(["-c", "sleep 30 & echo $!; wait"])
        .stdout(Stdio::piped())
        .process_group(0)
        .spawn()
        .unwrap();
    let mut line = String::new();
    BufReader::new(leader.stdout.take().unwrap())
        .read_line(&mut line)
        .unwrap();
    let sleeper: i32 = line.trim().parse().unwrap();

    let group = ProcessGroup::from_pid(Some(leader.id())).unwrap();
    group.signal(Signal::Kill).unwrap();
    let status = leader.wait().unwrap();
    assert_eq!(exit_code(status), 128 + libc::SIGKILL);

    let deadline = Instant::now() + Duration::from_secs(5);
    while !is_gone(sleeper) {
        assert!(Instant::now() < deadline, "sleeper {sleeper} survived");
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn terminate_maps_to_exit_code() {
    let mut leader = Command::new("sleep")
        .arg("30")
        .process_group(0)
        .spawn()
        .unwrap();
    let group = ProcessGroup::from_pid(Some(leader.id())).unwrap();
    group.signal(Signal::Terminate).unwrap();
    let status = leader.wait().unwrap();
    assert_eq!(exit_code(status), 143);
}

#[test]
fn signalling_a_reaped_process_fails() {
    let mut child = Command::new("true").process_group(0).spawn().unwrap();
    let group = ProcessGroup::from_pid(Some(child.id())).unwrap();
    child.wait().unwrap();
    assert!(group.signal(Signal::Interrupt).is_err());
}
