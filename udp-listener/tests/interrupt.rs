#![cfg(unix)]

use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};

#[test]
fn test_ctrl_c_exits_cleanly() {
    let mut child = Command::new(env!("CARGO_BIN_EXE_udp-listener"))
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    let mut stdout = BufReader::new(child.stdout.take().unwrap());

    let mut first = String::new();
    stdout.read_line(&mut first).unwrap();
    assert_eq!(first.trim_end(), "[INFO] Starting to listen at localhost:40002.");

    // Let the listener settle into its receive wait.
    std::thread::sleep(std::time::Duration::from_millis(300));
    let killed = Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(killed.success());

    let rest: Vec<String> = stdout.lines().map(|l| l.unwrap()).collect();
    let status = child.wait().unwrap();

    dbg!(&rest);

    assert!(status.success());
    assert_eq!(rest, vec!["[INFO] User exit.".to_string()]);
}
