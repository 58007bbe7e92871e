//! Process invoker and end-to-end runs against real `/bin/sh` children.

#![cfg(unix)]

use std::path::Path;
use std::time::{Duration, Instant};

use autotest::report::NullSink;
use autotest::{Invoke, ProcessInvoker, RunConfig, Scheduler};
use autotest_core::{Catalog, CommandSpec, FaultCause, Status, TestCase, Termination};
use tokio_util::sync::CancellationToken;

fn sh(script: &str) -> CommandSpec {
    CommandSpec::shell(script)
}

async fn invoke(command: &CommandSpec, timeout: Duration) -> autotest_core::Outcome {
    ProcessInvoker::new()
        .invoke(command, timeout, &CancellationToken::new())
        .await
        .unwrap()
}

/// Whether `pid` names a live (non-zombie) process.
fn alive(pid: i32) -> bool {
    let stat = Path::new("/proc").join(pid.to_string()).join("stat");
    if Path::new("/proc/self").exists() {
        return match std::fs::read_to_string(stat) {
            // state is the field after the parenthesised command name
            Ok(text) => text.rsplit(')').next().is_some_and(|rest| !rest.trim_start().starts_with('Z')),
            Err(_) => false,
        };
    }
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

fn wait_until_dead(pid: i32, within: Duration) -> bool {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if !alive(pid) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    !alive(pid)
}

#[tokio::test]
async fn captures_stdout_stderr_and_exit_code() {
    let outcome = invoke(&sh("echo 'Test OK'; echo oops >&2; exit 3"), Duration::from_secs(10)).await;
    assert_eq!(outcome.termination, Termination::Exited(3));
    assert_eq!(outcome.stdout, "Test OK\n");
    assert_eq!(outcome.stderr, "oops\n");
    assert!(!outcome.truncated);
}

#[tokio::test]
async fn missing_binary_is_launch_failure_not_error() {
    let command = CommandSpec::parse("/nonexistent/autotest-binary --flag").unwrap();
    let outcome = invoke(&command, Duration::from_secs(5)).await;
    assert!(outcome.is_launch_failure());
    assert!(outcome.stdout.is_empty());
}

#[tokio::test]
async fn output_is_capped() {
    let invoker = ProcessInvoker::from_config(&RunConfig::new().with_max_output_bytes(64));
    let command = sh("i=0; while [ $i -lt 200 ]; do echo 0123456789; i=$((i+1)); done");
    let outcome = invoker
        .invoke(&command, Duration::from_secs(10), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.termination, Termination::Exited(0));
    assert_eq!(outcome.stdout.len(), 64);
    assert!(outcome.truncated);
}

#[tokio::test]
async fn environment_and_working_directory_are_applied() {
    let dir = tempfile::tempdir().unwrap();
    let command = sh("echo \"$AUTOTEST_MARK\"; pwd")
        .with_env("AUTOTEST_MARK", "marked")
        .with_cwd(dir.path());
    let outcome = invoke(&command, Duration::from_secs(10)).await;
    let mut lines = outcome.stdout.lines();
    assert_eq!(lines.next(), Some("marked"));
    let pwd = std::fs::canonicalize(lines.next().unwrap()).unwrap();
    assert_eq!(pwd, std::fs::canonicalize(dir.path()).unwrap());
}

#[tokio::test]
async fn timeout_kills_the_whole_process_group() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("descendant.pid");
    let script = format!("sleep 30 & echo $! > '{}'; sleep 5", pid_file.display());

    let started = Instant::now();
    let outcome = invoke(&sh(&script), Duration::from_secs(2)).await;
    let elapsed = started.elapsed();

    assert!(outcome.is_timed_out());
    assert!(elapsed >= Duration::from_secs(2), "returned early: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(4), "returned late: {:?}", elapsed);

    let pid: i32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
    assert!(wait_until_dead(pid, Duration::from_secs(2)), "descendant {} survived", pid);
}

#[tokio::test]
async fn cancellation_interrupts_a_running_child() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let outcome = ProcessInvoker::new()
        .invoke(&sh("sleep 10"), Duration::from_secs(30), &cancel)
        .await
        .unwrap();
    assert!(outcome.is_interrupted());
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn process_group_is_swept_after_normal_exit() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("descendant.pid");
    let script = format!("sleep 30 & echo $! > '{}'; echo 'Test OK'", pid_file.display());

    let started = Instant::now();
    let outcome = invoke(&sh(&script), Duration::from_secs(10)).await;
    assert_eq!(outcome.termination, Termination::Exited(0));
    assert!(outcome.stdout.contains("Test OK"));
    assert!(started.elapsed() < Duration::from_secs(5));

    let pid: i32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
    assert!(wait_until_dead(pid, Duration::from_secs(2)), "descendant {} survived", pid);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_run_kills_descendants_and_skips_exclusive() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("descendant.pid");
    let script = format!("sleep 30 & echo $! > '{}'; sleep 30", pid_file.display());

    let catalog = Catalog::builder()
        .parallel("A", sh(&script))
        .exclusive("B", sh("echo 'Test OK'"))
        .build()
        .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let watched = pid_file.clone();
    tokio::spawn(async move {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !watched.exists() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let scheduler = Scheduler::with_processes(RunConfig::new().with_concurrency(2));
    let report = scheduler.run(&catalog, &mut NullSink, &cancel).await;
    assert!(started.elapsed() < Duration::from_secs(10));

    let a = report.get("A").unwrap();
    assert_eq!(a.status(), Status::Errored);
    assert_eq!(a.verdict.cause, Some(FaultCause::Interrupted));
    assert_eq!(report.get("B").unwrap().status(), Status::Skipped);

    let pid: i32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
    assert!(wait_until_dead(pid, Duration::from_secs(2)), "descendant {} survived", pid);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scheduler_runs_real_processes() {
    let catalog = Catalog::builder()
        .parallel("ok_test", sh("echo 'Test OK'"))
        .parallel("bad_test", sh("exit 1"))
        .parallel("missing_bin", CommandSpec::parse("/nonexistent/missing_bin").unwrap())
        .push(TestCase::exclusive("sleepy", sh("sleep 5")).with_timeout(Duration::from_secs(2)))
        .build()
        .unwrap();

    let scheduler = Scheduler::with_processes(RunConfig::new().with_concurrency(2));
    let report = scheduler.run(&catalog, &mut NullSink, &CancellationToken::new()).await;

    assert_eq!(report.get("ok_test").unwrap().status(), Status::Passed);
    assert_eq!(report.get("bad_test").unwrap().status(), Status::Failed);

    let missing = report.get("missing_bin").unwrap();
    assert_eq!(missing.status(), Status::Errored);
    assert_eq!(missing.verdict.cause, Some(FaultCause::LaunchFailure));

    let sleepy = report.get("sleepy").unwrap();
    assert_eq!(sleepy.status(), Status::TimedOut);
    assert!(sleepy.duration >= Duration::from_secs(2));
    assert!(sleepy.duration < Duration::from_secs(4));

    assert!(!report.success());
    assert_eq!(report.summary().total, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn demo_catalog_passes() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("catalogs/demo.toml");
    let (catalog, settings) = autotest::cli::commands::load_catalog_file(&path).unwrap();

    let scheduler = Scheduler::with_processes(RunConfig::from_settings(&settings));
    let report = scheduler.run(&catalog, &mut NullSink, &CancellationToken::new()).await;

    let failures: Vec<_> = report.failures().map(|r| format!("{}: {}", r.name, r.verdict)).collect();
    assert!(failures.is_empty(), "{:?}", failures);
    assert_eq!(report.get("Feature probe autotest").unwrap().status(), Status::Skipped);
    assert_eq!(report.get("Timer autotest").unwrap().verdict.message, "5 samples");
}
