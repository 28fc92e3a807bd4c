//! Engine integration tests against real processes
//!
//! `cargo test -p hive-exec --test engine_test`

#![cfg(unix)]

use futures::StreamExt;
use hive_exec::{
    Engine, EngineConfig, EngineEvent, Error, ExecOptions, KillOutcome, ProcessStatus,
    SessionOptions, ShellType, StreamKind, REDACTED,
};
use hive_foundation::SupervisorSettings;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn test_engine() -> Arc<Engine> {
    let config = EngineConfig {
        preferred_shell: Some(ShellType::Sh),
        supervisor: SupervisorSettings {
            enabled: false,
            grace_period_ms: 500,
            ..Default::default()
        },
        ..Default::default()
    };
    Engine::builder().config(config).build().expect("engine")
}

#[tokio::test]
async fn test_exec_echo() {
    let engine = test_engine();

    let result = engine.exec("echo hello", ExecOptions::default()).await.unwrap();
    assert_eq!(result.stdout(), "hello\n");
    assert_eq!(result.exit_code(), Some(0));
    assert!(result.success());
    assert!(result.stderr().is_empty());

    let pid = result.pid().unwrap();
    let record = engine.get_process(pid).unwrap();
    assert_eq!(record.status, ProcessStatus::Completed);

    engine.destroy().await;
}

#[tokio::test]
async fn test_exec_timeout_kills_process() {
    let engine = test_engine();
    let mut events = engine.receiver();

    let started = Instant::now();
    let err = engine
        .exec("sleep 5", ExecOptions::new().with_timeout(Duration::from_millis(200)))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    let pid = match err {
        Error::Timeout { pid, timeout_ms, .. } => {
            assert_eq!(timeout_ms, 200);
            pid
        }
        other => panic!("expected timeout, got {other:?}"),
    };
    assert!(elapsed >= Duration::from_millis(200), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");
    assert!(!engine.is_process_running(pid));

    let record = engine.get_process(pid).unwrap();
    assert_eq!(record.status, ProcessStatus::Killed);

    let mut saw_timeout = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, EngineEvent::Timeout { pid: p, .. } if p == pid) {
            saw_timeout = true;
        }
    }
    assert!(saw_timeout);

    engine.destroy().await;
}

#[tokio::test]
async fn test_nonzero_exit_is_a_result() {
    let engine = test_engine();

    let result = engine
        .exec("echo 'error: broken' >&2; exit 3", ExecOptions::default())
        .await
        .unwrap();
    assert_eq!(result.exit_code(), Some(3));
    assert!(result.has_errors());
    assert_eq!(result.error_lines(), ["error: broken"]);

    let record = engine.get_process(result.pid().unwrap()).unwrap();
    assert_eq!(record.status, ProcessStatus::Completed);
    assert_eq!(record.exit_code, Some(3));

    engine.destroy().await;
}

#[tokio::test]
async fn test_run_rejects_nonzero_exit() {
    let engine = test_engine();

    assert_eq!(engine.run("printf ok", ExecOptions::default()).await.unwrap(), "ok");

    let err = engine.run("exit 7", ExecOptions::default()).await.unwrap_err();
    assert!(matches!(err, Error::NonZeroExit { exit_code: 7, .. }));

    engine.destroy().await;
}

#[tokio::test]
async fn test_concurrent_execs_get_distinct_pids() {
    let engine = test_engine();

    let runs = (0..4).map(|i| {
        let engine = Arc::clone(&engine);
        async move {
            engine
                .exec(&format!("echo {i}"), ExecOptions::default())
                .await
                .unwrap()
        }
    });
    let results = futures::future::join_all(runs).await;

    let mut pids: Vec<u32> = results.iter().filter_map(|r| r.pid()).collect();
    pids.sort_unstable();
    pids.dedup();
    assert_eq!(pids.len(), 4);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.stdout().trim(), i.to_string());
    }

    engine.destroy().await;
}

#[tokio::test]
async fn test_streaming_chunks_add_up_to_stdout() {
    let engine = test_engine();

    let mut stream = engine
        .exec_streaming("echo one; sleep 0.1; echo two", ExecOptions::default())
        .await
        .unwrap();

    let mut seen = String::new();
    while let Some(chunk) = stream.next().await {
        seen.push_str(&chunk.text);
    }
    let result = stream.finish().await.unwrap();

    assert_eq!(seen, "one\ntwo\n");
    assert_eq!(result.stdout(), seen);

    engine.destroy().await;
}

#[tokio::test]
async fn test_output_cap_truncates() {
    let engine = test_engine();

    let result = engine
        .exec(
            "printf 'abcdefghij'",
            ExecOptions::new().with_max_output_bytes(4),
        )
        .await
        .unwrap();
    assert_eq!(result.stdout(), "abcd");
    assert!(result.truncated());

    engine.destroy().await;
}

#[tokio::test]
async fn test_pipe() {
    let engine = test_engine();

    let result = engine
        .pipe(&["printf 'b\\na\\n'", "sort"], ExecOptions::default())
        .await
        .unwrap();
    assert_eq!(result.stdout(), "a\nb\n");

    let err = engine
        .pipe::<&str>(&[], ExecOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    engine.destroy().await;
}

#[tokio::test]
async fn test_progress_callback() {
    let engine = test_engine();

    let mut percents = Vec::new();
    let result = engine
        .exec_with_progress(
            "echo 'Progress: 25%'; echo 'step 2/4'; echo done",
            ExecOptions::default(),
            |p| percents.push(p.percent),
        )
        .await
        .unwrap();

    assert!(result.success());
    assert_eq!(percents, vec![Some(25.0), Some(50.0)]);

    engine.destroy().await;
}

#[tokio::test]
async fn test_spawn_and_graceful_kill() {
    let engine = test_engine();

    let pid = engine
        .spawn("sleep", &["5".to_string()], ExecOptions::default())
        .await
        .unwrap();
    assert!(engine.is_process_running(pid));

    let outcome = engine.kill_graceful(pid).await.unwrap();
    assert_eq!(outcome, KillOutcome::Terminated);
    assert!(!engine.is_process_running(pid));

    engine.destroy().await;
}

#[tokio::test]
async fn test_background_and_kill() {
    let engine = test_engine();

    let pid = engine
        .background("sleep 5", ExecOptions::default())
        .await
        .unwrap();
    assert!(engine.is_process_running(pid));
    assert_eq!(engine.system_info().running_processes, 1);

    engine.kill(pid, hive_exec::KillSignal::Kill).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!engine.is_process_running(pid));

    assert!(matches!(
        engine.kill(pid, hive_exec::KillSignal::Term),
        Err(Error::ProcessNotFound(_))
    ));

    engine.destroy().await;
}

#[tokio::test]
async fn test_invalid_cwd_creates_no_record() {
    let engine = test_engine();

    let err = engine
        .exec("echo hi", ExecOptions::new().with_cwd("/definitely/not/here"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidWorkingDir(_)));
    assert!(engine.list_processes().is_empty());

    engine.destroy().await;
}

#[tokio::test]
async fn test_exec_env_and_cwd() {
    let engine = test_engine();
    let dir = tempfile::tempdir().unwrap();
    let dir_path = dir.path().canonicalize().unwrap();

    engine.env().set_var("HIVE_TEST_VALUE", "layered").unwrap();
    let result = engine
        .exec(
            "echo $HIVE_TEST_VALUE $CALL_VALUE; pwd -P",
            ExecOptions::new()
                .with_cwd(&dir_path)
                .with_env("CALL_VALUE", "per-call"),
        )
        .await
        .unwrap();

    let mut lines = result.stdout().lines();
    assert_eq!(lines.next(), Some("layered per-call"));
    assert_eq!(lines.next(), Some(dir_path.to_str().unwrap()));

    engine.destroy().await;
}

#[tokio::test]
async fn test_filtered_env_redacts_secrets() {
    let engine = test_engine();

    engine.env().set_var("API_KEY", "hunter2").unwrap();
    engine.env().set_var("PLAIN_SETTING", "visible").unwrap();

    let filtered = engine.env().get_filtered();
    assert_eq!(filtered.get("API_KEY").map(String::as_str), Some(REDACTED));
    assert_eq!(filtered.get("PLAIN_SETTING").map(String::as_str), Some("visible"));

    engine.destroy().await;
}

#[tokio::test]
async fn test_session_round_trip() {
    let engine = test_engine();
    engine.sessions().set_quiescence(Duration::from_millis(300));

    let session = engine
        .sessions()
        .create_session(SessionOptions {
            shell: Some(ShellType::Sh),
            ..Default::default()
        })
        .unwrap();
    assert!(engine.is_process_running(session.pid));

    let out = engine
        .sessions()
        .send_to_session(&session.id, "FOO=bar")
        .await
        .unwrap();
    assert!(out.stdout.is_empty());

    let out = engine
        .sessions()
        .send_to_session(&session.id, "echo $FOO")
        .await
        .unwrap();
    assert_eq!(out.stdout, "bar\n");
    assert_eq!(
        engine.sessions().history(&session.id).unwrap(),
        vec!["FOO=bar".to_string(), "echo $FOO".to_string()]
    );

    engine.sessions().close_session(&session.id).await.unwrap();
    assert!(engine.sessions().is_empty());
    assert!(!engine.is_process_running(session.pid));
    assert!(matches!(
        engine.sessions().send_to_session(&session.id, "echo").await,
        Err(Error::SessionNotFound(_))
    ));

    engine.destroy().await;
}

#[tokio::test]
async fn test_destroy_is_idempotent() {
    let engine = test_engine();
    let mut events = engine.receiver();

    let pid = engine
        .background("sleep 5", ExecOptions::default())
        .await
        .unwrap();

    engine.destroy().await;
    engine.destroy().await;
    assert!(engine.is_destroyed());
    assert!(!engine.is_process_running(pid));

    let destroyed = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|e| matches!(e, EngineEvent::Destroyed))
        .count();
    assert_eq!(destroyed, 1);

    let err = engine.exec("echo late", ExecOptions::default()).await.unwrap_err();
    assert!(matches!(err, Error::Destroyed));
}

#[tokio::test]
async fn test_status_report_mentions_shell() {
    let engine = test_engine();

    let info = engine.system_info();
    assert_eq!(info.preferred_shell, ShellType::Sh);
    assert!(info.available_shells.contains(&ShellType::Sh));

    let report = engine.status_report();
    assert!(report.contains("Shell: sh"));

    engine.destroy().await;
}

#[tokio::test]
async fn test_cleanup_during_drain_keeps_exit_status() {
    let engine = test_engine();

    // the backgrounded sleep holds stdout open after the shell exits
    let run = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.exec("sleep 1 & exit 0", ExecOptions::default()).await })
    };
    tokio::time::sleep(Duration::from_millis(120)).await;
    let stats = engine.perform_cleanup().await;

    let result = run.await.unwrap().unwrap();
    assert_eq!(result.exit_code(), Some(0));
    assert_eq!(stats.zombies_killed, 0);

    let record = engine.get_process(result.pid().unwrap()).unwrap();
    assert_eq!(record.status, ProcessStatus::Completed);
    assert_eq!(record.exit_code, Some(0));

    engine.destroy().await;
}

#[tokio::test]
async fn test_cleanup_bounds_finished_records() {
    let config = EngineConfig {
        preferred_shell: Some(ShellType::Sh),
        supervisor: SupervisorSettings {
            enabled: false,
            max_finished_records: 5,
            ..Default::default()
        },
        ..Default::default()
    };
    let engine = Engine::builder().config(config).build().unwrap();

    let mut last_pid = None;
    for _ in 0..8 {
        let result = engine.exec("true", ExecOptions::default()).await.unwrap();
        last_pid = result.pid();
    }
    assert_eq!(engine.list_processes().len(), 8);

    let stats = engine.perform_cleanup().await;
    assert_eq!(stats.records_pruned, 3);
    assert_eq!(engine.list_processes().len(), 5);
    assert!(engine.get_process(last_pid.unwrap()).is_some());

    engine.destroy().await;
}

#[tokio::test]
async fn test_timeout_warning_fires_before_kill() {
    let engine = test_engine();
    let mut events = engine.receiver();

    let err = engine
        .exec("sleep 5", ExecOptions::new().with_timeout(Duration::from_millis(500)))
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    let seen: Vec<EngineEvent> = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|e| matches!(e, EngineEvent::TimeoutWarning { .. } | EngineEvent::Timeout { .. }))
        .collect();
    assert_eq!(seen.len(), 2);
    match &seen[0] {
        EngineEvent::TimeoutWarning {
            elapsed_ms,
            timeout_ms,
            ..
        } => {
            assert_eq!(*timeout_ms, 500);
            assert!((399..=400).contains(elapsed_ms), "{elapsed_ms}");
        }
        other => panic!("expected warning first, got {other:?}"),
    }
    assert!(matches!(seen[1], EngineEvent::Timeout { .. }));

    engine.destroy().await;
}

#[tokio::test]
async fn test_out_of_band_kill_leaves_active_set() {
    let engine = test_engine();

    let pid = engine
        .background("sleep 5", ExecOptions::default())
        .await
        .unwrap();
    assert_eq!(engine.registry().active().len(), 1);

    let status = std::process::Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status()
        .unwrap();
    assert!(status.success());
    tokio::time::sleep(Duration::from_millis(400)).await;

    let stats = engine.perform_cleanup().await;
    assert!(stats.errors.is_empty());
    assert!(engine.registry().active().is_empty());
    assert!(!engine.is_process_running(pid));

    let record = engine.get_process(pid).unwrap();
    assert_eq!(record.status, ProcessStatus::Killed);
    assert_eq!(record.signal.as_deref(), Some("SIGKILL"));

    engine.destroy().await;
}

#[tokio::test]
async fn test_chunk_timestamps_are_monotonic_per_stream() {
    let engine = test_engine();

    let result = engine
        .exec(
            "for i in 1 2 3; do echo out$i; echo err$i >&2; sleep 0.05; done",
            ExecOptions::default(),
        )
        .await
        .unwrap();

    for stream in [StreamKind::Stdout, StreamKind::Stderr] {
        let chunks: Vec<_> = result.chunks().iter().filter(|c| c.stream == stream).collect();
        assert!(!chunks.is_empty());
        assert!(chunks.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(chunks.windows(2).all(|w| w[0].seq < w[1].seq));

        let text: String = chunks.iter().map(|c| c.text.as_str()).collect();
        let expected = match stream {
            StreamKind::Stdout => result.stdout(),
            StreamKind::Stderr => result.stderr(),
        };
        assert_eq!(text, expected);
    }

    engine.destroy().await;
}
