//! Integration tests for the supervision engine and the control socket.
//!
//! Services are backed by /bin/sh, /bin/sleep, /bin/true and /bin/false;
//! all paths (service dir, socket, logs) live in a TempDir.

use airride::control::{self, ControlServer};
use airride::{InitConfig, Service, ServiceState, ServiceType, Supervisor};
use std::sync::LazyLock;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

// Tests that spawn and reap children are serialized: waitpid(-1) in one
// supervisor would otherwise steal exits belonging to another test.
static CHILD_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

fn test_supervisor() -> (Supervisor, TempDir) {
    let tmp = TempDir::new().expect("tempdir");
    let config = InitConfig {
        services_dir: tmp.path().join("services"),
        socket_path: tmp.path().join("airride.sock"),
        log_dir: tmp.path().join("log"),
        mount_filesystems: false,
    };
    (Supervisor::new(config), tmp)
}

fn simple(name: &str, exec: &str) -> Service {
    Service::new(name, exec)
}

fn oneshot(name: &str, exec: &str) -> Service {
    let mut svc = Service::new(name, exec);
    svc.service_type = ServiceType::Oneshot;
    svc
}

#[tokio::test]
async fn start_and_stop_simple_service() {
    let _guard = CHILD_LOCK.lock().await;
    let (sup, _tmp) = test_supervisor();
    sup.register(simple("sleeper", "/bin/sleep 30")).await;

    sup.start_service("sleeper").await.expect("start");
    let (state, pid) = sup.service_state("sleeper").await.unwrap();
    assert_eq!(state, ServiceState::Running);
    let pid = pid.expect("running service has a pid");
    assert!(pid > 0);

    sup.stop_service("sleeper").await.expect("stop");
    let (state, pid_after) = sup.service_state("sleeper").await.unwrap();
    assert_eq!(state, ServiceState::Stopped);
    assert_eq!(pid_after, None);

    // The child was reaped: the pid no longer names one of our children.
    let err = nix::sys::wait::waitpid(
        nix::unistd::Pid::from_raw(pid as i32),
        Some(nix::sys::wait::WaitPidFlag::WNOHANG),
    );
    assert!(matches!(err, Err(nix::Error::ECHILD)));
}

#[tokio::test]
async fn start_is_idempotent() {
    let _guard = CHILD_LOCK.lock().await;
    let (sup, _tmp) = test_supervisor();
    sup.register(simple("sleeper", "/bin/sleep 30")).await;

    sup.start_service("sleeper").await.expect("first start");
    let (_, first_pid) = sup.service_state("sleeper").await.unwrap();
    sup.start_service("sleeper").await.expect("second start is a no-op");
    let (state, second_pid) = sup.service_state("sleeper").await.unwrap();
    assert_eq!(state, ServiceState::Running);
    assert_eq!(first_pid, second_pid);

    sup.stop_service("sleeper").await.expect("stop");
    sup.stop_service("sleeper").await.expect("second stop is a no-op");
    let (state, pid) = sup.service_state("sleeper").await.unwrap();
    assert_eq!(state, ServiceState::Stopped);
    assert_eq!(pid, None);
}

#[tokio::test]
async fn oneshot_success_collapses_to_stopped() {
    let _guard = CHILD_LOCK.lock().await;
    let (sup, _tmp) = test_supervisor();
    sup.register(oneshot("once", "/bin/true")).await;

    sup.start_service("once").await.expect("oneshot start");
    let (state, pid) = sup.service_state("once").await.unwrap();
    assert_eq!(state, ServiceState::Stopped);
    assert_eq!(pid, None);
}

#[tokio::test]
async fn oneshot_failure_is_failed() {
    let _guard = CHILD_LOCK.lock().await;
    let (sup, _tmp) = test_supervisor();
    sup.register(oneshot("broken", "/bin/false")).await;

    assert!(sup.start_service("broken").await.is_err());
    let (state, pid) = sup.service_state("broken").await.unwrap();
    assert_eq!(state, ServiceState::Failed);
    assert_eq!(pid, None);
}

#[tokio::test]
async fn requires_chain_starts_in_order() {
    let _guard = CHILD_LOCK.lock().await;
    let (sup, _tmp) = test_supervisor();
    sup.register(simple("a", "/bin/sleep 30")).await;
    let mut b = simple("b", "/bin/sleep 30");
    b.requires = vec!["a".to_string()];
    sup.register(b).await;
    let mut c = simple("c", "/bin/sleep 30");
    c.requires = vec!["b".to_string()];
    sup.register(c).await;

    sup.start_service("c").await.expect("start chain");
    for name in ["a", "b", "c"] {
        let (state, pid) = sup.service_state(name).await.unwrap();
        assert_eq!(state, ServiceState::Running, "{} should be running", name);
        assert!(pid.is_some());
    }

    sup.stop_all().await;
}

#[tokio::test]
async fn requires_cycle_fails_without_fork() {
    let (sup, _tmp) = test_supervisor();
    let mut x = simple("x", "/bin/sleep 30");
    x.requires = vec!["y".to_string()];
    sup.register(x).await;
    let mut y = simple("y", "/bin/sleep 30");
    y.requires = vec!["x".to_string()];
    sup.register(y).await;

    assert!(sup.start_service("x").await.is_err());
    for name in ["x", "y"] {
        let (state, pid) = sup.service_state(name).await.unwrap();
        assert!(
            matches!(state, ServiceState::Stopped | ServiceState::Failed),
            "{} ended as {}",
            name,
            state
        );
        assert_eq!(pid, None, "{} must not have forked", name);
    }
}

#[tokio::test]
async fn failed_required_dependency_fails_dependent() {
    let _guard = CHILD_LOCK.lock().await;
    let (sup, _tmp) = test_supervisor();
    sup.register(oneshot("bad-dep", "/bin/false")).await;
    let mut svc = simple("app", "/bin/sleep 30");
    svc.requires = vec!["bad-dep".to_string()];
    sup.register(svc).await;

    assert!(sup.start_service("app").await.is_err());
    let (state, pid) = sup.service_state("app").await.unwrap();
    assert_eq!(state, ServiceState::Failed);
    assert_eq!(pid, None);
}

#[tokio::test]
async fn after_cycle_is_tolerated() {
    let _guard = CHILD_LOCK.lock().await;
    let (sup, _tmp) = test_supervisor();
    // p and q name each other in `after`; ordering is advisory, so both
    // must still come up (bounded wait, then proceed).
    let mut p = simple("p", "/bin/sleep 30");
    p.after = vec!["q".to_string()];
    sup.register(p).await;
    let mut q = simple("q", "/bin/sleep 30");
    q.after = vec!["p".to_string()];
    sup.register(q).await;

    sup.start_service("p").await.expect("p starts despite after cycle");
    sup.start_service("q").await.expect("q starts despite after cycle");
    sup.stop_all().await;
}

#[tokio::test]
async fn restart_capped_at_ten_failures() {
    let _guard = CHILD_LOCK.lock().await;
    let (sup, _tmp) = test_supervisor();
    let mut svc = simple("crashy", "/bin/false");
    svc.restart_on_failure = true;
    svc.restart_delay = 0;
    sup.register(svc).await;

    let _ = sup.start_service("crashy").await;

    // Drive the reap loop until the failure counter saturates.
    for _ in 0..80 {
        sup.reap().await;
        let failures = sup.failure_count("crashy").await.unwrap();
        let (state, pid) = sup.service_state("crashy").await.unwrap();
        if failures == 10 && state == ServiceState::Failed && pid.is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    assert_eq!(sup.failure_count("crashy").await, Some(10));
    let (state, pid) = sup.service_state("crashy").await.unwrap();
    assert_eq!(state, ServiceState::Failed);
    assert_eq!(pid, None);

    // The cap holds: one more reap pass schedules nothing further.
    sup.reap().await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(sup.failure_count("crashy").await, Some(10));
}

#[tokio::test]
async fn load_services_from_directory() {
    let (sup, tmp) = test_supervisor();
    let dir = tmp.path().join("services");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("web.service"),
        "[Service]\nname = web\nexec_start = /bin/sleep 30\nautostart = yes\n",
    )
    .unwrap();
    std::fs::write(dir.join("README"), "not a service").unwrap();

    sup.load_services().await.expect("load");
    assert!(sup.service_state("web").await.is_some());
    // The built-in fallback shell is always present.
    assert!(sup.service_state("shell").await.is_some());

    let listing = sup.list_text().await;
    assert!(listing.contains("web - stopped [auto]"), "{}", listing);
}

#[tokio::test]
async fn list_shows_auto_and_tty_markers() {
    let (sup, _tmp) = test_supervisor();
    let mut svc = simple("login-tty1", "/sbin/poyo /dev/tty1");
    svc.autostart = true;
    svc.tty_device = Some("/dev/tty1".into());
    sup.register(svc).await;

    let listing = sup.list_text().await;
    assert!(listing.starts_with("Services:\n"));
    assert!(
        listing.contains("  login-tty1 - stopped [auto] [/dev/tty1]"),
        "{}",
        listing
    );
}

#[tokio::test]
async fn status_text_reports_state_pid_and_tty() {
    let _guard = CHILD_LOCK.lock().await;
    let (sup, _tmp) = test_supervisor();
    let mut svc = simple("svc", "/bin/sleep 30");
    svc.description = "A test service".to_string();
    sup.register(svc).await;

    let text = sup.status_text("svc").await;
    assert_eq!(text, "Service: svc\nDescription: A test service\nState: stopped\n");

    sup.start_service("svc").await.unwrap();
    let (_, pid) = sup.service_state("svc").await.unwrap();
    let text = sup.status_text("svc").await;
    assert!(text.contains("State: running\n"));
    assert!(text.contains(&format!("PID: {}\n", pid.unwrap())));

    sup.stop_service("svc").await.unwrap();
    assert_eq!(sup.status_text("missing").await, "Service not found\n");
}

#[tokio::test]
async fn control_socket_one_response_per_connection() {
    let _guard = CHILD_LOCK.lock().await;
    let (sup, tmp) = test_supervisor();
    sup.register(simple("sleeper", "/bin/sleep 30")).await;

    let socket_path = tmp.path().join("airride.sock");
    let server = ControlServer::bind(&socket_path).expect("bind");
    let server_sup = sup.clone();
    let server_task = tokio::spawn(async move {
        loop {
            match server.accept().await {
                Ok(stream) => control::handle_connection(stream, &server_sup).await,
                Err(_) => break,
            }
        }
    });

    async fn send(path: &std::path::Path, request: &str) -> String {
        let mut stream = tokio::net::UnixStream::connect(path).await.expect("connect");
        stream.write_all(request.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    assert_eq!(send(&socket_path, "start sleeper").await, "OK\n");
    let (state, _) = sup.service_state("sleeper").await.unwrap();
    assert_eq!(state, ServiceState::Running);

    let listing = send(&socket_path, "list").await;
    assert!(listing.starts_with("Services:\n"));
    assert!(listing.contains("sleeper - running"));

    let status = send(&socket_path, "status sleeper").await;
    assert!(status.starts_with("Service: sleeper\n"));

    assert_eq!(send(&socket_path, "stop sleeper").await, "OK\n");
    assert_eq!(send(&socket_path, "start no-such-service").await, "FAILED\n");
    assert_eq!(send(&socket_path, "frobnicate x").await, "Unknown command\n");

    server_task.abort();
}
