//! Host Integration Tests
//!
//! Tests for:
//! - Booting a root node from a temp directory and driving a few frames
//! - Stream subscriber subscribe/ok/input/print round trip through the
//!   real (ephemeral-port) router
//! - Filesystem-driven child discovery picked up by a running Host

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::time::{Duration, Instant};

use beamer::{Config, Host};

fn write_node(dir: &Path, code: &str) {
    std::fs::write(dir.join("node.lua"), code).unwrap();
}

fn config_at(dir: &Path, port: u16) -> Config {
    let canonical = dir.canonicalize().unwrap();
    let root_name = canonical.file_name().unwrap().to_str().unwrap().to_string();
    Config {
        root_dir: canonical,
        root_name,
        port,
        fullscreen: false,
    }
}

/// Polls `f` until it returns `Some`, ticking `host` between attempts, or
/// panics once `timeout` has elapsed. Stream I/O crosses a real (loopback)
/// socket, so the subscribing client and the host's non-blocking accept
/// loop need a few ticks to converge.
fn until<T>(host: &mut Host, timeout: Duration, mut f: impl FnMut() -> Option<T>) -> T {
    let start = Instant::now();
    loop {
        host.tick();
        if let Some(v) = f() {
            return v;
        }
        if start.elapsed() > timeout {
            panic!("condition did not become true within {timeout:?}");
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn read_available(stream: &mut TcpStream) -> String {
    stream.set_nonblocking(true).unwrap();
    let mut buf = [0u8; 4096];
    let mut out = Vec::new();
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[test]
fn host_boots_root_and_ticks_without_panicking() {
    let dir = tempfile::tempdir().unwrap();
    write_node(
        dir.path(),
        r#"
        setup(64, 64)
        function on_render(w, h)
            print("rendered", w, h)
        end
        "#,
    );

    let config = config_at(dir.path(), 14444);
    let mut host = Host::new(&config).unwrap();
    for _ in 0..3 {
        host.tick();
    }
}

#[test]
fn stream_client_subscribes_and_receives_root_output() {
    let dir = tempfile::tempdir().unwrap();
    write_node(
        dir.path(),
        r#"
        setup(16, 16)
        function on_render(w, h)
            print("tick")
        end
        "#,
    );

    let config = config_at(dir.path(), 14445);
    let mut host = Host::new(&config).unwrap();

    let mut stream = TcpStream::connect(("127.0.0.1", config.port)).unwrap();

    let greeting = until(&mut host, Duration::from_secs(2), || {
        let s = read_available(&mut stream);
        if s.is_empty() { None } else { Some(s) }
    });
    assert!(greeting.contains("Select your channel!"));

    stream.write_all(format!("{}\n", config.root_name).as_bytes()).unwrap();

    let ack = until(&mut host, Duration::from_secs(2), || {
        let s = read_available(&mut stream);
        if s.is_empty() { None } else { Some(s) }
    });
    assert_eq!(ack, "ok!\n");

    let output = until(&mut host, Duration::from_secs(2), || {
        let s = read_available(&mut stream);
        if s.is_empty() { None } else { Some(s) }
    });
    assert!(output.contains("tick"));
}

#[test]
fn stream_client_gets_404_for_unknown_address() {
    let dir = tempfile::tempdir().unwrap();
    write_node(dir.path(), "");

    let config = config_at(dir.path(), 14446);
    let mut host = Host::new(&config).unwrap();
    let mut stream = TcpStream::connect(("127.0.0.1", config.port)).unwrap();

    until(&mut host, Duration::from_secs(2), || {
        let s = read_available(&mut stream);
        if s.is_empty() { None } else { Some(s) }
    });

    stream.write_all(b"no/such/node\n").unwrap();
    let reply = until(&mut host, Duration::from_secs(2), || {
        let s = read_available(&mut stream);
        if s.is_empty() { None } else { Some(s) }
    });
    assert_eq!(reply, "404\n");
}

#[test]
fn child_directory_created_after_boot_is_discovered() {
    let dir = tempfile::tempdir().unwrap();
    write_node(dir.path(), "");

    let config = config_at(dir.path(), 14447);
    let mut host = Host::new(&config).unwrap();

    let child_dir = dir.path().join("child");
    std::fs::create_dir(&child_dir).unwrap();
    write_node(&child_dir, "setup(8, 8)");

    let mut stream = TcpStream::connect(("127.0.0.1", config.port)).unwrap();
    until(&mut host, Duration::from_secs(2), || {
        let s = read_available(&mut stream);
        if s.is_empty() { None } else { Some(s) }
    });

    let address = format!("{}/child\n", config.root_name);
    stream.write_all(address.as_bytes()).unwrap();
    let ack = until(&mut host, Duration::from_secs(2), || {
        let s = read_available(&mut stream);
        if s.is_empty() { None } else { Some(s) }
    });
    assert_eq!(ack, "ok!\n");
}
