//! `beamer <root-directory>`: boots the host loop against a directory
//! tree of sandboxed Lua nodes (see `SPEC_FULL.md` §4.H).

use std::process::ExitCode;
use std::time::Duration;

use beamer::utils::FpsCounter;
use beamer::{Config, Host};

/// Target frame interval (§4.H): the loop is cooperative, not vsync-driven.
const FRAME_INTERVAL: Duration = Duration::from_millis(1000 / 60);

fn main() -> ExitCode {
    env_logger::init();
    beamer::sandbox::install_handler();

    let Some(root_arg) = std::env::args().nth(1) else {
        eprintln!("usage: beamer <root-directory>");
        return ExitCode::FAILURE;
    };

    let config = match Config::resolve(&root_arg) {
        Ok(config) => config,
        Err(err) => {
            log::error!("failed to resolve configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = std::env::set_current_dir(config.working_dir()) {
        log::error!("failed to chdir to {}: {err}", config.working_dir().display());
        return ExitCode::FAILURE;
    }

    let mut host = match Host::new(&config) {
        Ok(host) => host,
        Err(err) => {
            log::error!("failed to start host: {err}");
            return ExitCode::FAILURE;
        }
    };

    log::info!("beamer running, root node {:?}, port {}", config.root_name, config.port);

    let mut fps = FpsCounter::new();
    loop {
        let frame_start = std::time::Instant::now();
        host.tick();
        if let Some(current) = fps.update() {
            log::debug!("fps: {current:.1}");
        }
        let elapsed = frame_start.elapsed();
        if let Some(remaining) = FRAME_INTERVAL.checked_sub(elapsed) {
            std::thread::sleep(remaining);
        }
    }
}
