//! Minimal thread-based daemon wiring the replication core together.
//!
//! This is a sample consumer of `pulldog`'s public API, not a GUI — the
//! actual tray/window chrome, settings persistence and bootstrap theming
//! are out of scope per spec.md §1 and left to an embedding application.
//! Mirrors the shape of the teacher's `setup()` closure (logging init, then
//! component startup) without any Tauri plugin wiring.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use pulldog::config::Config;
use pulldog::{Controller, ControllerEvent};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let config = load_config();
    let controller = Controller::new(
        config.destination_root.clone(),
        config.stability_threshold_ms,
        config.min_poll_interval_ms,
        config.max_poll_interval_ms,
    );
    controller.set_parallel_event_budget(config.parallel_event_budget);
    controller.set_event_drain_interval_ms(config.event_drain_interval_ms);

    for path in &config.watched_paths {
        if let Err(err) = controller.add_watch(path.clone()) {
            log::error!("failed to watch {}: {err}", path.display());
        }
    }

    let watch_handle = {
        let controller = controller.clone();
        let base_tick = Duration::from_millis(config.base_tick_ms);
        thread::spawn(move || loop {
            controller.watch_tick();
            thread::sleep(base_tick);
        })
    };

    let worker_handle = {
        let controller = controller.clone();
        thread::spawn(move || loop {
            controller.worker_tick();
            thread::sleep(controller.worker_tick_interval());
        })
    };

    let drain_handle = {
        let controller = controller.clone();
        thread::spawn(move || loop {
            for event in controller.drain_events() {
                log_event(&event);
            }
            thread::sleep(controller.drain_interval());
        })
    };

    watch_handle.join().ok();
    worker_handle.join().ok();
    drain_handle.join().ok();
}

fn log_event(event: &ControllerEvent) {
    match event {
        ControllerEvent::CopyStart { transfer } => log::info!("copy start: {transfer}"),
        ControllerEvent::Copy { transfer, fraction } => log::debug!("copy progress: {transfer} {fraction:.2}"),
        ControllerEvent::CopyEnd { transfer } => log::info!("copy end: {transfer}"),
        ControllerEvent::CopyFailed { transfer, error } => log::error!("copy failed: {transfer}: {error}"),
        ControllerEvent::CopyCanceled { transfer } => log::warn!("copy canceled: {transfer}"),
        ControllerEvent::PathAdded { path } => log::info!("watching {}", path.display()),
        ControllerEvent::PathRemoved { path } => log::info!("unwatching {}", path.display()),
        ControllerEvent::Error { message } => log::warn!("{message}"),
    }
}

fn load_config() -> Config {
    let path = std::env::var_os("PULLDOG_CONFIG").map(PathBuf::from);
    match path {
        Some(path) => match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!("failed to parse {}: {err}, using defaults", path.display());
                Config::default()
            }),
            Err(err) => {
                log::warn!("failed to read {}: {err}, using defaults", path.display());
                Config::default()
            }
        },
        None => Config::default(),
    }
}
