// Hide console window on Windows in release builds
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod app;
mod beat_detector;
mod ble;
mod channel_deriver;
mod charts;
mod cli;
mod config;
mod error;
mod ring_buffer;
mod sample_log;
mod session;
mod supervisor;
mod transport;

use app::FetalMonitor;
use ble::BleTransport;
use clap::Parser;
use cli::Cli;
use config::Config;
use iced::Theme;
use session::AcquisitionSession;
use supervisor::ConnectionSupervisor;
use tokio::runtime::Runtime;

fn main() -> iced::Result {
    // On Windows, force wgpu to use Vulkan backend instead of DirectX 12
    #[cfg(target_os = "windows")]
    std::env::set_var("WGPU_BACKEND", "vulkan");

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let loaded = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let mut config = loaded.unwrap_or_else(|e| {
        log::error!("{}; falling back to defaults", e);
        Config::default()
    });
    cli.apply(&mut config);

    let session = AcquisitionSession::shared(&config);
    let (update_sender, update_receiver) = crossbeam_channel::unbounded();

    let transport = BleTransport::new(config.scan_duration(), config.connect_timeout());
    let (mut supervisor, handle) =
        ConnectionSupervisor::new(transport, session.clone(), update_sender, &config);

    // The supervisor gets its own thread and runtime so BLE waits never block the UI
    let name_filter = config.device_name_filter.clone();
    let worker = std::thread::spawn(move || {
        let rt = match Runtime::new() {
            Ok(runtime) => runtime,
            Err(e) => {
                log::error!("Failed to create async runtime: {}", e);
                return;
            }
        };
        rt.block_on(supervisor.run(&name_filter));
    });

    let ui_handle = handle.clone();
    let result = iced::application(
        "Fetal Monitor: Maternal & Fetal ECG",
        FetalMonitor::update,
        FetalMonitor::view,
    )
    .subscription(FetalMonitor::subscription)
    .theme(|_| Theme::Light)
    .window_size((1200.0, 800.0))
    .run_with(move || FetalMonitor::new(session, update_receiver, ui_handle));

    // Window closed: close the link (and export, if configured) before exiting
    handle.stop();
    if worker.join().is_err() {
        log::error!("Supervisor thread panicked");
    }

    result
}
