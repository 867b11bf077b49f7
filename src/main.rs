// GUI-subsystem binary on Windows; headless mode re-attaches to the parent console.
#![windows_subsystem = "windows"]

use eframe::egui;
use stagecanvas::app::StageCanvasApp;
use stagecanvas::{cli, logger};

fn main() -> Result<(), eframe::Error> {
    // -- CLI / headless mode ---------------------------------------------
    if cli::CliArgs::is_cli_mode() {
        #[cfg(target_os = "windows")]
        attach_parent_console();

        use clap::Parser;
        let args = cli::CliArgs::parse();
        let code = cli::run(args);
        std::process::exit(if code == std::process::ExitCode::SUCCESS {
            0
        } else {
            1
        });
    }

    // -- GUI mode -----------------------------------------------------

    // Initialize session log (overwrites previous session log)
    logger::init();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1440.0, 900.0])
            .with_min_inner_size([800.0, 500.0])
            .with_title("StageCanvas"),
        ..Default::default()
    };

    eframe::run_native(
        "StageCanvas",
        options,
        Box::new(|cc| Box::new(StageCanvasApp::new(cc))),
    )
}

/// Attach to the launching terminal so println!/eprintln! reach it even
/// though the binary is SUBSYSTEM:WINDOWS.
#[cfg(target_os = "windows")]
fn attach_parent_console() {
    unsafe extern "system" {
        fn AttachConsole(dwProcessId: u32) -> i32;
    }
    const ATTACH_PARENT_PROCESS: u32 = 0xFFFF_FFFF;
    unsafe {
        AttachConsole(ATTACH_PARENT_PROCESS);
    }
}
