// Prevents additional console window on Windows (silent launch).
#![cfg_attr(target_os = "windows", windows_subsystem = "windows")]

use tauri::Manager;

use wtftoday::commands;
use wtftoday::utils::config::{self, BriefConfig};
use wtftoday::CommandDispatcher;

fn main() {
    config::load_dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let app = tauri::Builder::default()
        .setup(|app| {
            let data_dir = app.path().app_data_dir()?;
            let dispatcher = CommandDispatcher::open(&data_dir, BriefConfig::from_env())?;
            app.manage(dispatcher);
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            // Brief commands
            commands::brief::get_brief,
            commands::brief::refresh_brief,
            commands::brief::clear_cache,
            commands::brief::get_cache_status,
            commands::brief::get_command_schema_version,
            // GitHub commands
            commands::github::validate_github_token,
            commands::github::save_github_token,
            // Calendar commands
            commands::calendar::save_calendar_config,
            commands::calendar::parse_ics_file,
            // Settings commands
            commands::settings::get_setting,
            commands::settings::set_setting,
            commands::settings::get_all_settings,
            commands::settings::is_onboarding_complete,
        ])
        .build(tauri::generate_context!());

    let app = match app {
        Ok(app) => app,
        Err(e) => {
            log::error!("Failed to start WTFToday: {}", e);
            std::process::exit(1);
        }
    };

    app.run(|app_handle, event| {
        if let tauri::RunEvent::Exit = event {
            if let Some(dispatcher) = app_handle.try_state::<CommandDispatcher>() {
                dispatcher.shutdown();
            }
        }
    });
}
