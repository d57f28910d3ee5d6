use tauri::State;

use crate::models::{CalendarConfig, CalendarEvent};
use crate::CommandDispatcher;

#[tauri::command]
pub async fn save_calendar_config(
    dispatcher: State<'_, CommandDispatcher>,
    config: CalendarConfig,
) -> Result<(), String> {
    dispatcher.save_calendar_config(config).await
}

#[tauri::command]
pub async fn parse_ics_file(
    dispatcher: State<'_, CommandDispatcher>,
    path: String,
) -> Result<Vec<CalendarEvent>, String> {
    dispatcher.parse_ics_file(path).await
}
