use tauri::State;

use crate::models::{BriefSnapshot, CacheStatus};
use crate::{CommandDispatcher, COMMAND_SCHEMA_VERSION};

#[tauri::command]
pub async fn get_brief(dispatcher: State<'_, CommandDispatcher>) -> Result<BriefSnapshot, String> {
    dispatcher.get_brief().await
}

#[tauri::command]
pub async fn refresh_brief(dispatcher: State<'_, CommandDispatcher>) -> Result<BriefSnapshot, String> {
    dispatcher.refresh_brief().await
}

#[tauri::command]
pub async fn clear_cache(dispatcher: State<'_, CommandDispatcher>) -> Result<(), String> {
    dispatcher.clear_cache().await
}

#[tauri::command]
pub async fn get_cache_status(dispatcher: State<'_, CommandDispatcher>) -> Result<CacheStatus, String> {
    dispatcher.get_cache_status().await
}

#[tauri::command]
pub fn get_command_schema_version() -> u32 {
    COMMAND_SCHEMA_VERSION
}
