use tauri::State;

use crate::models::AllSettings;
use crate::CommandDispatcher;

#[tauri::command]
pub async fn get_setting(
    dispatcher: State<'_, CommandDispatcher>,
    key: String,
) -> Result<Option<String>, String> {
    dispatcher.get_setting(key).await
}

#[tauri::command]
pub async fn set_setting(
    dispatcher: State<'_, CommandDispatcher>,
    key: String,
    value: String,
) -> Result<(), String> {
    dispatcher.set_setting(key, value).await
}

#[tauri::command]
pub async fn get_all_settings(dispatcher: State<'_, CommandDispatcher>) -> Result<AllSettings, String> {
    dispatcher.get_all_settings().await
}

#[tauri::command]
pub async fn is_onboarding_complete(dispatcher: State<'_, CommandDispatcher>) -> Result<bool, String> {
    dispatcher.is_onboarding_complete().await
}
