use tauri::State;

use crate::models::GitHubUser;
use crate::CommandDispatcher;

#[tauri::command]
pub async fn validate_github_token(
    dispatcher: State<'_, CommandDispatcher>,
    token: String,
) -> Result<GitHubUser, String> {
    dispatcher.validate_github_token(token).await
}

#[tauri::command]
pub async fn save_github_token(
    dispatcher: State<'_, CommandDispatcher>,
    token: String,
) -> Result<(), String> {
    dispatcher.save_github_token(token).await
}
