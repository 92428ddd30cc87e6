use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};

use crate::{error::Result, services::export_service::ExportService, AppState};

pub const EXPORT_FILE_NAME: &str = "chat_history.pdf";

/// Export the full history as a PDF attachment
pub async fn download_history(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let messages = state.message_service.list().await?;
    let buffer =
        tokio::task::spawn_blocking(move || ExportService::generate_pdf(&messages)).await??;
    let disposition = format!("attachment; filename=\"{}\"", EXPORT_FILE_NAME);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        buffer,
    ))
}
