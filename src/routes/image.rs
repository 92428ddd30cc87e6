use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
};
use std::path::Component;

use crate::{
    error::{Error, Result},
    AppState,
};

/// Serves a file from the images directory. Only bare file names are accepted.
pub async fn serve_image(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse> {
    if !is_plain_file_name(&filename) {
        return Err(Error::BadRequest("Invalid image name".into()));
    }

    let path = state.images_dir.join(&filename);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound(format!("Image {} not found", filename)));
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Failed to read image");
            return Err(e.into());
        }
    };

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type(&filename))],
        bytes,
    ))
}

fn is_plain_file_name(name: &str) -> bool {
    let mut components = std::path::Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

fn content_type(name: &str) -> &'static str {
    let ext = std::path::Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_bare_names_are_accepted() {
        assert!(is_plain_file_name("AgACAgIAAxkBAAM.jpg"));
        assert!(!is_plain_file_name(".."));
        assert!(!is_plain_file_name("../db/messages.db"));
        assert!(!is_plain_file_name("/etc/passwd"));
        assert!(!is_plain_file_name("a\\b.jpg"));
        assert!(!is_plain_file_name(""));
    }

    #[test]
    fn content_type_follows_extension() {
        assert_eq!(content_type("x.jpg"), "image/jpeg");
        assert_eq!(content_type("x.PNG"), "image/png");
        assert_eq!(content_type("noext"), "image/jpeg");
    }
}
