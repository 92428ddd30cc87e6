use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Redirect},
    Form,
};
use minijinja::context;

use crate::{
    dto::message_dto::{EditForm, ListQuery, MessageView},
    error::{Error, Result},
    models::message::Message,
    routes::render,
    AppState,
};

pub async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse> {
    let messages = state.message_service.list().await?;
    let views: Vec<MessageView> = messages.iter().map(MessageView::from).collect();
    render(
        &state,
        "index.html",
        context! { messages => views, notice => query.notice_text() },
    )
}

/// Image records have no text to edit, so they are refused instead of
/// silently gaining a `message` value.
async fn editable(state: &AppState, id: i64) -> Result<Message> {
    let msg = state
        .message_service
        .get(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Message {} not found", id)))?;
    if msg.is_image() {
        return Err(Error::BadRequest(format!(
            "Message {} is an image and has no text to edit",
            id
        )));
    }
    Ok(msg)
}

pub async fn edit_message_page(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let msg = editable(&state, id).await?;
    render(
        &state,
        "edit.html",
        context! { id => msg.id, message => msg.message.unwrap_or_default() },
    )
}

pub async fn update_message(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Form(form): Form<EditForm>,
) -> Result<impl IntoResponse> {
    editable(&state, id).await?;
    state.message_service.update_text(id, &form.message).await?;
    tracing::info!(record_id = id, "Message updated");
    Ok(Redirect::to("/?notice=updated"))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    state.message_service.delete(id).await?;
    tracing::info!(record_id = id, "Message deleted");
    Ok(Redirect::to("/?notice=deleted"))
}
