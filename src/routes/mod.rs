pub mod auth;
pub mod export;
pub mod health;
pub mod image;
pub mod messages;

use axum::{
    middleware::from_fn_with_state,
    response::Html,
    routing::{get, post},
    Router,
};
use minijinja::Environment;

use crate::{error::Result, middleware::auth::require_session, AppState};

pub fn load_templates() -> Result<Environment<'static>> {
    let mut env = Environment::new();
    env.add_template("base.html", include_str!("../../templates/base.html"))?;
    env.add_template("login.html", include_str!("../../templates/login.html"))?;
    env.add_template("index.html", include_str!("../../templates/index.html"))?;
    env.add_template("edit.html", include_str!("../../templates/edit.html"))?;
    Ok(env)
}

pub(crate) fn render<S: serde::Serialize>(
    state: &AppState,
    name: &str,
    ctx: S,
) -> Result<Html<String>> {
    let html = state.templates.get_template(name)?.render(ctx)?;
    Ok(Html(html))
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/", get(messages::list_messages))
        .route(
            "/edit/:id",
            get(messages::edit_message_page).post(messages::update_message),
        )
        .route("/delete/:id", post(messages::delete_message))
        .route("/image/:filename", get(image::serve_image))
        .route("/download", get(export::download_history))
        .route("/logout", get(auth::logout))
        .route_layer(from_fn_with_state(state.clone(), require_session));

    Router::new()
        .route("/login", get(auth::login_page).post(auth::login))
        .route("/health", get(health::health))
        .merge(protected)
        .with_state(state)
}
