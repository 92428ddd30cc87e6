use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Form,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use minijinja::context;

use crate::{
    dto::message_dto::LoginForm,
    error::Result,
    middleware::auth::{password_matches, SESSION_COOKIE},
    routes::render,
    AppState,
};

pub async fn login_page(State(state): State<AppState>) -> Result<impl IntoResponse> {
    render(&state, "login.html", context! {})
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Result<Response> {
    if !password_matches(&form.password, &state.web_password) {
        tracing::warn!("Rejected panel login with an invalid password");
        let page = render(&state, "login.html", context! { error => "Invalid password" })?;
        return Ok((StatusCode::FORBIDDEN, page).into_response());
    }

    let token = state.sessions.issue()?;
    let cookie = Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax);
    tracing::info!("Panel login succeeded");
    Ok((jar.add(cookie), Redirect::to("/")).into_response())
}

pub async fn logout(jar: CookieJar) -> impl IntoResponse {
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    (jar, Redirect::to("/login"))
}
