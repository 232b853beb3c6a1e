use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{auth::AuthenticatedUser, state::AppState};

use self::content::{FamInfos, Infos, Recipes};

pub mod accounts;
pub mod auth;
pub mod comments;
pub mod content;
pub mod discussions;
pub mod forms;
pub mod health;
pub mod media;
pub mod persons;
pub mod relations;

/// Uploads carry up to four images and four PDFs.
const MAX_BODY_BYTES: usize = 1024 * 1024 * 100;

fn cors_layer(allowed: Option<&String>) -> CorsLayer {
    let allow_origin = match allowed {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        warn!(origin = %value, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

fn content_routes<T: content::ContentTable>() -> Router<AppState> {
    Router::new()
        .route("/", get(content::list::<T>).post(content::create::<T>))
        .route(
            "/:id",
            get(content::get::<T>)
                .put(content::update::<T>)
                .delete(content::delete::<T>),
        )
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(state.config.cors_allowed_origin.as_ref());

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me));

    let account_routes = Router::new()
        .route("/change-password", post(accounts::change_password))
        .route("/author-name", put(accounts::update_author_name))
        .route(
            "/alerts",
            get(accounts::get_alerts).put(accounts::update_alerts),
        );

    let person_routes = Router::new()
        .route(
            "/",
            get(persons::list_persons).post(persons::create_person),
        )
        .route(
            "/:id",
            get(persons::get_person)
                .patch(persons::update_person_fields)
                .delete(persons::delete_person),
        )
        .route("/:id/images", put(persons::update_person_images))
        .route("/:id/legacy", get(persons::get_legacy_person));

    let relation_routes = Router::new()
        .route("/", get(relations::list_relations))
        .route(
            "/:person_id",
            get(relations::get_relation)
                .put(relations::save_person_relation)
                .delete(relations::delete_relation),
        );

    let comment_routes = Router::new()
        .route(
            "/",
            get(comments::list_comments).post(comments::create_comment),
        )
        .route(
            "/:id",
            get(comments::get_comment)
                .put(comments::update_comment)
                .delete(comments::delete_comment),
        );

    let discussion_routes = Router::new()
        .route("/", get(discussions::list_discussions))
        .route(
            "/person/:person_id",
            get(discussions::get_person_discussion).post(discussions::open_person_discussion),
        )
        .route("/entries", post(discussions::create_entry))
        .route(
            "/entries/:id",
            get(discussions::get_entry)
                .put(discussions::update_entry)
                .delete(discussions::delete_entry),
        );

    let media_routes = Router::new()
        .route("/:id", get(media::get_media))
        .route("/:id/thumbnail", get(media::get_thumbnail));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/accounts", account_routes)
        .nest("/api/ancestors/persons", person_routes)
        .nest("/api/ancestors/relations", relation_routes)
        .nest("/api/infos", content_routes::<Infos>())
        .nest("/api/fam-infos", content_routes::<FamInfos>())
        .nest("/api/recipes", content_routes::<Recipes>())
        .nest("/api/comments", comment_routes)
        .nest("/api/discussions", discussion_routes)
        .nest("/api/media", media_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .route("/api/accounts/register", post(accounts::register))
        .route(
            "/api/accounts/password-reset-request",
            post(accounts::password_reset_request),
        )
        .route(
            "/api/accounts/password-reset-confirm/:uidb64/:token",
            post(accounts::password_reset_confirm),
        )
        .route(
            "/api/accounts/unsubscribe/:category/:token",
            get(accounts::unsubscribe),
        )
        .route("/activate/:uidb64/:token", get(accounts::activate))
        .route("/activate/:uidb64/:token/", get(accounts::activate))
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}
