use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, get_service, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::services::ServeDir;

use crate::{
    chat::{ChatController, IgnoreReason, SendOutcome},
    credential::CredentialStore,
    db,
    llm::{CompletionTransport, PuterClient},
    models::Message,
    selector::Model,
    telemetry,
};

type Shared<T> = State<Arc<ChatController<T>>>;
type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

/**
 * \brief Start the local HTTP surface: static front end plus JSON API.
 * \param addr listen address, e.g. "127.0.0.1:5174"
 * \param model model selected at startup
 */
pub async fn run(addr: &str, model: Model) -> Result<()> {
    let conn = db::open_default_db()?;
    db::migrate(&conn)?;
    telemetry::set_enabled(db::get_telemetry_enabled(&conn)?);
    let store = CredentialStore::load(conn)?;
    let controller = Arc::new(ChatController::with_model(
        store,
        PuterClient::from_env(),
        model,
    ));

    let ui_root = std::env::var("PUTERCHAT_UI_DIR").unwrap_or_else(|_| "web".to_string());
    let static_service =
        get_service(ServeDir::new(ui_root).append_index_html_on_directories(true));
    let app = build_router(controller).fallback_service(static_service);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Server listening on http://{}", addr);
    telemetry::log_event("server", &format!("listening on {}", addr));
    axum::serve(listener, app).await?;
    Ok(())
}

/**
 * \brief JSON API routes over one shared controller.
 */
pub fn build_router<T>(controller: Arc<ChatController<T>>) -> Router
where
    T: CompletionTransport + 'static,
{
    Router::new()
        .route("/api/state", get(get_state::<T>))
        .route("/api/models", get(list_models))
        .route("/api/model", put(set_model::<T>))
        .route("/api/token", post(save_token::<T>))
        .route("/api/chat", post(send_chat::<T>))
        .with_state(controller)
}

#[derive(Serialize, Debug)]
struct StateDto {
    messages: Vec<Message>,
    loading: bool,
    model: Model,
    token_set: bool,
}

#[derive(Serialize, Debug)]
struct ModelItem {
    value: &'static str,
    label: &'static str,
}

#[derive(Serialize, Debug)]
struct ModelsResponse {
    models: Vec<ModelItem>,
    default: Model,
}

#[derive(Deserialize, Debug)]
struct ModelRequest {
    /** \brief Model identifier, e.g. "gpt-4o-mini". */
    model: String,
}

#[derive(Deserialize, Debug)]
struct TokenRequest {
    token: String,
}

#[derive(Deserialize, Debug)]
struct ChatRequest {
    /** \brief Text typed by the user. */
    text: String,
}

#[derive(Serialize, Debug)]
struct ChatResponse {
    outcome: &'static str,
    message: Option<Message>,
    state: StateDto,
}

fn snapshot<T: CompletionTransport>(
    controller: &ChatController<T>,
) -> Result<StateDto, (StatusCode, String)> {
    Ok(StateDto {
        messages: controller.messages().map_err(internal_err)?,
        loading: controller.is_loading().map_err(internal_err)?,
        model: controller.model().map_err(internal_err)?,
        token_set: controller.has_credential().map_err(internal_err)?,
    })
}

async fn get_state<T: CompletionTransport>(State(controller): Shared<T>) -> ApiResult<StateDto> {
    Ok(Json(snapshot(&controller)?))
}

async fn list_models() -> Json<ModelsResponse> {
    Json(ModelsResponse {
        models: Model::all()
            .iter()
            .map(|m| ModelItem {
                value: m.as_str(),
                label: m.label(),
            })
            .collect(),
        default: Model::default(),
    })
}

async fn set_model<T: CompletionTransport>(
    State(controller): Shared<T>,
    Json(payload): Json<ModelRequest>,
) -> ApiResult<StateDto> {
    let model: Model = payload.model.parse().map_err(bad_request)?;
    controller.set_model(model).map_err(internal_err)?;
    Ok(Json(snapshot(&controller)?))
}

async fn save_token<T: CompletionTransport>(
    State(controller): Shared<T>,
    Json(payload): Json<TokenRequest>,
) -> ApiResult<StateDto> {
    if payload.token.trim().is_empty() {
        return Err(bad_request("token must not be empty"));
    }
    controller
        .save_token(&payload.token)
        .map_err(internal_err)?;
    telemetry::log_event("server.token", "token updated");
    Ok(Json(snapshot(&controller)?))
}

async fn send_chat<T: CompletionTransport>(
    State(controller): Shared<T>,
    Json(payload): Json<ChatRequest>,
) -> ApiResult<ChatResponse> {
    let outcome = controller.send(&payload.text).await.map_err(internal_err)?;
    let label = match &outcome {
        SendOutcome::Replied(_) => "replied",
        SendOutcome::Failed(_) => "failed",
        SendOutcome::Ignored(IgnoreReason::Empty) => "ignored_empty",
        SendOutcome::Ignored(IgnoreReason::Busy) => "ignored_busy",
        SendOutcome::ConfigurationRequired => "configuration_required",
    };
    Ok(Json(ChatResponse {
        outcome: label,
        message: outcome.message().cloned(),
        state: snapshot(&controller)?,
    }))
}

fn internal_err<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn bad_request<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, e.to_string())
}
