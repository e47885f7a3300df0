//! Webフロントエンド
//!
//! シナリオ一覧と起動/停止フォーム、セッションログの一覧を提供します。
//! フォームは `action` フィールドを1つだけ送り、`STOP` なら停止、それ以外はそのシナリオを起動します。

use axum::{
    Form, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tera::{Context, Tera};
use tracing::{error, info, warn};
use trafficsim_core::{
    LogCatalog, LogError, LogRecord, RunningScenery, SceneryDescriptor, SimulatorSupervisor,
    SupervisorError, SupervisorStatus,
};

/// 停止を指示する `action` の値
const STOP_ACTION: &str = "STOP";

#[derive(Clone)]
pub struct AppState {
    supervisor: Arc<SimulatorSupervisor>,
    catalog: Arc<dyn LogCatalog>,
    templates: Arc<Tera>,
}

impl AppState {
    pub fn new(
        supervisor: Arc<SimulatorSupervisor>,
        catalog: Arc<dyn LogCatalog>,
    ) -> anyhow::Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            ("index.html", include_str!("../templates/index.html")),
            ("logs.html", include_str!("../templates/logs.html")),
            ("log.html", include_str!("../templates/log.html")),
        ])?;

        Ok(Self {
            supervisor,
            catalog,
            templates: Arc::new(tera),
        })
    }

    fn render(&self, template: &str, view: &impl Serialize) -> Result<Html<String>, WebError> {
        let context = Context::from_serialize(view)?;
        Ok(Html(self.templates.render(template, &context)?))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index).post(submit))
        .route("/logs", get(list_logs))
        .route("/logs/{id}", get(show_log))
        .route("/api/status", get(api_status))
        .with_state(state)
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Web frontend listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C");
            }
        })
        .await?;

    info!("Web frontend stopped");
    Ok(())
}

#[derive(Debug)]
enum WebError {
    NotFound(String),
    Internal(String),
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        match self {
            WebError::NotFound(message) => (StatusCode::NOT_FOUND, message).into_response(),
            WebError::Internal(message) => {
                error!(error = %message, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
            }
        }
    }
}

impl From<SupervisorError> for WebError {
    fn from(err: SupervisorError) -> Self {
        match err {
            SupervisorError::SceneryNotFound { .. } => WebError::NotFound(err.to_string()),
            _ => WebError::Internal(err.to_string()),
        }
    }
}

impl From<LogError> for WebError {
    fn from(err: LogError) -> Self {
        match err {
            LogError::NotFound(_) => WebError::NotFound(err.to_string()),
            _ => WebError::Internal(err.to_string()),
        }
    }
}

impl From<tera::Error> for WebError {
    fn from(err: tera::Error) -> Self {
        // Teraのエラーは原因がネストしている
        let mut message = err.to_string();
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            message.push_str(&format!(": {}", cause));
            source = cause.source();
        }
        WebError::Internal(message)
    }
}

#[derive(Debug, Deserialize)]
struct ActionForm {
    action: String,
}

#[derive(Debug, Serialize)]
struct Flash {
    kind: &'static str,
    text: String,
}

#[derive(Debug, Serialize)]
struct IndexView {
    running: Option<String>,
    state_label: String,
    pid: Option<u32>,
    can_stop: bool,
    sceneries: Vec<SceneryDescriptor>,
    message: Option<Flash>,
}

#[derive(Debug, Serialize)]
struct LogView {
    id: u64,
    log_type: u32,
    title: String,
    start_time: String,
    play_time: String,
    connections: u32,
    file_name: String,
}

impl From<LogRecord> for LogView {
    fn from(log: LogRecord) -> Self {
        Self {
            id: log.id,
            log_type: log.log_type,
            start_time: log.start_time.format("%Y-%m-%d %H:%M:%S").to_string(),
            play_time: log.play_time_display(),
            title: log.title,
            connections: log.connections,
            file_name: log.file_name,
        }
    }
}

async fn index(State(state): State<AppState>) -> Result<Html<String>, WebError> {
    render_index(&state, None).await
}

async fn submit(
    State(state): State<AppState>,
    Form(form): Form<ActionForm>,
) -> Result<Html<String>, WebError> {
    let message = match run_action(Arc::clone(&state.supervisor), form.action.clone()).await? {
        Ok(text) => {
            info!(action = %form.action, "Action completed");
            Flash { kind: "info", text }
        }
        Err(e) => {
            warn!(action = %form.action, error = %e, "Action failed");
            Flash {
                kind: "error",
                text: e.to_string(),
            }
        }
    };

    render_index(&state, Some(message)).await
}

/// 起動/停止を別タスクで実行する
///
/// リクエストが途中で破棄されても状態遷移は最後まで進む。
async fn run_action(
    supervisor: Arc<SimulatorSupervisor>,
    action: String,
) -> Result<Result<String, SupervisorError>, WebError> {
    tokio::spawn(async move {
        if action == STOP_ACTION {
            supervisor
                .stop_scenery()
                .await
                .map(|()| "シナリオを停止しました".to_string())
        } else {
            supervisor
                .start_scenery(&action)
                .await
                .map(|()| format!("シナリオ '{}' を起動しました", action))
        }
    })
    .await
    .map_err(|e| WebError::Internal(format!("状態遷移のタスクが異常終了しました: {}", e)))
}

async fn render_index(state: &AppState, message: Option<Flash>) -> Result<Html<String>, WebError> {
    let status = state.supervisor.status().await?;
    let (running, state_label) = match &status.scenery {
        RunningScenery::Running(name) => (Some(name.clone()), String::new()),
        RunningScenery::NotRunning => (None, "実行中のシナリオはありません".to_string()),
        RunningScenery::Transitioning(phase) => (None, format!("状態遷移中: {}", phase)),
        RunningScenery::Unknown => (
            None,
            "シナリオ不明のシミュレータプロセスが実行中です".to_string(),
        ),
    };

    let view = IndexView {
        running,
        state_label,
        pid: status.pid,
        can_stop: status.scenery != RunningScenery::NotRunning,
        sceneries: state.supervisor.descriptors()?,
        message,
    };
    state.render("index.html", &view)
}

async fn list_logs(State(state): State<AppState>) -> Result<Html<String>, WebError> {
    let logs: Vec<LogView> = state
        .catalog
        .list_logs()?
        .into_iter()
        .map(LogView::from)
        .collect();

    let mut context = Context::new();
    context.insert("logs", &logs);
    Ok(Html(state.templates.render("logs.html", &context)?))
}

async fn show_log(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Html<String>, WebError> {
    let log = LogView::from(state.catalog.get_log(id)?);

    let mut context = Context::new();
    context.insert("log", &log);
    Ok(Html(state.templates.render("log.html", &context)?))
}

async fn api_status(State(state): State<AppState>) -> Result<Json<SupervisorStatus>, WebError> {
    Ok(Json(state.supervisor.status().await?))
}
