use axum::{
    Extension, Form, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{StatusCode, header},
    middleware,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;

use crate::auth::{self, CredentialVerifier, CurrentSession, SESSION_COOKIE, SingleUserCredentials};
use crate::chart;
use crate::config::{Config, InstancePaths};
use crate::events::{self, EventSink, RotatingFileSink};
use crate::files::{self, SessionFileStore, sanitize_filename};
use crate::housekeeping;
use crate::session::{self, Flash, FlashKind, InMemorySessionStore, SessionStore};

const CHART_TYPES: [&str; 3] = ["bar", "line", "scatter"];

/// Shared application state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub paths: InstancePaths,
    pub sessions: Arc<dyn SessionStore>,
    pub files: Arc<SessionFileStore>,
    pub credentials: Arc<dyn CredentialVerifier>,
    pub events: Arc<dyn EventSink>,
    pub templates: Arc<Handlebars<'static>>,
}

impl AppState {
    /// Assemble state from explicit collaborators
    pub fn new(
        config: Config,
        credentials: Arc<dyn CredentialVerifier>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let paths = config.paths();
        paths.ensure()?;

        let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new(config.session_ttl()));
        let files = Arc::new(SessionFileStore::new(
            Arc::clone(&sessions),
            paths.clone(),
            config.max_files,
            config.max_upload_bytes,
        ));

        Ok(Self {
            config: Arc::new(config),
            paths,
            sessions,
            files,
            credentials,
            events,
            templates: Arc::new(templates()?),
        })
    }

    /// State with the configured single user and the rotating event log
    pub fn from_config(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        let credentials =
            SingleUserCredentials::new(&config.user_id, &config.username, &config.password)?;
        let paths = config.paths();
        let events = RotatingFileSink::open(
            &paths.events_log,
            config.event_log_max_bytes,
            config.event_log_backups,
        )?;
        Self::new(config, Arc::new(credentials), Arc::new(events))
    }
}

fn templates() -> Result<Handlebars<'static>, handlebars::TemplateError> {
    let mut registry = Handlebars::new();
    registry.set_strict_mode(false);
    registry.register_template_string("login", include_str!("./static/login.hbs"))?;
    registry.register_template_string("dashboard", include_str!("./static/dashboard.hbs"))?;
    Ok(registry)
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    // Leave headroom so oversized files still reach the validator
    let body_limit = state.config.max_upload_bytes * 2 + 64 * 1024;

    let protected = Router::new()
        .route("/dashboard", get(dashboard))
        .route("/upload", post(upload_file))
        .route("/update_file/:file_id", post(update_file))
        .route("/delete_file/:file_id", post(delete_file))
        .route("/generate_chart", post(generate_chart))
        .route("/charts/:filename", get(serve_chart))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    Router::new()
        .route("/", get(index))
        .route(
            "/login",
            get(auth::serve_login_page).post(auth::handle_login),
        )
        .route("/logout", get(auth::handle_logout).post(auth::handle_logout))
        .merge(protected)
        .nest_service(
            "/static",
            ServeDir::new(concat!(env!("CARGO_MANIFEST_DIR"), "/static")),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Sweep stale data, then serve until the process is stopped
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let paths = config.paths();
    paths.ensure()?;
    let report = housekeeping::sweep(&paths, config.max_age_hours);
    println!(
        "Housekeeping removed {} stale entries ({} failures)",
        report.removed, report.failed
    );

    let bind_addr = config.bind_addr.clone();
    let app = router(AppState::from_config(config)?);

    let listener = TcpListener::bind(&bind_addr).await?;
    println!("Listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn flash(current: &CurrentSession, kind: FlashKind, message: impl Into<String>) {
    session::lock(&current.handle).flash(kind, message);
}

fn dashboard_for(file_id: &str) -> Redirect {
    Redirect::to(&format!("/dashboard?file_id={}", urlencoding::encode(file_id)))
}

async fn index(State(state): State<AppState>, jar: CookieJar) -> Redirect {
    let logged_in = jar
        .get(SESSION_COOKIE)
        .and_then(|cookie| state.sessions.get(cookie.value()))
        .is_some();
    if logged_in {
        Redirect::to("/dashboard")
    } else {
        Redirect::to("/login")
    }
}

#[derive(Deserialize)]
struct DashboardQuery {
    file_id: Option<String>,
}

#[derive(Serialize)]
struct FileView {
    id: String,
    name: String,
    active: bool,
}

#[derive(Serialize)]
struct ChartView {
    filename: String,
    url: String,
    download_url: String,
}

#[derive(Serialize)]
struct DashboardView {
    files: Vec<FileView>,
    active_file: Option<FileView>,
    headers: Vec<String>,
    chart: Option<ChartView>,
    flashes: Vec<Flash>,
    chart_types: [&'static str; 3],
    file_count: usize,
    max_files: usize,
    can_upload: bool,
}

/// Render the dashboard
///
/// The active file is the one named by `file_id`, or the first upload.
async fn dashboard(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
    Query(query): Query<DashboardQuery>,
) -> Result<Html<String>, (StatusCode, String)> {
    let (records, active_chart, flashes) = {
        let mut session = session::lock(&current.handle);
        (
            session.files.clone(),
            session.chart.clone(),
            session.take_flashes(),
        )
    };

    let active = query
        .file_id
        .as_deref()
        .and_then(|id| records.iter().find(|f| f.id == id))
        .or_else(|| records.first());
    let headers = active
        .map(|record| files::get_headers(&record.server_path))
        .unwrap_or_default();

    let view = DashboardView {
        files: records
            .iter()
            .map(|f| FileView {
                id: f.id.clone(),
                name: f.original_filename.clone(),
                active: active.is_some_and(|a| a.id == f.id),
            })
            .collect(),
        active_file: active.map(|f| FileView {
            id: f.id.clone(),
            name: f.original_filename.clone(),
            active: true,
        }),
        headers,
        chart: active_chart.map(|chart| {
            let encoded = urlencoding::encode(&chart.filename).into_owned();
            ChartView {
                url: format!("/charts/{}", encoded),
                download_url: format!("/charts/{}?download=1", encoded),
                filename: chart.filename,
            }
        }),
        flashes,
        chart_types: CHART_TYPES,
        file_count: records.len(),
        max_files: state.files.max_files(),
        can_upload: records.len() < state.files.max_files(),
    };

    state
        .templates
        .render("dashboard", &view)
        .map(Html)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

// Pulls the `csv_file` part out of a multipart upload, or a message for the user.
async fn read_csv_field(
    multipart: &mut Multipart,
    max_bytes: usize,
) -> Result<(String, Bytes), String> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Err("No file part".to_string()),
            Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                return Err(too_large_message(max_bytes));
            }
            Err(e) => return Err(format!("Could not read upload: {}", e.body_text())),
        };
        if field.name() != Some("csv_file") {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        if filename.is_empty() {
            return Err("No selected file".to_string());
        }
        return match field.bytes().await {
            Ok(bytes) => Ok((filename, bytes)),
            Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => Err(too_large_message(max_bytes)),
            Err(e) => Err(format!("Could not read upload: {}", e.body_text())),
        };
    }
}

fn too_large_message(max_bytes: usize) -> String {
    format!(
        "File is too large. Maximum size is {} MB.",
        max_bytes / (1024 * 1024)
    )
}

/// Store a new upload in the session
async fn upload_file(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
    mut multipart: Multipart,
) -> Redirect {
    let (filename, bytes) = match read_csv_field(&mut multipart, state.config.max_upload_bytes).await {
        Ok(upload) => upload,
        Err(message) => {
            flash(&current, FlashKind::Error, message);
            return Redirect::to("/dashboard");
        }
    };

    match state.files.add_file(&current.token, &bytes, &filename) {
        Ok(record) => {
            state.events.emit(events::FILE_UPLOADED);
            flash(&current, FlashKind::Success, "File uploaded successfully.");
            dashboard_for(&record.id)
        }
        Err(e) => {
            log::info!("upload of {} rejected: {}", filename, e);
            flash(&current, FlashKind::Error, e.to_string());
            Redirect::to("/dashboard")
        }
    }
}

/// Replace the contents of an existing upload
async fn update_file(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
    Path(file_id): Path<String>,
    mut multipart: Multipart,
) -> Redirect {
    let (filename, bytes) = match read_csv_field(&mut multipart, state.config.max_upload_bytes).await {
        Ok(upload) => upload,
        Err(message) => {
            flash(&current, FlashKind::Error, message);
            return dashboard_for(&file_id);
        }
    };

    match state
        .files
        .replace_file(&current.token, &file_id, &bytes, &filename)
    {
        Ok(true) => {
            state.events.emit(events::FILE_UPDATED);
            flash(&current, FlashKind::Success, "File updated successfully.");
        }
        Ok(false) => flash(&current, FlashKind::Error, "File not found."),
        Err(e) => flash(&current, FlashKind::Error, e.to_string()),
    }
    dashboard_for(&file_id)
}

/// Remove an upload and, if it was charted, the active chart
async fn delete_file(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
    Path(file_id): Path<String>,
) -> Redirect {
    if state.files.remove_file(&current.token, &file_id) {
        state.events.emit(events::FILE_DELETED);
        flash(&current, FlashKind::Success, "File deleted successfully.");
    } else {
        flash(&current, FlashKind::Error, "File not found.");
    }
    Redirect::to("/dashboard")
}

#[derive(Deserialize)]
struct ChartForm {
    file_id: String,
    x_axis: String,
    y_axis: String,
    chart_type: String,
}

/// Generate a chart for the chosen file and columns
async fn generate_chart(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
    Form(form): Form<ChartForm>,
) -> Redirect {
    let Some(record) = state.files.get_file(&current.token, &form.file_id) else {
        flash(&current, FlashKind::Error, "File not found.");
        return Redirect::to("/dashboard");
    };
    let dir_id = session::lock(&current.handle).ensure_dir_id().to_string();
    let out_dir = state.paths.session_charts(&dir_id);

    let source = std::path::PathBuf::from(&record.server_path);
    let (x_axis, y_axis, chart_type) = (form.x_axis, form.y_axis, form.chart_type);
    let result = tokio::task::spawn_blocking(move || {
        chart::generate(&source, &x_axis, &y_axis, &chart_type, &out_dir)
    })
    .await;

    match result {
        Ok(Ok(filename)) => {
            if state
                .files
                .attach_chart(&current.handle, &record, &dir_id, &filename)
            {
                flash(&current, FlashKind::Success, "Chart generated successfully.");
                state.events.emit(events::CHART_GENERATED);
            } else {
                flash(&current, FlashKind::Error, "File not found.");
            }
        }
        Ok(Err(e)) => {
            log::info!("chart for {} failed: {}", record.id, e);
            flash(&current, FlashKind::Error, e.to_string());
        }
        Err(e) => {
            log::error!("chart task failed: {}", e);
            flash(
                &current,
                FlashKind::Error,
                format!("Could not generate chart: {}", e),
            );
        }
    }
    dashboard_for(&record.id)
}

#[derive(Deserialize)]
struct ChartQuery {
    download: Option<String>,
}

/// Serve a chart image from the session's chart directory
///
/// `?download` switches the response to an attachment.
async fn serve_chart(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
    Path(filename): Path<String>,
    Query(query): Query<ChartQuery>,
) -> Response {
    if sanitize_filename(&filename) != filename || !filename.ends_with(".png") {
        return (StatusCode::NOT_FOUND, "Chart not found").into_response();
    }
    let Some(dir_id) = session::lock(&current.handle).session_dir_id.clone() else {
        return (StatusCode::NOT_FOUND, "Chart not found").into_response();
    };

    let path = state.paths.session_charts(&dir_id).join(&filename);
    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(_) => return (StatusCode::NOT_FOUND, "Chart not found").into_response(),
    };

    let download = query
        .download
        .as_deref()
        .is_some_and(|flag| !matches!(flag, "0" | "false"));
    let disposition = if download {
        state.events.emit(events::CHART_DOWNLOADED);
        format!("attachment; filename=\"{}\"", filename)
    } else {
        format!("inline; filename=\"{}\"", filename)
    };

    (
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        data,
    )
        .into_response()
}
