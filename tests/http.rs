#![cfg(feature = "web")]

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, Response, StatusCode, header};
use csv_visualizer::Config;
use csv_visualizer::app::{AppState, router};
use csv_visualizer::auth::SingleUserCredentials;
use csv_visualizer::events::{EventSink, MemorySink};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "csvvizboundary";
const SALES_CSV: &str = "Month,Revenue,Units\nJan,1200,10\nFeb,1800,14\nMar,950,8\n";

struct TestApp {
    _dir: TempDir,
    app: Router,
    config: Config,
    events: Arc<MemorySink>,
}

impl TestApp {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = Config::with_instance_dir(dir.path().join("instance"));
        let events = Arc::new(MemorySink::new());
        let sink: Arc<dyn EventSink> = events.clone();
        let credentials = SingleUserCredentials::new("1", "testuser", "password123").unwrap();
        let state = AppState::new(config.clone(), Arc::new(credentials), sink).unwrap();

        Self {
            _dir: dir,
            app: router(state),
            config,
            events,
        }
    }

    async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn login(&self) -> String {
        let response = self
            .send(form("/login", None, "username=testuser&password=password123"))
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/dashboard");
        session_cookie(&response)
    }

    async fn upload(&self, cookie: &str, path: &str, filename: &str, contents: &str) -> String {
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"csv_file\"; filename=\"{f}\"\r\nContent-Type: text/csv\r\n\r\n{c}\r\n--{b}--\r\n",
            b = BOUNDARY,
            f = filename,
            c = contents
        );
        let request = Request::post(path)
            .header(header::COOKIE, cookie)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap();
        let response = self.send(request).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        location(&response)
    }

    async fn dashboard(&self, cookie: &str, query: &str) -> String {
        let response = self.send(get(&format!("/dashboard{}", query), Some(cookie))).await;
        assert_eq!(response.status(), StatusCode::OK);
        body_text(response).await
    }
}

fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

fn form(uri: &str, cookie: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::post(uri).header(
        header::CONTENT_TYPE,
        "application/x-www-form-urlencoded",
    );
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn location(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

fn session_cookie(response: &Response<Body>) -> String {
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(set_cookie.contains("HttpOnly"));
    set_cookie.split(';').next().unwrap().to_string()
}

async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

fn file_id_from(location: &str) -> String {
    location
        .strip_prefix("/dashboard?file_id=")
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn protected_pages_redirect_to_login() {
    let app = TestApp::new();

    for uri in ["/dashboard", "/charts/sales_bar.png"] {
        let response = app.send(get(uri, None)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(location(&response).starts_with("/login?error=You%20must%20be%20logged%20in"));
    }

    let response = app.send(get("/dashboard", Some("session=bogus"))).await;
    assert!(location(&response).starts_with("/login?error="));
}

#[tokio::test]
async fn login_page_shows_query_messages() {
    let app = TestApp::new();
    let response = app
        .send(get("/login?error=Invalid%20credentials.", None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("Invalid credentials."));
}

#[tokio::test]
async fn login_rejects_bad_or_missing_credentials() {
    let app = TestApp::new();

    let response = app
        .send(form("/login", None, "username=testuser&password=wrong"))
        .await;
    assert_eq!(location(&response), "/login?error=Invalid%20credentials.");

    let response = app.send(form("/login", None, "username=&password=")).await;
    assert_eq!(
        location(&response),
        "/login?error=Username%20and%20password%20are%20required."
    );
    assert!(app.events.events().is_empty());
}

#[tokio::test]
async fn index_follows_login_state() {
    let app = TestApp::new();
    assert_eq!(location(&app.send(get("/", None)).await), "/login");

    let cookie = app.login().await;
    assert_eq!(location(&app.send(get("/", Some(&cookie))).await), "/dashboard");
    assert_eq!(app.events.events(), vec!["user_logged_in"]);
}

#[tokio::test]
async fn upload_then_chart_then_download() {
    let app = TestApp::new();
    let cookie = app.login().await;

    let redirect = app.upload(&cookie, "/upload", "sales.csv", SALES_CSV).await;
    let file_id = file_id_from(&redirect);
    assert!(file_id.starts_with("file_"));

    let page = app.dashboard(&cookie, &format!("?file_id={}", file_id)).await;
    assert!(page.contains("File uploaded successfully."));
    assert!(page.contains("sales.csv"));
    assert!(page.contains("<option value=\"Revenue\">"));

    // Flashes are shown once
    let page = app.dashboard(&cookie, "").await;
    assert!(!page.contains("File uploaded successfully."));

    let response = app
        .send(form(
            "/generate_chart",
            Some(&cookie),
            &format!("file_id={}&x_axis=Month&y_axis=Revenue&chart_type=bar", file_id),
        ))
        .await;
    assert_eq!(location(&response), redirect);

    let page = app.dashboard(&cookie, "").await;
    assert!(page.contains("Chart generated successfully."));
    assert!(page.contains("/charts/sales_bar.png"));

    let response = app.send(get("/charts/sales_bar.png", Some(&cookie))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    let png = body_bytes(response).await;
    assert_eq!(&png[..4], b"\x89PNG");

    let response = app
        .send(get("/charts/sales_bar.png?download=1", Some(&cookie)))
        .await;
    let disposition = response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment"));

    assert_eq!(
        app.events.events(),
        vec![
            "user_logged_in",
            "file_uploaded",
            "chart_generated",
            "chart_downloaded"
        ]
    );
}

#[tokio::test]
async fn deleting_charted_file_removes_chart_from_dashboard() {
    let app = TestApp::new();
    let cookie = app.login().await;
    let file_id = file_id_from(&app.upload(&cookie, "/upload", "sales.csv", SALES_CSV).await);

    app.send(form(
        "/generate_chart",
        Some(&cookie),
        &format!("file_id={}&x_axis=Month&y_axis=Revenue&chart_type=line", file_id),
    ))
    .await;
    assert!(app.dashboard(&cookie, "").await.contains("/charts/sales_line.png"));

    app.send(form(&format!("/delete_file/{}", file_id), Some(&cookie), ""))
        .await;
    let page = app.dashboard(&cookie, "").await;
    assert!(page.contains("File deleted successfully."));
    assert!(!page.contains("/charts/"));
}

#[tokio::test]
async fn chart_errors_are_flashed() {
    let app = TestApp::new();
    let cookie = app.login().await;
    let file_id = file_id_from(&app.upload(&cookie, "/upload", "sales.csv", SALES_CSV).await);

    app.send(form(
        "/generate_chart",
        Some(&cookie),
        &format!("file_id={}&x_axis=Month&y_axis=Profit&chart_type=bar", file_id),
    ))
    .await;
    let page = app.dashboard(&cookie, "").await;
    assert!(page.contains("Profit"));
    assert!(!page.contains("/charts/"));

    app.send(form(
        "/generate_chart",
        Some(&cookie),
        &format!("file_id={}&x_axis=Month&y_axis=Revenue&chart_type=pie", file_id),
    ))
    .await;
    let page = app.dashboard(&cookie, "").await;
    assert!(page.contains("Invalid chart type"));

    app.send(form(
        "/generate_chart",
        Some(&cookie),
        "file_id=file_missing&x_axis=Month&y_axis=Revenue&chart_type=bar",
    ))
    .await;
    let page = app.dashboard(&cookie, "").await;
    assert!(page.contains("File not found."));
}

#[tokio::test]
async fn invalid_uploads_are_rejected() {
    let app = TestApp::new();
    let cookie = app.login().await;

    let redirect = app.upload(&cookie, "/upload", "notes.txt", "a,b\n1,2\n").await;
    assert_eq!(redirect, "/dashboard");
    let page = app.dashboard(&cookie, "").await;
    assert!(page.contains("Invalid file type. Please upload a CSV file."));
    assert!(page.contains("No files uploaded yet."));

    app.upload(&cookie, "/upload", "", "a,b\n1,2\n").await;
    assert!(app.dashboard(&cookie, "").await.contains("No selected file"));
}

#[tokio::test]
async fn capacity_is_enforced() {
    let app = TestApp::new();
    let cookie = app.login().await;

    for n in 0..5 {
        let redirect = app
            .upload(&cookie, "/upload", &format!("data{}.csv", n), SALES_CSV)
            .await;
        assert!(redirect.starts_with("/dashboard?file_id="));
    }
    let redirect = app.upload(&cookie, "/upload", "extra.csv", SALES_CSV).await;
    assert_eq!(redirect, "/dashboard");
    let page = app.dashboard(&cookie, "").await;
    assert!(page.contains("Maximum number of files reached (5)."));
}

#[tokio::test]
async fn update_and_delete_files() {
    let app = TestApp::new();
    let cookie = app.login().await;
    let file_id = file_id_from(&app.upload(&cookie, "/upload", "sales.csv", SALES_CSV).await);

    let inventory = "Product,Price,Stock\nWidget,29.99,100\nGadget,49.99,50\n";
    let path = format!("/update_file/{}", file_id);
    let redirect = app.upload(&cookie, &path, "inventory.csv", inventory).await;
    assert_eq!(file_id_from(&redirect), file_id);

    let page = app.dashboard(&cookie, &format!("?file_id={}", file_id)).await;
    assert!(page.contains("File updated successfully."));
    assert!(page.contains("inventory.csv"));
    assert!(page.contains("<option value=\"Stock\">"));

    app.upload(&cookie, "/update_file/file_missing", "x.csv", inventory).await;
    assert!(app.dashboard(&cookie, "").await.contains("File not found."));

    let response = app
        .send(form(&format!("/delete_file/{}", file_id), Some(&cookie), ""))
        .await;
    assert_eq!(location(&response), "/dashboard");
    let page = app.dashboard(&cookie, "").await;
    assert!(page.contains("File deleted successfully."));
    assert!(page.contains("No files uploaded yet."));

    let events = app.events.events();
    assert!(events.contains(&"file_updated".to_string()));
    assert!(events.contains(&"file_deleted".to_string()));
}

#[tokio::test]
async fn unsafe_chart_names_are_not_served() {
    let app = TestApp::new();
    let cookie = app.login().await;

    for uri in ["/charts/..%2Fevents.log", "/charts/sales_bar.txt", "/charts/nothing.png"] {
        let response = app.send(get(uri, Some(&cookie))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
    }
}

#[tokio::test]
async fn logout_purges_session_data() {
    let app = TestApp::new();
    let cookie = app.login().await;
    app.upload(&cookie, "/upload", "sales.csv", SALES_CSV).await;

    let uploads = app.config.paths().uploads;
    assert_eq!(fs::read_dir(&uploads).unwrap().count(), 1);

    let response = app.send(form("/logout", Some(&cookie), "")).await;
    assert_eq!(
        location(&response),
        "/login?message=You%20have%20been%20successfully%20logged%20out."
    );
    assert_eq!(fs::read_dir(&uploads).unwrap().count(), 0);

    let response = app.send(get("/dashboard", Some(&cookie))).await;
    assert!(location(&response).starts_with("/login?error="));
    assert!(app.events.events().contains(&"user_logged_out".to_string()));
}

#[tokio::test]
async fn stylesheet_is_served() {
    let app = TestApp::new();
    let response = app.send(get("/static/style.css", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
}
