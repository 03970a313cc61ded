//! Server test utilities.

use formstash_core::{AppConfig, ExpectedFiles, Limits, RouteConfig};
use formstash_server::{AppState, create_router};
use std::path::Path;
use tempfile::TempDir;

/// A test server wrapper with a private temp directory.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

fn route(expected_files: ExpectedFiles) -> RouteConfig {
    RouteConfig {
        expected_files,
        preserve_path: None,
        limits: Limits::default(),
    }
}

/// Routes available on every test server.
fn test_config(temp_dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.multipart.temp_dir = Some(temp_dir.to_path_buf());

    config.routes.insert(
        "avatar".into(),
        route(ExpectedFiles::fields().required("file", 1)),
    );
    config
        .routes
        .insert("gallery".into(), route(ExpectedFiles::any()));
    config.routes.insert(
        "document".into(),
        route(ExpectedFiles::fields().required("expectedFile", 1)),
    );
    config.routes.insert(
        "album".into(),
        route(
            ExpectedFiles::fields()
                .required("photos", 3)
                .optional("cover", 1),
        ),
    );
    config.routes.insert(
        "small".into(),
        RouteConfig {
            limits: Limits {
                file_size: Some(8),
                ..Limits::default()
            },
            ..route(ExpectedFiles::any())
        },
    );
    config
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with the default test routes.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        formstash_server::metrics::register_metrics();

        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let mut config = test_config(temp_dir.path());
        modifier(&mut config);

        let state = AppState::new(config);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Directory holding in-flight uploads.
    pub fn temp_dir(&self) -> &Path {
        self._temp_dir.path()
    }
}
