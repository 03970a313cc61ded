//! The multipart plugin and its per-route hooks.

use crate::events::EventSource;
use crate::parser::spawn_parser;
use crate::session::{DecodeSession, DecodedForm};
use axum::extract::Request;
use axum::http::header::CONTENT_TYPE;
use formstash_core::{
    DecodeError, ExpectedFiles, LimitPolicy, MultipartError, MultipartOptions, RouteOptions,
};
use formstash_storage::TempFileStore;
use std::sync::Arc;

const FORM_DATA: &str = "multipart/form-data";

/// Global decoder options plus the temp file store.
#[derive(Clone, Debug)]
pub struct Multipart {
    options: MultipartOptions,
    store: TempFileStore,
}

impl Multipart {
    pub fn new(options: MultipartOptions, store: TempFileStore) -> Self {
        Self { options, store }
    }

    pub fn options(&self) -> &MultipartOptions {
        &self.options
    }

    pub fn store(&self) -> &TempFileStore {
        &self.store
    }

    /// Build the decoder for one route.
    pub fn hook(&self, expected: &ExpectedFiles, route: &RouteOptions) -> MultipartHook {
        let policy = expected.compile();
        MultipartHook {
            policy: Arc::new(policy.limits),
            required: policy.required.into(),
            options: Arc::new(self.options.merge(route)),
            store: self.store.clone(),
            expected: expected.clone(),
        }
    }
}

/// A route's compiled decoder.
#[derive(Clone, Debug)]
pub struct MultipartHook {
    policy: Arc<LimitPolicy>,
    required: Arc<[String]>,
    options: Arc<MultipartOptions>,
    store: TempFileStore,
    expected: ExpectedFiles,
}

impl MultipartHook {
    pub fn expected_files(&self) -> &ExpectedFiles {
        &self.expected
    }

    pub fn options(&self) -> &MultipartOptions {
        &self.options
    }

    pub fn policy(&self) -> &LimitPolicy {
        &self.policy
    }

    /// Required file fields, in declaration order.
    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// Decode a request body.
    ///
    /// Anything other than `multipart/form-data` is rejected with
    /// `BAD_CONTENT_TYPE` before the body is touched.
    pub async fn decode(&self, req: Request) -> Result<DecodedForm, DecodeError> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if !is_form_data(&content_type) {
            return Err(MultipartError::bad_content_type(&content_type).into());
        }
        let boundary =
            multer::parse_boundary(&content_type).map_err(|e| DecodeError::Parse(Box::new(e)))?;

        let body = req.into_body().into_data_stream();
        let source = spawn_parser(body, boundary, (*self.options).clone());
        self.decode_events(source).await
    }

    /// Run a session over an already running event source.
    pub async fn decode_events(&self, source: EventSource) -> Result<DecodedForm, DecodeError> {
        DecodeSession::new(
            source,
            self.policy.clone(),
            self.required.clone(),
            &self.store,
            self.options.limits.field_name_size(),
        )
        .run()
        .await
    }
}

fn is_form_data(content_type: &str) -> bool {
    content_type
        .get(..FORM_DATA.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(FORM_DATA))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use formstash_core::ErrorCode;

    fn plugin(dir: &std::path::Path) -> Multipart {
        Multipart::new(MultipartOptions::default(), TempFileStore::new(dir))
    }

    #[test]
    fn test_content_type_prefix_is_case_insensitive() {
        assert!(is_form_data("multipart/form-data; boundary=x"));
        assert!(is_form_data("Multipart/Form-Data; boundary=x"));
        assert!(!is_form_data("multipart/mixed; boundary=x"));
        assert!(!is_form_data("application/json"));
        assert!(!is_form_data(""));
    }

    #[test]
    fn test_route_options_override_global() {
        let dir = tempfile::tempdir().unwrap();
        let global = MultipartOptions {
            preserve_path: true,
            limits: formstash_core::Limits {
                files: Some(5),
                file_size: Some(1024),
                ..Default::default()
            },
        };
        let multipart = Multipart::new(global, TempFileStore::new(dir.path()));
        let route = RouteOptions {
            preserve_path: Some(false),
            limits: formstash_core::Limits {
                file_size: Some(10),
                ..Default::default()
            },
        };

        let hook = multipart.hook(&ExpectedFiles::fields().required("avatar", 1), &route);
        assert!(!hook.options().preserve_path);
        assert_eq!(hook.options().limits.files, Some(5));
        assert_eq!(hook.options().limits.file_size, Some(10));
        assert_eq!(hook.required(), ["avatar".to_string()]);
        assert_eq!(hook.policy().max_for("avatar"), Some(1));
    }

    #[tokio::test]
    async fn test_non_multipart_request_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let hook = plugin(dir.path()).hook(&ExpectedFiles::any(), &RouteOptions::default());

        let req = Request::builder()
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let err = hook.decode(req).await.unwrap_err();
        let err = err.as_multipart().unwrap();
        assert_eq!(err.code, ErrorCode::BadContentType);
        assert_eq!(err.status, 415);
        assert_eq!(err.message, "Unsupported content type: application/json");

        let req = Request::builder().body(Body::empty()).unwrap();
        let err = hook.decode(req).await.unwrap_err();
        assert_eq!(
            err.as_multipart().map(|e| e.message.as_str()),
            Some("Unsupported content type: ")
        );
    }

    #[tokio::test]
    async fn test_missing_boundary_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let hook = plugin(dir.path()).hook(&ExpectedFiles::any(), &RouteOptions::default());

        let req = Request::builder()
            .header(CONTENT_TYPE, "multipart/form-data")
            .body(Body::empty())
            .unwrap();
        let err = hook.decode(req).await.unwrap_err();
        assert!(matches!(err, DecodeError::Parse(_)));
    }
}
