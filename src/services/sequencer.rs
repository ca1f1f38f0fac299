//! Signed-URL upload: ask the origin server for a transfer target (START),
//! send the bytes straight to storage (TRANSFER), then confirm with the
//! origin server (FINISH).
//!
//! The protocol lives in [`UploadSequencer::step`], a pure function from the
//! current phase and the last response to the next phase plus a list of
//! effects. [`UploadSequencer::upload`] runs those effects against an
//! [`HttpTransport`] and an [`UploadUi`].

use crate::error::{TransportError, UploadError};
use crate::models::{
    AuthorizationResponse, FinishResponse, SelectedFile, StartRequest, TransferTarget,
    UploadReceipt, UploadRequest,
};
use crate::services::form::UploadForm;
use crate::services::transport::{HttpRequest, HttpResponse, HttpTransport, RequestBody};
use crate::services::ui::UploadUi;
use crate::utils::validation::validate_file_size;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const HEADER_TRANSFER_TYPE: &str = "X-Transfer-Type";
pub const HEADER_CSRF_TOKEN: &str = "X-CSRFToken";
pub const HEADER_UPLOAD_ACTION: &str = "X-Upload-Action";
pub const HEADER_UPLOAD_SIGNATURE: &str = "X-Upload-Signature";

pub const TRANSFER_TYPE_SIGNED_URL: &str = "SIGNED_URL";
pub const ACTION_START: &str = "START";
pub const ACTION_FINISH: &str = "FINISH";

/// Storage endpoints acknowledge a completed transfer with 204 No Content.
pub const TRANSFER_SUCCESS_STATUS: u16 = 204;

#[derive(Debug)]
pub enum Phase {
    Ready,
    Authorizing,
    Transferring { token: String },
    Finishing,
    Completed { redirect_url: String },
    Failed(UploadError),
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed { .. } | Phase::Failed(_))
    }

    fn name(&self) -> &'static str {
        match self {
            Phase::Ready => "ready",
            Phase::Authorizing => "authorizing",
            Phase::Transferring { .. } => "transferring",
            Phase::Finishing => "finishing",
            Phase::Completed { .. } => "completed",
            Phase::Failed(_) => "failed",
        }
    }
}

#[derive(Debug)]
pub enum Event {
    Begin,
    Response(Result<HttpResponse, TransportError>),
}

#[derive(Debug, Clone)]
pub enum Effect {
    DisableControl,
    EnableControl,
    Send(HttpRequest),
    Navigate(String),
    Alert(String),
}

#[derive(Debug)]
pub struct Transition {
    pub phase: Phase,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(phase: Phase, effects: Vec<Effect>) -> Self {
        Self { phase, effects }
    }

    fn fail(error: UploadError) -> Self {
        let effects = vec![Effect::EnableControl, Effect::Alert(error.to_string())];
        Self {
            phase: Phase::Failed(error),
            effects,
        }
    }
}

/// Drives one file through START, TRANSFER and FINISH. Single-use.
pub struct UploadSequencer {
    request: UploadRequest,
    upload_url: String,
    bearer_token: Option<String>,
    transport: Arc<dyn HttpTransport>,
    ui: Arc<dyn UploadUi>,
}

impl UploadSequencer {
    /// Takes the first of `files`; the rest are ignored. Fails before any
    /// network activity when nothing is selected or the file exceeds the
    /// form's limit, leaving the submit control enabled.
    pub fn new<I>(
        files: I,
        form: &UploadForm,
        upload_url: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
        ui: Arc<dyn UploadUi>,
    ) -> Result<Self, UploadError>
    where
        I: IntoIterator<Item = SelectedFile>,
    {
        let checked = files
            .into_iter()
            .next()
            .ok_or(UploadError::NoFileSelected)
            .and_then(|file| validate_file_size(file.size, form.max_file_size).map(|_| file));

        let file = match checked {
            Ok(file) => file,
            Err(e) => {
                debug!(code = e.code(), "Rejected before upload: {}", e);
                ui.set_submit_enabled(true);
                ui.alert(&e.to_string());
                return Err(e);
            }
        };

        Ok(Self {
            request: UploadRequest {
                file,
                is_private: form.is_private,
                csrf_token: form.csrf_token.clone(),
            },
            upload_url: upload_url.into(),
            bearer_token: None,
            transport,
            ui,
        })
    }

    /// Sends `Authorization: Bearer` to the origin server (never to storage).
    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token;
        self
    }

    pub fn request(&self) -> &UploadRequest {
        &self.request
    }

    /// Runs the whole sequence. Every failure re-enables the submit control
    /// and raises an alert before it is returned.
    pub async fn upload(&self) -> Result<UploadReceipt, UploadError> {
        info!(
            "📤 Uploading {} ({} bytes, private: {})",
            self.request.file.name, self.request.file.size, self.request.is_private
        );

        let mut transition = self.step(Phase::Ready, Event::Begin);

        loop {
            let request = self.apply(std::mem::take(&mut transition.effects));
            if transition.phase.is_terminal() {
                break;
            }

            let Some(request) = request else {
                // Every non-terminal phase is entered together with a request
                unreachable!("phase {} produced no request", transition.phase.name());
            };

            let result = self.transport.execute(request).await;
            transition = self.step(transition.phase, Event::Response(result));
        }

        match transition.phase {
            Phase::Completed { redirect_url } => {
                info!("✅ Upload of {} completed", self.request.file.name);
                Ok(UploadReceipt {
                    filename: self.request.file.name.clone(),
                    redirect_url,
                })
            }
            Phase::Failed(e) => {
                // The alert effect already told the user
                debug!(code = e.code(), "Upload failed: {}", e);
                Err(e)
            }
            phase => unreachable!("loop exits only on terminal phases, got {}", phase.name()),
        }
    }

    /// Applies UI effects in order and returns the request to send, if any.
    fn apply(&self, effects: Vec<Effect>) -> Option<HttpRequest> {
        let mut pending = None;
        for effect in effects {
            match effect {
                Effect::DisableControl => self.ui.set_submit_enabled(false),
                Effect::EnableControl => self.ui.set_submit_enabled(true),
                Effect::Alert(message) => self.ui.alert(&message),
                Effect::Navigate(location) => self.ui.navigate(&location),
                Effect::Send(request) => pending = Some(request),
            }
        }
        pending
    }

    /// The upload protocol as a transition function. No I/O happens here.
    pub fn step(&self, phase: Phase, event: Event) -> Transition {
        match (phase, event) {
            (Phase::Ready, Event::Begin) => match self.start_request() {
                Ok(request) => Transition::to(
                    Phase::Authorizing,
                    vec![Effect::DisableControl, Effect::Send(request)],
                ),
                Err(e) => {
                    let mut failed = Transition::fail(UploadError::AuthorizationFailed(e));
                    failed.effects.insert(0, Effect::DisableControl);
                    failed
                }
            },

            (Phase::Authorizing, Event::Response(result)) => {
                match result.and_then(|res| decode_json::<AuthorizationResponse>(&res)) {
                    Ok(auth) => {
                        info!("🔑 Upload authorized, sending to {}", auth.request_data.url);
                        let request = self.transfer_request(&auth.request_data);
                        Transition::to(
                            Phase::Transferring { token: auth.token },
                            vec![Effect::Send(request)],
                        )
                    }
                    Err(e) => Transition::fail(UploadError::AuthorizationFailed(e)),
                }
            }

            (Phase::Transferring { token }, Event::Response(result)) => {
                match result.and_then(expect_transfer_status) {
                    Ok(()) => Transition::to(
                        Phase::Finishing,
                        vec![Effect::Send(self.finish_request(&token))],
                    ),
                    Err(e) => Transition::fail(UploadError::TransferFailed(e)),
                }
            }

            (Phase::Finishing, Event::Response(result)) => {
                match result.and_then(|res| decode_json::<FinishResponse>(&res)) {
                    Ok(finish) => Transition::to(
                        Phase::Completed {
                            redirect_url: finish.redirect_url.clone(),
                        },
                        vec![Effect::Navigate(finish.redirect_url)],
                    ),
                    Err(e) => Transition::fail(UploadError::FinishFailed(e)),
                }
            }

            (phase, event) => {
                warn!("Ignoring {:?} in phase {}", event, phase.name());
                Transition::to(phase, Vec::new())
            }
        }
    }

    /// START and FINISH post back to the page hosting the form. Django's CSRF
    /// check over HTTPS rejects posts carrying neither `Origin` nor `Referer`.
    fn origin_request(&self, action: &str) -> HttpRequest {
        let mut request = HttpRequest::new("POST", self.upload_url.as_str())
            .header(HEADER_TRANSFER_TYPE, TRANSFER_TYPE_SIGNED_URL)
            .header(HEADER_CSRF_TOKEN, self.request.csrf_token.as_str())
            .header(HEADER_UPLOAD_ACTION, action)
            .header("Referer", self.upload_url.as_str());

        if let Ok(url) = reqwest::Url::parse(&self.upload_url) {
            request = request.header("Origin", url.origin().ascii_serialization());
        }

        if let Some(token) = &self.bearer_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        request
    }

    fn start_request(&self) -> Result<HttpRequest, TransportError> {
        let body = serde_urlencoded::to_string(StartRequest {
            filename: self.request.file.name.clone(),
            is_private: self.request.is_private,
        })
        .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        Ok(self
            .origin_request(ACTION_START)
            .body(RequestBody::UrlEncoded(body)))
    }

    fn transfer_request(&self, target: &TransferTarget) -> HttpRequest {
        let mut request = HttpRequest::new(target.method.as_str(), target.url.as_str());
        for (name, value) in &target.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request.body(RequestBody::Multipart {
            fields: target.body.clone(),
            file: self.request.file.clone(),
        })
    }

    fn finish_request(&self, token: &str) -> HttpRequest {
        self.origin_request(ACTION_FINISH)
            .header(HEADER_UPLOAD_SIGNATURE, token)
    }
}

fn decode_json<T: DeserializeOwned>(response: &HttpResponse) -> Result<T, TransportError> {
    if !response.is_success() {
        return Err(TransportError::Status {
            status: response.status,
            body: response.text(),
        });
    }
    serde_json::from_slice(&response.body).map_err(|e| TransportError::Decode(e.to_string()))
}

fn expect_transfer_status(response: HttpResponse) -> Result<(), TransportError> {
    if response.status == TRANSFER_SUCCESS_STATUS {
        Ok(())
    } else {
        Err(TransportError::UnexpectedStatus {
            expected: TRANSFER_SUCCESS_STATUS,
            actual: response.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    const MIB: u64 = 1024 * 1024;
    const UPLOAD_URL: &str = "http://origin/accounts/";

    /// Records every call and answers from a script. Also records whether
    /// the submit control was enabled at the moment each call was issued.
    struct ScriptedTransport {
        ui: Arc<RecordingUi>,
        replies: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        calls: Mutex<Vec<(HttpRequest, bool)>>,
    }

    impl ScriptedTransport {
        fn new(ui: Arc<RecordingUi>, replies: Vec<Result<HttpResponse, TransportError>>) -> Self {
            Self {
                ui,
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(HttpRequest, bool)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            let enabled = self.ui.is_submit_enabled();
            self.calls.lock().unwrap().push((request, enabled));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected extra request")
        }
    }

    struct RecordingUi {
        enabled: AtomicBool,
        alerts: Mutex<Vec<String>>,
        navigations: Mutex<Vec<String>>,
    }

    impl RecordingUi {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                enabled: AtomicBool::new(true),
                alerts: Mutex::new(Vec::new()),
                navigations: Mutex::new(Vec::new()),
            })
        }
    }

    impl UploadUi for RecordingUi {
        fn set_submit_enabled(&self, enabled: bool) {
            self.enabled.store(enabled, Ordering::SeqCst);
        }
        fn is_submit_enabled(&self) -> bool {
            self.enabled.load(Ordering::SeqCst)
        }
        fn alert(&self, message: &str) {
            self.alerts.lock().unwrap().push(message.to_string());
        }
        fn navigate(&self, location: &str) {
            self.navigations.lock().unwrap().push(location.to_string());
        }
    }

    fn file_of_size(size: u64) -> SelectedFile {
        // Size is what the browser reports; content stays small in tests
        let mut file = SelectedFile::new("report.pdf", b"%PDF-1.5 test".to_vec());
        file.size = size;
        file
    }

    fn form() -> UploadForm {
        UploadForm::new("csrf-123", Some(100 * MIB), false)
    }

    fn start_reply(token: &str, url: &str) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse::new(
            200,
            format!(
                r#"{{"token":"{}","request_data":{{"url":"{}","method":"PUT","headers":{{}}}}}}"#,
                token, url
            ),
        ))
    }

    fn finish_reply(redirect: &str) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse::new(
            200,
            format!(r#"{{"redirect_url":"{}"}}"#, redirect),
        ))
    }

    fn sequencer(
        replies: Vec<Result<HttpResponse, TransportError>>,
    ) -> (UploadSequencer, Arc<ScriptedTransport>, Arc<RecordingUi>) {
        let ui = RecordingUi::new();
        let transport = Arc::new(ScriptedTransport::new(ui.clone(), replies));
        let seq = UploadSequencer::new(
            vec![file_of_size(50 * MIB)],
            &form(),
            UPLOAD_URL,
            transport.clone(),
            ui.clone(),
        )
        .unwrap();
        (seq, transport, ui)
    }

    #[tokio::test]
    async fn test_full_upload_scenario() {
        let (seq, transport, ui) = sequencer(vec![
            start_reply("abc", "https://s3/x"),
            Ok(HttpResponse::new(204, "")),
            finish_reply("/files/1/"),
        ]);

        let receipt = seq.upload().await.unwrap();
        assert_eq!(receipt.redirect_url, "/files/1/");
        assert_eq!(receipt.filename, "report.pdf");

        let calls = transport.calls();
        assert_eq!(calls.len(), 3);

        let (start, enabled) = &calls[0];
        assert!(!enabled, "control must be disabled before START is sent");
        assert_eq!(start.method, "POST");
        assert_eq!(start.url, UPLOAD_URL);
        assert_eq!(start.header_value("X-Transfer-Type"), Some("SIGNED_URL"));
        assert_eq!(start.header_value("X-Upload-Action"), Some("START"));
        assert_eq!(start.header_value("X-CSRFToken"), Some("csrf-123"));
        match &start.body {
            RequestBody::UrlEncoded(body) => {
                let parsed: StartRequest = serde_urlencoded::from_str(body).unwrap();
                assert_eq!(
                    parsed,
                    StartRequest {
                        filename: "report.pdf".to_string(),
                        is_private: false
                    }
                );
            }
            other => panic!("unexpected START body {:?}", other),
        }

        let (transfer, _) = &calls[1];
        assert_eq!(transfer.method, "PUT");
        assert_eq!(transfer.url, "https://s3/x");
        assert!(transfer.header_value("X-CSRFToken").is_none());

        let (finish, _) = &calls[2];
        assert_eq!(finish.url, UPLOAD_URL);
        assert_eq!(finish.header_value("X-Upload-Action"), Some("FINISH"));
        assert_eq!(finish.header_value("X-Upload-Signature"), Some("abc"));
        assert_eq!(finish.header_value("X-CSRFToken"), Some("csrf-123"));

        assert_eq!(*ui.navigations.lock().unwrap(), vec!["/files/1/".to_string()]);
        assert!(ui.alerts.lock().unwrap().is_empty());
    }

    #[test]
    fn test_oversized_file_rejected_without_network() {
        let ui = RecordingUi::new();
        ui.set_submit_enabled(false);
        let transport = Arc::new(ScriptedTransport::new(ui.clone(), vec![]));

        let result = UploadSequencer::new(
            vec![file_of_size(150 * MIB)],
            &form(),
            UPLOAD_URL,
            transport.clone(),
            ui.clone(),
        );

        assert!(matches!(result, Err(UploadError::FileTooLarge { .. })));
        assert!(ui.is_submit_enabled());
        assert!(transport.calls().is_empty());
        assert_eq!(ui.alerts.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_file_at_limit_accepted() {
        let ui = RecordingUi::new();
        let transport = Arc::new(ScriptedTransport::new(ui.clone(), vec![]));
        let result = UploadSequencer::new(
            vec![file_of_size(100 * MIB)],
            &form(),
            UPLOAD_URL,
            transport,
            ui,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_only_first_file_is_used() {
        let ui = RecordingUi::new();
        let transport = Arc::new(ScriptedTransport::new(ui.clone(), vec![]));
        let second = SelectedFile::new("second.txt", b"2".to_vec());

        let seq = UploadSequencer::new(
            vec![file_of_size(MIB), second],
            &form(),
            UPLOAD_URL,
            transport,
            ui,
        )
        .unwrap();
        assert_eq!(seq.request().file.name, "report.pdf");
    }

    #[test]
    fn test_no_file_selected() {
        let ui = RecordingUi::new();
        let transport = Arc::new(ScriptedTransport::new(ui.clone(), vec![]));
        let result = UploadSequencer::new(Vec::new(), &form(), UPLOAD_URL, transport, ui.clone());
        assert!(matches!(result, Err(UploadError::NoFileSelected)));
        assert!(ui.is_submit_enabled());
    }

    #[tokio::test]
    async fn test_start_network_error_stops_sequence() {
        let (seq, transport, ui) =
            sequencer(vec![Err(TransportError::Network("connection refused".into()))]);

        let err = seq.upload().await.unwrap_err();
        assert!(matches!(err, UploadError::AuthorizationFailed(TransportError::Network(_))));
        assert_eq!(transport.calls().len(), 1);
        assert!(ui.is_submit_enabled());
        assert_eq!(ui.alerts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_start_non_2xx_stops_sequence() {
        let (seq, transport, ui) = sequencer(vec![Ok(HttpResponse::new(403, "CSRF failed"))]);

        let err = seq.upload().await.unwrap_err();
        match err {
            UploadError::AuthorizationFailed(TransportError::Status { status, body }) => {
                assert_eq!(status, 403);
                assert_eq!(body, "CSRF failed");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(transport.calls().len(), 1);
        assert!(ui.is_submit_enabled());
    }

    #[tokio::test]
    async fn test_start_undecodable_body() {
        let (seq, _transport, ui) = sequencer(vec![Ok(HttpResponse::new(200, "<html>"))]);
        let err = seq.upload().await.unwrap_err();
        assert!(matches!(err, UploadError::AuthorizationFailed(TransportError::Decode(_))));
        assert!(ui.is_submit_enabled());
    }

    #[tokio::test]
    async fn test_transfer_200_is_a_failure() {
        let (seq, transport, ui) = sequencer(vec![
            start_reply("abc", "https://s3/x"),
            Ok(HttpResponse::new(200, "")),
        ]);

        let err = seq.upload().await.unwrap_err();
        assert!(matches!(
            err,
            UploadError::TransferFailed(TransportError::UnexpectedStatus {
                expected: 204,
                actual: 200
            })
        ));
        assert_eq!(transport.calls().len(), 2, "FINISH must not be called");
        assert!(ui.is_submit_enabled());
        assert!(ui.navigations.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_finish_failure() {
        let (seq, transport, ui) = sequencer(vec![
            start_reply("abc", "https://s3/x"),
            Ok(HttpResponse::new(204, "")),
            Ok(HttpResponse::new(500, "oops")),
        ]);

        let err = seq.upload().await.unwrap_err();
        assert!(matches!(err, UploadError::FinishFailed(TransportError::Status { status: 500, .. })));
        assert_eq!(transport.calls().len(), 3);
        assert!(ui.is_submit_enabled());
        assert!(ui.navigations.lock().unwrap().is_empty());
    }

    #[test]
    fn test_step_is_linear() {
        let (seq, _transport, _ui) = sequencer(vec![]);

        let t = seq.step(Phase::Ready, Event::Begin);
        assert!(matches!(t.phase, Phase::Authorizing));
        assert!(matches!(t.effects[0], Effect::DisableControl));
        assert!(matches!(t.effects[1], Effect::Send(_)));

        let t = seq.step(t.phase, Event::Response(start_reply("tok", "https://s3/y")));
        match &t.phase {
            Phase::Transferring { token } => assert_eq!(token, "tok"),
            other => panic!("unexpected phase {:?}", other),
        }

        let t = seq.step(t.phase, Event::Response(Ok(HttpResponse::new(204, ""))));
        assert!(matches!(t.phase, Phase::Finishing));
        match &t.effects[0] {
            Effect::Send(req) => assert_eq!(req.header_value("X-Upload-Signature"), Some("tok")),
            other => panic!("unexpected effect {:?}", other),
        }

        let t = seq.step(t.phase, Event::Response(finish_reply("/files/9/")));
        assert!(t.phase.is_terminal());
        assert!(matches!(&t.effects[0], Effect::Navigate(url) if url == "/files/9/"));

        // Terminal phases ignore further events
        let t = seq.step(t.phase, Event::Begin);
        assert!(t.effects.is_empty());
    }

    #[test]
    fn test_transfer_request_puts_file_last() {
        let (seq, _transport, _ui) = sequencer(vec![]);
        let target = TransferTarget {
            url: "https://bucket.s3.amazonaws.com/".to_string(),
            method: "POST".to_string(),
            headers: [("x-amz-acl".to_string(), "private".to_string())].into(),
            body: vec![
                ("key".to_string(), "uploads/report.pdf".to_string()),
                ("policy".to_string(), "p".to_string()),
            ],
        };

        let req = seq.transfer_request(&target);
        assert_eq!(req.header_value("x-amz-acl"), Some("private"));
        match req.body {
            RequestBody::Multipart { fields, file } => {
                assert_eq!(fields[0].0, "key");
                assert_eq!(fields[1].0, "policy");
                assert_eq!(file.name, "report.pdf");
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn test_bearer_token_only_on_origin_requests() {
        let (seq, _transport, _ui) = sequencer(vec![]);
        let seq = seq.with_bearer_token(Some("jwt".to_string()));

        let start = seq.start_request().unwrap();
        assert_eq!(start.header_value("Authorization"), Some("Bearer jwt"));

        let target = TransferTarget {
            url: "https://s3/x".to_string(),
            method: "PUT".to_string(),
            headers: Default::default(),
            body: Vec::new(),
        };
        assert!(seq.transfer_request(&target).header_value("Authorization").is_none());
    }

    #[test]
    fn test_origin_requests_name_the_form_page() {
        let (seq, _transport, _ui) = sequencer(vec![]);

        for req in [seq.start_request().unwrap(), seq.finish_request("tok")] {
            assert_eq!(req.header_value("Referer"), Some(UPLOAD_URL));
            assert_eq!(req.header_value("Origin"), Some("http://origin"));
        }

        let target = TransferTarget {
            url: "https://s3/x".to_string(),
            method: "PUT".to_string(),
            headers: Default::default(),
            body: Vec::new(),
        };
        let transfer = seq.transfer_request(&target);
        assert!(transfer.header_value("Referer").is_none());
        assert!(transfer.header_value("Origin").is_none());
    }
}
