use crate::config::DEFAULT_MAX_FILE_SIZE;
use crate::error::{FormError, TransportError};
use crate::services::transport::{HttpRequest, HttpTransport};
use regex::Regex;
use std::sync::LazyLock;

pub const CSRF_FIELD: &str = "csrfmiddlewaretoken";
pub const MAX_FILE_SIZE_FIELD: &str = "max_file_size";
pub const IS_PRIVATE_FIELD: &str = "is_private";

static INPUT_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<input\b([^>]*)>").expect("valid input tag regex"));

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)([a-zA-Z_:][-a-zA-Z0-9_:.]*)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+)))?"#)
        .expect("valid attribute regex")
});

/// Values the upload page hands to the uploader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadForm {
    pub csrf_token: String,
    pub max_file_size: u64,
    pub is_private: bool,
}

impl UploadForm {
    pub fn new(csrf_token: impl Into<String>, max_file_size: Option<u64>, is_private: bool) -> Self {
        Self {
            csrf_token: csrf_token.into(),
            max_file_size: max_file_size.unwrap_or(DEFAULT_MAX_FILE_SIZE),
            is_private,
        }
    }

    /// Builds the form from submitted name/value pairs.
    ///
    /// `max_file_size` falls back to 100 MiB when absent, empty or not a
    /// number. `is_private` is true when the checkbox was submitted with any
    /// value other than an explicit false.
    pub fn from_fields<I, K, V>(fields: I) -> Result<Self, FormError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut csrf_token = None;
        let mut max_file_size = None;
        let mut is_private = false;

        for (name, value) in fields {
            let value = value.as_ref().trim();
            match name.as_ref() {
                CSRF_FIELD => csrf_token = Some(value.to_string()),
                MAX_FILE_SIZE_FIELD => max_file_size = value.parse::<u64>().ok(),
                IS_PRIVATE_FIELD => {
                    is_private = !matches!(
                        value.to_ascii_lowercase().as_str(),
                        "false" | "off" | "0"
                    )
                }
                _ => {}
            }
        }

        let csrf_token = csrf_token
            .filter(|t| !t.is_empty())
            .ok_or(FormError::MissingCsrfToken)?;

        Ok(Self::new(csrf_token, max_file_size, is_private))
    }
}

/// Extracts the name/value pairs a browser would submit from the `<input>`
/// elements of a page: unchecked checkboxes/radios and file, submit, button
/// and reset inputs are skipped, a checked box without a value submits "on".
pub fn parse_input_fields(html: &str) -> Vec<(String, String)> {
    let mut fields = Vec::new();

    for tag in INPUT_TAG.captures_iter(html) {
        let mut name = None;
        let mut value = None;
        let mut kind = String::from("text");
        let mut checked = false;

        for attr in ATTRIBUTE.captures_iter(&tag[1]) {
            let attr_value = attr
                .get(2)
                .or_else(|| attr.get(3))
                .or_else(|| attr.get(4))
                .map(|m| m.as_str().to_string());

            match attr[1].to_ascii_lowercase().as_str() {
                "name" => name = attr_value,
                "value" => value = attr_value,
                "type" => kind = attr_value.unwrap_or_default().to_ascii_lowercase(),
                "checked" => checked = true,
                _ => {}
            }
        }

        let Some(name) = name else { continue };

        match kind.as_str() {
            "file" | "submit" | "button" | "reset" | "image" => continue,
            "checkbox" | "radio" if !checked => continue,
            "checkbox" | "radio" => {
                fields.push((name, value.unwrap_or_else(|| "on".to_string())))
            }
            _ => fields.push((name, value.unwrap_or_default())),
        }
    }

    fields
}

/// Loads the upload page and reads its form. The transport keeps the page's
/// cookies for the calls that follow.
pub async fn fetch_upload_form(
    transport: &dyn HttpTransport,
    page_url: &str,
    bearer_token: Option<&str>,
) -> Result<UploadForm, FormError> {
    let mut request = HttpRequest::new("GET", page_url);
    if let Some(token) = bearer_token {
        request = request.header("Authorization", format!("Bearer {}", token));
    }

    let response = transport.execute(request).await?;
    if !response.is_success() {
        return Err(FormError::Fetch(TransportError::Status {
            status: response.status,
            body: response.text(),
        }));
    }

    let fields = parse_input_fields(&response.text());
    tracing::debug!("📝 Upload form exposes {} fields", fields.len());

    UploadForm::from_fields(fields)
}
