use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{multipart, Method};

/// How a request should be sent. Everything here must be replayable, because a
/// request may be sent a second time after a token refresh.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn delete() -> Self {
        Self::default().method(Method::DELETE)
    }

    /// POST a JSON-serializable payload.
    pub fn post_json(body: serde_json::Value) -> Self {
        Self::default()
            .method(Method::POST)
            .body(RequestBody::Json(body))
    }

    /// PUT a JSON-serializable payload.
    pub fn put_json(body: serde_json::Value) -> Self {
        Self::default()
            .method(Method::PUT)
            .body(RequestBody::Json(body))
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    /// Serialized as JSON. `Content-Type: application/json` is added unless the
    /// caller set a content type.
    Json(serde_json::Value),
    /// Opaque bytes. No content type is implied.
    Bytes(Vec<u8>),
    /// A multipart form, e.g. a drawing or inspiration image upload.
    Multipart(Vec<MultipartPart>),
}

/// One field of a multipart form. Kept as plain data so the form can be rebuilt
/// for a retry.
#[derive(Debug, Clone)]
pub struct MultipartPart {
    pub name: String,
    pub data: Vec<u8>,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
}

impl MultipartPart {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: value.into().into_bytes(),
            file_name: None,
            mime_type: None,
        }
    }

    pub fn file(
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            data,
            file_name: Some(file_name.into()),
            mime_type: Some(mime_type.into()),
        }
    }
}

/// Build a fresh reqwest form from replayable parts.
pub fn build_form(parts: &[MultipartPart]) -> Result<multipart::Form, reqwest::Error> {
    let mut form = multipart::Form::new();
    for part in parts {
        let mut field = multipart::Part::bytes(part.data.clone());
        if let Some(file_name) = &part.file_name {
            field = field.file_name(file_name.clone());
        }
        if let Some(mime_type) = &part.mime_type {
            field = field.mime_str(mime_type)?;
        }
        form = form.part(part.name.clone(), field);
    }
    Ok(form)
}
