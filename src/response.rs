use std::{fmt, io, net::SocketAddr, sync::Arc, time::Duration};

use encoding_rs::{CoderResult, Decoder, Encoding};
use regex::Regex;
use reqwest::{header::HeaderMap, Client, Method, StatusCode};
use tokio::task::JoinHandle;

use crate::{
    assertions::{AssertionError, Subject},
    server::ServerHandle,
    telemetry,
};

#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    #[error(transparent)]
    Mismatch(#[from] AssertionError),
    #[error("Request timed out after {}ms.", .0.as_millis())]
    Timeout(Duration),
    #[error("Failed to execute request")]
    Transport(#[from] reqwest::Error),
    #[error("Failed to start the server")]
    Listen(#[source] Arc<io::Error>),
}

/// An expected value: either literal text or a pattern.
#[derive(Clone, Debug)]
pub enum Matcher {
    Literal(String),
    Pattern(Regex),
}

impl Matcher {
    pub fn is_match(&self, actual: &str) -> bool {
        match self {
            Self::Literal(expected) => expected == actual,
            Self::Pattern(pattern) => pattern.is_match(actual),
        }
    }

    fn inspect(&self) -> String {
        match self {
            Self::Literal(expected) => format!("{expected:?}"),
            Self::Pattern(pattern) => format!("/{pattern}/"),
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(expected) => f.write_str(expected),
            Self::Pattern(pattern) => write!(f, "/{pattern}/"),
        }
    }
}

impl From<&str> for Matcher {
    fn from(value: &str) -> Self {
        Self::Literal(value.to_owned())
    }
}

impl From<String> for Matcher {
    fn from(value: String) -> Self {
        Self::Literal(value)
    }
}

impl From<Regex> for Matcher {
    fn from(value: Regex) -> Self {
        Self::Pattern(value)
    }
}

macro_rules! literal_from_number {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Matcher {
            fn from(value: $ty) -> Self {
                Self::Literal(value.to_string())
            }
        })*
    };
}

literal_from_number!(u16, u32, u64, usize, i32, i64);

#[derive(Clone, Debug)]
pub struct TestRequest {
    method: Method,
    path: String,
    headers: Vec<(String, String)>,
    body: Option<Vec<u8>>,
    timeout: Option<Duration>,
    encoding: Option<&'static Encoding>,
}

impl TestRequest {
    pub fn new(path: impl Into<String>) -> Self {
        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        Self {
            method: Method::GET,
            path,
            headers: Vec::new(),
            body: None,
            timeout: None,
            encoding: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(path).method(Method::POST)
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn data(self, data: impl Into<Vec<u8>>) -> Self {
        self.body(data)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct Expectation {
    body: Option<Matcher>,
    status: Option<u16>,
    headers: Vec<(String, Matcher)>,
}

impl Expectation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn body(mut self, body: impl Into<Matcher>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn status_code(self, status: u16) -> Self {
        self.status(status)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<Matcher>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Checks body, then status, then headers, stopping at the first mismatch.
    pub fn verify(&self, response: &TestResponse) -> Result<(), AssertionError> {
        if let Some(expected) = &self.body {
            if !expected.is_match(&response.body) {
                let (expected, actual) = (expected.inspect(), format!("{:?}", response.body));
                let message =
                    format!("Invalid response body.\n    Expected: {expected}\n    Got: {actual}");
                return Err(AssertionError::new(Subject::Body, expected, actual, message));
            }
        }

        if let Some(expected) = self.status {
            let actual = response.status.as_u16();
            if actual != expected {
                let message = format!(
                    "Invalid response status code.\n    Expected: {{{expected}}}\n    Got: {{{actual}}}"
                );
                return Err(AssertionError::new(
                    Subject::Status,
                    expected.to_string(),
                    actual.to_string(),
                    message,
                ));
            }
        }

        for (name, expected) in &self.headers {
            let actual = response.header(name);
            if !actual.as_deref().map_or(false, |a| expected.is_match(a)) {
                let actual = actual.unwrap_or_else(|| "undefined".into());
                let message = format!(
                    "Invalid response header {{{name}}}.\n    Expected: {{{expected}}}\n    Got: {{{actual}}}"
                );
                return Err(AssertionError::new(
                    Subject::Header(name.clone()),
                    expected.to_string(),
                    actual,
                    message,
                ));
            }
        }

        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl TestResponse {
    /// Case-insensitive header lookup. Repeated headers are joined with `", "`.
    pub fn header(&self, name: &str) -> Option<String> {
        let values = self
            .headers
            .get_all(name.to_ascii_lowercase())
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect::<Vec<_>>();
        if values.is_empty() {
            None
        } else {
            Some(values.join(", "))
        }
    }
}

/// Issues `request` against the server behind `handle`, starting it if
/// needed, and checks the response against `expectation`.
#[tracing::instrument(
    name = "Asserting response",
    skip_all,
    fields(method = %request.method, path = %request.path)
)]
pub async fn assert_response(
    handle: &ServerHandle,
    request: TestRequest,
    expectation: Expectation,
) -> Result<TestResponse, ResponseError> {
    let lease = handle.acquire().await?;
    let timeout = request.timeout.or_else(|| handle.defaults().timeout());
    let encoding = request.encoding.unwrap_or(handle.defaults().encoding);

    let exchange = issue(lease.addr(), request, encoding);
    let response = match timeout {
        Some(limit) => tokio::time::timeout(limit, exchange).await.map_err(|_| {
            tracing::warn!(timeout_ms = limit.as_millis() as u64, "Request timed out");
            ResponseError::Timeout(limit)
        })??,
        None => exchange.await?,
    };

    expectation.verify(&response).map_err(|e| {
        tracing::warn!(error.message = %e, "Response did not match expectation");
        e
    })?;
    Ok(response)
}

/// Callback form of [`assert_response`]. The callback runs exactly once,
/// after the pending request has been released.
pub fn assert_response_with<F>(
    handle: &ServerHandle,
    request: TestRequest,
    expectation: Expectation,
    callback: F,
) -> JoinHandle<()>
where
    F: FnOnce(Result<TestResponse, ResponseError>) + Send + 'static,
{
    let handle = handle.clone();
    telemetry::spawn_with_tracing(async move {
        let outcome = assert_response(&handle, request, expectation).await;
        callback(outcome);
    })
}

async fn issue(
    addr: SocketAddr,
    request: TestRequest,
    encoding: &'static Encoding,
) -> Result<TestResponse, reqwest::Error> {
    let url = format!("http://{}{}", addr, request.path);
    let mut builder = Client::new().request(request.method, url);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = request.body {
        builder = builder.body(body);
    }

    let mut response = builder.send().await?;
    let status = response.status();
    let headers = response.headers().clone();
    let mut decoder = encoding.new_decoder();
    let mut body = String::new();
    while let Some(chunk) = response.chunk().await? {
        decode_chunk(&mut decoder, &chunk, &mut body, false);
    }
    decode_chunk(&mut decoder, &[], &mut body, true);
    tracing::debug!(status = status.as_u16(), "Received response");
    Ok(TestResponse {
        status,
        headers,
        body,
    })
}

fn decode_chunk(decoder: &mut Decoder, mut src: &[u8], dst: &mut String, last: bool) {
    loop {
        let needed = decoder
            .max_utf8_buffer_length(src.len())
            .unwrap_or(src.len() + 16);
        dst.reserve(needed);
        let (result, read, _) = decoder.decode_to_string(src, dst, last);
        src = &src[read..];
        if result == CoderResult::InputEmpty {
            break;
        }
    }
}
