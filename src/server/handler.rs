use crate::aggregator::SharedAggregator;
use crate::config::ServerConfig;
use http::{Method, Request, Response, StatusCode, header};
use http_body_util::Full;
use hyper::body::Bytes;

pub const ACK_BODY: &str = "ok\n";
pub const MISSING_NAME_HINT: &str = "missing required query parameter: name\n";
pub const INVALID_NAME_HINT: &str = "name must be valid UTF-8\n";

/// Routes requests for the counting path into the aggregator.
#[derive(Debug, Clone)]
pub struct CountingService {
    aggregator: SharedAggregator,
    counting_path: String,
    max_key_len: usize,
    strict_validation: bool,
}

impl CountingService {
    pub fn new(aggregator: SharedAggregator, config: &ServerConfig) -> Self {
        Self {
            aggregator,
            counting_path: config.counting_path.clone(),
            max_key_len: config.max_key_len,
            strict_validation: config.strict_validation,
        }
    }

    pub fn aggregator(&self) -> &SharedAggregator {
        &self.aggregator
    }

    /// Never touches the store; the only side effect is one pending increment
    /// for a valid request.
    pub fn handle<B>(&self, req: &Request<B>) -> Response<Full<Bytes>> {
        if req.uri().path() != self.counting_path {
            return text(StatusCode::NOT_FOUND, "not found\n");
        }
        if req.method() != Method::GET {
            let mut resp = text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed\n");
            resp.headers_mut()
                .insert(header::ALLOW, header::HeaderValue::from_static("GET"));
            return resp;
        }

        let name = match name_param(req.uri().query()) {
            Some(name) if !name.is_empty() => name,
            _ => {
                let status = if self.strict_validation {
                    StatusCode::BAD_REQUEST
                } else {
                    StatusCode::OK
                };
                return text(status, MISSING_NAME_HINT);
            }
        };

        // lossy decoding maps every invalid sequence to U+FFFD, which would
        // merge distinct names into one key
        if name.contains(char::REPLACEMENT_CHARACTER) {
            return text(StatusCode::BAD_REQUEST, INVALID_NAME_HINT);
        }

        if name.len() > self.max_key_len {
            return text(
                StatusCode::BAD_REQUEST,
                format!("name exceeds {} bytes\n", self.max_key_len),
            );
        }

        self.aggregator.increment(&name);
        text(StatusCode::OK, ACK_BODY)
    }
}

fn name_param(query: Option<&str>) -> Option<String> {
    form_urlencoded::parse(query?.as_bytes())
        .find(|(k, _)| k == "name")
        .map(|(_, v)| v.into_owned())
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(body.into()));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}
