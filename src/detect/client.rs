use std::io::ErrorKind;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, Response};
use reqwest::header::ACCEPT;
use url::Url;

use super::outcome::ClassificationOutcome;
use crate::error::FailureCause;
use crate::frame::{Frame, FRAME_CONTENT_TYPE};

/// Form field carrying the image.
pub const UPLOAD_FIELD: &str = "image";
/// Filename sent with every upload.
pub const UPLOAD_FILENAME: &str = "frame.jpg";
/// Hard ceiling on a single submission.
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Anything that can turn a frame into a classification.
///
/// Implementations own the frame for the duration of the call and must
/// return within a bounded time; the pipeline runs them off the event loop.
pub trait Classifier: Send + Sync {
    fn classify(&self, frame: Frame) -> ClassificationOutcome;
}

impl<F> Classifier for F
where
    F: Fn(Frame) -> ClassificationOutcome + Send + Sync,
{
    fn classify(&self, frame: Frame) -> ClassificationOutcome {
        self(frame)
    }
}

/// HTTP client for the remote classification endpoint.
///
/// Each call to `submit` issues exactly one request. There is no retry here;
/// the next scheduler tick is the retry.
pub struct DetectionClient {
    http: Client,
    endpoint: Url,
    timeout: Duration,
}

impl DetectionClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(endpoint).with_context(|| format!("parse endpoint {}", endpoint))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported endpoint scheme '{}'; expected http(s)",
                url.scheme()
            ));
        }
        if timeout.is_zero() {
            return Err(anyhow!("submission timeout must be greater than zero"));
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            endpoint: url,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Upload one frame and map the reply to an outcome.
    pub fn submit(&self, frame: Frame) -> ClassificationOutcome {
        let started = Instant::now();
        let (width, height, size) = (frame.width, frame.height, frame.len());
        let form = match upload_form(frame) {
            Ok(form) => form,
            Err(err) => {
                return ClassificationOutcome::failure(FailureCause::Network(format!(
                    "build upload: {}",
                    err
                )))
            }
        };

        let result = self
            .http
            .post(self.endpoint.clone())
            .header(ACCEPT, "application/json")
            .multipart(form)
            .send();

        let outcome = match result {
            Ok(response) => self.read_response(response, started),
            Err(err) => ClassificationOutcome::failure(self.transport_cause(&err, started)),
        };

        log::debug!(
            "DetectionClient: {}x{} frame ({} bytes) -> {:?} in {}ms",
            width,
            height,
            size,
            outcome,
            started.elapsed().as_millis()
        );
        outcome
    }

    fn read_response(&self, response: Response, started: Instant) -> ClassificationOutcome {
        let status = response.status();
        let text = match response.text() {
            Ok(text) => text,
            Err(err) if !status.is_success() => {
                log::debug!(
                    "DetectionClient: unreadable body on status {}: {}",
                    status.as_u16(),
                    err
                );
                return ClassificationOutcome::failure(FailureCause::ServerError {
                    status: status.as_u16(),
                    body: format!("<unreadable body: {}>", err),
                });
            }
            Err(err) => {
                return ClassificationOutcome::failure(self.transport_cause(&err, started));
            }
        };
        if !status.is_success() {
            return ClassificationOutcome::failure(FailureCause::ServerError {
                status: status.as_u16(),
                body: text,
            });
        }
        ClassificationOutcome::from_response_body(&text)
    }

    fn transport_cause(&self, err: &reqwest::Error, started: Instant) -> FailureCause {
        if err.is_timeout() || is_timeout(err) || started.elapsed() >= self.timeout {
            FailureCause::Timeout
        } else {
            FailureCause::Network(err.to_string())
        }
    }
}

/// Single `image` part carrying the JPEG; the frame is consumed here.
fn upload_form(frame: Frame) -> Result<Form> {
    let part = Part::bytes(frame.into_jpeg())
        .file_name(UPLOAD_FILENAME)
        .mime_str(FRAME_CONTENT_TYPE)
        .context("set upload content type")?;
    Ok(Form::new().part(UPLOAD_FIELD, part))
}

impl Classifier for DetectionClient {
    fn classify(&self, frame: Frame) -> ClassificationOutcome {
        self.submit(frame)
    }
}

fn is_timeout(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if matches!(io.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) {
                return true;
            }
        }
        current = err.source();
    }
    false
}
