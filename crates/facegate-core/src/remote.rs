//! Face analyzer client over a Unix domain socket.

use crate::detector::{AnalyzerError, DetectorConfig, FaceAnalyzer};
use crate::protocol::{self, AnalyzerRequest, AnalyzerResponse};
use crate::types::BoundingBox;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::UnixStream;

/// Talks to an out-of-process analyzer that owns the detection and
/// embedding models.
///
/// The connection is opened lazily and dropped after any failure, so the
/// next call reconnects.
pub struct RemoteAnalyzer {
    socket_path: PathBuf,
    timeout: Duration,
    stream: Option<UnixStream>,
}

impl RemoteAnalyzer {
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self { socket_path: socket_path.into(), timeout, stream: None }
    }

    async fn call(
        &mut self,
        request: &AnalyzerRequest,
        frame: &[u8],
    ) -> Result<AnalyzerResponse, AnalyzerError> {
        let outcome = tokio::time::timeout(self.timeout, self.exchange(request, frame)).await;
        let result = match outcome {
            Ok(result) => result,
            Err(_) => Err(AnalyzerError::Timeout(self.timeout)),
        };
        if result.is_err() {
            // The stream may hold half a message; never reuse it.
            self.stream = None;
        }
        result
    }

    async fn exchange(
        &mut self,
        request: &AnalyzerRequest,
        frame: &[u8],
    ) -> Result<AnalyzerResponse, AnalyzerError> {
        if self.stream.is_none() {
            let stream = UnixStream::connect(&self.socket_path).await?;
            tracing::debug!(socket = %self.socket_path.display(), "connected to face analyzer");
            self.stream = Some(stream);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(AnalyzerError::Protocol("analyzer connection unavailable".into()));
        };

        protocol::write_request(stream, request, frame).await?;
        match protocol::read_response(stream).await? {
            AnalyzerResponse::Error { message } => Err(AnalyzerError::Remote(message)),
            response => Ok(response),
        }
    }
}

impl FaceAnalyzer for RemoteAnalyzer {
    async fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        config: &DetectorConfig,
    ) -> Result<Vec<BoundingBox>, AnalyzerError> {
        let request = AnalyzerRequest::Detect {
            width,
            height,
            input_size: config.input_size,
            score_threshold: config.score_threshold,
        };
        match self.call(&request, frame).await? {
            AnalyzerResponse::Faces { faces } => Ok(faces),
            other => Err(AnalyzerError::Protocol(format!("expected faces, got {other:?}"))),
        }
    }

    async fn embed(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Vec<f32>, AnalyzerError> {
        let request = AnalyzerRequest::Embed { width, height, face: face.clone() };
        match self.call(&request, frame).await? {
            AnalyzerResponse::Embedding { values } => Ok(values),
            other => Err(AnalyzerError::Protocol(format!("expected embedding, got {other:?}"))),
        }
    }
}
