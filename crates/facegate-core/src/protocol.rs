//! Wire format spoken with the face analyzer process.
//!
//! Every body is preceded by its length as a big-endian `u32`. A request is a
//! JSON header body followed by a raw body holding the grayscale frame; a
//! response is a single JSON body.

use crate::detector::AnalyzerError;
use crate::types::BoundingBox;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on any single body. A 4K grayscale frame is ~8 MiB.
pub const MAX_BODY_LEN: usize = 16 * 1024 * 1024;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AnalyzerRequest {
    Detect {
        width: u32,
        height: u32,
        input_size: u32,
        score_threshold: f32,
    },
    Embed {
        width: u32,
        height: u32,
        face: BoundingBox,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalyzerResponse {
    Faces { faces: Vec<BoundingBox> },
    Embedding { values: Vec<f32> },
    Error { message: String },
}

pub async fn write_body<W: AsyncWrite + Unpin>(w: &mut W, body: &[u8]) -> Result<(), AnalyzerError> {
    if body.len() > MAX_BODY_LEN {
        return Err(AnalyzerError::Protocol(format!(
            "body of {} bytes exceeds {MAX_BODY_LEN}",
            body.len()
        )));
    }
    w.write_u32(body.len() as u32).await?;
    w.write_all(body).await?;
    Ok(())
}

pub async fn read_body<R: AsyncRead + Unpin>(r: &mut R) -> Result<Vec<u8>, AnalyzerError> {
    let len = r.read_u32().await? as usize;
    if len > MAX_BODY_LEN {
        return Err(AnalyzerError::Protocol(format!(
            "peer announced {len} bytes, limit is {MAX_BODY_LEN}"
        )));
    }
    let mut body = vec![0u8; len];
    r.read_exact(&mut body).await?;
    Ok(body)
}

pub async fn write_request<W: AsyncWrite + Unpin>(
    w: &mut W,
    request: &AnalyzerRequest,
    frame: &[u8],
) -> Result<(), AnalyzerError> {
    let header = serde_json::to_vec(request)
        .map_err(|e| AnalyzerError::Protocol(format!("encode request: {e}")))?;
    write_body(w, &header).await?;
    write_body(w, frame).await?;
    w.flush().await?;
    Ok(())
}

pub async fn read_request<R: AsyncRead + Unpin>(
    r: &mut R,
) -> Result<(AnalyzerRequest, Vec<u8>), AnalyzerError> {
    let header = read_body(r).await?;
    let request = serde_json::from_slice(&header)
        .map_err(|e| AnalyzerError::Protocol(format!("decode request: {e}")))?;
    let frame = read_body(r).await?;
    Ok((request, frame))
}

pub async fn write_response<W: AsyncWrite + Unpin>(
    w: &mut W,
    response: &AnalyzerResponse,
) -> Result<(), AnalyzerError> {
    let body = serde_json::to_vec(response)
        .map_err(|e| AnalyzerError::Protocol(format!("encode response: {e}")))?;
    write_body(w, &body).await?;
    w.flush().await?;
    Ok(())
}

pub async fn read_response<R: AsyncRead + Unpin>(r: &mut R) -> Result<AnalyzerResponse, AnalyzerError> {
    let body = read_body(r).await?;
    serde_json::from_slice(&body).map_err(|e| AnalyzerError::Protocol(format!("decode response: {e}")))
}
