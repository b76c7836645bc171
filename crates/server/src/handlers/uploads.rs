//! Fragment upload endpoint.

use crate::assembler::{DEFAULT_CONTENT_TYPE, SubmitOutcome};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Multipart, State};
use splice_core::UploadResponse;
use tracing::instrument;

/// Headroom over `max_fragment_size` for multipart boundaries and text fields.
pub const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Fields of one fragment upload request.
#[derive(Debug, Default)]
struct FragmentForm {
    file_name: Option<String>,
    chunk_index: Option<u32>,
    total_chunks: Option<u32>,
    payload: Option<(Bytes, String)>,
}

fn parse_count(field: &str, value: &str) -> ApiResult<u32> {
    value
        .trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("{field} must be a non-negative integer")))
}

fn required<T>(value: Option<T>, field: &str) -> ApiResult<T> {
    value.ok_or_else(|| ApiError::BadRequest(format!("missing {field} field")))
}

async fn read_form(mut multipart: Multipart, max_fragment_size: u64) -> ApiResult<FragmentForm> {
    let mut form = FragmentForm::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "fileName" => form.file_name = Some(field.text().await?),
            "chunkIndex" => form.chunk_index = Some(parse_count("chunkIndex", &field.text().await?)?),
            "totalChunks" => {
                form.total_chunks = Some(parse_count("totalChunks", &field.text().await?)?)
            }
            "file" => {
                let content_type = field
                    .content_type()
                    .unwrap_or(DEFAULT_CONTENT_TYPE)
                    .to_string();
                let data = field.bytes().await?;
                if data.len() as u64 > max_fragment_size {
                    return Err(ApiError::FragmentTooLarge {
                        size: data.len() as u64,
                        max: max_fragment_size,
                    });
                }
                form.payload = Some((data, content_type));
            }
            other => {
                tracing::debug!(field = other, "Ignoring unknown multipart field");
            }
        }
    }

    Ok(form)
}

/// POST /v1/uploads/chunks - Stage one fragment of a logical upload.
///
/// Multipart fields: `fileName`, `chunkIndex`, `totalChunks`, and the binary
/// `file` part. The response carries the published URL once the final
/// fragment completes the upload.
#[instrument(skip(state, multipart))]
pub async fn upload_fragment(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let form = read_form(multipart, state.max_fragment_size()).await?;

    let file_name = required(form.file_name, "fileName")?;
    let chunk_index = required(form.chunk_index, "chunkIndex")?;
    let total_chunks = required(form.total_chunks, "totalChunks")?;
    let (data, content_type) = required(form.payload, "file")?;

    let outcome = state
        .assembler
        .submit_fragment(&file_name, chunk_index, total_chunks, data, &content_type)
        .await?;

    Ok(Json(match outcome {
        SubmitOutcome::Received => UploadResponse::received(),
        SubmitOutcome::Assembled { url, .. } => UploadResponse::assembled(url),
    }))
}
