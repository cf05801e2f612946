use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};

use crate::{context::ApiContext, error::ApiError};

pub const PKCS7_MIME: &str = "application/pkcs7-mime";

/// Process one CMC request.
///
/// The body is a DER CMS SignedData document wrapping a PKIData; the
/// response is the signed PKIResponse. Requests that fail authentication
/// or do not parse are rejected at the transport level; failures during
/// processing are reported inside the signed response.
#[utoipa::path(
    post,
    path = "/cmc01",
    tags = ["cmc"],
    request_body(content = Vec<u8>, content_type = "application/pkcs7-mime"),
    responses(
        (status = 200, description = "Signed CMC response", body = Vec<u8>, content_type = "application/pkcs7-mime"),
        (status = 400, description = "Request did not parse as CMC"),
        (status = 401, description = "Outer signature or proof of possession rejected"),
    )
)]
pub async fn cmc01(
    State(ctx): State<ApiContext>,
    body: Bytes,
) -> Result<(StatusCode, HeaderMap, Vec<u8>), ApiError> {
    let response = ctx.cmc.handle(&body).await?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(PKCS7_MIME));
    Ok((StatusCode::OK, headers, response))
}
