use axum::{extract::State, Json};
use sigil_common::params::CertificateSearchParams;
use sigil_common::views::CertificateSearchResult;
use sigil_db::storage::{CertificateFilter, CertificateStore};

use crate::{context::ApiContext, error::ApiError};

/// Search stored certificates by exact field match.
#[utoipa::path(
    post,
    path = "/search/certificate",
    tags = ["certificates"],
    request_body = CertificateSearchParams,
    responses(
        (status = 200, description = "Matching certificates", body = CertificateSearchResult),
    )
)]
pub async fn search_certificates(
    State(ctx): State<ApiContext>,
    Json(params): Json<CertificateSearchParams>,
) -> Result<Json<CertificateSearchResult>, ApiError> {
    let rows = CertificateStore::list(
        &*ctx.db,
        CertificateFilter {
            pem: params.pem,
            fingerprint: params.fingerprint,
            ..Default::default()
        },
    )
    .await?;

    Ok(Json(CertificateSearchResult {
        certificates: rows.into_iter().map(|row| row.pem).collect(),
    }))
}
