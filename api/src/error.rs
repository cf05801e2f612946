use axum::{response::IntoResponse, Json};
use sigil_common::views::ApiErrorResponse;
use sigil_common::x509::InvalidEncoding;
use sigil_db::storage::StoreError;
use thiserror::Error;

use crate::cmc::CmcError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Cmc(#[from] CmcError),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Encoding(#[from] InvalidEncoding),

    #[error(transparent)]
    InternalAnyhow(#[from] anyhow::Error),
}

impl From<ApiError> for ApiErrorResponse {
    fn from(err: ApiError) -> Self {
        ApiErrorResponse {
            code: match &err {
                ApiError::Cmc(ce) => match ce {
                    CmcError::Malformed(_) => Some("BadRequest".into()),
                    CmcError::Unauthenticated(_) | CmcError::ProofOfPossession(_) => {
                        Some("Unauthorized".into())
                    }
                    _ => Some("InternalError".into()),
                },
                ApiError::Encoding(_) => Some("BadRequest".into()),
                ApiError::Storage(_) | ApiError::InternalAnyhow(_) => Some("InternalError".into()),
            },

            message: match &err {
                ApiError::Cmc(ce) => match ce {
                    CmcError::Malformed(_) => "The request could not be parsed.".into(),
                    CmcError::Unauthenticated(_) | CmcError::ProofOfPossession(_) => {
                        "The request was not authenticated.".into()
                    }
                    _ => "Something went wrong on our end. Please try again later.".into(),
                },
                ApiError::Encoding(_) => "The request could not be parsed.".into(),
                ApiError::Storage(_) | ApiError::InternalAnyhow(_) => {
                    "Something went wrong on our end. Please try again later.".into()
                }
            },

            #[cfg(debug_assertions)]
            details: Some(err.to_string()),

            #[cfg(not(debug_assertions))]
            details: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        tracing::error!("Error returned by handler: {self}");

        let status_code = match &self {
            Self::Cmc(ce) => match ce {
                CmcError::Malformed(_) => axum::http::StatusCode::BAD_REQUEST,
                CmcError::Unauthenticated(_) | CmcError::ProofOfPossession(_) => {
                    axum::http::StatusCode::UNAUTHORIZED
                }
                _ => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Encoding(_) => axum::http::StatusCode::BAD_REQUEST,
            Self::Storage(_) | Self::InternalAnyhow(_) => {
                axum::http::StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status_code, Json(Into::<ApiErrorResponse>::into(self))).into_response()
    }
}
