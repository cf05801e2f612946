use std::sync::Arc;

use axum::{Router, extract::MatchedPath, http::{HeaderName, Request}};
use sigil_common::views::ApiErrorResponse;
use sigil_db::storage::memory::MemoryStorage;
use tower::ServiceBuilder;
use tower_http::{request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer}, trace::TraceLayer};
use tracing::info_span;
use utoipa::{ToSchema, openapi::{Info, License, OpenApi, RefOr, path::Operation}};
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::{config::SigilApiConfig, context::ApiContext, handlers};

const REQUEST_ID_HEADER: &str = "x-request-id";

pub async fn make(cfg: SigilApiConfig) -> anyhow::Result<(Router, OpenApi)> {
    let db = Arc::new(MemoryStorage::new());
    let context = ApiContext::bootstrap(&cfg, db).await?;

    let x_request_id = HeaderName::from_static(REQUEST_ID_HEADER);
    let middleware = ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(
            x_request_id.clone(),
            MakeRequestUuid,
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request<_>| {
                    // Log the request ID as generated
                    let request_id = req.headers().get(REQUEST_ID_HEADER);
                    let span = info_span!(
                        "http_request",
                        method = req.method().to_string(),
                        request_id = Option::<&str>::None,
                        path = Option::<&str>::None,
                    );

                    if let Some(request_id) = request_id {
                        if let Ok(request_id) = request_id.to_str() {
                            span.record("request_id", request_id);
                        }
                    };

                    if let Some(path) = req.extensions().get::<MatchedPath>() {
                        span.record("path", path.as_str())
                    } else {
                        span.record("path", req.uri().path())
                    };

                    span
                }),
        )
        .layer(PropagateRequestIdLayer::new(x_request_id));

    let openapi = OpenApi::builder()
        .info(
            Info::builder()
                .title("Sigil CA API Reference")
                .version(env!("CARGO_PKG_VERSION"))
                .license(Some(
                    License::builder()
                        .name("Apache 2.0 License")
                        .identifier(Some(env!("CARGO_PKG_LICENSE")))
                        .build()
                ))
        )
        .build();

    let (r, mut a) = OpenApiRouter::with_openapi(openapi)
        .routes(routes!(handlers::cmc::cmc01))
        .routes(routes!(handlers::certificates::search_certificates))
        .layer(middleware)
        .with_state(context)
        .split_for_parts();

    a.paths.paths.iter_mut().for_each(|(_path, item)| {
        apply_default_errors(&mut item.get);
        apply_default_errors(&mut item.post);
        apply_default_errors(&mut item.patch);
        apply_default_errors(&mut item.put);
        apply_default_errors(&mut item.delete);
        apply_default_errors(&mut item.trace);
        apply_default_errors(&mut item.head);
        apply_default_errors(&mut item.options);
    });

    Ok((r, a))
}

fn apply_default_errors(item: &mut Option<Operation>) {
    if let Some(item) = item {
        item.responses.responses.insert(
            "500".into(),
            RefOr::Ref(
                utoipa::openapi::Ref::builder()
                    .summary("Internal server error")
                    .ref_location_from_schema_name(ApiErrorResponse::name())
                    .build()
            )
        );
    }
}
