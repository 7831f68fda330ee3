use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::AppState;

/// Fields dropped from each record below the detail zoom.
const HEAVY_FIELDS: [&str; 2] = ["propertyBoundary", "buildings"];

#[derive(Debug, Deserialize)]
pub struct ProxyQuery {
    zoom: Option<String>,
}

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    with_cors((status, Json(json!({ "error": message.into() }))))
}

/// Every proxy answer, errors included, is readable cross-origin.
fn with_cors(resp: impl IntoResponse) -> Response {
    let mut resp = resp.into_response();
    let headers = resp.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    resp
}

fn upstream_failure(err: &reqwest::Error, timeout: Duration) -> Response {
    if err.is_timeout() {
        warn!("upstream timed out after {} ms", timeout.as_millis());
        api_error(
            StatusCode::REQUEST_TIMEOUT,
            format!("upstream did not answer within {} ms", timeout.as_millis()),
        )
    } else {
        warn!("upstream unreachable: {err}");
        api_error(StatusCode::BAD_GATEWAY, "upstream is unreachable")
    }
}

/// Removes site geometry from every record of an array payload.
///
/// Returns how many records lost at least one field.
pub fn strip_geometry(payload: &mut Value) -> usize {
    let Some(items) = payload.as_array_mut() else {
        return 0;
    };
    items
        .iter_mut()
        .filter_map(Value::as_object_mut)
        .map(|record| {
            HEAVY_FIELDS
                .iter()
                .filter(|field| record.remove(**field).is_some())
                .count()
        })
        .filter(|removed| *removed > 0)
        .count()
}

pub async fn remote_incinerators(
    State(state): State<AppState>,
    Query(query): Query<ProxyQuery>,
) -> Response {
    let zoom = query
        .zoom
        .as_deref()
        .and_then(|z| z.trim().parse::<f64>().ok())
        .filter(|z| z.is_finite());
    let timeout = state.config.timeout;

    let resp = match state
        .http
        .get(&state.config.upstream_url)
        .timeout(timeout)
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(err) => return upstream_failure(&err, timeout),
    };

    let status = resp.status();
    if !status.is_success() {
        warn!(%status, "upstream answered with an error");
        return api_error(status, format!("upstream returned {status}"));
    }

    let mut payload: Value = match resp.json().await {
        Ok(v) => v,
        Err(err) if err.is_timeout() => return upstream_failure(&err, timeout),
        Err(err) => {
            warn!("upstream payload is not JSON: {err}");
            return api_error(StatusCode::BAD_GATEWAY, "upstream payload is not JSON");
        }
    };

    if zoom.is_some_and(|z| z < state.config.detail_zoom) {
        let stripped = strip_geometry(&mut payload);
        debug!(?zoom, stripped, "stripped site geometry");
    }

    with_cors(Json(payload))
}
