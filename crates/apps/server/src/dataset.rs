use axum::Json;
use catalog::{Catalog, Incinerator};

/// Development upstream: the bundled dataset with full geometry.
pub async fn incinerators() -> Json<&'static [Incinerator]> {
    Json(Catalog::bundled().all())
}
