use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct Health {
    pub status: String,
}

#[utoipa::path(
         get,
         path = "/health",
         responses((status = 200, description = "OK", body = Health))
     )]
pub async fn health() -> Json<Health> {
    Json(Health {
        status: "ok".into(),
    })
}
