use actix_web::{web, HttpResponse};
use metrics_exporter_prometheus::PrometheusHandle;

use crate::error::ApiError;
use crate::models::*;
use crate::pipeline::Pipeline;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default().error_handler(|err, _req| {
            tracing::warn!(error = %err, "rejected request body");
            ApiError::BadRequest("invalid json".into()).into()
        }),
    );
    cfg.route("/", web::get().to(root))
        .route("/change_mode", web::post().to(change_mode))
        .route("/metrics", web::get().to(render_metrics))
        .service(
            web::scope("/bot")
                .route("/add_topic", web::post().to(add_topic))
                .route("/list_topics", web::post().to(list_topics))
                .route("/random_topic", web::post().to(random_topic))
                .route("/delete_topic", web::post().to(delete_topic))
                .route("/mode/{user_id}", web::get().to(get_mode)),
        );
}

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    /// Present when a Prometheus recorder was installed.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline, metrics: None }
    }
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, ApiError> {
    value.ok_or_else(|| {
        tracing::warn!(field, "missing required field");
        ApiError::BadRequest(format!("{field} is required"))
    })
}

pub async fn root() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "running" }))
}

#[utoipa::path(
    post,
    path = "/bot/add_topic",
    tag = "topics",
    request_body = AddTopicRequest,
    responses(
        (status = 200, description = "Topic saved; explanation is generated in the background", body = CreatedTopic),
        (status = 400, description = "Missing user_id / topic_title or empty title")
    )
)]
pub async fn add_topic(
    data: web::Data<AppState>,
    payload: web::Json<AddTopicRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = payload.into_inner();
    let user_id = required(req.user_id, "user_id")?;
    let title = required(req.topic_title, "topic_title")?;
    let topic = data.pipeline.add_topic(user_id, &title, req.parent_topic_title).await?;
    Ok(HttpResponse::Ok().json(CreatedTopic::from(topic)))
}

#[utoipa::path(
    post,
    path = "/bot/list_topics",
    tag = "topics",
    request_body = UserRequest,
    responses(
        (status = 200, description = "All saved topics of the user", body = TopicList),
        (status = 400, description = "Missing user_id")
    )
)]
pub async fn list_topics(
    data: web::Data<AppState>,
    payload: web::Json<UserRequest>,
) -> Result<HttpResponse, ApiError> {
    let user_id = required(payload.user_id, "user_id")?;
    let topics = data.pipeline.list_topics(user_id).await?;
    Ok(HttpResponse::Ok().json(TopicList { topics }))
}

#[utoipa::path(
    post,
    path = "/bot/random_topic",
    tag = "topics",
    request_body = UserRequest,
    responses(
        (status = 200, description = "A random topic, removed from the queue; null when none", body = ConsumedTopic),
        (status = 400, description = "Missing user_id")
    )
)]
pub async fn random_topic(
    data: web::Data<AppState>,
    payload: web::Json<UserRequest>,
) -> Result<HttpResponse, ApiError> {
    let user_id = required(payload.user_id, "user_id")?;
    let consumed = data.pipeline.consume_random_topic(user_id).await?;
    Ok(HttpResponse::Ok().json(consumed))
}

#[utoipa::path(
    post,
    path = "/bot/delete_topic",
    tag = "topics",
    request_body = DeleteTopicRequest,
    responses(
        (status = 200, description = "Topic deleted", body = StatusMessage),
        (status = 404, description = "Topic not found")
    )
)]
pub async fn delete_topic(
    data: web::Data<AppState>,
    payload: web::Json<DeleteTopicRequest>,
) -> Result<HttpResponse, ApiError> {
    let topic_id = required(payload.topic_id, "topic_id")?;
    if !data.pipeline.delete_topic(topic_id).await? {
        return Err(ApiError::NotFound("Topic not found or could not be deleted".into()));
    }
    Ok(HttpResponse::Ok().json(StatusMessage {
        status: "success".into(),
        message: "Topic deleted successfully".into(),
    }))
}

#[utoipa::path(
    post,
    path = "/change_mode",
    tag = "users",
    request_body = UserRequest,
    responses(
        (status = 200, description = "Mode after toggling", body = ModeResponse),
        (status = 400, description = "Missing user_id")
    )
)]
pub async fn change_mode(
    data: web::Data<AppState>,
    payload: web::Json<UserRequest>,
) -> Result<HttpResponse, ApiError> {
    let user_id = required(payload.user_id, "user_id")?;
    let mode = data.pipeline.change_mode(user_id).await?;
    Ok(HttpResponse::Ok().json(ModeResponse { user_id, mode }))
}

#[utoipa::path(
    get,
    path = "/bot/mode/{user_id}",
    tag = "users",
    params(("user_id" = Id, Path, description = "Chat-platform account id")),
    responses(
        (status = 200, description = "Current mode (default long)", body = ModeResponse)
    )
)]
pub async fn get_mode(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let user_id = path.into_inner();
    let mode = data.pipeline.get_mode(user_id).await?;
    Ok(HttpResponse::Ok().json(ModeResponse { user_id, mode }))
}

pub async fn render_metrics(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    match &data.metrics {
        Some(handle) => Ok(HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render())),
        None => Err(ApiError::NotFound("metrics disabled".into())),
    }
}
