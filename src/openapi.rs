use crate::models::{
    AddTopicRequest, ConsumedTopic, CreatedTopic, DeleteTopicRequest, Mode, ModeResponse,
    StatusMessage, Topic, TopicList, UserRequest,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::add_topic,
        crate::routes::list_topics,
        crate::routes::random_topic,
        crate::routes::delete_topic,
        crate::routes::change_mode,
        crate::routes::get_mode,
    ),
    components(schemas(
        Topic, CreatedTopic, ConsumedTopic, TopicList, Mode, ModeResponse, StatusMessage,
        AddTopicRequest, UserRequest, DeleteTopicRequest
    )),
    tags(
        (name = "topics", description = "Topic queue operations"),
        (name = "users", description = "Per-user explanation mode"),
    )
)]
pub struct ApiDoc;
