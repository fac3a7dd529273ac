//! Topic lifecycle: `CREATED` (no explanation) → `EXPLAINED` → `CONSUMED` (row deleted).
//!
//! `add_topic` persists a bare topic and hands generation to a detached task. The task
//! never reports back: its failures leave the topic unexplained, and its write against a
//! topic consumed in the meantime is dropped. `consume_random_topic` absorbs the common
//! race with an in-flight task by waiting a short grace period before serving whatever
//! the store holds.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::generator::{ExplanationGenerator, GenerationError};
use crate::models::*;
use crate::repo::{Repo, RepoError};

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3);

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Storage(#[from] RepoError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// How a generation task ended.
#[derive(Debug)]
pub enum GenerationOutcome {
    Explained(Topic),
    /// The topic was consumed or deleted before the write; nothing was stored.
    Discarded,
    Failed(GenerationError),
    StorageFailed(RepoError),
}

#[derive(Clone)]
pub struct Pipeline {
    repo: Arc<dyn Repo>,
    generator: Arc<dyn ExplanationGenerator>,
    grace_period: Duration,
}

impl Pipeline {
    pub fn new(repo: Arc<dyn Repo>, generator: Arc<dyn ExplanationGenerator>) -> Self {
        Self { repo, generator, grace_period: DEFAULT_GRACE_PERIOD }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub async fn add_topic(&self, user_id: Id, title: &str, parent_topic_title: Option<String>) -> PipelineResult<Topic> {
        let title = title.trim();
        if title.is_empty() {
            warn!(user_id, "empty topic_title provided");
            return Err(PipelineError::Validation("topic_title cannot be empty".into()));
        }
        let parent_topic_title = parent_topic_title
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        self.repo.ensure_user(user_id).await?;
        let topic = self.repo
            .create_topic(NewTopic { user_id, title: title.to_string(), parent_topic_title })
            .await?;
        metrics::increment_counter!("topics_created_total");
        info!(user_id, topic_id = topic.id, "topic created, scheduling explanation");

        self.spawn_generation(topic.clone());
        Ok(topic)
    }

    /// Fire-and-forget: the task outlives the request and cannot fail it.
    fn spawn_generation(&self, topic: Topic) {
        let this = self.clone();
        tokio::spawn(async move {
            this.run_generation(&topic).await;
        });
    }

    /// Body of the background job; public so callers can run it inline.
    pub async fn run_generation(&self, topic: &Topic) -> GenerationOutcome {
        let mode = match self.repo.get_user_mode(topic.user_id).await {
            Ok(m) => m,
            Err(e) => {
                error!(topic_id = topic.id, user_id = topic.user_id, error = %e, "could not read user mode; topic stays unexplained");
                return GenerationOutcome::StorageFailed(e);
            }
        };
        debug!(topic_id = topic.id, %mode, "requesting explanation");

        let explanation = match self.generator
            .explain(&topic.title, topic.parent_topic_title.as_deref(), mode)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                metrics::increment_counter!("explanation_failures_total");
                error!(topic_id = topic.id, error = %e, "explanation generation failed; topic stays unexplained");
                return GenerationOutcome::Failed(e);
            }
        };

        let related = self.generator.related(&topic.title, Some(&explanation)).await;
        let related_count = related.len();

        match self.repo.update_explanation(topic.id, explanation, Some(related)).await {
            Ok(updated) => {
                metrics::increment_counter!("explanations_generated_total");
                info!(topic_id = topic.id, related_count, "explanation stored");
                GenerationOutcome::Explained(updated)
            }
            Err(RepoError::NotFound) => {
                warn!(topic_id = topic.id, "topic gone before explanation was stored; discarding");
                GenerationOutcome::Discarded
            }
            Err(e) => {
                error!(topic_id = topic.id, error = %e, "failed to store explanation");
                GenerationOutcome::StorageFailed(e)
            }
        }
    }

    pub async fn list_topics(&self, user_id: Id) -> PipelineResult<Vec<Topic>> {
        self.repo.ensure_user(user_id).await?;
        let topics = self.repo.list_topics(user_id).await?;
        debug!(user_id, topic_count = topics.len(), "listed topics");
        Ok(topics)
    }

    pub async fn get_topic(&self, id: Id) -> PipelineResult<Topic> {
        Ok(self.repo.get_topic(id).await?)
    }

    pub async fn delete_topic(&self, id: Id) -> PipelineResult<bool> {
        let deleted = self.repo.delete_topic(id).await?;
        if deleted {
            info!(topic_id = id, "topic deleted");
        } else {
            warn!(topic_id = id, "topic not found for deletion");
        }
        Ok(deleted)
    }

    /// Serves one random topic and deletes it, explained or not.
    pub async fn consume_random_topic(&self, user_id: Id) -> PipelineResult<Option<ConsumedTopic>> {
        self.repo.ensure_user(user_id).await?;
        let Some(mut topic) = self.repo.pick_random_topic(user_id).await? else {
            info!(user_id, "no topics to consume");
            return Ok(None);
        };

        if !topic.is_explained() {
            let grace_ms = self.grace_period.as_millis() as u64;
            warn!(topic_id = topic.id, grace_ms, "explanation not ready, waiting");
            tokio::time::sleep(self.grace_period).await;
            match self.repo.get_topic(topic.id).await {
                Ok(fresh) => topic = fresh,
                // a concurrent consume won; serve what we already read
                Err(RepoError::NotFound) => debug!(topic_id = topic.id, "topic vanished during grace period"),
                Err(e) => return Err(e.into()),
            }
            if !topic.is_explained() {
                warn!(topic_id = topic.id, "serving topic without explanation");
            }
        }

        let related_topics = match topic.related_topics.take() {
            Some(list) if !list.is_empty() => list,
            _ => {
                metrics::increment_counter!("related_fallback_total");
                debug!(topic_id = topic.id, "generating related topics on the fly");
                self.generator.related(&topic.title, topic.explanation.as_deref()).await
            }
        };

        if !self.repo.delete_topic(topic.id).await? {
            warn!(topic_id = topic.id, "topic already removed by a concurrent consume");
        }
        metrics::increment_counter!("topics_consumed_total");
        info!(user_id, topic_id = topic.id, explained = topic.is_explained(), "topic consumed");

        Ok(Some(ConsumedTopic {
            id: topic.id,
            user_id: topic.user_id,
            title: topic.title,
            explanation: topic.explanation,
            related_topics,
            parent_topic_title: topic.parent_topic_title,
            created_at: topic.created_at,
        }))
    }

    pub async fn get_mode(&self, user_id: Id) -> PipelineResult<Mode> {
        Ok(self.repo.get_user_mode(user_id).await?)
    }

    /// Flips the user's mode and returns the new value. Tasks already running keep the old one.
    pub async fn change_mode(&self, user_id: Id) -> PipelineResult<Mode> {
        let current = self.repo.get_user_mode(user_id).await?;
        let user = self.repo.upsert_user_mode(user_id, current.toggled()).await?;
        info!(user_id, mode = %user.mode, "mode changed");
        Ok(user.mode)
    }
}
