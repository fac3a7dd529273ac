use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("storage error: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

use async_trait::async_trait;

#[async_trait]
pub trait TopicRepo: Send + Sync {
    /// Inserts a topic with no explanation and no related topics.
    async fn create_topic(&self, new: NewTopic) -> RepoResult<Topic>;
    async fn get_topic(&self, id: Id) -> RepoResult<Topic>;
    async fn list_topics(&self, user_id: Id) -> RepoResult<Vec<Topic>>;
    /// Uniform pick among the user's current topics. `Ok(None)` when the user has none,
    /// or when the picked row vanished twice under concurrent deletes.
    async fn pick_random_topic(&self, user_id: Id) -> RepoResult<Option<Topic>>;
    /// Last writer wins. `related_topics = None` leaves the stored list untouched.
    /// A vanished id reports `RepoError::NotFound`.
    async fn update_explanation(&self, id: Id, explanation: String, related_topics: Option<Vec<String>>) -> RepoResult<Topic>;
    /// Returns whether a row was actually removed.
    async fn delete_topic(&self, id: Id) -> RepoResult<bool>;
}

#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Insert-if-absent with the default mode.
    async fn ensure_user(&self, user_id: Id) -> RepoResult<User>;
    async fn upsert_user_mode(&self, user_id: Id, mode: Mode) -> RepoResult<User>;
    /// Read-through: an absent user has the default mode and no row is created.
    async fn get_user_mode(&self, user_id: Id) -> RepoResult<Mode>;
}

#[async_trait]
pub trait StatsRepo: Send + Sync {
    async fn stats(&self) -> RepoResult<StoreStats>;
}

pub trait Repo: TopicRepo + UserRepo + StatsRepo {}

impl<T> Repo for T where T: TopicRepo + UserRepo + StatsRepo {}

fn encode_related(related: &[String]) -> RepoResult<String> {
    serde_json::to_string(related).map_err(|e| RepoError::Internal(e.to_string()))
}

// Stored lists that fail to decode are treated as absent; consume regenerates them.
fn decode_related(topic_id: Id, raw: Option<&str>) -> Option<Vec<String>> {
    let raw = raw?;
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(topic_id, error = %e, "undecodable related_topics in storage");
            None
        }
    }
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use chrono::Utc;
    use rand::Rng;
    use serde::{Deserialize, Serialize};
    use std::collections::{BTreeMap, HashMap};
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

    const SNAPSHOT_FILE: &str = "topics.json";

    // related_topics kept in its stored (serialized) form, like the SQL column
    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct TopicRecord {
        id: Id,
        user_id: Id,
        title: String,
        explanation: Option<String>,
        related_topics: Option<String>,
        parent_topic_title: Option<String>,
        created_at: chrono::DateTime<Utc>,
    }

    impl TopicRecord {
        fn to_topic(&self) -> Topic {
            Topic {
                id: self.id,
                user_id: self.user_id,
                title: self.title.clone(),
                explanation: self.explanation.clone(),
                related_topics: decode_related(self.id, self.related_topics.as_deref()),
                parent_topic_title: self.parent_topic_title.clone(),
                created_at: self.created_at,
            }
        }
    }

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        // BTreeMap keeps insertion (id) order for listing and offsets
        topics: BTreeMap<Id, TopicRecord>,
        users: HashMap<Id, User>,
        next_id: Id,
    }

    /// Process-local store. Without a snapshot path nothing touches the filesystem.
    #[derive(Clone, Default)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Option<Arc<PathBuf>>,
    }

    impl InMemRepo {
        pub fn new() -> Self {
            Self::default()
        }

        /// Loads `<dir>/topics.json` if present and rewrites it after every mutation.
        pub fn with_snapshot_dir(dir: impl AsRef<Path>) -> Self {
            let path = dir.as_ref().join(SNAPSHOT_FILE);
            let state = Self::load_state_from(&path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Some(Arc::new(path)),
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        tracing::info!(path = %path.display(), topics = s.topics.len(), "loaded snapshot");
                        s
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "failed to parse snapshot, starting empty");
                        State::default()
                    }
                },
                Err(e) => {
                    tracing::info!(path = %path.display(), error = %e, "no snapshot, starting empty");
                    State::default()
                }
            }
        }

        fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
            self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
            self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        // Called with the write guard held so snapshot files land in mutation order.
        fn persist(&self, state: &State) {
            let Some(path) = self.snapshot_path.as_deref() else { return };
            let bytes = match serde_json::to_vec_pretty(state) {
                Ok(b) => b,
                Err(e) => { tracing::error!(error = %e, "failed to serialize snapshot"); return; }
            };
            if let Some(dir) = path.parent() {
                if let Err(e) = std::fs::create_dir_all(dir) {
                    tracing::error!(dir = %dir.display(), error = %e, "failed to create snapshot directory");
                    return;
                }
            }
            if let Err(e) = std::fs::write(path, bytes) {
                tracing::error!(path = %path.display(), error = %e, "failed to write snapshot");
            }
        }

        fn next_id(state: &mut State) -> Id {
            state.next_id += 1;
            state.next_id
        }
    }

    #[async_trait]
    impl TopicRepo for InMemRepo {
        async fn create_topic(&self, new: NewTopic) -> RepoResult<Topic> {
            let mut s = self.write()?;
            let id = Self::next_id(&mut s);
            let rec = TopicRecord {
                id,
                user_id: new.user_id,
                title: new.title,
                explanation: None,
                related_topics: None,
                parent_topic_title: new.parent_topic_title,
                created_at: Utc::now(),
            };
            let topic = rec.to_topic();
            s.topics.insert(id, rec);
            self.persist(&s);
            Ok(topic)
        }

        async fn get_topic(&self, id: Id) -> RepoResult<Topic> {
            let s = self.read()?;
            s.topics.get(&id).map(TopicRecord::to_topic).ok_or(RepoError::NotFound)
        }

        async fn list_topics(&self, user_id: Id) -> RepoResult<Vec<Topic>> {
            let s = self.read()?;
            Ok(s.topics.values()
                .filter(|t| t.user_id == user_id)
                .map(TopicRecord::to_topic)
                .collect())
        }

        async fn pick_random_topic(&self, user_id: Id) -> RepoResult<Option<Topic>> {
            let s = self.read()?;
            let count = s.topics.values().filter(|t| t.user_id == user_id).count();
            if count == 0 {
                return Ok(None);
            }
            let offset = rand::thread_rng().gen_range(0..count);
            Ok(s.topics.values()
                .filter(|t| t.user_id == user_id)
                .nth(offset)
                .map(TopicRecord::to_topic))
        }

        async fn update_explanation(&self, id: Id, explanation: String, related_topics: Option<Vec<String>>) -> RepoResult<Topic> {
            let encoded = related_topics.as_deref().map(encode_related).transpose()?;
            let mut s = self.write()?;
            let rec = s.topics.get_mut(&id).ok_or(RepoError::NotFound)?;
            rec.explanation = Some(explanation);
            if let Some(raw) = encoded {
                rec.related_topics = Some(raw);
            }
            let updated = rec.to_topic();
            self.persist(&s);
            Ok(updated)
        }

        async fn delete_topic(&self, id: Id) -> RepoResult<bool> {
            let mut s = self.write()?;
            let removed = s.topics.remove(&id).is_some();
            if removed {
                self.persist(&s);
            }
            Ok(removed)
        }
    }

    #[async_trait]
    impl UserRepo for InMemRepo {
        async fn ensure_user(&self, user_id: Id) -> RepoResult<User> {
            let mut s = self.write()?;
            if let Some(u) = s.users.get(&user_id) {
                return Ok(u.clone());
            }
            let user = User { user_id, mode: Mode::default(), created_at: Utc::now() };
            s.users.insert(user_id, user.clone());
            self.persist(&s);
            Ok(user)
        }

        async fn upsert_user_mode(&self, user_id: Id, mode: Mode) -> RepoResult<User> {
            let mut s = self.write()?;
            let user = s.users
                .entry(user_id)
                .or_insert_with(|| User { user_id, mode, created_at: Utc::now() });
            user.mode = mode;
            let user = user.clone();
            self.persist(&s);
            Ok(user)
        }

        async fn get_user_mode(&self, user_id: Id) -> RepoResult<Mode> {
            let s = self.read()?;
            Ok(s.users.get(&user_id).map(|u| u.mode).unwrap_or_default())
        }
    }

    #[async_trait]
    impl StatsRepo for InMemRepo {
        async fn stats(&self) -> RepoResult<StoreStats> {
            let s = self.read()?;
            Ok(StoreStats {
                users: s.users.len() as i64,
                topics: s.topics.len() as i64,
                explained_topics: s.topics.values().filter(|t| t.explanation.is_some()).count() as i64,
            })
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use chrono::{DateTime, Utc};
    use rand::Rng;
    use sqlx::{Pool, Postgres};

    const TOPIC_COLUMNS: &str =
        "id, user_id, title, explanation, related_topics, parent_topic_title, created_at";

    #[derive(sqlx::FromRow)]
    struct TopicRow {
        id: Id,
        user_id: Id,
        title: String,
        explanation: Option<String>,
        related_topics: Option<String>,
        parent_topic_title: Option<String>,
        created_at: DateTime<Utc>,
    }

    impl From<TopicRow> for Topic {
        fn from(r: TopicRow) -> Self {
            let related_topics = decode_related(r.id, r.related_topics.as_deref());
            Topic {
                id: r.id,
                user_id: r.user_id,
                title: r.title,
                explanation: r.explanation,
                related_topics,
                parent_topic_title: r.parent_topic_title,
                created_at: r.created_at,
            }
        }
    }

    #[derive(sqlx::FromRow)]
    struct UserRow {
        user_id: Id,
        mode: String,
        created_at: DateTime<Utc>,
    }

    fn parse_mode(user_id: Id, raw: &str) -> Mode {
        raw.parse().unwrap_or_else(|e| {
            tracing::warn!(user_id, error = %e, "unknown stored mode, using default");
            Mode::default()
        })
    }

    impl From<UserRow> for User {
        fn from(r: UserRow) -> Self {
            User { user_id: r.user_id, mode: parse_mode(r.user_id, &r.mode), created_at: r.created_at }
        }
    }

    fn internal(e: sqlx::Error) -> RepoError {
        tracing::error!(error = %e, "postgres query failed");
        RepoError::Internal(e.to_string())
    }

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

        /// Applies the bundled schema migrations.
        pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
            sqlx::migrate!("./migrations").run(&self.pool).await
        }

        async fn fetch_at_offset(&self, user_id: Id, offset: i64) -> RepoResult<Option<Topic>> {
            let row = sqlx::query_as::<_, TopicRow>(&format!(
                "SELECT {TOPIC_COLUMNS} FROM topics WHERE user_id = $1 ORDER BY id OFFSET $2 LIMIT 1"
            ))
            .bind(user_id)
            .bind(offset)
            .fetch_optional(&self.pool).await.map_err(internal)?;
            Ok(row.map(Topic::from))
        }
    }

    #[async_trait]
    impl TopicRepo for PgRepo {
        async fn create_topic(&self, new: NewTopic) -> RepoResult<Topic> {
            let row = sqlx::query_as::<_, TopicRow>(&format!(
                "INSERT INTO topics (user_id, title, parent_topic_title) VALUES ($1,$2,$3) RETURNING {TOPIC_COLUMNS}"
            ))
            .bind(new.user_id)
            .bind(&new.title)
            .bind(new.parent_topic_title.as_ref())
            .fetch_one(&self.pool).await.map_err(internal)?;
            Ok(row.into())
        }

        async fn get_topic(&self, id: Id) -> RepoResult<Topic> {
            sqlx::query_as::<_, TopicRow>(&format!("SELECT {TOPIC_COLUMNS} FROM topics WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool).await.map_err(internal)?
                .map(Topic::from)
                .ok_or(RepoError::NotFound)
        }

        async fn list_topics(&self, user_id: Id) -> RepoResult<Vec<Topic>> {
            let rows = sqlx::query_as::<_, TopicRow>(&format!(
                "SELECT {TOPIC_COLUMNS} FROM topics WHERE user_id = $1 ORDER BY id"
            ))
            .bind(user_id)
            .fetch_all(&self.pool).await.map_err(internal)?;
            Ok(rows.into_iter().map(Topic::from).collect())
        }

        async fn pick_random_topic(&self, user_id: Id) -> RepoResult<Option<Topic>> {
            // count + random offset; a concurrent delete can empty the offset, so retry once
            for attempt in 0..2 {
                let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM topics WHERE user_id = $1")
                    .bind(user_id)
                    .fetch_one(&self.pool).await.map_err(internal)?;
                if count == 0 {
                    return Ok(None);
                }
                let offset = rand::thread_rng().gen_range(0..count);
                tracing::debug!(user_id, count, offset, attempt, "random topic offset");
                if let Some(topic) = self.fetch_at_offset(user_id, offset).await? {
                    return Ok(Some(topic));
                }
                tracing::warn!(user_id, offset, attempt, "random topic vanished between count and fetch");
            }
            Ok(None)
        }

        async fn update_explanation(&self, id: Id, explanation: String, related_topics: Option<Vec<String>>) -> RepoResult<Topic> {
            let encoded = related_topics.as_deref().map(encode_related).transpose()?;
            sqlx::query_as::<_, TopicRow>(&format!(
                "UPDATE topics SET explanation = $2, related_topics = COALESCE($3, related_topics) WHERE id = $1 RETURNING {TOPIC_COLUMNS}"
            ))
            .bind(id)
            .bind(&explanation)
            .bind(encoded.as_ref())
            .fetch_optional(&self.pool).await.map_err(internal)?
            .map(Topic::from)
            .ok_or(RepoError::NotFound)
        }

        async fn delete_topic(&self, id: Id) -> RepoResult<bool> {
            let res = sqlx::query("DELETE FROM topics WHERE id = $1")
                .bind(id)
                .execute(&self.pool).await.map_err(internal)?;
            Ok(res.rows_affected() > 0)
        }
    }

    #[async_trait]
    impl UserRepo for PgRepo {
        async fn ensure_user(&self, user_id: Id) -> RepoResult<User> {
            // no-op update so RETURNING yields the existing row too
            let row = sqlx::query_as::<_, UserRow>(
                "INSERT INTO users (user_id) VALUES ($1) ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id RETURNING user_id, mode, created_at"
            )
            .bind(user_id)
            .fetch_one(&self.pool).await.map_err(internal)?;
            Ok(row.into())
        }

        async fn upsert_user_mode(&self, user_id: Id, mode: Mode) -> RepoResult<User> {
            let row = sqlx::query_as::<_, UserRow>(
                "INSERT INTO users (user_id, mode) VALUES ($1,$2) ON CONFLICT (user_id) DO UPDATE SET mode = EXCLUDED.mode RETURNING user_id, mode, created_at"
            )
            .bind(user_id)
            .bind(mode.as_str())
            .fetch_one(&self.pool).await.map_err(internal)?;
            Ok(row.into())
        }

        async fn get_user_mode(&self, user_id: Id) -> RepoResult<Mode> {
            let row: Option<(String,)> = sqlx::query_as("SELECT mode FROM users WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool).await.map_err(internal)?;
            Ok(row.map(|(m,)| parse_mode(user_id, &m)).unwrap_or_default())
        }
    }

    #[async_trait]
    impl StatsRepo for PgRepo {
        async fn stats(&self) -> RepoResult<StoreStats> {
            let (users, topics, explained_topics): (i64, i64, i64) = sqlx::query_as(r#"
                SELECT (SELECT COUNT(*) FROM users),
                       (SELECT COUNT(*) FROM topics),
                       (SELECT COUNT(*) FROM topics WHERE explanation IS NOT NULL)
            "#)
            .fetch_one(&self.pool).await.map_err(internal)?;
            Ok(StoreStats { users, topics, explained_topics })
        }
    }
}
