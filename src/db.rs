//! `Database`: storage plus change feed.
//!
//! Reads go straight to [`Storage`] through [`Database::lock`]. Writes go
//! through the methods below, which persist the row and then publish one
//! [`ChangeEvent`] per changed row, the way a hosted database with a
//! real-time API would.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};

use crate::feed::{ChangeEvent, ChangeFeed, ChangeKind, Table};
use crate::storage::{
    FollowRow, LikeRow, MarkRead, MessageRow, NotificationRow, NotificationType, PostRow, ProfileRow,
    QuestionRow, Storage, StorageError, StoryRow, StoryViewRow, TagRow, UserRow,
};

/// Stories stay visible for 24 hours.
pub const STORY_TTL_SECS: u64 = 24 * 60 * 60;

/// Current time as seconds since UNIX epoch.
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Fields of a notification about to be created.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub recipient_id: String,
    pub actor_id: String,
    pub notification_type: NotificationType,
    pub entity_id: Option<String>,
    pub entity_kind: Option<String>,
    pub message: String,
}

#[derive(Clone)]
pub struct Database {
    storage: Arc<Mutex<Storage>>,
    feed: ChangeFeed,
}

impl Database {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage: Arc::new(Mutex::new(storage)),
            feed: ChangeFeed::default(),
        }
    }

    pub fn open(path: &Path) -> Result<Self, StorageError> {
        Ok(Self::new(Storage::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Ok(Self::new(Storage::open_in_memory()?))
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Lock storage for reads (or for a multi-step read-then-write; remember
    /// to publish afterwards).
    pub async fn lock(&self) -> MutexGuard<'_, Storage> {
        self.storage.lock().await
    }

    fn publish<T: Serialize>(&self, table: Table, kind: ChangeKind, row: &T) {
        match serde_json::to_value(row) {
            Ok(record) => {
                self.feed.publish(ChangeEvent {
                    table,
                    kind,
                    record,
                });
            }
            Err(e) => crate::dlog!("feed: failed to serialize {} row: {}", table.as_str(), e),
        }
    }

    // -----------------------------------------------------------------------
    // Users and profiles
    // -----------------------------------------------------------------------

    pub async fn create_user(
        &self,
        username: &str,
        email: Option<&str>,
    ) -> Result<UserRow, StorageError> {
        let row = UserRow {
            id: new_id(),
            username: username.to_string(),
            email: email.map(str::to_string),
            created_at: now_secs(),
        };
        self.lock().await.insert_user(&row)?;
        self.publish(Table::Users, ChangeKind::Insert, &row);
        Ok(row)
    }

    pub async fn upsert_profile(&self, row: &ProfileRow) -> Result<(), StorageError> {
        let created = self.lock().await.upsert_profile(row)?;
        let kind = if created {
            ChangeKind::Insert
        } else {
            ChangeKind::Update
        };
        self.publish(Table::Profiles, kind, row);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Follows
    // -----------------------------------------------------------------------

    /// Follow `following_id`. A new follow notifies the followee.
    /// Returns false if the follow already existed.
    pub async fn follow(&self, follower_id: &str, following_id: &str) -> Result<bool, StorageError> {
        let row = FollowRow {
            follower_id: follower_id.to_string(),
            following_id: following_id.to_string(),
            created_at: now_secs(),
        };
        let (created, follower_name) = {
            let st = self.lock().await;
            let created = st.insert_follow(&row)?;
            let name = st
                .get_user(follower_id)?
                .map(|u| u.username)
                .unwrap_or_else(|| "Someone".to_string());
            (created, name)
        };
        if !created {
            return Ok(false);
        }
        self.publish(Table::Follows, ChangeKind::Insert, &row);
        self.create_notification(NewNotification {
            recipient_id: following_id.to_string(),
            actor_id: follower_id.to_string(),
            notification_type: NotificationType::Follow,
            entity_id: Some(follower_id.to_string()),
            entity_kind: Some("user".to_string()),
            message: format!("{follower_name} started following you"),
        })
        .await?;
        Ok(true)
    }

    pub async fn unfollow(&self, follower_id: &str, following_id: &str) -> Result<bool, StorageError> {
        let removed = self.lock().await.delete_follow(follower_id, following_id)?;
        if removed {
            let row = FollowRow {
                follower_id: follower_id.to_string(),
                following_id: following_id.to_string(),
                created_at: now_secs(),
            };
            self.publish(Table::Follows, ChangeKind::Delete, &row);
        }
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Content
    // -----------------------------------------------------------------------

    pub async fn create_post(
        &self,
        author_id: &str,
        title: &str,
        content: &str,
    ) -> Result<PostRow, StorageError> {
        let row = PostRow {
            id: new_id(),
            author_id: author_id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            created_at: now_secs(),
        };
        self.lock().await.insert_post(&row)?;
        self.publish(Table::Posts, ChangeKind::Insert, &row);
        Ok(row)
    }

    pub async fn create_question(
        &self,
        author_id: &str,
        title: &str,
        body: &str,
    ) -> Result<QuestionRow, StorageError> {
        let row = QuestionRow {
            id: new_id(),
            author_id: author_id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            created_at: now_secs(),
        };
        self.lock().await.insert_question(&row)?;
        Ok(row)
    }

    pub async fn create_tag(&self, name: &str) -> Result<TagRow, StorageError> {
        let row = TagRow {
            id: new_id(),
            name: name.to_string(),
        };
        self.lock().await.insert_tag(&row)?;
        Ok(row)
    }

    /// Like the post if `user_id` has not liked it yet, otherwise remove the
    /// like. Returns whether the post is now liked and the new like count.
    pub async fn toggle_like(&self, post_id: &str, user_id: &str) -> Result<(bool, u32), StorageError> {
        let row = LikeRow {
            post_id: post_id.to_string(),
            user_id: user_id.to_string(),
            created_at: now_secs(),
        };
        let (liked, count) = {
            let st = self.lock().await;
            let liked = if st.has_like(post_id, user_id)? {
                st.delete_like(post_id, user_id)?;
                false
            } else {
                st.insert_like(&row)?;
                true
            };
            (liked, st.count_likes(post_id)?)
        };
        let kind = if liked {
            ChangeKind::Insert
        } else {
            ChangeKind::Delete
        };
        self.publish(Table::Likes, kind, &row);
        Ok((liked, count))
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    pub async fn create_notification(
        &self,
        new: NewNotification,
    ) -> Result<NotificationRow, StorageError> {
        let mut row = NotificationRow {
            id: 0,
            recipient_id: new.recipient_id,
            actor_id: new.actor_id,
            notification_type: new.notification_type,
            entity_id: new.entity_id,
            entity_kind: new.entity_kind,
            message: new.message,
            read: false,
            created_at: now_secs(),
        };
        row.id = self.lock().await.insert_notification(&row)?;
        self.publish(Table::Notifications, ChangeKind::Insert, &row);
        Ok(row)
    }

    /// Mark one notification read. Publishes only when the flag actually
    /// changed, so repeating the call has no side effect.
    pub async fn mark_notification_read(&self, id: i64) -> Result<MarkRead, StorageError> {
        let (outcome, row) = {
            let st = self.lock().await;
            let outcome = st.mark_notification_read(id)?;
            let row = match outcome {
                MarkRead::Marked => st.get_notification(id)?,
                _ => None,
            };
            (outcome, row)
        };
        if let Some(row) = row {
            self.publish(Table::Notifications, ChangeKind::Update, &row);
        }
        Ok(outcome)
    }

    pub async fn mark_all_notifications_read(&self, recipient_id: &str) -> Result<u32, StorageError> {
        let rows = {
            let st = self.lock().await;
            let ids = st.mark_all_notifications_read(recipient_id)?;
            let mut rows = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(row) = st.get_notification(id)? {
                    rows.push(row);
                }
            }
            rows
        };
        for row in &rows {
            self.publish(Table::Notifications, ChangeKind::Update, row);
        }
        Ok(rows.len() as u32)
    }

    // -----------------------------------------------------------------------
    // Chats and messages
    // -----------------------------------------------------------------------

    pub async fn create_chat(&self, member_ids: &[String]) -> Result<String, StorageError> {
        let chat_id = new_id();
        self.lock()
            .await
            .insert_chat(&chat_id, member_ids, now_secs())?;
        Ok(chat_id)
    }

    pub async fn send_message(
        &self,
        chat_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<MessageRow, StorageError> {
        let row = MessageRow {
            id: new_id(),
            chat_id: chat_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            is_read: false,
            created_at: now_secs(),
        };
        self.lock().await.insert_message(&row)?;
        self.publish(Table::Messages, ChangeKind::Insert, &row);
        Ok(row)
    }

    /// Mark a chat read for `user_id`. Returns how many messages changed.
    pub async fn mark_chat_read(&self, chat_id: &str, user_id: &str) -> Result<u32, StorageError> {
        let rows = self.lock().await.mark_chat_read(chat_id, user_id)?;
        for row in &rows {
            self.publish(Table::Messages, ChangeKind::Update, row);
        }
        Ok(rows.len() as u32)
    }

    // -----------------------------------------------------------------------
    // Stories
    // -----------------------------------------------------------------------

    pub async fn create_story(
        &self,
        user_id: &str,
        media_url: &str,
        caption: Option<&str>,
    ) -> Result<StoryRow, StorageError> {
        let now = now_secs();
        let row = StoryRow {
            id: new_id(),
            user_id: user_id.to_string(),
            media_url: media_url.to_string(),
            caption: caption.map(str::to_string),
            created_at: now,
            expires_at: now + STORY_TTL_SECS,
        };
        self.lock().await.insert_story(&row)?;
        self.publish(Table::Stories, ChangeKind::Insert, &row);
        Ok(row)
    }

    /// Record that `viewer_id` saw a story. Returns false if already seen.
    pub async fn record_story_view(
        &self,
        story_id: &str,
        viewer_id: &str,
    ) -> Result<bool, StorageError> {
        let row = StoryViewRow {
            story_id: story_id.to_string(),
            user_id: viewer_id.to_string(),
            viewed_at: now_secs(),
        };
        let inserted = {
            let st = self.lock().await;
            if st.get_story(story_id)?.is_none() {
                return Err(StorageError::NotFound(format!("story {story_id}")));
            }
            st.insert_story_view(&row)?
        };
        if inserted {
            self.publish(Table::StoryViews, ChangeKind::Insert, &row);
        }
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{EqFilter, FeedSignal, Topic};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn follow_notifies_followee_once() {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user("alice", None).await.unwrap();
        let bob = db.create_user("bob", None).await.unwrap();

        assert!(db.follow(&alice.id, &bob.id).await.unwrap());
        assert!(!db.follow(&alice.id, &bob.id).await.unwrap());

        let st = db.lock().await;
        let notifs = st.list_notifications(&bob.id, false, 10).unwrap();
        assert_eq!(notifs.len(), 1);
        assert_eq!(notifs[0].notification_type, NotificationType::Follow);
        assert_eq!(notifs[0].message, "alice started following you");
        assert_eq!(st.count_followers(&bob.id).unwrap(), 1);
    }

    #[tokio::test]
    async fn repeated_mark_read_publishes_once() {
        let db = Database::open_in_memory().unwrap();
        let updates = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&updates);
        let _sub = db.feed().subscribe(
            Topic::new(Table::Notifications, &[ChangeKind::Update])
                .with_filter(EqFilter::new("recipient_id", "me")),
            move |signal| {
                if let FeedSignal::Change(_) = signal {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        let n = db
            .create_notification(NewNotification {
                recipient_id: "me".to_string(),
                actor_id: "you".to_string(),
                notification_type: NotificationType::Mention,
                entity_id: None,
                entity_kind: None,
                message: "you mentioned you".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(db.mark_notification_read(n.id).await.unwrap(), MarkRead::Marked);
        assert_eq!(
            db.mark_notification_read(n.id).await.unwrap(),
            MarkRead::AlreadyRead
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(updates.load(Ordering::SeqCst), 1);
        assert!(db.lock().await.get_notification(n.id).unwrap().unwrap().read);
    }

    #[tokio::test]
    async fn story_view_requires_existing_story() {
        let db = Database::open_in_memory().unwrap();
        let err = db.record_story_view("missing", "viewer").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));

        let author = db.create_user("author", None).await.unwrap();
        let story = db
            .create_story(&author.id, "https://cdn/s.jpg", None)
            .await
            .unwrap();
        assert_eq!(story.expires_at - story.created_at, STORY_TTL_SECS);
        assert!(db.record_story_view(&story.id, "viewer").await.unwrap());
        assert!(!db.record_story_view(&story.id, "viewer").await.unwrap());
    }

    #[tokio::test]
    async fn mark_chat_read_publishes_full_rows() {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user("alice", None).await.unwrap();
        let bob = db.create_user("bob", None).await.unwrap();
        let chat = db
            .create_chat(&[alice.id.clone(), bob.id.clone()])
            .await
            .unwrap();
        db.send_message(&chat, &bob.id, "hi alice").await.unwrap();

        let records = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&records);
        let _sub = db.feed().subscribe(
            Topic::new(Table::Messages, &[ChangeKind::Update]),
            move |signal| {
                if let FeedSignal::Change(event) = signal {
                    sink.lock().push(event.record.clone());
                }
            },
        );

        assert_eq!(db.mark_chat_read(&chat, &alice.id).await.unwrap(), 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let records = records.lock();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["sender_id"], bob.id.as_str());
        assert_eq!(records[0]["content"], "hi alice");
        assert_eq!(records[0]["is_read"], true);
    }
}
