//! Database-backed fetchers and the live values built from them.

use async_trait::async_trait;

use crate::db::{now_secs, Database};
use crate::error::FetchError;
use crate::feed::Table;
use crate::live::{Fetcher, LiveConfig, LiveValue, WatchSpec};
use crate::retry::RetryConfig;
use crate::storage::{NotificationRow, ProfileRow};
use crate::stories::{story_tray, StoryCard};

/// Items shown in the notification dropdown.
pub const DROPDOWN_LIMIT: u32 = 10;

pub struct UnreadNotificationCount {
    pub db: Database,
}

#[async_trait]
impl Fetcher for UnreadNotificationCount {
    type Output = u32;

    async fn fetch(&self, user_id: &str) -> Result<u32, FetchError> {
        Ok(self.db.lock().await.count_unread_notifications(user_id)?)
    }
}

/// Most recent notifications, newest first.
pub struct RecentNotifications {
    pub db: Database,
    pub limit: u32,
}

#[async_trait]
impl Fetcher for RecentNotifications {
    type Output = Vec<NotificationRow>;

    async fn fetch(&self, user_id: &str) -> Result<Vec<NotificationRow>, FetchError> {
        Ok(self
            .db
            .lock()
            .await
            .list_notifications(user_id, false, self.limit)?)
    }
}

pub struct UnreadMessageCount {
    pub db: Database,
}

#[async_trait]
impl Fetcher for UnreadMessageCount {
    type Output = u32;

    async fn fetch(&self, user_id: &str) -> Result<u32, FetchError> {
        Ok(self.db.lock().await.count_unread_messages(user_id)?)
    }
}

pub struct OwnProfile {
    pub db: Database,
}

#[async_trait]
impl Fetcher for OwnProfile {
    type Output = Option<ProfileRow>;

    async fn fetch(&self, user_id: &str) -> Result<Option<ProfileRow>, FetchError> {
        Ok(self.db.lock().await.get_profile(user_id)?)
    }
}

pub struct StoryTray {
    pub db: Database,
}

#[async_trait]
impl Fetcher for StoryTray {
    type Output = Vec<StoryCard>;

    async fn fetch(&self, user_id: &str) -> Result<Vec<StoryCard>, FetchError> {
        let st = self.db.lock().await;
        Ok(story_tray(&st, Some(user_id), now_secs())?)
    }
}

// ---------------------------------------------------------------------------
// Mounted live values
// ---------------------------------------------------------------------------

pub fn unread_notifications(db: &Database, user_id: &str) -> LiveValue<u32> {
    LiveValue::mount(
        db.feed(),
        UnreadNotificationCount { db: db.clone() },
        LiveConfig::new(
            "unread_notifications",
            WatchSpec::new().owned(Table::Notifications, "recipient_id"),
        ),
        user_id,
    )
}

pub fn notification_dropdown(db: &Database, user_id: &str) -> LiveValue<Vec<NotificationRow>> {
    LiveValue::mount(
        db.feed(),
        RecentNotifications {
            db: db.clone(),
            limit: DROPDOWN_LIMIT,
        },
        LiveConfig::new(
            "notification_dropdown",
            WatchSpec::new().owned(Table::Notifications, "recipient_id"),
        ),
        user_id,
    )
}

/// The layout-level message badge, the only live value that retries.
/// Chat membership is not a single column, so every message change triggers
/// a refetch; the query itself scopes to the user's chats.
pub fn unread_messages(db: &Database, user_id: &str) -> LiveValue<u32> {
    LiveValue::mount(
        db.feed(),
        UnreadMessageCount { db: db.clone() },
        LiveConfig::new("unread_messages", WatchSpec::new().any(Table::Messages))
            .with_retry(RetryConfig::default()),
        user_id,
    )
}

pub fn own_profile(db: &Database, user_id: &str) -> LiveValue<Option<ProfileRow>> {
    LiveValue::mount(
        db.feed(),
        OwnProfile { db: db.clone() },
        LiveConfig::new("profile", WatchSpec::new().owned(Table::Profiles, "user_id")),
        user_id,
    )
}

pub fn story_tray_live(db: &Database, user_id: &str) -> LiveValue<Vec<StoryCard>> {
    LiveValue::mount(
        db.feed(),
        StoryTray { db: db.clone() },
        LiveConfig::new(
            "stories",
            WatchSpec::new()
                .any(Table::Stories)
                .owned(Table::StoryViews, "user_id"),
        ),
        user_id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_rows_yield_defaults_not_errors() {
        let db = Database::open_in_memory().unwrap();
        let user = "nobody";
        assert_eq!(
            UnreadNotificationCount { db: db.clone() }.fetch(user).await,
            Ok(0)
        );
        assert_eq!(UnreadMessageCount { db: db.clone() }.fetch(user).await, Ok(0));
        assert!(RecentNotifications {
            db: db.clone(),
            limit: DROPDOWN_LIMIT
        }
        .fetch(user)
        .await
        .unwrap()
        .is_empty());
        assert!(OwnProfile { db: db.clone() }.fetch(user).await.unwrap().is_none());
        assert!(StoryTray { db }.fetch(user).await.unwrap().is_empty());
    }
}
