//! Per-sign-in context.
//!
//! A [`Session`] owns every live value that belongs to the signed-in user.
//! It is created by [`Session::sign_in`] and passed around by reference;
//! [`Session::sign_out`] (or dropping it) unmounts everything, so nothing
//! keeps fetching for a user who left.

use crate::db::Database;
use crate::fetchers;
use crate::live::{Invalidator, LiveValue};
use crate::storage::{NotificationRow, ProfileRow};

pub struct Session {
    user_id: String,
    unread_notifications: LiveValue<u32>,
    notification_dropdown: LiveValue<Vec<NotificationRow>>,
    unread_messages: LiveValue<u32>,
    profile: LiveValue<Option<ProfileRow>>,
}

impl Session {
    /// Mount the user's live values. Must be called inside a tokio runtime.
    pub fn sign_in(db: &Database, user_id: &str) -> Self {
        crate::dlog!("session: sign in {}", crate::logging::user_id(user_id));
        Self {
            user_id: user_id.to_string(),
            unread_notifications: fetchers::unread_notifications(db, user_id),
            notification_dropdown: fetchers::notification_dropdown(db, user_id),
            unread_messages: fetchers::unread_messages(db, user_id),
            profile: fetchers::own_profile(db, user_id),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn unread_notifications(&self) -> &LiveValue<u32> {
        &self.unread_notifications
    }

    pub fn notification_dropdown(&self) -> &LiveValue<Vec<NotificationRow>> {
        &self.notification_dropdown
    }

    pub fn unread_messages(&self) -> &LiveValue<u32> {
        &self.unread_messages
    }

    pub fn profile(&self) -> &LiveValue<Option<ProfileRow>> {
        &self.profile
    }

    /// Handle for code that just marked notifications read: refreshes the
    /// badge and the dropdown without waiting for the change feed.
    pub fn notification_invalidators(&self) -> Vec<Invalidator> {
        vec![
            self.unread_notifications.invalidator(),
            self.notification_dropdown.invalidator(),
        ]
    }

    pub fn messages_invalidator(&self) -> Invalidator {
        self.unread_messages.invalidator()
    }

    pub fn is_active(&self) -> bool {
        self.unread_notifications.is_mounted()
            && self.notification_dropdown.is_mounted()
            && self.unread_messages.is_mounted()
            && self.profile.is_mounted()
    }

    pub fn sign_out(self) {
        crate::dlog!("session: sign out {}", crate::logging::user_id(&self.user_id));
        let Session {
            unread_notifications,
            notification_dropdown,
            unread_messages,
            profile,
            ..
        } = self;
        unread_notifications.unmount();
        notification_dropdown.unmount();
        unread_messages.unmount();
        profile.unmount();
    }
}
