//! Server functions: `toggle-like` and `notify-email`.
//!
//! Both are thin request/response operations over [`Database`]; the HTTP
//! wrappers live in `web::handlers::functions`.

use serde::{Deserialize, Serialize};

use crate::db::{Database, NewNotification};
use crate::error::AppError;
use crate::storage::{NotificationRow, NotificationType, UserRow};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleLikeRequest {
    pub post_id: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LikeAction {
    Liked,
    Unliked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleLikeResponse {
    pub action: LikeAction,
    pub like_count: u32,
}

fn required(field: Option<String>) -> Option<String> {
    field.filter(|v| !v.trim().is_empty())
}

/// Like or unlike a post on behalf of a user.
///
/// A new like on somebody else's post notifies the author.
pub async fn toggle_like(
    db: &Database,
    req: ToggleLikeRequest,
) -> Result<ToggleLikeResponse, AppError> {
    let (Some(post_id), Some(user_id)) = (required(req.post_id), required(req.user_id)) else {
        return Err(AppError::Validation("Missing postId or userId".to_string()));
    };

    let (post, user) = {
        let st = db.lock().await;
        (st.get_post(&post_id)?, st.get_user(&user_id)?)
    };
    let post = post.ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;
    let user = user.ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    let (liked, like_count) = db.toggle_like(&post.id, &user.id).await?;
    crate::dlog!(
        "toggle-like: {} {} {} (count {})",
        crate::logging::user_id(&user.id),
        if liked { "liked" } else { "unliked" },
        crate::logging::row_id("posts", &post.id),
        like_count
    );

    if liked && post.author_id != user.id {
        db.create_notification(NewNotification {
            recipient_id: post.author_id.clone(),
            actor_id: user.id.clone(),
            notification_type: NotificationType::Like,
            entity_id: Some(post.id.clone()),
            entity_kind: Some("post".to_string()),
            message: format!("{} liked your post \"{}\"", user.username, post.title),
        })
        .await?;
    }

    Ok(ToggleLikeResponse {
        action: if liked {
            LikeAction::Liked
        } else {
            LikeAction::Unliked
        },
        like_count,
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyEmailRequest {
    pub notification_id: Option<i64>,
}

/// Outcome of `notify-email`. Delivery itself is not wired up; the email that
/// would be sent is returned instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum NotifyEmailResponse {
    Skipped { message: String },
    Prepared { to: String, subject: String, body: String },
}

fn email_subject(notification: &NotificationRow, actor: &UserRow) -> String {
    match notification.notification_type {
        NotificationType::Like => format!("{} liked your post", actor.username),
        NotificationType::Comment => format!("{} commented on your post", actor.username),
        NotificationType::Follow => format!("{} started following you", actor.username),
        NotificationType::Mention => format!("{} mentioned you", actor.username),
        NotificationType::Other => "New activity on DevConnect".to_string(),
    }
}

fn email_body(notification: &NotificationRow, recipient: &UserRow) -> String {
    format!(
        "Hi {},\n\n{}\n\nYou can change which emails you receive in your notification settings.",
        recipient.username, notification.message
    )
}

/// Prepare the email for one notification, honouring the recipient's
/// global toggle and per-type preferences.
pub async fn notify_email(
    db: &Database,
    req: NotifyEmailRequest,
) -> Result<NotifyEmailResponse, AppError> {
    let Some(notification_id) = req.notification_id else {
        return Err(AppError::Validation("Missing notificationId".to_string()));
    };

    let st = db.lock().await;
    let notification = st
        .get_notification(notification_id)?
        .ok_or_else(|| AppError::NotFound("Notification not found".to_string()))?;
    let recipient = st
        .get_user(&notification.recipient_id)?
        .ok_or_else(|| AppError::NotFound("Recipient not found".to_string()))?;
    let to = recipient
        .email
        .clone()
        .ok_or_else(|| AppError::NotFound("Recipient email not found".to_string()))?;
    let actor = st
        .get_user(&notification.actor_id)?
        .ok_or_else(|| AppError::NotFound("Actor not found".to_string()))?;
    let settings = st
        .get_notification_settings(&recipient.id)?
        .unwrap_or_else(|| crate::storage::NotificationSettingsRow::enabled_for(&recipient.id));

    if !settings.allows(notification.notification_type) {
        crate::dlog!(
            "notify-email: {} opted out of {} emails",
            crate::logging::user_id(&recipient.id),
            notification.notification_type.as_str()
        );
        return Ok(NotifyEmailResponse::Skipped {
            message: "Email notifications disabled for this type".to_string(),
        });
    }

    Ok(NotifyEmailResponse::Prepared {
        to,
        subject: email_subject(&notification, &actor),
        body: email_body(&notification, &recipient),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NotificationSettingsRow;

    fn like_req(post_id: &str, user_id: &str) -> ToggleLikeRequest {
        ToggleLikeRequest {
            post_id: Some(post_id.to_string()),
            user_id: Some(user_id.to_string()),
        }
    }

    #[tokio::test]
    async fn toggle_twice_likes_then_unlikes() {
        let db = Database::open_in_memory().unwrap();
        let author = db.create_user("author", None).await.unwrap();
        let fan = db.create_user("fan", None).await.unwrap();
        let post = db.create_post(&author.id, "Hello", "world").await.unwrap();

        let first = toggle_like(&db, like_req(&post.id, &fan.id)).await.unwrap();
        assert_eq!(first.action, LikeAction::Liked);
        assert_eq!(first.like_count, 1);

        let second = toggle_like(&db, like_req(&post.id, &fan.id)).await.unwrap();
        assert_eq!(second.action, LikeAction::Unliked);
        assert_eq!(second.like_count, first.like_count - 1);

        let st = db.lock().await;
        let notifs = st.list_notifications(&author.id, false, 10).unwrap();
        assert_eq!(notifs.len(), 1);
        assert_eq!(notifs[0].notification_type, NotificationType::Like);
    }

    #[tokio::test]
    async fn liking_own_post_does_not_notify() {
        let db = Database::open_in_memory().unwrap();
        let author = db.create_user("author", None).await.unwrap();
        let post = db.create_post(&author.id, "Mine", "body").await.unwrap();
        toggle_like(&db, like_req(&post.id, &author.id)).await.unwrap();
        assert_eq!(
            db.lock().await.count_unread_notifications(&author.id).unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn toggle_validates_input() {
        let db = Database::open_in_memory().unwrap();
        let err = toggle_like(&db, ToggleLikeRequest::default()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = toggle_like(&db, like_req("nope", "nobody")).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn notify_email_honours_opt_out_matrix() {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user("alice", Some("alice@example.com")).await.unwrap();
        let bob = db.create_user("bob", None).await.unwrap();
        db.follow(&bob.id, &alice.id).await.unwrap();
        let notification_id = db.lock().await.list_notifications(&alice.id, false, 1).unwrap()[0].id;

        let req = || NotifyEmailRequest {
            notification_id: Some(notification_id),
        };
        match notify_email(&db, req()).await.unwrap() {
            NotifyEmailResponse::Prepared { to, subject, .. } => {
                assert_eq!(to, "alice@example.com");
                assert_eq!(subject, "bob started following you");
            }
            other => panic!("expected an email, got {other:?}"),
        }

        let mut settings = NotificationSettingsRow::enabled_for(&alice.id);
        settings.follows = false;
        db.lock().await.upsert_notification_settings(&settings).unwrap();
        assert!(matches!(
            notify_email(&db, req()).await.unwrap(),
            NotifyEmailResponse::Skipped { .. }
        ));

        settings.follows = true;
        settings.email_enabled = false;
        db.lock().await.upsert_notification_settings(&settings).unwrap();
        assert!(matches!(
            notify_email(&db, req()).await.unwrap(),
            NotifyEmailResponse::Skipped { .. }
        ));
    }

    #[tokio::test]
    async fn notify_email_missing_rows() {
        let db = Database::open_in_memory().unwrap();
        let err = notify_email(&db, NotifyEmailRequest::default()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let err = notify_email(
            &db,
            NotifyEmailRequest {
                notification_id: Some(42),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn missing_actor_is_not_found_even_when_opted_out() {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user("alice", Some("alice@example.com")).await.unwrap();
        let mut settings = NotificationSettingsRow::enabled_for(&alice.id);
        settings.email_enabled = false;
        db.lock().await.upsert_notification_settings(&settings).unwrap();
        let orphan = db
            .create_notification(NewNotification {
                recipient_id: alice.id.clone(),
                actor_id: "deleted-user".to_string(),
                notification_type: NotificationType::Mention,
                entity_id: None,
                entity_kind: None,
                message: "someone mentioned you".to_string(),
            })
            .await
            .unwrap();

        let err = notify_email(
            &db,
            NotifyEmailRequest {
                notification_id: Some(orphan.id),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(ref m) if m == "Actor not found"));
    }
}
