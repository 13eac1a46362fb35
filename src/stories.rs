//! Story tray: one story per author, annotated for the viewer.

use std::collections::HashSet;

use serde::Serialize;

use crate::storage::{Storage, StorageError, StoryRow};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoryCard {
    #[serde(flatten)]
    pub story: StoryRow,
    pub viewed: bool,
}

/// Keep the first story of each author. Input is expected newest-first, so
/// the newest story per author survives and the order is preserved.
pub fn dedupe_latest_per_user(stories: impl IntoIterator<Item = StoryRow>) -> Vec<StoryRow> {
    let mut seen_authors = HashSet::new();
    stories
        .into_iter()
        .filter(|s| seen_authors.insert(s.user_id.clone()))
        .collect()
}

/// Mark each story viewed if its id is in the viewer's view records.
/// Without a viewer every story is unviewed.
pub fn annotate_viewed(
    stories: Vec<StoryRow>,
    viewer_id: Option<&str>,
    viewed_ids: &HashSet<String>,
) -> Vec<StoryCard> {
    stories
        .into_iter()
        .map(|story| {
            let viewed = viewer_id.is_some() && viewed_ids.contains(&story.id);
            StoryCard { story, viewed }
        })
        .collect()
}

/// Active stories, deduplicated and annotated for `viewer_id`.
pub fn story_tray(
    storage: &Storage,
    viewer_id: Option<&str>,
    now: u64,
) -> Result<Vec<StoryCard>, StorageError> {
    let active = storage.list_active_stories(now)?;
    let latest = dedupe_latest_per_user(active);
    let viewed_ids = match viewer_id {
        Some(viewer) => storage.list_viewed_story_ids(viewer)?,
        None => HashSet::new(),
    };
    Ok(annotate_viewed(latest, viewer_id, &viewed_ids))
}
