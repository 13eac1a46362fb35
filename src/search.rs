//! Federated search over users, posts, questions and tags.
//!
//! Each source is queried concurrently and capped independently. Results are
//! regrouped in a fixed kind order regardless of which source answers first,
//! and a source that fails only loses its own group.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Serialize;

use crate::db::Database;
use crate::error::FetchError;

/// Results kept per source.
pub const RESULTS_PER_SOURCE: u32 = 3;
/// Idle time after the last keystroke before a query is issued.
pub const SEARCH_DEBOUNCE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    User,
    Post,
    Question,
    Tag,
}

impl ResultKind {
    pub fn icon(&self) -> &'static str {
        match self {
            ResultKind::User => "user",
            ResultKind::Post => "file-text",
            ResultKind::Question => "help-circle",
            ResultKind::Tag => "hash",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub kind: ResultKind,
    pub id: String,
    pub title: String,
    pub icon: &'static str,
    /// Where selecting the result navigates to.
    pub href: String,
}

impl SearchResult {
    fn new(kind: ResultKind, id: &str, title: &str, href: String) -> Self {
        Self {
            kind,
            id: id.to_string(),
            title: title.to_string(),
            icon: kind.icon(),
            href,
        }
    }
}

/// One bounded sub-query of the aggregator.
#[async_trait]
pub trait SearchSource: Send + Sync {
    fn kind(&self) -> ResultKind;

    async fn search(&self, query: &str, limit: u32) -> Result<Vec<SearchResult>, FetchError>;
}

// ---------------------------------------------------------------------------
// Database-backed sources
// ---------------------------------------------------------------------------

pub struct UserSource(pub Database);

#[async_trait]
impl SearchSource for UserSource {
    fn kind(&self) -> ResultKind {
        ResultKind::User
    }

    async fn search(&self, query: &str, limit: u32) -> Result<Vec<SearchResult>, FetchError> {
        let rows = self.0.lock().await.search_users(query, limit)?;
        Ok(rows
            .iter()
            .map(|u| {
                SearchResult::new(
                    ResultKind::User,
                    &u.id,
                    &u.username,
                    format!("/profile/{}", u.username),
                )
            })
            .collect())
    }
}

pub struct PostSource(pub Database);

#[async_trait]
impl SearchSource for PostSource {
    fn kind(&self) -> ResultKind {
        ResultKind::Post
    }

    async fn search(&self, query: &str, limit: u32) -> Result<Vec<SearchResult>, FetchError> {
        let rows = self.0.lock().await.search_posts(query, limit)?;
        Ok(rows
            .iter()
            .map(|p| SearchResult::new(ResultKind::Post, &p.id, &p.title, format!("/posts/{}", p.id)))
            .collect())
    }
}

pub struct QuestionSource(pub Database);

#[async_trait]
impl SearchSource for QuestionSource {
    fn kind(&self) -> ResultKind {
        ResultKind::Question
    }

    async fn search(&self, query: &str, limit: u32) -> Result<Vec<SearchResult>, FetchError> {
        let rows = self.0.lock().await.search_questions(query, limit)?;
        Ok(rows
            .iter()
            .map(|q| {
                SearchResult::new(
                    ResultKind::Question,
                    &q.id,
                    &q.title,
                    format!("/questions/{}", q.id),
                )
            })
            .collect())
    }
}

pub struct TagSource(pub Database);

#[async_trait]
impl SearchSource for TagSource {
    fn kind(&self) -> ResultKind {
        ResultKind::Tag
    }

    async fn search(&self, query: &str, limit: u32) -> Result<Vec<SearchResult>, FetchError> {
        let rows = self.0.lock().await.search_tags(query, limit)?;
        Ok(rows
            .iter()
            .map(|t| SearchResult::new(ResultKind::Tag, &t.id, &t.name, format!("/tags/{}", t.name)))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

pub struct SearchAggregator {
    sources: Vec<Box<dyn SearchSource>>,
    per_source: u32,
}

impl SearchAggregator {
    pub fn new(sources: Vec<Box<dyn SearchSource>>) -> Self {
        Self {
            sources,
            per_source: RESULTS_PER_SOURCE,
        }
    }

    /// The four database-backed sources.
    pub fn for_database(db: &Database) -> Self {
        Self::new(vec![
            Box::new(UserSource(db.clone())),
            Box::new(PostSource(db.clone())),
            Box::new(QuestionSource(db.clone())),
            Box::new(TagSource(db.clone())),
        ])
    }

    pub async fn search(&self, query: &str) -> Vec<SearchResult> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }

        let per_source = self.per_source;
        let settled = join_all(self.sources.iter().map(|source| async move {
            (source.kind(), source.search(query, per_source).await)
        }))
        .await;

        let mut groups: Vec<(ResultKind, Vec<SearchResult>)> = Vec::with_capacity(settled.len());
        for (kind, outcome) in settled {
            match outcome {
                Ok(mut rows) => {
                    rows.truncate(per_source as usize);
                    groups.push((kind, rows));
                }
                Err(e) => crate::dlog!("search: {:?} source failed for {:?}: {}", kind, query, e),
            }
        }
        // Stable sort keeps source order within a kind.
        groups.sort_by_key(|(kind, _)| *kind);
        groups.into_iter().flat_map(|(_, rows)| rows).collect()
    }
}

// ---------------------------------------------------------------------------
// Debouncer
// ---------------------------------------------------------------------------

/// Idle-time debounce for keystroke-driven queries.
///
/// Every call to [`SearchDebouncer::settle`] supersedes the previous one; only
/// a call that sees no newer keystroke during the whole delay yields its query.
#[derive(Clone)]
pub struct SearchDebouncer {
    delay: Duration,
    generation: Arc<AtomicU64>,
}

impl Default for SearchDebouncer {
    fn default() -> Self {
        Self::new(SEARCH_DEBOUNCE)
    }
}

impl SearchDebouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn settle(&self, query: &str) -> Option<String> {
        let mine = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        (self.generation.load(Ordering::SeqCst) == mine).then(|| query.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Canned {
        kind: ResultKind,
        count: usize,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SearchSource for Canned {
        fn kind(&self) -> ResultKind {
            self.kind
        }

        async fn search(&self, _query: &str, _limit: u32) -> Result<Vec<SearchResult>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(FetchError::FetchFailed("boom".to_string()));
            }
            Ok((0..self.count)
                .map(|i| {
                    SearchResult::new(self.kind, &format!("{i}"), "t", format!("/x/{i}"))
                })
                .collect())
        }
    }

    fn sources(
        canned: &[(ResultKind, usize, bool)],
        calls: &Arc<AtomicUsize>,
    ) -> Vec<Box<dyn SearchSource>> {
        canned.iter()
            .map(|&(kind, count, fail)| {
                Box::new(Canned {
                    kind,
                    count,
                    fail,
                    calls: Arc::clone(calls),
                }) as Box<dyn SearchSource>
            })
            .collect()
    }

    #[tokio::test]
    async fn one_failing_source_does_not_hide_the_rest() {
        let calls = Arc::new(AtomicUsize::new(0));
        let agg = SearchAggregator::new(sources(
            &[
                (ResultKind::User, 1, false),
                (ResultKind::Post, 2, true),
                (ResultKind::Question, 1, false),
                (ResultKind::Tag, 1, false),
            ],
            &calls,
        ));
        let kinds: Vec<ResultKind> = agg.search("abc").await.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![ResultKind::User, ResultKind::Question, ResultKind::Tag]
        );
    }

    #[tokio::test]
    async fn results_follow_kind_order_and_cap() {
        let calls = Arc::new(AtomicUsize::new(0));
        // Registered out of order on purpose.
        let agg = SearchAggregator::new(sources(
            &[
                (ResultKind::Tag, 5, false),
                (ResultKind::User, 1, false),
            ],
            &calls,
        ));
        let results = agg.search("x").await;
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].kind, ResultKind::User);
        assert!(results[1..].iter().all(|r| r.kind == ResultKind::Tag));
        assert_eq!(results[1].icon, "hash");
    }

    #[tokio::test]
    async fn blank_query_issues_no_request() {
        let calls = Arc::new(AtomicUsize::new(0));
        let agg = SearchAggregator::new(sources(&[(ResultKind::User, 1, false)], &calls));
        assert!(agg.search("").await.is_empty());
        assert!(agg.search("   ").await.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn database_sources_build_navigation_targets() {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user("rustacean", None).await.unwrap();
        let post = db
            .create_post(&user.id, "Borrowing", "all about rust lifetimes")
            .await
            .unwrap();
        db.create_tag("rust").await.unwrap();

        let results = SearchAggregator::for_database(&db).search("RUST").await;
        let hrefs: Vec<String> = results.iter().map(|r| r.href.clone()).collect();
        assert_eq!(
            hrefs,
            vec![
                "/profile/rustacean".to_string(),
                format!("/posts/{}", post.id),
                "/tags/rust".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn debouncer_only_releases_the_last_keystroke() {
        let debouncer = SearchDebouncer::default();
        let first = {
            let d = debouncer.clone();
            tokio::spawn(async move { d.settle("ab").await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = debouncer.settle("abc").await;

        assert_eq!(first.await.unwrap(), None);
        assert_eq!(second.as_deref(), Some("abc"));
    }
}
