use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{info, warn};

use crate::store::{Content, Movie, NewContent, NewMovie, Seat, SqliteStore, StoreResult};

/// Operator-facing catalog writes. Content creation enqueues its transcode
/// job explicitly instead of relying on a save hook.
#[derive(Debug, Clone)]
pub struct CatalogService {
    store: SqliteStore,
    waker: Option<Arc<Notify>>,
}

impl CatalogService {
    pub fn new(store: SqliteStore) -> Self {
        Self { store, waker: None }
    }

    /// Wakes an idle transcode worker after each enqueue.
    pub fn with_waker(mut self, waker: Arc<Notify>) -> Self {
        self.waker = Some(waker);
        self
    }

    pub fn create_movie(&self, movie: &NewMovie) -> StoreResult<Movie> {
        let created = self.store.create_movie(movie)?;
        info!(
            movie_id = created.id,
            seats = created.num_rows * created.seats_per_row,
            "movie created"
        );
        Ok(created)
    }

    pub fn search_movies(&self, query: Option<&str>) -> StoreResult<Vec<Movie>> {
        self.store.search_movies(query)
    }

    pub fn list_seats(&self, movie_id: i64) -> StoreResult<Vec<Seat>> {
        self.store.list_seats(movie_id)
    }

    pub fn list_content(&self) -> StoreResult<Vec<Content>> {
        self.store.list_content()
    }

    /// The content row is committed before the job is enqueued; a failed
    /// enqueue is logged, not returned.
    pub fn create_content(&self, content: &NewContent) -> StoreResult<Content> {
        let created = self.store.create_content(content)?;
        info!(content_id = created.id, title = %created.title, "content created");
        if created.source_path.is_some() {
            match self.store.enqueue_transcode(created.id) {
                Ok(job) => {
                    info!(content_id = created.id, job_id = job.id, "transcode job enqueued");
                    if let Some(waker) = &self.waker {
                        waker.notify_one();
                    }
                }
                Err(err) => {
                    warn!(content_id = created.id, error = %err, "failed to enqueue transcode job");
                }
            }
        }
        Ok(created)
    }
}
