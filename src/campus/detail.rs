//! Detail pages behind listing references.

use thiserror::Error;
use tokio::task::JoinError;

use super::listing::{ListingError, ListingReference, ListingWalker};
use crate::modules::task_group::{TaskGroup, TaskGroupError};
use crate::session::Session;
use crate::transport::{Credentials, FormBody, PipelineError, RequestOptions};

#[derive(Debug, Error)]
pub enum DetailError {
    #[error(transparent)]
    Listing(#[from] ListingError),
    #[error("detail request failed: {0}")]
    Fetch(#[from] PipelineError),
    #[error("detail task aborted: {0}")]
    Join(#[from] JoinError),
}

impl From<TaskGroupError<PipelineError>> for DetailError {
    fn from(err: TaskGroupError<PipelineError>) -> Self {
        match err {
            TaskGroupError::Task(err) => DetailError::Fetch(err),
            TaskGroupError::Join(err) => DetailError::Join(err),
        }
    }
}

/// A reference together with the HTML it points to.
#[derive(Debug, Clone)]
pub struct DetailPage {
    pub reference: ListingReference,
    pub html: String,
}

/// Submit a reference's form and return the detail HTML.
pub async fn fetch_detail(session: &Session, reference: &ListingReference) -> Result<String, PipelineError> {
    let body = FormBody::from_pairs(reference.form_pairs());
    let options = RequestOptions::submit(reference.method(), body, Credentials::Include);
    let page = session.request(reference.url.clone(), options).await?;
    Ok(page.into_text())
}

/// Drain `walker`, fetching every detail page with at most `capacity`
/// requests in flight. Pages come back in listing order.
pub async fn collect_details(
    session: &Session,
    mut walker: ListingWalker,
    capacity: usize,
) -> Result<Vec<DetailPage>, DetailError> {
    let mut group: TaskGroup<String, PipelineError> = TaskGroup::new(capacity);
    let mut references = Vec::new();

    while let Some(item) = walker.next().await {
        let reference = item?;
        let task_session = session.clone();
        let task_reference = reference.clone();
        group.enqueue(move || async move { fetch_detail(&task_session, &task_reference).await });
        group.acquire().await;
        references.push(reference);
    }

    log::info!(
        "collected {} reference(s) in {} search(es)",
        references.len(),
        walker.search_replays()
    );
    let pages = group.all().await?;
    Ok(references
        .into_iter()
        .zip(pages)
        .map(|(reference, html)| DetailPage { reference, html })
        .collect())
}
