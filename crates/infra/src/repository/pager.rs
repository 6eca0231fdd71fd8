//! Pager: one page of a view plus its total count.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use guardrail_core::{Entity, PageRequest, PagedResult, RepositoryError, RepositoryResult};

use super::scope::View;
use crate::persistence::PersistencePort;

/// Fetch page `page_number` of `view`.
///
/// Coordinates are validated before any storage call. The slice and the total
/// are two separate reads; rows written between them can make the metadata
/// disagree with the items by a few rows.
pub(crate) async fn fetch_page<E, P>(
    port: &P,
    view: &View<E>,
    page_size: u64,
    page_number: u64,
    cancel: &CancellationToken,
) -> RepositoryResult<PagedResult<E>>
where
    E: Entity,
    P: PersistencePort<E>,
{
    let request = PageRequest::new(page_size, page_number)?;

    if cancel.is_cancelled() {
        return Err(RepositoryError::Cancelled);
    }
    let items = port
        .query(view.to_query().skip(request.skip()).take(request.page_size()))
        .await?;

    if cancel.is_cancelled() {
        return Err(RepositoryError::Cancelled);
    }
    let total = port.count(view.predicate()).await?;

    debug!(
        page = request.page_number(),
        size = request.page_size(),
        total,
        returned = items.len(),
        "page fetched"
    );
    Ok(PagedResult::new(request, total, items))
}
