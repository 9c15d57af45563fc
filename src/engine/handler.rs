//! Work item handler contract and the type-erased envelope

use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A named pair of fetch/process operations over one kind of item
#[async_trait]
pub trait WorkItemHandler: Send + Sync + 'static {
    type Item: Send + 'static;

    /// Returns at most `max_items` pending items
    async fn fetch_next(&self, max_items: usize) -> crate::Result<Vec<Self::Item>>;

    /// Processes one item
    ///
    /// Errors are logged by the engine and never affect other items.
    /// `cancel` fires on shutdown; in-flight I/O should stop promptly.
    async fn process(&self, item: Self::Item, cancel: CancellationToken) -> crate::Result<()>;
}

/// An item on its way through the engine queue
pub struct WorkItem {
    /// Engine-assigned sequence number, unique within one engine
    pub id: u64,

    /// Registry key of the owning handler
    pub handler_name: String,

    pub payload: Box<dyn Any + Send>,
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("id", &self.id)
            .field("handler_name", &self.handler_name)
            .finish_non_exhaustive()
    }
}

/// Object-safe view of a handler whose items travel as `Box<dyn Any>`
#[async_trait]
pub(crate) trait DynHandler: Send + Sync {
    async fn fetch_erased(&self, max_items: usize) -> crate::Result<Vec<Box<dyn Any + Send>>>;

    async fn process_erased(
        &self,
        payload: Box<dyn Any + Send>,
        cancel: CancellationToken,
    ) -> crate::Result<()>;
}

pub(crate) struct Erased<H>(pub Arc<H>);

#[async_trait]
impl<H: WorkItemHandler> DynHandler for Erased<H> {
    async fn fetch_erased(&self, max_items: usize) -> crate::Result<Vec<Box<dyn Any + Send>>> {
        let items = self.0.fetch_next(max_items).await?;
        Ok(items
            .into_iter()
            .map(|item| Box::new(item) as Box<dyn Any + Send>)
            .collect())
    }

    async fn process_erased(
        &self,
        payload: Box<dyn Any + Send>,
        cancel: CancellationToken,
    ) -> crate::Result<()> {
        let item = payload.downcast::<H::Item>().map_err(|_| {
            crate::IngestError::Handler("work item payload has an unexpected type".to_string())
        })?;
        self.0.process(*item, cancel).await
    }
}
