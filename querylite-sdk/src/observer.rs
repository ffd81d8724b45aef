//! Subscribed, typed views of a cache entry
//!
//! An observer is what a UI binding holds while a component is mounted: it
//! keeps the entry subscribed (so it is refetched on invalidation and never
//! garbage collected) and reads its state through serde.

use crate::error::Result;
use crate::query::TypedQuery;
use parking_lot::Mutex;
use querylite::{FetchError, QueryStatus, Subscription, SubscriberId};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;

/// Typed snapshot of an observed entry
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedState<T> {
    pub status: QueryStatus,
    pub data: Option<T>,
    pub error: Option<FetchError>,
    pub is_fetching: bool,
    pub is_stale: bool,
}

impl<T> ObservedState<T> {
    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    pub fn is_pending(&self) -> bool {
        self.status == QueryStatus::Pending
    }
}

/// Holds a subscription for as long as it lives
///
/// Dropping the observer unsubscribes; once no subscribers remain the entry
/// becomes eligible for garbage collection.
///
/// # Examples
///
/// ```no_run
/// use querylite::{key, FetchError, QueryClient};
/// use querylite_sdk::TypedQuery;
///
/// # async fn run() -> querylite_sdk::Result<()> {
/// let client = QueryClient::new();
/// let todos = TypedQuery::<Vec<String>>::new(&client, key!["todos"], |_ctx| async {
///     Ok::<_, FetchError>(vec!["write docs".to_string()])
/// });
///
/// let observer = todos.observe(Some("TodoList"))?;
/// let state = observer.wait_settled().await?;
/// println!("{:?}", state.data);
/// # Ok(())
/// # }
/// ```
pub struct QueryObserver<T> {
    query: TypedQuery<T>,
    subscription: Subscription,
    refresh: Mutex<Option<JoinHandle<()>>>,
}

impl<T: DeserializeOwned> QueryObserver<T> {
    pub(crate) fn new(query: TypedQuery<T>, label: Option<&str>) -> Result<Self> {
        let subscription = query.client().subscribe(query.key(), label)?;
        let observer = Self {
            query,
            subscription,
            refresh: Mutex::new(None),
        };
        observer.refresh_if_stale();
        Ok(observer)
    }

    /// Start a background fetch when the entry is stale and idle
    fn refresh_if_stale(&self) {
        let Some(entry) = self.subscription.entry() else {
            return;
        };
        if !entry.is_stale || entry.is_fetching {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::debug!(
                "No runtime; observer of {} will not refresh",
                self.query.key()
            );
            return;
        };

        let client = self.query.client().clone();
        let key = self.query.key().clone();
        let fetch = self.query.query_fn().clone();
        let options = self.query.options();
        let task = handle.spawn(async move {
            if let Err(err) = client.query_with(&key, fetch, options).await {
                log::debug!("Background refresh of {} failed: {}", key, err);
            }
        });
        *self.refresh.lock() = Some(task);
    }

    pub fn id(&self) -> SubscriberId {
        self.subscription.id()
    }

    pub fn query(&self) -> &TypedQuery<T> {
        &self.query
    }

    /// Current typed state of the entry
    pub fn state(&self) -> Result<ObservedState<T>> {
        let Some(entry) = self.subscription.entry() else {
            return Ok(ObservedState {
                status: QueryStatus::Pending,
                data: None,
                error: None,
                is_fetching: false,
                is_stale: true,
            });
        };
        let data = match entry.data {
            Some(value) => Some(serde_json::from_value(value)?),
            None => None,
        };
        Ok(ObservedState {
            status: entry.status,
            data,
            error: entry.error,
            is_fetching: entry.is_fetching,
            is_stale: entry.is_stale,
        })
    }

    /// Supersede any in-flight fetch and return the new data
    pub async fn refetch(&self) -> Result<T> {
        self.query.refetch().await
    }

    /// Wait for the initial refresh and any fetch in flight, then return
    /// the state
    pub async fn wait_settled(&self) -> Result<ObservedState<T>> {
        let refresh = self.refresh.lock().take();
        if let Some(task) = refresh {
            let _ = task.await;
        }
        let client = self.query.client();
        while let Some(outcome) = client.wait_for_fetch(self.query.key()).await {
            if let Err(err) = outcome {
                log::debug!("Observed fetch of {} ended: {}", self.query.key(), err);
            }
        }
        self.state()
    }
}
