//! Typed queries
//!
//! A [`TypedQuery`] binds a key, a fetch function and a result type. Values
//! go into the cache as JSON and come back out through serde.

use crate::error::{encode, Error, Result};
use crate::observer::QueryObserver;
use querylite::{
    query_fn, FetchContext, FetchError, InvalidateOptions, InvalidationResult, Key, QueryClient,
    QueryFn, QueryOptions,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::marker::PhantomData;

/// A cache query whose data deserializes into `T`
///
/// # Examples
///
/// ```no_run
/// use querylite::{key, FetchError, QueryClient};
/// use querylite_sdk::TypedQuery;
///
/// # async fn run() -> querylite_sdk::Result<()> {
/// let client = QueryClient::new();
/// let count = TypedQuery::<u64>::new(&client, key!["users", "count"], |_ctx| async {
///     Ok::<_, FetchError>(42u64)
/// });
///
/// assert_eq!(count.query().await?, 42);
/// assert_eq!(count.data()?, Some(42));
/// # Ok(())
/// # }
/// ```
pub struct TypedQuery<T> {
    client: QueryClient,
    key: Key,
    query_fn: QueryFn,
    options: QueryOptions,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for TypedQuery<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            key: self.key.clone(),
            query_fn: self.query_fn.clone(),
            options: self.options,
            _marker: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> TypedQuery<T> {
    /// Create a typed query from an async function returning any
    /// serializable value
    pub fn new<F, Fut, R>(client: &QueryClient, key: Key, f: F) -> Self
    where
        F: Fn(FetchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, FetchError>> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        let fetch = query_fn(move |ctx| {
            let fut = f(ctx);
            async move { encode(fut.await?) }
        });
        Self::from_query_fn(client, key, fetch)
    }

    /// Wrap an untyped fetch function
    pub fn from_query_fn(client: &QueryClient, key: Key, query_fn: QueryFn) -> Self {
        Self {
            client: client.clone(),
            key,
            query_fn,
            options: QueryOptions::default(),
            _marker: PhantomData,
        }
    }

    /// Per-query stale/gc overrides
    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn client(&self) -> &QueryClient {
        &self.client
    }

    /// Cached data when fresh, otherwise fetch
    pub async fn query(&self) -> Result<T> {
        let value = self
            .client
            .query_with(&self.key, self.query_fn.clone(), self.options)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Always fetch, joining a fetch already in flight
    pub async fn fetch(&self) -> Result<T> {
        let value = self.client.fetch(&self.key, self.query_fn.clone()).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Start a new fetch that supersedes any in-flight one
    pub async fn refetch(&self) -> Result<T> {
        let options = querylite::FetchOptions::refetch().with_options(self.options);
        let value = self
            .client
            .fetch_with(&self.key, Some(self.query_fn.clone()), options)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Warm the cache without waiting on the result type
    pub async fn prefetch(&self) -> Result<()> {
        self.client
            .prefetch(&self.key, self.query_fn.clone())
            .await
            .map_err(Error::from)
    }

    /// Last data stored for this key, if any
    pub fn data(&self) -> Result<Option<T>> {
        match self.client.get_query_data(&self.key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Seed or overwrite the cached data without fetching
    pub fn set_data<D: Serialize>(&self, data: &D) -> Result<()> {
        let value = serde_json::to_value(data)?;
        self.client.set_query_data(&self.key, value)?;
        Ok(())
    }

    /// Invalidate this key and everything nested under it
    pub fn invalidate(&self) -> Result<InvalidationResult> {
        Ok(self
            .client
            .invalidate(&self.key, InvalidateOptions::default())?)
    }

    /// Subscribe to this query; stale data is refetched in the background
    pub fn observe(&self, label: Option<&str>) -> Result<QueryObserver<T>> {
        QueryObserver::new(self.clone(), label)
    }

    pub(crate) fn query_fn(&self) -> &QueryFn {
        &self.query_fn
    }

    pub(crate) fn options(&self) -> QueryOptions {
        self.options
    }
}
