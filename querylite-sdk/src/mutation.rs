//! Typed mutations

use crate::error::{encode, Result};
use querylite::{FetchError, Mutation, MutationContext, MutationStatus, QueryClient};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::marker::PhantomData;

/// A named mutation taking variables `V` and producing `T`
///
/// Runs through [`querylite::Mutation`], so mutation hooks (and with them
/// auto-invalidation) fire exactly as for untyped mutations.
///
/// # Examples
///
/// ```no_run
/// use querylite::{FetchError, QueryClient};
/// use querylite_sdk::TypedMutation;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct NewUser { name: String }
///
/// #[derive(Serialize, Deserialize)]
/// struct User { id: u64, name: String }
///
/// # async fn run() -> querylite_sdk::Result<()> {
/// let client = QueryClient::new();
/// let add_user = TypedMutation::new("add-user", |input: NewUser, _ctx| async move {
///     Ok::<_, FetchError>(User { id: 2, name: input.name })
/// });
///
/// let user: User = add_user.run(&client, &NewUser { name: "Grace".into() }).await?;
/// # Ok(())
/// # }
/// ```
pub struct TypedMutation<V, T> {
    inner: Mutation,
    _marker: PhantomData<fn(V) -> T>,
}

impl<V, T> Clone for TypedMutation<V, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<V, T> TypedMutation<V, T>
where
    V: Serialize + DeserializeOwned + Send + 'static,
    T: Serialize + DeserializeOwned + Send + 'static,
{
    pub fn new<F, Fut>(name: &str, f: F) -> Self
    where
        F: Fn(V, MutationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, FetchError>> + Send + 'static,
    {
        let inner = Mutation::new(name, move |variables, ctx| {
            let decoded = serde_json::from_value::<V>(variables).map_err(|e| {
                FetchError::new(format!("Invalid mutation variables: {}", e)).with_code("decode")
            });
            let fut = decoded.map(|variables| f(variables, ctx));
            async move { encode(fut?.await?) }
        });
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn status(&self) -> MutationStatus {
        self.inner.status()
    }

    /// The untyped mutation, for state inspection
    pub fn inner(&self) -> &Mutation {
        &self.inner
    }

    /// Typed data of the latest run, if it succeeded
    pub fn data(&self) -> Result<Option<T>> {
        match self.inner.state().data {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn run(&self, client: &QueryClient, variables: &V) -> Result<T> {
        let variables = serde_json::to_value(variables)?;
        let value = self.inner.run(client, variables).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn reset(&self) {
        self.inner.reset();
    }
}
