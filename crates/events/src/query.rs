//! Query bus: read-side twin of the command bus.
//!
//! A query names itself through [`Query::TYPE`] and is answered by exactly one
//! handler. Queries never mutate state; nothing here enforces that, handlers
//! are expected to only read.

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{AskError, RegistryError};

/// A query routed by its type discriminator.
pub trait Query: Send + 'static {
    const TYPE: &'static str;
    type Output: Send + 'static;
    type Error: Send + 'static;

    fn query_type(&self) -> &'static str {
        Self::TYPE
    }
}

#[async_trait]
pub trait QueryHandler<Q: Query>: Send + Sync {
    async fn handle(&self, query: Q) -> Result<Q::Output, Q::Error>;
}

#[async_trait]
impl<Q, H> QueryHandler<Q> for Arc<H>
where
    Q: Query,
    H: QueryHandler<Q> + ?Sized,
{
    async fn handle(&self, query: Q) -> Result<Q::Output, Q::Error> {
        (**self).handle(query).await
    }
}

type AnyBox = Box<dyn Any + Send>;

#[async_trait]
trait ErasedQueryHandler: Send + Sync {
    async fn handle_any(&self, query: AnyBox) -> Result<AnyBox, AnyBox>;
}

struct Typed<Q, H> {
    handler: H,
    _query: PhantomData<fn(Q)>,
}

#[async_trait]
impl<Q, H> ErasedQueryHandler for Typed<Q, H>
where
    Q: Query,
    H: QueryHandler<Q>,
{
    async fn handle_any(&self, query: AnyBox) -> Result<AnyBox, AnyBox> {
        let query = query.downcast::<Q>()?;
        let result: Result<Q::Output, Q::Error> = self.handler.handle(*query).await;
        Ok(Box::new(result))
    }
}

#[derive(Default)]
pub struct QueryBusBuilder {
    handlers: HashMap<&'static str, Arc<dyn ErasedQueryHandler>>,
}

impl core::fmt::Debug for QueryBusBuilder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QueryBusBuilder")
            .field("registered", &self.handlers.len())
            .finish()
    }
}

impl QueryBusBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<Q, H>(mut self, handler: H) -> Result<Self, RegistryError>
    where
        Q: Query,
        H: QueryHandler<Q> + 'static,
    {
        if self.handlers.contains_key(Q::TYPE) {
            return Err(RegistryError::DuplicateQueryHandler(Q::TYPE));
        }
        self.handlers.insert(
            Q::TYPE,
            Arc::new(Typed {
                handler,
                _query: PhantomData,
            }),
        );
        Ok(self)
    }

    pub fn build(self) -> QueryBus {
        QueryBus {
            handlers: Arc::new(self.handlers),
        }
    }
}

/// Immutable query routing table.
#[derive(Clone)]
pub struct QueryBus {
    handlers: Arc<HashMap<&'static str, Arc<dyn ErasedQueryHandler>>>,
}

impl core::fmt::Debug for QueryBus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("QueryBus").field("types", &types).finish()
    }
}

impl QueryBus {
    pub fn builder() -> QueryBusBuilder {
        QueryBusBuilder::new()
    }

    pub fn handles(&self, query_type: &str) -> bool {
        self.handlers.contains_key(query_type)
    }

    /// Route `query` to its handler and return the answer unchanged.
    pub async fn ask<Q: Query>(&self, query: Q) -> Result<Q::Output, AskError<Q::Error>> {
        let handler = self
            .handlers
            .get(Q::TYPE)
            .ok_or(AskError::QueryHandlerNotFound(Q::TYPE))?;

        debug!(query_type = Q::TYPE, "asking query");

        let result = handler
            .handle_any(Box::new(query))
            .await
            .map_err(|_| AskError::UnexpectedQuery(Q::TYPE))?;
        let result = result
            .downcast::<Result<Q::Output, Q::Error>>()
            .map_err(|_| AskError::UnexpectedQuery(Q::TYPE))?;

        (*result).map_err(AskError::Handler)
    }
}
