use thiserror::Error;

/// Failure to route or run a command.
#[derive(Debug, Error)]
pub enum DispatchError<E> {
    /// No handler is registered for the command type.
    #[error("{0}: command handler not found")]
    CommandHandlerNotFound(&'static str),

    /// The handler registered under this type name handles a different command type.
    #[error("{0}: unexpected command")]
    UnexpectedCommand(&'static str),

    /// The handler ran and failed; the error is passed through as-is.
    #[error(transparent)]
    Handler(E),
}

impl<E> DispatchError<E> {
    /// The handler's own error, if the handler ran and failed.
    pub fn into_handler_error(self) -> Option<E> {
        match self {
            DispatchError::Handler(err) => Some(err),
            _ => None,
        }
    }
}

/// Failure to route or run a query.
#[derive(Debug, Error)]
pub enum AskError<E> {
    /// No handler is registered for the query type.
    #[error("{0}: query handler not found")]
    QueryHandlerNotFound(&'static str),

    /// The handler registered under this type name handles a different query type.
    #[error("{0}: unexpected query")]
    UnexpectedQuery(&'static str),

    /// The handler ran and failed; the error is passed through as-is.
    #[error(transparent)]
    Handler(E),
}

impl<E> AskError<E> {
    pub fn into_handler_error(self) -> Option<E> {
        match self {
            AskError::Handler(err) => Some(err),
            _ => None,
        }
    }
}

/// Registry construction error (startup only).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("{0}: command handler already registered")]
    DuplicateCommandHandler(&'static str),

    #[error("{0}: query handler already registered")]
    DuplicateQueryHandler(&'static str),
}
