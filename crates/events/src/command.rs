//! Command bus: one handler per command type.
//!
//! Commands are **intent** (e.g. "create a registration for this e-mail").
//! Each command type names itself through [`Command::TYPE`] and is routed to
//! exactly one handler. The table is built once at startup through
//! [`CommandBusBuilder`]; the resulting [`CommandBus`] has no way to register
//! more handlers, so concurrent dispatch never races with registration.

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{DispatchError, RegistryError};

/// A command routed by its type discriminator.
pub trait Command: Send + 'static {
    /// Discriminator used as the routing key (e.g. "CreateRegistration").
    const TYPE: &'static str;

    /// Value the handler returns on success.
    type Output: Send + 'static;

    /// Error the handler returns on failure.
    type Error: Send + 'static;

    fn command_type(&self) -> &'static str {
        Self::TYPE
    }
}

/// Handles one command type.
#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync {
    async fn handle(&self, command: C) -> Result<C::Output, C::Error>;
}

#[async_trait]
impl<C, H> CommandHandler<C> for Arc<H>
where
    C: Command,
    H: CommandHandler<C> + ?Sized,
{
    async fn handle(&self, command: C) -> Result<C::Output, C::Error> {
        (**self).handle(command).await
    }
}

type AnyBox = Box<dyn Any + Send>;

#[async_trait]
trait ErasedCommandHandler: Send + Sync {
    /// Returns the boxed `Result<C::Output, C::Error>`, or gives the command
    /// back if it is not the type this handler was registered for.
    async fn handle_any(&self, command: AnyBox) -> Result<AnyBox, AnyBox>;
}

struct Typed<C, H> {
    handler: H,
    _command: PhantomData<fn(C)>,
}

#[async_trait]
impl<C, H> ErasedCommandHandler for Typed<C, H>
where
    C: Command,
    H: CommandHandler<C>,
{
    async fn handle_any(&self, command: AnyBox) -> Result<AnyBox, AnyBox> {
        let command = command.downcast::<C>()?;
        let result: Result<C::Output, C::Error> = self.handler.handle(*command).await;
        Ok(Box::new(result))
    }
}

/// Startup-time builder for a [`CommandBus`].
#[derive(Default)]
pub struct CommandBusBuilder {
    handlers: HashMap<&'static str, Arc<dyn ErasedCommandHandler>>,
}

impl core::fmt::Debug for CommandBusBuilder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CommandBusBuilder")
            .field("registered", &self.handlers.len())
            .finish()
    }
}

impl CommandBusBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `C`. Registering a second handler for the
    /// same type name is rejected.
    pub fn register<C, H>(mut self, handler: H) -> Result<Self, RegistryError>
    where
        C: Command,
        H: CommandHandler<C> + 'static,
    {
        if self.handlers.contains_key(C::TYPE) {
            return Err(RegistryError::DuplicateCommandHandler(C::TYPE));
        }
        self.handlers.insert(
            C::TYPE,
            Arc::new(Typed {
                handler,
                _command: PhantomData,
            }),
        );
        Ok(self)
    }

    pub fn build(self) -> CommandBus {
        CommandBus {
            handlers: Arc::new(self.handlers),
        }
    }
}

/// Immutable command routing table.
#[derive(Clone)]
pub struct CommandBus {
    handlers: Arc<HashMap<&'static str, Arc<dyn ErasedCommandHandler>>>,
}

impl core::fmt::Debug for CommandBus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("CommandBus").field("types", &types).finish()
    }
}

impl CommandBus {
    pub fn builder() -> CommandBusBuilder {
        CommandBusBuilder::new()
    }

    pub fn handles(&self, command_type: &str) -> bool {
        self.handlers.contains_key(command_type)
    }

    /// Route `command` to its handler and return the handler's result.
    ///
    /// The handler runs exactly once. The bus adds no retries or timeouts;
    /// callers bound the call with `tokio::time::timeout` when they need a
    /// deadline.
    pub async fn dispatch<C: Command>(
        &self,
        command: C,
    ) -> Result<C::Output, DispatchError<C::Error>> {
        let handler = self
            .handlers
            .get(C::TYPE)
            .ok_or(DispatchError::CommandHandlerNotFound(C::TYPE))?;

        debug!(command_type = C::TYPE, "dispatching command");

        let result = handler
            .handle_any(Box::new(command))
            .await
            .map_err(|_| DispatchError::UnexpectedCommand(C::TYPE))?;
        let result = result
            .downcast::<Result<C::Output, C::Error>>()
            .map_err(|_| DispatchError::UnexpectedCommand(C::TYPE))?;

        (*result).map_err(DispatchError::Handler)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug)]
    struct Rename {
        name: String,
    }

    impl Command for Rename {
        const TYPE: &'static str = "Rename";
        type Output = usize;
        type Error = String;
    }

    #[derive(Debug)]
    struct Delete;

    impl Command for Delete {
        const TYPE: &'static str = "Delete";
        type Output = ();
        type Error = String;
    }

    /// Shares its type name with `Rename`.
    struct Impostor;

    impl Command for Impostor {
        const TYPE: &'static str = "Rename";
        type Output = ();
        type Error = String;
    }

    #[derive(Default)]
    struct RenameHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CommandHandler<Rename> for RenameHandler {
        async fn handle(&self, command: Rename) -> Result<usize, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if command.name.is_empty() {
                return Err("name is empty".to_string());
            }
            Ok(command.name.len())
        }
    }

    struct DeleteHandler;

    #[async_trait]
    impl CommandHandler<Delete> for DeleteHandler {
        async fn handle(&self, _command: Delete) -> Result<(), String> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn delegates_once_and_returns_output_unchanged() {
        let handler = Arc::new(RenameHandler::default());
        let bus = CommandBus::builder()
            .register::<Rename, _>(handler.clone())
            .unwrap()
            .build();

        let out = bus
            .dispatch(Rename {
                name: "alice".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(out, 5);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_error_is_passed_through() {
        let bus = CommandBus::builder()
            .register::<Rename, _>(RenameHandler::default())
            .unwrap()
            .build();

        let err = bus
            .dispatch(Rename {
                name: String::new(),
            })
            .await
            .unwrap_err();

        assert_eq!(err.into_handler_error().as_deref(), Some("name is empty"));
    }

    #[tokio::test]
    async fn unregistered_type_is_handler_not_found() {
        let bus = CommandBus::builder()
            .register::<Rename, _>(RenameHandler::default())
            .unwrap()
            .build();

        let err = bus.dispatch(Delete).await.unwrap_err();
        assert!(matches!(err, DispatchError::CommandHandlerNotFound("Delete")));
        assert_eq!(err.to_string(), "Delete: command handler not found");
    }

    #[tokio::test]
    async fn type_name_collision_is_unexpected_command() {
        let handler = Arc::new(RenameHandler::default());
        let bus = CommandBus::builder()
            .register::<Rename, _>(handler.clone())
            .unwrap()
            .build();

        let err = bus.dispatch(Impostor).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnexpectedCommand("Rename")));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let err = CommandBus::builder()
            .register::<Rename, _>(RenameHandler::default())
            .unwrap()
            .register::<Rename, _>(RenameHandler::default())
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateCommandHandler("Rename"));
    }

    #[test]
    fn reports_registered_types() {
        let bus = CommandBus::builder()
            .register::<Rename, _>(RenameHandler::default())
            .unwrap()
            .register::<Delete, _>(DeleteHandler)
            .unwrap()
            .build();

        assert!(bus.handles("Rename"));
        assert!(bus.handles("Delete"));
        assert!(!bus.handles("Archive"));
        assert_eq!(format!("{bus:?}"), r#"CommandBus { types: ["Delete", "Rename"] }"#);
    }
}
