/// A domain event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **minimal**: ids and changed fields, never the whole aggregate
/// - routed by [`Event::kind`]
///
/// Implement this on an enum of event variants so subscribers can `match`
/// on the concrete payload instead of inspecting types at runtime.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event kind identifier (e.g. "RegistrationCreated").
    fn kind(&self) -> &'static str;
}
