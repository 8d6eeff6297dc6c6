//! Identity for domain objects.

/// Something that keeps its identity while its state changes.
///
/// Two entities with the same id are the same entity, whatever their other
/// fields hold.
pub trait Entity {
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug + core::fmt::Display;

    fn id(&self) -> &Self::Id;
}
