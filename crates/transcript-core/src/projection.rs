use std::fmt;

use crate::log::EventLog;

/// A renderable view derived from an [`EventLog`].
///
/// Implementations keep whatever indices they need between calls to
/// [`Projection::sync`], but the blocks they expose must always equal a
/// from-scratch projection of the whole log.
pub trait Projection: Default + Send + 'static {
    type Block: Clone + fmt::Debug + PartialEq + Send + Sync + 'static;

    /// Brings the projection up to date with `log`.
    fn sync(&mut self, log: &EventLog);

    /// Current blocks in render order.
    fn blocks(&self) -> &[Self::Block];
}
