//! Link descriptors and the per-session registry that owns them.

mod incoming;
mod outgoing;
pub mod registry;

pub use incoming::IncomingLink;
pub use outgoing::OutgoingLink;
pub use registry::LinkRegistry;
