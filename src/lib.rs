//! Boundary layer for driving QuickJS from a host that only speaks 32-bit
//! integers.
//!
//! Engine values never cross the boundary. The host holds opaque
//! [`Handle`]s into a [`HandleTable`], passes text and argument arrays
//! through the [`Arena`], and exposes its own functions to scripts through
//! a single trampoline that forwards `(context, func_id, argc, argv)` to a
//! [`HostCall`] implementation.
//!
//! Every handle produced by a constructing or duplicating operation must be
//! released exactly once.

pub mod arena;
pub mod bridge;
pub mod config;
pub mod error;
pub mod handle;
pub mod handle_table;
pub mod host;
mod marshal;
pub mod scope;
pub mod store;
pub mod trampoline;

pub use arena::{Addr, Arena};
pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use error::{ArenaError, BridgeError};
pub use handle::{ContextId, Handle, RuntimeId};
pub use handle_table::HandleTable;
pub use host::HostFunctions;
pub use scope::{ErrorKind, EvalFlags, PropertyFilter, Scope};
pub use store::Store;
pub use trampoline::HostCall;
