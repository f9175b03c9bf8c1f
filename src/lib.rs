//! Local per-canister ports in front of a single replica.
//!
//! Each [`Binding`] gets its own listener on `127.0.0.1:<port>`. Every
//! request arriving there is forwarded to the replica with
//! `canisterId=<canister id>` appended to its query string.

pub mod access_log;
pub mod lookup;
pub mod mapping;
pub mod rewrite;
pub mod router;

pub use lookup::{CanisterIds, LookupError};
pub use mapping::{parse_args, Binding, Command, MappingError, ProxyConfig, USAGE};
pub use rewrite::rewrite_target;
pub use router::{CanisterService, ListeningRouter, PortRouter, RouterError};
