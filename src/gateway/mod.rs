//! Data access gateway
//!
//! The gateway is the single entry point for every read and write. It is
//! responsible for:
//! - Choosing the read source (shared cache, primary store, snapshot)
//! - Gating writes on the circuit state
//! - Feeding request-path primary failures to the health monitor
//! - Resyncing snapshots after recovery
//! - The HTTP boundary in front of all of the above

pub mod access;
pub mod http;
pub mod primary;
pub mod recent;
pub mod server;

pub use access::{
    spawn_resync_task, Gateway, HealthSnapshot, ReadOutcome, ReadResponse, ReadSource,
    RejectReason, ResyncReport, WriteOutcome, WriteRejection,
};
pub use primary::{HttpPrimaryStore, PrimaryStore, WriteOperation};
pub use recent::{RecentQueries, RecentQuery};
pub use server::GatewayServer;
