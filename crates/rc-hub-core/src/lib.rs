pub mod console;
pub mod hub;
pub mod last_output;
pub mod live_clients;
pub mod monitor;
pub mod session;
pub mod snapshot;
pub mod target_expand;
pub mod transfer_ops;

pub use console::run_console;
pub use hub::{graceful_shutdown, Hub, HubConfig};
pub use session::run_agent_session;
pub use snapshot::run_periodic_snapshot;
