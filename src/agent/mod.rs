// Agent module for the long-running quota daemon
//
// The daemon polls the network controller on a fixed interval, charges
// traffic to each managed device's active time block and blocks devices
// that run out of time or data.

mod daemon;
mod scheduler;

pub use daemon::{local_now, open_store, connect_controller, run_daemon, run_once};
pub use scheduler::PollingScheduler;
