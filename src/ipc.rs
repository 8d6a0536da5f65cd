mod dispatch;
mod pipeline;
mod runtime;
mod server;

pub use dispatch::signal_for;
pub use server::{Switch, client_request, run_daemon};
