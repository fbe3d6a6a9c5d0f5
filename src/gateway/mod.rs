pub mod server;

pub use server::{GatewayServer, ServerState};
