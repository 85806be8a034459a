//! Network layer of the standalone host.

mod server;

pub use server::{ClientConnection, Inbound, Server};
