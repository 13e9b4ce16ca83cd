//! blocksync-transport: Client transports and server dispatch
//!
//! Clients implement [`blocksync_core::SurfClient`] either in-process
//! ([`LocalClient`]) or over TCP ([`TcpClient`]). The server side answers the
//! same protocol through a [`Service`].

pub mod local;
pub mod service;
pub mod tcp;

pub use local::LocalClient;
pub use service::Service;
pub use tcp::TcpClient;
