mod client;
mod error;
mod listener;
mod server;

pub use client::SendRequest;
pub use error::TransportError;
pub use listener::EventListener;
pub use server::{Server, DEFAULT_PORT};
