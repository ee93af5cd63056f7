//! HTTP transport: routes plus the server loop.

mod routes;
mod server;

pub use routes::routes;
pub use server::{ServerConfig, serve};
