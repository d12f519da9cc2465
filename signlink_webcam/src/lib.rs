mod routes;
mod stream;

pub mod app;
pub mod camera;
pub mod channel;
pub mod config;
pub mod frame;
pub mod message;
pub mod render;
pub mod server;
pub mod session;
pub mod telemetry;
pub mod websocket;

#[cfg(test)]
mod testing;

pub use app::start_app;
pub use session::{SessionManager, SessionState, SessionView};
