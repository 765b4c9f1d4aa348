pub mod connection;
pub mod outputs;

pub use connection::{AppState, WaylandConnection};
