pub mod chat;
pub mod connection;
pub mod hub;
pub mod notify;
pub mod reactions;

pub use hub::{Connection, Hub};
