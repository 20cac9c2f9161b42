//! Networking module.

mod connection;
mod server;

pub use connection::{
    Connection, Outbound, CLOSE_GOING_AWAY, CLOSE_INTERNAL_ERROR, CLOSE_NORMAL, CLOSE_SUPERSEDED,
    CLOSE_UNAUTHORIZED,
};
pub use server::{writer_set, NetEvent, Server};
