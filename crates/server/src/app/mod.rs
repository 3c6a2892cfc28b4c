pub(crate) mod arena;
pub(crate) mod auth;
pub(crate) mod bootstrap;
pub(crate) mod config;
pub(crate) mod protocol;
pub(crate) mod room;
pub(crate) mod server_loop;
pub(crate) mod transport;
