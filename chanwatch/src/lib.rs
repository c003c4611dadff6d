//! IRC transport and terminal front end for `chanwatch-core`.

pub mod client;
pub mod config;
pub mod console;
pub mod decode;
pub mod irc;
