//! The TCP listener and dual-mode connection dispatch (spec §6.1).

pub mod tcp_server;
