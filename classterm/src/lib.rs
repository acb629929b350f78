//! classterm library
//!
//! Gives every registered student one persistent browser terminal and the
//! admin an overview of all of them. The binary entry point is in main.rs.

pub mod auth;
pub mod config;
pub mod credentials;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod identity;
pub mod multiplexer;
pub mod policy;
pub mod server;
pub mod web;
