//! Protect agent daemon: configuration and admin API

pub mod api;
pub mod config;
