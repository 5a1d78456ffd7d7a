//! authssl - TLS client socket factory with pluggable certificate trust
//!
//! This crate builds OpenSSL client contexts from caller-supplied trust and
//! identity material and hands out connected TLS sockets, with optional local
//! binding and connect deadlines.

pub mod tls;
