//! WebSocket extensions.

pub mod deflate;
