//! Gateway: HTTP server for the WhatsApp webhook and health probes.
//!
//! Webhook messages are forwarded over an mpsc channel to the dispatcher, which answers each
//! participant in order.

mod server;

pub use server::{build_dispatcher, run_gateway};
