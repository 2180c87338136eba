//! Communication channels (WhatsApp Cloud API).
//!
//! The dispatcher talks to a channel only through [`ChannelHandle`]: send a reply chunk or
//! signal presence. Inbound messages arrive via the gateway webhook and are sent to the
//! dispatcher as [`InboundMessage`]s.

mod handle;
mod inbound;
mod whatsapp;

pub use handle::ChannelHandle;
pub use inbound::InboundMessage;
pub use whatsapp::{
    inbound_messages, verify_signature, verify_subscription, WebhookPayload, WhatsAppChannel,
    WhatsAppError,
};
