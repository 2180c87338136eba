//! Parley core library: per-participant reply dispatch for a WhatsApp assistant, with the
//! assistant, channel and CRM clients it drives and the gateway that feeds it.

pub mod assistant;
pub mod channels;
pub mod config;
pub mod conversation;
pub mod crm;
pub mod dispatch;
pub mod gateway;
pub mod init;
pub mod policy;
pub mod split;
