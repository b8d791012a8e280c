//! Telegram outbound adapter: Bot API client plus the chunked-delivery
//! transport the interaction tools talk to.

pub mod adapter;
pub mod api;
pub mod send;

pub use adapter::TelegramTransport;
pub use api::TelegramApi;
pub use send::split_chunks;
