pub mod chat;
pub mod chat_stream;
pub mod config;
pub mod history;
pub mod keyring;
pub mod message;
pub mod persona;
pub mod providers;
pub mod retry;
pub mod transport;
