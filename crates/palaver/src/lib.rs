pub mod chat;
pub mod conversation;
pub mod errors;
pub mod models;
pub mod observer;
pub mod providers;
pub mod registry;
pub mod stream;
