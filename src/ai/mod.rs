pub mod chat;
pub mod formatting;
pub mod tools;
