pub mod admin;
pub mod client;
pub mod gift;
pub mod redemption;
pub mod webhook;
