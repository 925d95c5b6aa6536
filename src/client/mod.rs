pub mod bucket;
pub mod connection;
pub mod events;
pub mod facade;
pub mod router;

pub use events::ClientEvent;
pub use facade::{Client, Expiration, PutOptions};
