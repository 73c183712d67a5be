pub mod api;
pub mod client;
pub mod error;
pub mod jid;
pub mod session;
pub mod socket;
pub mod types;

pub use api::GatewayApi;
pub use client::MessagingClient;
pub use error::{ClientError, ClientResult};
pub use types::*;
