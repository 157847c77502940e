// HTTP middleware
pub mod ip_extractor;

pub use ip_extractor::{extract_client_id, ClientId};
