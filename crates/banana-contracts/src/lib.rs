pub mod artifacts;
pub mod batch;
pub mod error;
pub mod events;
pub mod request;
pub mod slots;

pub use error::{ContractError, Result};
