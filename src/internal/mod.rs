pub mod captions;
pub mod data_types;
pub mod error;
pub mod events;
pub mod media;
pub mod registry;
pub mod signaling;
pub mod transport;

#[cfg(test)]
pub(crate) mod mocks;
