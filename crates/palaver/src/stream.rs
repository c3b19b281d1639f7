pub mod events;
pub mod normalizer;
