//! Storage - JSON file store used by the config layer

mod json;

pub use json::JsonStore;
