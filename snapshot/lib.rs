pub mod compare;
pub mod schema;
mod serde_with;
