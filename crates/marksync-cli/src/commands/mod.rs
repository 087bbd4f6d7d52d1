pub mod add;
pub mod common;
pub mod delete;
pub mod devices;
pub mod edit;
pub mod list;
pub mod order;
pub mod setup;
pub mod sync;
