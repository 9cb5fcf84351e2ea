mod store;

pub use store::{merge_json, JsonStore};
