// Authoritative entity collection and per-tick change tracking

mod store;

pub use store::{EntityMap, EntityStore};

#[cfg(test)]
mod tests;
