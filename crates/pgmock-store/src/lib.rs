pub mod store;

pub use store::ResponseStore;

#[cfg(test)]
mod tests;
