pub mod db;
pub mod server;
pub mod translator;
pub mod version;
pub mod warehouse;
pub mod web;

#[cfg(test)]
pub(crate) mod testing;
