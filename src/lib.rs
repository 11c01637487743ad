pub mod api;
pub mod auth;
pub mod config;
pub mod dates;
pub mod generate;
pub mod models;
pub mod output;
pub mod paginate;
pub mod query;
pub mod resolver;
pub mod state;
pub mod summary;
pub mod transport;

#[cfg(test)]
mod testing;
