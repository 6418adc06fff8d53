pub mod cli;
pub mod client;
pub mod config;
pub mod credentials;
pub mod models;
pub mod normalize;
pub mod store;
pub mod sync;
pub mod trace;

pub mod util {
    pub mod db;
    pub mod env;
}
