pub mod archive;
pub mod artifact;
pub mod audit;
pub mod config;
pub mod lock;
pub mod month;
pub mod paths;
pub mod query;
pub mod scope;
pub mod util;
