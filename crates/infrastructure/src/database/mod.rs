pub mod manager;
pub mod postgres;

pub use manager::{run_migrations, DatabaseManager};
pub use postgres::*;
