// Storage collaborators
// SQLite holds the session log, LanceDB holds the vector collection

pub mod lancedb;
pub mod sqlite;

pub use sqlite::Database;
