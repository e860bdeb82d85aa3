// Database module
// SQLite holds projects, documents and jobs; index pairs live on disk (see crate::index)

pub mod sqlite;

pub use sqlite::*;
