pub mod sqlite;

pub use sqlite::NoteStore;
