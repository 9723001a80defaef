pub mod client;

pub use client::{HttpNoteApi, NoteApi};
