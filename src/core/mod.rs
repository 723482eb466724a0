//! Core policy compilation and evaluation.

mod prepared;
mod references;

pub use prepared::PreparedQuery;
pub use references::ModuleIndex;
