//! Persisted model of the tracking server.
//!
//! The hierarchy is entity → project → run; history points, file records and
//! filestream cursors all hang off a run through its internal primary key.

pub mod prelude;

pub mod api_keys;
pub mod entities;
pub mod filestream_cursors;
pub mod graphql_unknown_ops;
pub mod projects;
pub mod run_files;
pub mod run_history;
pub mod runs;
