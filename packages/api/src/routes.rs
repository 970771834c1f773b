pub mod file_stream;
pub mod graphql;
pub mod health;
pub mod projects;
pub mod runs;
pub mod storage;
