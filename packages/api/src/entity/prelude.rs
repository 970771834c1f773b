pub use super::api_keys::Entity as ApiKeys;
pub use super::entities::Entity as Entities;
pub use super::filestream_cursors::Entity as FilestreamCursors;
pub use super::graphql_unknown_ops::Entity as GraphqlUnknownOps;
pub use super::projects::Entity as Projects;
pub use super::run_files::Entity as RunFiles;
pub use super::run_history::Entity as RunHistory;
pub use super::runs::Entity as Runs;
