pub mod ingest;
pub mod profile;
pub mod status;
pub mod validate;
