mod db_setup;
mod hierarchy_stack;
mod line_normalize;
mod marker_recognize;
mod node_flush;
mod note_headings;
mod page_extract;
mod pipeline;
mod profile;
mod run;
mod skip_regions;
mod succession;
#[cfg(test)]
mod tests;

pub use run::run;

pub(crate) use db_setup::{DB_SCHEMA_VERSION, count_rows, read_metadata};
#[cfg(test)]
pub(crate) use db_setup::ensure_schema;
pub(crate) use profile::SectionProfile;
