use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "htsnotes",
    version,
    about = "Hierarchical note extraction for the Harmonized Tariff Schedule"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Ingest(IngestArgs),
    Profile(ProfileArgs),
    Status(StatusArgs),
    Validate(ValidateArgs),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum SectionKind {
    GeneralNotes,
    Gri,
    AdditionalRules,
    StatisticalNotes,
    Sections,
    Chapters,
}

impl SectionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GeneralNotes => "general-notes",
            Self::Gri => "gri",
            Self::AdditionalRules => "additional-rules",
            Self::StatisticalNotes => "statistical-notes",
            Self::Sections => "sections",
            Self::Chapters => "chapters",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    #[arg(long, default_value = ".cache/htsnotes")]
    pub cache_root: PathBuf,

    #[arg(long, required_unless_present = "text_path", conflicts_with = "text_path")]
    pub pdf_path: Option<PathBuf>,

    /// Pre-extracted text with pages separated by form feeds.
    #[arg(long)]
    pub text_path: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = SectionKind::GeneralNotes)]
    pub section: SectionKind,

    #[arg(long)]
    pub profile_path: Option<PathBuf>,

    #[arg(long)]
    pub headings_path: Option<PathBuf>,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub ingest_manifest_path: Option<PathBuf>,

    /// Pages to read counting from the profile's start page, for either source.
    #[arg(long)]
    pub max_pages: Option<usize>,

    #[arg(long, default_value_t = false)]
    pub keep_existing: bool,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ProfileArgs {
    #[arg(long, default_value = ".cache/htsnotes")]
    pub cache_root: PathBuf,

    #[arg(long, value_enum, default_value_t = SectionKind::GeneralNotes)]
    pub section: SectionKind,

    /// Defaults to `<cache_root>/profiles/<section>.json`.
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/htsnotes")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    #[arg(long, default_value = ".cache/htsnotes")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Restrict the checks to one doc-type.
    #[arg(long)]
    pub doc_type: Option<String>,

    #[arg(long)]
    pub report_path: Option<PathBuf>,
}
