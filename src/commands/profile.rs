use anyhow::Result;
use tracing::info;

use crate::cli::ProfileArgs;
use crate::commands::ingest::SectionProfile;
use crate::util::write_json_pretty;

/// Writes the built-in profile of a section so it can be edited and passed
/// back to `ingest --profile-path`.
pub fn run(args: ProfileArgs) -> Result<()> {
    let profile = SectionProfile::builtin(args.section);
    profile.validate()?;

    let output = args.output.clone().unwrap_or_else(|| {
        args.cache_root
            .join("profiles")
            .join(format!("{}.json", args.section.as_str()))
    });

    write_json_pretty(&output, &profile)?;

    info!(
        path = %output.display(),
        section = args.section.as_str(),
        doc_type = %profile.doc_type,
        skip_regions = profile.skip_regions.len(),
        levels = profile.levels.len(),
        "wrote section profile"
    );

    Ok(())
}
