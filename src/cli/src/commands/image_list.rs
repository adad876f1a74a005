//! `skiff image list` — list tagged images.

use clap::Args;
use skiff_core::error::Result;

use super::GlobalArgs;

#[derive(Args)]
pub struct ImageListArgs {
    /// Print image ids only
    #[arg(short, long)]
    pub quiet: bool,
}

pub fn execute(globals: &GlobalArgs, args: ImageListArgs) -> Result<()> {
    let (_, store) = globals.open_store()?;
    let images = store.images().images()?;

    if args.quiet {
        for tagged in images {
            println!("{}", tagged.image.id());
        }
        return Ok(());
    }

    println!("{:<40} {:<20} {:>12}", "NAME", "ID", "SIZE");
    for tagged in images {
        println!(
            "{:<40} {:<20} {:>12}",
            tagged.name,
            &tagged.image.id().hex()[..12],
            format_size(tagged.image.size()),
        );
    }
    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes >= 1024 * 1024 * 1024 {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(500), "500 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(1_500_000), "1.4 MB");
        assert_eq!(format_size(1_500_000_000), "1.4 GB");
    }
}
