use std::path::PathBuf;

use clap::{Parser, Subcommand};
use trackbridge_core::{
    assets::{DEFAULT_ENVELOPE_BUCKETS, analyze_audio_file, analyze_audio_file_with_cache},
    diagnostics::init_tracing,
    fixtures::demo_project,
    persistence::{load_project, save_project},
    wav::leading_silence_in_file,
};

#[derive(Debug, Parser)]
#[command(name = "trackbridge-cli")]
#[command(about = "Headless tools for trackbridge projects and audio assets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Writes the demo session to disk.
    Demo {
        #[arg(long, default_value = "data/demo.trackbridge.json")]
        output: PathBuf,
    },
    /// Loads a project document and checks its structure.
    Validate { path: PathBuf },
    /// Decodes an audio file and prints its envelope analysis as JSON.
    Analyze {
        path: PathBuf,

        #[arg(long, default_value_t = DEFAULT_ENVELOPE_BUCKETS)]
        buckets: usize,

        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
    /// Scans a WAV file for the first audible frame.
    LeadingSilence { path: PathBuf },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _telemetry = init_tracing(&cli.log_dir)?;

    match cli.command {
        Commands::Demo { output } => {
            save_project(&output, &demo_project())?;
            tracing::info!(path = %output.display(), "demo project written");
        }
        Commands::Validate { path } => {
            let project = load_project(&path)?;
            println!(
                "{}: {} tracks, {} clips, {} patterns, {} plugin nodes",
                path.display(),
                project.tracks.len(),
                project.clip_count(),
                project.patterns.len(),
                project.plugin_nodes.len()
            );
        }
        Commands::Analyze {
            path,
            buckets,
            cache_dir,
        } => {
            let analysis = match cache_dir {
                Some(cache_dir) => analyze_audio_file_with_cache(&path, &cache_dir, buckets)?,
                None => analyze_audio_file(&path, buckets)?,
            };
            println!("{}", serde_json::to_string_pretty(&analysis)?);
        }
        Commands::LeadingSilence { path } => {
            let seconds = leading_silence_in_file(&path)?;
            println!("{seconds:.6}");
        }
    }

    Ok(())
}
