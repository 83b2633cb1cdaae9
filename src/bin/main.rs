use clap::{Args, Parser, Subcommand};
use ensemble_analysis_rs::{
    average_structure, extract_coords, svd, write_matrix_csv, write_singular_values_csv,
    write_structure_pdb, AtomFilter, EnsembleError, MemoryTrajectory, PdbTrajectory, ReadOptions,
    SvdEngine, Trajectory,
};
use log::info;
use std::path::{Path, PathBuf};

/// Command-line tool for ensemble analysis of molecular dynamics trajectories
#[derive(Parser)]
#[command(name = "ensemble-analysis")]
#[command(about = "Average structures and essential dynamics from PDB trajectories", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TrajectoryArgs {
    /// Path to the multi-model PDB trajectory file
    #[arg(short, long)]
    trajectory: PathBuf,

    /// Comma-separated atom names to keep (default: all atoms)
    #[arg(long, default_value = "")]
    atoms: String,

    /// Maximum number of frames to read (default: all frames)
    #[arg(long)]
    max_frames: Option<usize>,
}

impl TrajectoryArgs {
    fn load(&self) -> Result<MemoryTrajectory, EnsembleError> {
        let options = ReadOptions {
            max_frames: self.max_frames,
            atoms: AtomFilter::from_names(&self.atoms),
        };
        let traj = PdbTrajectory::new(&self.trajectory).read(&options)?;
        info!(
            "Loaded {} frames of {} atoms from {:?}",
            traj.len(),
            traj.current_frame().map(|f| f.len()).unwrap_or(0),
            self.trajectory
        );
        Ok(traj)
    }

    /// Output path next to the trajectory: <dir>/<stem><suffix>
    fn default_output(&self, suffix: &str) -> PathBuf {
        let base = self
            .trajectory
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("trajectory");
        let dir = self.trajectory.parent().unwrap_or(Path::new("."));
        dir.join(format!("{}{}", base, suffix))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the average structure of a trajectory
    Average {
        #[command(flatten)]
        input: TrajectoryArgs,

        /// Output PDB path (default: <trajectory>_avg.pdb)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write the (3 x atoms) by frames coordinate matrix as CSV
    Extract {
        #[command(flatten)]
        input: TrajectoryArgs,

        /// Output CSV path (default: <trajectory>_coords.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// SVD of the mean-centered coordinates (essential dynamics)
    Svd {
        #[command(flatten)]
        input: TrajectoryArgs,

        /// Convergence tolerance for the decomposition
        #[arg(long, default_value_t = f64::EPSILON)]
        epsilon: f64,

        /// Iteration limit for the decomposition (0 = no limit)
        #[arg(long, default_value_t = 0)]
        max_iterations: usize,

        /// Output prefix for <prefix>_U.csv, _s.csv, _V.csv and _avg.pdb
        /// (default: trajectory path without extension)
        #[arg(short, long)]
        prefix: Option<PathBuf>,
    },
}

fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn run(command: Commands) -> Result<(), EnsembleError> {
    match command {
        Commands::Average { input, output } => {
            let mut traj = input.load()?;
            let avg = average_structure(&mut traj)?;
            let output_path = output.unwrap_or_else(|| input.default_output("_avg.pdb"));
            write_structure_pdb(&avg, &output_path)?;
            println!("✅ Averaged {} frames", traj.len());
            println!("📄 Average structure saved to: {:?}", output_path);
        }

        Commands::Extract { input, output } => {
            let traj = input.load()?;
            let matrix = extract_coords(&traj)?;
            let output_path = output.unwrap_or_else(|| input.default_output("_coords.csv"));
            write_matrix_csv(&matrix, &output_path)?;
            println!("✅ Extracted {}x{} coordinate matrix", matrix.nrows(), matrix.ncols());
            println!("📄 Coordinates saved to: {:?}", output_path);
        }

        Commands::Svd {
            input,
            epsilon,
            max_iterations,
            prefix,
        } => {
            let traj = input.load()?;
            let engine = SvdEngine {
                epsilon,
                max_iterations,
            };
            let result = svd(&traj, &engine)?;
            let prefix = prefix.unwrap_or_else(|| input.default_output(""));

            write_matrix_csv(&result.u, &with_suffix(&prefix, "_U.csv"))?;
            write_singular_values_csv(&result, &with_suffix(&prefix, "_s.csv"))?;
            write_matrix_csv(&result.v_t, &with_suffix(&prefix, "_V.csv"))?;
            write_structure_pdb(&result.average, &with_suffix(&prefix, "_avg.pdb"))?;

            let variance = result.explained_variance();
            println!("✅ Decomposed {} frames into {} modes", traj.len(), result.s.len());
            for (mode, fraction) in variance.iter().take(5).enumerate() {
                println!("   mode {}: {:.2}% of variance", mode, fraction * 100.0);
            }
            println!("📄 Results saved with prefix: {:?}", prefix);
        }
    }
    Ok(())
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    if let Err(e) = run(cli.command) {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}
