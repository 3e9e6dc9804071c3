use clap::Parser;
use hydrosim_core::config::load_model;
use hydrosim_core::output::OutputWriter;
use hydrosim_core::HydroError;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

/// Semi-distributed watershed simulation engine.
#[derive(Parser, Debug)]
#[command(name = "hydrosim", version, about)]
struct Cli {
    /// Path to the model definition file.
    model: PathBuf,

    /// Directory for output files (defaults to "output" next to the model
    /// definition).
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn run(cli: Cli) -> Result<(), HydroError> {
    let mut model = load_model(&cli.model)?;
    let out_dir = cli.output.unwrap_or_else(|| {
        cli.model
            .parent()
            .unwrap_or_else(|| std::path::Path::new("."))
            .join("output")
    });
    let mut writer = OutputWriter::create(&out_dir, &model)?;

    info!(
        steps = model.clock.num_steps(),
        hrus = model.hrus.len(),
        subbasins = model.subbasins.len(),
        "starting simulation"
    );

    while !model.finished() {
        model.step()?;
        writer.flush_step(&model)?;
    }
    writer.write_solution(&model)?;

    let report = model.final_report();
    info!(
        steps = report.steps_completed,
        numerical_events = report.numerical_events,
        mass_balance_events = report.mass_balance_events,
        "simulation finished"
    );
    if report.mass_balance_events > 0 {
        info!(
            events = report.mass_balance_events,
            "mass balance checks exceeded tolerance; see warnings above"
        );
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err @ HydroError::MassBalance { .. }) => {
            error!("{err}");
            ExitCode::from(2)
        }
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
