mod args;
mod commands;

use args::{Cli, Command};
use clap::Parser;
use common::{TelemetryGuard, setup_logging};
use inference::InferenceConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = InferenceConfig::from_env()?;

    let telemetry = config
        .otel_endpoint
        .as_ref()
        .map(|endpoint| TelemetryGuard::init("facemark", endpoint, config.environment))
        .transpose()?;

    if telemetry.is_none() {
        setup_logging(config.environment);
    }

    if let Some(provider) = cli.provider {
        config.execution_provider = provider;
    }
    if let Some(threads) = cli.threads {
        config.intra_threads = threads;
    }
    if cli.custom_ops.is_some() {
        config.custom_ops_library = cli.custom_ops;
    }

    tracing::debug!(config = ?config, "Loaded configuration");

    match cli.command {
        Command::Augment { model, output } => commands::augment(&config, model, output),
        Command::Predict {
            image,
            manifest,
            output,
            font,
        } => commands::predict(&config, &image, manifest, &output, font.as_deref()),
        Command::Emojify {
            image,
            manifest,
            output,
            placements,
            font,
            seed,
        } => commands::emojify(
            &config,
            commands::EmojifyArgs {
                image,
                manifest,
                output,
                placements,
                font,
                seed,
            },
        ),
        Command::Redraw {
            image,
            placements,
            output,
            font,
            set,
            remove,
            add,
            save,
        } => commands::redraw(commands::RedrawArgs {
            image,
            placements,
            output,
            font,
            edits: commands::PlacementEdits { set, remove, add },
            save,
        }),
        Command::Emojis { action } => commands::emojis(action),
    }
}
