use std::path::Path;
use std::time::Duration;

use tokio::task::JoinError;
use tokio::time::MissedTickBehavior;
use tracing_subscriber::EnvFilter;

mod analytics;
mod config;
mod report;
mod source;

use analytics::{
    Annotator, ControllerError, OnnxModelLoader, Snapshot, SnapshotReader, StreamController,
    TickOutcome,
};
use config::Config;
use report::RunReport;
use source::OpenCvSources;

const STATS_INTERVAL: Duration = Duration::from_secs(5);

type TickResult = Result<TickOutcome, ControllerError>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("larvacount=debug".parse()?))
        .init();

    let config = Config::load()?;
    let mode = config.input.mode;
    tracing::info!(mode = %mode, location = %config.input.location, "loaded config");

    let model_path = config
        .model
        .path
        .clone()
        .ok_or(ControllerError::ModelMissing)?;
    let annotator = config
        .preview
        .enabled
        .then(|| Annotator::new(config.preview.max_size));

    let mut controller = StreamController::new(
        mode,
        OnnxModelLoader::new(config.model.clone()),
        OpenCvSources,
        config.sizing.thresholds(),
        annotator,
    );
    controller.load_model(&model_path)?;
    controller.start_run(mode, &config.input.location)?;

    let controller = if mode.is_streaming() {
        drive_stream(controller, &config).await?
    } else {
        let (controller, result) = tick_blocking(controller).await?;
        if let TickOutcome::Observed(snapshot) = result? {
            publish(&snapshot, config.preview.output.as_deref());
        }
        controller
    };

    let report = RunReport::from_controller(&controller);
    tracing::info!(
        count = report.count,
        running_max = report.running_max_count,
        small = report.sizes.small,
        medium = report.sizes.medium,
        large = report.sizes.large,
        state = ?controller.state(),
        "run finished"
    );
    println!("{}", report.to_json()?);

    Ok(())
}

/// Pull one frame per interval tick until the stream ends or ctrl-c.
async fn drive_stream(
    mut controller: StreamController,
    config: &Config,
) -> Result<StreamController, Box<dyn std::error::Error>> {
    let mut interval = tokio::time::interval(Duration::from_millis(config.stream.tick_interval_ms));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let stats_handle = spawn_stats(controller.reader());
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received");
                controller.stop_run();
                break;
            }
        }

        let (returned, result) = tick_blocking(controller).await?;
        controller = returned;

        match result {
            Ok(TickOutcome::Observed(snapshot)) => {
                publish(&snapshot, config.preview.output.as_deref());
            }
            Ok(TickOutcome::EndOfStream) | Ok(TickOutcome::Idle) => break,
            // Already logged by the controller; the next tick carries on.
            Err(ControllerError::DetectionFailure(_)) => {}
            Err(e) => {
                stats_handle.abort();
                return Err(e.into());
            }
        }
    }

    stats_handle.abort();
    Ok(controller)
}

/// Run one tick off the async runtime. The controller moves into the blocking
/// task and back, so a tick cannot start while another is outstanding.
async fn tick_blocking(
    mut controller: StreamController,
) -> Result<(StreamController, TickResult), JoinError> {
    tokio::task::spawn_blocking(move || {
        let result = controller.tick();
        (controller, result)
    })
    .await
}

fn publish(snapshot: &Snapshot, preview_path: Option<&Path>) {
    let Some(path) = preview_path else {
        return;
    };
    if let Err(e) = report::write_preview(snapshot, path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to write preview");
    }
}

fn spawn_stats(reader: SnapshotReader) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATS_INTERVAL);
        loop {
            interval.tick().await;
            let snapshot = reader.snapshot();
            let sizes = reader.size_histogram();
            tracing::info!(
                count = snapshot.count,
                running_max = snapshot.running_max_count,
                small = sizes.small,
                medium = sizes.medium,
                large = sizes.large,
                "detection stats"
            );
        }
    })
}
