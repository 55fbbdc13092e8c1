//! mvreg - register the views of a dataset using their interest points.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use common::log_setup::setup_logging;
use serde::Serialize;
use tracing::info;

use multiview::{
    ChannelProcess, Dataset, FixMapBackParameters, FixedViews, GlobalOptimizationType, InterestPointGrouping,
    InterestPointRegistration, JsonCorrespondenceWriter, MapBack, MapBackModel, PairwiseResult,
    RegistrationConfig, RegistrationType, SubsetOutcome, ViewId,
};

#[derive(Parser)]
#[command(name = "mvreg")]
#[command(about = "Interest point based registration of multi-view acquisitions")]
#[command(version)]
struct Cli {
    /// Dataset file (.yaml, .yml or .json).
    #[arg(long)]
    dataset: PathBuf,

    /// Where to write the registered dataset. Defaults to overwriting --dataset.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Registration parameters (.yaml, .yml or .json). Missing fields keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Interest point label used for every channel.
    #[arg(long, default_value = "beads")]
    label: String,

    /// Only register views of these timepoints.
    #[arg(long = "timepoint")]
    timepoints: Vec<i32>,

    /// Which views are compared with each other.
    #[arg(long, value_enum, default_value_t = RegistrationTypeArg::TimepointsIndividually)]
    registration: RegistrationTypeArg,

    /// Reference timepoint for --registration to-reference-timepoint.
    #[arg(long, default_value = "0")]
    reference_timepoint: i32,

    /// Timepoint range for --registration all-to-all-with-range.
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(i32).range(0..))]
    range: i32,

    /// Which views keep their transform.
    #[arg(long, value_enum, default_value_t = FixArg::FirstView)]
    fix: FixArg,

    /// View to keep fixed with --fix selected, as `timepoint:setup`. Repeatable.
    #[arg(long = "fixed-view", value_parser = parse_view_id)]
    fixed_views: Vec<ViewId>,

    /// Map an unanchored solution back onto a reference view.
    #[arg(long, value_enum, default_value_t = MapBackArg::Disabled)]
    map_back: MapBackArg,

    /// Reference view for --map-back, as `timepoint:setup`. Defaults to the first view of each subset.
    #[arg(long = "map-back-view", value_parser = parse_view_id)]
    map_back_views: Vec<ViewId>,

    /// Combine the channels of one timepoint, angle and illumination before matching.
    #[arg(long)]
    group_channels: bool,

    /// Directory for per-view correspondence files. Nothing is written when omitted.
    #[arg(long)]
    correspondences: Option<PathBuf>,

    /// Write per-pair and per-subset statistics to this file (.yaml, .yml or .json).
    #[arg(long)]
    statistics: Option<PathBuf>,

    /// Worker threads per subset. Overrides the config file; 0 uses every core.
    #[arg(long)]
    parallelism: Option<usize>,

    #[arg(long, default_value = "info")]
    log_level: String,

    /// Also write daily rotated log files into this directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RegistrationTypeArg {
    TimepointsIndividually,
    ToReferenceTimepoint,
    AllToAll,
    AllToAllWithRange,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FixArg {
    None,
    FirstView,
    Selected,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MapBackArg {
    Disabled,
    Translation,
    Rigid,
}

#[derive(Serialize)]
struct StatisticsReport<'a> {
    pairs: &'a [PairwiseResult],
    subsets: &'a [SubsetOutcome],
}

fn parse_view_id(value: &str) -> Result<ViewId, String> {
    let (timepoint, setup) = value
        .split_once(':')
        .ok_or_else(|| format!("expected `timepoint:setup`, got `{value}`"))?;
    let timepoint = timepoint
        .trim()
        .parse()
        .map_err(|e| format!("invalid timepoint `{timepoint}`: {e}"))?;
    let setup = setup
        .trim()
        .parse()
        .map_err(|e| format!("invalid setup `{setup}`: {e}"))?;
    Ok(ViewId::new(timepoint, setup))
}

impl Cli {
    fn registration_type(&self) -> RegistrationType {
        match self.registration {
            RegistrationTypeArg::TimepointsIndividually => RegistrationType::TimepointsIndividually,
            RegistrationTypeArg::ToReferenceTimepoint => RegistrationType::ToReferenceTimepoint {
                reference: self.reference_timepoint,
            },
            RegistrationTypeArg::AllToAll => RegistrationType::AllToAll,
            RegistrationTypeArg::AllToAllWithRange => RegistrationType::AllToAllWithRange { range: self.range },
        }
    }

    fn parameters(&self) -> anyhow::Result<FixMapBackParameters> {
        let fixed_views = match self.fix {
            FixArg::None => FixedViews::None,
            FixArg::FirstView => FixedViews::FirstView,
            FixArg::Selected if self.fixed_views.is_empty() => {
                bail!("--fix selected needs at least one --fixed-view")
            }
            FixArg::Selected => FixedViews::Selected {
                views: self.fixed_views.clone(),
            },
        };

        let model = match self.map_back {
            MapBackArg::Disabled => None,
            MapBackArg::Translation => Some(MapBackModel::Translation),
            MapBackArg::Rigid => Some(MapBackModel::Rigid),
        };
        let map_back = match model {
            None => MapBack::Disabled,
            Some(model) if self.map_back_views.is_empty() => MapBack::FirstView { model },
            Some(model) => MapBack::Selected {
                model,
                views: self.map_back_views.clone(),
            },
        };

        let grouping = if self.group_channels {
            InterestPointGrouping::AddAll
        } else {
            InterestPointGrouping::DoNotGroup
        };

        Ok(FixMapBackParameters {
            fixed_views,
            map_back,
            grouping,
        })
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level, cli.log_dir.as_deref())?;

    let mut dataset = Dataset::load(&cli.dataset)?;
    let mut config: RegistrationConfig = match &cli.config {
        Some(path) => common::load_file(path)
            .with_context(|| format!("Failed to load registration config {}", path.display()))?,
        None => RegistrationConfig::default(),
    };
    if let Some(parallelism) = cli.parallelism {
        config.parallelism = parallelism;
    }

    let views: Vec<ViewId> = dataset
        .sequence
        .view_ids()
        .into_iter()
        .filter(|v| cli.timepoints.is_empty() || cli.timepoints.contains(&v.timepoint))
        .collect();
    let channels = ChannelProcess::all_channels(&dataset.sequence, &cli.label);
    let strategy = GlobalOptimizationType::new(cli.registration_type(), cli.parameters()?);

    let mut registration = InterestPointRegistration::new(&mut dataset, views, channels, config);
    if let Some(dir) = &cli.correspondences {
        registration = registration.with_persistence(Box::new(JsonCorrespondenceWriter::new(dir)));
    }

    let success = registration.register(
        &strategy,
        cli.correspondences.is_some(),
        cli.statistics.is_some(),
    );

    for outcome in registration.outcomes() {
        match &outcome.failure {
            Some(failure) => info!("{}: {} ({failure})", outcome.description, outcome.state),
            None => info!("{}: {}", outcome.description, outcome.state),
        }
    }

    if let Some(path) = &cli.statistics {
        let report = StatisticsReport {
            pairs: registration.statistics(),
            subsets: registration.outcomes(),
        };
        common::save_file(path, &report)?;
        info!("Wrote statistics to {}", path.display());
    }
    drop(registration);

    finish(&dataset, cli.out.as_ref().unwrap_or(&cli.dataset), success)
}

/// Saves `dataset` whether or not registration succeeded. Failed subsets
/// leave their transforms untouched but keep their correspondences.
fn finish(dataset: &Dataset, out: &Path, success: bool) -> anyhow::Result<()> {
    dataset.save(out)?;
    info!("Saved dataset to {}", out.display());

    if !success {
        bail!("No subset could be registered");
    }

    Ok(())
}
