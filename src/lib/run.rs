use std::vec::Vec;

use anyhow::{ensure, Context, Result};
use log::{info, warn};
use rayon::prelude::*;

use crate::{
    demux::{LaneDemultiplexer, LaneStats},
    layout::RunLayout,
    metrics::{print_summary_table, write_stats_tsv, DemultiplexStatsProcessed, STATS_FILE_NAME},
    opts::Opts,
    sample_sheet::SampleSheet,
    utils::{built_info, lane_input_dir_name, LaneInputs},
};

/// Demultiplex every lane of the sample sheet, returning the statistics of each lane in lane
/// order.
///
/// All inputs are located and, unless only a subset of the indexes is requested, the output
/// directories are checked before anything is written.
pub fn run(opts: Opts) -> Result<Vec<LaneStats>> {
    info!("Running lanedemux version {}", built_info::VERSION.as_str());

    // Preflight checks
    let structure = &opts.index_read_structure;
    ensure!(
        structure.sample_barcodes().count() > 0,
        "No sample barcodes found in the index read structure: {}",
        structure
    );
    ensure!(
        structure.templates().count() == 0,
        "Template segments are not allowed in the index read structure: {}",
        structure
    );
    ensure!(opts.lane_threads > 0, "At least one lane thread is required");

    info!("Reading sample sheet {}", opts.sample_sheet.to_string_lossy());
    let mut sample_sheet = SampleSheet::from_path(&opts.sample_sheet).with_context(|| {
        format!("Failed to read sample sheet {}", opts.sample_sheet.to_string_lossy())
    })?;
    if let Some(indexes) = &opts.indexes {
        sample_sheet.check_requested_indexes(indexes)?;
        sample_sheet = sample_sheet.restrict_to_indexes(indexes);
        info!("Demultiplexing only the {} requested indexes", indexes.len());
    }

    let layout = RunLayout::new(&sample_sheet, &opts.output_dir)?;
    let inputs = layout
        .lanes
        .iter()
        .map(|lane| LaneInputs::locate(&opts.input_dir, lane.lane))
        .collect::<Result<Vec<_>>>()?;

    if !opts.subset_mode() {
        layout.ensure_no_existing_directories()?;
    }
    info!("Creating output directories under {}", layout.output_dir.to_string_lossy());
    layout.create_directories()?;

    let settings = opts.as_lane_settings();
    let lane_pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.lane_threads)
        .build()
        .context("Failed to create the lane thread pool")?;
    let lane_stats: Vec<LaneStats> = lane_pool.install(|| {
        layout
            .lanes
            .par_iter()
            .zip(inputs.into_par_iter())
            .map(|(lane, inputs)| match inputs {
                Some(inputs) => LaneDemultiplexer::new(lane, inputs, &settings).run(),
                None => {
                    warn!(
                        "Lane {}: no {} directory under {}, skipping",
                        lane.lane,
                        lane_input_dir_name(lane.lane),
                        opts.input_dir.to_string_lossy()
                    );
                    Ok(LaneStats::skipped(lane))
                }
            })
            .collect::<Result<Vec<_>>>()
    })?;

    let rows: Vec<DemultiplexStatsProcessed> =
        lane_stats.iter().flat_map(|stats| stats.rows.iter().cloned()).collect();
    print_summary_table(&rows, std::io::stdout().lock())
        .context("Failed to print the summary table")?;
    info!("Writing {}", layout.output_dir.join(STATS_FILE_NAME).to_string_lossy());
    write_stats_tsv(&layout.output_dir, &rows)?;

    info!(
        "Demultiplexed {} read pairs over {} lanes",
        lane_stats.iter().map(|s| s.total_pairs).sum::<u64>(),
        lane_stats.len()
    );
    Ok(lane_stats)
}
