mod cli;
mod config;
mod errors;

use std::fs::File;
use std::path::Path;

use clap::Parser;
use indicatif::ProgressBar;
use tabled::settings::Style;
use tabled::{
    Table,
    Tabled,
};
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use aprange::multihit::accumulator::analyze;
use aprange::multihit::events::{
    EventChunk,
    EventSource,
    VecEventSource,
};
use aprange::{
    export_sheets,
    run_pass,
    AnalysisInput,
    CompositionTable,
    ExportSheet,
    MassRange,
    MultiHitModel,
    RawHistogram,
};

use cli::Cli;
use config::Config;
use errors::CliError;

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let file = File::open(path).map_err(|e| CliError::Io {
        source: e.to_string(),
        path: Some(path.to_string_lossy().to_string()),
    })?;
    Ok(serde_json::from_reader(file)?)
}

/// Event source that drives a progress bar as chunks are consumed.
struct ProgressSource {
    inner: VecEventSource,
    bar: ProgressBar,
}

impl ProgressSource {
    fn new(chunks: Vec<EventChunk>) -> Self {
        let bar = ProgressBar::new(chunks.len() as u64);
        Self {
            inner: VecEventSource::new(chunks),
            bar,
        }
    }
}

impl EventSource for ProgressSource {
    fn field_names(&self) -> Vec<String> {
        self.inner.field_names()
    }

    fn next_chunk(&mut self) -> Option<EventChunk> {
        let chunk = self.inner.next_chunk();
        match chunk {
            Some(_) => self.bar.inc(1),
            None => self.bar.finish(),
        }
        chunk
    }
}

#[derive(Tabled)]
struct CompositionRow {
    #[tabled(rename = "Ion")]
    name: String,
    #[tabled(rename = "Composition")]
    composition: String,
    #[tabled(rename = "Sigma/DT")]
    sigma: String,
    #[tabled(rename = "Counts")]
    counts: String,
    #[tabled(rename = "Net")]
    net: String,
    #[tabled(rename = "Bgd")]
    background: String,
    #[tabled(rename = "Tail")]
    tail: String,
}

fn print_composition(title: &str, table: &CompositionTable) {
    let rows: Vec<CompositionRow> = table
        .entries
        .iter()
        .map(|e| CompositionRow {
            name: e.name.clone(),
            composition: e.composition_display(),
            sigma: e.sigma_display(),
            counts: format!("{:.1}", e.counts),
            net: format!("{:.1}", e.net),
            background: format!("{:.1}", e.background),
            tail: format!("{:.1}", e.tail),
        })
        .collect();
    println!("\n{}", title);
    println!("{}", Table::new(rows).with(Style::sharp()));
}

fn write_sheets(sheets: &[ExportSheet], directory: &Path) -> Result<(), CliError> {
    std::fs::create_dir_all(directory).map_err(|e| CliError::Io {
        source: e.to_string(),
        path: Some(directory.to_string_lossy().to_string()),
    })?;
    for sheet in sheets {
        let path = directory.join(format!("{}.csv", sheet.name));
        let mut writer = csv::Writer::from_path(&path).map_err(|e| CliError::Io {
            source: e.to_string(),
            path: Some(path.to_string_lossy().to_string()),
        })?;
        writer.write_record(&sheet.header)?;
        for row in &sheet.rows {
            writer.write_record(row.iter().map(|c| c.to_string()))?;
        }
        writer.flush().map_err(|e| CliError::Io {
            source: e.to_string(),
            path: Some(path.to_string_lossy().to_string()),
        })?;
        info!("wrote {}", path.display());
    }
    Ok(())
}

fn main() -> Result<(), CliError> {
    // Initialize logging; RUST_LOG overrides the INFO default.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Cli::parse();
    let mut config: Config = match args.config {
        Some(ref path) => load_json(path)?,
        None => Config::default(),
    };
    config.merge_cli(&args);

    let histogram_path = config.input.histogram.clone().ok_or(CliError::Config {
        source: "no histogram provided; use --histogram or the config file".to_string(),
    })?;
    let ranges_path = config.input.ranges.clone().ok_or(CliError::Config {
        source: "no starting ranges provided; use --ranges or the config file".to_string(),
    })?;

    let histogram: RawHistogram = load_json(&histogram_path)?;
    let seed_ranges: Vec<MassRange> = load_json(&ranges_path)?;
    info!(
        bins = histogram.counts.len(),
        ranges = seed_ranges.len(),
        "loaded inputs"
    );

    let input = AnalysisInput {
        histogram,
        seed_ranges,
        params: config.params.clone(),
    };
    let out = run_pass(&input)?;

    info!(
        coarsen_factor = out.summary.coarsen_factor,
        mrp = out.summary.max_peak_mrp,
        discovered = out.discovered.len(),
        "ranging finished"
    );
    for note in &out.tail_notes {
        info!(?note, "tail estimation");
    }

    print_composition("Ionic composition", &out.ionic);
    print_composition("Decomposed composition", &out.decomposed);

    let multihit: Option<MultiHitModel> = match config.input.events {
        Some(ref path) => {
            let chunks: Vec<EventChunk> = load_json(path)?;
            info!(chunks = chunks.len(), "running multi-hit analysis");
            let mut source = ProgressSource::new(chunks);
            let model = analyze(
                &mut source,
                &out.ranges,
                &config.params,
                out.coarse.bin_width,
            )?;
            println!("\n{}", model.summary_text());
            Some(model)
        }
        None => None,
    };

    if let Some(ref output) = config.output {
        let sheets = export_sheets(
            &config.params,
            &out.summary,
            &out.coarse,
            &out.ranges,
            &out.ionic,
            &out.decomposed,
            multihit.as_ref(),
        );
        write_sheets(&sheets, &output.directory)?;

        // The revised range set is a full replacement for the input set.
        let ranges_out = output.directory.join("ranges_out.json");
        let file = File::create(&ranges_out).map_err(|e| CliError::Io {
            source: e.to_string(),
            path: Some(ranges_out.to_string_lossy().to_string()),
        })?;
        serde_json::to_writer_pretty(file, &out.ranges)?;
        info!("wrote {}", ranges_out.display());
    }

    Ok(())
}
