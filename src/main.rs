use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use lineage_scope::config::ViewerConfig;
use lineage_scope::genealogy::{GenealogyBuilder, GenealogyModel};
use lineage_scope::metrics::AggregateCalculator;
use lineage_scope::segmentation::{
    DirSegmentationSource, HttpSegmentationSource, SegmentationSource, SegmentationStore,
};
use lineage_scope::snippet::{
    BoundingBox, Raster, RawDirRasterSource, SegmentationFetchCoordinator, Selection, SelectionKey, SnippetCache,
    snippet_of_buffer,
};
use lineage_scope::table::TableReader;
use lineage_scope::viewer::App;

#[derive(Parser)]
#[command(
    name = "lineage-scope",
    about = "Cell lineage explorer: builds family trees from tracking tables and crops per-cell snippets",
    version
)]
struct Cli {
    /// JSON settings file (header names, cache size, segmentation location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `lineage_scope=trace`. Overrides RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print one line per lineage
    Summary {
        /// Cell table (CSV)
        csv: PathBuf,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print the track tree of a lineage
    Tree {
        csv: PathBuf,

        /// Lineage (founder track id); defaults to the first one
        #[arg(short, long)]
        lineage: Option<String>,

        /// Generations below the founder to show
        #[arg(short = 'd', long)]
        max_depth: Option<usize>,
    },

    /// List frames, or the cells of one frame
    Frames {
        csv: PathBuf,

        #[arg(short, long)]
        frame: Option<i64>,
    },

    /// Print an attribute series per track of a lineage
    Series {
        csv: PathBuf,

        #[arg(short, long)]
        lineage: String,

        /// Numeric attribute to plot
        #[arg(short, long, default_value = "mass")]
        attribute: String,

        /// Track whose relatives stay highlighted
        #[arg(short, long)]
        selected: Option<String>,

        #[arg(short = 'd', long)]
        max_depth: Option<usize>,
    },

    /// Open the interactive viewer
    View {
        csv: PathBuf,

        #[arg(short = 'd', long)]
        max_depth: Option<usize>,
    },

    /// Crop a box out of a raw little-endian u16 raster file
    Crop {
        raster: PathBuf,

        #[arg(long)]
        width: usize,

        #[arg(long)]
        height: usize,

        /// Box as `left,bottom,right,top`
        #[arg(short, long, allow_hyphen_values = true)]
        bbox: BoundingBox,
    },

    /// Crop a square around every cell of a frame from a directory of raw planes
    Snippets {
        csv: PathBuf,

        /// Directory holding `c{channel}-t{time}-z{z}.raw` planes
        #[arg(long)]
        planes: PathBuf,

        #[arg(long)]
        width: usize,

        #[arg(long)]
        height: usize,

        #[arg(short, long)]
        frame: i64,

        #[arg(long, default_value = "0")]
        channel: u32,

        #[arg(long, default_value = "0")]
        z: u32,

        /// Side length of each snippet in pixels
        #[arg(long, default_value = "32", value_parser = clap::value_parser!(u32).range(1..))]
        size: u32,
    },

    /// Fetch the segmentation outlines of a frame
    Segment {
        csv: PathBuf,

        #[arg(short, long)]
        frame: i64,

        /// URL or directory of `{frame}-{trackId}.json` files; overrides the config
        #[arg(long)]
        segmentations: Option<String>,
    },
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(l) => EnvFilter::new(l),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn load_model(csv: &Path, config: &ViewerConfig) -> Result<GenealogyModel> {
    let table = TableReader::read_csv(csv)?;
    info!(rows = table.len(), columns = table.columns.len(), "loaded table");

    GenealogyBuilder::new()
        .with_no_parent_sentinel(config.no_parent_sentinel.as_str())
        .init(&table.rows, &table.columns, &config.headers)
        .with_context(|| format!("failed to build genealogy from {}", csv.display()))
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

fn print_snippet(pixels: &[u16], width: usize) {
    for row in pixels.chunks(width.max(1)) {
        let line: Vec<String> = row.iter().map(|v| format!("{v:>5}")).collect();
        println!("{}", line.join(" "));
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());
    let mut config = ViewerConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Summary { csv, json } => {
            let model = load_model(&csv, &config)?;
            let summaries = model.summaries();

            if json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else {
                println!(
                    "{:<12} {:>8} {:>8} {:>12} {:>10} {:>10}",
                    "Lineage", "Tracks", "Cells", "Generations", "Start", "End"
                );
                println!("{}", "-".repeat(65));
                for s in &summaries {
                    let fmt_time = |t: Option<f64>| t.map_or_else(|| "-".to_string(), |t| format!("{t:.1}"));
                    println!(
                        "{:<12} {:>8} {:>8} {:>12} {:>10} {:>10}",
                        s.lineage_id,
                        s.track_count,
                        s.cell_count,
                        s.generations,
                        fmt_time(s.min_time),
                        fmt_time(s.max_time),
                    );
                }
                println!(
                    "\n{} lineages, {} tracks, {} cells",
                    summaries.len(),
                    model.tracks().len(),
                    model.cell_count()
                );
            }
        }

        Commands::Tree {
            csv,
            lineage,
            max_depth,
        } => {
            let model = load_model(&csv, &config)?;
            let lineage_id = match lineage {
                Some(id) => id,
                None => model
                    .lineages()
                    .first()
                    .map(|l| l.lineage_id.clone())
                    .context("dataset has no lineages")?,
            };
            let lineage = model
                .lineage(&lineage_id)
                .with_context(|| format!("no lineage with founder {lineage_id}"))?;

            println!(
                "Lineage {} ({} cells, {} generations)",
                lineage.lineage_id, lineage.cell_count, lineage.generations
            );
            for (track, depth) in model
                .lineage_tracks(&lineage.lineage_id, max_depth.or(config.max_lineage_depth))
                .with_depth()
            {
                let span = match (track.stats.min_time, track.stats.max_time) {
                    (Some(lo), Some(hi)) => format!("{lo}..{hi}"),
                    _ => "-".to_string(),
                };
                println!(
                    "{}{} [{} cells, time {span}{}]",
                    "  ".repeat(depth),
                    track.track_id,
                    track.len(),
                    if track.stats.sorted { "" } else { ", unsorted" },
                );
            }
        }

        Commands::Frames { csv, frame } => {
            let model = load_model(&csv, &config)?;
            match frame {
                Some(f) => {
                    let headers = model.headers();
                    for cell in model.cells_at_frame(f) {
                        let coord = |col: &str| cell.num(col).map_or_else(|| "-".to_string(), |v| format!("{v:.1}"));
                        println!(
                            "{:<10} x={:<8} y={:<8} lineage={}",
                            cell.track_id,
                            coord(&headers.x),
                            coord(&headers.y),
                            model.lineage_id_of(&cell.track_id).unwrap_or("-"),
                        );
                    }
                }
                None => {
                    for &f in model.frame_list() {
                        println!("{f:>6} {:>8} cells", model.cells_at_frame(f).count());
                    }
                }
            }
        }

        Commands::Series {
            csv,
            lineage,
            attribute,
            selected,
            max_depth,
        } => {
            let model = load_model(&csv, &config)?;
            let calc = AggregateCalculator::new()
                .with_attribute(&attribute)
                .with_max_depth(max_depth.or(config.max_lineage_depth));
            let series = calc
                .lineage_series(&model, &lineage, selected.as_deref())
                .with_context(|| format!("no lineage with founder {lineage}"))?;
            println!("{}", serde_json::to_string_pretty(&series)?);
        }

        Commands::View { csv, max_depth } => {
            let model = load_model(&csv, &config)?;
            println!(
                "Loaded {} lineages, {} tracks, {} frames",
                model.lineages().len(),
                model.tracks().len(),
                model.frame_list().len()
            );

            let mut app = App::new(model, max_depth.or(config.max_lineage_depth));
            app.run_tui()?;
        }

        Commands::Crop {
            raster,
            width,
            height,
            bbox,
        } => {
            let bytes = std::fs::read(&raster).with_context(|| format!("failed to read {}", raster.display()))?;
            let raster = Raster::from_le_bytes(&bytes, width, height)?;
            let pixels = snippet_of_buffer(&raster.data, raster.width, raster.height, &bbox);
            println!("{}x{} snippet at {bbox}", bbox.width(), bbox.height());
            print_snippet(&pixels, bbox.width());
        }

        Commands::Snippets {
            csv,
            planes,
            width,
            height,
            frame,
            channel,
            z,
            size,
        } => {
            let model = load_model(&csv, &config)?;
            let headers = model.headers();
            let boxes = model
                .cells_at_frame(frame)
                .filter_map(|c| Some((c.num(&headers.x)?, c.num(&headers.y)?)))
                .map(|(x, y)| BoundingBox::centered(x, y, i64::from(size)))
                .collect::<Result<Vec<_>, _>>()?;
            if boxes.is_empty() {
                anyhow::bail!("no cells with coordinates in frame {frame}");
            }
            let time = u32::try_from(frame).context("frame must be a non-negative 32-bit number")?;

            let cache = Arc::new(SnippetCache::new(config.cache_capacity));
            let source = Arc::new(RawDirRasterSource::new(&planes, width, height));
            let rt = runtime()?;
            let published = rt.block_on(async {
                let coordinator = SegmentationFetchCoordinator::new(cache, source);
                let selection = Selection::new(SelectionKey::new(channel, time, z), boxes);
                coordinator.update(std::slice::from_ref(&selection));
                coordinator.settle().await?;
                anyhow::Ok(coordinator.published())
            })?;

            println!("{} snippets of {size}x{size} at frame {frame}", published.len());
            for snippet in published.iter() {
                let max = snippet.data.pixels.iter().copied().max().unwrap_or(0);
                let mean = snippet.data.pixels.iter().map(|&v| v as f64).sum::<f64>()
                    / snippet.data.pixels.len().max(1) as f64;
                println!("{:<24} max={max:<6} mean={mean:.1}", snippet.key.bbox.to_string());
            }
        }

        Commands::Segment {
            csv,
            frame,
            segmentations,
        } => {
            if segmentations.is_some() {
                config.segmentations_base_url = segmentations;
            }
            let location = config
                .segmentations_base_url
                .clone()
                .context("no segmentation location; pass --segmentations or set segmentations_base_url")?;
            let source: Arc<dyn SegmentationSource> = if config.segmentations_are_remote() {
                Arc::new(HttpSegmentationSource::new(&location)?)
            } else {
                Arc::new(DirSegmentationSource::new(&location))
            };

            let model = load_model(&csv, &config)?;
            let store = SegmentationStore::new(source, config.cache_capacity);
            let rt = runtime()?;
            let features = rt.block_on(store.get_frame_segmentations(&model, frame))?;

            println!("{} outlines in frame {frame}", features.len());
            for feature in &features {
                let track = feature
                    .property("trackId")
                    .map_or_else(|| "?".to_string(), |v| v.to_string());
                match feature.bounds() {
                    Some((x0, y0, x1, y1)) => println!("{track:<10} bounds=({x0:.1},{y0:.1})-({x1:.1},{y1:.1})"),
                    None => println!("{track:<10} no polygon"),
                }
            }
        }
    }

    Ok(())
}
