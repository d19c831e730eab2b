#![forbid(unsafe_code)]

use clap::{Args, Parser, Subcommand};
use dv_core::{Filter, FilterField, ScanDirection, SortColumn, WindowRequest};
use dv_engine::EngineConfig;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "diffview",
    version,
    about = "Stream directory change records into a local store and page through them"
)]
pub(crate) struct Cli {
    #[command(flatten)]
    pub(crate) global: GlobalArgs,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Args, Debug, Default)]
pub(crate) struct GlobalArgs {
    /// YAML config file; environment and flags override it.
    #[arg(long, global = true)]
    pub(crate) config: Option<PathBuf>,
    #[arg(long, global = true)]
    pub(crate) storage_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    pub(crate) dataset: Option<String>,
    #[arg(long, global = true)]
    pub(crate) batch_size: Option<usize>,
    #[arg(long, global = true)]
    pub(crate) chunk_capacity: Option<usize>,
    /// Array field holding records when the payload root is an object.
    #[arg(long, global = true)]
    pub(crate) records_field: Option<String>,
    #[arg(long, global = true)]
    pub(crate) generator_url: Option<String>,
}

impl GlobalArgs {
    pub(crate) fn apply(&self, config: &mut EngineConfig) {
        if let Some(dir) = &self.storage_dir {
            config.storage_dir = dir.clone();
        }
        if let Some(dataset) = &self.dataset {
            config.dataset = dataset.clone();
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(chunk_capacity) = self.chunk_capacity {
            config.chunk_capacity = chunk_capacity;
        }
        if let Some(field) = &self.records_field {
            config.records_field = field.clone();
        }
        if let Some(url) = &self.generator_url {
            config.generator_url = url.clone();
        }
    }
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Ask the generator to prepare a new payload.
    Generate {
        #[arg(long, default_value_t = 1000)]
        count: u64,
    },
    /// Replace the dataset with a payload from a URL, a file or stdin.
    Ingest(IngestArgs),
    /// Print one or more windows as JSON lines.
    Query(QueryArgs),
    /// Print one record with its attributes.
    Show { name: String },
    /// Print dataset totals and per-value counts.
    Stats,
}

#[derive(Args, Debug)]
pub(crate) struct IngestArgs {
    /// Payload URL; defaults to the generator URL.
    #[arg(long, conflicts_with = "file")]
    pub(crate) url: Option<String>,
    /// Payload file, `-` for stdin.
    #[arg(long)]
    pub(crate) file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub(crate) struct QueryArgs {
    #[arg(long, default_value = "name", value_parser = parse_sort)]
    pub(crate) sort_by: SortColumn,
    #[arg(long, default_value = "forward", value_parser = parse_direction)]
    pub(crate) direction: ScanDirection,
    #[arg(long, default_value_t = dv_core::DEFAULT_WINDOW_LIMIT)]
    pub(crate) limit: usize,
    /// `object_type=<value>` or `change_type=<value>`.
    #[arg(long, value_parser = parse_filter)]
    pub(crate) filter: Option<Filter>,
    /// JSON window request file (`-` for stdin); replaces the flags above.
    #[arg(long)]
    pub(crate) request: Option<PathBuf>,
    /// Number of consecutive windows to print.
    #[arg(long, default_value_t = 1)]
    pub(crate) pages: usize,
    /// Continue in the opposite direction after the first window.
    #[arg(long)]
    pub(crate) invert: bool,
    /// Serve windows from the in-memory projection.
    #[arg(long)]
    pub(crate) projected: bool,
}

impl QueryArgs {
    pub(crate) fn to_request(&self) -> WindowRequest {
        WindowRequest {
            sort_by: self.sort_by,
            direction: self.direction,
            limit: self.limit,
            filter: self.filter.clone(),
            previous_window: None,
            invert: false,
        }
    }
}

fn parse_sort(value: &str) -> Result<SortColumn, String> {
    SortColumn::parse(value)
        .ok_or_else(|| format!("unknown sort column `{value}` (name|object_type|change_type)"))
}

fn parse_direction(value: &str) -> Result<ScanDirection, String> {
    ScanDirection::parse(value)
        .ok_or_else(|| format!("unknown direction `{value}` (forward|backward)"))
}

pub(crate) fn parse_filter(value: &str) -> Result<Filter, String> {
    let Some((field, expected)) = value.split_once('=') else {
        return Err("filter must look like field=value".to_string());
    };
    let field = FilterField::parse(field)
        .ok_or_else(|| format!("cannot filter on `{field}` (object_type|change_type)"))?;
    Ok(Filter::new(field, expected))
}
