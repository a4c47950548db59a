use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::condition::{Condition, DiffMode};

#[derive(Debug, Parser)]
#[command(author, version, about = "Align and diff two tabular files", long_about = None)]
pub struct Cli {
    /// YAML file with engine settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List the sheets of a file and render the first rows of each
    Preview(PreviewArgs),
    /// Count surviving rows after each condition is applied in order
    Stats(StatsArgs),
    /// Align two files on their equality conditions and show or export the result
    Diff(DiffArgs),
}

#[derive(Debug, Args)]
pub struct PreviewArgs {
    /// Input file (csv, tsv, xls, xlsx or json)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Only preview this sheet
    #[arg(long)]
    pub sheet: Option<String>,
    /// Number of rows to display per sheet (defaults to the configured upload preview)
    #[arg(long)]
    pub rows: Option<usize>,
}

#[derive(Debug, Args)]
pub struct PairArgs {
    /// File for source A
    #[arg(short = 'a', long = "source-a")]
    pub source_a: PathBuf,
    /// Sheet of source A (defaults to its first sheet)
    #[arg(long = "sheet-a")]
    pub sheet_a: Option<String>,
    /// File for source B
    #[arg(short = 'b', long = "source-b")]
    pub source_b: PathBuf,
    /// Sheet of source B (defaults to its first sheet)
    #[arg(long = "sheet-b")]
    pub sheet_b: Option<String>,
    /// Conditions such as `id = id`, `amount != total` or `name contains alias`
    #[arg(
        short = 'c',
        long = "condition",
        value_parser = parse_condition,
        action = clap::ArgAction::Append
    )]
    pub conditions: Vec<Condition>,
    /// JSON or YAML file holding a list of conditions, applied before any `-c`
    #[arg(long = "conditions")]
    pub conditions_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct StatsArgs {
    #[command(flatten)]
    pub pair: PairArgs,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum ModeArg {
    #[default]
    Intersection,
    DifferenceA,
    DifferenceB,
}

impl From<ModeArg> for DiffMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Intersection => DiffMode::Intersection,
            ModeArg::DifferenceA => DiffMode::DifferenceA,
            ModeArg::DifferenceB => DiffMode::DifferenceB,
        }
    }
}

#[derive(Debug, Args)]
pub struct DiffArgs {
    #[command(flatten)]
    pub pair: PairArgs,
    /// Which rows to keep (intersection, difference-a, difference-b)
    #[arg(long, value_enum, default_value = "intersection")]
    pub mode: ModeArg,
    /// Page of the result to display
    #[arg(long, default_value_t = 1)]
    pub page: usize,
    /// Rows per displayed page
    #[arg(long = "page-size", default_value_t = 20)]
    pub page_size: usize,
    /// Export the full result (.xlsx, .csv or .tsv; `-` writes csv to stdout)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Delimiter for delimited exports (defaults from the output extension)
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding for delimited exports (defaults to utf-8)
    #[arg(long = "output-encoding")]
    pub output_encoding: Option<String>,
}

fn parse_condition(value: &str) -> Result<Condition, String> {
    Condition::parse(value).map_err(|err| err.to_string())
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
