pub mod align;
pub mod cache;
pub mod cli;
pub mod condition;
pub mod config;
pub mod error;
pub mod export;
pub mod ids;
pub mod io_utils;
pub mod results;
pub mod source;
pub mod table;
pub mod workspace;

use std::{env, fs, path::Path, sync::OnceLock};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use itertools::Itertools;
use log::{LevelFilter, debug, info};

use crate::{
    cli::{Cli, Commands, PairArgs},
    condition::{Condition, load_conditions},
    config::EngineConfig,
    ids::SourceId,
    table::{Cell, print_table},
    workspace::{DiffRequest, Workspace},
};

pub use crate::{
    condition::{DiffMode, Operator},
    error::{EngineError, EngineResult},
    table::Table,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("sheetdiff", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => {
            EngineConfig::load(path).with_context(|| format!("Loading config from {path:?}"))?
        }
        None => EngineConfig::default(),
    };
    let workspace = Workspace::new(config)?;
    match cli.command {
        Commands::Preview(args) => handle_preview(&workspace, &args),
        Commands::Stats(args) => handle_stats(&workspace, &args),
        Commands::Diff(args) => handle_diff(&workspace, &args),
    }
}

fn upload_file(workspace: &Workspace, path: &Path) -> Result<(SourceId, Vec<String>)> {
    let bytes = fs::read(path).with_context(|| format!("Reading {path:?}"))?;
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("Input path {path:?} has no file name"))?;
    let summary = workspace
        .upload(bytes, filename)
        .with_context(|| format!("Loading {path:?}"))?;
    Ok((summary.source_id, summary.sheet_names))
}

fn pick_sheet(path: &Path, sheet_names: &[String], requested: Option<&str>) -> Result<String> {
    match requested {
        Some(sheet) if sheet_names.iter().any(|name| name == sheet) => Ok(sheet.to_string()),
        Some(sheet) => Err(anyhow!(
            "Sheet '{sheet}' not found in {path:?} (available: {})",
            sheet_names.iter().join(", ")
        )),
        None => sheet_names
            .first()
            .cloned()
            .ok_or_else(|| anyhow!("{path:?} contains no sheets")),
    }
}

fn handle_preview(workspace: &Workspace, args: &cli::PreviewArgs) -> Result<()> {
    let (source_id, sheet_names) = upload_file(workspace, &args.input)?;
    info!(
        "'{}' holds {} sheet(s): {}",
        args.input.display(),
        sheet_names.len(),
        sheet_names.iter().join(", ")
    );
    let selected = match args.sheet.as_deref() {
        Some(sheet) => vec![pick_sheet(&args.input, &sheet_names, Some(sheet))?],
        None => sheet_names,
    };
    let limit = args.rows.unwrap_or(workspace.config().upload_preview_rows);
    for sheet in &selected {
        let table = workspace.table(source_id, sheet)?;
        let preview = table.preview(limit);
        println!(
            "== {sheet} ({} row(s), {} column(s)) ==",
            table.row_count(),
            table.column_count()
        );
        print_table(&preview.headers, &preview.rows);
    }
    Ok(())
}

fn collect_conditions(pair: &PairArgs) -> Result<Vec<Condition>> {
    let mut conditions = match &pair.conditions_file {
        Some(path) => load_conditions(path)?,
        None => Vec::new(),
    };
    conditions.extend(pair.conditions.iter().cloned());
    if conditions.is_empty() {
        return Err(anyhow!(
            "At least one condition is required (use -c or --conditions)"
        ));
    }
    debug!(
        "Conditions: {}",
        conditions.iter().map(Condition::to_string).join("; ")
    );
    Ok(conditions)
}

fn build_request(workspace: &Workspace, pair: &PairArgs, mode: DiffMode) -> Result<DiffRequest> {
    let conditions = collect_conditions(pair)?;
    let (source_id_a, sheets_a) = upload_file(workspace, &pair.source_a)?;
    let (source_id_b, sheets_b) = upload_file(workspace, &pair.source_b)?;
    Ok(DiffRequest {
        source_id_a,
        sheet_a: pick_sheet(&pair.source_a, &sheets_a, pair.sheet_a.as_deref())?,
        source_id_b,
        sheet_b: pick_sheet(&pair.source_b, &sheets_b, pair.sheet_b.as_deref())?,
        conditions,
        mode,
    })
}

fn handle_stats(workspace: &Workspace, args: &cli::StatsArgs) -> Result<()> {
    let request = build_request(workspace, &args.pair, DiffMode::default())?;
    let stats = workspace.diff_stats(&request)?;
    let headers = vec!["step".to_string(), "condition".to_string(), "rows".to_string()];
    let rows = request
        .conditions
        .iter()
        .zip(&stats.steps)
        .enumerate()
        .map(|(idx, (condition, count))| {
            vec![
                Cell::Text((idx + 1).to_string()),
                Cell::Text(condition.to_string()),
                Cell::Text(count.to_string()),
            ]
        })
        .collect::<Vec<_>>();
    print_table(&headers, &rows);
    println!("Total: {}", stats.total);
    info!(
        "Computed statistics for {} condition(s); {} row(s) remain",
        request.conditions.len(),
        stats.total
    );
    Ok(())
}

fn handle_diff(workspace: &Workspace, args: &cli::DiffArgs) -> Result<()> {
    let request = build_request(workspace, &args.pair, args.mode.into())?;
    let summary = workspace.run_diff(&request)?;
    info!(
        "Diff ({}) produced {} row(s) as result {}",
        request.mode, summary.total_rows, summary.result_id
    );

    let to_stdout = args.output.as_deref().is_some_and(io_utils::is_dash);
    if !to_stdout {
        let page = workspace.get_page(summary.result_id, args.page, args.page_size)?;
        print_table(&page.headers, &page.rows);
        println!(
            "Page {} ({} of {} row(s))",
            args.page,
            page.rows.len(),
            page.total
        );
    }

    if let Some(output) = &args.output {
        write_result(workspace, summary.result_id, output, args)?;
    }
    Ok(())
}

fn write_result(
    workspace: &Workspace,
    result_id: ids::ResultId,
    output: &Path,
    args: &cli::DiffArgs,
) -> Result<()> {
    let is_xlsx = output
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("xlsx"));
    if is_xlsx {
        let bytes = workspace.export(result_id)?;
        fs::write(output, &bytes).with_context(|| format!("Writing workbook to {output:?}"))?;
        info!("Exported {} byte(s) of xlsx to {output:?}", bytes.len());
        return Ok(());
    }

    let table = workspace.result_table(result_id)?;
    let delimiter = io_utils::resolve_output_delimiter(
        Some(output),
        args.delimiter,
        io_utils::DEFAULT_CSV_DELIMITER,
    );
    let encoding = io_utils::resolve_encoding(args.output_encoding.as_deref())?;
    export::write_delimited(&table, output, delimiter, encoding)
        .with_context(|| format!("Writing result to {output:?}"))?;
    if !io_utils::is_dash(output) {
        info!(
            "Exported {} row(s) to {output:?} using delimiter '{}'",
            table.row_count(),
            printable_delimiter(delimiter)
        );
    }
    Ok(())
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
