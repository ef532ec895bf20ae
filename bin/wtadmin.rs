//! Administration tool for wormtable directories
//!
//! ```bash
//! wtadmin show /data/tbl
//! wtadmin add /data/tbl pos_idx chrom pos:1000
//! wtadmin dump /data/tbl chrom pos --index pos_idx --start 1 --start 5000
//! wtadmin hist /data/tbl pos_idx
//! ```

use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use wormtable::{Error, Index, Mode, Result, Table, Value};

#[derive(Parser, Debug)]
#[command(name = "wtadmin", version, about = "Inspect and index wormtable directories")]
struct Args {
    /// Enable debug logging (RUST_LOG overrides)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Page cache size in bytes for each opened B-tree
    #[arg(long, global = true)]
    cache_size: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the columns and row statistics of a table
    Show { homedir: PathBuf },
    /// List the indexes of a table
    Ls { homedir: PathBuf },
    /// Build an index over columns, each given as NAME or NAME:BIN_WIDTH
    Add {
        homedir: PathBuf,
        name: String,
        #[arg(required = true)]
        columns: Vec<String>,
        /// Rows between progress reports
        #[arg(long, default_value_t = 100_000)]
        interval: u64,
    },
    /// Delete an index
    Rm { homedir: PathBuf, name: String },
    /// Print rows tab-separated, optionally in index order
    Dump {
        homedir: PathBuf,
        /// Columns to print (default: all)
        columns: Vec<String>,
        #[arg(long)]
        index: Option<String>,
        /// Lower bound: a row id, or one value per leading index column
        #[arg(long)]
        start: Vec<String>,
        /// Exclusive upper bound, same form as --start
        #[arg(long)]
        stop: Vec<String>,
    },
    /// Print each distinct key of an index with its row count
    Hist { homedir: PathBuf, index: String },
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("wormtable=debug,wtadmin=debug")
        } else {
            EnvFilter::new("warn")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn open_table(homedir: PathBuf, cache_size: Option<usize>) -> Result<Table> {
    let mut table = Table::new(homedir);
    if let Some(bytes) = cache_size {
        table.set_cache_size(bytes)?;
    }
    table.open(Mode::Read)?;
    Ok(table)
}

fn open_index<'t>(table: &'t Table, name: &str, cache_size: Option<usize>) -> Result<Index<'t>> {
    let mut index = Index::new(table, name)?;
    if let Some(bytes) = cache_size {
        index.set_cache_size(bytes)?;
    }
    index.open(Mode::Read)?;
    Ok(index)
}

fn run(args: Args) -> Result<()> {
    let cache_size = args.cache_size;
    match args.command {
        Command::Show { homedir } => show(&open_table(homedir, cache_size)?),
        Command::Ls { homedir } => list(&open_table(homedir, cache_size)?, cache_size),
        Command::Add { homedir, name, columns, interval } => {
            add(&open_table(homedir, cache_size)?, &name, &columns, interval, cache_size)
        }
        Command::Rm { homedir, name } => {
            let table = open_table(homedir, cache_size)?;
            Index::new(&table, &name)?.delete()
        }
        Command::Dump { homedir, columns, index, start, stop } => {
            let table = open_table(homedir, cache_size)?;
            dump(&table, &columns, index.as_deref(), &start, &stop, cache_size)
        }
        Command::Hist { homedir, index } => {
            let table = open_table(homedir, cache_size)?;
            hist(&open_index(&table, &index, cache_size)?)
        }
    }
}

fn show(table: &Table) -> Result<()> {
    let mut out = BufWriter::new(io::stdout().lock());
    writeln!(out, "{:>4}  {:<20} {:<6} {:>4} {:>5}  description", "pos", "name", "type", "size", "n")?;
    for column in table.columns() {
        writeln!(
            out,
            "{:>4}  {:<20} {:<6} {:>4} {:>5}  {}",
            column.position(),
            column.name(),
            column.element_type(),
            column.element_size(),
            column.num_elements().to_string(),
            column.description()
        )?;
    }
    let stats = table.stats();
    let mean = if stats.num_rows == 0 { 0.0 } else { stats.total_row_size as f64 / stats.num_rows as f64 };
    writeln!(out)?;
    writeln!(out, "rows:           {}", stats.num_rows)?;
    writeln!(out, "row size:       min {} / mean {:.1} / max {}", stats.min_row_size, mean, stats.max_row_size)?;
    writeln!(out, "total size:     {}", stats.total_row_size)?;
    out.flush()?;
    Ok(())
}

fn list(table: &Table, cache_size: Option<usize>) -> Result<()> {
    let mut out = BufWriter::new(io::stdout().lock());
    for name in table.index_names()? {
        let index = open_index(table, &name, cache_size)?;
        let columns: Vec<String> = index
            .key_columns()
            .iter()
            .zip(index.bin_widths())
            .map(|(&position, &bin_width)| {
                let name = table.columns()[position].name();
                if bin_width > 0.0 { format!("{}:{}", name, bin_width) } else { name.to_string() }
            })
            .collect();
        writeln!(out, "{}\t{}\t{}", name, index.num_rows(&[])?, columns.join(" "))?;
    }
    out.flush()?;
    Ok(())
}

/// Split `NAME[:BIN_WIDTH]`
fn parse_key_column(arg: &str) -> Result<(&str, f64)> {
    match arg.rsplit_once(':') {
        Some((name, width)) => {
            let width = width
                .parse::<f64>()
                .map_err(|_| Error::Parse(format!("invalid bin width in '{}'", arg)))?;
            Ok((name, width))
        }
        None => Ok((arg, 0.0)),
    }
}

fn add(table: &Table, name: &str, columns: &[String], interval: u64, cache_size: Option<usize>) -> Result<()> {
    let mut index = Index::new(table, name)?;
    if let Some(bytes) = cache_size {
        index.set_cache_size(bytes)?;
    }
    let mut bin_widths = Vec::with_capacity(columns.len());
    for arg in columns {
        let (column, bin_width) = parse_key_column(arg)?;
        index.add_key_column_by_name(column)?;
        bin_widths.push(bin_width);
    }
    index.set_bin_widths(&bin_widths)?;
    index.open(Mode::Write)?;
    let total = table.stats().num_rows.max(1);
    let built = index.build(
        |rows| {
            eprintln!("{}: {} rows ({:.1}%)", name, rows, 100.0 * rows as f64 / total as f64);
            Ok(())
        },
        interval.max(1),
    )?;
    index.close()?;
    info!(index = name, rows = built, "index added");
    println!("{}: indexed {} rows", name, built);
    Ok(())
}

fn column_positions(table: &Table, names: &[String]) -> Result<Vec<usize>> {
    if names.is_empty() {
        return Ok((0..table.columns().len()).collect());
    }
    names.iter().map(|name| table.column_position(name)).collect()
}

fn parse_bound(index: &Index<'_>, texts: &[String]) -> Result<Vec<Value>> {
    let table = index.table();
    texts
        .iter()
        .zip(index.key_columns())
        .map(|(text, &position)| table.columns()[position].parse_encoded(text.as_bytes()))
        .collect()
}

fn parse_row_id(texts: &[String]) -> Result<Option<u64>> {
    match texts {
        [] => Ok(None),
        [text] => text
            .parse::<u64>()
            .map(Some)
            .map_err(|_| Error::Parse(format!("invalid row id '{}'", text))),
        _ => Err(Error::Parse("a table bound is a single row id".to_string())),
    }
}

fn write_row(out: &mut impl Write, values: &[Value]) -> io::Result<()> {
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.write_all(b"\t")?;
        }
        write!(out, "{}", value)?;
    }
    out.write_all(b"\n")
}

fn dump(
    table: &Table,
    columns: &[String],
    index: Option<&str>,
    start: &[String],
    stop: &[String],
    cache_size: Option<usize>,
) -> Result<()> {
    let positions = column_positions(table, columns)?;
    let mut out = BufWriter::new(io::stdout().lock());
    match index {
        Some(name) => {
            let index = open_index(table, name, cache_size)?;
            let mut rows = index.rows(&positions)?;
            if !start.is_empty() {
                rows.set_min(&parse_bound(&index, start)?)?;
            }
            if !stop.is_empty() {
                rows.set_max(&parse_bound(&index, stop)?)?;
            }
            for row in rows {
                write_row(&mut out, &row?)?;
            }
        }
        None => {
            let mut rows = table.rows(&positions)?;
            if let Some(min) = parse_row_id(start)? {
                rows.set_min(min)?;
            }
            if let Some(max) = parse_row_id(stop)? {
                rows.set_max(max)?;
            }
            for row in rows {
                write_row(&mut out, &row?)?;
            }
        }
    }
    out.flush()?;
    Ok(())
}

fn hist(index: &Index<'_>) -> Result<()> {
    let mut out = BufWriter::new(io::stdout().lock());
    let mut keys = index.keys()?;
    while let Some(key) = keys.next() {
        let key = key?;
        let count = keys.row_count()?;
        for value in &key {
            write!(out, "{}\t", value)?;
        }
        writeln!(out, "{}", count)?;
    }
    out.flush()?;
    Ok(())
}
