use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use bio::io::{fasta, fastq};
use clap::Parser;
use flate2::read::MultiGzDecoder;
use log::info;
use serde::Serialize;

use debruijn_prune::{DanglingLinkPurger, GraphBuilder};

/// de Bruijn graph dangling-link purger CLI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// FASTQ/FASTA file of reads (optionally gzipped; plain text lines also accepted)
    reads: String,

    /// k-mer length for graph construction
    #[arg(long, short = 'k', default_value_t = 19)]
    kmer_len: usize,

    /// Minimum coverage for a tip node to survive erosion (omit to disable erosion)
    #[arg(long)]
    erode_threshold: Option<u32>,

    /// Maximum dangling-link length to purge (0 = iterate over the lengths
    /// observed during the erosion statistics pass)
    #[arg(long, default_value_t = 0)]
    dangling_threshold: usize,

    /// Number of worker threads (default: max available - 1)
    #[arg(long, default_value_t = num_cpus::get().saturating_sub(1).max(1))]
    max_workers: usize,

    /// Optional JSON output file for the purge summary
    #[arg(long)]
    summary_json: Option<String>,

    /// Verbose/info output (default: quiet)
    #[arg(long, short = 'v', alias = "info")]
    verbose: bool,

    /// Debug output
    #[arg(long)]
    debug: bool,

    /// Trace output
    #[arg(long)]
    trace: bool,
}

#[derive(Debug, Serialize)]
struct PurgeSummary {
    reads: usize,
    kmer_len: usize,
    nodes_built: usize,
    nodes_eroded: usize,
    dangling_lengths: Vec<usize>,
    purged_links: usize,
    purged_nodes: usize,
    nodes_remaining: usize,
}

fn main() {
    let args = Args::parse();
    let log_level = if args.trace {
        "trace"
    } else if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "error"
    };
    std::env::set_var("RUST_LOG", log_level);
    env_logger::init();

    info!("debruijn-prune");
    info!("reads: {}", args.reads);

    if let Err(error) = run_pipeline(&args) {
        eprintln!("Purge failed: {error:?}");
        std::process::exit(1);
    }
}

fn run_pipeline(args: &Args) -> Result<()> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(args.max_workers)
        .build_global()
        .context("Failed to initialise worker pool")?;

    let sequences = read_sequences(Path::new(&args.reads))?;
    info!("loaded {} reads", sequences.len());

    let builder = GraphBuilder::new(args.kmer_len).context("Invalid k-mer length")?;
    let graph = builder.build(&sequences);
    let nodes_built = graph.live_node_count();

    let mut purger = DanglingLinkPurger::new(args.dangling_threshold, args.erode_threshold);
    let lengths = purger.erode_graph_ends(&graph);
    let nodes_eroded = nodes_built - graph.live_node_count();

    // With no explicit threshold, purge shortest links first the way the
    // original assembler iterates its undangle step: removing short links can
    // expose longer ones at the next length.
    let purge_lengths: Vec<usize> = if args.dangling_threshold > 0 {
        vec![args.dangling_threshold]
    } else {
        lengths.iter().copied().collect()
    };

    let mut purged_links = 0usize;
    let mut purged_nodes = 0usize;
    for length in purge_lengths {
        purger.set_length_threshold(length);
        let paths = purger.detect_erroneous_nodes(&graph);
        if paths.is_empty() {
            continue;
        }
        purged_links += paths.len();
        purged_nodes += paths.node_count();
        purger.remove_erroneous_nodes(&graph, &paths);
    }

    let summary = PurgeSummary {
        reads: sequences.len(),
        kmer_len: args.kmer_len,
        nodes_built,
        nodes_eroded,
        dangling_lengths: lengths.into_iter().collect(),
        purged_links,
        purged_nodes,
        nodes_remaining: graph.live_node_count(),
    };

    println!(
        "built {} nodes, eroded {}, purged {} dangling links ({} nodes), {} nodes remain",
        summary.nodes_built,
        summary.nodes_eroded,
        summary.purged_links,
        summary.purged_nodes,
        summary.nodes_remaining
    );

    if let Some(path) = &args.summary_json {
        let json = serde_json::to_string_pretty(&summary)
            .context("Failed to serialise purge summary")?;
        let mut file = File::create(path)
            .with_context(|| format!("Failed to create summary file {path}"))?;
        file.write_all(json.as_bytes())
            .with_context(|| format!("Failed to write summary file {path}"))?;
        info!("wrote summary to {path}");
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SequenceFormat {
    Fastq,
    Fasta,
    Lines,
}

fn is_gzip(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz") || ext.eq_ignore_ascii_case("bgz"))
        .unwrap_or(false)
}

fn infer_format(path: &Path) -> SequenceFormat {
    let mut ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_default();

    if ext == "gz" || ext == "bgz" {
        if let Some(stem) = path.file_stem() {
            ext = Path::new(stem)
                .extension()
                .and_then(|e| e.to_str())
                .map(|s| s.to_ascii_lowercase())
                .unwrap_or_default();
        }
    }

    match ext.as_str() {
        "fastq" | "fq" => SequenceFormat::Fastq,
        "fasta" | "fa" | "fna" => SequenceFormat::Fasta,
        _ => SequenceFormat::Lines,
    }
}

fn open_reader(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    if is_gzip(path) {
        let decoder = MultiGzDecoder::new(file);
        Ok(Box::new(BufReader::new(decoder)))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

fn uppercase_sequence(bytes: &[u8]) -> Result<String> {
    let upper = bytes
        .iter()
        .map(|b| b.to_ascii_uppercase())
        .collect::<Vec<u8>>();
    String::from_utf8(upper).map_err(|_| anyhow!("Encountered non-UTF-8 symbols in sequence data"))
}

fn read_sequences(path: &Path) -> Result<Vec<String>> {
    let format = infer_format(path);
    let reader = open_reader(path)?;

    match format {
        SequenceFormat::Fastq => {
            let mut sequences = Vec::new();
            for record in fastq::Reader::new(reader).records() {
                let record = record.with_context(|| {
                    format!("Error reading FASTQ record from {}", path.display())
                })?;
                sequences.push(uppercase_sequence(record.seq())?);
            }
            Ok(sequences)
        }
        SequenceFormat::Fasta => {
            let mut sequences = Vec::new();
            for record in fasta::Reader::new(reader).records() {
                let record = record.with_context(|| {
                    format!("Error reading FASTA record from {}", path.display())
                })?;
                sequences.push(uppercase_sequence(record.seq())?);
            }
            Ok(sequences)
        }
        SequenceFormat::Lines => {
            let mut sequences = Vec::new();
            for line in reader.lines() {
                let line = line
                    .with_context(|| format!("Error reading line from {}", path.display()))?;
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    sequences.push(trimmed.to_ascii_uppercase());
                }
            }
            Ok(sequences)
        }
    }
}
