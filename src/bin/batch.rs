use colored::Colorize;
use dnscrawler::crawler::conf::Conf;
use dnscrawler::crawler::{CrawlOpts, Crawler};
use dnscrawler::engine::{load_tld_nameserver_ips, QueryEngine};
use dnscrawler::shared::log::{apply_level, init_log};
use dnscrawler::shared::thread_pool::ThreadPool;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::{env, fs, process, time};

// The graph-store schema shipped with the crawler, copied next to every
// batch output so the compiled graph can be loaded as-is.
const SCHEMA: &str = include_str!("../../data/schema.txt");

const SUMMARIES_DIR: &str = "summaries";
const GRAPHS_DIR: &str = "graphs";

fn main() {
    init_log();

    let args: Vec<String> = env::args().collect();
    if args.len() != 4 {
        print_usage();
        process::exit(1);
    }
    let conf = match Conf::from_file(&args[1]) {
        Ok(conf) => {
            apply_level(conf.log_level);
            log::info!("Parsed configuration: {:?}.", conf);
            conf
        }
        Err(err) => {
            log::error!("Parsing configuration file: {}", err);
            process::exit(1);
        }
    };
    let source_file = &args[2];
    let target_dir = PathBuf::from(&args[3]);

    let hostnames: Vec<String> = match fs::read_to_string(source_file) {
        Ok(content) => content
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect(),
        Err(err) => {
            log::error!("Reading hostname list '{}': {}", source_file, err);
            process::exit(1);
        }
    };
    log::info!("Crawling {} hostnames from '{}'.", hostnames.len(), source_file);

    for dir in [target_dir.clone(), target_dir.join(SUMMARIES_DIR), target_dir.join(GRAPHS_DIR)] {
        if let Err(err) = fs::create_dir_all(&dir) {
            log::error!("Creating directory '{}': {}", dir.display(), err);
            process::exit(1);
        }
    }
    if let Err(err) = fs::write(target_dir.join("schema.txt"), SCHEMA) {
        log::error!("Copying schema: {}", err);
        process::exit(1);
    }

    // One engine and one version stamp are shared by every crawl of the
    // batch.
    let tld_nameserver_ips = match &conf.engine.tld_nameserver_ips_file {
        None => HashSet::new(),
        Some(path) => match load_tld_nameserver_ips(path) {
            Ok(ips) => ips,
            Err(err) => {
                log::warn!("Loading tld nameserver addresses from '{}': {}.", path, err);
                HashSet::new()
            }
        },
    };
    let engine = Arc::new(QueryEngine::new(conf.engine.to_params(), tld_nameserver_ips));
    let version = chrono::Utc::now().to_rfc3339();
    let graph_format = conf.batch.graph_format.clone();

    let start_time = time::Instant::now();
    let pool = ThreadPool::new(conf.batch.crawl_threads, "crawl");
    let (done_tx, done_rx) = mpsc::channel::<String>();
    let mut scheduled = 0_usize;

    for hostname in &hostnames {
        let summary_path = target_dir.join(SUMMARIES_DIR).join(format!("{}.json", hostname));
        if summary_path.exists() {
            log::info!("File found, skipping: {}", hostname);
            continue;
        }
        let graph_path = target_dir
            .join(GRAPHS_DIR)
            .join(format!("{}.{}", hostname, graph_format));

        let engine = Arc::clone(&engine);
        let hostname = hostname.clone();
        let version = version.clone();
        let graph_format = graph_format.clone();
        let done_tx = done_tx.clone();
        scheduled += 1;
        pool.execute(move || {
            crawl_hostname(&engine, &hostname, &version, &graph_format, &summary_path, &graph_path);
            done_tx.send(hostname).unwrap();
        });
    }
    drop(done_tx);

    for (finished, hostname) in done_rx.iter().enumerate() {
        log::info!("Finished: {} ({}/{})", hostname, finished + 1, scheduled);
    }
    let crawl_duration = start_time.elapsed();
    log::info!("All crawls finished in {:.1}s.", crawl_duration.as_secs_f64());

    compile_summaries(&target_dir);
    compile_graphs(&target_dir, &graph_format);
    report_missing(&target_dir, &hostnames);

    match serde_json::to_string_pretty(&engine.stats()) {
        Ok(stats) => log::info!("Engine statistics:\n{}", stats),
        Err(err) => log::error!("Serializing engine statistics: {}", err),
    }
    engine.shutdown();
}

// Crawl one hostname and write its summary and graph files. Batch inputs
// are nameserver lists, so every target is crawled as a nameserver.
fn crawl_hostname(
    engine: &Arc<QueryEngine>,
    hostname: &str,
    version: &str,
    graph_format: &str,
    summary_path: &Path,
    graph_path: &Path,
) {
    log::info!("Starting: {}", hostname);
    let crawler = Crawler::new(engine);
    let opts = CrawlOpts {
        is_ns: true,
        db_json: graph_format == "json",
        db_rdf: graph_format == "rdf",
        version: Some(version.to_string()),
    };
    let dependencies = crawler.get_host_dependencies(hostname, &opts);

    if let Err(err) = fs::write(summary_path, dependencies.summary.to_string()) {
        log::error!("Writing summary of '{}': {}", hostname, err);
        return;
    }
    let graph_content = match graph_format {
        "json" => dependencies.graph_json.expect("graph json was requested").to_string(),
        _ => dependencies.graph_rdf.expect("graph rdf was requested"),
    };
    if let Err(err) = fs::write(graph_path, graph_content) {
        log::error!("Writing graph of '{}': {}", hostname, err);
    }
}

// Concatenate every per-host summary into one jsonl file.
fn compile_summaries(target_dir: &Path) {
    log::info!("Compiling summaries into jsonl file.");
    let mut outfile = match fs::File::create(target_dir.join("summaries.jsonl")) {
        Ok(file) => file,
        Err(err) => {
            log::error!("Creating summaries.jsonl: {}", err);
            return;
        }
    };
    for path in sorted_files(&target_dir.join(SUMMARIES_DIR)) {
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                log::error!("Reading '{}': {}", path.display(), err);
                continue;
            }
        };
        let written = outfile
            .write_all(content.trim_end().as_bytes())
            .and_then(|_| outfile.write_all(b"\n"));
        if let Err(err) = written {
            log::error!("Writing summaries.jsonl: {}", err);
            return;
        }
    }
}

// Concatenate every per-host graph into one gzip-compressed file: plain
// line concatenation for rdf, a single array (outer brackets of each
// file stripped) for json.
fn compile_graphs(target_dir: &Path, graph_format: &str) {
    log::info!("Compiling graphs into gzipped {} file.", graph_format);
    let out_path = target_dir.join(format!("graph.{}.gz", graph_format));
    let outfile = match fs::File::create(&out_path) {
        Ok(file) => file,
        Err(err) => {
            log::error!("Creating '{}': {}", out_path.display(), err);
            return;
        }
    };
    let mut encoder = GzEncoder::new(outfile, Compression::default());

    let result = (|| -> std::io::Result<()> {
        if graph_format == "json" {
            encoder.write_all(b"[\n")?;
        }
        for (index, path) in sorted_files(&target_dir.join(GRAPHS_DIR)).into_iter().enumerate() {
            let content = fs::read_to_string(&path)?;
            let mut content = content.trim();
            if graph_format == "json" {
                content = content
                    .strip_prefix('[')
                    .and_then(|c| c.strip_suffix(']'))
                    .unwrap_or(content)
                    .trim();
            }
            if index > 0 {
                encoder.write_all(if graph_format == "json" { b",\n" } else { b"\n" })?;
            }
            encoder.write_all(content.as_bytes())?;
        }
        if graph_format == "json" {
            encoder.write_all(b"\n]")?;
        }
        encoder.write_all(b"\n")?;
        encoder.finish()?;
        Ok(())
    })();
    if let Err(err) = result {
        log::error!("Writing '{}': {}", out_path.display(), err);
    }
}

// Make sure every hostname of the batch produced a summary file.
fn report_missing(target_dir: &Path, hostnames: &[String]) {
    let mut missing = vec![];
    for hostname in hostnames {
        let path = target_dir.join(SUMMARIES_DIR).join(format!("{}.json", hostname));
        if !path.exists() {
            missing.push(hostname.clone());
        }
    }
    if missing.is_empty() {
        log::info!("No missing hostnames.");
    } else {
        log::warn!("Missing hostnames: {:?}", missing);
    }
}

fn sorted_files(dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            log::error!("Reading directory '{}': {}", dir.display(), err);
            return vec![];
        }
    };
    let mut paths: Vec<PathBuf> = entries.filter_map(|entry| entry.ok()).map(|entry| entry.path()).collect();
    paths.sort();
    paths
}

fn print_usage() {
    log::error!(
        "Expected a configuration file, a hostname list and a target directory.
Usage: {} {} {} {}",
        "path/to/batch/binary".bold(),
        "path/to/config/file".bold().bright_green(),
        "path/to/hostname/list".bold().bright_green(),
        "path/to/target/dir".bold().bright_green()
    )
}
