use colored::Colorize;
use dnscrawler::crawler::conf::Conf;
use dnscrawler::crawler::{CrawlOpts, Crawler};
use dnscrawler::engine::{load_tld_nameserver_ips, QueryEngine};
use dnscrawler::shared::log::{apply_level, init_log};
use std::collections::HashSet;
use std::sync::Arc;
use std::{env, process};

fn main() {
    init_log();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        print_usage();
        process::exit(1);
    }
    let conf_path = &args[1];
    let hostname = &args[2];
    let mut opts = CrawlOpts::default();
    for flag in &args[3..] {
        match flag.as_str() {
            "--is-ns" => opts.is_ns = true,
            "--graph-json" => opts.db_json = true,
            "--graph-rdf" => opts.db_rdf = true,
            flag => {
                log::error!("Unknown flag: '{}'.", flag);
                print_usage();
                process::exit(1);
            }
        }
    }

    let conf = match Conf::from_file(conf_path) {
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

    // Instantiate the query engine collecting all necessary configuration
    // values, including the list of high-volume tld nameserver addresses.
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
    let crawler = Crawler::new(&engine);

    let dependencies = crawler.get_host_dependencies(hostname, &opts);
    println!("{}", dependencies.summary);
    if let Some(graph_json) = dependencies.graph_json {
        println!("{}", graph_json);
    }
    if let Some(graph_rdf) = dependencies.graph_rdf {
        println!("{}", graph_rdf);
    }

    match serde_json::to_string_pretty(&engine.stats()) {
        Ok(stats) => log::info!("Engine statistics:\n{}", stats),
        Err(err) => log::error!("Serializing engine statistics: {}", err),
    }
    engine.shutdown();
}

fn print_usage() {
    log::error!(
        "Expected a configuration file, a hostname and optional flags.
Usage: {} {} {} [--is-ns] [--graph-json] [--graph-rdf]",
        "path/to/crawler/binary".bold(),
        "path/to/config/file".bold().bright_green(),
        "hostname".bold().bright_green()
    )
}
