use clap::Parser;
use serde::Deserialize;
use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use determiniser_core::{
    bag, compute_fractions, derive_schema, DrawSchema, Engine, GlobalConfig, Host, JsonFileStore,
    Value,
};

#[derive(Debug, Parser)]
#[command(name = "determiniser", version, about = "Forces chosen tiles out of a weighted random draw")]
struct Args {
    /// Desired tiles to apply before running, e.g. "retinas" or "qu??"
    #[arg(long)]
    desired: Option<String>,

    /// Clear the persisted desired tiles
    #[arg(long, default_value_t = false)]
    clear: bool,

    /// Seed for the host's real generator; random when omitted
    #[arg(long)]
    seed: Option<u64>,

    /// Rack replenishes to run
    #[arg(long, default_value_t = 1)]
    refills: u32,

    /// Single draws to run after the replenishes
    #[arg(long, default_value_t = 0)]
    draws: u32,

    /// Drive replenishes through the helper entry point instead
    #[arg(long, default_value_t = false)]
    use_helper: bool,

    /// Rack capacity
    #[arg(long, default_value_t = 7)]
    rack_size: usize,

    /// JSON pool description replacing the standard tile set,
    /// e.g. [{"letter":"A","count":9}]
    #[arg(long, value_name = "PATH")]
    custom_bag: Option<PathBuf>,

    /// Settings store file; defaults to the user config directory
    #[arg(long, value_name = "PATH")]
    store: Option<PathBuf>,

    /// Run without reading or writing the settings store
    #[arg(long, default_value_t = false)]
    no_store: bool,

    /// Print the entropy values synthesized for the applied tiles
    #[arg(long, default_value_t = false)]
    show_fractions: bool,

    /// Print the field names recovered from the draw routine as JSON
    #[arg(long, default_value_t = false)]
    show_schema: bool,
}

#[derive(Debug, Deserialize)]
struct BagEntry {
    letter: char,
    count: i64,
}

fn store_path(args: &Args) -> Option<PathBuf> {
    if args.no_store {
        return None;
    }
    if let Some(path) = args.store.clone() {
        return Some(path);
    }
    dirs::config_dir().map(|dir| dir.join("determiniser").join("store.json"))
}

fn tile_letter(tile: &Value) -> char {
    tile.get(bag::VALUE_FIELD)
        .and_then(|v| v.code())
        .and_then(|code| char::from_u32(u32::from(code)))
        .unwrap_or('.')
}

fn draw_schema(host: &Host) -> Option<DrawSchema> {
    host.routine(bag::DRAW_FN)
        .and_then(|r| r.source().and_then(derive_schema))
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let config = match store_path(&args) {
        Some(path) => GlobalConfig::with_store(Box::new(JsonFileStore::new(path))),
        None => GlobalConfig::new(),
    };
    let config = Rc::new(RefCell::new(config));

    if args.clear {
        config.borrow_mut().clear();
        println!("Desired tiles cleared");
    }
    if let Some(text) = args.desired.as_deref() {
        config.borrow_mut().apply(text);
    }
    {
        let cfg = config.borrow();
        if !cfg.text().is_empty() {
            println!("Desired tiles: {}", cfg.text());
        }
    }

    let pool = match args.custom_bag.as_ref() {
        Some(path) => {
            let raw = match fs::read_to_string(path) {
                Ok(raw) => raw,
                Err(e) => {
                    eprintln!("Failed to read {:?}: {}", path, e);
                    std::process::exit(1);
                }
            };
            let entries: Vec<BagEntry> = match serde_json::from_str(&raw) {
                Ok(entries) => entries,
                Err(e) => {
                    eprintln!("Failed to parse {:?}: {}", path, e);
                    std::process::exit(1);
                }
            };
            let pairs: Vec<(char, i64)> = entries
                .iter()
                .map(|e| (e.letter.to_ascii_uppercase(), e.count))
                .collect();
            bag::custom_bag(&pairs)
        }
        None => bag::standard_bag(),
    };

    let host = bag::reference_host(args.seed);

    // Read the draw source before install: the wrapper that replaces the
    // routine carries no source text.
    let schema = draw_schema(&host);

    let engine = Engine::new(Rc::clone(&config), bag::engine_settings());
    if let Err(err) = engine.install(&host) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }

    if args.show_schema {
        match schema.as_ref() {
            Some(s) => match serde_json::to_string_pretty(s) {
                Ok(body) => println!("{body}"),
                Err(e) => {
                    eprintln!("Error: {e}");
                    std::process::exit(1);
                }
            },
            None => println!("No field names recovered from the draw routine"),
        }
    }

    if args.show_fractions {
        let desired = config.borrow().desired().to_vec();
        let fractions = compute_fractions(&pool, &desired, schema.as_ref(), None);
        println!("Synthesized fractions: {fractions:?}");
    }

    for n in 0..args.refills {
        let rack = bag::new_rack(args.rack_size);
        let outcome = if args.use_helper {
            let ctx = Value::object();
            ctx.set("rk", rack.clone());
            host.call(
                bag::HELPER_FN,
                vec![ctx, pool.clone(), Value::str(""), Value::Null],
            )
        } else {
            host.call(bag::REFILL_FN, vec![pool.clone(), rack.clone()])
        };
        if let Err(err) = outcome {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
        println!(
            "Rack {}: {}   (pool: {} tiles left)",
            n + 1,
            bag::rack_letters(&rack),
            bag::bag_total(&pool)
        );
    }

    for _ in 0..args.draws {
        match host.call(bag::DRAW_FN, vec![pool.clone()]) {
            Ok(tile) if tile.is_truthy() => {
                println!(
                    "Drew: {}   (pool: {} tiles left)",
                    tile_letter(&tile),
                    bag::bag_total(&pool)
                );
            }
            Ok(_) => println!("Drew: nothing, the pool is exhausted"),
            Err(err) => {
                eprintln!("Error: {err}");
                std::process::exit(1);
            }
        }
    }
}
