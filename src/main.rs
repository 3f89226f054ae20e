use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use log::info;
use rand::seq::SliceRandom;

use minisql::common::{EngineConfig, DEFAULT_BUFFER_POOL_SIZE};
use minisql::index::{BPlusTree, BasicComparator};
use minisql::storage::StorageEngine;

const DEMO_INDEX_ID: u32 = 0;

/// Builds a B+Tree index on disk, reopens the file and checks what survived.
#[derive(Parser, Debug)]
#[command(name = "minisql", version)]
struct Args {
    /// Database file to create
    #[arg(long, default_value = "minisql-demo.db")]
    db: PathBuf,

    /// Number of buffer pool frames
    #[arg(long, default_value_t = DEFAULT_BUFFER_POOL_SIZE)]
    pool_size: usize,

    /// Number of keys to insert
    #[arg(long, default_value_t = 10_000)]
    keys: i32,

    /// Keep the database file instead of deleting it on exit
    #[arg(long)]
    keep: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    if args.db.exists() {
        std::fs::remove_file(&args.db)?;
    }
    let config = EngineConfig::default().with_pool_size(args.pool_size);

    println!("MiniSQL storage demo");
    println!("====================\n");

    let mut keys: Vec<i32> = (0..args.keys).collect();
    keys.shuffle(&mut rand::thread_rng());
    let (removed, kept) = keys.split_at(keys.len() / 2);

    {
        let engine = StorageEngine::open(&args.db, config.clone())?;
        let mut tree: BPlusTree<i32, i32, _> = engine.open_tree(DEMO_INDEX_ID, BasicComparator)?;

        for &key in &keys {
            tree.insert(key, key * 2)?;
        }
        println!("Inserted {} keys in shuffled order", keys.len());

        for key in removed {
            tree.remove(key)?;
        }
        println!("Removed {} of them", removed.len());

        tree.verify()?;
        println!(
            "Tree is consistent; root at {}, {} pages allocated",
            tree.root_page_id(),
            engine.disk_manager().num_allocated_pages()
        );
        engine.close()?;
    }

    {
        let engine = StorageEngine::open(&args.db, config)?;
        let tree: BPlusTree<i32, i32, _> = engine.open_tree(DEMO_INDEX_ID, BasicComparator)?;
        info!("reopened {} with root {}", args.db.display(), tree.root_page_id());

        let mut missing = 0;
        for &key in kept {
            if tree.get_value(&key)? != Some(key * 2) {
                missing += 1;
            }
        }
        let mut resurrected = 0;
        for key in removed {
            if tree.get_value(key)?.is_some() {
                resurrected += 1;
            }
        }

        let scanned = tree.begin()?.count();
        println!("\nAfter reopening:");
        println!("  - {} of {} kept keys found", kept.len() - missing, kept.len());
        println!("  - {} removed keys found", resurrected);
        println!("  - {} entries in a full scan", scanned);

        if missing > 0 || resurrected > 0 || scanned != kept.len() {
            return Err("index contents did not survive the reopen".into());
        }
        tree.verify()?;
    }

    if !args.keep {
        std::fs::remove_file(&args.db)?;
    }
    println!("\nDone");
    Ok(())
}
