// -- std imports
use std::{cell::Cell, rc::Rc, time::Duration};

// -- crate imports
use anyhow::{Context, Result};
use clap::Parser;
use desktop_menus::{
    Environment, ManualWatchService, MenuContext, MenuTree, NotifyWatchService, WatchService,
    report::{self, MenuReport},
};
use tracing::{debug, info};

// -- module definitions
mod args;
mod log;

// -- module imports
use crate::args::Args;

/// How often pending change notifications are dispatched in `--monitor` mode.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.no_log {
        log::init_silent()?;
    } else {
        log::init_tracing()?;
        info!("desktop-menus started");
        debug!("Parsed args: {args:#?}");
    }

    let mut env = Environment::from_env();
    if let Some(prefix) = &args.prefix {
        env.menu_prefix = Some(prefix.clone()).filter(|p| !p.is_empty());
    }
    if let Some(desktop) = &args.desktop {
        env.desktop_name = desktop.clone();
    }

    let service: Box<dyn WatchService> = if args.monitor {
        Box::new(NotifyWatchService::new().context("Failed to start filesystem watcher")?)
    } else {
        Box::new(ManualWatchService::new())
    };
    let context = MenuContext::new(env, service);

    let tree = context.lookup(&args.file, args.tree_flags());
    tree.set_sort_key(args.sort_key());
    print_tree(&tree, args.json)?;

    if args.monitor {
        monitor(&context, &tree, args.json).await?;
    }

    info!("desktop-menus done!");
    Ok(())
}

/// Prints `tree` to stdout, as JSON or as the text listing.
fn print_tree(tree: &MenuTree, json: bool) -> Result<()> {
    let root = tree.root_directory();
    if root.is_none() {
        eprintln!("Failed to load tree");
    }

    if json {
        let report = MenuReport::from_tree(tree);
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if let Some(root) = root {
        for line in report::dump_lines(&root) {
            println!("{line}");
        }
    }
    Ok(())
}

/// Dispatches change notifications until Ctrl-C, printing the tree after every change.
async fn monitor(context: &MenuContext, tree: &MenuTree, json: bool) -> Result<()> {
    let changed = Rc::new(Cell::new(false));
    let flag = Rc::clone(&changed);
    tree.add_monitor(Rc::new(move |_| flag.set(true)));

    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!(file = ?tree.menu_file(), "Monitoring menu for changes");
    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.context("Failed to listen for Ctrl-C")?;
                info!("Interrupted, stopping");
                return Ok(());
            }
            _ = ticker.tick() => {
                let dispatched = context.process_events();
                if dispatched > 0 {
                    debug!(dispatched, "Dispatched change notifications");
                }
                if changed.replace(false) {
                    println!("==== Menu changed, reloading ====");
                    print_tree(tree, json)?;
                }
            }
        }
    }
}
