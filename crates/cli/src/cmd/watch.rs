//! Watch a sync root and report changes
//!
//! The root is scanned into its node cache first, so changes already
//! reflected there are suppressed as self-notifications. Events then run
//! through the debounce queues and each ready path is refreshed against the
//! cache. Without a native watcher a periodic rescan feeds the same queues.

use crate::util::{default_state_dir, load_config};
use anyhow::{bail, Context, Result};
use localfs_core::platform::os_to_local;
use localfs_core::{Ds, FileSystemAccess, FsError, LocalPath, NativeFileSystemAccess, Waiter, NEVER};
use localfs_nodecache::{CachedTree, Change, NodeCache};
use localfs_watcher::{DirNotify, NotifyQueue, PeriodicRescan};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Delay before a transiently failed path is examined again
const RETRY_DELAY_DS: Ds = 10;

/// Longest sleep between loop iterations, so the fallback channel is polled
const MAX_SLEEP_DS: Ds = 10;

pub async fn run(
    config_path: Option<&Path>,
    dir: &Path,
    state: Option<PathBuf>,
    duration: Option<u64>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let root_os = dir
        .canonicalize()
        .with_context(|| format!("Cannot access {}", dir.display()))?;
    if !root_os.is_dir() {
        bail!("{} is not a directory", root_os.display());
    }

    let state_dir = match state {
        Some(state) => state,
        None => default_state_dir(&root_os)?,
    };
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("Failed to create state directory {}", state_dir.display()))?;

    let native =
        NativeFileSystemAccess::new(&config).context("Failed to start async I/O workers")?;
    let fs: Arc<dyn FileSystemAccess> = Arc::new(native);
    let root = os_to_local(&root_os);
    let ignore = LocalPath::from_path(&config.watcher.ignore_dir, fs.as_ref());

    let cache = NodeCache::open(&state_dir)?;
    let tree = Arc::new(CachedTree::open(fs.clone(), root.clone(), ignore.clone(), cache)?);
    let waiter = Waiter::new();
    let stop = Arc::new(AtomicBool::new(false));

    {
        let stop = stop.clone();
        let waiter = waiter.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                stop.store(true, Ordering::Release);
                waiter.notify();
            }
        });
    }

    if let Some(secs) = duration {
        let stop = stop.clone();
        let waiter = waiter.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            stop.store(true, Ordering::Release);
            waiter.notify();
        });
    }

    let runtime = tokio::runtime::Handle::current();
    let session = Session {
        fs: fs.clone(),
        tree: tree.clone(),
        dn: DirNotify::new(fs, waiter.clone(), root, ignore),
        waiter,
        debounce: config.watcher.debounce_ds,
        fallback: None,
        stop,
    };

    let interval = Duration::from_secs(config.watcher.rescan_interval_secs);
    let ignore_dir = config.watcher.ignore_dir.clone();
    tokio::task::spawn_blocking(move || session.run(&runtime, root_os, interval, ignore_dir))
        .await
        .context("Watch loop panicked")?
}

struct Session {
    fs: Arc<dyn FileSystemAccess>,
    tree: Arc<CachedTree>,
    dn: DirNotify,
    waiter: Waiter,
    debounce: Ds,
    /// Periodic rescan results, when the native watcher is unavailable
    fallback: Option<mpsc::Receiver<Vec<PathBuf>>>,
    stop: Arc<AtomicBool>,
}

impl Session {
    fn run(
        mut self,
        runtime: &tokio::runtime::Handle,
        root_os: PathBuf,
        interval: Duration,
        ignore_dir: String,
    ) -> Result<()> {
        let nodes = self.tree.scan(&self.waiter)?;
        println!("{} {} ({} nodes)", "Scanned".green(), root_os.display(), nodes);

        self.dn.attach(self.tree.clone());
        if self.dn.start().is_err() {
            println!(
                "{} native watcher unavailable ({}), rescanning every {}s",
                "[watcher]".yellow(),
                self.dn.fail_reason(),
                interval.as_secs()
            );
            let (tx, rx) = mpsc::channel(16);
            let rescan = PeriodicRescan::new(root_os.clone(), interval, ignore_dir, tx);
            runtime.spawn(async move {
                if let Err(err) = rescan.run().await {
                    warn!("Periodic rescan stopped: {}", err);
                }
            });
            self.fallback = Some(rx);
        }

        println!("{} {}", "Watching".green(), root_os.display());

        while !self.stop.load(Ordering::Acquire) {
            self.collect();
            self.process();

            let next = self
                .dn
                .next_deadline(NotifyQueue::Extra, self.debounce)
                .min(self.dn.next_deadline(NotifyQueue::DirEvents, self.debounce))
                .min(self.dn.next_deadline(NotifyQueue::Retry, RETRY_DELAY_DS));
            let cap = self.waiter.ds().saturating_add(MAX_SLEEP_DS);
            self.waiter.init(if next == NEVER { cap } else { next.min(cap) });
            self.waiter.wait();
        }

        info!("Watch stopped");
        Ok(())
    }

    /// Move pending backend events and rescan results into the queues
    fn collect(&mut self) {
        let root = Some(self.tree.root_id());
        let fed = self.dn.pump(root);
        if fed > 0 {
            debug!(fed, "Queued filesystem events");
        }

        if self.dn.take_rescan_request() {
            match self.tree.scan(&self.waiter) {
                Ok(nodes) => println!(
                    "{} rescanned after lost events ({} nodes)",
                    "[watcher]".yellow(),
                    nodes
                ),
                Err(err) => warn!("Rescan failed: {}", err),
            }
        }

        if let Some(rx) = &mut self.fallback {
            while let Ok(paths) = rx.try_recv() {
                for path in paths {
                    self.dn.notify(NotifyQueue::DirEvents, root, os_to_local(&path), false);
                }
            }
        }
    }

    /// Refresh every path whose debounce delay has elapsed
    fn process(&mut self) {
        let now = self.waiter.ds();
        let mut ready = self.dn.drain_ready(NotifyQueue::Extra, now, self.debounce);
        ready.extend(self.dn.drain_ready(NotifyQueue::DirEvents, now, self.debounce));
        ready.extend(self.dn.drain_ready(NotifyQueue::Retry, now, RETRY_DELAY_DS));

        for notification in ready {
            match self.tree.refresh_all(&notification.path, &self.waiter) {
                Ok(refresh) => {
                    self.report(refresh.change, &notification.path);
                    for removed in &refresh.removed {
                        self.report(Change::Removed, removed);
                    }
                }
                Err(err) if is_retryable(&err) => {
                    debug!(path = ?notification.path, "Retrying later: {}", err);
                    self.dn.notify(
                        NotifyQueue::Retry,
                        notification.local_node,
                        notification.path,
                        false,
                    );
                }
                Err(err) => warn!("Cannot examine {:?}: {}", notification.path, err),
            }
        }
    }

    fn report(&self, change: Change, path: &LocalPath) {
        let shown = if path.is_empty() {
            ".".to_string()
        } else {
            path.to_path(self.fs.as_ref())
        };
        match change {
            Change::Added => println!("{} {}", "+".green(), shown),
            Change::Modified => println!("{} {}", "~".yellow(), shown),
            Change::Removed => println!("{} {}", "-".red(), shown),
            Change::Unchanged => {}
        }
    }
}

fn is_retryable(err: &anyhow::Error) -> bool {
    err.downcast_ref::<FsError>().is_some_and(FsError::is_retryable)
}
