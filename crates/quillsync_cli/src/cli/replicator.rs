//! Simulates the sloppy-sync adversary across N instances, each with its
//! own local [`InMemoryFileSystem`] standing in for its own copy of the
//! cloud-synced folder. A real replicator (Dropbox/iCloud/syncthing)
//! copies bytes written under one instance's own sub-directories into
//! every other instance's local copy, on no particular schedule, and may
//! hand a reader a torn write mid-copy. This module reproduces exactly
//! that: nothing here ever lets one instance see another's writes
//! instantly, and every delivery can be delayed, reordered relative to
//! other deliveries, or torn.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rand::Rng;
use rand::rngs::ThreadRng;

use quillsync_core::fs::{FileSystem, InMemoryFileSystem};

/// Tunables for one [`Replicator`], matching the parameters named in each
/// named scenario.
#[derive(Debug, Clone)]
pub struct ReplicatorConfig {
    /// Minimum delivery delay, in polls.
    pub delay_min_polls: u32,
    /// Maximum delivery delay, in polls.
    pub delay_max_polls: u32,
    /// Probability in `[0,1]` that a given delivery is staged as a torn
    /// write (flag `0x00`, partial payload) before the full payload lands
    /// on a later poll.
    pub partial_write_probability: f64,
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        Self { delay_min_polls: 1, delay_max_polls: 1, partial_write_probability: 0.0 }
    }
}

struct Pending {
    target: usize,
    path: PathBuf,
    payload: Vec<u8>,
    due_at: u32,
    torn: bool,
}

/// Replicates one instance's on-disk writes to every other instance's
/// local filesystem, with injected delay and partial-write tearing.
pub struct Replicator {
    config: ReplicatorConfig,
    tick: u32,
    /// What each (source, target) pair has already delivered, keyed by
    /// path, so unchanged files aren't re-scheduled every poll.
    delivered: HashMap<(usize, usize, PathBuf), Vec<u8>>,
    queue: Vec<Pending>,
    rng: ThreadRng,
}

impl Replicator {
    pub fn new(config: ReplicatorConfig) -> Self {
        Self { config, tick: 0, delivered: HashMap::new(), queue: Vec::new(), rng: rand::thread_rng() }
    }

    /// Scan every instance's sole-writer output and schedule deliveries to
    /// every other instance, then deliver whatever is due. `links`
    /// controls which (source, target) directions are active - omit a
    /// direction to model a half-duplex replicator.
    pub fn poll(&mut self, instances: &[InMemoryFileSystem], sd_root: &Path, links: &[(usize, usize)]) {
        self.tick += 1;

        for &(src, dst) in links {
            let files = walk(&instances[src], sd_root);
            for (path, bytes) in files {
                let key = (src, dst, path.clone());
                if self.delivered.get(&key) == Some(&bytes) {
                    continue;
                }
                if self.queue.iter().any(|p| p.target == dst && p.path == path && p.payload == bytes) {
                    continue;
                }
                self.delivered.insert(key, bytes.clone());

                let delay = if self.config.delay_max_polls > self.config.delay_min_polls {
                    self.rng.gen_range(self.config.delay_min_polls..=self.config.delay_max_polls)
                } else {
                    self.config.delay_min_polls
                };
                let torn = !bytes.is_empty()
                    && bytes[0] == 0x01
                    && self.rng.gen_bool(self.config.partial_write_probability);
                self.queue.push(Pending { target: dst, path, payload: bytes, due_at: self.tick + delay, torn });
            }
        }

        self.deliver_due(instances);
    }

    fn deliver_due(&mut self, instances: &[InMemoryFileSystem]) {
        let tick = self.tick;
        let (due, still_pending): (Vec<_>, Vec<_>) =
            self.queue.drain(..).partition(|p| p.due_at <= tick);
        self.queue = still_pending;

        for item in due {
            let target = &instances[item.target];
            if let Some(parent) = item.path.parent() {
                let _ = target.create_dir_all(parent);
            }
            if item.torn {
                let half = item.payload.len() / 2;
                let mut torn_bytes = vec![0x00u8];
                torn_bytes.extend_from_slice(&item.payload[1..half.max(1)]);
                let _ = target.write_atomic(&item.path, &torn_bytes);
                // Re-queue the full payload for the very next poll so the
                // torn write is eventually completed.
                self.queue.push(Pending {
                    target: item.target,
                    path: item.path,
                    payload: item.payload,
                    due_at: tick + 1,
                    torn: false,
                });
            } else {
                let _ = target.write_atomic(&item.path, &item.payload);
            }
        }
    }

    /// Keep polling (bidirectionally between every instance pair, unless
    /// `links` says otherwise) until nothing is left in flight or
    /// `max_polls` is reached.
    pub fn drain(&mut self, instances: &[InMemoryFileSystem], sd_root: &Path, links: &[(usize, usize)], max_polls: u32) {
        for _ in 0..max_polls {
            self.poll(instances, sd_root, links);
            if self.queue.is_empty() {
                break;
            }
        }
    }
}

/// Recursively list every file under `root` in `fs`, returning full bytes
/// alongside each path.
fn walk(fs: &InMemoryFileSystem, root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = fs.list_dir(&dir) else { continue };
        for entry in entries {
            if fs.is_dir(&entry) {
                stack.push(entry);
            } else if let Ok(bytes) = fs.read(&entry) {
                out.push((entry, bytes));
            }
        }
    }
    out
}

/// All (source, target) ordered pairs for `n` instances, excluding
/// self-pairs - a fully-connected replicator mesh.
pub fn full_mesh(n: usize) -> Vec<(usize, usize)> {
    let mut links = Vec::new();
    for src in 0..n {
        for dst in 0..n {
            if src != dst {
                links.push((src, dst));
            }
        }
    }
    links
}
