use clap::{Parser, ValueEnum};

/// Drives quillsync_core through one named convergence scenario against an
/// in-memory, fault-injecting replicator, then asserts every simulated
/// instance converged.
#[derive(Debug, Parser)]
#[command(name = "quillsync", version, about)]
pub struct Cli {
    /// Which scenario to run.
    #[arg(long, value_enum)]
    pub scenario: Scenario,

    /// Soft time budget in seconds for scenarios that run on a duration
    /// rather than a fixed edit count (`chaos`).
    #[arg(long, default_value_t = 30)]
    pub duration: u64,
}

/// The fixed set of named end-to-end scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// A handful of edits from two instances against one note.
    QuickSmoke,
    /// Two instances hammer one shared note with small, fast edits.
    RapidSameNote,
    /// Each instance creates many notes and edits all of them.
    ManyNotes,
    /// Replication flows in one direction only.
    #[value(name = "half-duplex-test")]
    HalfDuplexTest,
    /// Creates, edits, and deletes under an unpredictable replicator.
    Chaos,
    /// A single update delivered as a torn write, then completed.
    #[value(name = "partial-then-complete")]
    PartialThenComplete,
    /// One note's update file is corrupted; others must still converge.
    #[value(name = "corrupt-isolate")]
    CorruptIsolate,
}
