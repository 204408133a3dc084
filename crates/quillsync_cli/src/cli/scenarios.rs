//! The fixed set of named end-to-end scenarios from the testable-
//! properties scenario list, each run against an in-memory replicator
//! mesh and checked for convergence at the end.

use std::fmt;
use std::path::{Path, PathBuf};

use rand::Rng;

use quillsync_core::config::SyncConfig;
use quillsync_core::crdt;
use quillsync_core::fs::{FileSystem, InMemoryFileSystem};
use quillsync_core::model::{InstanceId, NoteId, ProfileId};
use quillsync_core::sync::SdHandle;

use super::args::Scenario;
use super::replicator::{full_mesh, Replicator, ReplicatorConfig};

const SD_ROOT: &str = "/sd";

/// Outcome of running one scenario.
pub struct ScenarioReport {
    pub name: &'static str,
    pub converged: bool,
    pub detail: String,
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.converged { "CONVERGED" } else { "DIVERGED" };
        write!(f, "[{status}] {}: {}", self.name, self.detail)
    }
}

/// Dispatch to the scenario named by `scenario`.
pub fn run(scenario: Scenario, duration_secs: u64) -> Result<ScenarioReport, String> {
    match scenario {
        Scenario::QuickSmoke => Ok(quick_smoke()),
        Scenario::RapidSameNote => Ok(rapid_same_note()),
        Scenario::ManyNotes => Ok(many_notes()),
        Scenario::HalfDuplexTest => Ok(half_duplex_test()),
        Scenario::Chaos => Ok(chaos(duration_secs)),
        Scenario::PartialThenComplete => Ok(partial_then_complete()),
        Scenario::CorruptIsolate => Ok(corrupt_isolate()),
    }
}

struct Instance {
    fs: InMemoryFileSystem,
    handle: SdHandle<InMemoryFileSystem>,
}

fn open_instance(profile: ProfileId) -> Instance {
    let fs = InMemoryFileSystem::new();
    let handle = SdHandle::open(fs.clone(), PathBuf::from(SD_ROOT), InstanceId::new(), profile, SyncConfig::default())
        .expect("opening an empty in-memory SD never fails");
    Instance { fs, handle }
}

/// Load the fully merged state of `note` from `instance`'s own on-disk
/// view, independent of whatever that instance's `SdHandle` has cached in
/// memory - this is what the replicator has actually delivered so far.
fn merged_body(instance: &Instance, note: NoteId) -> (String, Option<String>) {
    let outcome = crdt::load_note(&instance.fs, Path::new(SD_ROOT), note).expect("load_note must not fail on well-formed input");
    (outcome.doc.body(), outcome.doc.title())
}

fn quick_smoke() -> ScenarioReport {
    let profile = ProfileId::new();
    let a = open_instance(profile);
    let b = open_instance(profile);

    let note = a.handle.create_note().unwrap();
    let mut rep = Replicator::new(ReplicatorConfig { delay_min_polls: 1, delay_max_polls: 2, partial_write_probability: 0.0 });
    let links = full_mesh(2);
    let instances = [a.fs.clone(), b.fs.clone()];
    rep.drain(&instances, Path::new(SD_ROOT), &links, 10);

    b.handle.open_note(note).unwrap();
    a.handle.apply_edit(note, |doc| doc.set_body("hello from a")).unwrap();
    b.handle.apply_edit(note, |doc| doc.set_title("titled by b")).unwrap();

    rep.drain(&instances, Path::new(SD_ROOT), &links, 10);

    let (body_a, title_a) = merged_body(&a, note);
    let (body_b, title_b) = merged_body(&b, note);
    let converged = body_a == body_b && title_a == title_b && body_a == "hello from a";

    ScenarioReport {
        name: "quick-smoke",
        converged,
        detail: format!("a=({body_a:?},{title_a:?}) b=({body_b:?},{title_b:?})"),
    }
}

fn rapid_same_note() -> ScenarioReport {
    let profile = ProfileId::new();
    let a = open_instance(profile);
    let b = open_instance(profile);
    let instances = [a.fs.clone(), b.fs.clone()];
    let links = full_mesh(2);

    let note = a.handle.create_note().unwrap();
    let mut rep = Replicator::new(ReplicatorConfig { delay_min_polls: 1, delay_max_polls: 4, partial_write_probability: 0.2 });
    rep.drain(&instances, Path::new(SD_ROOT), &links, 20);
    b.handle.open_note(note).unwrap();

    for i in 0..50u32 {
        let text_a = format!("a{i:02}_{}", "x".repeat(45));
        let text_b = format!("b{i:02}_{}", "y".repeat(45));
        a.handle.apply_edit(note, |doc| { let len = doc.body_len(); doc.insert_at(len, &text_a) }).unwrap();
        b.handle.apply_edit(note, |doc| { let len = doc.body_len(); doc.insert_at(len, &text_b) }).unwrap();
        rep.poll(&instances, Path::new(SD_ROOT), &links);
    }
    rep.drain(&instances, Path::new(SD_ROOT), &links, 40);

    let (body_a, _) = merged_body(&a, note);
    let (body_b, _) = merged_body(&b, note);
    ScenarioReport {
        name: "rapid-same-note",
        converged: body_a == body_b,
        detail: format!("final body lengths a={} b={}", body_a.len(), body_b.len()),
    }
}

fn many_notes() -> ScenarioReport {
    let profile = ProfileId::new();
    let a = open_instance(profile);
    let b = open_instance(profile);
    let instances = [a.fs.clone(), b.fs.clone()];
    let links = full_mesh(2);
    let mut rep = Replicator::new(ReplicatorConfig { delay_min_polls: 1, delay_max_polls: 3, partial_write_probability: 0.3 });

    let mut notes = Vec::new();
    for _ in 0..20 {
        notes.push(a.handle.create_note().unwrap());
    }
    rep.drain(&instances, Path::new(SD_ROOT), &links, 30);
    for &note in &notes {
        b.handle.open_note(note).unwrap();
    }

    for &note in &notes {
        for i in 0..40u32 {
            let text = format!("edit{i:02}_{}", "z".repeat(93));
            a.handle.apply_edit(note, |doc| { let len = doc.body_len(); doc.insert_at(len, &text) }).unwrap();
        }
        rep.poll(&instances, Path::new(SD_ROOT), &links);
    }
    rep.drain(&instances, Path::new(SD_ROOT), &links, 60);

    let mut converged = true;
    let mut mismatches = 0;
    for &note in &notes {
        let (body_a, _) = merged_body(&a, note);
        let (body_b, _) = merged_body(&b, note);
        if body_a != body_b {
            converged = false;
            mismatches += 1;
        }
    }
    ScenarioReport {
        name: "many-notes",
        converged,
        detail: format!("{} of {} notes mismatched", mismatches, notes.len()),
    }
}

fn half_duplex_test() -> ScenarioReport {
    let profile = ProfileId::new();
    let a = open_instance(profile);
    let b = open_instance(profile);
    let instances = [a.fs.clone(), b.fs.clone()];
    // instance1 -> instance2 only: a is index 0, b is index 1.
    let links = vec![(0usize, 1usize)];
    let mut rep = Replicator::new(ReplicatorConfig::default());

    let mut notes = Vec::new();
    for _ in 0..15 {
        notes.push(a.handle.create_note().unwrap());
    }
    for &note in &notes {
        for i in 0..2u32 {
            a.handle.apply_edit(note, |doc| doc.set_body(&format!("content {i}"))).unwrap();
        }
    }
    rep.drain(&instances, Path::new(SD_ROOT), &links, 30);

    let mut converged = true;
    for &note in &notes {
        let (body_a, _) = merged_body(&a, note);
        let (body_b, _) = merged_body(&b, note);
        if body_a != body_b {
            converged = false;
        }
    }
    ScenarioReport {
        name: "half-duplex",
        converged,
        detail: format!("instance2 received {} notes, replication was one-directional", notes.len()),
    }
}

fn chaos(duration_secs: u64) -> ScenarioReport {
    let profile = ProfileId::new();
    let a = open_instance(profile);
    let b = open_instance(profile);
    let instances = [a.fs.clone(), b.fs.clone()];
    let links = full_mesh(2);
    let mut rep = Replicator::new(ReplicatorConfig { delay_min_polls: 1, delay_max_polls: 5, partial_write_probability: 0.4 });

    let rounds = (duration_secs.clamp(1, 300) * 2) as u32;
    let mut rng = rand::thread_rng();
    let mut notes = Vec::new();
    let mut deleted = Vec::new();

    for _ in 0..30 {
        notes.push(a.handle.create_note().unwrap());
    }
    rep.drain(&instances, Path::new(SD_ROOT), &links, 20);
    for &note in &notes {
        let _ = b.handle.open_note(note);
    }

    for _ in 0..rounds {
        if let Some(&note) = notes.get(rng.gen_range(0..notes.len())) {
            let who = if rng.gen_bool(0.5) { &a.handle } else { &b.handle };
            let text: String = (0..150).map(|_| char::from(b'a' + rng.gen_range(0..26))).collect();
            let _ = who.open_note(note);
            let _ = who.apply_edit(note, |doc| { let len = doc.body_len(); doc.insert_at(len, &text) });
        }
        if deleted.len() < 10 && rng.gen_bool(0.05) {
            if let Some(&note) = notes.iter().find(|n| !deleted.contains(n)) {
                let _ = a.handle.apply_edit(note, |doc| doc.set_deleted(true));
                deleted.push(note);
            }
        }
        rep.poll(&instances, Path::new(SD_ROOT), &links);
    }
    rep.drain(&instances, Path::new(SD_ROOT), &links, 80);

    let mut converged = true;
    let mut live_mismatch = 0;
    for &note in &notes {
        let (body_a, _) = merged_body(&a, note);
        let (body_b, _) = merged_body(&b, note);
        if body_a != body_b {
            converged = false;
            live_mismatch += 1;
        }
    }
    ScenarioReport {
        name: "chaos",
        converged,
        detail: format!("{rounds} rounds, {live_mismatch} of {} notes diverged, {} tombstoned", notes.len(), deleted.len()),
    }
}

fn partial_then_complete() -> ScenarioReport {
    use quillsync_core::frame;

    let profile = ProfileId::new();
    let a = open_instance(profile);
    let b = open_instance(profile);
    let instances = [a.fs.clone(), b.fs.clone()];
    let links = full_mesh(2);
    let mut rep = Replicator::new(ReplicatorConfig::default());

    let note = a.handle.create_note().unwrap();
    rep.drain(&instances, Path::new(SD_ROOT), &links, 10);
    b.handle.open_note(note).unwrap();
    a.handle.apply_edit(note, |doc| doc.set_body("seq five payload")).unwrap();

    let update_dir = Path::new(SD_ROOT).join("notes").join(note.to_string()).join("updates").join(a.handle.instance_id().to_string());
    let files = a.fs.list_dir(&update_dir).unwrap_or_default();
    let Some(path) = files.into_iter().max_by_key(|p| p.file_name().map(|n| n.to_string_lossy().into_owned())) else {
        return ScenarioReport { name: "partial-then-complete", converged: false, detail: "no update file produced".into() };
    };
    let full_bytes = a.fs.read(&path).unwrap();

    // b.fs mirrors a.fs's directory structure (both instances use the
    // same SD root), so the same path is valid for writing into b's view.
    let half = full_bytes.len() / 2;
    let mut torn = vec![0x00u8];
    torn.extend_from_slice(&full_bytes[1..half.max(1)]);
    b.fs.create_dir_all(path.parent().unwrap()).unwrap();
    b.fs.write_atomic(&path, &torn).unwrap();

    let before = crdt::load_note(&b.fs, Path::new(SD_ROOT), note).unwrap();
    let skipped_while_torn = before.doc.body() != "seq five payload";

    b.fs.write_atomic(&path, &frame::encode(&full_bytes[1..])).unwrap();
    let after = crdt::load_note(&b.fs, Path::new(SD_ROOT), note).unwrap();
    let converged = skipped_while_torn && after.doc.body() == "seq five payload";

    ScenarioReport {
        name: "partial-then-complete",
        converged,
        detail: format!("skipped while torn={skipped_while_torn}, body after completion={:?}", after.doc.body()),
    }
}

fn corrupt_isolate() -> ScenarioReport {
    let profile = ProfileId::new();
    let a = open_instance(profile);
    let b = open_instance(profile);
    let instances = [a.fs.clone(), b.fs.clone()];
    let links = full_mesh(2);
    let mut rep = Replicator::new(ReplicatorConfig::default());

    let note_a = a.handle.create_note().unwrap();
    let note_b = a.handle.create_note().unwrap();
    let note_c = a.handle.create_note().unwrap();
    rep.drain(&instances, Path::new(SD_ROOT), &links, 10);
    for n in [note_a, note_b, note_c] {
        b.handle.open_note(n).unwrap();
    }

    a.handle.apply_edit(note_a, |doc| doc.set_body("alpha")).unwrap();
    a.handle.apply_edit(note_b, |doc| doc.set_body("bravo")).unwrap();
    a.handle.apply_edit(note_c, |doc| doc.set_body("charlie")).unwrap();
    rep.drain(&instances, Path::new(SD_ROOT), &links, 10);

    let update_dir = Path::new(SD_ROOT).join("notes").join(note_b.to_string()).join("updates").join(a.handle.instance_id().to_string());
    let files = b.fs.list_dir(&update_dir).unwrap_or_default();
    let mut corrupted_path = None;
    if let Some(path) = files.into_iter().next() {
        b.fs.write_atomic(&path, &[0xff, 0xff, 0xff]).unwrap();
        corrupted_path = Some(path);
    }

    // Loading the corrupted note must still succeed - the bad file is
    // quarantined, not propagated as a fatal error - and merging must
    // keep progressing on the other two notes regardless.
    let b_survived = crdt::load_note(&b.fs, Path::new(SD_ROOT), note_b).is_ok();
    let quarantine_sibling_exists = corrupted_path
        .map(|p| {
            let mut quarantined = p.as_os_str().to_os_string();
            quarantined.push(".corrupt");
            b.fs.exists(Path::new(&quarantined))
        })
        .unwrap_or(false);

    let (a_body_a, _) = merged_body(&a, note_a);
    let (b_body_a, _) = merged_body(&b, note_a);
    let (a_body_c, _) = merged_body(&a, note_c);
    let (b_body_c, _) = merged_body(&b, note_c);
    let others_converged = a_body_a == b_body_a && a_body_c == b_body_c;

    ScenarioReport {
        name: "corrupt-isolate",
        converged: others_converged && b_survived && quarantine_sibling_exists,
        detail: format!(
            "load survived corruption={b_survived}, .corrupt sibling written={quarantine_sibling_exists}, unaffected notes converged={others_converged}"
        ),
    }
}
