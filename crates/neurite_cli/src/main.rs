//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `neurite_core` linkage and run one short editing session.
//! - Keep output deterministic for quick local sanity checks.
//!
//! Usage: `neurite_cli [DB_PATH]`. Without a path the session runs against an
//! in-memory database. Set `NEURITE_LOG_DIR` to an absolute directory to get
//! rolling logs.

use log::info;
use neurite_core::db::{open_db, open_db_in_memory};
use neurite_core::{
    DragResolution, MergeCandidateResolver, ModelEvent, ModelSource, SqliteNeuronRepository,
    TopologyEditor, Vec3,
};
use std::error::Error;
use std::sync::{Arc, Mutex};

fn main() -> Result<(), Box<dyn Error>> {
    println!("neurite_core ping={}", neurite_core::ping());
    println!("neurite_core version={}", neurite_core::core_version());

    if let Ok(log_dir) = std::env::var("NEURITE_LOG_DIR") {
        neurite_core::init_logging(neurite_core::default_log_level(), &log_dir)?;
    }

    let conn = match std::env::args().nth(1) {
        Some(path) => open_db(path)?,
        None => open_db_in_memory()?,
    };
    let repo = SqliteNeuronRepository::try_new(&conn)?;
    let editor = TopologyEditor::new(repo);
    let handle = editor.create_workspace("smoke", ModelSource::Session)?;

    let seen = Arc::new(Mutex::new(0_usize));
    let counter = Arc::clone(&seen);
    handle
        .notifier()
        .add_listener(Box::new(move |_: &ModelEvent| {
            if let Ok(mut count) = counter.lock() {
                *count += 1;
            }
        }));

    let axon = editor.create_neuron(&handle, "axon")?;
    let root = editor.add_root(&handle, axon, Vec3::new(0.0, 0.0, 0.0))?;
    let mid = editor.add_child(&handle, root, Vec3::new(100.0, 0.0, 0.0))?;
    let tip = editor.add_child(&handle, mid, Vec3::new(200.0, 0.0, 0.0))?;
    editor.set_note(&handle, tip, "traced end")?;
    let inserted = editor.split_annotation(&handle, tip)?;

    let stray = editor.add_root(&handle, axon, Vec3::new(205.0, 5.0, 0.0))?;
    let resolver = MergeCandidateResolver::new(editor.config());
    let drop_at = Vec3::new(201.0, 1.0, 0.0);
    let resolution = resolver.resolve_drag(&handle, stray, drop_at)?;
    println!("drag resolution={resolution:?}");
    if let DragResolution::Merge { source, target } = resolution {
        editor.merge_neurite(&handle, source, target)?;
    }

    let delivered = handle.notifier().dispatch();
    let snapshot = handle.snapshot()?;
    let neuron = snapshot
        .neuron(axon)
        .ok_or_else(|| format!("neuron {axon} vanished"))?;
    println!(
        "neurons={} annotations={} roots={} split_point={} tip_note={:?} events={}",
        snapshot.neuron_count(),
        snapshot.annotation_count(),
        neuron.root_ids().len(),
        inserted,
        neuron.note(tip),
        delivered
    );
    info!(
        "event=cli_smoke module=cli status=ok annotations={} events={}",
        snapshot.annotation_count(),
        seen.lock().map(|count| *count).unwrap_or(0)
    );
    Ok(())
}
