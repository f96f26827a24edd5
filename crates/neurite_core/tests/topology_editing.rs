use neurite_core::db::open_db_in_memory;
use neurite_core::{
    AnnotationId, EditError, ModelEvent, ModelSource, NeuronColor, NeuronId, Precondition,
    SqliteNeuronRepository, TopologyEditor, Vec3, WorkspaceHandle,
};
use rusqlite::Connection;

fn editor(conn: &Connection) -> TopologyEditor<SqliteNeuronRepository<'_>> {
    TopologyEditor::new(SqliteNeuronRepository::try_new(conn).unwrap())
}

/// Straight neurite along the x axis; returns ids root first.
fn chain(
    editor: &TopologyEditor<SqliteNeuronRepository<'_>>,
    handle: &WorkspaceHandle,
    neuron_id: NeuronId,
    xs: &[f64],
) -> Vec<AnnotationId> {
    let mut ids = vec![editor
        .add_root(handle, neuron_id, Vec3::new(xs[0], 0.0, 0.0))
        .unwrap()];
    for x in &xs[1..] {
        let parent = *ids.last().unwrap();
        ids.push(
            editor
                .add_child(handle, parent, Vec3::new(*x, 0.0, 0.0))
                .unwrap(),
        );
    }
    ids
}

fn parent_of(handle: &WorkspaceHandle, id: AnnotationId) -> Option<AnnotationId> {
    handle
        .read(|state| state.workspace().annotation(id).and_then(|ann| ann.parent_id))
        .unwrap()
}

fn children_of(handle: &WorkspaceHandle, id: AnnotationId) -> Vec<AnnotationId> {
    handle
        .read(|state| {
            state
                .workspace()
                .annotation(id)
                .map(|ann| ann.child_ids.clone())
                .unwrap_or_default()
        })
        .unwrap()
}

fn position_of(handle: &WorkspaceHandle, id: AnnotationId) -> Vec3 {
    handle
        .read(|state| state.workspace().annotation(id).map(|ann| ann.position))
        .unwrap()
        .unwrap()
}

fn assert_close(actual: Vec3, expected: Vec3) {
    assert!(
        actual.distance(&expected) < 1e-9,
        "expected {expected:?}, got {actual:?}"
    );
}

fn assert_integrity(handle: &WorkspaceHandle) {
    let workspace = handle.snapshot().unwrap();
    for neuron in workspace.neurons() {
        neuron.check_integrity().unwrap();
    }
}

#[test]
fn children_inherit_parent_radius() {
    let conn = open_db_in_memory().unwrap();
    let editor = editor(&conn);
    let handle = editor.create_workspace("ws", ModelSource::Workspace).unwrap();
    let neuron = editor.create_neuron(&handle, "n").unwrap();

    let root = editor.add_root(&handle, neuron, Vec3::default()).unwrap();
    editor.update_radius(&handle, root, 2.5).unwrap();
    let child = editor
        .add_child(&handle, root, Vec3::new(1.0, 0.0, 0.0))
        .unwrap();

    let snapshot = handle.snapshot().unwrap();
    assert_eq!(snapshot.annotation(child).unwrap().radius, Some(2.5));
    assert_eq!(children_of(&handle, root), vec![child]);
    assert_eq!(snapshot.neuron(neuron).unwrap().root_ids(), &[root]);
}

#[test]
fn non_positive_radius_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let editor = editor(&conn);
    let handle = editor.create_workspace("ws", ModelSource::Workspace).unwrap();
    let neuron = editor.create_neuron(&handle, "n").unwrap();
    let root = editor.add_root(&handle, neuron, Vec3::default()).unwrap();

    for radius in [0.0, -1.0, f64::NAN] {
        match editor.update_radius(&handle, root, radius) {
            Err(EditError::Precondition(Precondition::InvalidRadius(_))) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }
}

#[test]
fn delete_link_on_straight_node_reconnects_neighbors() {
    let conn = open_db_in_memory().unwrap();
    let editor = editor(&conn);
    let handle = editor.create_workspace("ws", ModelSource::Workspace).unwrap();
    let neuron = editor.create_neuron(&handle, "n").unwrap();
    let ids = chain(&editor, &handle, neuron, &[0.0, 10.0, 20.0]);
    let (a, b, c) = (ids[0], ids[1], ids[2]);
    editor.set_note(&handle, b, "review").unwrap();

    editor.delete_link(&handle, b).unwrap();

    assert_eq!(parent_of(&handle, c), Some(a));
    assert_eq!(children_of(&handle, a), vec![c]);
    assert!(matches!(
        handle.note_of(b),
        Err(EditError::AnnotationNotFound(id)) if id == b
    ));
    assert!(handle
        .neuron(neuron)
        .unwrap()
        .unwrap()
        .notes()
        .is_empty());
    assert_integrity(&handle);
}

#[test]
fn delete_link_keeps_child_slot_under_parent() {
    let conn = open_db_in_memory().unwrap();
    let editor = editor(&conn);
    let handle = editor.create_workspace("ws", ModelSource::Workspace).unwrap();
    let neuron = editor.create_neuron(&handle, "n").unwrap();
    let root = editor.add_root(&handle, neuron, Vec3::default()).unwrap();
    let first = editor.add_child(&handle, root, Vec3::new(1.0, 0.0, 0.0)).unwrap();
    let second = editor.add_child(&handle, root, Vec3::new(0.0, 1.0, 0.0)).unwrap();
    let grandchild = editor.add_child(&handle, first, Vec3::new(2.0, 0.0, 0.0)).unwrap();

    editor.delete_link(&handle, first).unwrap();

    assert_eq!(children_of(&handle, root), vec![grandchild, second]);
}

#[test]
fn delete_link_rejects_branches_and_roots_with_children() {
    let conn = open_db_in_memory().unwrap();
    let editor = editor(&conn);
    let handle = editor.create_workspace("ws", ModelSource::Workspace).unwrap();
    let neuron = editor.create_neuron(&handle, "n").unwrap();
    let ids = chain(&editor, &handle, neuron, &[0.0, 10.0, 20.0]);
    editor
        .add_child(&handle, ids[1], Vec3::new(10.0, 10.0, 0.0))
        .unwrap();
    let before = handle.snapshot().unwrap();

    match editor.delete_link(&handle, ids[1]) {
        Err(EditError::Precondition(Precondition::BranchNotDeletable(id))) => {
            assert_eq!(id, ids[1])
        }
        other => panic!("unexpected result: {other:?}"),
    }
    match editor.delete_link(&handle, ids[0]) {
        Err(EditError::Precondition(Precondition::RootWithChildren(id))) => {
            assert_eq!(id, ids[0])
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(handle.snapshot().unwrap(), before);
}

#[test]
fn childless_root_can_be_deleted_as_link() {
    let conn = open_db_in_memory().unwrap();
    let editor = editor(&conn);
    let handle = editor.create_workspace("ws", ModelSource::Workspace).unwrap();
    let neuron = editor.create_neuron(&handle, "n").unwrap();
    let root = editor.add_root(&handle, neuron, Vec3::default()).unwrap();

    editor.delete_link(&handle, root).unwrap();

    let stored = handle.neuron(neuron).unwrap().unwrap();
    assert!(stored.is_empty());
    assert!(stored.root_ids().is_empty());
}

#[test]
fn stale_reference_is_reported() {
    let conn = open_db_in_memory().unwrap();
    let editor = editor(&conn);
    let handle = editor.create_workspace("ws", ModelSource::Workspace).unwrap();

    assert!(matches!(
        editor.delete_link(&handle, 404),
        Err(EditError::AnnotationNotFound(404))
    ));
    assert!(matches!(
        editor.add_root(&handle, 77, Vec3::default()),
        Err(EditError::NeuronNotFound(77))
    ));
}

#[test]
fn split_then_delete_link_restores_original_edge() {
    let conn = open_db_in_memory().unwrap();
    let editor = editor(&conn);
    let handle = editor.create_workspace("ws", ModelSource::Workspace).unwrap();
    let neuron = editor.create_neuron(&handle, "n").unwrap();
    let ids = chain(&editor, &handle, neuron, &[0.0, 300.0]);
    let (a, b) = (ids[0], ids[1]);

    let inserted = editor.split_annotation(&handle, b).unwrap();

    assert_close(position_of(&handle, inserted), Vec3::new(240.0, 0.0, 0.0));
    assert_eq!(parent_of(&handle, inserted), Some(a));
    assert_eq!(parent_of(&handle, b), Some(inserted));
    assert_integrity(&handle);

    editor.delete_link(&handle, inserted).unwrap();

    assert_eq!(parent_of(&handle, b), Some(a));
    assert_eq!(children_of(&handle, a), vec![b]);
    assert_eq!(position_of(&handle, a), Vec3::new(0.0, 0.0, 0.0));
    assert_eq!(position_of(&handle, b), Vec3::new(300.0, 0.0, 0.0));
}

#[test]
fn splitting_root_inserts_near_root() {
    let conn = open_db_in_memory().unwrap();
    let editor = editor(&conn);
    let handle = editor.create_workspace("ws", ModelSource::Workspace).unwrap();
    let neuron = editor.create_neuron(&handle, "n").unwrap();
    let ids = chain(&editor, &handle, neuron, &[0.0, 300.0]);

    let inserted = editor.split_annotation(&handle, ids[0]).unwrap();

    assert_close(position_of(&handle, inserted), Vec3::new(60.0, 0.0, 0.0));
    assert_eq!(parent_of(&handle, inserted), Some(ids[0]));
    assert_eq!(parent_of(&handle, ids[1]), Some(inserted));
}

#[test]
fn short_segment_splits_at_midpoint_with_interpolated_radius() {
    let conn = open_db_in_memory().unwrap();
    let editor = editor(&conn);
    let handle = editor.create_workspace("ws", ModelSource::Workspace).unwrap();
    let neuron = editor.create_neuron(&handle, "n").unwrap();
    let ids = chain(&editor, &handle, neuron, &[0.0, 20.0]);
    editor.update_radius(&handle, ids[1], 3.0).unwrap();

    let inserted = editor.split_annotation(&handle, ids[1]).unwrap();

    let snapshot = handle.snapshot().unwrap();
    let ann = snapshot.annotation(inserted).unwrap();
    assert_eq!(ann.position, Vec3::new(10.0, 0.0, 0.0));
    assert_eq!(ann.radius, Some(2.0));
}

#[test]
fn splitting_root_without_single_child_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let editor = editor(&conn);
    let handle = editor.create_workspace("ws", ModelSource::Workspace).unwrap();
    let neuron = editor.create_neuron(&handle, "n").unwrap();
    let root = editor.add_root(&handle, neuron, Vec3::default()).unwrap();

    match editor.split_annotation(&handle, root) {
        Err(EditError::Precondition(Precondition::AmbiguousRootSplit {
            annotation_id,
            child_count,
        })) => {
            assert_eq!(annotation_id, root);
            assert_eq!(child_count, 0);
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(handle.snapshot().unwrap().annotation_count(), 1);
}

#[test]
fn reroot_twice_on_path_restores_structure() {
    let conn = open_db_in_memory().unwrap();
    let editor = editor(&conn);
    let handle = editor.create_workspace("ws", ModelSource::Workspace).unwrap();
    let neuron = editor.create_neuron(&handle, "n").unwrap();
    let ids = chain(&editor, &handle, neuron, &[0.0, 1.0, 2.0, 3.0]);
    let parents_before: Vec<_> = ids.iter().map(|id| parent_of(&handle, *id)).collect();

    editor.reroot_neurite(&handle, ids[3]).unwrap();
    assert_eq!(handle.neuron(neuron).unwrap().unwrap().root_ids(), &[ids[3]]);
    assert_eq!(parent_of(&handle, ids[0]), Some(ids[1]));
    assert_eq!(parent_of(&handle, ids[3]), None);
    assert_integrity(&handle);

    editor.reroot_neurite(&handle, ids[0]).unwrap();
    let parents_after: Vec<_> = ids.iter().map(|id| parent_of(&handle, *id)).collect();
    assert_eq!(parents_after, parents_before);
    assert_eq!(handle.neuron(neuron).unwrap().unwrap().root_ids(), &[ids[0]]);
}

#[test]
fn reroot_strips_end_marker_from_new_root() {
    let conn = open_db_in_memory().unwrap();
    let editor = editor(&conn);
    let handle = editor.create_workspace("ws", ModelSource::Workspace).unwrap();
    let neuron = editor.create_neuron(&handle, "n").unwrap();
    let ids = chain(&editor, &handle, neuron, &[0.0, 1.0, 2.0]);
    editor.set_note(&handle, ids[2], "traced end   soma side").unwrap();

    editor.reroot_neurite(&handle, ids[2]).unwrap();

    assert_eq!(handle.note_of(ids[2]).unwrap(), "soma side");
}

#[test]
fn merge_within_one_neurite_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let editor = editor(&conn);
    let handle = editor.create_workspace("ws", ModelSource::Workspace).unwrap();
    let neuron = editor.create_neuron(&handle, "n").unwrap();
    let ids = chain(&editor, &handle, neuron, &[0.0, 1.0, 2.0]);
    let side = editor
        .add_child(&handle, ids[1], Vec3::new(1.0, 1.0, 0.0))
        .unwrap();
    let before = handle.snapshot().unwrap();

    match editor.merge_neurite(&handle, ids[2], side) {
        Err(EditError::Precondition(Precondition::SameNeurite {
            common_ancestor, ..
        })) => assert_eq!(common_ancestor, Some(ids[1])),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(handle.snapshot().unwrap(), before);
}

#[test]
fn split_neurite_then_merge_back_restores_connectivity() {
    let conn = open_db_in_memory().unwrap();
    let editor = editor(&conn);
    let handle = editor.create_workspace("ws", ModelSource::Workspace).unwrap();
    let neuron = editor.create_neuron(&handle, "n").unwrap();
    let ids = chain(&editor, &handle, neuron, &[0.0, 1.0, 2.0, 3.0]);

    editor.split_neurite(&handle, ids[2]).unwrap();
    assert_eq!(
        handle.neuron(neuron).unwrap().unwrap().root_ids(),
        &[ids[0], ids[2]]
    );
    assert_eq!(parent_of(&handle, ids[2]), None);
    assert!(matches!(
        editor.split_neurite(&handle, ids[2]),
        Err(EditError::Precondition(Precondition::AlreadyRoot(_)))
    ));

    editor.merge_neurite(&handle, ids[2], ids[1]).unwrap();
    assert_eq!(parent_of(&handle, ids[2]), Some(ids[1]));
    assert_eq!(parent_of(&handle, ids[3]), Some(ids[2]));
    assert_eq!(handle.neuron(neuron).unwrap().unwrap().root_ids(), &[ids[0]]);
    assert_integrity(&handle);
}

#[test]
fn merge_across_neurons_transfers_neurite_and_drops_empty_source() {
    let conn = open_db_in_memory().unwrap();
    let editor = editor(&conn);
    let handle = editor.create_workspace("ws", ModelSource::Workspace).unwrap();
    let target_neuron = editor.create_neuron(&handle, "target").unwrap();
    let source_neuron = editor.create_neuron(&handle, "source").unwrap();
    let target = chain(&editor, &handle, target_neuron, &[0.0, 1.0]);
    let source = chain(&editor, &handle, source_neuron, &[10.0, 11.0, 12.0]);
    editor.set_note(&handle, target[1], "traced end").unwrap();

    editor.merge_neurite(&handle, source[1], target[1]).unwrap();

    let workspace = handle.snapshot().unwrap();
    assert!(workspace.neuron(source_neuron).is_none());
    let merged = workspace.neuron(target_neuron).unwrap();
    assert_eq!(merged.annotation_count(), 5);
    assert_eq!(merged.parent_of(source[1]), Some(target[1]));
    assert_eq!(merged.parent_of(source[0]), Some(source[1]));
    assert_eq!(merged.parent_of(source[2]), Some(source[1]));
    assert_eq!(merged.root_ids(), &[target[0]]);
    assert!(merged
        .annotations()
        .all(|ann| ann.neuron_id == target_neuron));
    assert_eq!(merged.note(target[1]), "");
    assert_integrity(&handle);

    let reloaded = editor.load_workspace(handle.workspace_id()).unwrap();
    let stored = reloaded.snapshot().unwrap();
    assert!(stored.neuron(source_neuron).is_none());
    assert_eq!(stored.neuron(target_neuron), Some(merged));
}

#[test]
fn merge_keeps_non_empty_source_neuron() {
    let conn = open_db_in_memory().unwrap();
    let editor = editor(&conn);
    let handle = editor.create_workspace("ws", ModelSource::Workspace).unwrap();
    let target_neuron = editor.create_neuron(&handle, "target").unwrap();
    let source_neuron = editor.create_neuron(&handle, "source").unwrap();
    let target = chain(&editor, &handle, target_neuron, &[0.0]);
    let moved = chain(&editor, &handle, source_neuron, &[10.0, 11.0]);
    let stays = chain(&editor, &handle, source_neuron, &[50.0]);

    editor.merge_neurite(&handle, moved[0], target[0]).unwrap();

    let left = handle.neuron(source_neuron).unwrap().unwrap();
    assert_eq!(left.root_ids(), &[stays[0]]);
    assert_eq!(left.annotation_count(), 1);
}

#[test]
fn delete_subtree_removes_descendants_paths_and_index_entries() {
    let conn = open_db_in_memory().unwrap();
    let editor = editor(&conn);
    let handle = editor.create_workspace("ws", ModelSource::Workspace).unwrap();
    let neuron = editor.create_neuron(&handle, "n").unwrap();
    let ids = chain(&editor, &handle, neuron, &[0.0, 10.0, 20.0]);
    let side = editor
        .add_child(&handle, ids[1], Vec3::new(10.0, 10.0, 0.0))
        .unwrap();
    editor
        .add_anchored_path(
            &handle,
            ids[1],
            ids[2],
            vec![Vec3::new(10.0, 0.0, 0.0), Vec3::new(20.0, 0.0, 0.0)],
        )
        .unwrap();
    editor
        .add_anchored_path(
            &handle,
            ids[0],
            ids[1],
            vec![Vec3::new(0.0, 0.0, 0.0), Vec3::new(10.0, 0.0, 0.0)],
        )
        .unwrap();

    handle.notifier().drain();

    let deleted = editor.delete_subtree(&handle, ids[1]).unwrap();

    assert_eq!(deleted, vec![ids[1], ids[2], side]);
    assert_eq!(
        handle.notifier().drain(),
        vec![ModelEvent::BulkRefresh {
            neuron_ids: vec![neuron]
        }]
    );
    let stored = handle.neuron(neuron).unwrap().unwrap();
    assert_eq!(stored.annotation_count(), 1);
    assert!(stored.is_end(ids[0]));
    assert_eq!(stored.anchored_paths().count(), 0);
    let hits = handle.nearest(Vec3::default(), 10, &|_| true).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entry.annotation_id, ids[0]);
}

#[test]
fn move_annotation_drops_incident_paths_and_updates_index() {
    let conn = open_db_in_memory().unwrap();
    let editor = editor(&conn);
    let handle = editor.create_workspace("ws", ModelSource::Workspace).unwrap();
    let neuron = editor.create_neuron(&handle, "n").unwrap();
    let ids = chain(&editor, &handle, neuron, &[0.0, 10.0, 20.0, 30.0]);
    for pair in ids.windows(2) {
        let from = position_of(&handle, pair[0]);
        let to = position_of(&handle, pair[1]);
        editor
            .add_anchored_path(&handle, pair[0], pair[1], vec![from, to])
            .unwrap();
    }

    editor
        .move_annotation(&handle, ids[1], Vec3::new(10.0, 500.0, 0.0))
        .unwrap();

    let stored = handle.neuron(neuron).unwrap().unwrap();
    assert!(stored.anchored_path(ids[0], ids[1]).is_none());
    assert!(stored.anchored_path(ids[1], ids[2]).is_none());
    assert!(stored.anchored_path(ids[2], ids[3]).is_some());
    let hits = handle
        .nearest(Vec3::new(10.0, 499.0, 0.0), 1, &|_| true)
        .unwrap();
    assert_eq!(hits[0].entry.annotation_id, ids[1]);
}

#[test]
fn anchored_path_requires_adjacent_current_endpoints() {
    let conn = open_db_in_memory().unwrap();
    let editor = editor(&conn);
    let handle = editor.create_workspace("ws", ModelSource::Workspace).unwrap();
    let neuron = editor.create_neuron(&handle, "n").unwrap();
    let ids = chain(&editor, &handle, neuron, &[0.0, 100.0, 200.0]);

    assert!(matches!(
        editor.add_anchored_path(
            &handle,
            ids[0],
            ids[2],
            vec![Vec3::new(0.0, 0.0, 0.0), Vec3::new(200.0, 0.0, 0.0)]
        ),
        Err(EditError::Precondition(Precondition::NotAdjacent { .. }))
    ));
    assert!(matches!(
        editor.add_anchored_path(
            &handle,
            ids[0],
            ids[1],
            vec![Vec3::new(0.0, 0.0, 0.0), Vec3::new(80.0, 0.0, 0.0)]
        ),
        Err(EditError::Precondition(Precondition::StalePathEndpoints { .. }))
    ));

    editor
        .add_anchored_path(
            &handle,
            ids[1],
            ids[0],
            vec![
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(50.0, 3.0, 0.0),
                Vec3::new(99.0, 0.0, 0.0),
            ],
        )
        .unwrap();
    let stored = handle.neuron(neuron).unwrap().unwrap();
    assert_eq!(stored.anchored_path(ids[0], ids[1]).unwrap().points.len(), 3);
}

#[test]
fn move_neurite_transfers_notes_and_paths_but_keeps_source() {
    let conn = open_db_in_memory().unwrap();
    let editor = editor(&conn);
    let handle = editor.create_workspace("ws", ModelSource::Workspace).unwrap();
    let from = editor.create_neuron(&handle, "from").unwrap();
    let to = editor.create_neuron(&handle, "to").unwrap();
    let ids = chain(&editor, &handle, from, &[0.0, 10.0]);
    editor.set_note(&handle, ids[1], "point of interest").unwrap();
    editor
        .add_anchored_path(
            &handle,
            ids[0],
            ids[1],
            vec![Vec3::new(0.0, 0.0, 0.0), Vec3::new(10.0, 0.0, 0.0)],
        )
        .unwrap();

    assert!(matches!(
        editor.move_neurite(&handle, ids[1], from),
        Err(EditError::Precondition(Precondition::AlreadyInNeuron { .. }))
    ));
    editor.move_neurite(&handle, ids[1], to).unwrap();

    let workspace = handle.snapshot().unwrap();
    let source = workspace.neuron(from).unwrap();
    let dest = workspace.neuron(to).unwrap();
    assert!(source.is_empty());
    assert_eq!(dest.root_ids(), &[ids[0]]);
    assert_eq!(dest.note(ids[1]), "point of interest");
    assert!(dest.anchored_path(ids[0], ids[1]).is_some());
    assert_eq!(workspace.neuron_of(ids[0]), Some(to));
    assert_integrity(&handle);
}

#[test]
fn notes_set_trim_and_remove() {
    let conn = open_db_in_memory().unwrap();
    let editor = editor(&conn);
    let handle = editor.create_workspace("ws", ModelSource::Workspace).unwrap();
    let neuron = editor.create_neuron(&handle, "n").unwrap();
    let root = editor.add_root(&handle, neuron, Vec3::default()).unwrap();

    editor.set_note(&handle, root, "  unique 1  ").unwrap();
    assert_eq!(handle.note_of(root).unwrap(), "unique 1");

    editor.remove_note(&handle, root).unwrap();
    assert_eq!(handle.note_of(root).unwrap(), "");
    assert!(handle
        .neuron(neuron)
        .unwrap()
        .unwrap()
        .notes()
        .is_empty());
}

#[test]
fn neuron_attributes_and_lifecycle() {
    let conn = open_db_in_memory().unwrap();
    let editor = editor(&conn);
    let handle = editor.create_workspace("ws", ModelSource::Workspace).unwrap();

    assert!(matches!(
        editor.create_neuron(&handle, "   "),
        Err(EditError::Precondition(Precondition::EmptyName))
    ));
    let neuron = editor.create_neuron(&handle, "dendrite").unwrap();
    editor.rename_neuron(&handle, neuron, " apical ").unwrap();
    editor.set_neuron_visibility(&handle, neuron, false).unwrap();
    editor
        .set_neuron_color(
            &handle,
            neuron,
            NeuronColor {
                r: 0.0,
                g: 1.0,
                b: 0.0,
            },
        )
        .unwrap();

    let stored = handle.neuron(neuron).unwrap().unwrap();
    assert_eq!(stored.name, "apical");
    assert!(!stored.visible);
    assert_eq!(stored.color.g, 1.0);

    editor.delete_neuron(&handle, neuron).unwrap();
    assert!(handle.neuron(neuron).unwrap().is_none());
    assert!(matches!(
        editor.delete_neuron(&handle, neuron),
        Err(EditError::NeuronNotFound(_))
    ));
}

#[test]
fn add_child_strips_end_marker_from_parent() {
    let conn = open_db_in_memory().unwrap();
    let editor = editor(&conn);
    let handle = editor.create_workspace("ws", ModelSource::Workspace).unwrap();
    let neuron = editor.create_neuron(&handle, "n").unwrap();
    let root = editor.add_root(&handle, neuron, Vec3::default()).unwrap();
    editor.set_note(&handle, root, "problem end").unwrap();

    editor
        .add_child(&handle, root, Vec3::new(1.0, 0.0, 0.0))
        .unwrap();

    assert_eq!(handle.note_of(root).unwrap(), "");
}
