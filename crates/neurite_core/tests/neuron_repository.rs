use neurite_core::db::{open_db, open_db_in_memory};
use neurite_core::{
    ModelSource, Neuron, NeuronColor, NeuronRepoError, NeuronRepository, SqliteNeuronRepository,
    TopologyEditor, Vec3, Workspace,
};
use uuid::Uuid;

#[test]
fn workspace_row_roundtrips() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteNeuronRepository::try_new(&conn).unwrap();
    let mut workspace = Workspace::new("session 7", ModelSource::DirectedSession);
    workspace.auto_tracing = true;
    repo.save_workspace(&workspace).unwrap();

    let loaded = repo.load_workspace(workspace.id).unwrap().unwrap();
    assert_eq!(loaded.name, "session 7");
    assert_eq!(loaded.source, ModelSource::DirectedSession);
    assert!(loaded.auto_tracing);
    assert!(!loaded.auto_refine_point);
    assert_eq!(loaded.neuron_count(), 0);

    workspace.auto_refine_point = true;
    workspace.name = "renamed".to_string();
    repo.save_workspace(&workspace).unwrap();
    let loaded = repo.load_workspace(workspace.id).unwrap().unwrap();
    assert_eq!(loaded.name, "renamed");
    assert!(loaded.auto_refine_point);

    assert!(repo.load_workspace(Uuid::new_v4()).unwrap().is_none());
}

#[test]
fn neuron_document_roundtrips_full_graph() {
    let conn = open_db_in_memory().unwrap();
    let editor = TopologyEditor::new(SqliteNeuronRepository::try_new(&conn).unwrap());
    let handle = editor.create_workspace("ws", ModelSource::Workspace).unwrap();
    let neuron = editor.create_neuron(&handle, "pyramidal").unwrap();
    let root = editor.add_root(&handle, neuron, Vec3::default()).unwrap();
    let tip = editor
        .add_child(&handle, root, Vec3::new(10.0, 0.0, 0.0))
        .unwrap();
    let side = editor
        .add_child(&handle, root, Vec3::new(0.0, 10.0, 0.0))
        .unwrap();
    editor.update_radius(&handle, side, 0.25).unwrap();
    editor.set_note(&handle, tip, "traced end").unwrap();
    editor
        .add_anchored_path(
            &handle,
            root,
            tip,
            vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(5.0, 0.5, 0.0),
                Vec3::new(10.0, 0.0, 0.0),
            ],
        )
        .unwrap();
    editor
        .set_neuron_color(
            &handle,
            neuron,
            NeuronColor {
                r: 0.2,
                g: 0.4,
                b: 0.6,
            },
        )
        .unwrap();
    editor.set_neuron_visibility(&handle, neuron, false).unwrap();

    let repo = SqliteNeuronRepository::try_new(&conn).unwrap();
    let stored = repo
        .load_neuron(handle.workspace_id(), neuron)
        .unwrap()
        .unwrap();
    assert_eq!(Some(stored), handle.neuron(neuron).unwrap());
    assert!(repo
        .load_neuron(handle.workspace_id(), neuron + 1)
        .unwrap()
        .is_none());
}

#[test]
fn commit_is_all_or_nothing() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteNeuronRepository::try_new(&conn).unwrap();
    let workspace = Workspace::new("ws", ModelSource::Workspace);
    repo.save_workspace(&workspace).unwrap();
    let original = Neuron::new(1, "original");
    repo.save_neuron(workspace.id, &original).unwrap();

    let mut renamed = original.clone();
    renamed.name = "renamed".to_string();
    match repo.commit(workspace.id, &[&renamed], &[42]) {
        Err(NeuronRepoError::NeuronNotFound(42)) => {}
        other => panic!("unexpected result: {other:?}"),
    }

    let stored = repo.load_neuron(workspace.id, 1).unwrap().unwrap();
    assert_eq!(stored.name, "original");
}

#[test]
fn commit_requires_stored_workspace() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteNeuronRepository::try_new(&conn).unwrap();
    let missing = Uuid::new_v4();

    match repo.save_neuron(missing, &Neuron::new(1, "orphan")) {
        Err(NeuronRepoError::WorkspaceNotFound(id)) => assert_eq!(id, missing),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn delete_removes_neuron_row() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteNeuronRepository::try_new(&conn).unwrap();
    let workspace = Workspace::new("ws", ModelSource::Workspace);
    repo.save_workspace(&workspace).unwrap();
    repo.save_neuron(workspace.id, &Neuron::new(3, "gone")).unwrap();

    repo.delete_neuron(workspace.id, 3).unwrap();

    assert!(repo.load_neuron(workspace.id, 3).unwrap().is_none());
    assert!(matches!(
        repo.delete_neuron(workspace.id, 3),
        Err(NeuronRepoError::NeuronNotFound(3))
    ));
}

#[test]
fn malformed_documents_are_rejected_on_load() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteNeuronRepository::try_new(&conn).unwrap();
    let workspace = Workspace::new("ws", ModelSource::Workspace);
    repo.save_workspace(&workspace).unwrap();
    repo.save_neuron(workspace.id, &Neuron::new(1, "n")).unwrap();

    conn.execute(
        "UPDATE neurons SET data = ?1 WHERE neuron_id = 1;",
        ["{\"color\":"],
    )
    .unwrap();
    assert!(matches!(
        repo.load_workspace(workspace.id),
        Err(NeuronRepoError::Document(_))
    ));

    // a root that is missing from the root list
    let orphan_root = r#"{
        "color": {"r": 1.0, "g": 0.0, "b": 1.0},
        "root_ids": [],
        "annotations": [{
            "id": 1,
            "neuron_id": 1,
            "position": {"x": 0.0, "y": 0.0, "z": 0.0},
            "radius": null,
            "parent_id": null,
            "child_ids": [],
            "created_at": 0,
            "updated_at": 0
        }],
        "anchored_paths": [],
        "notes": {}
    }"#;
    conn.execute(
        "UPDATE neurons SET data = ?1 WHERE neuron_id = 1;",
        [orphan_root],
    )
    .unwrap();
    assert!(matches!(
        repo.load_neuron(workspace.id, 1),
        Err(NeuronRepoError::InvalidData(_))
    ));
}

#[test]
fn file_database_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tracing.db");

    let (workspace_id, neuron, tip) = {
        let conn = open_db(&path).unwrap();
        let editor = TopologyEditor::new(SqliteNeuronRepository::try_new(&conn).unwrap());
        let handle = editor.create_workspace("ws", ModelSource::Workspace).unwrap();
        let neuron = editor.create_neuron(&handle, "n").unwrap();
        let root = editor.add_root(&handle, neuron, Vec3::default()).unwrap();
        let tip = editor
            .add_child(&handle, root, Vec3::new(1.0, 2.0, 3.0))
            .unwrap();
        (handle.workspace_id(), neuron, tip)
    };

    let conn = open_db(&path).unwrap();
    let editor = TopologyEditor::new(SqliteNeuronRepository::try_new(&conn).unwrap());
    let handle = editor.load_workspace(workspace_id).unwrap();
    let snapshot = handle.snapshot().unwrap();
    assert_eq!(snapshot.neuron_of(tip), Some(neuron));
    assert_eq!(
        snapshot.annotation(tip).unwrap().position,
        Vec3::new(1.0, 2.0, 3.0)
    );

    // ids keep counting past stored annotations
    let next = editor
        .add_child(&handle, tip, Vec3::new(2.0, 2.0, 3.0))
        .unwrap();
    assert!(next > tip);
    let hits = handle
        .nearest(Vec3::new(1.0, 2.0, 3.0), 1, &|_| true)
        .unwrap();
    assert_eq!(hits[0].entry.annotation_id, tip);
}

#[test]
fn exhausted_annotation_id_is_rejected_on_load() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteNeuronRepository::try_new(&conn).unwrap();
    let workspace = Workspace::new("ws", ModelSource::Workspace);
    repo.save_workspace(&workspace).unwrap();
    repo.save_neuron(workspace.id, &Neuron::new(1, "n")).unwrap();

    let document = format!(
        r#"{{
        "color": {{"r": 1.0, "g": 0.0, "b": 1.0}},
        "root_ids": [{max}],
        "annotations": [{{
            "id": {max},
            "neuron_id": 1,
            "position": {{"x": 0.0, "y": 0.0, "z": 0.0}},
            "radius": null,
            "parent_id": null,
            "child_ids": [],
            "created_at": 0,
            "updated_at": 0
        }}],
        "anchored_paths": [],
        "notes": {{}}
    }}"#,
        max = u64::MAX
    );
    conn.execute(
        "UPDATE neurons SET data = ?1 WHERE neuron_id = 1;",
        [document],
    )
    .unwrap();

    assert!(matches!(
        repo.load_workspace(workspace.id),
        Err(NeuronRepoError::InvalidData(_))
    ));
}
