mod common;

use std::sync::Arc;

use common::*;
use presence_backend_sqlite::db;
use presence_backend_sqlite::pipeline::registry::IdentityRegistry;

#[test]
fn usable_students_become_identities_in_store_order() {
    let env = TestEnv::new(Arc::new(cast_analyzer()));
    env.add_student("S002", "Bob", BOB);
    env.add_student("S001", "Alice", ALICE);
    env.add_student("S003", "Carol", ALICE);

    let registry = env.state.rebuild_registry().unwrap();
    let ids: Vec<&str> = registry.identities().iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["S002", "S001", "S003"]);
    assert_eq!(registry.identities()[1].display_name, "Alice");
    assert_eq!(registry.identities()[1].signature, vec![1.0, 0.0, 0.0]);
    assert!(registry.excluded().is_empty());
}

#[test]
fn unusable_reference_images_are_excluded_not_fatal() {
    let env = TestEnv::new(Arc::new(cast_analyzer()));
    env.add_student("S001", "Alice", ALICE);
    // Faceless reference image
    env.add_student("S002", "Nobody", EMPTY);
    // Missing file
    {
        let conn = env.state.pool.get().unwrap();
        db::writer::insert_student(&conn, "S003", "Ghost", "ghost.png").unwrap();
    }
    // Not an image
    std::fs::write(env.images_dir().join("junk.png"), b"definitely not a png").unwrap();
    {
        let conn = env.state.pool.get().unwrap();
        db::writer::insert_student(&conn, "S004", "Junk", "junk.png").unwrap();
    }
    env.add_student("S005", "Bob", BOB);

    let registry = env.state.rebuild_registry().unwrap();
    let ids: Vec<&str> = registry.identities().iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["S001", "S005"]);
    let excluded: Vec<&str> = registry.excluded().iter().map(|e| e.student_id.as_str()).collect();
    assert_eq!(excluded, vec!["S002", "S003", "S004"]);
    assert!(registry.excluded()[0].reason.contains("no face"));
}

#[test]
fn first_face_wins_for_group_reference_photos() {
    let analyzer = FakeAnalyzer::default().with(
        ALICE,
        vec![face(0, 0, vec![1.0, 0.0, 0.0]), face(0, 16, vec![0.0, 1.0, 0.0])],
    );
    let env = TestEnv::new(Arc::new(analyzer));
    env.add_student("S001", "Alice", ALICE);

    let registry = env.state.rebuild_registry().unwrap();
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.identities()[0].signature, vec![1.0, 0.0, 0.0]);
}

#[test]
fn snapshot_is_unaffected_by_later_rebuilds() {
    let env = TestEnv::new(Arc::new(cast_analyzer()));
    env.add_student("S001", "Alice", ALICE);
    env.state.rebuild_registry().unwrap();
    let before = env.state.registry.snapshot();

    env.add_student("S002", "Bob", BOB);
    assert_eq!(env.state.registry.snapshot().len(), 1);

    env.state.rebuild_registry().unwrap();
    assert_eq!(before.len(), 1);
    assert_eq!(env.state.registry.snapshot().len(), 2);
}

#[test]
fn empty_store_builds_empty_registry() {
    let env = TestEnv::new(Arc::new(cast_analyzer()));
    let registry = IdentityRegistry::build(env.state.store.as_ref(), env.state.images.as_ref(), &*env.state.analyzer).unwrap();
    assert!(registry.is_empty());
}
