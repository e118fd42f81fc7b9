mod common;

use std::sync::Arc;

use common::{adopt, db_id, knows, name_of, person, pet, registry, session, Recorder};
use penumbra::{
    Depth, EntityId, EntityRef, EventListener, GraphEntity, Lifecycle, Result, Session, Value,
};

fn adjacency(session: &Session, id: EntityId) -> usize {
    match session.store().get(EntityRef::node(id)) {
        Some(GraphEntity::Node(node)) => node.relationships.len(),
        _ => panic!("node {id:?} not cached"),
    }
}

#[test]
fn deleting_a_node_cascades_to_its_relationships() -> Result<()> {
    let (mut session, driver) = session();
    let ann = person("Ann");
    let ben = person("Ben");
    knows(&ann, &ben);
    session.save(&ann)?;
    assert_eq!(adjacency(&session, ann.id()), 1);

    let recorder = Recorder::install(&mut session);
    session.delete(&ben)?;

    assert_eq!(ben.id(), EntityId::Unsaved);
    assert_eq!(adjacency(&session, ann.id()), 0);
    assert_eq!(driver.node_count(), 1);
    assert_eq!(driver.relationship_count(), 0);
    assert_eq!(
        recorder.take(),
        vec![
            ("pre_delete", Lifecycle::Delete, "Ben".to_owned()),
            ("post_delete", Lifecycle::Delete, "Ben".to_owned()),
            ("post_save", Lifecycle::Update, "Ann".to_owned()),
        ]
    );
    Ok(())
}

#[test]
fn nulled_reference_deletes_only_that_relationship() -> Result<()> {
    let (mut session, driver) = session();
    let ann = person("Ann");
    let ben = person("Ben");
    let rex = pet("rex-1", "Rex");
    knows(&ann, &ben);
    adopt(&ann, &rex);
    session.save(&ann)?;
    assert_eq!(driver.relationship_count(), 2);

    let recorder = Recorder::install(&mut session);
    ann.write().remove_related("pets", &rex);
    rex.set_related("owner", None);
    session.save(&ann)?;

    assert_eq!(driver.relationship_count(), 1);
    assert_eq!(driver.relationships()[0].rel_type, "KNOWS");
    assert_eq!(driver.node_count(), 3);
    assert!(rex.id().is_persisted());
    assert_eq!(adjacency(&session, rex.id()), 0);
    assert_eq!(adjacency(&session, ann.id()), 1);

    let updates: Vec<String> = recorder
        .take()
        .into_iter()
        .filter(|(hook, lifecycle, _)| *hook == "post_save" && *lifecycle == Lifecycle::Update)
        .map(|(_, _, name)| name)
        .collect();
    assert!(updates.contains(&"Rex".to_owned()));
    assert!(!updates.contains(&"Ben".to_owned()));
    Ok(())
}

#[test]
fn deleting_an_unsaved_object_is_rejected() {
    let (mut session, _driver) = session();
    let err = session.delete(&person("Ann")).expect_err("unsaved");
    assert_eq!(err.code(), "INVALID_ARGUMENT");
}

#[test]
fn delete_all_removes_every_entity_of_the_type() -> Result<()> {
    let (mut session, _driver) = session();
    let ann = person("Ann");
    let rex = pet("rex-1", "Rex");
    let fido = pet("fido-1", "Fido");
    adopt(&ann, &rex);
    adopt(&ann, &fido);
    session.save(&ann)?;
    assert_eq!(session.count_entities_of_type("Pet")?, 2);

    let deleted = session.delete_all("Pet")?;
    assert_eq!(deleted, 2);
    assert_eq!(session.count_entities_of_type("Pet")?, 0);
    assert_eq!(session.count_entities_of_type("Person")?, 1);
    assert_eq!(rex.id(), EntityId::Unsaved);
    assert_eq!(fido.id(), EntityId::Unsaved);
    assert_eq!(adjacency(&session, ann.id()), 0);
    Ok(())
}

#[test]
fn purge_empties_database_and_cache() -> Result<()> {
    let (mut session, driver) = session();
    let ann = person("Ann");
    knows(&ann, &person("Ben"));
    session.save(&ann)?;

    session.purge_database()?;
    assert_eq!(driver.node_count(), 0);
    assert!(session.store().is_empty());
    assert_eq!(ann.id(), EntityId::Unsaved);
    Ok(())
}

#[test]
fn reload_picks_up_changes_made_elsewhere() -> Result<()> {
    let (mut session, driver) = session();
    let ann = person("Ann");
    ann.set_property("age", 41);
    session.save(&ann)?;

    let mut other = Session::new(driver.clone(), registry());
    let theirs = other.load("Person", db_id(&ann))?;
    theirs.set_property("age", 42);
    other.save(&theirs)?;

    let mut objects = [ann.clone()];
    session.reload(&mut objects)?;
    assert!(objects[0].ptr_eq(&ann));
    assert_eq!(ann.property("age"), Some(Value::Int(42)));
    Ok(())
}

#[test]
fn reload_drops_neighbours_deleted_elsewhere() -> Result<()> {
    let (mut session, driver) = session();
    let ann = person("Ann");
    let ben = person("Ben");
    knows(&ann, &ben);
    session.save(&ann)?;

    let mut other = Session::new(driver.clone(), registry());
    let theirs = other.load("Person", db_id(&ben))?;
    other.delete(&theirs)?;

    let recorder = Recorder::install(&mut session);
    session.reload(&mut [ann.clone()])?;
    assert!(ann.related_many("knows").is_empty());
    assert_eq!(ben.id(), EntityId::Unsaved);
    assert!(recorder
        .take()
        .contains(&("post_delete", Lifecycle::Delete, "Ben".to_owned())));
    Ok(())
}

#[test]
fn reloading_a_deleted_root_marks_it_unsaved() -> Result<()> {
    let (mut session, driver) = session();
    let ann = person("Ann");
    session.save(&ann)?;

    let mut other = Session::new(driver.clone(), registry());
    let theirs = other.load("Person", db_id(&ann))?;
    other.delete(&theirs)?;

    let mut objects = [ann.clone()];
    session.reload(&mut objects)?;
    assert_eq!(objects[0].id(), EntityId::Unsaved);
    assert_eq!(name_of(&objects[0]), "Ann");
    Ok(())
}

#[test]
fn deleting_an_uncached_object_does_nothing() -> Result<()> {
    let (mut session, driver) = session();
    let ann = person("Ann");
    session.save(&ann)?;
    session.clear();

    session.delete(&ann)?;
    assert_eq!(driver.node_count(), 1);
    assert!(ann.id().is_persisted());
    Ok(())
}

#[test]
fn unique_constraints_reject_duplicate_custom_ids() -> Result<()> {
    let (mut session, driver) = session();
    assert_eq!(session.create_schema()?, 2);
    session.save(&pet("rex-1", "Rex"))?;

    let mut other = Session::new(driver.clone(), registry());
    let err = other.save(&pet("rex-1", "Impostor")).expect_err("duplicate");
    assert_eq!(err.code(), "QUERY");
    assert_eq!(driver.node_count(), 1);
    Ok(())
}

#[test]
fn disposing_an_unknown_listener_fails() {
    let (mut session, _driver) = session();
    let recorder: Arc<dyn EventListener> = Recorder::install(&mut session);
    session
        .dispose_event_listener(&recorder)
        .expect("registered listener is disposed");
    let err = session
        .dispose_event_listener(&recorder)
        .expect_err("already disposed");
    assert_eq!(err.code(), "NOT_FOUND");
}

#[test]
fn loads_after_delete_report_not_found() -> Result<()> {
    let (mut session, _driver) = session();
    let ann = person("Ann");
    session.save(&ann)?;
    let id = db_id(&ann);
    session.delete(&ann)?;

    let err = session
        .load_depth("Person", id, Depth::Bounded(1))
        .expect_err("deleted");
    assert_eq!(err.code(), "NOT_FOUND");
    Ok(())
}
