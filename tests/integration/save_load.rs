mod common;

use std::collections::BTreeMap;

use common::{
    adopt, db_id, knows, link, name_of, person, pet, registry, session, station, Recorder,
};
use penumbra::{
    Depth, EntityId, EntityRef, GraphEntity, GraphError, Handle, Lifecycle, LoadKey,
    MemoryDriver, Object, Result, Session, SessionConfig, Value,
};

#[test]
fn depth_zero_load_matches_saved_properties() -> Result<()> {
    let (mut session, _driver) = session();
    let ann = person("Ann");
    ann.set_property("age", 41);
    knows(&ann, &person("Ben"));
    session.save(&ann)?;
    let id = db_id(&ann);

    session.clear();
    let loaded = session.load_depth("Person", id, Depth::Bounded(0))?;
    assert!(!loaded.ptr_eq(&ann));
    assert_eq!(loaded.id(), EntityId::Persisted(id));
    assert_eq!(loaded.property("name"), Some(Value::from("Ann")));
    assert_eq!(loaded.property("age"), Some(Value::Int(41)));
    assert!(loaded.related_many("knows").is_empty());
    Ok(())
}

#[test]
fn save_creates_nodes_and_relationships_in_one_statement() -> Result<()> {
    let (mut session, driver) = session();
    let ann = person("Ann");
    let ben = person("Ben");
    knows(&ann, &ben);
    session.save(&ann)?;

    let statements = driver.statements();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].contains("CREATE"));
    assert_eq!(driver.node_count(), 2);
    assert_eq!(driver.relationship_count(), 1);
    assert!(ann.id().is_persisted());
    assert!(ben.id().is_persisted());

    let rel = &driver.relationships()[0];
    assert_eq!(rel.rel_type, "KNOWS");
    assert_eq!(rel.start, db_id(&ann));
    assert_eq!(rel.end, db_id(&ben));
    Ok(())
}

#[test]
fn unchanged_save_only_matches() -> Result<()> {
    let (mut session, driver) = session();
    let ann = person("Ann");
    knows(&ann, &person("Ben"));
    session.save(&ann)?;

    let recorder = Recorder::install(&mut session);
    driver.clear_statements();
    session.save(&ann)?;

    let statements = driver.statements();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].contains("MATCH"));
    assert!(!statements[0].contains("SET"));
    assert!(!statements[0].contains("CREATE"));
    let events = recorder.take();
    assert!(events.iter().all(|(hook, _, _)| *hook == "pre_save"));
    assert!(events
        .iter()
        .all(|(_, lifecycle, _)| *lifecycle == Lifecycle::Update));
    Ok(())
}

#[test]
fn changed_property_is_set_and_reported_as_update() -> Result<()> {
    let (mut session, driver) = session();
    let ann = person("Ann");
    let ben = person("Ben");
    knows(&ann, &ben);
    session.save(&ann)?;

    let recorder = Recorder::install(&mut session);
    ben.set_property("age", 30);
    session.save(&ann)?;

    let post_saves: Vec<_> = recorder
        .take()
        .into_iter()
        .filter(|(hook, _, _)| *hook == "post_save")
        .collect();
    assert_eq!(post_saves, vec![("post_save", Lifecycle::Update, "Ben".to_owned())]);
    let stored = driver.node(db_id(&ben)).expect("ben stored");
    assert_eq!(stored.properties.get("age"), Some(&Value::Int(30)));
    Ok(())
}

#[test]
fn removed_property_is_nulled_in_the_database() -> Result<()> {
    let (mut session, driver) = session();
    let ann = person("Ann");
    ann.set_property("age", 41);
    session.save(&ann)?;

    ann.set_property("age", Value::Null);
    session.save(&ann)?;
    let stored = driver.node(db_id(&ann)).expect("ann stored");
    assert!(stored.properties.get("age").is_none());
    Ok(())
}

#[test]
fn new_objects_report_create_once() -> Result<()> {
    let (mut session, _driver) = session();
    let recorder = Recorder::install(&mut session);
    let ann = person("Ann");
    let ben = person("Ben");
    knows(&ann, &ben);
    session.save(&ann)?;

    let mut post_saves: Vec<_> = recorder
        .take()
        .into_iter()
        .filter(|(hook, _, _)| *hook == "post_save")
        .map(|(_, lifecycle, name)| (lifecycle, name))
        .collect();
    post_saves.sort_by(|l, r| l.1.cmp(&r.1));
    assert_eq!(
        post_saves,
        vec![
            (Lifecycle::Create, "Ann".to_owned()),
            (Lifecycle::Create, "Ben".to_owned())
        ]
    );
    Ok(())
}

#[test]
fn bounded_save_stops_at_the_radius() -> Result<()> {
    let (mut session, driver) = session();
    let ann = person("Ann");
    let ben = person("Ben");
    let cid = person("Cid");
    knows(&ann, &ben);
    knows(&ben, &cid);
    session.save_depth(&ann, Depth::Bounded(1))?;

    assert_eq!(driver.node_count(), 2);
    assert_eq!(driver.relationship_count(), 1);
    assert!(ben.id().is_persisted());
    assert_eq!(cid.id(), EntityId::Unsaved);
    Ok(())
}

#[test]
fn cached_load_at_smaller_depth_issues_no_statement() -> Result<()> {
    let (mut session, driver) = session();
    let ann = person("Ann");
    let ben = person("Ben");
    knows(&ann, &ben);
    knows(&ben, &person("Cid"));
    session.save(&ann)?;
    let id = db_id(&ann);

    session.clear();
    let first = session.load_depth("Person", id, Depth::Bounded(2))?;
    driver.clear_statements();
    let again = session.load_depth("Person", id, Depth::Bounded(1))?;
    assert!(again.ptr_eq(&first));
    assert!(driver.statements().is_empty());

    let deeper = session.load_depth("Person", id, Depth::Bounded(3))?;
    assert!(deeper.ptr_eq(&first));
    assert_eq!(driver.statements().len(), 1);
    Ok(())
}

#[test]
fn reloading_reuses_the_cached_instances() -> Result<()> {
    let (mut session, _driver) = session();
    let ann = person("Ann");
    let ben = person("Ben");
    knows(&ann, &ben);
    session.save(&ann)?;

    let loaded = session.load_depth("Person", db_id(&ann), Depth::Bounded(3))?;
    assert!(loaded.ptr_eq(&ann));
    let friends = loaded.related_many("knows");
    assert_eq!(friends.len(), 1);
    assert!(friends[0].ptr_eq(&ben));
    Ok(())
}

#[test]
fn chain_load_populates_within_the_radius() -> Result<()> {
    let (mut session, _driver) = session();
    let [a, b, c, d, e] = ["A", "B", "C", "D", "E"].map(station);
    link(&a, &b);
    link(&b, &c);
    link(&d, &c);
    link(&d, &e);
    session.save(&a)?;
    assert!(e.id().is_persisted());

    session.clear();
    let root = session.load_depth("Station", "B", Depth::Bounded(2))?;
    let names = |handles: Vec<penumbra::Handle>| {
        let mut names: Vec<String> = handles.iter().map(name_of).collect();
        names.sort();
        names
    };

    let previous = root.related_many("previous");
    assert_eq!(names(previous.clone()), ["A"]);
    let loaded_a = &previous[0];
    assert_eq!(names(loaded_a.related_many("next")), ["B"]);

    let next = root.related_many("next");
    assert_eq!(names(next.clone()), ["C"]);
    let loaded_c = &next[0];
    assert_eq!(names(loaded_c.related_many("previous")), ["B", "D"]);

    let loaded_d = loaded_c
        .related_many("previous")
        .into_iter()
        .find(|s| name_of(s) == "D")
        .expect("D loaded");
    assert_eq!(names(loaded_d.related_many("next")), ["C"]);
    assert!(session
        .store()
        .get_by_custom_id("Station", &Value::from("E"))
        .is_none());
    Ok(())
}

#[test]
fn custom_and_internal_keys_resolve_to_one_instance() -> Result<()> {
    let (mut session, _driver) = session();
    session.save(&pet("rex-1", "Rex"))?;
    session.clear();

    let by_tag = session.load("Pet", "rex-1")?;
    let by_id = session.load("Pet", db_id(&by_tag))?;
    assert!(by_tag.ptr_eq(&by_id));
    assert_eq!(name_of(&by_id), "Rex");

    let listed = session.load_all(
        "Pet",
        Some(vec![LoadKey::from("rex-1")]),
        Depth::Bounded(1),
    )?;
    assert_eq!(listed.len(), 1);
    assert!(listed[0].ptr_eq(&by_tag));
    Ok(())
}

#[test]
fn mixed_key_kinds_are_rejected() {
    let (mut session, _driver) = session();
    let err = session
        .load_all(
            "Pet",
            Some(vec![LoadKey::from("rex-1"), LoadKey::Internal(1)]),
            Depth::Bounded(1),
        )
        .expect_err("mixed keys");
    assert_eq!(err.code(), "INVALID_ARGUMENT");
}

#[test]
fn missing_entity_is_not_found() {
    let (mut session, _driver) = session();
    let err = session.load("Pet", "nobody").expect_err("missing");
    assert_eq!(err.code(), "NOT_FOUND");
}

#[test]
fn unsaved_object_with_known_custom_id_adopts_it() -> Result<()> {
    let (mut session, driver) = session();
    let rex = pet("rex-1", "Rex");
    session.save(&rex)?;

    let copy = pet("rex-1", "Rex the second");
    session.save(&copy)?;
    assert_eq!(copy.id(), rex.id());
    assert_eq!(driver.node_count(), 1);
    let stored = driver.node(db_id(&rex)).expect("stored");
    assert_eq!(
        stored.properties.get("name"),
        Some(&Value::from("Rex the second"))
    );
    Ok(())
}

#[test]
fn relationship_entities_round_trip_with_properties() -> Result<()> {
    let (mut session, driver) = session();
    let ann = person("Ann");
    let acme = Object::new("Company")
        .with_property("name", "Acme")
        .into_handle();
    let job = Object::new("WorksAt")
        .with_property("since", 2020)
        .with_related("employee", ann.clone())
        .with_related("employer", acme.clone())
        .into_handle();
    ann.set_related("employment", Some(job.clone()));
    acme.push_related("employees", job.clone());
    session.save(&ann)?;

    let rel = &driver.relationships()[0];
    assert_eq!(rel.rel_type, "WORKSAT");
    assert_eq!(rel.properties.get("since"), Some(&Value::Int(2020)));

    session.clear();
    let company = session.load_depth("Company", db_id(&acme), Depth::Bounded(1))?;
    let jobs = company.related_many("employees");
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].property("since"), Some(Value::Int(2020)));
    let employee = jobs[0].related_one("employee").expect("employee loaded");
    assert_eq!(name_of(&employee), "Ann");
    assert!(jobs[0]
        .related_one("employer")
        .is_some_and(|c| c.ptr_eq(&company)));
    Ok(())
}

#[test]
fn map_properties_are_flattened_and_restored() -> Result<()> {
    let (mut session, driver) = session();
    let ann = person("Ann");
    let scores = BTreeMap::from([
        ("math".to_owned(), Value::Int(90)),
        ("art".to_owned(), Value::Int(75)),
    ]);
    ann.set_property("scores", scores.clone());
    session.save(&ann)?;
    let stored = driver.node(db_id(&ann)).expect("stored");
    assert!(stored.properties.get("scores").is_none());
    assert_eq!(stored.properties.len(), 3);

    session.clear();
    let loaded = session.load_depth("Person", db_id(&ann), Depth::Bounded(0))?;
    assert_eq!(loaded.property("scores"), Some(Value::Map(scores)));
    Ok(())
}

#[test]
fn runtime_labels_are_written_and_restored() -> Result<()> {
    let (mut session, driver) = session();
    let ann = Object::new("Person")
        .with_property("name", "Ann")
        .with_label("Admin")
        .into_handle();
    session.save(&ann)?;
    let stored = driver.node(db_id(&ann)).expect("stored");
    assert!(stored.labels.iter().any(|l| l == "Admin"));
    assert!(stored.labels.iter().any(|l| l == "Person"));

    session.clear();
    let loaded = session.load_depth("Person", db_id(&ann), Depth::Bounded(0))?;
    assert!(loaded.read().labels().contains("Admin"));
    assert!(!loaded.read().labels().contains("Person"));
    Ok(())
}

#[test]
fn save_mirrors_relationships_into_cached_adjacency() -> Result<()> {
    let (mut session, _driver) = session();
    let ann = person("Ann");
    let rex = pet("rex-1", "Rex");
    adopt(&ann, &rex);
    session.save(&ann)?;

    let Some(GraphEntity::Node(node)) = session.store().get(EntityRef::node(ann.id())) else {
        panic!("ann not cached");
    };
    assert_eq!(node.relationships.len(), 1);
    let Some(GraphEntity::Node(pet_node)) = session.store().get(EntityRef::node(rex.id())) else {
        panic!("rex not cached");
    };
    assert_eq!(pet_node.relationships, node.relationships);
    Ok(())
}

#[test]
fn rejected_pre_save_leaves_everything_unsaved() {
    struct Veto;
    impl penumbra::EventListener for Veto {
        fn on_pre_save(&self, event: &penumbra::Event) -> Result<()> {
            if name_of(&event.object) == "Ben" {
                return Err(penumbra::GraphError::InvalidArgument("no Ben".into()));
            }
            Ok(())
        }
    }

    let (mut session, driver) = session();
    session.register_event_listener(std::sync::Arc::new(Veto));
    let ann = person("Ann");
    let ben = person("Ben");
    knows(&ann, &ben);
    let err = session.save(&ann).expect_err("vetoed");
    assert_eq!(err.code(), "INVALID_ARGUMENT");
    assert_eq!(ann.id(), EntityId::Unsaved);
    assert_eq!(ben.id(), EntityId::Unsaved);
    assert!(driver.statements().is_empty());
    assert!(session.store().is_empty());
}

#[test]
fn failed_statement_takes_back_provisional_ids() {
    let (mut session, driver) = session();
    let ann = person("Ann");
    driver.fail_next("connection reset");
    assert!(session.save(&ann).is_err());
    assert_eq!(ann.id(), EntityId::Unsaved);
    assert_eq!(driver.node_count(), 0);
}

/// Ann works at Acme and knows Ben.
fn employed_ann() -> (Handle, Handle) {
    let ann = person("Ann");
    knows(&ann, &person("Ben"));
    let acme = Object::new("Company")
        .with_property("name", "Acme")
        .into_handle();
    let job = Object::new("WorksAt")
        .with_property("since", 2020)
        .with_related("employee", ann.clone())
        .with_related("employer", acme.clone())
        .into_handle();
    ann.set_related("employment", Some(job.clone()));
    acme.push_related("employees", job.clone());
    (ann, job)
}

#[test]
fn relationship_root_at_depth_zero_loads_its_endpoints() -> Result<()> {
    let (mut session, _driver) = session();
    let (ann, job) = employed_ann();
    session.save(&ann)?;

    session.clear();
    let loaded = session.load_depth("WorksAt", db_id(&job), Depth::Bounded(0))?;
    assert_eq!(loaded.property("since"), Some(Value::Int(2020)));
    let employee = loaded.related_one("employee").expect("employee loaded");
    assert_eq!(name_of(&employee), "Ann");
    assert!(employee
        .related_one("employment")
        .is_some_and(|j| j.ptr_eq(&loaded)));
    assert!(employee.related_many("knows").is_empty());
    assert!(loaded
        .related_one("employer")
        .is_some_and(|c| name_of(&c) == "Acme"));

    let again = session.load_depth("WorksAt", db_id(&job), Depth::Bounded(0))?;
    assert!(again.ptr_eq(&loaded));
    Ok(())
}

#[test]
fn relationship_root_at_depth_one_reaches_endpoint_neighbours() -> Result<()> {
    let (mut session, _driver) = session();
    let (ann, job) = employed_ann();
    session.save(&ann)?;

    session.clear();
    let loaded = session.load_depth("WorksAt", db_id(&job), Depth::Bounded(1))?;
    let employee = loaded.related_one("employee").expect("employee loaded");
    let friends = employee.related_many("knows");
    assert_eq!(friends.len(), 1);
    assert_eq!(name_of(&friends[0]), "Ben");
    Ok(())
}

#[test]
fn shallow_load_keeps_references_beyond_its_radius() -> Result<()> {
    let (mut session, driver) = session();
    let ann = person("Ann");
    let ben = person("Ben");
    let cid = person("Cid");
    knows(&ann, &ben);
    knows(&ben, &cid);
    session.save(&ann)?;
    assert_eq!(driver.relationship_count(), 2);

    let loaded = session.load_depth("Person", db_id(&ben), Depth::Bounded(0))?;
    assert!(loaded.ptr_eq(&ben));
    let friends = ben.related_many("knows");
    assert_eq!(friends.len(), 1);
    assert!(friends[0].ptr_eq(&cid));

    session.save(&ann)?;
    assert_eq!(driver.relationship_count(), 2);
    Ok(())
}

#[test]
fn load_all_without_ids_returns_every_entity_of_the_type() -> Result<()> {
    let (mut session, _driver) = session();
    let ann = person("Ann");
    knows(&ann, &person("Ben"));
    session.save(&ann)?;
    session.save(&pet("rex-1", "Rex"))?;

    session.clear();
    let people = session.load_all("Person", None, Depth::Bounded(0))?;
    let mut names: Vec<String> = people.iter().map(name_of).collect();
    names.sort();
    assert_eq!(names, ["Ann", "Ben"]);
    assert!(people.iter().all(|p| p.id().is_persisted()));
    Ok(())
}

#[test]
fn depth_beyond_the_maximum_is_rejected_before_any_statement() -> Result<()> {
    let driver = MemoryDriver::new();
    let config = SessionConfig {
        max_depth: 2,
        ..SessionConfig::default()
    };
    let mut session = Session::with_config(driver.clone(), registry(), config);
    let ann = person("Ann");

    let err = session
        .save_depth(&ann, Depth::Bounded(3))
        .expect_err("save too deep");
    assert!(matches!(err, GraphError::Consistency(_)));
    let err = session
        .load_depth("Person", 1i64, Depth::Bounded(3))
        .expect_err("load too deep");
    assert_eq!(err.code(), "CONSISTENCY");
    let err = session
        .load_all("Person", None, Depth::Bounded(3))
        .expect_err("load all too deep");
    assert_eq!(err.code(), "CONSISTENCY");
    assert!(driver.statements().is_empty());
    assert_eq!(ann.id(), EntityId::Unsaved);

    session.save_depth(&ann, Depth::Bounded(2))?;
    assert_eq!(driver.statements().len(), 1);
    Ok(())
}
