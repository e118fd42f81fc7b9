mod common;

use common::{db_id, knows, name_of, person, session};
use penumbra::{Depth, MemoryDriver, Object, Params, Result, Row, Value};

const ADULTS: &str = "MATCH (p:Person) WHERE p.age >= $age RETURN p";

fn adults() -> Params {
    Params::from([("age".to_owned(), Value::Int(18))])
}

fn node_row(driver: &MemoryDriver, column: &str, id: i64) -> Row {
    Row::from([(
        column.to_owned(),
        Value::Node(driver.node(id).expect("node stored")),
    )])
}

#[test]
fn query_returns_rows_verbatim() -> Result<()> {
    let (mut session, driver) = session();
    let row = Row::from([("answer".to_owned(), Value::Int(42))]);
    driver.respond("RETURN 42 AS answer", vec![row.clone()]);

    let rows = session.query("RETURN 42 AS answer", Params::new())?;
    assert_eq!(rows, vec![row]);
    assert_eq!(driver.statements(), ["RETURN 42 AS answer"]);

    let err = session
        .query("RETURN 43", Params::new())
        .expect_err("no response");
    assert_eq!(err.code(), "QUERY");
    Ok(())
}

#[test]
fn query_for_objects_reuses_cached_instances() -> Result<()> {
    let (mut session, driver) = session();
    let ann = person("Ann");
    let ben = person("Ben");
    knows(&ann, &ben);
    session.save(&ann)?;
    driver.respond(
        ADULTS,
        vec![
            node_row(&driver, "p", db_id(&ann)),
            node_row(&driver, "p", db_id(&ben)),
        ],
    );

    let found = session.query_for_objects("Person", ADULTS, adults())?;
    assert_eq!(found.len(), 2);
    assert!(found[0].ptr_eq(&ann));
    assert!(found[1].ptr_eq(&ben));
    assert!(ben.related_many("known_by")[0].ptr_eq(&ann));
    Ok(())
}

#[test]
fn queried_objects_join_the_identity_map() -> Result<()> {
    let (mut session, driver) = session();
    let ann = person("Ann");
    ann.set_property("age", 41);
    session.save(&ann)?;
    let id = db_id(&ann);
    driver.respond(ADULTS, vec![node_row(&driver, "p", id)]);

    session.clear();
    let found = session
        .query_for_object("Person", ADULTS, adults())?
        .expect("one adult");
    assert!(!found.ptr_eq(&ann));
    assert_eq!(name_of(&found), "Ann");
    assert_eq!(found.property("age"), Some(Value::Int(41)));

    driver.clear_statements();
    let loaded = session.load_depth("Person", id, Depth::Bounded(0))?;
    assert!(loaded.ptr_eq(&found));
    assert!(driver.statements().is_empty());
    Ok(())
}

#[test]
fn query_for_object_expects_at_most_one() -> Result<()> {
    let (mut session, driver) = session();
    let ann = person("Ann");
    knows(&ann, &person("Ben"));
    session.save(&ann)?;
    let ben_id = db_id(&ann.related_many("knows")[0]);
    driver.respond(
        ADULTS,
        vec![
            node_row(&driver, "p", db_id(&ann)),
            node_row(&driver, "p", ben_id),
        ],
    );
    driver.respond("MATCH (p:Person {name: 'Zed'}) RETURN p", Vec::new());

    let err = session
        .query_for_object("Person", ADULTS, adults())
        .expect_err("two results");
    assert_eq!(err.code(), "CONSISTENCY");
    let none = session.query_for_object(
        "Person",
        "MATCH (p:Person {name: 'Zed'}) RETURN p",
        Params::new(),
    )?;
    assert!(none.is_none());
    Ok(())
}

#[test]
fn rows_without_an_entity_of_the_type_are_rejected() -> Result<()> {
    let (mut session, driver) = session();
    let acme = Object::new("Company")
        .with_property("name", "Acme")
        .into_handle();
    session.save(&acme)?;
    driver.respond("MATCH (c:Company) RETURN c", vec![node_row(&driver, "c", db_id(&acme))]);

    let err = session
        .query_for_objects("Person", "MATCH (c:Company) RETURN c", Params::new())
        .expect_err("wrong label");
    assert_eq!(err.code(), "QUERY");
    Ok(())
}

#[test]
fn relationship_entities_are_hydrated_with_their_endpoints() -> Result<()> {
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
    let rel = driver.relationship(db_id(&job)).expect("relationship stored");

    let full = "MATCH (a)-[r:WORKSAT]->(c) RETURN a, r, c";
    let mut row = node_row(&driver, "a", db_id(&ann));
    row.extend(node_row(&driver, "c", db_id(&acme)));
    row.insert("r".to_owned(), Value::Relationship(rel.clone()));
    driver.respond(full, vec![row]);
    let bare = "MATCH ()-[r:WORKSAT]->() RETURN r";
    driver.respond(bare, vec![Row::from([("r".to_owned(), Value::Relationship(rel))])]);

    session.clear();
    let jobs = session.query_for_objects("WorksAt", full, Params::new())?;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].property("since"), Some(Value::Int(2020)));
    let employee = jobs[0].related_one("employee").expect("employee");
    assert_eq!(name_of(&employee), "Ann");
    assert!(jobs[0]
        .related_one("employer")
        .is_some_and(|c| name_of(&c) == "Acme"));

    session.clear();
    let err = session
        .query_for_objects("WorksAt", bare, Params::new())
        .expect_err("no endpoints");
    assert_eq!(err.code(), "QUERY");
    Ok(())
}

#[test]
fn count_reads_the_single_integer_column() -> Result<()> {
    let (mut session, driver) = session();
    let count = "MATCH (p:Person) RETURN count(p)";
    driver.respond(count, vec![Row::from([("count(p)".to_owned(), Value::Int(2))])]);
    assert_eq!(session.count(count, Params::new())?, 2);

    driver.respond("MATCH (p:Person) RETURN p.name", Vec::new());
    let err = session
        .count("MATCH (p:Person) RETURN p.name", Params::new())
        .expect_err("no rows");
    assert_eq!(err.code(), "QUERY");
    Ok(())
}
