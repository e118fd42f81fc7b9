mod common;

use common::{db_id, knows, person, session, Recorder};
use penumbra::{EntityId, GraphError, Lifecycle, Result, TxState, Value};

#[test]
fn committed_writes_persist() -> Result<()> {
    let (mut session, driver) = session();
    let ann = person("Ann");
    knows(&ann, &person("Ben"));

    let mut tx = session.begin_transaction()?;
    assert_eq!(tx.state(), TxState::Active);
    assert!(tx.in_transaction());
    tx.save(&ann)?;
    tx.commit()?;

    assert!(!session.in_transaction());
    assert_eq!(driver.node_count(), 2);
    assert_eq!(driver.relationship_count(), 1);
    Ok(())
}

#[test]
fn only_one_transaction_per_session() -> Result<()> {
    let (mut session, _driver) = session();
    let mut tx = session.begin_transaction()?;
    assert!(matches!(
        tx.begin_transaction(),
        Err(GraphError::Consistency(_))
    ));
    tx.rollback()?;
    Ok(())
}

#[test]
fn rollback_then_reload_restores_prior_state() -> Result<()> {
    let (mut session, driver) = session();
    let ann = person("Ann");
    ann.set_property("age", 41);
    session.save(&ann)?;

    let ben = person("Ben");
    {
        let mut tx = session.begin_transaction()?;
        ann.set_property("age", 50);
        knows(&ann, &ben);
        tx.save(&ann)?;
        assert!(ben.id().is_persisted());
        tx.rollback()?;
    }
    assert_eq!(driver.node_count(), 1);
    assert_eq!(driver.relationship_count(), 0);

    let recorder = Recorder::install(&mut session);
    let mut objects = [ann.clone()];
    session.reload(&mut objects)?;

    assert!(objects[0].ptr_eq(&ann));
    assert_eq!(ann.property("age"), Some(Value::Int(41)));
    assert!(ann.related_many("knows").is_empty());
    assert_eq!(ben.id(), EntityId::Unsaved);
    assert!(recorder
        .take()
        .contains(&("post_delete", Lifecycle::Delete, "Ben".to_owned())));
    assert_eq!(session.store().len(), 1);
    Ok(())
}

#[test]
fn dropping_an_active_transaction_rolls_back() -> Result<()> {
    let (mut session, driver) = session();
    let ann = person("Ann");
    {
        let mut tx = session.begin_transaction()?;
        tx.save(&ann)?;
        assert_eq!(driver.node_count(), 1);
    }
    assert!(!session.in_transaction());
    assert_eq!(driver.node_count(), 0);

    session.begin_transaction()?.commit()?;
    Ok(())
}

#[test]
fn statements_outside_a_transaction_are_not_rolled_back() -> Result<()> {
    let (mut session, driver) = session();
    let ann = person("Ann");
    session.save(&ann)?;
    let id = db_id(&ann);

    let tx = session.begin_transaction()?;
    tx.rollback()?;
    assert!(driver.node(id).is_some());
    Ok(())
}
