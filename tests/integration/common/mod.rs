#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use penumbra::{
    Event, EventListener, FieldType, Handle, Lifecycle, MemoryDriver, NodeSchema, Object,
    Registry, RelationField, RelationshipSchema, Result, Session, Target,
};

pub fn registry() -> Registry {
    let person = || Target::Node("Person".into());
    let mut registry = Registry::new();
    registry
        .register_node(
            NodeSchema::new("Person")
                .property("name", FieldType::String)
                .property("age", FieldType::Int)
                .property("scores", FieldType::Map(Box::new(FieldType::Int)))
                .relation(RelationField::outgoing("knows", person()).rel_type("KNOWS").many())
                .relation(RelationField::incoming("known_by", person()).rel_type("KNOWS").many())
                .relation(
                    RelationField::outgoing("pets", Target::Node("Pet".into()))
                        .rel_type("OWNS")
                        .many(),
                )
                .relation(RelationField::outgoing(
                    "employment",
                    Target::Relationship("WorksAt".into()),
                )),
        )
        .expect("person");
    registry
        .register_node(
            NodeSchema::new("Pet")
                .custom_id("tag", FieldType::String)
                .property("name", FieldType::String)
                .relation(
                    RelationField::incoming("owner", Target::Node("Person".into())).rel_type("OWNS"),
                ),
        )
        .expect("pet");
    registry
        .register_node(
            NodeSchema::new("Company")
                .property("name", FieldType::String)
                .relation(
                    RelationField::incoming("employees", Target::Relationship("WorksAt".into()))
                        .many(),
                ),
        )
        .expect("company");
    registry
        .register_relationship(
            RelationshipSchema::new("WorksAt", ("employee", "Person"), ("employer", "Company"))
                .property("since", FieldType::Int),
        )
        .expect("works at");
    registry
        .register_node(
            NodeSchema::new("Station")
                .custom_id("name", FieldType::String)
                .relation(
                    RelationField::outgoing("next", Target::Node("Station".into()))
                        .rel_type("LINK")
                        .many(),
                )
                .relation(
                    RelationField::incoming("previous", Target::Node("Station".into()))
                        .rel_type("LINK")
                        .many(),
                ),
        )
        .expect("station");
    registry
}

pub fn session() -> (Session, MemoryDriver) {
    let driver = MemoryDriver::new();
    (Session::new(driver.clone(), registry()), driver)
}

pub fn person(name: &str) -> Handle {
    Object::new("Person").with_property("name", name).into_handle()
}

pub fn pet(tag: &str, name: &str) -> Handle {
    Object::new("Pet")
        .with_property("tag", tag)
        .with_property("name", name)
        .into_handle()
}

pub fn station(name: &str) -> Handle {
    Object::new("Station").with_property("name", name).into_handle()
}

/// Links two people both ways, the way a load populates them.
pub fn knows(from: &Handle, to: &Handle) {
    from.push_related("knows", to.clone());
    to.push_related("known_by", from.clone());
}

pub fn link(from: &Handle, to: &Handle) {
    from.push_related("next", to.clone());
    to.push_related("previous", from.clone());
}

pub fn adopt(owner: &Handle, animal: &Handle) {
    owner.push_related("pets", animal.clone());
    animal.set_related("owner", Some(owner.clone()));
}

pub fn name_of(object: &Handle) -> String {
    object
        .property("name")
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_default()
}

pub fn db_id(object: &Handle) -> i64 {
    object.id().persisted().expect("persisted")
}

/// Lifecycle callbacks in delivery order, as `(hook, lifecycle, name)`.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<(&'static str, Lifecycle, String)>>,
}

impl Recorder {
    pub fn install(session: &mut Session) -> Arc<Recorder> {
        let recorder = Arc::new(Recorder::default());
        session.register_event_listener(recorder.clone());
        recorder
    }

    pub fn take(&self) -> Vec<(&'static str, Lifecycle, String)> {
        std::mem::take(&mut *self.events.lock())
    }

    fn push(&self, hook: &'static str, event: &Event) {
        self.events
            .lock()
            .push((hook, event.lifecycle, name_of(&event.object)));
    }
}

impl EventListener for Recorder {
    fn on_pre_save(&self, event: &Event) -> Result<()> {
        self.push("pre_save", event);
        Ok(())
    }

    fn on_post_save(&self, event: &Event) {
        self.push("post_save", event);
    }

    fn on_post_load(&self, event: &Event) {
        self.push("post_load", event);
    }

    fn on_pre_delete(&self, event: &Event) {
        self.push("pre_delete", event);
    }

    fn on_post_delete(&self, event: &Event) {
        self.push("post_delete", event);
    }
}
