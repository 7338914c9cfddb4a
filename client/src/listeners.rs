use events::protocol::EventPayload;
use events::ResourceType;
use std::collections::HashMap;
use std::sync::Arc;

/// An event frame as handed to application listeners, parsed once per frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedEvent {
    /// Domain event name, e.g. `notebook.updated`.
    pub name: String,
    pub payload: EventPayload,
}

pub type Listener = Arc<dyn Fn(&ReceivedEvent) + Send + Sync>;

/// Selects which events a listener receives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListenerKey {
    EventName(String),
    Resource(ResourceType),
}

#[derive(Default)]
pub struct Listeners {
    by_key: HashMap<ListenerKey, Vec<Listener>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: ListenerKey, listener: Listener) {
        self.by_key.entry(key).or_default().push(listener);
    }

    /// Invoke every listener registered for the event's name or its resource
    /// type. Returns how many were invoked.
    pub fn dispatch(&self, event: &ReceivedEvent) -> usize {
        let by_name = self.by_key.get(&ListenerKey::EventName(event.name.clone()));
        let by_resource = self.by_key.get(&ListenerKey::Resource(event.payload.resource));

        let mut invoked = 0;
        for listener in by_name.into_iter().chain(by_resource).flatten() {
            listener(event);
            invoked += 1;
        }
        invoked
    }
}
