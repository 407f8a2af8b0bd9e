// Fan-out of live microclimate results to connected websocket sessions.

use std::collections::HashMap;

use actix::prelude::*;
use log::{debug, info};

/// Serialized snapshot pushed to a session.
#[derive(Message, Clone)]
#[rtype(result = "()")]
pub struct LiveUpdate(pub String);

#[derive(Message)]
#[rtype(result = "()")]
pub struct Subscribe {
    pub microclimate_id: String,
    pub addr: Recipient<LiveUpdate>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Unsubscribe {
    pub microclimate_id: String,
    pub addr: Recipient<LiveUpdate>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Publish {
    pub microclimate_id: String,
    pub payload: String,
}

#[derive(Message)]
#[rtype(result = "usize")]
pub struct SubscriberCount {
    pub microclimate_id: String,
}

#[derive(Default)]
pub struct MicroclimateHub {
    // Several sessions may watch the same microclimate.
    sessions: HashMap<String, Vec<Recipient<LiveUpdate>>>,
}

impl MicroclimateHub {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Actor for MicroclimateHub {
    type Context = Context<Self>;
}

impl Handler<Subscribe> for MicroclimateHub {
    type Result = ();

    fn handle(&mut self, msg: Subscribe, _: &mut Context<Self>) {
        info!("Live session joined microclimate {}", msg.microclimate_id);
        self.sessions
            .entry(msg.microclimate_id)
            .or_default()
            .push(msg.addr);
    }
}

impl Handler<Unsubscribe> for MicroclimateHub {
    type Result = ();

    fn handle(&mut self, msg: Unsubscribe, _: &mut Context<Self>) {
        info!("Live session left microclimate {}", msg.microclimate_id);
        if let Some(addrs) = self.sessions.get_mut(&msg.microclimate_id) {
            addrs.retain(|a| a != &msg.addr);
            if addrs.is_empty() {
                self.sessions.remove(&msg.microclimate_id);
            }
        }
    }
}

impl Handler<Publish> for MicroclimateHub {
    type Result = ();

    fn handle(&mut self, msg: Publish, _: &mut Context<Self>) {
        let Some(addrs) = self.sessions.get(&msg.microclimate_id) else {
            return;
        };
        debug!(
            "Publishing microclimate {} to {} sessions",
            msg.microclimate_id,
            addrs.len()
        );
        for addr in addrs {
            addr.do_send(LiveUpdate(msg.payload.clone()));
        }
    }
}

impl Handler<SubscriberCount> for MicroclimateHub {
    type Result = usize;

    fn handle(&mut self, msg: SubscriberCount, _: &mut Context<Self>) -> usize {
        self.sessions
            .get(&msg.microclimate_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Collector(Arc<Mutex<Vec<String>>>);

    impl Actor for Collector {
        type Context = Context<Self>;
    }

    impl Handler<LiveUpdate> for Collector {
        type Result = ();

        fn handle(&mut self, msg: LiveUpdate, _: &mut Context<Self>) {
            self.0.lock().unwrap().push(msg.0);
        }
    }

    #[actix::test]
    async fn publishes_only_to_subscribers_of_that_microclimate() {
        let hub = MicroclimateHub::new().start();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let other = Arc::new(Mutex::new(Vec::new()));
        let watcher = Collector(seen.clone()).start().recipient();
        let bystander = Collector(other.clone()).start().recipient();

        hub.send(Subscribe { microclimate_id: "m1".into(), addr: watcher.clone() })
            .await
            .unwrap();
        hub.send(Subscribe { microclimate_id: "m2".into(), addr: bystander })
            .await
            .unwrap();
        hub.send(Publish { microclimate_id: "m1".into(), payload: "{\"n\":1}".into() })
            .await
            .unwrap();
        // Let the collectors drain their mailboxes.
        actix::clock::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(*seen.lock().unwrap(), vec!["{\"n\":1}".to_string()]);
        assert!(other.lock().unwrap().is_empty());

        hub.send(Unsubscribe { microclimate_id: "m1".into(), addr: watcher })
            .await
            .unwrap();
        let remaining = hub
            .send(SubscriberCount { microclimate_id: "m1".into() })
            .await
            .unwrap();
        assert_eq!(remaining, 0);
    }
}
