use std::{
    any::{type_name, Any, TypeId},
    collections::HashMap,
    marker::PhantomData,
    sync::{
        mpsc::{channel, Receiver, Sender, TryRecvError},
        Arc,
    },
};

use thiserror::Error;

type Message = Arc<dyn Any + Send + Sync + 'static>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicError {
    #[error("topic '{topic}' already claimed by type '{claimed}', but requested type is '{requested}'")]
    TypeMismatch {
        topic: String,
        claimed: &'static str,
        requested: &'static str,
    },
}

/// A simple publish/subscribe system that allows sending and subscribing to values on different topics.
/// Each topic name is allocated to a single type, attempts to subscribe and publish to the same topic with
/// different types will panic!
///
/// Publishers may live on other threads; values are handed over as complete `Arc`s so a
/// subscriber never observes a partially written value.
#[derive(Default)]
pub struct PubSub {
    topics: HashMap<String, Topic>,
}

struct Topic {
    value_type: TypeId,
    value_name: &'static str,
    incoming_sender: Sender<Message>,
    incoming_recv: Receiver<Message>,
    outgoing: Vec<Sender<Message>>,
}

impl Topic {
    fn new<T: Any + Send + Sync + 'static>() -> Self {
        // create the channel where items will be sent to when published
        let (send, recv) = channel();

        Self {
            value_type: TypeId::of::<T>(),
            value_name: type_name::<T>(),
            incoming_sender: send,
            incoming_recv: recv,
            outgoing: Vec::new(),
        }
    }
}

pub struct Subscription<T: Any + Send + Sync + 'static> {
    topic: String,
    receiver: Receiver<Message>,
    _phantom: PhantomData<T>,
}

impl<T: Any + Send + Sync + 'static> Subscription<T> {
    /// Tries to receive a value from the subscribed topic, but will not block if no data is available.
    pub fn try_recv(&mut self) -> Option<Arc<T>> {
        match self.receiver.try_recv() {
            // the topic type is checked when subscribing, so the downcast only fails if
            // that invariant is broken
            Ok(value) => value.downcast::<T>().ok(),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                tracing::warn!("subscription to '{}' disconnected", self.topic);
                None
            }
        }
    }

    /// Drains everything currently queued and returns only the most recent value, if any.
    pub fn latest(&mut self) -> Option<Arc<T>> {
        let mut latest = None;
        while let Some(value) = self.try_recv() {
            latest = Some(value);
        }
        latest
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[derive(Clone)]
pub struct Publisher<T: Any + Send + Sync + 'static> {
    topic: String,
    send: Sender<Message>,
    _p: PhantomData<T>,
}

impl<T: Any + Send + Sync + 'static> Publisher<T> {
    /// Publishes a value wrapped in an `Arc` to the topic. The value is delivered to
    /// subscribers on the next call to [`PubSub::tick`].
    pub fn publish(&mut self, value: Arc<T>) {
        if self.send.send(value).is_err() {
            tracing::warn!("publishing to '{}' failed, bus is gone", self.topic);
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_topic_by_name_or_insert<T: Any + Send + Sync + 'static>(
        &mut self,
        topic: &str,
    ) -> Result<&mut Topic, TopicError> {
        let t = self
            .topics
            .entry(topic.into())
            .or_insert_with(Topic::new::<T>);

        // make sure this topic was not previously claimed with a different type.
        if t.value_type != TypeId::of::<T>() {
            return Err(TopicError::TypeMismatch {
                topic: topic.to_owned(),
                claimed: t.value_name,
                requested: type_name::<T>(),
            });
        }

        Ok(t)
    }

    /// Register as a publisher of the specific type to the topic name. Fails if the topic has
    /// already been allocated to values of a different type.
    pub fn try_publish<T: Any + Send + Sync + 'static>(
        &mut self,
        topic: &str,
    ) -> Result<Publisher<T>, TopicError> {
        let t = self.get_topic_by_name_or_insert::<T>(topic)?;

        Ok(Publisher {
            topic: topic.to_string(),
            send: t.incoming_sender.clone(),
            _p: PhantomData,
        })
    }

    /// Subscribe to messages of the specific type on the topic name. Fails if the topic has
    /// already been allocated to values of a different type.
    pub fn try_subscribe<T: Any + Send + Sync + 'static>(
        &mut self,
        topic: &str,
    ) -> Result<Subscription<T>, TopicError> {
        let t = self.get_topic_by_name_or_insert::<T>(topic)?;

        // create a channel for receiving the published messages
        let (send, recv) = channel();

        t.outgoing.push(send);

        Ok(Subscription {
            topic: topic.to_owned(),
            receiver: recv,
            _phantom: PhantomData,
        })
    }

    /// Like [`try_publish`](Self::try_publish), but panics on a type mismatch. For wiring that is
    /// fixed in code.
    pub fn publish<T: Any + Send + Sync + 'static>(&mut self, topic: &str) -> Publisher<T> {
        self.try_publish(topic).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Like [`try_subscribe`](Self::try_subscribe), but panics on a type mismatch.
    pub fn subscribe<T: Any + Send + Sync + 'static>(&mut self, topic: &str) -> Subscription<T> {
        self.try_subscribe(topic).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Processes and distributes messages to all subscribers. Subscribers that have been
    /// dropped are removed from their topic.
    pub fn tick(&mut self) {
        for (name, t) in self.topics.iter_mut() {
            // read all the incoming messages and distribute them by cloning the Arc's
            while let Ok(v) = t.incoming_recv.try_recv() {
                t.outgoing.retain(|s| s.send(v.clone()).is_ok());
            }

            if t.outgoing.is_empty() {
                tracing::trace!("topic '{name}' has no subscribers");
            }
        }
    }
}
