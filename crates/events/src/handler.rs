//! Handler descriptors and the handler extraction contract.
//!
//! The bus does not discover handlers by itself. A listener describes its
//! handlers when it is subscribed, either by implementing [`Subscriber`] or by
//! passing an extraction closure to `EventBus::subscribe_with`. Each registered
//! handler becomes one immutable [`HandlerDescriptor`].

use std::any::Any;
use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use herald_core::{Event, EventType, HandlerId, SubscriptionId, TypeKey};

use crate::error::SubscribeError;
use crate::source::EventSource;

/// Type-erased listener as stored by the bus.
pub type Listener = dyn Any + Send + Sync;

type Invoker =
    dyn Fn(&Listener, &dyn Event, &EventSource) -> anyhow::Result<Reply> + Send + Sync;

/// A value returned by a handler.
#[derive(Clone)]
pub struct Reply(Arc<dyn Any + Send + Sync>);

impl Reply {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is::<()>() {
            f.write_str("Reply(())")
        } else {
            f.write_str("Reply(..)")
        }
    }
}

/// Identity of a listener: the address of its `Arc` allocation.
///
/// Compared by identity, never by value. Holding a key does not keep the
/// listener alive.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ListenerKey(usize);

impl ListenerKey {
    pub fn of<L: ?Sized>(listener: &Arc<L>) -> Self {
        Self(Arc::as_ptr(listener) as *const () as usize)
    }
}

/// One (listener, invocation, event type) binding.
///
/// Created once per handler at subscribe time and immutable afterwards. The
/// listener is referenced weakly: a descriptor never keeps its listener alive.
pub struct HandlerDescriptor {
    id: HandlerId,
    listener_key: ListenerKey,
    listener: Weak<Listener>,
    event_type: TypeKey,
    wants_source: bool,
    invoke: Box<Invoker>,
}

impl HandlerDescriptor {
    pub fn id(&self) -> &HandlerId {
        &self.id
    }

    /// Declared event type; matches events whose ancestor set contains it.
    pub fn event_type(&self) -> TypeKey {
        self.event_type
    }

    pub fn listener_key(&self) -> ListenerKey {
        self.listener_key
    }

    /// Resolve the weak listener reference. `None` once the listener is dropped.
    pub fn listener(&self) -> Option<Arc<Listener>> {
        self.listener.upgrade()
    }

    pub fn is_alive(&self) -> bool {
        self.listener.strong_count() > 0
    }

    /// Whether the handler asked for the event source.
    pub fn wants_source(&self) -> bool {
        self.wants_source
    }

    pub(crate) fn invoke(
        &self,
        listener: &Listener,
        event: &dyn Event,
        source: &EventSource,
    ) -> anyhow::Result<Reply> {
        (self.invoke)(listener, event, source)
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("id", &self.id)
            .field("event_type", &self.event_type)
            .field("wants_source", &self.wants_source)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Handler extraction for a listener type.
///
/// Implementors register each handler on the provided [`HandlerSet`]. Returning
/// an error rejects the subscription as a whole.
///
/// ```ignore
/// struct Audit;
///
/// impl Subscriber for Audit {
///     fn handlers(&self, set: &mut HandlerSet<Self>) -> Result<(), SubscribeError> {
///         set.on::<AnyEvent, _, _>("record", |audit, event| audit.record(event));
///         Ok(())
///     }
/// }
///
/// let audit = Arc::new(Audit);
/// bus.subscribe(&audit)?;
/// ```
pub trait Subscriber: Send + Sync + Sized + 'static {
    fn handlers(&self, set: &mut HandlerSet<Self>) -> Result<(), SubscribeError>;
}

/// Builder collecting the handlers of one listener for one subscription.
pub struct HandlerSet<L> {
    subscription: SubscriptionId,
    listener_key: ListenerKey,
    listener: Weak<Listener>,
    handlers: Vec<Arc<HandlerDescriptor>>,
    names: HashSet<Cow<'static, str>>,
    error: Option<SubscribeError>,
    _listener: PhantomData<fn(&L)>,
}

impl<L> HandlerSet<L>
where
    L: Send + Sync + 'static,
{
    pub(crate) fn new(listener: &Arc<L>) -> Self {
        let weak: Weak<L> = Arc::downgrade(listener);
        let weak: Weak<Listener> = weak;
        Self {
            subscription: SubscriptionId::new(),
            listener_key: ListenerKey::of(listener),
            listener: weak,
            handlers: Vec::new(),
            names: HashSet::new(),
            error: None,
            _listener: PhantomData,
        }
    }

    /// Register a handler for events of type `E` (or any subtype of it).
    pub fn on<E, R, F>(&mut self, name: impl Into<Cow<'static, str>>, handler: F) -> &mut Self
    where
        E: EventType,
        R: Any + Send + Sync,
        F: Fn(&L, &dyn Event) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        self.push(
            name.into(),
            TypeKey::of::<E>(),
            false,
            Box::new(
                move |listener: &Listener,
                      event: &dyn Event,
                      _source: &EventSource|
                      -> anyhow::Result<Reply> {
                    let listener = downcast_listener::<L>(listener)?;
                    handler(listener, event).map(Reply::new)
                },
            ),
        )
    }

    /// Register a handler that also receives the [`EventSource`] the event was
    /// published on.
    pub fn on_with_source<E, R, F>(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        handler: F,
    ) -> &mut Self
    where
        E: EventType,
        R: Any + Send + Sync,
        F: Fn(&L, &dyn Event, &EventSource) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        self.push(
            name.into(),
            TypeKey::of::<E>(),
            true,
            Box::new(
                move |listener: &Listener,
                      event: &dyn Event,
                      source: &EventSource|
                      -> anyhow::Result<Reply> {
                    let listener = downcast_listener::<L>(listener)?;
                    handler(listener, event, source).map(Reply::new)
                },
            ),
        )
    }

    pub fn subscription_id(&self) -> SubscriptionId {
        self.subscription
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn push(
        &mut self,
        name: Cow<'static, str>,
        event_type: TypeKey,
        wants_source: bool,
        invoke: Box<Invoker>,
    ) -> &mut Self {
        if self.error.is_some() {
            return self;
        }
        if !self.names.insert(name.clone()) {
            self.error = Some(SubscribeError::DuplicateHandler {
                listener: core::any::type_name::<L>(),
                handler: name.into_owned(),
            });
            return self;
        }

        self.handlers.push(Arc::new(HandlerDescriptor {
            id: HandlerId::new(self.subscription, core::any::type_name::<L>(), name),
            listener_key: self.listener_key,
            listener: self.listener.clone(),
            event_type,
            wants_source,
            invoke,
        }));
        self
    }

    pub(crate) fn finish(self) -> Result<ExtractedHandlers, SubscribeError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok(ExtractedHandlers {
            subscription: self.subscription,
            listener_key: self.listener_key,
            listener: self.listener,
            handlers: self.handlers,
        })
    }
}

/// Output of a successful extraction, ready to be indexed by the registry.
pub(crate) struct ExtractedHandlers {
    pub(crate) subscription: SubscriptionId,
    pub(crate) listener_key: ListenerKey,
    pub(crate) listener: Weak<Listener>,
    pub(crate) handlers: Vec<Arc<HandlerDescriptor>>,
}

fn downcast_listener<L: Any>(listener: &Listener) -> anyhow::Result<&L> {
    listener.downcast_ref::<L>().ok_or_else(|| {
        anyhow::anyhow!(
            "listener is not a {} (handler bound to the wrong listener type)",
            core::any::type_name::<L>()
        )
    })
}
