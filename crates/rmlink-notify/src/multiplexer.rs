//! Subscription multiplexing.
//!
//! Many local subscribers share one upstream subscription per
//! `(kind, attribute)`. The robot is told to start a stream when the first
//! subscriber arrives and to stop it when the last one leaves; the side
//! channel that carries notifications runs while any subscription exists.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use tracing::{debug, error, info, warn};

use crate::error::{NotifyError, Result};

/// Handle identifying one subscriber within a `(kind, attribute)` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(usize);

impl Token {
    pub fn new(value: usize) -> Self {
        Self(value)
    }

    pub fn value(self) -> usize {
        self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Subscriber callback.
pub type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// The upstream half of a notification plane.
///
/// `enable`/`disable` tell the robot to start or stop producing one stream.
/// `start` opens the side channel and feeds everything it receives into the
/// given [`Dispatcher`]; `stop` closes it again.
pub trait Plane: Sized + Send + Sync + 'static {
    type Kind: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;
    type Attribute: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;
    type Params: fmt::Debug + ?Sized;
    type Payload: Send + Sync + 'static;

    fn enable(
        &self,
        kind: &Self::Kind,
        attribute: &Self::Attribute,
        params: Option<&Self::Params>,
    ) -> Result<()>;

    fn disable(&self, kind: &Self::Kind, attribute: &Self::Attribute) -> Result<()>;

    fn start(&self, dispatcher: Dispatcher<Self>) -> Result<()>;

    fn stop(&self);
}

type Subscribers<P> = BTreeMap<Token, Handler<<P as Plane>::Payload>>;
type HandlerMap<P> =
    HashMap<<P as Plane>::Kind, HashMap<<P as Plane>::Attribute, Subscribers<P>>>;

/// Delivers side channel notifications to subscribers.
///
/// Holds the handler table weakly so a plane keeping its dispatcher alive
/// does not keep the multiplexer alive.
pub struct Dispatcher<P: Plane> {
    handlers: Weak<RwLock<HandlerMap<P>>>,
}

impl<P: Plane> Clone for Dispatcher<P> {
    fn clone(&self) -> Self {
        Self {
            handlers: Weak::clone(&self.handlers),
        }
    }
}

impl<P: Plane> fmt::Debug for Dispatcher<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("attached", &(self.handlers.strong_count() > 0))
            .finish()
    }
}

impl<P: Plane> Dispatcher<P> {
    /// Invoke every subscriber of `(kind, attribute)` with `payload`.
    ///
    /// Returns how many handlers ran. A panicking handler is logged and does
    /// not prevent the others from running.
    pub fn dispatch(&self, kind: &P::Kind, attribute: &P::Attribute, payload: &P::Payload) -> usize {
        let Some(handlers) = self.handlers.upgrade() else {
            return 0;
        };
        let table = read(&handlers);
        let Some(subscribers) = table.get(kind).and_then(|attrs| attrs.get(attribute)) else {
            debug!(?kind, ?attribute, "no subscriber for notification");
            return 0;
        };
        for (token, handler) in subscribers {
            if catch_unwind(AssertUnwindSafe(|| handler(payload))).is_err() {
                error!(?kind, ?attribute, %token, "subscriber panicked");
            }
        }
        subscribers.len()
    }
}

/// Shares upstream subscriptions between local subscribers.
pub struct Multiplexer<P: Plane> {
    plane: P,
    handlers: Arc<RwLock<HandlerMap<P>>>,
    // Serialises subscribe and unsubscribe, including their upstream round
    // trips. Dispatch never takes it.
    control: Mutex<bool>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn lowest_unused<P: Plane>(subscribers: Option<&Subscribers<P>>) -> Token {
    let Some(subscribers) = subscribers else {
        return Token(0);
    };
    let mut candidate = 0;
    for token in subscribers.keys() {
        if token.0 != candidate {
            break;
        }
        candidate += 1;
    }
    Token(candidate)
}

impl<P: Plane> Multiplexer<P> {
    pub fn new(plane: P) -> Self {
        Self {
            plane,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            control: Mutex::new(false),
        }
    }

    pub fn plane(&self) -> &P {
        &self.plane
    }

    /// A dispatcher feeding this multiplexer's subscribers.
    pub fn dispatcher(&self) -> Dispatcher<P> {
        Dispatcher {
            handlers: Arc::downgrade(&self.handlers),
        }
    }

    /// Add a subscriber to `(kind, attribute)`.
    ///
    /// The first subscriber of a key enables it upstream with `params`; later
    /// subscribers share that stream and their `params` are ignored. The
    /// first subscription overall also starts the side channel.
    ///
    /// A robot refusal is `UpstreamRejected`; transport and session failures
    /// are returned as they are, and nothing is registered in either case.
    ///
    /// Handlers run on the plane's reader thread. For the binary plane that
    /// is the session receive thread, so a handler must not block on a
    /// session round trip (`send_sync`, `call`) or re-enter
    /// `subscribe`/`unsubscribe`: the reply it waits for can only be
    /// delivered by the thread it is blocking. Hand such work to another
    /// thread.
    pub fn subscribe<F>(
        &self,
        kind: P::Kind,
        attribute: P::Attribute,
        params: Option<&P::Params>,
        handler: F,
    ) -> Result<Token>
    where
        F: Fn(&P::Payload) + Send + Sync + 'static,
    {
        let mut channel_open = lock(&self.control);

        let (first, token) = {
            let table = read(&self.handlers);
            let subscribers = table.get(&kind).and_then(|attrs| attrs.get(&attribute));
            (
                subscribers.map_or(true, BTreeMap::is_empty),
                lowest_unused::<P>(subscribers),
            )
        };

        if first {
            if let Err(err) = self.plane.enable(&kind, &attribute, params) {
                warn!(?kind, ?attribute, %err, "enable failed");
                return Err(err);
            }
            info!(?kind, ?attribute, ?params, "enabled upstream");
        }

        if !*channel_open {
            if let Err(err) = self.plane.start(self.dispatcher()) {
                warn!(%err, "side channel failed to start");
                if first {
                    if let Err(err) = self.plane.disable(&kind, &attribute) {
                        debug!(%err, "rollback disable failed");
                    }
                }
                return Err(err);
            }
            *channel_open = true;
            debug!("side channel started");
        }

        let mut table = write(&self.handlers);
        let subscribers = table
            .entry(kind.clone())
            .or_default()
            .entry(attribute.clone())
            .or_default();
        if subscribers.contains_key(&token) {
            return Err(NotifyError::DuplicateSubscription(token));
        }
        subscribers.insert(token, Arc::new(handler));
        debug!(?kind, ?attribute, %token, "subscribed");
        Ok(token)
    }

    /// Remove a subscriber.
    ///
    /// The last subscriber of a key disables it upstream. When nothing is
    /// subscribed any more the side channel is stopped. The subscriber is
    /// removed even when the upstream "off" fails.
    pub fn unsubscribe(&self, kind: &P::Kind, attribute: &P::Attribute, token: Token) -> Result<()> {
        let mut channel_open = lock(&self.control);

        let (last, none_left) = {
            let mut table = write(&self.handlers);
            let attrs = table.get_mut(kind).ok_or(NotifyError::UnknownToken(token))?;
            let subscribers = attrs
                .get_mut(attribute)
                .ok_or(NotifyError::UnknownToken(token))?;
            subscribers
                .remove(&token)
                .ok_or(NotifyError::UnknownToken(token))?;
            let last = subscribers.is_empty();
            if last {
                attrs.remove(attribute);
                if attrs.is_empty() {
                    table.remove(kind);
                }
            }
            (last, table.is_empty())
        };
        debug!(?kind, ?attribute, %token, "unsubscribed");

        let mut outcome = Ok(());
        if last {
            match self.plane.disable(kind, attribute) {
                Ok(()) => info!(?kind, ?attribute, "disabled upstream"),
                Err(err) => {
                    warn!(?kind, ?attribute, %err, "disable failed");
                    outcome = Err(err);
                }
            }
        }

        if none_left && *channel_open {
            self.plane.stop();
            *channel_open = false;
            debug!("side channel stopped");
        }
        outcome
    }

    /// Drop every subscriber, disabling each key upstream.
    pub fn clear(&self) {
        let mut channel_open = lock(&self.control);
        let keys: Vec<(P::Kind, P::Attribute)> = {
            let mut table = write(&self.handlers);
            table
                .drain()
                .flat_map(|(kind, attrs)| attrs.into_keys().map(move |attr| (kind.clone(), attr)))
                .collect()
        };
        for (kind, attribute) in keys {
            if let Err(err) = self.plane.disable(&kind, &attribute) {
                debug!(?kind, ?attribute, %err, "disable failed during clear");
            }
        }
        if *channel_open {
            self.plane.stop();
            *channel_open = false;
        }
    }

    /// Number of subscribers of `(kind, attribute)`.
    pub fn subscriber_count(&self, kind: &P::Kind, attribute: &P::Attribute) -> usize {
        read(&self.handlers)
            .get(kind)
            .and_then(|attrs| attrs.get(attribute))
            .map_or(0, BTreeMap::len)
    }

    /// Whether `(kind, attribute)` is currently enabled upstream.
    pub fn is_active(&self, kind: &P::Kind, attribute: &P::Attribute) -> bool {
        self.subscriber_count(kind, attribute) > 0
    }

    /// Whether the side channel is running.
    pub fn is_listening(&self) -> bool {
        *lock(&self.control)
    }

    /// Deliver a notification as if it had arrived on the side channel.
    pub fn dispatch(&self, kind: &P::Kind, attribute: &P::Attribute, payload: &P::Payload) -> usize {
        self.dispatcher().dispatch(kind, attribute, payload)
    }
}

impl<P: Plane> Drop for Multiplexer<P> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<P: Plane + fmt::Debug> fmt::Debug for Multiplexer<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys = read(&self.handlers).values().map(HashMap::len).sum::<usize>();
        f.debug_struct("Multiplexer")
            .field("plane", &self.plane)
            .field("keys", &keys)
            .finish()
    }
}
