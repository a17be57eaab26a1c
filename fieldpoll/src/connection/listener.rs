/// A generic listener type that can be invoked multiple times
pub trait Listener<T>: Send {
    /// inform the listener that the value has changed
    fn update(&mut self, _value: T) -> MaybeAsync<()> {
        MaybeAsync::ready(())
    }
}

/// Listener that does nothing
#[derive(Copy, Clone)]
pub(crate) struct NullListener;

impl NullListener {
    /// create a Box<dyn Listener<T>> that does nothing
    pub(crate) fn create<T>() -> Box<dyn Listener<T>> {
        Box::new(NullListener)
    }
}

impl<T> Listener<T> for NullListener {}

/// Forwards every value into an unbounded channel
impl<T> Listener<T> for tokio::sync::mpsc::UnboundedSender<T>
where
    T: Send,
{
    fn update(&mut self, value: T) -> MaybeAsync<()> {
        // a receiver that went away only stops observing
        self.send(value).ok();
        MaybeAsync::ready(())
    }
}

/// State of the physical link of a connection
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LinkState {
    /// transport is closed, it opens on the next transaction
    Closed,
    /// transport is open
    Open,
    /// the last attempt to open the transport failed
    OpenFailed,
    /// the connection has been shut down
    Shutdown,
}

/// Completion of a [`Listener::update`]
///
/// Listeners that only push into a channel or a map complete immediately and do not
/// pay for a boxed future on every emitted sample. Listeners that must await, such as a
/// bounded channel send, return [`MaybeAsync::asynchronous`].
#[must_use]
pub struct MaybeAsync<T> {
    inner: Completion<T>,
}

enum Completion<T> {
    Ready(T),
    Deferred(std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'static>>),
}

impl<T> MaybeAsync<T> {
    /// Value that is available immediately
    pub fn ready(value: T) -> Self {
        Self {
            inner: Completion::Ready(value),
        }
    }

    /// Value produced by a future
    pub fn asynchronous<F>(future: F) -> Self
    where
        F: std::future::Future<Output = T> + Send + 'static,
    {
        Self {
            inner: Completion::Deferred(Box::pin(future)),
        }
    }

    /// Wait for the value
    pub async fn get(self) -> T {
        match self.inner {
            Completion::Ready(x) => x,
            Completion::Deferred(x) => x.await,
        }
    }
}
