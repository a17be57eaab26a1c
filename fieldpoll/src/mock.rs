use std::collections::VecDeque;
use std::io::ErrorKind;
use std::sync::{Arc, Mutex};

use crate::decode::DecodeLevel;
use crate::error::RequestError;
use crate::link::{Request, Response, Transport};

/// Create a scripted transport and the handle that drives it
pub(crate) fn mock() -> (MockTransport, Handle) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let script = Arc::new(Mutex::new(Script::default()));
    let transport = MockTransport {
        script: script.clone(),
        events: tx,
    };
    (transport, Handle { script, events: rx })
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Event {
    Open,
    Exchange(Request),
    Close,
}

#[derive(Default)]
struct Script {
    open_failures: VecDeque<ErrorKind>,
    replies: VecDeque<Result<Response, RequestError>>,
}

pub(crate) struct MockTransport {
    script: Arc<Mutex<Script>>,
    events: tokio::sync::mpsc::UnboundedSender<Event>,
}

pub(crate) struct Handle {
    script: Arc<Mutex<Script>>,
    events: tokio::sync::mpsc::UnboundedReceiver<Event>,
}

impl Handle {
    /// Queue a successful reply to the next exchange
    pub(crate) fn respond(&self, response: Response) {
        self.script.lock().unwrap().replies.push_back(Ok(response));
    }

    /// Queue a failed reply to the next exchange
    pub(crate) fn fail(&self, err: RequestError) {
        self.script.lock().unwrap().replies.push_back(Err(err));
    }

    /// Fail the next open with this error kind
    pub(crate) fn fail_open(&self, kind: ErrorKind) {
        self.script.lock().unwrap().open_failures.push_back(kind);
    }

    pub(crate) async fn next_event(&mut self) -> Event {
        self.events.recv().await.unwrap()
    }

    /// Every event recorded so far
    pub(crate) fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(x) = self.events.try_recv() {
            events.push(x);
        }
        events
    }

    /// Only the requests recorded so far
    pub(crate) fn requests(&mut self) -> Vec<Request> {
        self.drain()
            .into_iter()
            .filter_map(|x| match x {
                Event::Exchange(x) => Some(x),
                _ => None,
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn open(&mut self) -> Result<(), RequestError> {
        self.events.send(Event::Open).ok();
        match self.script.lock().unwrap().open_failures.pop_front() {
            Some(kind) => Err(RequestError::Open(kind)),
            None => Ok(()),
        }
    }

    async fn exchange(
        &mut self,
        request: &Request,
        _decode: DecodeLevel,
    ) -> Result<Response, RequestError> {
        self.events.send(Event::Exchange(request.clone())).ok();
        let reply = self.script.lock().unwrap().replies.pop_front();
        match reply {
            Some(x) => x,
            // an unscripted device never answers
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {
        self.events.send(Event::Close).ok();
    }
}
