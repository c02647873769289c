//! Splitting one response body into two independently consumable branches.
//!
//! The host page keeps one branch and sees exactly the original bytes; the
//! decoder reads the other. Whichever branch polls the source first queues a
//! copy of the chunk for its sibling, so neither branch can starve the other
//! and dropping one branch never stalls the survivor.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use chatwire_core::{Error, Result};
use futures::task::{waker_ref, ArcWake};
use futures::Stream;
use parking_lot::Mutex;

use crate::port::{Body, ByteStream, HttpResponse};

enum Item {
    Chunk(Vec<u8>),
    Failed(String),
}

impl Item {
    fn into_result(self) -> Result<Vec<u8>> {
        match self {
            Item::Chunk(bytes) => Ok(bytes),
            Item::Failed(msg) => Err(Error::Stream(msg)),
        }
    }
}

struct Shared {
    source: Option<ByteStream>,
    queues: [VecDeque<Item>; 2],
    closed: [bool; 2],
}

/// Wakes every branch currently waiting on the shared source.
struct FanoutWaker {
    slots: Mutex<[Option<Waker>; 2]>,
}

impl FanoutWaker {
    fn wake_slot(&self, idx: usize) {
        if let Some(waker) = self.slots.lock()[idx].take() {
            waker.wake();
        }
    }
}

impl ArcWake for FanoutWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        let wakers: Vec<Waker> = arc_self.slots.lock().iter_mut().filter_map(Option::take).collect();
        for waker in wakers {
            waker.wake();
        }
    }
}

/// One side of a teed body.
pub struct TeeBranch {
    idx: usize,
    shared: Arc<Mutex<Shared>>,
    fanout: Arc<FanoutWaker>,
}

/// Split `source` into two branches yielding the same chunks in the same order.
pub fn tee(source: ByteStream) -> (TeeBranch, TeeBranch) {
    let shared = Arc::new(Mutex::new(Shared {
        source: Some(source),
        queues: [VecDeque::new(), VecDeque::new()],
        closed: [false, false],
    }));
    let fanout = Arc::new(FanoutWaker {
        slots: Mutex::new([None, None]),
    });
    (
        TeeBranch {
            idx: 0,
            shared: shared.clone(),
            fanout: fanout.clone(),
        },
        TeeBranch {
            idx: 1,
            shared,
            fanout,
        },
    )
}

impl Stream for TeeBranch {
    type Item = Result<Vec<u8>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let idx = this.idx;
        let other = 1 - idx;
        let mut shared = this.shared.lock();

        if let Some(item) = shared.queues[idx].pop_front() {
            return Poll::Ready(Some(item.into_result()));
        }

        this.fanout.slots.lock()[idx] = Some(cx.waker().clone());
        let waker = waker_ref(&this.fanout);
        let mut fan_cx = Context::from_waker(&waker);

        let polled = match shared.source.as_mut() {
            Some(source) => source.as_mut().poll_next(&mut fan_cx),
            None => return Poll::Ready(None),
        };

        match polled {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(chunk))) => {
                if !shared.closed[other] {
                    shared.queues[other].push_back(Item::Chunk(chunk.clone()));
                }
                drop(shared);
                this.fanout.wake_slot(other);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                let msg = e.to_string();
                if !shared.closed[other] {
                    shared.queues[other].push_back(Item::Failed(msg.clone()));
                }
                drop(shared);
                this.fanout.wake_slot(other);
                Poll::Ready(Some(Err(Error::Stream(msg))))
            }
            Poll::Ready(None) => {
                shared.source = None;
                drop(shared);
                this.fanout.wake_slot(other);
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for TeeBranch {
    fn drop(&mut self) {
        let mut shared = self.shared.lock();
        shared.closed[self.idx] = true;
        shared.queues[self.idx].clear();
        let both_closed = shared.closed.iter().all(|c| *c);
        if both_closed {
            shared.source = None;
        }
        drop(shared);
        self.fanout.slots.lock()[self.idx] = None;
        // The survivor may be parked on a waker only this branch registered.
        self.fanout.wake_slot(1 - self.idx);
    }
}

/// Give the caller its own copy of the response body, leaving the response
/// itself fully consumable with identical bytes.
pub fn clone_body(response: &mut HttpResponse) -> ByteStream {
    match std::mem::replace(&mut response.body, Body::Full(Vec::new())) {
        Body::Full(bytes) => {
            let copy = bytes.clone();
            response.body = Body::Full(bytes);
            Box::pin(futures::stream::once(async move { Ok(copy) }))
        }
        Body::Stream(original) => {
            let (host, ours) = tee(original);
            response.body = Body::Stream(Box::pin(host));
            Box::pin(ours)
        }
    }
}
