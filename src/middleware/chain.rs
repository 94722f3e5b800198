//! Continuation-passing execution of one request's middleware queue.
//!
//! A [`MiddlewareChain`] is built per request and never shared. Its state,
//! the deepest stage entered and the short-circuit slot, lives behind an
//! `Arc` that only the request's own [`Next`] values hold.
//!
//! ## Short-circuiting
//!
//! A stage short-circuits when it
//!
//! 1. returns a response without having called `next`,
//! 2. returns a finished response ([`Response::finish`], any [`Response::redirect`]), or
//! 3. calls [`Next::halt`].
//!
//! The first short-circuit wins. Every enclosing stage then sees
//! `Err(Interrupt::Halted)` from its `next.run(..)`, and whatever those stages
//! return afterwards is discarded: [`MiddlewareChain::dispatch`] reports the
//! short-circuit response.
//!
//! A finished response produced by the handler itself is not a short-circuit;
//! it travels back through the middleware like any other response.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::{Flow, Interrupt, MiddlewareHandler};
use crate::context::Context;
use crate::error::HandlerError;
use crate::http::Response;
use crate::router::Handler;

/// How a dispatched pipeline ended.
#[derive(Debug)]
pub enum ChainOutcome {
    /// The handler ran and its response travelled back through every stage.
    Completed(Response),
    /// Stage `stage` (0-based queue index) produced the response directly.
    ShortCircuited { stage: usize, response: Response },
}

impl ChainOutcome {
    pub fn into_response(self) -> Response {
        match self {
            Self::Completed(response) | Self::ShortCircuited { response, .. } => response,
        }
    }

    pub fn is_short_circuited(&self) -> bool {
        matches!(self, Self::ShortCircuited { .. })
    }
}

struct ChainState {
    stages: Vec<MiddlewareHandler>,
    endpoint: Handler,
    // One past the deepest stage index entered so far; the endpoint counts as
    // index `stages.len()`.
    deepest: AtomicUsize,
    endpoint_finished: AtomicBool,
    halted: Mutex<Option<(usize, Response)>>,
}

impl ChainState {
    fn enter(&self, index: usize) {
        self.deepest.fetch_max(index + 1, Ordering::AcqRel);
    }

    fn advanced_past(&self, index: usize) -> bool {
        self.deepest.load(Ordering::Acquire) > index + 1
    }

    fn is_halted(&self) -> bool {
        self.halted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn halt(&self, index: usize, response: Response) {
        let mut slot = self.halted.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            tracing::debug!(stage = index, status = %response.status(), "middleware short-circuited");
            *slot = Some((index, response));
        }
    }

    fn take_halt(&self) -> Option<(usize, Response)> {
        self.halted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    // Decide whether what stage `index` returned is a short-circuit.
    fn settle(&self, index: usize, flow: Flow) -> Flow {
        match flow {
            Ok(response)
                if !self.advanced_past(index)
                    || (ends_pipeline(&response)
                        && !self.endpoint_finished.load(Ordering::Acquire)) =>
            {
                self.halt(index, response);
                Err(Interrupt::Halted)
            }
            other => other,
        }
    }
}

// Finished responses and redirects (3xx with `Location`) stop the pipeline
// when a stage produces them.
fn ends_pipeline(response: &Response) -> bool {
    response.is_finished() || response.is_redirect()
}

/// Continuation into the rest of the pipeline.
///
/// `Next` is consumed by [`run`](Self::run) and [`halt`](Self::halt), so a
/// stage can advance the pipeline at most once.
pub struct Next {
    state: Arc<ChainState>,
    index: usize,
}

impl Next {
    /// Invoke the next stage, or the handler once the queue is exhausted.
    ///
    /// Returns `Err(Interrupt::Halted)` without running anything if the
    /// pipeline has already been short-circuited.
    pub async fn run(self, ctx: Context) -> Flow {
        let Next { state, index } = self;
        if state.is_halted() {
            return Err(Interrupt::Halted);
        }
        state.enter(index);

        match state.stages.get(index).cloned() {
            Some(stage) => {
                let next = Next {
                    state: Arc::clone(&state),
                    index: index + 1,
                };
                let flow = stage(ctx, next).await;
                state.settle(index, flow)
            }
            None => {
                let response = (state.endpoint)(ctx).await?;
                if ends_pipeline(&response) {
                    state.endpoint_finished.store(true, Ordering::Release);
                }
                Ok(response)
            }
        }
    }

    /// Stop the pipeline here and respond with `response`.
    pub fn halt(self, response: Response) -> Flow {
        self.state.halt(self.index.saturating_sub(1), response);
        Err(Interrupt::Halted)
    }

    /// Number of middleware stages still ahead of this continuation.
    pub fn remaining(&self) -> usize {
        self.state.stages.len().saturating_sub(self.index)
    }
}

/// One request's ordered middleware queue plus the resolved handler.
pub struct MiddlewareChain {
    state: Arc<ChainState>,
}

impl MiddlewareChain {
    pub fn new(stages: Vec<MiddlewareHandler>, endpoint: Handler) -> Self {
        Self {
            state: Arc::new(ChainState {
                stages,
                endpoint,
                deepest: AtomicUsize::new(0),
                endpoint_finished: AtomicBool::new(false),
                halted: Mutex::new(None),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.state.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.stages.is_empty()
    }

    /// Run the pipeline from the first stage.
    ///
    /// # Errors
    ///
    /// The [`HandlerError`] raised by a stage or the handler, unless some
    /// stage short-circuited first.
    pub async fn dispatch(self, ctx: Context) -> Result<ChainOutcome, HandlerError> {
        let first = Next {
            state: Arc::clone(&self.state),
            index: 0,
        };
        let flow = first.run(ctx).await;

        if let Some((stage, response)) = self.state.take_halt() {
            return Ok(ChainOutcome::ShortCircuited { stage, response });
        }
        match flow {
            Ok(response) => Ok(ChainOutcome::Completed(response)),
            Err(Interrupt::Failed(error)) => Err(error),
            Err(Interrupt::Halted) => Err(HandlerError::msg(
                "pipeline reported a halt without a response",
            )),
        }
    }
}
