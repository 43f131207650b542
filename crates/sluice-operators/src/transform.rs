//! Helper for element-at-a-time operators.
//!
//! Most transformations and sinks react to one input element at a time and
//! produce zero or more outputs. They implement [`Transform`] and get wrapped
//! in a [`Transformer`], which owns the output queue and the generator state
//! machine: queued outputs are yielded first, input is pulled only when the
//! queue is empty, and `finish` runs exactly once when upstream closes.

use std::collections::VecDeque;

use sluice_core::element::Element;

use crate::traits::{ControlPlane, Generator, Input, OpError, OpResult, Pull, Resume};

/// Output queue handed to [`Transform`] callbacks. Stalls are dropped.
pub struct Emitter<'a> {
    queue: &'a mut VecDeque<Element>,
}

impl Emitter<'_> {
    pub fn push(&mut self, element: impl Into<Element>) {
        let element = element.into();
        if !element.is_stall() {
            self.queue.push_back(element);
        }
    }
}

pub trait Transform: Send {
    fn process(
        &mut self,
        element: Element,
        out: &mut Emitter<'_>,
        ctrl: &mut dyn ControlPlane,
    ) -> OpResult<()>;

    /// Upstream closed.
    fn finish(&mut self, _out: &mut Emitter<'_>, _ctrl: &mut dyn ControlPlane) -> OpResult<()> {
        Ok(())
    }

    /// No further input wanted; the sequence ends once queued output drains.
    fn is_done(&self) -> bool {
        false
    }

    fn snapshot(&self) -> OpResult<Option<Vec<u8>>> {
        Ok(None)
    }

    fn restore(&mut self, _state: &[u8]) -> OpResult<()> {
        Err(OpError::Checkpoint(
            "operator has no resumable state".into(),
        ))
    }
}

pub struct Transformer<T> {
    inner: T,
    pending: VecDeque<Element>,
    finished: bool,
}

impl<T: Transform + 'static> Transformer<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            pending: VecDeque::new(),
            finished: false,
        }
    }

    pub fn boxed(inner: T) -> Box<dyn Generator> {
        Box::new(Self::new(inner))
    }
}

impl<T: Transform> Generator for Transformer<T> {
    fn resume(&mut self, input: &mut dyn Input, ctrl: &mut dyn ControlPlane) -> OpResult<Resume> {
        loop {
            if let Some(element) = self.pending.pop_front() {
                return Ok(Resume::Yield(element));
            }
            if self.finished {
                return Ok(Resume::Done);
            }
            if self.inner.is_done() {
                self.finished = true;
                continue;
            }
            let mut out = Emitter {
                queue: &mut self.pending,
            };
            match input.try_next() {
                Pull::Item(element) => self.inner.process(element, &mut out, ctrl)?,
                Pull::Empty => return Ok(Resume::NeedInput),
                Pull::Closed => {
                    self.inner.finish(&mut out, ctrl)?;
                    self.finished = true;
                }
            }
        }
    }

    fn snapshot(&self) -> OpResult<Option<Vec<u8>>> {
        if !self.pending.is_empty() {
            return Err(OpError::Checkpoint(
                "snapshot requested with undelivered output".into(),
            ));
        }
        self.inner.snapshot()
    }

    fn restore(&mut self, state: &[u8]) -> OpResult<()> {
        self.inner.restore(state)
    }
}
