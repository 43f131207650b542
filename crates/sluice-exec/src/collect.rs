//! Implicit terminal for pipelines that end in events or bytes.

use tokio::sync::mpsc;

use sluice_core::element::Element;
use sluice_operators::{ControlPlane, Generator, Input, OpResult, Pull, Resume};

pub const COLLECT: &str = "collect";

/// Forwards every element it pulls to the executor. Stateless for
/// checkpointing: a resumed run returns only what it produced itself.
pub struct Collector {
    tx: mpsc::UnboundedSender<Element>,
}

impl Collector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Element>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Generator for Collector {
    fn resume(&mut self, input: &mut dyn Input, _ctrl: &mut dyn ControlPlane) -> OpResult<Resume> {
        loop {
            match input.try_next() {
                Pull::Item(element) => {
                    let _ = self.tx.send(element);
                }
                Pull::Empty => return Ok(Resume::NeedInput),
                Pull::Closed => return Ok(Resume::Done),
            }
        }
    }

    fn snapshot(&self) -> OpResult<Option<Vec<u8>>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use sluice_operators::NoInput;

    struct Once(Option<Element>, bool);

    impl Input for Once {
        fn try_next(&mut self) -> Pull {
            match self.0.take() {
                Some(e) => Pull::Item(e),
                None if self.1 => Pull::Closed,
                None => Pull::Empty,
            }
        }
    }

    #[test]
    fn forwards_until_closed() {
        let (mut collector, mut rx) = Collector::new();
        let mut ctrl = crate::testing::null_control();
        let mut input = Once(Some(Element::Bytes(Bytes::from_static(b"a"))), false);
        assert!(matches!(
            collector.resume(&mut input, &mut ctrl).unwrap(),
            Resume::NeedInput
        ));
        assert!(matches!(
            collector.resume(&mut NoInput, &mut ctrl).unwrap(),
            Resume::Done
        ));
        assert!(matches!(rx.try_recv(), Ok(Element::Bytes(_))));
        assert!(rx.try_recv().is_err());
    }
}
