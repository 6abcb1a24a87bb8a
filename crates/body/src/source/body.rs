use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::task::AtomicWaker;
use http_body::{Body, Frame, SizeHint};

use crate::executor::ExecutionMode;
use crate::handler::BodyDataHandler;
use crate::protocol::BodyError;
use crate::source::{Available, NonBlockingBodySource};
use crate::utils;

#[derive(Debug, Default)]
struct WakeOnData {
    waker: AtomicWaker,
}

impl BodyDataHandler for WakeOnData {
    fn on_data(&self, _source: &NonBlockingBodySource) -> Result<(), BodyError> {
        self.waker.wake();
        Ok(())
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Unsynchronized
    }
}

/// An [`http_body::Body`] reading from a [`NonBlockingBodySource`].
///
/// Each frame carries everything buffered at the time of polling.
#[derive(Debug)]
pub struct SourceBody {
    source: Arc<NonBlockingBodySource>,
    wake: Arc<WakeOnData>,
}

impl SourceBody {
    /// Takes over the data handler of `source`.
    pub fn new(source: Arc<NonBlockingBodySource>) -> Self {
        let wake = Arc::new(WakeOnData::default());
        source.set_data_handler(Some(Arc::clone(&wake) as Arc<dyn BodyDataHandler>));
        Self { source, wake }
    }

    pub fn source(&self) -> &Arc<NonBlockingBodySource> {
        &self.source
    }
}

impl Body for SourceBody {
    type Data = Bytes;
    type Error = BodyError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        // register first, so data appended after the check still wakes us
        self.wake.waker.register(cx.waker());

        match self.source.available() {
            Err(e) => Poll::Ready(Some(Err(e))),
            Ok(Available::EndOfStream) => Poll::Ready(None),
            Ok(Available::Data(0)) => Poll::Pending,
            Ok(Available::Data(_)) => {
                let frame = self.source.read_available().map(|ranges| Frame::data(utils::merge(ranges)));
                Poll::Ready(Some(frame))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        matches!(self.source.available(), Ok(Available::EndOfStream))
    }

    fn size_hint(&self) -> SizeHint {
        match self.source.header().content_length() {
            Some(length) => SizeHint::with_exact(length.saturating_sub(self.source.bytes_received()) + self.source.size() as u64),
            None => SizeHint::default(),
        }
    }
}

impl Drop for SourceBody {
    fn drop(&mut self) {
        self.source.remove_data_handler(&self.wake);
    }
}
