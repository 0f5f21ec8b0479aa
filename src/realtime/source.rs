use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendError, Sender, TrySendError};

use crate::error::DecodeError;
use crate::models::{Event, EventDecoder, RawEvent};

/// poll 한 번의 결과
#[derive(Debug, Clone, PartialEq)]
pub enum SourcePoll {
    Event(Event),
    Malformed(DecodeError),
    /// timeout 안에 이벤트가 없음
    Idle,
    /// 더 이상 이벤트가 오지 않음 (생산자 종료, 파일 끝)
    Exhausted,
}

/// 세션이 소비하는 이벤트 소스. poll은 timeout 안에 반드시 돌아와야 한다.
pub trait EventSource: Send + 'static {
    fn poll(&mut self, timeout: Duration) -> SourcePoll;
}

pub type Delivery = Result<Event, DecodeError>;

/// 생산자(콜백) 쪽 핸들. 디코딩은 생산자 스레드에서 하고 결과를 그대로 넘긴다.
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<Delivery>,
}

pub struct ChannelSource {
    rx: Receiver<Delivery>,
}

/// 용량이 정해진 채널 쌍. 가득 차면 생산자 쪽 `send`가 블록된다.
pub fn event_channel(capacity: usize) -> (EventSender, ChannelSource) {
    let (tx, rx) = bounded(capacity.max(1));
    (EventSender { tx }, ChannelSource { rx })
}

impl EventSender {
    pub fn send(&self, event: Event) -> Result<(), SendError<Delivery>> {
        self.tx.send(Ok(event))
    }

    pub fn send_malformed(&self, error: DecodeError) -> Result<(), SendError<Delivery>> {
        self.tx.send(Err(error))
    }

    /// 블록하지 않는 버전. 채널이 가득 차면 이벤트를 돌려준다.
    pub fn try_send(&self, event: Event) -> Result<(), TrySendError<Delivery>> {
        self.tx.try_send(Ok(event))
    }
}

/// raw 레코드를 디코드해서 보내는 콜백 어댑터
pub struct RawEventSender {
    sender: EventSender,
    decoder: EventDecoder,
}

impl RawEventSender {
    pub fn new(sender: EventSender, decoder: EventDecoder) -> Self {
        Self { sender, decoder }
    }

    pub fn send_raw(&mut self, raw: &RawEvent) -> Result<(), SendError<Delivery>> {
        let delivery = self.decoder.decode(raw);
        self.sender.tx.send(delivery)
    }
}

impl EventSource for ChannelSource {
    fn poll(&mut self, timeout: Duration) -> SourcePoll {
        match self.rx.recv_timeout(timeout) {
            Ok(Ok(event)) => SourcePoll::Event(event),
            Ok(Err(error)) => SourcePoll::Malformed(error),
            Err(RecvTimeoutError::Timeout) => SourcePoll::Idle,
            Err(RecvTimeoutError::Disconnected) => SourcePoll::Exhausted,
        }
    }
}

/// 이미 가진 이벤트 목록(리플레이, 테스트)을 소스로 쓴다
pub struct IterSource<I> {
    inner: I,
}

impl<I> IterSource<I>
where
    I: Iterator<Item = Result<Event, DecodeError>> + Send + 'static,
{
    pub fn new(inner: I) -> Self {
        Self { inner }
    }
}

impl IterSource<std::vec::IntoIter<Result<Event, DecodeError>>> {
    pub fn from_events(events: Vec<Event>) -> Self {
        let items: Vec<_> = events.into_iter().map(Ok).collect();
        Self {
            inner: items.into_iter(),
        }
    }
}

impl<I> EventSource for IterSource<I>
where
    I: Iterator<Item = Result<Event, DecodeError>> + Send + 'static,
{
    fn poll(&mut self, _timeout: Duration) -> SourcePoll {
        match self.inner.next() {
            Some(Ok(event)) => SourcePoll::Event(event),
            Some(Err(error)) => SourcePoll::Malformed(error),
            None => SourcePoll::Exhausted,
        }
    }
}
