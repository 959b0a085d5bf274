//! 스트리밍 답변 조립 - 생성 결과 + 출처를 순서 있는 응답 이벤트로 변환
//!
//! 이벤트 순서: `Fragment`* → (`Citations` | `Error`). 마지막 이벤트 뒤에는 아무것도 오지 않습니다.
//! 전송 형식은 이벤트당 한 줄의 JSON 객체이며 키는 `chunk` / `sources` / `error` 중 하나입니다.
//!
//! 생성기와 소비자는 bounded mpsc 채널로 연결됩니다. 소비자가 [`AnswerStream`]을 버리면
//! 생산 태스크가 중단되고, 진행 중인 생성 스트림도 함께 해제됩니다.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::CollaboratorError;
use crate::generation::FragmentStream;

// ============================================================================
// Events
// ============================================================================

/// 응답 이벤트
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseEvent {
    /// 답변 텍스트 조각 (생성 순서)
    #[serde(rename = "chunk")]
    Fragment(String),
    /// 중복 제거된 출처 목록
    #[serde(rename = "sources")]
    Citations(Vec<String>),
    #[serde(rename = "error")]
    Error(String),
}

impl ResponseEvent {
    /// NDJSON 한 줄 (개행 포함)
    pub fn to_ndjson(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// 스트림의 마지막 이벤트인지
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResponseEvent::Fragment(_))
    }
}

/// 생성 협력자의 결과
pub enum Generation {
    /// 점진적 조각 스트림
    Stream(FragmentStream),
    /// 완성된 답변
    Finished(String),
}

// ============================================================================
// AnswerAssembler
// ============================================================================

/// 이벤트 생산자 (채널 송신 측)
pub struct AnswerAssembler {
    tx: mpsc::Sender<ResponseEvent>,
    idle_timeout: Duration,
}

impl AnswerAssembler {
    pub fn new(tx: mpsc::Sender<ResponseEvent>, idle_timeout: Duration) -> Self {
        Self { tx, idle_timeout }
    }

    /// 소비자가 떠났으면 false
    async fn send(&self, event: ResponseEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    /// 에러 이벤트 하나로 종료
    pub async fn fail(self, message: impl std::fmt::Display) {
        let message = message.to_string();
        tracing::warn!("Answer failed: {}", message);
        self.send(ResponseEvent::Error(message)).await;
    }

    /// 생성 결과를 조각 이벤트로 내보내고 출처 이벤트로 마무리
    ///
    /// 조각 사이 대기가 `idle_timeout`을 넘거나 생성 스트림이 실패하면
    /// 출처 대신 에러 이벤트로 끝냅니다.
    pub async fn deliver(self, generation: Generation, sources: Vec<String>) {
        match generation {
            Generation::Finished(answer) => {
                if !answer.is_empty() && !self.send(ResponseEvent::Fragment(answer)).await {
                    return;
                }
            }
            Generation::Stream(mut fragments) => loop {
                let next = tokio::select! {
                    biased;
                    _ = self.tx.closed() => {
                        tracing::debug!("Answer consumer went away, stopping generation");
                        return;
                    }
                    next = tokio::time::timeout(self.idle_timeout, fragments.next()) => next,
                };

                match next {
                    Ok(Some(Ok(fragment))) => {
                        if fragment.is_empty() {
                            continue;
                        }
                        if !self.send(ResponseEvent::Fragment(fragment)).await {
                            return;
                        }
                    }
                    Ok(Some(Err(e))) => {
                        let err = CollaboratorError::GenerationFailure(format!("{:#}", e));
                        self.fail(err).await;
                        return;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        let err = CollaboratorError::GenerationTimeout(self.idle_timeout);
                        self.fail(err).await;
                        return;
                    }
                }
            },
        }

        self.send(ResponseEvent::Citations(sources)).await;
    }
}

// ============================================================================
// AnswerStream
// ============================================================================

/// 소비자 측 이벤트 스트림 (유한, 재시작 불가)
///
/// 버리면 생산 태스크를 중단합니다.
pub struct AnswerStream {
    events: ReceiverStream<ResponseEvent>,
    task: JoinHandle<()>,
}

impl AnswerStream {
    /// 생산 태스크를 띄우고 수신 스트림 반환
    pub fn spawn<F, Fut>(buffer: usize, idle_timeout: Duration, producer: F) -> Self
    where
        F: FnOnce(AnswerAssembler) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let task = tokio::spawn(producer(AnswerAssembler::new(tx, idle_timeout)));
        Self {
            events: ReceiverStream::new(rx),
            task,
        }
    }

    /// 에러 이벤트 하나만 담은 스트림
    pub fn failed(message: impl std::fmt::Display) -> Self {
        let message = message.to_string();
        Self::spawn(1, Duration::from_secs(1), move |assembler| async move {
            assembler.fail(message).await;
        })
    }

    /// 남은 이벤트를 모두 수집
    pub async fn collect_events(mut self) -> Vec<ResponseEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

impl Stream for AnswerStream {
    type Item = ResponseEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl Drop for AnswerStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// 생성 결과와 출처로 이벤트 스트림 생성
pub fn assemble(
    generation: Generation,
    sources: Vec<String>,
    buffer: usize,
    idle_timeout: Duration,
) -> AnswerStream {
    AnswerStream::spawn(buffer, idle_timeout, move |assembler| {
        assembler.deliver(generation, sources)
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{GenerationRequest, Generator};
    use crate::test_support::StallingGenerator;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn fragments(parts: Vec<anyhow::Result<String>>) -> Generation {
        Generation::Stream(futures::stream::iter(parts).boxed())
    }

    #[test]
    fn test_event_wire_format() {
        assert_eq!(
            ResponseEvent::Fragment("Hel".to_string()).to_ndjson().unwrap(),
            "{\"chunk\":\"Hel\"}\n"
        );
        assert_eq!(
            ResponseEvent::Citations(vec!["a.txt".to_string()]).to_ndjson().unwrap(),
            "{\"sources\":[\"a.txt\"]}\n"
        );
        assert_eq!(
            ResponseEvent::Error("boom".to_string()).to_ndjson().unwrap(),
            "{\"error\":\"boom\"}\n"
        );

        let parsed: ResponseEvent = serde_json::from_str("{\"sources\":[]}").unwrap();
        assert_eq!(parsed, ResponseEvent::Citations(vec![]));
    }

    #[tokio::test]
    async fn test_fragments_then_citations() {
        let generation = fragments(vec![Ok("A".to_string()), Ok(String::new()), Ok("B".to_string())]);
        let events = assemble(generation, vec!["x.txt".to_string()], 2, Duration::from_secs(5))
            .collect_events()
            .await;

        assert_eq!(
            events,
            vec![
                ResponseEvent::Fragment("A".to_string()),
                ResponseEvent::Fragment("B".to_string()),
                ResponseEvent::Citations(vec!["x.txt".to_string()]),
            ]
        );
    }

    #[tokio::test]
    async fn test_finished_answer_single_fragment() {
        let events = assemble(
            Generation::Finished("whole answer".to_string()),
            vec![],
            4,
            Duration::from_secs(5),
        )
        .collect_events()
        .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], ResponseEvent::Fragment("whole answer".to_string()));
        assert!(events[1].is_terminal());
    }

    #[tokio::test]
    async fn test_stream_error_is_terminal() {
        let generation = fragments(vec![
            Ok("A".to_string()),
            Err(anyhow::anyhow!("connection reset")),
            Ok("never".to_string()),
        ]);
        let events = assemble(generation, vec!["x.txt".to_string()], 4, Duration::from_secs(5))
            .collect_events()
            .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], ResponseEvent::Fragment("A".to_string()));
        match &events[1] {
            ResponseEvent::Error(msg) => assert!(msg.contains("connection reset")),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_idle_timeout_becomes_error_event() {
        let released = Arc::new(AtomicBool::new(false));
        let generator = StallingGenerator {
            released: released.clone(),
        };
        let stream = generator
            .generate_stream(&GenerationRequest::default())
            .await
            .unwrap();

        let events = assemble(
            Generation::Stream(stream),
            vec!["x.txt".to_string()],
            4,
            Duration::from_millis(50),
        )
        .collect_events()
        .await;

        assert_eq!(events.len(), 2);
        match &events[1] {
            ResponseEvent::Error(msg) => assert!(msg.contains("timed out")),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_drop_cancels_generation() {
        let released = Arc::new(AtomicBool::new(false));
        let generator = StallingGenerator {
            released: released.clone(),
        };
        let stream = generator
            .generate_stream(&GenerationRequest::default())
            .await
            .unwrap();

        let mut answer = assemble(
            Generation::Stream(stream),
            vec![],
            4,
            Duration::from_secs(3600),
        );
        assert_eq!(
            answer.next().await,
            Some(ResponseEvent::Fragment("part-0".to_string()))
        );
        drop(answer);

        for _ in 0..50 {
            if released.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failed_stream_single_error() {
        let events = AnswerStream::failed("Vector index not initialized.")
            .collect_events()
            .await;
        assert_eq!(
            events,
            vec![ResponseEvent::Error("Vector index not initialized.".to_string())]
        );
    }
}
