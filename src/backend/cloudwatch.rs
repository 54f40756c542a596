use super::{BackendError, LogBackend, Result, SequenceToken, StreamId};
use crate::config::DestinationConfig;
use crate::shipper::batch::LogEvent;
use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_cloudwatchlogs::error::{DisplayErrorContext, SdkError};
use aws_sdk_cloudwatchlogs::operation::put_log_events::PutLogEventsError;
use aws_sdk_cloudwatchlogs::types::InputLogEvent;
use aws_sdk_cloudwatchlogs::Client;
use std::fmt::Debug;
use tracing::{debug, warn};

/// `LogBackend` on AWS CloudWatch Logs.
#[derive(Debug, Clone)]
pub struct CloudWatchBackend {
    client: Client,
}

impl CloudWatchBackend {
    /// Build a client from the ambient AWS credential chain, pinned to the
    /// configured region and optional endpoint/timeout.
    pub async fn new(config: &DestinationConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if let Some(timeout) = config.timeout {
            loader = loader.timeout_config(
                TimeoutConfig::builder().operation_timeout(timeout).build(),
            );
        }

        let sdk_config = loader.load().await;
        Self::from_client(Client::new(&sdk_config))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LogBackend for CloudWatchBackend {
    async fn create_log_group(&self, group: &str) -> Result<()> {
        match self.client.create_log_group().log_group_name(group).send().await {
            Ok(_) => Ok(()),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_resource_already_exists_exception()) =>
            {
                Err(BackendError::AlreadyExists(group.to_string()))
            }
            Err(err) => Err(classify("CreateLogGroup", err)),
        }
    }

    async fn create_log_stream(&self, stream: &StreamId) -> Result<()> {
        let result = self
            .client
            .create_log_stream()
            .log_group_name(&stream.group)
            .log_stream_name(&stream.stream)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_resource_already_exists_exception()) =>
            {
                Err(BackendError::AlreadyExists(stream.to_string()))
            }
            Err(err) => Err(classify("CreateLogStream", err)),
        }
    }

    async fn current_token(&self, stream: &StreamId) -> Result<Option<SequenceToken>> {
        // Streams are listed by name, so with limit 1 an exact match sorts first.
        let output = self
            .client
            .describe_log_streams()
            .log_group_name(&stream.group)
            .log_stream_name_prefix(&stream.stream)
            .limit(1)
            .send()
            .await
            .map_err(|err| classify("DescribeLogStreams", err))?;

        let token = output
            .log_streams()
            .iter()
            .find(|s| s.log_stream_name() == Some(stream.stream.as_str()))
            .and_then(|s| s.upload_sequence_token())
            .map(SequenceToken::new);

        debug!(stream = %stream, token = ?token, "described log stream");
        Ok(token)
    }

    async fn put_events(
        &self,
        stream: &StreamId,
        events: &[LogEvent],
        token: Option<&SequenceToken>,
    ) -> Result<Option<SequenceToken>> {
        let log_events = events
            .iter()
            .map(|event| {
                InputLogEvent::builder()
                    .timestamp(event.timestamp)
                    .message(event.message.clone())
                    .build()
                    .map_err(|e| BackendError::Service(format!("invalid log event: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let result = self
            .client
            .put_log_events()
            .log_group_name(&stream.group)
            .log_stream_name(&stream.stream)
            .set_log_events(Some(log_events))
            .set_sequence_token(token.map(|t| t.as_str().to_string()))
            .send()
            .await;

        match result {
            Ok(output) => {
                if let Some(rejected) = output.rejected_log_events_info() {
                    warn!(
                        stream = %stream,
                        too_new_start = ?rejected.too_new_log_event_start_index(),
                        too_old_end = ?rejected.too_old_log_event_end_index(),
                        expired_end = ?rejected.expired_log_event_end_index(),
                        "backend rejected part of the batch"
                    );
                }
                Ok(output.next_sequence_token().map(SequenceToken::new))
            }
            Err(err) => match conflict_token(&err) {
                Some(expected) => Err(BackendError::TokenConflict { expected }),
                None => Err(classify("PutLogEvents", err)),
            },
        }
    }
}

/// `Some(expected)` when the put failed on a stale or already-used token.
fn conflict_token<R>(err: &SdkError<PutLogEventsError, R>) -> Option<Option<SequenceToken>> {
    match err.as_service_error()? {
        PutLogEventsError::InvalidSequenceTokenException(e) => {
            Some(e.expected_sequence_token().map(SequenceToken::new))
        }
        PutLogEventsError::DataAlreadyAcceptedException(e) => {
            Some(e.expected_sequence_token().map(SequenceToken::new))
        }
        _ => None,
    }
}

fn classify<E, R>(operation: &str, err: SdkError<E, R>) -> BackendError
where
    E: std::error::Error + Send + Sync + 'static,
    R: Debug + Send + Sync + 'static,
{
    match err {
        SdkError::TimeoutError(_) => BackendError::Timeout(operation.to_string()),
        other => BackendError::Service(format!(
            "{operation} failed: {}",
            DisplayErrorContext(&other)
        )),
    }
}
