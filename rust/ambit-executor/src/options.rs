//! Executor configuration.

use std::time::Duration;

use ambit_common::{Error, Result, verify_arg};
use serde::{Deserialize, Serialize};

/// Sizing and naming of a [`ContextTrackingExecutor`](crate::ContextTrackingExecutor).
///
/// The pool keeps up to `core_threads` workers alive for its whole life. When
/// the backing queue is full, it grows up to `max_threads`; workers beyond the
/// core count retire after `keep_alive_ms` without work. With an unbounded
/// queue (`queue_capacity: None`) the pool never grows past the core count.
///
/// Deserialized documents may leave out any field. A document that sets
/// `core_threads` without `max_threads` gets at least `core_threads` maximum
/// workers, as with [`ExecutorOptions::core_threads`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "OptionsDocument")]
pub struct ExecutorOptions {
    pub core_threads: usize,
    pub max_threads: usize,
    pub queue_capacity: Option<usize>,
    pub keep_alive_ms: u64,
    pub thread_name_prefix: String,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(8);
        ExecutorOptions {
            core_threads: threads,
            max_threads: threads,
            queue_capacity: None,
            keep_alive_ms: 60_000,
            thread_name_prefix: "ambit-worker".to_string(),
        }
    }
}

/// The on-disk shape of [`ExecutorOptions`]: every field optional.
#[derive(Deserialize)]
struct OptionsDocument {
    core_threads: Option<usize>,
    max_threads: Option<usize>,
    queue_capacity: Option<usize>,
    keep_alive_ms: Option<u64>,
    thread_name_prefix: Option<String>,
}

impl From<OptionsDocument> for ExecutorOptions {
    fn from(doc: OptionsDocument) -> Self {
        let mut options = ExecutorOptions::default();
        if let Some(threads) = doc.core_threads {
            options = options.core_threads(threads);
        }
        if let Some(threads) = doc.max_threads {
            options.max_threads = threads;
        }
        options.queue_capacity = doc.queue_capacity;
        if let Some(keep_alive_ms) = doc.keep_alive_ms {
            options.keep_alive_ms = keep_alive_ms;
        }
        if let Some(prefix) = doc.thread_name_prefix {
            options.thread_name_prefix = prefix;
        }
        options
    }
}

impl ExecutorOptions {
    /// A fixed-size pool over an unbounded queue.
    pub fn fixed(threads: usize) -> Self {
        ExecutorOptions {
            core_threads: threads,
            max_threads: threads,
            ..Default::default()
        }
    }

    /// Sets the core worker count, raising `max_threads` to match if needed.
    pub fn core_threads(mut self, threads: usize) -> Self {
        self.core_threads = threads;
        self.max_threads = self.max_threads.max(threads);
        self
    }

    pub fn max_threads(mut self, threads: usize) -> Self {
        self.max_threads = threads;
        self
    }

    pub fn queue_capacity(mut self, capacity: Option<usize>) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive_ms = u64::try_from(keep_alive.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn keep_alive_duration(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    pub fn validate(&self) -> Result<()> {
        verify_arg!(core_threads, self.core_threads > 0);
        verify_arg!(max_threads, self.max_threads >= self.core_threads);
        verify_arg!(queue_capacity, self.queue_capacity != Some(0));
        Ok(())
    }

    /// Parses and validates options from a JSON document. Missing fields take
    /// their default values.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let options: ExecutorOptions =
            serde_json::from_str(json).map_err(|e| Error::other("executor options", e))?;
        options.validate()?;
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ambit_common::ErrorKind;

    #[test]
    fn test_default_is_valid() {
        ExecutorOptions::default().validate().unwrap();
        ExecutorOptions::fixed(1).validate().unwrap();
    }

    #[test]
    fn test_builder() {
        let options = ExecutorOptions::fixed(2)
            .core_threads(4)
            .queue_capacity(Some(16))
            .keep_alive(Duration::from_secs(2))
            .thread_name_prefix("io");
        assert_eq!(options.core_threads, 4);
        assert_eq!(options.max_threads, 4);
        assert_eq!(options.keep_alive_ms, 2000);
        assert_eq!(options.thread_name_prefix, "io");
        options.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_sizes() {
        let invalid = |options: ExecutorOptions| match options.validate().unwrap_err().into_kind() {
            ErrorKind::InvalidArgument { name, .. } => name,
            other => panic!("unexpected kind {other:?}"),
        };
        assert_eq!(invalid(ExecutorOptions::fixed(0)), "core_threads");
        assert_eq!(invalid(ExecutorOptions::fixed(4).max_threads(2)), "max_threads");
        assert_eq!(
            invalid(ExecutorOptions::fixed(1).queue_capacity(Some(0))),
            "queue_capacity"
        );
    }

    #[test]
    fn test_from_json_str() {
        let options = ExecutorOptions::from_json_str(
            r#"{ "core_threads": 2, "max_threads": 6, "queue_capacity": 32 }"#,
        )
        .unwrap();
        assert_eq!(options.core_threads, 2);
        assert_eq!(options.max_threads, 6);
        assert_eq!(options.queue_capacity, Some(32));
        assert_eq!(options.thread_name_prefix, "ambit-worker");

        assert!(ExecutorOptions::from_json_str(r#"{ "core_threads": 0 }"#).is_err());
        assert!(
            ExecutorOptions::from_json_str(r#"{ "core_threads": 4, "max_threads": 2 }"#).is_err()
        );
        assert!(ExecutorOptions::from_json_str("not json").is_err());
    }

    #[test]
    fn test_core_threads_alone_raises_max_threads() {
        let defaults = ExecutorOptions::default();
        let many = defaults.max_threads + 16;
        let options =
            ExecutorOptions::from_json_str(&format!(r#"{{ "core_threads": {many} }}"#)).unwrap();
        assert_eq!(options.core_threads, many);
        assert_eq!(options.max_threads, many);

        let options = ExecutorOptions::from_json_str(r#"{ "core_threads": 1 }"#).unwrap();
        assert_eq!(options.max_threads, defaults.max_threads);

        let options = ExecutorOptions::from_json_str("{}").unwrap();
        assert_eq!(options, defaults);
    }
}
