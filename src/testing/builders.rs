//! Test doubles for the encoder seam and the row producer.

use crate::encoder::{Encoder, EncoderConfig, EncoderFactory, SegmentDescriptor};
use crate::row::Value;
use anyhow::{Result, bail};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct LogState {
    validations: usize,
    builds: usize,
    appended: Vec<Vec<Value>>,
    closes: usize,
    configs: Vec<EncoderConfig>,
}

/// Shared record of everything a [`RecordingEncoderFactory`] and its encoders saw.
///
/// Clones observe the same log, so tests keep one handle while the factory is
/// moved into a writer.
#[derive(Debug, Clone, Default)]
pub struct EncoderLog {
    inner: Arc<Mutex<LogState>>,
}

impl EncoderLog {
    fn state(&self) -> MutexGuard<'_, LogState> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Calls to [`EncoderFactory::validate`].
    #[must_use]
    pub fn validations(&self) -> usize {
        self.state().validations
    }

    /// Encoders built, successful or not.
    #[must_use]
    pub fn builds(&self) -> usize {
        self.state().builds
    }

    /// Rows accepted by `append`, in call order.
    #[must_use]
    pub fn appended(&self) -> Vec<Vec<Value>> {
        self.state().appended.clone()
    }

    /// Calls to `close`, including repeated and failing ones.
    #[must_use]
    pub fn closes(&self) -> usize {
        self.state().closes
    }

    /// Configurations passed to `build`.
    #[must_use]
    pub fn configs(&self) -> Vec<EncoderConfig> {
        self.state().configs.clone()
    }
}

/// Encoder factory whose encoders record calls instead of writing files.
///
/// # Example
///
/// ```
/// use bulkloader::encoder::{Encoder, EncoderFactory};
/// use bulkloader::testing::RecordingEncoderFactory;
/// use bulkloader::Value;
/// # use bulkloader::encoder::EncoderConfig;
/// # let config = EncoderConfig {
/// #     directory: ".".into(), keyspace: "ks".into(), table: "t".into(),
/// #     schema: String::new(), statement: String::new(), buffer_bytes: 1,
/// #     sorted: false, partitioner: "Murmur3Partitioner".into(), compression: None,
/// # };
///
/// let factory = RecordingEncoderFactory::new().fail_on_row(2);
/// let log = factory.log();
/// let mut encoder = factory.build(&config).unwrap();
/// encoder.append(&[Value::Int(1)]).unwrap();
/// assert!(encoder.append(&[Value::Int(2)]).is_err());
/// encoder.close().unwrap();
/// assert_eq!(log.appended().len(), 1);
/// assert_eq!(log.closes(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RecordingEncoderFactory {
    log: EncoderLog,
    fail_rows: BTreeSet<u64>,
    fail_validation: bool,
    fail_build: bool,
    fail_close: bool,
}

impl RecordingEncoderFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle on the shared call log.
    #[must_use]
    pub fn log(&self) -> EncoderLog {
        self.log.clone()
    }

    /// Reject the `n`-th call to `append` (1-based).
    #[must_use]
    pub fn fail_on_row(mut self, n: u64) -> Self {
        self.fail_rows.insert(n);
        self
    }

    /// Reject every call to `append`.
    #[must_use]
    pub fn fail_all_rows(mut self) -> Self {
        self.fail_rows.insert(0);
        self
    }

    #[must_use]
    pub const fn fail_validation(mut self) -> Self {
        self.fail_validation = true;
        self
    }

    #[must_use]
    pub const fn fail_build(mut self) -> Self {
        self.fail_build = true;
        self
    }

    #[must_use]
    pub const fn fail_on_close(mut self) -> Self {
        self.fail_close = true;
        self
    }
}

impl EncoderFactory for RecordingEncoderFactory {
    type Encoder = RecordingEncoder;

    fn validate(&self, _config: &EncoderConfig) -> Result<()> {
        self.log.state().validations += 1;
        if self.fail_validation {
            bail!("schema rejected");
        }
        Ok(())
    }

    fn build(&self, config: &EncoderConfig) -> Result<RecordingEncoder> {
        {
            let mut state = self.log.state();
            state.builds += 1;
            state.configs.push(config.clone());
        }
        if self.fail_build {
            bail!("encoder construction failed");
        }
        Ok(RecordingEncoder {
            log: self.log.clone(),
            fail_rows: self.fail_rows.clone(),
            fail_close: self.fail_close,
            calls: 0,
            closed: false,
        })
    }
}

/// Encoder built by [`RecordingEncoderFactory`].
#[derive(Debug)]
pub struct RecordingEncoder {
    log: EncoderLog,
    fail_rows: BTreeSet<u64>,
    fail_close: bool,
    calls: u64,
    closed: bool,
}

impl Encoder for RecordingEncoder {
    fn append(&mut self, values: &[Value]) -> Result<()> {
        self.calls += 1;
        if self.closed {
            bail!("append after close");
        }
        if self.fail_rows.contains(&0) || self.fail_rows.contains(&self.calls) {
            bail!("value rejected at append #{}", self.calls);
        }
        self.log.state().appended.push(values.to_vec());
        Ok(())
    }

    fn close(&mut self) -> Result<Vec<SegmentDescriptor>> {
        self.log.state().closes += 1;
        if self.closed {
            bail!("encoder closed twice");
        }
        self.closed = true;
        if self.fail_close {
            bail!("disk full while finalizing");
        }
        Ok(Vec::new())
    }
}

/// Shared count of rows pulled from a [`CountingRows`].
#[derive(Debug, Clone, Default)]
pub struct PullCount(Arc<AtomicUsize>);

impl PullCount {
    #[must_use]
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Row producer wrapper that counts `next` calls.
pub struct CountingRows<I> {
    inner: I,
    pulls: PullCount,
}

impl<I: Iterator> CountingRows<I> {
    pub fn new(rows: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            inner: rows.into_iter(),
            pulls: PullCount::default(),
        }
    }

    /// Handle that keeps counting after the producer has been moved.
    #[must_use]
    pub fn pulls(&self) -> PullCount {
        self.pulls.clone()
    }
}

impl<I: Iterator> Iterator for CountingRows<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        self.pulls.0.fetch_add(1, Ordering::SeqCst);
        self.inner.next()
    }
}
