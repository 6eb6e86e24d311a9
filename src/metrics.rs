//! [Prometheus][prometheus]用のメトリクス.
//!
//! [prometheus]: https://prometheus.io/
use prometrics::metrics::{Counter, Gauge, MetricBuilder};

use crate::aio::OperationKind;
use crate::backend::Milestone;

/// 非同期操作のメトリクス.
#[derive(Debug, Clone)]
pub struct AioMetrics {
    pub(crate) issued_operations: OperationCounter,
    pub(crate) issue_failures: OperationCounter,
    pub(crate) milestones: MilestoneCounter,
    pub(crate) milestone_failures: MilestoneCounter,
    pub(crate) released_handles: Counter,
    pub(crate) double_releases: Counter,
    pub(crate) outstanding_handles: Gauge,
}
impl AioMetrics {
    /// 新しい`AioMetrics`インスタンスを生成する.
    pub fn new(builder: &MetricBuilder) -> Self {
        let mut builder = builder.clone();
        builder.namespace("radosbridge").subsystem("aio");
        AioMetrics {
            issued_operations: OperationCounter::new(
                &builder,
                "issued_operations_total",
                "Number of asynchronous operations issued to the backend",
            ),
            issue_failures: OperationCounter::new(
                &builder,
                "issue_failures_total",
                "Number of asynchronous operations the backend refused to issue",
            ),
            milestones: MilestoneCounter::new(
                &builder,
                "milestones_total",
                "Number of observed milestones",
            ),
            milestone_failures: MilestoneCounter::new(
                &builder,
                "milestone_failures_total",
                "Number of milestones resolved with a failure status",
            ),
            released_handles: builder
                .counter("released_handles_total")
                .help("Number of released completion handles")
                .finish()
                .expect("Never fails"),
            double_releases: builder
                .counter("double_releases_total")
                .help("Number of attempts to release an already released handle")
                .finish()
                .expect("Never fails"),
            outstanding_handles: builder
                .gauge("outstanding_handles")
                .help("Number of completion handles not released yet")
                .finish()
                .expect("Never fails"),
        }
    }

    /// バックエンドに発行された非同期操作の数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// radosbridge_aio_issued_operations_total { op="write|write_full|append|read|remove" } <COUNTER>
    /// ```
    pub fn issued_operations(&self) -> &OperationCounter {
        &self.issued_operations
    }

    /// 発行自体に失敗した非同期操作の数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// radosbridge_aio_issue_failures_total { op="write|write_full|append|read|remove" } <COUNTER>
    /// ```
    pub fn issue_failures(&self) -> &OperationCounter {
        &self.issue_failures
    }

    /// 観測されたマイルストーンの数.
    ///
    /// 失敗ステータスで解決されたものも含む.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// radosbridge_aio_milestones_total { milestone="complete|safe" } <COUNTER>
    /// ```
    pub fn milestones(&self) -> &MilestoneCounter {
        &self.milestones
    }

    /// 失敗ステータスで解決されたマイルストーンの数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// radosbridge_aio_milestone_failures_total { milestone="complete|safe" } <COUNTER>
    /// ```
    pub fn milestone_failures(&self) -> &MilestoneCounter {
        &self.milestone_failures
    }

    /// 解放された完了ハンドルの数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// radosbridge_aio_released_handles_total <COUNTER>
    /// ```
    pub fn released_handles(&self) -> u64 {
        self.released_handles.value() as u64
    }

    /// 解放済みのハンドルに対して、再度解放が試みられた回数.
    ///
    /// この値が`0`以外の場合には、プログラムにバグが存在する.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// radosbridge_aio_double_releases_total <COUNTER>
    /// ```
    pub fn double_releases(&self) -> u64 {
        self.double_releases.value() as u64
    }

    /// 未解放の完了ハンドルの数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// radosbridge_aio_outstanding_handles <GAUGE>
    /// ```
    pub fn outstanding_handles(&self) -> u64 {
        self.outstanding_handles.value() as u64
    }
}
impl Default for AioMetrics {
    fn default() -> Self {
        Self::new(&MetricBuilder::new())
    }
}

/// 非同期操作の種類毎のカウンタ.
#[derive(Debug, Clone)]
pub struct OperationCounter {
    pub(crate) write: Counter,
    pub(crate) write_full: Counter,
    pub(crate) append: Counter,
    pub(crate) read: Counter,
    pub(crate) remove: Counter,
}
impl OperationCounter {
    /// WRITE操作用のカウンタの値を返す.
    pub fn write(&self) -> u64 {
        self.write.value() as u64
    }

    /// WRITE_FULL操作用のカウンタの値を返す.
    pub fn write_full(&self) -> u64 {
        self.write_full.value() as u64
    }

    /// APPEND操作用のカウンタの値を返す.
    pub fn append(&self) -> u64 {
        self.append.value() as u64
    }

    /// READ操作用のカウンタの値を返す.
    pub fn read(&self) -> u64 {
        self.read.value() as u64
    }

    /// REMOVE操作用のカウンタの値を返す.
    pub fn remove(&self) -> u64 {
        self.remove.value() as u64
    }

    /// 全種類の合計値を返す.
    pub fn sum(&self) -> u64 {
        self.write() + self.write_full() + self.append() + self.read() + self.remove()
    }

    pub(crate) fn increment(&self, kind: OperationKind) {
        match kind {
            OperationKind::Write => self.write.increment(),
            OperationKind::WriteFull => self.write_full.increment(),
            OperationKind::Append => self.append.increment(),
            OperationKind::Read => self.read.increment(),
            OperationKind::Remove => self.remove.increment(),
        }
    }

    fn new(builder: &MetricBuilder, name: &str, help: &str) -> Self {
        let counter = |kind: OperationKind| {
            builder
                .counter(name)
                .help(help)
                .label("op", kind.as_str())
                .finish()
                .expect("Never fails")
        };
        OperationCounter {
            write: counter(OperationKind::Write),
            write_full: counter(OperationKind::WriteFull),
            append: counter(OperationKind::Append),
            read: counter(OperationKind::Read),
            remove: counter(OperationKind::Remove),
        }
    }
}

/// マイルストーン毎のカウンタ.
#[derive(Debug, Clone)]
pub struct MilestoneCounter {
    pub(crate) complete: Counter,
    pub(crate) safe: Counter,
}
impl MilestoneCounter {
    /// `Complete`用のカウンタの値を返す.
    pub fn complete(&self) -> u64 {
        self.complete.value() as u64
    }

    /// `Safe`用のカウンタの値を返す.
    pub fn safe(&self) -> u64 {
        self.safe.value() as u64
    }

    pub(crate) fn increment(&self, milestone: Milestone) {
        match milestone {
            Milestone::Complete => self.complete.increment(),
            Milestone::Safe => self.safe.increment(),
        }
    }

    fn new(builder: &MetricBuilder, name: &str, help: &str) -> Self {
        let counter = |milestone: Milestone| {
            builder
                .counter(name)
                .help(help)
                .label("milestone", milestone.as_str())
                .finish()
                .expect("Never fails")
        };
        MilestoneCounter {
            complete: counter(Milestone::Complete),
            safe: counter(Milestone::Safe),
        }
    }
}

/// 一時バッファのメトリクス.
#[derive(Debug, Clone)]
pub struct BufferMetrics {
    pub(crate) allocated_bytes: Counter,
    pub(crate) grow_retries: Counter,
    pub(crate) exhausted: Counter,
}
impl BufferMetrics {
    /// 新しい`BufferMetrics`インスタンスを生成する.
    pub fn new(builder: &MetricBuilder) -> Self {
        let mut builder = builder.clone();
        builder.namespace("radosbridge").subsystem("buffer");
        BufferMetrics {
            allocated_bytes: builder
                .counter("allocated_bytes_total")
                .help("Number of bytes allocated for transient buffers")
                .finish()
                .expect("Never fails"),
            grow_retries: builder
                .counter("grow_retries_total")
                .help("Number of retries caused by insufficient buffer capacity")
                .finish()
                .expect("Never fails"),
            exhausted: builder
                .counter("exhausted_total")
                .help("Number of calls which gave up growing buffers")
                .finish()
                .expect("Never fails"),
        }
    }

    /// これまでに一時バッファとして割り当てたバイト数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// radosbridge_buffer_allocated_bytes_total <COUNTER>
    /// ```
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes.value() as u64
    }

    /// バッファ容量の不足による再試行の回数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// radosbridge_buffer_grow_retries_total <COUNTER>
    /// ```
    pub fn grow_retries(&self) -> u64 {
        self.grow_retries.value() as u64
    }

    /// 最大試行回数に達して拡張を諦めた回数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// radosbridge_buffer_exhausted_total <COUNTER>
    /// ```
    pub fn exhausted(&self) -> u64 {
        self.exhausted.value() as u64
    }

    pub(crate) fn count_allocation(&self, size: usize) {
        self.allocated_bytes.add_u64(size as u64);
    }
}
impl Default for BufferMetrics {
    fn default() -> Self {
        Self::new(&MetricBuilder::new())
    }
}
