use crate::error::MetricError;

use super::lush::{AssocInfo, LogicalIp, LushAssoc};
use super::metric::{MetricDescs, MetricValue};

pub type LoadModuleId = u32;
/// A virtual memory address.
pub type Vma = u64;

pub const LM_ID_NULL: LoadModuleId = 0;

/// Profiling payload of statement and call-site nodes.
///
/// Holds the sample location (physical and, optionally, logical) and one
/// metric value per slot of the tree's metric vector. `metrics.len()` always
/// equals `metric_descs.len()`.
#[derive(Debug, Clone)]
pub struct DynPayload {
    cp_id: u32,
    assoc_info: AssocInfo,
    lm_id: LoadModuleId,
    ip: Vma,
    op_index: u16,
    lip: Option<LogicalIp>,
    metric_descs: MetricDescs,
    metrics: Vec<MetricValue>,
}

impl DynPayload {
    /// A payload with every metric zero and no location.
    pub fn new(cp_id: u32, metric_descs: MetricDescs) -> Self {
        let metrics = vec![MetricValue::ZERO; metric_descs.len()];
        Self {
            cp_id,
            assoc_info: AssocInfo::NULL,
            lm_id: LM_ID_NULL,
            ip: 0,
            op_index: 0,
            lip: None,
            metric_descs,
            metrics,
        }
    }

    pub fn with_location(mut self, lm_id: LoadModuleId, ip: Vma, op_index: u16) -> Self {
        self.lm_id = lm_id;
        self.ip = ip;
        self.op_index = op_index;
        self
    }

    pub fn with_assoc(mut self, assoc_info: AssocInfo) -> Self {
        self.assoc_info = assoc_info;
        self
    }

    pub fn with_lip(mut self, lip: LogicalIp) -> Self {
        self.set_lip(Some(lip));
        self
    }

    pub fn with_metrics(mut self, metrics: Vec<MetricValue>) -> Result<Self, MetricError> {
        if metrics.len() != self.metric_descs.len() {
            return Err(MetricError::LengthMismatch {
                expected: self.metric_descs.len(),
                actual: metrics.len(),
            });
        }
        self.metrics = metrics;
        Ok(self)
    }

    /// Persistent call-path id shared with trace files; 0 means none.
    pub fn cp_id(&self) -> u32 {
        self.cp_id
    }

    // ---------------------------------------------------------------------
    // Logical unwinding
    // ---------------------------------------------------------------------

    pub fn assoc_info(&self) -> AssocInfo {
        self.assoc_info
    }

    pub fn set_assoc_info(&mut self, assoc_info: AssocInfo) {
        self.assoc_info = assoc_info;
    }

    pub fn assoc(&self) -> LushAssoc {
        self.assoc_info.assoc()
    }

    pub fn lip(&self) -> Option<&LogicalIp> {
        self.lip.as_ref()
    }

    /// A logical ip with a zero load module is stored as absent.
    pub fn set_lip(&mut self, lip: Option<LogicalIp>) {
        self.lip = lip.filter(LogicalIp::is_valid);
    }

    pub fn is_valid_lip(&self) -> bool {
        self.lip.as_ref().is_some_and(LogicalIp::is_valid)
    }

    fn valid_lip_mut(&mut self) -> Option<&mut LogicalIp> {
        self.lip.as_mut().filter(|lip| lip.is_valid())
    }

    // ---------------------------------------------------------------------
    // Location: logical-aware and physical views
    // ---------------------------------------------------------------------

    pub fn lm_id(&self) -> LoadModuleId {
        match &self.lip {
            Some(lip) if lip.is_valid() => lip.lm_id,
            _ => self.lm_id,
        }
    }

    pub fn lm_id_real(&self) -> LoadModuleId {
        self.lm_id
    }

    pub fn set_lm_id(&mut self, lm_id: LoadModuleId) {
        if let Some(lip) = self.valid_lip_mut() {
            lip.lm_id = lm_id;
            if !lip.is_valid() {
                self.lip = None;
            }
            return;
        }
        self.lm_id = lm_id;
    }

    pub fn set_lm_id_real(&mut self, lm_id: LoadModuleId) {
        self.lm_id = lm_id;
    }

    pub fn ip(&self) -> Vma {
        match &self.lip {
            Some(lip) if lip.is_valid() => lip.ip,
            _ => self.ip,
        }
    }

    pub fn ip_real(&self) -> Vma {
        self.ip
    }

    /// Writing through a valid logical ip resets the op index.
    pub fn set_ip(&mut self, ip: Vma, op_index: u16) {
        if let Some(lip) = self.valid_lip_mut() {
            lip.ip = ip;
            self.op_index = 0;
            return;
        }
        self.ip = ip;
        self.op_index = op_index;
    }

    pub fn op_index(&self) -> u16 {
        self.op_index
    }

    // ---------------------------------------------------------------------
    // Metrics
    // ---------------------------------------------------------------------

    pub fn metric_descs(&self) -> &MetricDescs {
        &self.metric_descs
    }

    pub fn metrics(&self) -> &[MetricValue] {
        &self.metrics
    }

    pub fn num_metrics(&self) -> usize {
        self.metrics.len()
    }

    pub fn metric(&self, index: usize) -> Result<MetricValue, MetricError> {
        self.metrics
            .get(index)
            .copied()
            .ok_or(MetricError::OutOfBounds {
                index,
                len: self.metrics.len(),
            })
    }

    pub fn has_metrics(&self) -> bool {
        self.metrics.iter().any(|m| !m.is_zero())
    }

    pub fn metric_incr(&mut self, index: usize, by: MetricValue) -> Result<(), MetricError> {
        let len = self.metrics.len();
        let (Some(slot), Some(desc)) = (self.metrics.get_mut(index), self.metric_descs.get(index))
        else {
            return Err(MetricError::OutOfBounds { index, len });
        };
        slot.incr(desc.kind, by);
        Ok(())
    }

    pub fn metric_decr(&mut self, index: usize, by: MetricValue) -> Result<(), MetricError> {
        let len = self.metrics.len();
        let (Some(slot), Some(desc)) = (self.metrics.get_mut(index), self.metric_descs.get(index))
        else {
            return Err(MetricError::OutOfBounds { index, len });
        };
        slot.decr(desc.kind, by);
        Ok(())
    }

    /// Adds `other`'s values into slots `beg..beg + other.len()`, using this
    /// payload's descriptor kinds.
    pub fn merge_metrics(&mut self, other: &DynPayload, beg: usize) -> Result<(), MetricError> {
        let end = beg + other.metrics.len();
        if end > self.metrics.len() {
            return Err(MetricError::OutOfBounds {
                index: end.saturating_sub(1),
                len: self.metrics.len(),
            });
        }
        for (y_i, x_i) in (beg..end).enumerate() {
            self.metric_incr(x_i, other.metrics[y_i])?;
        }
        Ok(())
    }

    /// Concatenates `other`'s values after ours; `metric_descs` must describe
    /// the combined layout.
    pub fn append_metrics(
        &mut self,
        other: &DynPayload,
        metric_descs: &MetricDescs,
    ) -> Result<(), MetricError> {
        let combined = self.metrics.len() + other.metrics.len();
        if metric_descs.len() != combined {
            return Err(MetricError::LengthMismatch {
                expected: metric_descs.len(),
                actual: combined,
            });
        }
        self.metrics.extend_from_slice(&other.metrics);
        self.metric_descs = metric_descs.clone();
        Ok(())
    }

    /// Inserts `count` zero slots before position `at`, keeping every existing
    /// value, and switches to `metric_descs`, which must have the new length.
    pub fn expand_metrics(
        &mut self,
        metric_descs: &MetricDescs,
        at: usize,
        count: usize,
    ) -> Result<(), MetricError> {
        let len = self.metrics.len();
        if at > len {
            return Err(MetricError::InvalidOffset { at, len });
        }
        if metric_descs.len() != len + count {
            return Err(MetricError::LengthMismatch {
                expected: metric_descs.len(),
                actual: len + count,
            });
        }
        self.metrics
            .splice(at..at, std::iter::repeat_n(MetricValue::ZERO, count));
        self.metric_descs = metric_descs.clone();
        Ok(())
    }

    pub fn expand_metrics_before(
        &mut self,
        metric_descs: &MetricDescs,
        count: usize,
    ) -> Result<(), MetricError> {
        self.expand_metrics(metric_descs, 0, count)
    }

    pub fn expand_metrics_after(
        &mut self,
        metric_descs: &MetricDescs,
        count: usize,
    ) -> Result<(), MetricError> {
        let len = self.metrics.len();
        self.expand_metrics(metric_descs, len, count)
    }

    // ---------------------------------------------------------------------
    // Merging
    // ---------------------------------------------------------------------

    /// Whether two payloads describe the same sample location.
    ///
    /// Compares physical fields, never the logical-aware views.
    pub fn is_mergeable(&self, other: &DynPayload) -> bool {
        // cheapest mismatches first
        self.lm_id == other.lm_id
            && self.ip == other.ip
            && self.lip == other.lip
            && self.assoc().class_eq(other.assoc())
            && self.assoc_info.path_len_eq(other.assoc_info)
    }

    // ---------------------------------------------------------------------
    // Text
    // ---------------------------------------------------------------------

    pub fn lip_str(&self) -> String {
        self.lip
            .as_ref()
            .map_or_else(|| "-".to_string(), LogicalIp::to_string)
    }

    /// Compact description of the location fields, for dumps.
    pub fn name_dyn(&self) -> String {
        format!(
            "[assoc({}) ip({}:{:#x}, {}) lip({})]",
            self.assoc_info,
            self.lm_id,
            self.ip,
            self.op_index,
            self.lip_str()
        )
    }
}
